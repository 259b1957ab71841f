//! Per-class (de)serializers: one `(read, write, validate, finish_loading)`
//! vtable per CK class, registered into a [`crate::schema::SchemaRegistry`].
//!
//! Grounded in the teacher's per-codec module shape (`encode/jb2`,
//! `encode/iw44` each own their symbol tables and entropy params) but with
//! no direct teacher analog for class inheritance — the read/write bodies
//! here follow §4.H's "identifier probe, absent block leaves defaults,
//! unknown bytes captured as `raw_tail`" pattern instead.

use crate::arena::{Arena, ArenaBytes};
use crate::chunk::Chunk;
use crate::error::Result;
use crate::repository::ObjectRepository;
use crate::schema::{ClassDescriptor, SchemaRegistry};
use crate::types::{ClassId, Guid, Matrix4, ObjectId, Vector2, Vector4};

/// Numeric class ids, assigned by this implementation (not interoperable
/// with any external numbering; stable only within files this crate writes).
pub mod ids {
    use crate::types::ClassId;

    pub const CKOBJECT: ClassId = ClassId(1);
    pub const CKSCENEOBJECT: ClassId = ClassId(2);
    pub const CKBEOBJECT: ClassId = ClassId(3);
    pub const CKGROUP: ClassId = ClassId(4);
    pub const CKPARAMETER: ClassId = ClassId(5);
    pub const CKPARAMETERIN: ClassId = ClassId(6);
    pub const CKPARAMETEROUT: ClassId = ClassId(7);
    pub const CK2DENTITY: ClassId = ClassId(8);
    pub const CK3DENTITY: ClassId = ClassId(9);
    pub const CKMESH: ClassId = ClassId(10);
    pub const CKTEXTURE: ClassId = ClassId(11);
    pub const CKMATERIAL: ClassId = ClassId(12);
    pub const CKCAMERA: ClassId = ClassId(13);
    pub const CKTARGETCAMERA: ClassId = ClassId(14);
    pub const CKLIGHT: ClassId = ClassId(15);
    pub const CKSOUND: ClassId = ClassId(16);
    pub const CKBEHAVIOR: ClassId = ClassId(17);
    pub const CKBEHAVIORIO: ClassId = ClassId(18);
    pub const CKATTRIBUTEMANAGER: ClassId = ClassId(100);
    pub const CKBEHAVIORMANAGER: ClassId = ClassId(101);
    pub const CKPARAMETERMANAGER: ClassId = ClassId(102);
}

// Intra-chunk identifiers. Writers must emit blocks in this order (§4.H).
const ID_SCRIPTS: u32 = 1;
const ID_DATAS: u32 = 2;
const ID_NEWATTRIBUTES: u32 = 3;
const ID_ATTRIBUTES: u32 = 4;
const ID_SINGLEACTIVITY: u32 = 5;
const ID_GROUP_MEMBERS: u32 = 6;
const ID_PARAMETER_TYPE: u32 = 7;
const ID_PARAMETER_VALUE: u32 = 8;
const ID_PARAMETER_SOURCE: u32 = 9;
const ID_2D_GEOMETRY: u32 = 10;
const ID_3D_TRANSFORM: u32 = 11;
const ID_MESH_GEOMETRY: u32 = 12;
const ID_TEXTURE_IMAGE: u32 = 13;
const ID_MATERIAL_COLORS: u32 = 14;
const ID_CAMERA_PARAMS: u32 = 15;
const ID_TARGET: u32 = 16;
const ID_LIGHT_PARAMS: u32 = 17;
const ID_SOUND_PARAMS: u32 = 18;
const ID_BEHAVIOR_GRAPH: u32 = 19;
const ID_BEHAVIOR_IO: u32 = 20;

/// Reads the remaining bytes of the chunk verbatim, for forward
/// compatibility with fields this implementation does not schematize.
fn read_raw_tail(chunk: &mut Chunk) -> Result<Vec<u8>> {
    let remaining = chunk.remaining();
    chunk.read_buffer_no_size(remaining * 4)
}

fn write_raw_tail(chunk: &mut Chunk, tail: &[u8]) -> Result<()> {
    chunk.write_buffer_no_size(tail)
}

// ---------------------------------------------------------------------
// CKObject
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CkObjectData {
    pub raw_tail: Vec<u8>,
}

/// Reads this class's own schematized fields only (here, none); does not
/// touch `raw_tail`, since this is also called as a base step by derived
/// classes that have more blocks to seek after it.
fn ckobject_fields_read(_chunk: &mut Chunk, _arena: &Arena) -> Result<CkObjectData> {
    Ok(CkObjectData::default())
}

fn ckobject_fields_write(_data: &CkObjectData, _chunk: &mut Chunk, _arena: &Arena) -> Result<()> {
    Ok(())
}

fn ckobject_read(chunk: &mut Chunk, arena: &Arena) -> Result<ObjectState> {
    let mut data = ckobject_fields_read(chunk, arena)?;
    data.raw_tail = read_raw_tail(chunk)?;
    Ok(ObjectState::Object(data))
}

fn ckobject_write(state: &ObjectState, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    if let ObjectState::Object(d) = state {
        ckobject_fields_write(d, chunk, arena)?;
        write_raw_tail(chunk, &d.raw_tail)?;
    }
    Ok(())
}

fn noop_validate(_: &ObjectState) -> Result<()> {
    Ok(())
}

fn noop_finish(_: &mut ObjectState, _: &Arena, _: &ObjectRepository) -> Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------
// CKSceneObject
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CkSceneObjectData {
    pub base: CkObjectData,
    pub raw_tail: Vec<u8>,
}

fn ckscene_fields_read(chunk: &mut Chunk, arena: &Arena) -> Result<CkSceneObjectData> {
    let base = ckobject_fields_read(chunk, arena)?;
    Ok(CkSceneObjectData {
        base,
        raw_tail: Vec::new(),
    })
}

fn ckscene_fields_write(data: &CkSceneObjectData, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    ckobject_fields_write(&data.base, chunk, arena)
}

fn ckscene_read(chunk: &mut Chunk, arena: &Arena) -> Result<ObjectState> {
    let mut data = ckscene_fields_read(chunk, arena)?;
    data.raw_tail = read_raw_tail(chunk)?;
    Ok(ObjectState::SceneObject(data))
}

fn ckscene_write(state: &ObjectState, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    if let ObjectState::SceneObject(d) = state {
        ckscene_fields_write(d, chunk, arena)?;
        write_raw_tail(chunk, &d.raw_tail)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------
// CKBeObject
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CkBeObjectData {
    pub base: CkSceneObjectData,
    pub scripts: Vec<ObjectId>,
    pub datas: Vec<u8>,
    pub new_attributes: Vec<(u32, Option<ObjectId>)>,
    pub attributes: Vec<u32>,
    pub single_activity: Option<i32>,
    pub raw_tail: Vec<u8>,
}

fn ckbeobject_fields_read(chunk: &mut Chunk, arena: &Arena) -> Result<CkBeObjectData> {
    let base = ckscene_fields_read(chunk, arena)?;
    let mut data = CkBeObjectData {
        base,
        ..Default::default()
    };

    if chunk.seek_identifier(ID_SCRIPTS).is_ok() {
        data.scripts = chunk.read_object_id_array()?;
    }
    if chunk.seek_identifier(ID_DATAS).is_ok() {
        data.datas = chunk.read_buffer()?;
    }
    if chunk.seek_identifier(ID_NEWATTRIBUTES).is_ok() {
        let count = chunk.read_dword()? as usize;
        for _ in 0..count {
            let attr_type = chunk.read_dword()?;
            let has_param = chunk.read_dword()? != 0;
            let param = if has_param {
                Some(chunk.read_object_id()?)
            } else {
                None
            };
            data.new_attributes.push((attr_type, param));
        }
    }
    if chunk.seek_identifier(ID_ATTRIBUTES).is_ok() {
        data.attributes = chunk.read_dword_array()?;
    }
    if chunk.seek_identifier(ID_SINGLEACTIVITY).is_ok() {
        data.single_activity = Some(chunk.read_int()?);
    }
    Ok(data)
}

fn ckbeobject_fields_write(data: &CkBeObjectData, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    ckscene_fields_write(&data.base, chunk, arena)?;

    if !data.scripts.is_empty() {
        chunk.write_identifier(ID_SCRIPTS)?;
        chunk.write_object_id_array(&data.scripts)?;
    }
    if !data.datas.is_empty() {
        chunk.write_identifier(ID_DATAS)?;
        chunk.write_buffer(&data.datas)?;
    }
    if !data.new_attributes.is_empty() {
        chunk.write_identifier(ID_NEWATTRIBUTES)?;
        chunk.write_dword(data.new_attributes.len() as u32)?;
        for (attr_type, param) in &data.new_attributes {
            chunk.write_dword(*attr_type)?;
            chunk.write_dword(param.is_some() as u32)?;
            if let Some(p) = param {
                chunk.write_object_id(*p)?;
            }
        }
    }
    if !data.attributes.is_empty() {
        chunk.write_identifier(ID_ATTRIBUTES)?;
        chunk.write_dword_array(&data.attributes)?;
    }
    if let Some(activity) = data.single_activity {
        chunk.write_identifier(ID_SINGLEACTIVITY)?;
        chunk.write_int(activity)?;
    }
    Ok(())
}

fn ckbeobject_read(chunk: &mut Chunk, arena: &Arena) -> Result<ObjectState> {
    let mut data = ckbeobject_fields_read(chunk, arena)?;
    data.raw_tail = read_raw_tail(chunk)?;
    Ok(ObjectState::BeObject(data))
}

fn ckbeobject_write(state: &ObjectState, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    let ObjectState::BeObject(data) = state else {
        return Ok(());
    };
    ckbeobject_fields_write(data, chunk, arena)?;
    write_raw_tail(chunk, &data.raw_tail)
}

fn ckbeobject_finish_loading(
    state: &mut ObjectState,
    _arena: &Arena,
    repository: &ObjectRepository,
) -> Result<()> {
    if let ObjectState::BeObject(data) = state {
        data.scripts.retain(|id| repository.find_by_id(*id).is_some());
    }
    Ok(())
}

// ---------------------------------------------------------------------
// CKGroup
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CkGroupData {
    pub base: CkBeObjectData,
    pub members: Vec<ObjectId>,
    pub raw_tail: Vec<u8>,
}

fn ckgroup_read(chunk: &mut Chunk, arena: &Arena) -> Result<ObjectState> {
    let base = ckbeobject_fields_read(chunk, arena)?;
    let mut members = Vec::new();
    if chunk.seek_identifier(ID_GROUP_MEMBERS).is_ok() {
        members = chunk.read_object_id_array()?;
    }
    Ok(ObjectState::Group(CkGroupData {
        base,
        members,
        raw_tail: read_raw_tail(chunk)?,
    }))
}

fn ckgroup_write(state: &ObjectState, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    let ObjectState::Group(data) = state else {
        return Ok(());
    };
    ckbeobject_fields_write(&data.base, chunk, arena)?;
    if !data.members.is_empty() {
        chunk.write_identifier(ID_GROUP_MEMBERS)?;
        chunk.write_object_id_array(&data.members)?;
    }
    write_raw_tail(chunk, &data.raw_tail)
}

fn ckgroup_finish_loading(
    state: &mut ObjectState,
    arena: &Arena,
    repository: &ObjectRepository,
) -> Result<()> {
    if let ObjectState::Group(data) = state {
        data.members.retain(|id| repository.find_by_id(*id).is_some());
        let mut base_state = ObjectState::BeObject(std::mem::take(&mut data.base));
        ckbeobject_finish_loading(&mut base_state, arena, repository)?;
        if let ObjectState::BeObject(base) = base_state {
            data.base = base;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------
// CKParameter / CKParameterIn / CKParameterOut
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CkParameterData {
    pub base: CkBeObjectData,
    pub type_guid: Guid,
    pub value: Vec<u8>,
    pub raw_tail: Vec<u8>,
}

fn ckparameter_fields_read(chunk: &mut Chunk, arena: &Arena) -> Result<CkParameterData> {
    let base = ckbeobject_fields_read(chunk, arena)?;
    let mut type_guid = Guid::NULL;
    if chunk.seek_identifier(ID_PARAMETER_TYPE).is_ok() {
        type_guid = chunk.read_guid()?;
    }
    let mut value = Vec::new();
    if chunk.seek_identifier(ID_PARAMETER_VALUE).is_ok() {
        value = chunk.read_buffer()?;
    }
    Ok(CkParameterData {
        base,
        type_guid,
        value,
        raw_tail: Vec::new(),
    })
}

fn ckparameter_fields_write(data: &CkParameterData, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    ckbeobject_fields_write(&data.base, chunk, arena)?;
    chunk.write_identifier(ID_PARAMETER_TYPE)?;
    chunk.write_guid(data.type_guid)?;
    if !data.value.is_empty() {
        chunk.write_identifier(ID_PARAMETER_VALUE)?;
        chunk.write_buffer(&data.value)?;
    }
    Ok(())
}

fn ckparameter_read(chunk: &mut Chunk, arena: &Arena) -> Result<ObjectState> {
    let mut data = ckparameter_fields_read(chunk, arena)?;
    data.raw_tail = read_raw_tail(chunk)?;
    Ok(ObjectState::Parameter(data))
}

fn ckparameter_write(state: &ObjectState, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    let ObjectState::Parameter(data) = state else {
        return Ok(());
    };
    ckparameter_fields_write(data, chunk, arena)?;
    write_raw_tail(chunk, &data.raw_tail)
}

#[derive(Debug, Clone, Default)]
pub struct CkParameterInData {
    pub base: CkParameterData,
    pub source: Option<ObjectId>,
    pub raw_tail: Vec<u8>,
}

fn ckparameterin_read(chunk: &mut Chunk, arena: &Arena) -> Result<ObjectState> {
    let base = ckparameter_fields_read(chunk, arena)?;
    let mut source = None;
    if chunk.seek_identifier(ID_PARAMETER_SOURCE).is_ok() {
        let id = chunk.read_object_id()?;
        if !id.is_none() {
            source = Some(id);
        }
    }
    Ok(ObjectState::ParameterIn(CkParameterInData {
        base,
        source,
        raw_tail: read_raw_tail(chunk)?,
    }))
}

fn ckparameterin_write(state: &ObjectState, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    let ObjectState::ParameterIn(data) = state else {
        return Ok(());
    };
    ckparameter_fields_write(&data.base, chunk, arena)?;
    if let Some(source) = data.source {
        chunk.write_identifier(ID_PARAMETER_SOURCE)?;
        chunk.write_object_id(source)?;
    }
    write_raw_tail(chunk, &data.raw_tail)
}

fn ckparameterin_finish_loading(
    state: &mut ObjectState,
    _arena: &Arena,
    repository: &ObjectRepository,
) -> Result<()> {
    if let ObjectState::ParameterIn(data) = state {
        if let Some(source) = data.source {
            if repository.find_by_id(source).is_none() {
                data.source = None;
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct CkParameterOutData {
    pub base: CkParameterData,
    pub raw_tail: Vec<u8>,
}

fn ckparameterout_read(chunk: &mut Chunk, arena: &Arena) -> Result<ObjectState> {
    let base = ckparameter_fields_read(chunk, arena)?;
    Ok(ObjectState::ParameterOut(CkParameterOutData {
        base,
        raw_tail: read_raw_tail(chunk)?,
    }))
}

fn ckparameterout_write(state: &ObjectState, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    let ObjectState::ParameterOut(data) = state else {
        return Ok(());
    };
    ckparameter_fields_write(&data.base, chunk, arena)?;
    write_raw_tail(chunk, &data.raw_tail)
}

// ---------------------------------------------------------------------
// CK2dEntity / CK3dEntity
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Ck2dEntityData {
    pub base: CkBeObjectData,
    pub position: Vector2,
    pub size: Vector2,
    pub homogeneous: bool,
    pub raw_tail: Vec<u8>,
}

fn ck2dentity_read(chunk: &mut Chunk, arena: &Arena) -> Result<ObjectState> {
    let base = ckbeobject_fields_read(chunk, arena)?;
    let mut position = Vector2::default();
    let mut size = Vector2::default();
    let mut homogeneous = false;
    if chunk.seek_identifier(ID_2D_GEOMETRY).is_ok() {
        position = chunk.read_vector2()?;
        size = chunk.read_vector2()?;
        homogeneous = chunk.read_byte()? != 0;
    }
    Ok(ObjectState::Entity2d(Ck2dEntityData {
        base,
        position,
        size,
        homogeneous,
        raw_tail: read_raw_tail(chunk)?,
    }))
}

fn ck2dentity_write(state: &ObjectState, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    let ObjectState::Entity2d(data) = state else {
        return Ok(());
    };
    ckbeobject_fields_write(&data.base, chunk, arena)?;
    chunk.write_identifier(ID_2D_GEOMETRY)?;
    chunk.write_vector2(data.position)?;
    chunk.write_vector2(data.size)?;
    chunk.write_byte(data.homogeneous as u8)?;
    write_raw_tail(chunk, &data.raw_tail)
}

#[derive(Debug, Clone)]
pub struct Ck3dEntityData {
    pub base: CkBeObjectData,
    pub world_matrix: Matrix4,
    pub parent_3d: Option<ObjectId>,
    pub flags_3d: u32,
    pub raw_tail: Vec<u8>,
}

impl Default for Ck3dEntityData {
    fn default() -> Self {
        Ck3dEntityData {
            base: CkBeObjectData::default(),
            world_matrix: Matrix4::IDENTITY,
            parent_3d: None,
            flags_3d: 0,
            raw_tail: Vec::new(),
        }
    }
}

fn ck3dentity_fields_read(chunk: &mut Chunk, arena: &Arena) -> Result<Ck3dEntityData> {
    let base = ckbeobject_fields_read(chunk, arena)?;
    let mut world_matrix = Matrix4::IDENTITY;
    let mut parent_3d = None;
    let mut flags_3d = 0;
    if chunk.seek_identifier(ID_3D_TRANSFORM).is_ok() {
        world_matrix = chunk.read_matrix()?;
        let parent = chunk.read_object_id()?;
        if !parent.is_none() {
            parent_3d = Some(parent);
        }
        flags_3d = chunk.read_dword()?;
    }
    Ok(Ck3dEntityData {
        base,
        world_matrix,
        parent_3d,
        flags_3d,
        raw_tail: Vec::new(),
    })
}

fn ck3dentity_fields_write(data: &Ck3dEntityData, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    ckbeobject_fields_write(&data.base, chunk, arena)?;
    chunk.write_identifier(ID_3D_TRANSFORM)?;
    chunk.write_matrix(data.world_matrix)?;
    chunk.write_object_id(data.parent_3d.unwrap_or(ObjectId::NONE))?;
    chunk.write_dword(data.flags_3d)?;
    Ok(())
}

fn ck3dentity_read(chunk: &mut Chunk, arena: &Arena) -> Result<ObjectState> {
    let mut data = ck3dentity_fields_read(chunk, arena)?;
    data.raw_tail = read_raw_tail(chunk)?;
    Ok(ObjectState::Entity3d(data))
}

fn ck3dentity_write(state: &ObjectState, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    let ObjectState::Entity3d(data) = state else {
        return Ok(());
    };
    ck3dentity_fields_write(data, chunk, arena)?;
    write_raw_tail(chunk, &data.raw_tail)
}

fn ck3dentity_finish_loading(
    state: &mut ObjectState,
    _arena: &Arena,
    repository: &ObjectRepository,
) -> Result<()> {
    if let ObjectState::Entity3d(data) = state {
        if let Some(parent) = data.parent_3d {
            if repository.find_by_id(parent).is_none() {
                data.parent_3d = None;
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------
// CKMesh / CKTexture / CKMaterial
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CkMeshData {
    pub base: CkBeObjectData,
    pub vertex_count: u32,
    pub face_count: u32,
    pub materials: Vec<ObjectId>,
    pub geometry: Vec<u8>,
    pub raw_tail: Vec<u8>,
}

fn ckmesh_read(chunk: &mut Chunk, arena: &Arena) -> Result<ObjectState> {
    let base = ckbeobject_fields_read(chunk, arena)?;
    let mut vertex_count = 0;
    let mut face_count = 0;
    let mut materials = Vec::new();
    let mut geometry = Vec::new();
    if chunk.seek_identifier(ID_MESH_GEOMETRY).is_ok() {
        vertex_count = chunk.read_dword()?;
        face_count = chunk.read_dword()?;
        materials = chunk.read_object_id_array()?;
        geometry = chunk.read_buffer()?;
    }
    Ok(ObjectState::Mesh(CkMeshData {
        base,
        vertex_count,
        face_count,
        materials,
        geometry,
        raw_tail: read_raw_tail(chunk)?,
    }))
}

fn ckmesh_write(state: &ObjectState, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    let ObjectState::Mesh(data) = state else {
        return Ok(());
    };
    ckbeobject_fields_write(&data.base, chunk, arena)?;
    chunk.write_identifier(ID_MESH_GEOMETRY)?;
    chunk.write_dword(data.vertex_count)?;
    chunk.write_dword(data.face_count)?;
    chunk.write_object_id_array(&data.materials)?;
    chunk.write_buffer(&data.geometry)?;
    write_raw_tail(chunk, &data.raw_tail)
}

#[derive(Debug, Clone, Default)]
pub struct CkTextureData {
    pub base: CkBeObjectData,
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub image_bytes: Vec<u8>,
    pub raw_tail: Vec<u8>,
}

fn cktexture_read(chunk: &mut Chunk, arena: &Arena) -> Result<ObjectState> {
    let base = ckbeobject_fields_read(chunk, arena)?;
    let mut width = 0;
    let mut height = 0;
    let mut format = 0;
    let mut image_bytes = Vec::new();
    if chunk.seek_identifier(ID_TEXTURE_IMAGE).is_ok() {
        width = chunk.read_dword()?;
        height = chunk.read_dword()?;
        format = chunk.read_dword()?;
        image_bytes = chunk.read_buffer()?;
    }
    Ok(ObjectState::Texture(CkTextureData {
        base,
        width,
        height,
        format,
        image_bytes,
        raw_tail: read_raw_tail(chunk)?,
    }))
}

fn cktexture_write(state: &ObjectState, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    let ObjectState::Texture(data) = state else {
        return Ok(());
    };
    ckbeobject_fields_write(&data.base, chunk, arena)?;
    chunk.write_identifier(ID_TEXTURE_IMAGE)?;
    chunk.write_dword(data.width)?;
    chunk.write_dword(data.height)?;
    chunk.write_dword(data.format)?;
    chunk.write_buffer(&data.image_bytes)?;
    write_raw_tail(chunk, &data.raw_tail)
}

fn cktexture_validate(state: &ObjectState) -> Result<()> {
    if let ObjectState::Texture(data) = state {
        if data.width == 0 && !data.image_bytes.is_empty() {
            return Err(crate::error::NmoError::ValidationFailed(
                "texture has image bytes but zero width".into(),
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct CkMaterialData {
    pub base: CkBeObjectData,
    pub diffuse: Vector4,
    pub ambient: Vector4,
    pub specular: Vector4,
    pub emissive: Vector4,
    pub power: f32,
    pub texture: Option<ObjectId>,
    pub raw_tail: Vec<u8>,
}

impl Default for CkMaterialData {
    fn default() -> Self {
        let white = Vector4 {
            x: 1.0,
            y: 1.0,
            z: 1.0,
            w: 1.0,
        };
        CkMaterialData {
            base: CkBeObjectData::default(),
            diffuse: white,
            ambient: white,
            specular: white,
            emissive: Vector4 {
                x: 0.0,
                y: 0.0,
                z: 0.0,
                w: 0.0,
            },
            power: 0.0,
            texture: None,
            raw_tail: Vec::new(),
        }
    }
}

fn ckmaterial_read(chunk: &mut Chunk, arena: &Arena) -> Result<ObjectState> {
    let base = ckbeobject_fields_read(chunk, arena)?;
    let mut data = CkMaterialData {
        base,
        ..Default::default()
    };
    if chunk.seek_identifier(ID_MATERIAL_COLORS).is_ok() {
        data.diffuse = chunk.read_vector4()?;
        data.ambient = chunk.read_vector4()?;
        data.specular = chunk.read_vector4()?;
        data.emissive = chunk.read_vector4()?;
        data.power = chunk.read_float()?;
        let texture = chunk.read_object_id()?;
        if !texture.is_none() {
            data.texture = Some(texture);
        }
    }
    data.raw_tail = read_raw_tail(chunk)?;
    Ok(ObjectState::Material(data))
}

fn ckmaterial_write(state: &ObjectState, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    let ObjectState::Material(data) = state else {
        return Ok(());
    };
    ckbeobject_fields_write(&data.base, chunk, arena)?;
    chunk.write_identifier(ID_MATERIAL_COLORS)?;
    chunk.write_vector4(data.diffuse)?;
    chunk.write_vector4(data.ambient)?;
    chunk.write_vector4(data.specular)?;
    chunk.write_vector4(data.emissive)?;
    chunk.write_float(data.power)?;
    chunk.write_object_id(data.texture.unwrap_or(ObjectId::NONE))?;
    write_raw_tail(chunk, &data.raw_tail)
}

// ---------------------------------------------------------------------
// CKCamera / CKTargetCamera / CKLight
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CkCameraData {
    pub base: Ck3dEntityData,
    pub fov: f32,
    pub near_plane: f32,
    pub far_plane: f32,
    pub raw_tail: Vec<u8>,
}

impl Default for CkCameraData {
    fn default() -> Self {
        CkCameraData {
            base: Ck3dEntityData::default(),
            fov: 0.8,
            near_plane: 0.1,
            far_plane: 1000.0,
            raw_tail: Vec::new(),
        }
    }
}

fn ckcamera_fields_read(chunk: &mut Chunk, arena: &Arena) -> Result<CkCameraData> {
    let base = ck3dentity_fields_read(chunk, arena)?;
    let mut data = CkCameraData {
        base,
        ..Default::default()
    };
    if chunk.seek_identifier(ID_CAMERA_PARAMS).is_ok() {
        data.fov = chunk.read_float()?;
        data.near_plane = chunk.read_float()?;
        data.far_plane = chunk.read_float()?;
    }
    data.raw_tail = Vec::new();
    Ok(data)
}

fn ckcamera_fields_write(data: &CkCameraData, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    ck3dentity_fields_write(&data.base, chunk, arena)?;
    chunk.write_identifier(ID_CAMERA_PARAMS)?;
    chunk.write_float(data.fov)?;
    chunk.write_float(data.near_plane)?;
    chunk.write_float(data.far_plane)?;
    Ok(())
}

fn ckcamera_read(chunk: &mut Chunk, arena: &Arena) -> Result<ObjectState> {
    let mut data = ckcamera_fields_read(chunk, arena)?;
    data.raw_tail = read_raw_tail(chunk)?;
    Ok(ObjectState::Camera(data))
}

fn ckcamera_write(state: &ObjectState, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    let ObjectState::Camera(data) = state else {
        return Ok(());
    };
    ckcamera_fields_write(data, chunk, arena)?;
    write_raw_tail(chunk, &data.raw_tail)
}

#[derive(Debug, Clone, Default)]
pub struct CkTargetCameraData {
    pub base: CkCameraData,
    pub target: Option<ObjectId>,
    pub raw_tail: Vec<u8>,
}

fn cktargetcamera_read(chunk: &mut Chunk, arena: &Arena) -> Result<ObjectState> {
    let base = ckcamera_fields_read(chunk, arena)?;
    let mut target = None;
    if chunk.seek_identifier(ID_TARGET).is_ok() {
        let id = chunk.read_object_id()?;
        if !id.is_none() {
            target = Some(id);
        }
    }
    Ok(ObjectState::TargetCamera(CkTargetCameraData {
        base,
        target,
        raw_tail: read_raw_tail(chunk)?,
    }))
}

fn cktargetcamera_write(state: &ObjectState, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    let ObjectState::TargetCamera(data) = state else {
        return Ok(());
    };
    ckcamera_fields_write(&data.base, chunk, arena)?;
    if let Some(target) = data.target {
        chunk.write_identifier(ID_TARGET)?;
        chunk.write_object_id(target)?;
    }
    write_raw_tail(chunk, &data.raw_tail)
}

fn cktargetcamera_finish_loading(
    state: &mut ObjectState,
    _arena: &Arena,
    repository: &ObjectRepository,
) -> Result<()> {
    if let ObjectState::TargetCamera(data) = state {
        if let Some(target) = data.target {
            if repository.find_by_id(target).is_none() {
                data.target = None;
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct CkLightData {
    pub base: Ck3dEntityData,
    pub light_type: u32,
    pub color: Vector4,
    pub range: f32,
    pub raw_tail: Vec<u8>,
}

impl Default for CkLightData {
    fn default() -> Self {
        CkLightData {
            base: Ck3dEntityData::default(),
            light_type: 0,
            color: Vector4 {
                x: 1.0,
                y: 1.0,
                z: 1.0,
                w: 1.0,
            },
            range: 1000.0,
            raw_tail: Vec::new(),
        }
    }
}

fn cklight_read(chunk: &mut Chunk, arena: &Arena) -> Result<ObjectState> {
    let base = ck3dentity_fields_read(chunk, arena)?;
    let mut data = CkLightData {
        base,
        ..Default::default()
    };
    if chunk.seek_identifier(ID_LIGHT_PARAMS).is_ok() {
        data.light_type = chunk.read_dword()?;
        data.color = chunk.read_vector4()?;
        data.range = chunk.read_float()?;
    }
    data.raw_tail = read_raw_tail(chunk)?;
    Ok(ObjectState::Light(data))
}

fn cklight_write(state: &ObjectState, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    let ObjectState::Light(data) = state else {
        return Ok(());
    };
    ck3dentity_fields_write(&data.base, chunk, arena)?;
    chunk.write_identifier(ID_LIGHT_PARAMS)?;
    chunk.write_dword(data.light_type)?;
    chunk.write_vector4(data.color)?;
    chunk.write_float(data.range)?;
    write_raw_tail(chunk, &data.raw_tail)
}

// ---------------------------------------------------------------------
// CKSound
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CkSoundData {
    pub base: CkBeObjectData,
    pub file_name: Option<ArenaBytes>,
    pub volume: f32,
    pub raw_tail: Vec<u8>,
}

fn cksound_read(chunk: &mut Chunk, arena: &Arena) -> Result<ObjectState> {
    let base = ckbeobject_fields_read(chunk, arena)?;
    let mut file_name = None;
    let mut volume = 1.0;
    if chunk.seek_identifier(ID_SOUND_PARAMS).is_ok() {
        file_name = chunk.read_string(arena)?;
        volume = chunk.read_float()?;
    }
    Ok(ObjectState::Sound(CkSoundData {
        base,
        file_name,
        volume,
        raw_tail: read_raw_tail(chunk)?,
    }))
}

fn cksound_write(state: &ObjectState, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    let ObjectState::Sound(data) = state else {
        return Ok(());
    };
    ckbeobject_fields_write(&data.base, chunk, arena)?;
    chunk.write_identifier(ID_SOUND_PARAMS)?;
    let name_bytes = data.file_name.map(|h| arena.get(h).to_vec());
    let name_str = name_bytes
        .as_ref()
        .map(|b| String::from_utf8_lossy(b).into_owned());
    chunk.write_string(name_str.as_deref())?;
    chunk.write_float(data.volume)?;
    write_raw_tail(chunk, &data.raw_tail)
}

// ---------------------------------------------------------------------
// CKBehavior / CKBehaviorIO
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CkBehaviorData {
    pub base: CkBeObjectData,
    pub behavior_guid: Guid,
    pub inputs: Vec<ObjectId>,
    pub outputs: Vec<ObjectId>,
    pub sub_behaviors: Vec<ObjectId>,
    pub raw_tail: Vec<u8>,
}

fn ckbehavior_read(chunk: &mut Chunk, arena: &Arena) -> Result<ObjectState> {
    let base = ckbeobject_fields_read(chunk, arena)?;
    let mut data = CkBehaviorData {
        base,
        ..Default::default()
    };
    if chunk.seek_identifier(ID_BEHAVIOR_GRAPH).is_ok() {
        data.behavior_guid = chunk.read_guid()?;
        data.inputs = chunk.read_object_id_array()?;
        data.outputs = chunk.read_object_id_array()?;
        data.sub_behaviors = chunk.read_object_id_array()?;
    }
    data.raw_tail = read_raw_tail(chunk)?;
    Ok(ObjectState::Behavior(data))
}

fn ckbehavior_write(state: &ObjectState, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    let ObjectState::Behavior(data) = state else {
        return Ok(());
    };
    ckbeobject_fields_write(&data.base, chunk, arena)?;
    chunk.write_identifier(ID_BEHAVIOR_GRAPH)?;
    chunk.write_guid(data.behavior_guid)?;
    chunk.write_object_id_array(&data.inputs)?;
    chunk.write_object_id_array(&data.outputs)?;
    chunk.write_object_id_array(&data.sub_behaviors)?;
    write_raw_tail(chunk, &data.raw_tail)
}

fn ckbehavior_finish_loading(
    state: &mut ObjectState,
    _arena: &Arena,
    repository: &ObjectRepository,
) -> Result<()> {
    if let ObjectState::Behavior(data) = state {
        data.inputs.retain(|id| repository.find_by_id(*id).is_some());
        data.outputs.retain(|id| repository.find_by_id(*id).is_some());
        data.sub_behaviors.retain(|id| repository.find_by_id(*id).is_some());
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct CkBehaviorIoData {
    pub base: CkSceneObjectData,
    pub owner: Option<ObjectId>,
    pub io_type: u32,
    pub raw_tail: Vec<u8>,
}

fn ckbehaviorio_read(chunk: &mut Chunk, arena: &Arena) -> Result<ObjectState> {
    let base = ckscene_fields_read(chunk, arena)?;
    let mut owner = None;
    let mut io_type = 0;
    if chunk.seek_identifier(ID_BEHAVIOR_IO).is_ok() {
        let id = chunk.read_object_id()?;
        if !id.is_none() {
            owner = Some(id);
        }
        io_type = chunk.read_dword()?;
    }
    Ok(ObjectState::BehaviorIo(CkBehaviorIoData {
        base,
        owner,
        io_type,
        raw_tail: read_raw_tail(chunk)?,
    }))
}

fn ckbehaviorio_write(state: &ObjectState, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    let ObjectState::BehaviorIo(data) = state else {
        return Ok(());
    };
    ckscene_fields_write(&data.base, chunk, arena)?;
    chunk.write_identifier(ID_BEHAVIOR_IO)?;
    chunk.write_object_id(data.owner.unwrap_or(ObjectId::NONE))?;
    chunk.write_dword(data.io_type)?;
    write_raw_tail(chunk, &data.raw_tail)
}

// ---------------------------------------------------------------------
// Managers
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CkAttributeManagerData {
    pub categories: Vec<(Guid, u32)>,
    pub raw_tail: Vec<u8>,
}

fn ckattributemanager_read(chunk: &mut Chunk, _arena: &Arena) -> Result<ObjectState> {
    let count = chunk.read_dword()? as usize;
    let mut categories = Vec::with_capacity(count);
    for _ in 0..count {
        let guid = chunk.read_guid()?;
        let flags = chunk.read_dword()?;
        categories.push((guid, flags));
    }
    Ok(ObjectState::AttributeManager(CkAttributeManagerData {
        categories,
        raw_tail: read_raw_tail(chunk)?,
    }))
}

fn ckattributemanager_write(state: &ObjectState, chunk: &mut Chunk, _arena: &Arena) -> Result<()> {
    let ObjectState::AttributeManager(data) = state else {
        return Ok(());
    };
    chunk.write_dword(data.categories.len() as u32)?;
    for (guid, flags) in &data.categories {
        chunk.write_guid(*guid)?;
        chunk.write_dword(*flags)?;
    }
    write_raw_tail(chunk, &data.raw_tail)
}

#[derive(Debug, Clone, Default)]
pub struct CkBehaviorManagerData {
    pub prototypes: Vec<Guid>,
    pub raw_tail: Vec<u8>,
}

fn ckbehaviormanager_read(chunk: &mut Chunk, _arena: &Arena) -> Result<ObjectState> {
    let count = chunk.read_dword()? as usize;
    let mut prototypes = Vec::with_capacity(count);
    for _ in 0..count {
        prototypes.push(chunk.read_guid()?);
    }
    Ok(ObjectState::BehaviorManager(CkBehaviorManagerData {
        prototypes,
        raw_tail: read_raw_tail(chunk)?,
    }))
}

fn ckbehaviormanager_write(state: &ObjectState, chunk: &mut Chunk, _arena: &Arena) -> Result<()> {
    let ObjectState::BehaviorManager(data) = state else {
        return Ok(());
    };
    chunk.write_dword(data.prototypes.len() as u32)?;
    for guid in &data.prototypes {
        chunk.write_guid(*guid)?;
    }
    write_raw_tail(chunk, &data.raw_tail)
}

#[derive(Debug, Clone, Default)]
pub struct CkParameterManagerData {
    pub types: Vec<(Guid, ArenaBytes)>,
    pub raw_tail: Vec<u8>,
}

fn ckparametermanager_read(chunk: &mut Chunk, arena: &Arena) -> Result<ObjectState> {
    let count = chunk.read_dword()? as usize;
    let mut types = Vec::with_capacity(count);
    for _ in 0..count {
        let guid = chunk.read_guid()?;
        let name = chunk.read_string(arena)?.unwrap_or(ArenaBytes::EMPTY);
        types.push((guid, name));
    }
    Ok(ObjectState::ParameterManager(CkParameterManagerData {
        types,
        raw_tail: read_raw_tail(chunk)?,
    }))
}

fn ckparametermanager_write(state: &ObjectState, chunk: &mut Chunk, arena: &Arena) -> Result<()> {
    let ObjectState::ParameterManager(data) = state else {
        return Ok(());
    };
    chunk.write_dword(data.types.len() as u32)?;
    for (guid, name) in &data.types {
        chunk.write_guid(*guid)?;
        let bytes = arena.get(*name).to_vec();
        let s = String::from_utf8_lossy(&bytes).into_owned();
        chunk.write_string(Some(&s))?;
    }
    write_raw_tail(chunk, &data.raw_tail)
}

// ---------------------------------------------------------------------
// Sum type over all decoded class states
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub enum ObjectState {
    #[default]
    Unknown,
    Object(CkObjectData),
    SceneObject(CkSceneObjectData),
    BeObject(CkBeObjectData),
    Group(CkGroupData),
    Parameter(CkParameterData),
    ParameterIn(CkParameterInData),
    ParameterOut(CkParameterOutData),
    Entity2d(Ck2dEntityData),
    Entity3d(Ck3dEntityData),
    Mesh(CkMeshData),
    Texture(CkTextureData),
    Material(CkMaterialData),
    Camera(CkCameraData),
    TargetCamera(CkTargetCameraData),
    Light(CkLightData),
    Sound(CkSoundData),
    Behavior(CkBehaviorData),
    BehaviorIo(CkBehaviorIoData),
    AttributeManager(CkAttributeManagerData),
    BehaviorManager(CkBehaviorManagerData),
    ParameterManager(CkParameterManagerData),
    /// Fallback for class ids the registry has no descriptor for: the
    /// whole chunk buffer, preserved verbatim for round-trip.
    RawTail(Vec<u8>),
}

fn unknown_read(chunk: &mut Chunk, _arena: &Arena) -> Result<ObjectState> {
    Ok(ObjectState::RawTail(read_raw_tail(chunk)?))
}

fn unknown_write(state: &ObjectState, chunk: &mut Chunk, _arena: &Arena) -> Result<()> {
    if let ObjectState::RawTail(bytes) = state {
        write_raw_tail(chunk, bytes)?;
    }
    Ok(())
}

/// Builds a registry with every class body named in §4.H registered, plus
/// an implicit raw-tail fallback the load pipeline uses for unrecognized
/// class ids (not registered here — callers detect "no descriptor" and use
/// [`unknown_read`]/[`unknown_write`] directly).
pub fn build_registry() -> SchemaRegistry {
    let mut reg = SchemaRegistry::new(ids::CKBEOBJECT);

    macro_rules! register {
        ($id:expr, $name:expr, $guid:expr, $parent:expr, $read:expr, $write:expr, $validate:expr, $finish:expr) => {
            reg.register(ClassDescriptor {
                class_id: $id,
                name: $name,
                guid: $guid,
                parent: $parent,
                fields: Vec::new(),
                struct_size: None,
                read: $read,
                write: $write,
                validate: $validate,
                finish_loading: $finish,
            })
            .expect("static class registration cannot conflict");
        };
    }

    register!(
        ids::CKOBJECT,
        "CKObject",
        Guid::new(1, 0),
        None,
        ckobject_read,
        ckobject_write,
        noop_validate,
        noop_finish
    );
    register!(
        ids::CKSCENEOBJECT,
        "CKSceneObject",
        Guid::new(2, 0),
        Some(ids::CKOBJECT),
        ckscene_read,
        ckscene_write,
        noop_validate,
        noop_finish
    );
    register!(
        ids::CKBEOBJECT,
        "CKBeObject",
        Guid::new(3, 0),
        Some(ids::CKSCENEOBJECT),
        ckbeobject_read,
        ckbeobject_write,
        noop_validate,
        ckbeobject_finish_loading
    );
    register!(
        ids::CKGROUP,
        "CKGroup",
        Guid::new(4, 0),
        Some(ids::CKBEOBJECT),
        ckgroup_read,
        ckgroup_write,
        noop_validate,
        ckgroup_finish_loading
    );
    register!(
        ids::CKPARAMETER,
        "CKParameter",
        Guid::new(5, 0),
        Some(ids::CKBEOBJECT),
        ckparameter_read,
        ckparameter_write,
        noop_validate,
        noop_finish
    );
    register!(
        ids::CKPARAMETERIN,
        "CKParameterIn",
        Guid::new(6, 0),
        Some(ids::CKPARAMETER),
        ckparameterin_read,
        ckparameterin_write,
        noop_validate,
        ckparameterin_finish_loading
    );
    register!(
        ids::CKPARAMETEROUT,
        "CKParameterOut",
        Guid::new(7, 0),
        Some(ids::CKPARAMETER),
        ckparameterout_read,
        ckparameterout_write,
        noop_validate,
        noop_finish
    );
    register!(
        ids::CK2DENTITY,
        "CK2dEntity",
        Guid::new(8, 0),
        Some(ids::CKBEOBJECT),
        ck2dentity_read,
        ck2dentity_write,
        noop_validate,
        noop_finish
    );
    register!(
        ids::CK3DENTITY,
        "CK3dEntity",
        Guid::new(9, 0),
        Some(ids::CKBEOBJECT),
        ck3dentity_read,
        ck3dentity_write,
        noop_validate,
        ck3dentity_finish_loading
    );
    register!(
        ids::CKMESH,
        "CKMesh",
        Guid::new(10, 0),
        Some(ids::CKBEOBJECT),
        ckmesh_read,
        ckmesh_write,
        noop_validate,
        noop_finish
    );
    register!(
        ids::CKTEXTURE,
        "CKTexture",
        Guid::new(11, 0),
        Some(ids::CKBEOBJECT),
        cktexture_read,
        cktexture_write,
        cktexture_validate,
        noop_finish
    );
    register!(
        ids::CKMATERIAL,
        "CKMaterial",
        Guid::new(12, 0),
        Some(ids::CKBEOBJECT),
        ckmaterial_read,
        ckmaterial_write,
        noop_validate,
        noop_finish
    );
    register!(
        ids::CKCAMERA,
        "CKCamera",
        Guid::new(13, 0),
        Some(ids::CK3DENTITY),
        ckcamera_read,
        ckcamera_write,
        noop_validate,
        noop_finish
    );
    register!(
        ids::CKTARGETCAMERA,
        "CKTargetCamera",
        Guid::new(14, 0),
        Some(ids::CKCAMERA),
        cktargetcamera_read,
        cktargetcamera_write,
        noop_validate,
        cktargetcamera_finish_loading
    );
    register!(
        ids::CKLIGHT,
        "CKLight",
        Guid::new(15, 0),
        Some(ids::CK3DENTITY),
        cklight_read,
        cklight_write,
        noop_validate,
        noop_finish
    );
    register!(
        ids::CKSOUND,
        "CKSound",
        Guid::new(16, 0),
        Some(ids::CKBEOBJECT),
        cksound_read,
        cksound_write,
        noop_validate,
        noop_finish
    );
    register!(
        ids::CKBEHAVIOR,
        "CKBehavior",
        Guid::new(17, 0),
        Some(ids::CKBEOBJECT),
        ckbehavior_read,
        ckbehavior_write,
        noop_validate,
        ckbehavior_finish_loading
    );
    register!(
        ids::CKBEHAVIORIO,
        "CKBehaviorIO",
        Guid::new(18, 0),
        Some(ids::CKSCENEOBJECT),
        ckbehaviorio_read,
        ckbehaviorio_write,
        noop_validate,
        noop_finish
    );
    register!(
        ids::CKATTRIBUTEMANAGER,
        "CKAttributeManager",
        Guid::new(100, 0),
        None,
        ckattributemanager_read,
        ckattributemanager_write,
        noop_validate,
        noop_finish
    );
    register!(
        ids::CKBEHAVIORMANAGER,
        "CKBehaviorManager",
        Guid::new(101, 0),
        None,
        ckbehaviormanager_read,
        ckbehaviormanager_write,
        noop_validate,
        noop_finish
    );
    register!(
        ids::CKPARAMETERMANAGER,
        "CKParameterManager",
        Guid::new(102, 0),
        None,
        ckparametermanager_read,
        ckparametermanager_write,
        noop_validate,
        noop_finish
    );

    reg
}

/// Reads an object's state using the registry when a descriptor exists,
/// falling back to verbatim raw-tail preservation otherwise (§4.H).
pub fn dispatch_read(
    registry: &SchemaRegistry,
    class_id: ClassId,
    chunk: &mut Chunk,
    arena: &Arena,
) -> Result<ObjectState> {
    match registry.find_by_class_id(class_id) {
        Some(descriptor) => (descriptor.read)(chunk, arena),
        None => unknown_read(chunk, arena),
    }
}

pub fn dispatch_write(
    registry: &SchemaRegistry,
    class_id: ClassId,
    state: &ObjectState,
    chunk: &mut Chunk,
    arena: &Arena,
) -> Result<()> {
    match registry.find_by_class_id(class_id) {
        Some(descriptor) => (descriptor.write)(state, chunk, arena),
        None => unknown_write(state, chunk, arena),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;

    #[test]
    fn registry_has_all_named_classes() {
        let reg = build_registry();
        for id in [
            ids::CKOBJECT,
            ids::CKSCENEOBJECT,
            ids::CKBEOBJECT,
            ids::CKGROUP,
            ids::CKPARAMETER,
            ids::CKPARAMETERIN,
            ids::CKPARAMETEROUT,
            ids::CK2DENTITY,
            ids::CK3DENTITY,
            ids::CKMESH,
            ids::CKTEXTURE,
            ids::CKMATERIAL,
            ids::CKCAMERA,
            ids::CKTARGETCAMERA,
            ids::CKLIGHT,
            ids::CKSOUND,
            ids::CKBEHAVIOR,
            ids::CKBEHAVIORIO,
            ids::CKATTRIBUTEMANAGER,
            ids::CKBEHAVIORMANAGER,
            ids::CKPARAMETERMANAGER,
        ] {
            assert!(reg.find_by_class_id(id).is_some(), "{id:?} missing");
        }
        assert!(reg.validate().is_ok());
    }

    #[test]
    fn beobject_roundtrip_via_dispatch() {
        let reg = build_registry();
        let arena = Arena::new();
        let mut data = CkBeObjectData::default();
        data.scripts = vec![ObjectId(2), ObjectId(3)];
        data.attributes = vec![7, 8];
        data.single_activity = Some(-1);
        let state = ObjectState::BeObject(data);

        let mut chunk = Chunk::new(ids::CKBEOBJECT, 1);
        chunk.start_write().unwrap();
        dispatch_write(&reg, ids::CKBEOBJECT, &state, &mut chunk, &arena).unwrap();
        chunk.close().unwrap();
        chunk.start_read().unwrap();

        let back = dispatch_read(&reg, ids::CKBEOBJECT, &mut chunk, &arena).unwrap();
        match back {
            ObjectState::BeObject(d) => {
                assert_eq!(d.scripts, vec![ObjectId(2), ObjectId(3)]);
                assert_eq!(d.attributes, vec![7, 8]);
                assert_eq!(d.single_activity, Some(-1));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_class_falls_back_to_raw_tail() {
        let reg = build_registry();
        let arena = Arena::new();
        let mut chunk = Chunk::new(ClassId(9999), 1);
        chunk.start_write().unwrap();
        chunk.write_dword(0xABCD).unwrap();
        chunk.close().unwrap();
        chunk.start_read().unwrap();
        let state = dispatch_read(&reg, ClassId(9999), &mut chunk, &arena).unwrap();
        assert!(matches!(state, ObjectState::RawTail(_)));
    }

    #[test]
    fn group_finish_loading_drops_dangling_members() {
        let arena = Arena::new();
        let repo = ObjectRepository::new();
        let data = CkGroupData {
            members: vec![ObjectId(42)],
            ..Default::default()
        };
        let mut state = ObjectState::Group(data);
        ckgroup_finish_loading(&mut state, &arena, &repo).unwrap();
        if let ObjectState::Group(d) = state {
            assert!(d.members.is_empty());
        } else {
            panic!("wrong variant");
        }
    }
}
