//! Save pipeline: the inverse of load, dehydrating a populated [`Session`]
//! back into on-disk bytes.
//!
//! Grounded in the teacher's `write_bundled` two-pass layout (pre-pass
//! computes offsets, second pass writes, a final pass patches) generalized
//! into the eight steps of §4.K. Writes to a sibling temp file and renames
//! over the destination on success, so a failed save never disturbs an
//! existing file at `path`.

use crate::chunk::{self, Chunk};
use crate::classes;
use crate::error::{NmoError, Result};
use crate::header::{self, FileHeader, Header1, ObjectDescriptor, COMPRESS_DATA, INCLUDE_REFERENCES};
use crate::log::{debug_span, info};
use crate::remap::IdRemap;
use crate::session::Session;
use crate::types::ObjectId;
use std::path::{Path, PathBuf};

/// Compress the data section, each object chunk, and the Header1 region
/// with deflate.
pub const COMPRESS: u32 = 0x1;
/// Run each class descriptor's `validate` before serializing it.
pub const VALIDATE: u32 = 0x2;

const COMPRESSION_LEVEL: i32 = 6;
const MIN_COMPRESSION_RATIO: f64 = 0.95;
/// This writer's self-reported engine version; arbitrary but stable, since
/// nothing in this crate interprets it on load.
const CK_VERSION: u32 = 0x0D0C_0000;

/// Writes `session`'s current object graph to `path`, replacing whatever
/// was there atomically (temp file + rename).
///
/// Errors are wrapped with [`NmoError::in_phase`] naming the pipeline step
/// that produced them.
pub fn save_file(session: &mut Session, path: &Path, flags: u32) -> Result<()> {
    let _span = debug_span!("save_file", path = %path.display()).entered();

    // Step 1: assign file indices (runtime -> file table).
    let remap = assign_file_indices(session);

    // Step 2: serialize each object into a fresh chunk.
    serialize_objects(session, flags).map_err(|e| e.in_phase("serialize_objects"))?;

    // Step 3: remap object ids in every chunk, runtime -> file.
    remap_object_chunks(session, &remap).map_err(|e| e.in_phase("remap_object_ids"))?;

    // Step 4: managers' save hooks. As in the load pipeline, manager state
    // is carried as ordinary objects of the manager classes, not a separate
    // wire section, so there are no extra manager chunks to collect here.

    // Step 5: compress chunks that benefit from it.
    if COMPRESS & flags != 0 {
        compress_object_chunks(session).map_err(|e| e.in_phase("compress_chunks"))?;
    }

    // Step 6+7: build Header1 and concatenate the data section.
    let (header1, data_section) =
        build_header1_and_data(session, &remap).map_err(|e| e.in_phase("build_header1"))?;

    // Step 8: frame and write the file.
    write_framed_file(path, flags, &header1, &data_section).map_err(|e| e.in_phase("write_file"))?;

    info!(objects = session.get_object_repository().count(), "save complete");
    Ok(())
}

fn assign_file_indices(session: &Session) -> IdRemap {
    let mut ids: Vec<ObjectId> = session
        .get_object_repository()
        .get_all()
        .map(|o| o.id)
        .collect();
    ids.sort_by_key(|id| id.0);

    let mut remap = IdRemap::new();
    for (file_index, runtime_id) in ids.into_iter().enumerate() {
        remap.record(ObjectId(file_index as u32 + 1), runtime_id);
    }
    remap
}

fn serialize_objects(session: &mut Session, flags: u32) -> Result<()> {
    let schema = session.context().schema_handle();
    let ids: Vec<ObjectId> = session
        .get_object_repository()
        .get_all()
        .map(|o| o.id)
        .collect();

    for id in ids {
        let class_id = {
            let object = session
                .get_object_repository()
                .find_by_id(id)
                .ok_or_else(|| NmoError::InvalidState(format!("object {id:?} vanished")))?;
            if VALIDATE & flags != 0 {
                if let Some(descriptor) = schema.find_by_class_id(object.class_id) {
                    (descriptor.validate)(&object.state)?;
                }
            }
            object.class_id
        };

        // Reuse the data version the object was last loaded with, so a
        // round-tripped file keeps the same per-class schema revision.
        let data_version = session
            .get_object_repository()
            .find_by_id(id)
            .and_then(|o| o.chunk.as_ref())
            .map(|c| c.data_version)
            .unwrap_or(0);

        let mut new_chunk = Chunk::new(class_id, data_version);
        new_chunk.start_write()?;
        {
            let object = session
                .get_object_repository()
                .find_by_id(id)
                .ok_or_else(|| NmoError::InvalidState(format!("object {id:?} vanished")))?;
            classes::dispatch_write(&schema, class_id, &object.state, &mut new_chunk, session.arena())?;
        }
        new_chunk.close()?;

        if let Some(object) = session.get_object_repository_mut().find_by_id_mut(id) {
            object.chunk = Some(new_chunk);
        }
    }
    Ok(())
}

fn remap_object_chunks(session: &mut Session, remap: &IdRemap) -> Result<()> {
    let ids: Vec<ObjectId> = session
        .get_object_repository()
        .get_all()
        .map(|o| o.id)
        .collect();
    for id in ids {
        if let Some(object) = session.get_object_repository_mut().find_by_id_mut(id) {
            if let Some(chunk) = object.chunk.as_mut() {
                remap.apply_save(chunk)?;
            }
        }
    }
    Ok(())
}

fn compress_object_chunks(session: &mut Session) -> Result<()> {
    let ids: Vec<ObjectId> = session
        .get_object_repository()
        .get_all()
        .map(|o| o.id)
        .collect();
    for id in ids {
        if let Some(object) = session.get_object_repository_mut().find_by_id_mut(id) {
            if let Some(chunk) = object.chunk.as_mut() {
                chunk.compress_if_beneficial(COMPRESSION_LEVEL, MIN_COMPRESSION_RATIO)?;
            }
        }
    }
    Ok(())
}

fn build_header1_and_data(session: &Session, remap: &IdRemap) -> Result<(Header1, Vec<u8>)> {
    let mut ids: Vec<ObjectId> = session
        .get_object_repository()
        .get_all()
        .map(|o| o.id)
        .collect();
    ids.sort_by_key(|id| remap.to_file(*id).map(|f| f.0).unwrap_or(u32::MAX));

    let mut data = Vec::new();
    let mut descriptors = Vec::with_capacity(ids.len());
    for id in ids {
        let object = session
            .get_object_repository()
            .find_by_id(id)
            .ok_or_else(|| NmoError::InvalidState(format!("object {id:?} vanished")))?;
        let chunk = object.chunk.as_ref().ok_or_else(|| {
            NmoError::InvalidState(format!("object {id:?} has no serialized chunk"))
        })?;
        let file_index = remap.to_file(id).ok_or_else(|| {
            NmoError::InvalidState(format!("object {id:?} was never assigned a file index"))
        })?;
        let name = object
            .name
            .map(|handle| String::from_utf8_lossy(&session.arena().get(handle)).into_owned());

        let bytes = chunk.to_bytes();
        let chunk_offset = data.len() as u32;
        let chunk_size = bytes.len() as u32;
        data.extend_from_slice(&bytes);

        descriptors.push(ObjectDescriptor {
            file_index: file_index.0,
            class_id: object.class_id,
            name,
            chunk_offset,
            chunk_size,
        });
    }

    let header1 = Header1 {
        plugin_category_count: 0,
        included_file_count: 0,
        descriptors,
    };
    Ok((header1, data))
}

/// Frames a complete file from an already-built `Header1` and data section
/// and writes it atomically. Shared with [`crate::stream::StreamWriter`],
/// whose `finish` assembles the same two regions incrementally instead of
/// from a `Session`'s repository.
pub(crate) fn write_framed_file(
    path: &Path,
    flags: u32,
    header1: &Header1,
    data_section: &[u8],
) -> Result<()> {
    let compress = COMPRESS & flags != 0;

    let (data_packed, data_unpacked_size) = if compress {
        let (packed, _crc) = header::pack_region(data_section, COMPRESSION_LEVEL)?;
        (packed, data_section.len() as u32)
    } else {
        (data_section.to_vec(), data_section.len() as u32)
    };

    let header1_bytes = header1.to_bytes();
    let (hdr1_packed, hdr1_crc) = if compress {
        header::pack_region(&header1_bytes, COMPRESSION_LEVEL)?
    } else {
        let crc = chunk::adler32(&header1_bytes, 1);
        (header1_bytes.clone(), crc)
    };

    let mut file_write_mode = INCLUDE_REFERENCES;
    if compress {
        file_write_mode |= COMPRESS_DATA;
    }

    let file_header = FileHeader {
        ck_version: CK_VERSION,
        file_version: header::MAX_FILE_VERSION,
        file_write_mode,
        manager_count: 0,
        object_count: header1.descriptors.len() as u32,
        max_id_saved: header1.descriptors.len() as u32,
        hdr1_crc,
        hdr1_packed_size: hdr1_packed.len() as u32,
        hdr1_unpacked_size: header1_bytes.len() as u32,
        data_packed_size: data_packed.len() as u32,
        data_unpacked_size,
    };

    let mut out = file_header.to_bytes();
    out.extend_from_slice(&hdr1_packed);
    out.extend_from_slice(&data_packed);

    write_atomically(path, &out)
}

/// Writes `bytes` to a sibling temp path and renames it over `path`, so a
/// process killed mid-write (or an error from `fs::write`) never leaves a
/// half-written file at the destination.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = sibling_temp_path(path);
    std::fs::write(&tmp_path, bytes).map_err(NmoError::from)?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        NmoError::from(e)
    })
}

fn sibling_temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!(".{file_name}.nmo-tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::ids;
    use crate::load;
    use crate::object::Object;
    use crate::session::{Context, ContextOptions};

    fn new_session() -> Session {
        let ctx = Context::new(ContextOptions::default());
        Session::new(&ctx)
    }

    #[test]
    fn save_then_load_round_trips_object_count() {
        let mut session = new_session();
        for _ in 0..3 {
            let object = Object::new(ObjectId::NONE, ids::CKSCENEOBJECT);
            let (repository, arena) = session.repository_and_arena_mut();
            repository.add(object, arena).unwrap();
        }

        let dir = std::env::temp_dir();
        let path = dir.join(format!("nmo-save-test-{}.nmo", std::process::id()));
        save_file(&mut session, &path, COMPRESS | VALIDATE).unwrap();

        let mut reloaded = new_session();
        load::load_file(&mut reloaded, &path, 0).unwrap();
        assert_eq!(reloaded.get_object_repository().count(), 3);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn save_rejects_no_destination_directory() {
        let mut session = new_session();
        let object = Object::new(ObjectId::NONE, ids::CKSCENEOBJECT);
        let (repository, arena) = session.repository_and_arena_mut();
        repository.add(object, arena).unwrap();

        let bogus = Path::new("/nonexistent-directory-for-nmo-tests/out.nmo");
        assert!(save_file(&mut session, bogus, 0).is_err());
    }

    #[test]
    fn sibling_temp_path_is_hidden_and_namespaced() {
        let p = sibling_temp_path(Path::new("/tmp/scene.nmo"));
        assert_eq!(p, Path::new("/tmp/.scene.nmo.nmo-tmp"));
    }
}
