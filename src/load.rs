//! Load pipeline: turns a byte stream into a populated [`Session`].
//!
//! Grounded in the teacher's `IffDocument::read` two-pass structure (parse a
//! directory, then stream payloads against it) generalized into the fifteen
//! phases of §4.J: fixed header, compressed Header1 directory, compressed
//! data section, per-object chunk parse, ID remap, class-hierarchy-ordered
//! deserialize, then `finish_loading`.

use crate::chunk::Chunk;
use crate::classes;
use crate::error::{NmoError, Result};
use crate::header::{self, FileHeader, Header1, ObjectDescriptor};
use crate::log::{debug, debug_span, info};
use crate::object::Object;
use crate::repository::{GuidLookup, INDEX_CLASS, INDEX_GUID, INDEX_NAME};
use crate::session::{PluginDiagnostic, PluginStatus, Session};
use crate::types::{ClassId, Guid, ObjectId};
use flate2::read::ZlibDecoder;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

/// Run CKERROR checks the caller would otherwise have to do by hand after
/// loading (dangling references, texture dimensions, ...).
pub const VALIDATE: u32 = 0x1;
/// Host UI hint; this headless pipeline never shows dialogs and treats it
/// as a no-op, accepted only so callers porting flag bitsets compile.
pub const DO_DIALOG: u32 = 0x2;
/// Host UI hint; no-op for the same reason as [`DO_DIALOG`].
pub const AUTOMATIC_MODE: u32 = 0x4;
/// Warn (rather than silently proceed) when two objects share a name.
pub const CHECK_DUPLICATES: u32 = 0x8;
/// Reserved for hosts that want loaded objects flagged transient; currently
/// a no-op, kept so the flag bit is stable for future use.
pub const AS_DYNAMIC_OBJECT: u32 = 0x10;
/// After `finish_loading`, drop every object that is not a behavior or
/// behavior I/O from the repository.
pub const ONLY_BEHAVIORS: u32 = 0x20;
/// Report (rather than skip) the plugin-dependency check of phase 6.
pub const CHECK_DEPENDENCIES: u32 = 0x40;
/// Skip building the name/class/GUID secondary indexes (phase 10).
pub const SKIP_INDEX_BUILD: u32 = 0x80;

/// Reads `path` into `session`, replacing whatever it held before.
///
/// Errors are wrapped with [`NmoError::in_phase`] naming the pipeline phase
/// that produced them, so callers can tell a truncated file apart from a
/// CRC mismatch or a version it does not support.
pub fn load_file(session: &mut Session, path: &Path, flags: u32) -> Result<()> {
    let _span = debug_span!("load_file", path = %path.display()).entered();

    // Built in a scratch session so a failure at any phase below leaves
    // `session` exactly as the caller found it; only a fully successful
    // pipeline is adopted into `session` at the end.
    let mut scratch = session.scratch();

    // Phase 1: open and buffer the input stream.
    let bytes = std::fs::read(path)
        .map_err(NmoError::from)
        .map_err(|e| e.in_phase("open_input"))?;

    // Phase 2: parse the fixed file header.
    let (file_header, rest) =
        FileHeader::parse(&bytes).map_err(|e| e.in_phase("parse_file_header"))?;
    check_cancelled(&scratch, "parse_file_header")?;

    // Phase 3+4: read, decompress and verify Header1, then parse its table.
    let header1 = read_header1(&file_header, rest).map_err(|e| e.in_phase("parse_header1"))?;
    info!(
        objects = header1.descriptors.len(),
        managers = file_header.manager_count,
        "parsed header1"
    );
    check_cancelled(&scratch, "parse_header1")?;

    if CHECK_DUPLICATES & flags != 0 {
        warn_on_duplicate_names(&mut scratch, &header1);
    }

    // Phase 6: plugin dependency check (reported only; no DLL is loaded).
    if CHECK_DEPENDENCIES & flags != 0 {
        check_plugin_dependencies(&mut scratch, &header1);
    }
    check_cancelled(&scratch, "check_plugin_dependencies")?;

    // Phase 7: manager pre_load hooks. This implementation has no plugin
    // manager registry, so there is nothing to call; managers participate
    // only through their own class bodies (phase 14).
    debug!("no manager registry; skipping pre_load hooks");

    // Phase 8: read and decompress the data section.
    let hdr1_region_len = file_header.hdr1_packed_size as usize;
    if hdr1_region_len > rest.len() {
        return Err(
            NmoError::InvalidFormat("hdr1_packed_size exceeds remaining bytes".into())
                .in_phase("read_data_section"),
        );
    }
    let data_region = &rest[hdr1_region_len..];
    let data_bytes = read_data_section(&file_header, data_region)
        .map_err(|e| e.in_phase("read_data_section"))?;
    check_cancelled(&scratch, "read_data_section")?;

    // Phase 9: manager chunks. Manager state in this implementation is
    // carried as ordinary objects of the manager classes (§4.H), not a
    // separate wire section, so there is nothing extra to parse here.

    // Phase 10: create object shells and register file_index -> runtime_id.
    create_object_shells(&mut scratch, &header1)?;
    check_cancelled(&scratch, "create_object_shells")?;

    // Phase 11: parse each object's chunk from the data section.
    attach_object_chunks(&mut scratch, &header1, &data_bytes)
        .map_err(|e| e.in_phase("parse_object_chunks"))?;
    check_cancelled(&scratch, "parse_object_chunks")?;

    // Phase 12 is folded into phase 10: the remap table is built
    // incrementally as each shell is created, via `IdRemap::record`.

    // Phase 13: rewrite every object chunk's embedded ids using the remap.
    remap_object_chunks(&mut scratch).map_err(|e| e.in_phase("remap_object_ids"))?;
    check_cancelled(&scratch, "remap_object_ids")?;

    // Phase 14: deserialize in class-hierarchy topological order.
    let order = topological_order(&scratch);
    deserialize_objects(&mut scratch, &order, flags)
        .map_err(|e| e.in_phase("deserialize_objects"))?;
    check_cancelled(&scratch, "deserialize_objects")?;

    // Phase 15: finish_loading, then manager post_load hooks (none to run).
    run_finish_loading(&mut scratch, &order).map_err(|e| e.in_phase("finish_loading"))?;

    if ONLY_BEHAVIORS & flags != 0 {
        drop_non_behavior_objects(&mut scratch);
    }
    if SKIP_INDEX_BUILD & flags == 0 {
        build_default_indexes(&mut scratch).map_err(|e| e.in_phase("build_indexes"))?;
    }

    info!(objects = scratch.get_object_repository().count(), "load complete");
    session.adopt(scratch);
    Ok(())
}

fn check_cancelled(session: &Session, phase: &'static str) -> Result<()> {
    if session.cancellation_token().is_cancelled() {
        return Err(NmoError::InvalidState("load cancelled".into()).in_phase(phase));
    }
    Ok(())
}

fn read_header1(file_header: &FileHeader, rest: &[u8]) -> Result<Header1> {
    let region_len = file_header.hdr1_packed_size as usize;
    if region_len > rest.len() {
        return Err(NmoError::InvalidFormat(
            "hdr1_packed_size exceeds remaining bytes".into(),
        ));
    }
    let region = &rest[..region_len];
    let decompressed = if file_header.compress_data() {
        header::unpack_region(
            region,
            file_header.hdr1_unpacked_size as usize,
            file_header.hdr1_crc,
        )?
    } else {
        let actual = crate::chunk::adler32(region, 1);
        if actual != file_header.hdr1_crc {
            return Err(NmoError::ValidationFailed(format!(
                "header1 CRC mismatch: header says {:#010X}, computed {:#010X}",
                file_header.hdr1_crc, actual
            )));
        }
        region.to_vec()
    };
    Header1::from_bytes(&decompressed)
}

fn read_data_section(file_header: &FileHeader, region: &[u8]) -> Result<Vec<u8>> {
    let region_len = file_header.data_packed_size as usize;
    if region_len > region.len() {
        return Err(NmoError::InvalidFormat(
            "data_packed_size exceeds remaining bytes".into(),
        ));
    }
    let region = &region[..region_len];
    if !file_header.compress_data() {
        return Ok(region.to_vec());
    }
    let mut decoder = ZlibDecoder::new(region);
    let mut out = Vec::with_capacity(file_header.data_unpacked_size as usize);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| NmoError::Compression(e.to_string()))?;
    if out.len() != file_header.data_unpacked_size as usize {
        return Err(NmoError::InvalidFormat(format!(
            "data section decompressed to {} bytes, header declared {}",
            out.len(),
            file_header.data_unpacked_size
        )));
    }
    Ok(out)
}

fn warn_on_duplicate_names(session: &mut Session, header1: &Header1) {
    let mut seen: HashMap<&str, u32> = HashMap::new();
    for d in &header1.descriptors {
        if let Some(name) = d.name.as_deref() {
            *seen.entry(name).or_insert(0) += 1;
        }
    }
    for (name, count) in seen {
        if count > 1 {
            session.record_warning(format!("duplicate object name {name:?} ({count} occurrences)"));
        }
    }
}

fn check_plugin_dependencies(session: &mut Session, header1: &Header1) {
    for i in 0..header1.plugin_category_count {
        session.record_plugin_diagnostic(PluginDiagnostic {
            required_guid: Guid::NULL,
            required_version: 0,
            category: format!("category-{i}"),
            resolved_name: None,
            resolved_version: None,
            // This implementation never loads plugin DLLs, so dependencies
            // are reported but never actually resolved against a host.
            status: PluginStatus::Ok,
        });
    }
}

fn create_object_shells(session: &mut Session, header1: &Header1) -> Result<()> {
    for d in &header1.descriptors {
        let name = match d.name.as_deref() {
            Some(n) => Some(session.arena().alloc_str(n)?),
            None => None,
        };
        let mut object = Object::new(ObjectId::NONE, d.class_id);
        object.name = name;
        object.file_index = d.file_index;
        let (repository, arena) = session.repository_and_arena_mut();
        let runtime_id = repository.add(object, arena)?;
        session
            .get_object_index_mut()
            .record(ObjectId(d.file_index), runtime_id);
    }
    Ok(())
}

fn attach_object_chunks(session: &mut Session, header1: &Header1, data: &[u8]) -> Result<()> {
    for d in &header1.descriptors {
        let runtime_id = session
            .get_object_index()
            .to_runtime(ObjectId(d.file_index))
            .ok_or_else(|| {
                NmoError::InvalidState(format!("no shell created for file_index {}", d.file_index))
            })?;
        let chunk = slice_chunk(data, d)?;
        if let Some(object) = session.get_object_repository_mut().find_by_id_mut(runtime_id) {
            object.chunk = Some(chunk);
        }
    }
    Ok(())
}

fn slice_chunk(data: &[u8], descriptor: &ObjectDescriptor) -> Result<Chunk> {
    let start = descriptor.chunk_offset as usize;
    let end = start
        .checked_add(descriptor.chunk_size as usize)
        .ok_or_else(|| NmoError::OutOfBounds("chunk offset + size overflows".into()))?;
    if end > data.len() {
        return Err(NmoError::OutOfBounds(format!(
            "object {} chunk [{start}, {end}) exceeds data section of {} bytes",
            descriptor.file_index,
            data.len()
        )));
    }
    Chunk::from_bytes(&data[start..end])
}

fn remap_object_chunks(session: &mut Session) -> Result<()> {
    let remap = session.get_object_index().clone();
    let ids: Vec<ObjectId> = session.get_object_repository().get_all().map(|o| o.id).collect();
    for id in ids {
        if let Some(object) = session.get_object_repository_mut().find_by_id_mut(id) {
            if let Some(chunk) = object.chunk.as_mut() {
                if chunk.is_packed() {
                    chunk.decompress()?;
                }
                remap.apply_load(chunk)?;
            }
        }
    }
    Ok(())
}

/// Parent classes before children, so a subclass deserializer never runs
/// before the base data it delegates to has a consistent ordering story
/// (the delegation itself is direct function calls, not driven by this
/// order, but topological order keeps diagnostics and `finish_loading`
/// dependencies sane when a later phase wants to look up a parent object).
fn topological_order(session: &Session) -> Vec<ObjectId> {
    let schema = session.context().schema();
    let mut ids: Vec<ObjectId> = session.get_object_repository().get_all().map(|o| o.id).collect();
    let class_of: HashMap<ObjectId, ClassId> = session
        .get_object_repository()
        .get_all()
        .map(|o| (o.id, o.class_id))
        .collect();
    ids.sort_by_key(|id| schema.derivation_level(class_of[id]));
    ids
}

fn deserialize_objects(session: &mut Session, order: &[ObjectId], flags: u32) -> Result<()> {
    let schema = session.context().schema_handle();
    for &id in order {
        let (class_id, mut chunk) = {
            let repo = session.get_object_repository_mut();
            let object = repo
                .find_by_id_mut(id)
                .ok_or_else(|| NmoError::InvalidState(format!("object {id:?} vanished")))?;
            let chunk = object
                .chunk
                .take()
                .ok_or_else(|| NmoError::InvalidState(format!("object {id:?} has no chunk")))?;
            (object.class_id, chunk)
        };
        chunk.start_read()?;
        let state = classes::dispatch_read(&schema, class_id, &mut chunk, session.arena())?;
        if VALIDATE & flags != 0 {
            if let Some(descriptor) = schema.find_by_class_id(class_id) {
                (descriptor.validate)(&state)?;
            }
        }
        if let Some(object) = session.get_object_repository_mut().find_by_id_mut(id) {
            object.state = state;
            object.chunk = Some(chunk);
        }
    }
    Ok(())
}

fn run_finish_loading(session: &mut Session, order: &[ObjectId]) -> Result<()> {
    let schema = session.context().schema_handle();
    for &id in order {
        let class_id = match session.get_object_repository().find_by_id(id) {
            Some(o) => o.class_id,
            None => continue,
        };
        let Some(descriptor) = schema.find_by_class_id(class_id) else {
            continue;
        };
        let (repository, arena) = session.repository_and_arena_mut();
        let Some(mut object) = repository.remove(id, arena) else {
            continue;
        };
        (descriptor.finish_loading)(&mut object.state, arena, repository)?;
        repository.add(object, arena)?;
    }
    Ok(())
}

fn drop_non_behavior_objects(session: &mut Session) {
    let schema = session.context().schema_handle();
    let to_remove: Vec<ObjectId> = session
        .get_object_repository()
        .get_all()
        .filter(|o| {
            !schema.is_derived_from(o.class_id, classes::ids::CKBEHAVIOR)
                && o.class_id != classes::ids::CKBEHAVIORIO
        })
        .map(|o| o.id)
        .collect();
    let (repository, arena) = session.repository_and_arena_mut();
    for id in to_remove {
        repository.remove(id, arena);
    }
}

fn build_default_indexes(session: &mut Session) -> Result<()> {
    let context = session.context().clone();
    let guid_lookup: GuidLookup = Box::new(move |class_id| {
        context.schema().find_by_class_id(class_id).map(|d| d.guid)
    });
    let (repository, arena) = session.repository_and_arena_mut();
    repository.set_index(INDEX_NAME | INDEX_CLASS | INDEX_GUID, Some(guid_lookup), arena)
}
