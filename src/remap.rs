//! ID remap tables: the file-index/runtime-id translation applied to every
//! chunk's recorded `ObjectId` offsets during load and save.
//!
//! Grounded in the teacher's `DjVmDir` id-renumbering step (files are
//! renumbered on insertion into a merged document, and every chunk that
//! references a file id is rewritten) generalized to two independent
//! monotone partial functions per §3.5/§4.I.

use crate::chunk::Chunk;
use crate::error::Result;
use crate::types::ObjectId;
use std::collections::HashMap;

/// Translates ids in one direction. Both `file_to_runtime` (load) and
/// `runtime_to_file` (save) are populated incrementally as objects are
/// assigned ids, and are disjoint concerns: a single `IdRemap` only ever
/// serves one direction at a time.
#[derive(Debug, Clone, Default)]
pub struct IdRemap {
    file_to_runtime: HashMap<ObjectId, ObjectId>,
    runtime_to_file: HashMap<ObjectId, ObjectId>,
}

impl IdRemap {
    pub fn new() -> Self {
        IdRemap::default()
    }

    /// Records that file-index `file_id` became runtime id `runtime_id`.
    /// Both directions are recorded so a save pass can reuse the same table
    /// to reconstruct `runtime_to_file` without a second walk.
    pub fn record(&mut self, file_id: ObjectId, runtime_id: ObjectId) {
        self.file_to_runtime.insert(file_id, runtime_id);
        self.runtime_to_file.insert(runtime_id, file_id);
    }

    pub fn to_runtime(&self, file_id: ObjectId) -> Option<ObjectId> {
        self.file_to_runtime.get(&file_id).copied()
    }

    pub fn to_file(&self, runtime_id: ObjectId) -> Option<ObjectId> {
        self.runtime_to_file.get(&runtime_id).copied()
    }

    pub fn len(&self) -> usize {
        self.file_to_runtime.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file_to_runtime.is_empty()
    }

    /// Applies the file-to-runtime direction to `chunk`'s recorded id
    /// offsets (load pipeline, phase 8).
    pub fn apply_load(&self, chunk: &mut Chunk) -> Result<()> {
        chunk.remap_object_ids(&self.file_to_runtime)
    }

    /// Applies the runtime-to-file direction (save pipeline, step 4).
    pub fn apply_save(&self, chunk: &mut Chunk) -> Result<()> {
        chunk.remap_object_ids(&self.runtime_to_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClassId;

    #[test]
    fn record_populates_both_directions() {
        let mut remap = IdRemap::new();
        remap.record(ObjectId(3), ObjectId(103));
        assert_eq!(remap.to_runtime(ObjectId(3)), Some(ObjectId(103)));
        assert_eq!(remap.to_file(ObjectId(103)), Some(ObjectId(3)));
        assert_eq!(remap.len(), 1);
    }

    #[test]
    fn unmapped_id_resolves_to_none() {
        let remap = IdRemap::new();
        assert_eq!(remap.to_runtime(ObjectId(9)), None);
    }

    #[test]
    fn apply_load_then_apply_save_round_trips_ids() {
        let mut remap = IdRemap::new();
        remap.record(ObjectId(5), ObjectId(105));

        let mut chunk = Chunk::new(ClassId(1), 1);
        chunk.start_write().unwrap();
        chunk.write_object_id(ObjectId(5)).unwrap();
        chunk.close().unwrap();

        remap.apply_load(&mut chunk).unwrap();
        chunk.start_read().unwrap();
        assert_eq!(chunk.read_object_id().unwrap(), ObjectId(105));

        chunk.start_write().unwrap();
        chunk.write_object_id(ObjectId(105)).unwrap();
        chunk.close().unwrap();
        remap.apply_save(&mut chunk).unwrap();
        chunk.start_read().unwrap();
        assert_eq!(chunk.read_object_id().unwrap(), ObjectId(5));
    }
}
