//! Object repository: the primary ID map plus optional, incrementally
//! maintained secondary indexes by name, class, and type GUID.
//!
//! Grounded in the teacher's `DjVmDir` (`files_list` insertion-ordered
//! primary list plus `id2file`/`name2file` secondary maps kept in sync on
//! add/remove/insert), generalized to an arbitrary object store with a
//! pluggable GUID resolver, per §3.4/§4.E-F.

use crate::arena::Arena;
use crate::error::{NmoError, Result};
use crate::object::Object;
use crate::types::{ClassId, Guid, ObjectId};
use std::collections::HashMap;

pub const INDEX_NAME: u32 = 0x1;
pub const INDEX_CLASS: u32 = 0x2;
pub const INDEX_GUID: u32 = 0x4;

/// Resolves a class id to the type GUID used by the GUID secondary index.
/// Typically backed by the schema registry (`find_by_class_id(id).guid`).
pub type GuidLookup = Box<dyn Fn(ClassId) -> Option<Guid>>;

#[derive(Default)]
pub struct ObjectRepository {
    order: Vec<ObjectId>,
    objects: HashMap<ObjectId, Object>,
    next_id: u32,
    active_indexes: u32,
    by_name_exact: HashMap<String, Vec<ObjectId>>,
    by_name_folded: HashMap<String, Vec<ObjectId>>,
    by_class: HashMap<ClassId, Vec<ObjectId>>,
    by_guid: HashMap<Guid, Vec<ObjectId>>,
    guid_lookup: Option<GuidLookup>,
}

impl ObjectRepository {
    pub fn new() -> Self {
        ObjectRepository {
            next_id: 1,
            ..Default::default()
        }
    }

    /// Enables or disables the given index bitset, rebuilding from the
    /// current contents of the repository. `guid_lookup` is required the
    /// first time `INDEX_GUID` is enabled.
    pub fn set_index(&mut self, flags: u32, guid_lookup: Option<GuidLookup>, arena: &Arena) -> Result<()> {
        if flags & INDEX_GUID != 0 && guid_lookup.is_some() {
            self.guid_lookup = guid_lookup;
        }
        if flags & INDEX_GUID != 0 && self.guid_lookup.is_none() {
            return Err(NmoError::InvalidArgument(
                "INDEX_GUID requires a guid_lookup the first time it is enabled".into(),
            ));
        }
        self.active_indexes |= flags;
        self.rebuild_indexes(arena);
        Ok(())
    }

    pub fn disable_index(&mut self, flags: u32) {
        self.active_indexes &= !flags;
        if flags & INDEX_NAME != 0 {
            self.by_name_exact.clear();
            self.by_name_folded.clear();
        }
        if flags & INDEX_CLASS != 0 {
            self.by_class.clear();
        }
        if flags & INDEX_GUID != 0 {
            self.by_guid.clear();
        }
    }

    fn rebuild_indexes(&mut self, arena: &Arena) {
        self.by_name_exact.clear();
        self.by_name_folded.clear();
        self.by_class.clear();
        self.by_guid.clear();
        let ids: Vec<ObjectId> = self.order.clone();
        for id in ids {
            self.index_insert(id, arena);
        }
    }

    fn index_insert(&mut self, id: ObjectId, arena: &Arena) {
        let Some(object) = self.objects.get(&id) else {
            return;
        };
        if self.active_indexes & INDEX_NAME != 0 {
            if let Some(handle) = object.name {
                let name = String::from_utf8_lossy(&arena.get(handle)).into_owned();
                self.by_name_exact.entry(name.clone()).or_default().push(id);
                self.by_name_folded
                    .entry(name.to_lowercase())
                    .or_default()
                    .push(id);
            }
        }
        if self.active_indexes & INDEX_CLASS != 0 {
            self.by_class.entry(object.class_id).or_default().push(id);
        }
        if self.active_indexes & INDEX_GUID != 0 {
            if let Some(lookup) = &self.guid_lookup {
                if let Some(guid) = lookup(object.class_id) {
                    self.by_guid.entry(guid).or_default().push(id);
                }
            }
        }
    }

    fn index_remove(&mut self, id: ObjectId, object: &Object, arena: &Arena) {
        if self.active_indexes & INDEX_NAME != 0 {
            if let Some(handle) = object.name {
                let name = String::from_utf8_lossy(&arena.get(handle)).into_owned();
                remove_from_bucket(&mut self.by_name_exact, &name, id);
                remove_from_bucket(&mut self.by_name_folded, &name.to_lowercase(), id);
            }
        }
        if self.active_indexes & INDEX_CLASS != 0 {
            if let Some(bucket) = self.by_class.get_mut(&object.class_id) {
                bucket.retain(|&v| v != id);
            }
        }
        if self.active_indexes & INDEX_GUID != 0 {
            if let Some(lookup) = &self.guid_lookup {
                if let Some(guid) = lookup(object.class_id) {
                    if let Some(bucket) = self.by_guid.get_mut(&guid) {
                        bucket.retain(|&v| v != id);
                    }
                }
            }
        }
    }

    fn allocate_id(&mut self) -> ObjectId {
        loop {
            let candidate = ObjectId(self.next_id);
            self.next_id = self.next_id.wrapping_add(1).max(1);
            if !self.objects.contains_key(&candidate) && !candidate.is_none() {
                return candidate;
            }
        }
    }

    /// Inserts `object`. If `object.id` is `ObjectId::NONE`, a fresh runtime
    /// id is assigned. Fails with `InvalidState` on a duplicate id.
    pub fn add(&mut self, mut object: Object, arena: &Arena) -> Result<ObjectId> {
        if object.id.is_none() {
            object.id = self.allocate_id();
        } else if self.objects.contains_key(&object.id) {
            return Err(NmoError::InvalidState(format!(
                "object id {:?} already present in repository",
                object.id
            )));
        }
        let id = object.id;
        self.order.push(id);
        self.objects.insert(id, object);
        self.index_insert(id, arena);
        Ok(id)
    }

    pub fn remove(&mut self, id: ObjectId, arena: &Arena) -> Option<Object> {
        let object = self.objects.remove(&id)?;
        self.order.retain(|&v| v != id);
        self.index_remove(id, &object, arena);
        Some(object)
    }

    pub fn find_by_id(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get(&id)
    }

    pub fn find_by_id_mut(&mut self, id: ObjectId) -> Option<&mut Object> {
        self.objects.get_mut(&id)
    }

    pub fn find_by_name<'a>(&'a self, name: &str, case_sensitive: bool) -> Vec<&'a Object> {
        let ids = if case_sensitive {
            self.by_name_exact.get(name)
        } else {
            self.by_name_folded.get(&name.to_lowercase())
        };
        ids.map(|ids| ids.iter().filter_map(|id| self.objects.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn find_by_class(&self, class_id: ClassId) -> Vec<&Object> {
        self.by_class
            .get(&class_id)
            .map(|ids| ids.iter().filter_map(|id| self.objects.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn find_by_guid(&self, guid: Guid) -> Vec<&Object> {
        self.by_guid
            .get(&guid)
            .map(|ids| ids.iter().filter_map(|id| self.objects.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn get_all(&self) -> impl Iterator<Item = &Object> {
        self.order.iter().filter_map(|id| self.objects.get(id))
    }

    pub fn count(&self) -> usize {
        self.objects.len()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.objects.clear();
        self.by_name_exact.clear();
        self.by_name_folded.clear();
        self.by_class.clear();
        self.by_guid.clear();
    }
}

fn remove_from_bucket(map: &mut HashMap<String, Vec<ObjectId>>, key: &str, id: ObjectId) {
    if let Some(bucket) = map.get_mut(key) {
        bucket.retain(|&v| v != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;

    #[test]
    fn add_assigns_fresh_id_and_find_by_id_roundtrips() {
        let arena = Arena::new();
        let mut repo = ObjectRepository::new();
        let id = repo.add(Object::new(ObjectId::NONE, ClassId(1)), &arena).unwrap();
        assert!(!id.is_none());
        assert!(repo.find_by_id(id).is_some());
    }

    #[test]
    fn duplicate_id_rejected() {
        let arena = Arena::new();
        let mut repo = ObjectRepository::new();
        repo.add(Object::new(ObjectId(5), ClassId(1)), &arena).unwrap();
        let err = repo.add(Object::new(ObjectId(5), ClassId(1)), &arena);
        assert!(err.is_err());
    }

    #[test]
    fn remove_clears_lookup() {
        let arena = Arena::new();
        let mut repo = ObjectRepository::new();
        let id = repo.add(Object::new(ObjectId(5), ClassId(1)), &arena).unwrap();
        repo.remove(id, &arena);
        assert!(repo.find_by_id(id).is_none());
    }

    #[test]
    fn class_index_updates_incrementally() {
        let arena = Arena::new();
        let mut repo = ObjectRepository::new();
        repo.set_index(INDEX_CLASS, None, &arena).unwrap();
        let a = repo.add(Object::new(ObjectId(1), ClassId(7)), &arena).unwrap();
        let _b = repo.add(Object::new(ObjectId(2), ClassId(7)), &arena).unwrap();
        assert_eq!(repo.find_by_class(ClassId(7)).len(), 2);
        repo.remove(a, &arena);
        assert_eq!(repo.find_by_class(ClassId(7)).len(), 1);
    }

    #[test]
    fn name_index_exact_and_folded() {
        let arena = Arena::new();
        let mut repo = ObjectRepository::new();
        repo.set_index(INDEX_NAME, None, &arena).unwrap();
        let mut obj = Object::new(ObjectId(1), ClassId(1));
        obj.name = Some(arena.alloc_str("Root").unwrap());
        repo.add(obj, &arena).unwrap();
        assert_eq!(repo.find_by_name("Root", true).len(), 1);
        assert_eq!(repo.find_by_name("root", true).len(), 0);
        assert_eq!(repo.find_by_name("root", false).len(), 1);
    }

    #[test]
    fn guid_index_requires_lookup_on_first_enable() {
        let arena = Arena::new();
        let mut repo = ObjectRepository::new();
        assert!(repo.set_index(INDEX_GUID, None, &arena).is_err());
        assert!(repo
            .set_index(INDEX_GUID, Some(Box::new(|_| Some(Guid::new(1, 1)))), &arena)
            .is_ok());
    }

    #[test]
    fn insertion_order_preserved() {
        let arena = Arena::new();
        let mut repo = ObjectRepository::new();
        repo.add(Object::new(ObjectId(3), ClassId(1)), &arena).unwrap();
        repo.add(Object::new(ObjectId(1), ClassId(1)), &arena).unwrap();
        repo.add(Object::new(ObjectId(2), ClassId(1)), &arena).unwrap();
        let ids: Vec<ObjectId> = repo.get_all().map(|o| o.id).collect();
        assert_eq!(ids, vec![ObjectId(3), ObjectId(1), ObjectId(2)]);
    }
}
