//! Schema registry: one descriptor per CK class, keyed by name/class id/GUID,
//! with vtable dispatch for (de)serialization and class-hierarchy queries.
//!
//! Grounded in the teacher's class-hierarchy-free design (the teacher has no
//! analogous registry — DjVu has a flat chunk-id switch in `chunk_tree.rs`)
//! generalized per §3.6/§4.G into a proper inheritance-aware dispatch table,
//! the shape other example repos in the pack use for plugin/type registries.

use crate::arena::Arena;
use crate::chunk::Chunk;
use crate::classes::ObjectState;
use crate::error::{NmoError, Result};
use crate::repository::ObjectRepository;
use crate::types::{ClassId, Guid};
use std::collections::HashMap;

pub type ReadFn = fn(&mut Chunk, &Arena) -> Result<ObjectState>;
pub type WriteFn = fn(&ObjectState, &mut Chunk, &Arena) -> Result<()>;
pub type ValidateFn = fn(&ObjectState) -> Result<()>;
pub type FinishLoadingFn = fn(&mut ObjectState, &Arena, &ObjectRepository) -> Result<()>;

/// Version-gated field metadata, used by per-class (de)serializers to
/// decide whether a given field is present in a particular `data_version`.
#[derive(Debug, Clone)]
pub struct FieldMeta {
    pub name: &'static str,
    pub offset: usize,
    pub type_ref: &'static str,
    pub since: u32,
    pub removed: Option<u32>,
}

impl FieldMeta {
    pub fn is_active(&self, data_version: u32) -> bool {
        data_version >= self.since && self.removed.is_none_or(|r| data_version < r)
    }
}

#[derive(Clone)]
pub struct ClassDescriptor {
    pub class_id: ClassId,
    pub name: &'static str,
    pub guid: Guid,
    pub parent: Option<ClassId>,
    pub fields: Vec<FieldMeta>,
    pub struct_size: Option<usize>,
    pub read: ReadFn,
    pub write: WriteFn,
    pub validate: ValidateFn,
    pub finish_loading: FinishLoadingFn,
}

pub struct SchemaRegistry {
    descriptors: HashMap<ClassId, ClassDescriptor>,
    parent_of: HashMap<ClassId, ClassId>,
    by_name: HashMap<&'static str, ClassId>,
    by_guid: HashMap<Guid, ClassId>,
    beobject_class_id: ClassId,
}

impl SchemaRegistry {
    pub fn new(beobject_class_id: ClassId) -> Self {
        SchemaRegistry {
            descriptors: HashMap::new(),
            parent_of: HashMap::new(),
            by_name: HashMap::new(),
            by_guid: HashMap::new(),
            beobject_class_id,
        }
    }

    /// Registers a class in the hierarchy without a full descriptor —
    /// used for classes that fall back to the raw-tail deserializer but
    /// still need to participate in `is_derived_from`/`find_by_class_id_inherited`.
    pub fn register_hierarchy(&mut self, class_id: ClassId, parent: Option<ClassId>) {
        if let Some(parent) = parent {
            self.parent_of.insert(class_id, parent);
        }
    }

    pub fn register(&mut self, descriptor: ClassDescriptor) -> Result<()> {
        if self.descriptors.contains_key(&descriptor.class_id) {
            return Err(NmoError::InvalidState(format!(
                "class id {:?} already registered",
                descriptor.class_id
            )));
        }
        if self.by_name.contains_key(descriptor.name) {
            return Err(NmoError::InvalidState(format!(
                "class name {:?} already registered",
                descriptor.name
            )));
        }
        if self.by_guid.contains_key(&descriptor.guid) {
            return Err(NmoError::InvalidState(format!(
                "class guid {} already registered",
                descriptor.guid
            )));
        }
        self.register_hierarchy(descriptor.class_id, descriptor.parent);
        self.by_name.insert(descriptor.name, descriptor.class_id);
        self.by_guid.insert(descriptor.guid, descriptor.class_id);
        self.descriptors.insert(descriptor.class_id, descriptor);
        Ok(())
    }

    pub fn find_by_name(&self, name: &str) -> Option<&ClassDescriptor> {
        self.by_name.get(name).and_then(|id| self.descriptors.get(id))
    }

    pub fn find_by_class_id(&self, id: ClassId) -> Option<&ClassDescriptor> {
        self.descriptors.get(&id)
    }

    /// Walks the parent chain, starting at `id`, until a registered
    /// descriptor is found.
    pub fn find_by_class_id_inherited(&self, id: ClassId) -> Option<&ClassDescriptor> {
        let mut current = Some(id);
        while let Some(c) = current {
            if let Some(d) = self.descriptors.get(&c) {
                return Some(d);
            }
            current = self.parent_of.get(&c).copied();
        }
        None
    }

    pub fn find_by_guid(&self, guid: Guid) -> Option<&ClassDescriptor> {
        self.by_guid.get(&guid).and_then(|id| self.descriptors.get(id))
    }

    pub fn is_derived_from(&self, child: ClassId, parent: ClassId) -> bool {
        if child == parent {
            return true;
        }
        let mut current = self.parent_of.get(&child).copied();
        while let Some(c) = current {
            if c == parent {
                return true;
            }
            current = self.parent_of.get(&c).copied();
        }
        false
    }

    pub fn derivation_level(&self, id: ClassId) -> usize {
        let mut level = 0;
        let mut current = self.parent_of.get(&id).copied();
        while let Some(c) = current {
            level += 1;
            current = self.parent_of.get(&c).copied();
        }
        level
    }

    pub fn common_ancestor(&self, a: ClassId, b: ClassId) -> Option<ClassId> {
        let mut ancestors_of_a = vec![a];
        let mut current = self.parent_of.get(&a).copied();
        while let Some(c) = current {
            ancestors_of_a.push(c);
            current = self.parent_of.get(&c).copied();
        }
        let mut candidate = Some(b);
        while let Some(c) = candidate {
            if ancestors_of_a.contains(&c) {
                return Some(c);
            }
            candidate = self.parent_of.get(&c).copied();
        }
        None
    }

    pub fn uses_beobject_deserializer(&self, id: ClassId) -> bool {
        self.is_derived_from(id, self.beobject_class_id)
    }

    /// Checks the registry for structural consistency before first use:
    /// no cycles in the parent chain, no dangling parent references, and
    /// (when declared) field offsets within the class's struct size.
    pub fn validate(&self) -> Result<()> {
        for &class_id in self.parent_of.keys() {
            let mut seen = std::collections::HashSet::new();
            let mut current = Some(class_id);
            while let Some(c) = current {
                if !seen.insert(c) {
                    return Err(NmoError::ValidationFailed(format!(
                        "cycle detected in class hierarchy at {c:?}"
                    )));
                }
                current = self.parent_of.get(&c).copied();
            }
        }
        for descriptor in self.descriptors.values() {
            if let Some(parent) = descriptor.parent {
                if !self.descriptors.contains_key(&parent) && !self.parent_of.contains_key(&parent)
                {
                    return Err(NmoError::ValidationFailed(format!(
                        "class {:?} references unregistered parent {:?}",
                        descriptor.class_id, parent
                    )));
                }
            }
            if let Some(size) = descriptor.struct_size {
                for field in &descriptor.fields {
                    if field.offset >= size {
                        return Err(NmoError::ValidationFailed(format!(
                            "field {:?} of class {:?} has offset {} outside struct size {}",
                            field.name, descriptor.class_id, field.offset, size
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::ObjectState;

    fn noop_read(_: &mut Chunk, _: &Arena) -> Result<ObjectState> {
        Ok(ObjectState::Unknown)
    }
    fn noop_write(_: &ObjectState, _: &mut Chunk, _: &Arena) -> Result<()> {
        Ok(())
    }
    fn noop_validate(_: &ObjectState) -> Result<()> {
        Ok(())
    }
    fn noop_finish(_: &mut ObjectState, _: &Arena, _: &ObjectRepository) -> Result<()> {
        Ok(())
    }

    fn descriptor(id: u32, name: &'static str, parent: Option<u32>) -> ClassDescriptor {
        ClassDescriptor {
            class_id: ClassId(id),
            name,
            guid: Guid::new(id, 0),
            parent: parent.map(ClassId),
            fields: Vec::new(),
            struct_size: None,
            read: noop_read,
            write: noop_write,
            validate: noop_validate,
            finish_loading: noop_finish,
        }
    }

    #[test]
    fn inheritance_queries() {
        let mut reg = SchemaRegistry::new(ClassId(2));
        reg.register(descriptor(1, "CKObject", None)).unwrap();
        reg.register(descriptor(2, "CKBeObject", Some(1))).unwrap();
        reg.register(descriptor(3, "CKGroup", Some(2))).unwrap();

        assert!(reg.is_derived_from(ClassId(3), ClassId(3)));
        assert!(reg.is_derived_from(ClassId(3), ClassId(1)));
        assert!(!reg.is_derived_from(ClassId(1), ClassId(3)));
        assert!(reg.derivation_level(ClassId(3)) > reg.derivation_level(ClassId(1)));
        assert!(reg.uses_beobject_deserializer(ClassId(3)));
        assert!(!reg.uses_beobject_deserializer(ClassId(1)));
    }

    #[test]
    fn inherited_lookup_falls_back_to_parent() {
        let mut reg = SchemaRegistry::new(ClassId(2));
        reg.register(descriptor(1, "CKObject", None)).unwrap();
        reg.register_hierarchy(ClassId(99), Some(ClassId(1)));
        let found = reg.find_by_class_id_inherited(ClassId(99)).unwrap();
        assert_eq!(found.class_id, ClassId(1));
    }

    #[test]
    fn common_ancestor_finds_nearest_shared_parent() {
        let mut reg = SchemaRegistry::new(ClassId(2));
        reg.register(descriptor(1, "CKObject", None)).unwrap();
        reg.register(descriptor(2, "CKBeObject", Some(1))).unwrap();
        reg.register(descriptor(3, "CKGroup", Some(2))).unwrap();
        reg.register(descriptor(4, "CK2dEntity", Some(2))).unwrap();
        assert_eq!(reg.common_ancestor(ClassId(3), ClassId(4)), Some(ClassId(2)));
    }

    #[test]
    fn duplicate_class_id_rejected() {
        let mut reg = SchemaRegistry::new(ClassId(2));
        reg.register(descriptor(1, "CKObject", None)).unwrap();
        assert!(reg.register(descriptor(1, "Other", None)).is_err());
    }

    #[test]
    fn validate_detects_dangling_parent() {
        let mut reg = SchemaRegistry::new(ClassId(2));
        reg.register(descriptor(5, "Orphan", Some(404))).unwrap();
        assert!(reg.validate().is_err());
    }

    #[test]
    fn validate_passes_for_consistent_hierarchy() {
        let mut reg = SchemaRegistry::new(ClassId(2));
        reg.register(descriptor(1, "CKObject", None)).unwrap();
        reg.register(descriptor(2, "CKBeObject", Some(1))).unwrap();
        assert!(reg.validate().is_ok());
    }
}
