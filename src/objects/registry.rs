//! Authoritative map of resident objects
//!
//! Consistency contract:
//! - `put`, `get`, `remove` are atomic per id and safe from any number of
//!   concurrent callers without external locking.
//! - `snapshot` returns a point-in-time copy; callers iterating it never
//!   hold registry locks, so concurrent inserts and removals proceed.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use super::{ObjectId, WorldObject};

/// Result of a link-resolution pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkReport {
    /// Edges attached during this pass
    pub linked: usize,
    /// Objects whose parent id still does not resolve
    pub unresolved: usize,
}

#[derive(Debug, Default)]
pub struct ObjectRegistry {
    objects: DashMap<ObjectId, Arc<WorldObject>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Insert or replace, returning the previous object for this id
    pub fn put(&self, obj: Arc<WorldObject>) -> Option<Arc<WorldObject>> {
        self.objects.insert(obj.id(), obj)
    }

    pub fn get(&self, id: ObjectId) -> Option<Arc<WorldObject>> {
        self.objects.get(&id).map(|o| o.value().clone())
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn remove(&self, id: ObjectId) -> Option<Arc<WorldObject>> {
        self.objects.remove(&id).map(|(_, o)| o)
    }

    /// Remove only if the resident object for this id is exactly `obj`
    pub fn remove_exact(&self, obj: &Arc<WorldObject>) -> bool {
        self.objects
            .remove_if(&obj.id(), |_, resident| Arc::ptr_eq(resident, obj))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Point-in-time copy of every resident object
    pub fn snapshot(&self) -> Vec<Arc<WorldObject>> {
        self.objects.iter().map(|o| o.value().clone()).collect()
    }

    /// Register an object and its entire owned subtree
    pub fn put_subtree(&self, root: &Arc<WorldObject>) -> usize {
        self.put(root.clone());
        let descendants = root.descendants();
        for obj in &descendants {
            self.put(obj.clone());
        }
        descendants.len() + 1
    }

    /// Remove an object and its entire owned subtree, returning how many were resident
    pub fn remove_subtree(&self, root: &Arc<WorldObject>) -> usize {
        let mut removed = 0;
        for obj in root.descendants() {
            if self.remove_exact(&obj) {
                removed += 1;
            }
        }
        if self.remove_exact(root) {
            removed += 1;
        }
        removed
    }

    /// Resident object with this exact custom name
    pub fn find_by_custom_name(&self, name: &str) -> Option<Arc<WorldObject>> {
        self.objects
            .iter()
            .find(|o| o.custom_name().as_deref() == Some(name))
            .map(|o| o.value().clone())
    }

    /// Attach every object whose parent id resolves but whose edge is not linked yet.
    ///
    /// Runs over a snapshot, so it tolerates concurrent registry mutation.
    pub fn resolve_links(&self) -> LinkReport {
        let mut report = LinkReport::default();
        for obj in self.snapshot() {
            if !obj.is_unresolved() {
                continue;
            }
            let Some(parent_id) = obj.parent_id() else {
                continue;
            };
            match self.get(parent_id) {
                Some(parent) if parent.add_child(&obj) => report.linked += 1,
                Some(_) => {
                    warn!(object_id = obj.id(), parent_id, "refusing cyclic containment edge");
                    report.unresolved += 1;
                }
                None => report.unresolved += 1,
            }
        }
        debug!(
            linked = report.linked,
            unresolved = report.unresolved,
            "link resolution pass complete"
        );
        report
    }

    /// Count of objects with a parent id but no linked container
    pub fn unresolved_count(&self) -> usize {
        self.objects.iter().filter(|o| o.is_unresolved()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{ObjectKind, Point3D, Quaternion, Variant};

    fn make(id: ObjectId, kind: ObjectKind) -> Arc<WorldObject> {
        Arc::new(WorldObject::new(
            id,
            "object/tangible/test/shared_thing.iff",
            Variant::new(kind),
            None,
            Point3D::ORIGIN,
            Quaternion::IDENTITY,
        ))
    }

    #[test]
    fn test_put_get_remove() {
        let registry = ObjectRegistry::new();
        registry.put(make(1, ObjectKind::Tangible));

        assert!(registry.contains(1));
        assert_eq!(registry.get(1).unwrap().id(), 1);
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(1).is_some());
        assert!(registry.get(1).is_none());
        assert!(registry.remove(1).is_none());
    }

    #[test]
    fn test_remove_exact_ignores_replacement() {
        let registry = ObjectRegistry::new();
        let old = make(1, ObjectKind::Tangible);
        registry.put(old.clone());
        registry.put(make(1, ObjectKind::Tangible));

        assert!(!registry.remove_exact(&old));
        assert!(registry.contains(1));
    }

    #[test]
    fn test_subtree_registration() {
        let registry = ObjectRegistry::new();
        let building = make(1, ObjectKind::Building);
        let cell = make(2, ObjectKind::Cell);
        let item = make(3, ObjectKind::Tangible);
        building.add_child(&cell);
        cell.add_child(&item);

        assert_eq!(registry.put_subtree(&building), 3);
        assert_eq!(registry.len(), 3);

        assert_eq!(registry.remove_subtree(&building), 3);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_resolve_links_reverse_order() {
        let registry = ObjectRegistry::new();
        let item = make(3, ObjectKind::Tangible);
        item.set_parent_id(Some(2));
        let cell = make(2, ObjectKind::Cell);
        cell.set_parent_id(Some(1));
        registry.put(item.clone());
        registry.put(cell.clone());
        assert_eq!(registry.unresolved_count(), 2);

        let report = registry.resolve_links();
        assert_eq!(report.linked, 1);
        assert_eq!(report.unresolved, 1);

        registry.put(make(1, ObjectKind::Building));
        let report = registry.resolve_links();
        assert_eq!(report.linked, 1);
        assert_eq!(report.unresolved, 0);
        assert_eq!(registry.unresolved_count(), 0);
        assert!(Arc::ptr_eq(&item.container().unwrap(), &cell));
    }

    #[test]
    fn test_find_by_custom_name_is_exact() {
        let registry = ObjectRegistry::new();
        let npc = make(7, ObjectKind::Creature);
        npc.set_custom_name(Some("Han Solo".to_string()));
        registry.put(npc);

        assert_eq!(registry.find_by_custom_name("Han Solo").unwrap().id(), 7);
        assert!(registry.find_by_custom_name("han solo").is_none());
    }

    #[test]
    fn test_concurrent_puts() {
        let registry = ObjectRegistry::shared();
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..100u64 {
                        registry.put(make(t * 1000 + i, ObjectKind::Static));
                        let _ = registry.snapshot();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.len(), 800);
    }
}
