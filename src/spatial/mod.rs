//! Area-of-interest collaborator contract

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::objects::{ObjectId, WorldObject};
use crate::session::Session;

/// Spatial service notified after placement and session bind.
///
/// The object graph never depends on it for correctness.
pub trait SpatialService: Send + Sync {
    fn add(&self, object: &Arc<WorldObject>, x: f32, z: f32);

    fn remove(&self, _object: &Arc<WorldObject>) {}

    fn handle_zone_in(&self, session: &Arc<dyn Session>, creature: &Arc<WorldObject>);
}

/// Spatial service that ignores every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSpatial;

impl SpatialService for NullSpatial {
    fn add(&self, _object: &Arc<WorldObject>, _x: f32, _z: f32) {}

    fn handle_zone_in(&self, _session: &Arc<dyn Session>, _creature: &Arc<WorldObject>) {}
}

/// Flat index of placed objects by id, enough for diagnostics and tests
#[derive(Debug, Default)]
pub struct PlacementIndex {
    placed: Mutex<HashMap<ObjectId, (f32, f32)>>,
    zone_ins: Mutex<Vec<ObjectId>>,
}

impl PlacementIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn placement(&self, id: ObjectId) -> Option<(f32, f32)> {
        self.placed.lock().get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.placed.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.placed.lock().is_empty()
    }

    /// Creatures that zoned in, in order
    pub fn zone_ins(&self) -> Vec<ObjectId> {
        self.zone_ins.lock().clone()
    }
}

impl SpatialService for PlacementIndex {
    fn add(&self, object: &Arc<WorldObject>, x: f32, z: f32) {
        self.placed.lock().insert(object.id(), (x, z));
    }

    fn remove(&self, object: &Arc<WorldObject>) {
        self.placed.lock().remove(&object.id());
    }

    fn handle_zone_in(&self, _session: &Arc<dyn Session>, creature: &Arc<WorldObject>) {
        self.zone_ins.lock().push(creature.id());
    }
}
