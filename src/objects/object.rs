//! World object record and containment graph

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::planet::Planet;
use super::template::ObjectKind;
use crate::session::Session;
use crate::timers::TaskId;

/// Globally unique object identifier
pub type ObjectId = u64;

/// Position in world or cell-local space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3D {
    pub const ORIGIN: Point3D = Point3D::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Orientation as a unit quaternion (w, x, y, z)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion::new(1.0, 0.0, 0.0, 0.0);

    pub const fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    /// Heading around the vertical axis, in radians
    pub fn yaw(&self) -> f32 {
        2.0 * self.y.atan2(self.w)
    }

    /// Rotate by `radians` around the vertical axis
    pub fn rotate_y(&self, radians: f32) -> Quaternion {
        let half = radians / 2.0;
        let r = Quaternion::new(half.cos(), 0.0, half.sin(), 0.0);
        Quaternion::new(
            r.w * self.w - r.x * self.x - r.y * self.y - r.z * self.z,
            r.w * self.x + r.x * self.w + r.y * self.z - r.z * self.y,
            r.w * self.y - r.x * self.z + r.y * self.w + r.z * self.x,
            r.w * self.z + r.x * self.y - r.y * self.x + r.z * self.w,
        )
    }
}

/// Type-specific data carried by each object variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Variant {
    Creature { respawn_delay: Option<Duration> },
    Player { friends: Vec<String>, link_dead: bool },
    Tangible { respawn_delay: Option<Duration> },
    Weapon { respawn_delay: Option<Duration> },
    Building,
    Cell { cell_number: u32 },
    Static,
    Guild,
    Group { members: Vec<ObjectId> },
    Waypoint,
    Mission,
}

impl Variant {
    /// Default variant data for a freshly constructed object of `kind`
    pub fn new(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::Creature => Variant::Creature {
                respawn_delay: None,
            },
            ObjectKind::Player => Variant::Player {
                friends: Vec::new(),
                link_dead: false,
            },
            ObjectKind::Tangible => Variant::Tangible {
                respawn_delay: None,
            },
            ObjectKind::Weapon => Variant::Weapon {
                respawn_delay: None,
            },
            ObjectKind::Building => Variant::Building,
            ObjectKind::Cell => Variant::Cell { cell_number: 0 },
            ObjectKind::Static => Variant::Static,
            ObjectKind::Guild => Variant::Guild,
            ObjectKind::Group => Variant::Group {
                members: Vec::new(),
            },
            ObjectKind::Waypoint => Variant::Waypoint,
            ObjectKind::Mission => Variant::Mission,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            Variant::Creature { .. } => ObjectKind::Creature,
            Variant::Player { .. } => ObjectKind::Player,
            Variant::Tangible { .. } => ObjectKind::Tangible,
            Variant::Weapon { .. } => ObjectKind::Weapon,
            Variant::Building => ObjectKind::Building,
            Variant::Cell { .. } => ObjectKind::Cell,
            Variant::Static => ObjectKind::Static,
            Variant::Guild => ObjectKind::Guild,
            Variant::Group { .. } => ObjectKind::Group,
            Variant::Waypoint => ObjectKind::Waypoint,
            Variant::Mission => ObjectKind::Mission,
        }
    }

    fn respawn_slot(&mut self) -> Option<&mut Option<Duration>> {
        match self {
            Variant::Creature { respawn_delay }
            | Variant::Tangible { respawn_delay }
            | Variant::Weapon { respawn_delay } => Some(respawn_delay),
            _ => None,
        }
    }
}

/// Runtime-only side-channel values. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum Attachment {
    Value(serde_json::Value),
    Task(TaskId),
    Objects(Vec<ObjectId>),
}

struct ObjectState {
    planet: Option<Arc<Planet>>,
    position: Point3D,
    orientation: Quaternion,
    parent_id: Option<ObjectId>,
    container: Weak<WorldObject>,
    children: Vec<Arc<WorldObject>>,
    in_snapshot: bool,
    custom_name: Option<String>,
    variant: Variant,
    attachments: HashMap<String, Attachment>,
    session: Option<Arc<dyn Session>>,
}

/// A simulated entity resident in (or restored for) the live world.
///
/// Identity and template are immutable. Everything else sits behind a
/// per-object lock so handlers on different sessions can mutate disjoint
/// objects without a global lock. Children are owned; the container is a
/// weak back-edge that never keeps the parent alive.
pub struct WorldObject {
    id: ObjectId,
    template: String,
    state: RwLock<ObjectState>,
}

impl fmt::Debug for WorldObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("WorldObject")
            .field("id", &self.id)
            .field("template", &self.template)
            .field("kind", &state.variant.kind())
            .field("parent_id", &state.parent_id)
            .field("children", &state.children.len())
            .finish()
    }
}

impl WorldObject {
    pub fn new(
        id: ObjectId,
        template: &str,
        variant: Variant,
        planet: Option<Arc<Planet>>,
        position: Point3D,
        orientation: Quaternion,
    ) -> Self {
        Self {
            id,
            template: template.to_string(),
            state: RwLock::new(ObjectState {
                planet,
                position,
                orientation,
                parent_id: None,
                container: Weak::new(),
                children: Vec::new(),
                in_snapshot: false,
                custom_name: None,
                variant,
                attachments: HashMap::new(),
                session: None,
            }),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn kind(&self) -> ObjectKind {
        self.state.read().variant.kind()
    }

    pub fn variant(&self) -> Variant {
        self.state.read().variant.clone()
    }

    /// Mutate variant data in place
    pub fn with_variant<R>(&self, f: impl FnOnce(&mut Variant) -> R) -> R {
        f(&mut self.state.write().variant)
    }

    pub fn planet(&self) -> Option<Arc<Planet>> {
        self.state.read().planet.clone()
    }

    pub fn set_planet(&self, planet: Option<Arc<Planet>>) {
        self.state.write().planet = planet;
    }

    pub fn position(&self) -> Point3D {
        self.state.read().position
    }

    pub fn set_position(&self, position: Point3D) {
        self.state.write().position = position;
    }

    pub fn orientation(&self) -> Quaternion {
        self.state.read().orientation
    }

    pub fn set_orientation(&self, orientation: Quaternion) {
        self.state.write().orientation = orientation;
    }

    pub fn in_snapshot(&self) -> bool {
        self.state.read().in_snapshot
    }

    pub fn set_in_snapshot(&self, in_snapshot: bool) {
        self.state.write().in_snapshot = in_snapshot;
    }

    pub fn custom_name(&self) -> Option<String> {
        self.state.read().custom_name.clone()
    }

    pub fn set_custom_name(&self, name: Option<String>) {
        self.state.write().custom_name = name;
    }

    /// Respawn delay, if this is a tangible with one configured
    pub fn respawn_delay(&self) -> Option<Duration> {
        match self.state.read().variant {
            Variant::Creature { respawn_delay }
            | Variant::Tangible { respawn_delay }
            | Variant::Weapon { respawn_delay } => respawn_delay.filter(|d| !d.is_zero()),
            _ => None,
        }
    }

    /// Set the respawn delay. Returns false for variants that cannot respawn.
    pub fn set_respawn_delay(&self, delay: Option<Duration>) -> bool {
        match self.state.write().variant.respawn_slot() {
            Some(slot) => {
                *slot = delay;
                true
            }
            None => false,
        }
    }

    /// Cell ordinal within the owning building (cells only)
    pub fn cell_number(&self) -> Option<u32> {
        match self.state.read().variant {
            Variant::Cell { cell_number } => Some(cell_number),
            _ => None,
        }
    }

    pub fn set_cell_number(&self, number: u32) -> bool {
        match &mut self.state.write().variant {
            Variant::Cell { cell_number } => {
                *cell_number = number;
                true
            }
            _ => false,
        }
    }

    pub fn attachment(&self, key: &str) -> Option<Attachment> {
        self.state.read().attachments.get(key).cloned()
    }

    pub fn set_attachment(&self, key: &str, value: Attachment) {
        self.state.write().attachments.insert(key.to_string(), value);
    }

    pub fn take_attachment(&self, key: &str) -> Option<Attachment> {
        self.state.write().attachments.remove(key)
    }

    pub fn session(&self) -> Option<Arc<dyn Session>> {
        self.state.read().session.clone()
    }

    pub fn set_session(&self, session: Option<Arc<dyn Session>>) {
        self.state.write().session = session;
    }

    pub fn take_session(&self) -> Option<Arc<dyn Session>> {
        self.state.write().session.take()
    }

    pub fn parent_id(&self) -> Option<ObjectId> {
        self.state.read().parent_id
    }

    /// Record a parent id without linking; the link resolver attaches it later
    pub fn set_parent_id(&self, parent_id: Option<ObjectId>) {
        let mut state = self.state.write();
        state.parent_id = parent_id.filter(|&id| id != 0);
        state.container = Weak::new();
    }

    /// The live container, if the containment edge is resolved
    pub fn container(&self) -> Option<Arc<WorldObject>> {
        self.state.read().container.upgrade()
    }

    /// True when a parent id is recorded but no live container is linked
    pub fn is_unresolved(&self) -> bool {
        let state = self.state.read();
        state.parent_id.is_some() && state.container.upgrade().is_none()
    }

    /// Attach `child` as a contained object, detaching it from any previous container.
    ///
    /// Returns false (and changes nothing) if the edge would create a cycle.
    pub fn add_child(self: &Arc<Self>, child: &Arc<WorldObject>) -> bool {
        if child.id == self.id || self.has_ancestor(child.id) {
            return false;
        }

        let previous = {
            let mut state = child.state.write();
            let previous = state.container.upgrade();
            state.parent_id = Some(self.id);
            state.container = Arc::downgrade(self);
            previous
        };
        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, self) {
                previous.state.write().children.retain(|c| c.id != child.id);
            }
        }

        let mut state = self.state.write();
        if !state.children.iter().any(|c| c.id == child.id) {
            state.children.push(child.clone());
        }
        true
    }

    /// Detach a direct child, clearing its containment edge
    pub fn remove_child(&self, child_id: ObjectId) -> Option<Arc<WorldObject>> {
        let removed = {
            let mut state = self.state.write();
            let pos = state.children.iter().position(|c| c.id == child_id)?;
            state.children.remove(pos)
        };
        let mut child_state = removed.state.write();
        child_state.parent_id = None;
        child_state.container = Weak::new();
        drop(child_state);
        Some(removed)
    }

    fn has_ancestor(&self, id: ObjectId) -> bool {
        let mut current = self.container();
        while let Some(obj) = current {
            if obj.id == id {
                return true;
            }
            current = obj.container();
        }
        false
    }

    pub fn children(&self) -> Vec<Arc<WorldObject>> {
        self.state.read().children.clone()
    }

    pub fn child_count(&self) -> usize {
        self.state.read().children.len()
    }

    /// Every object below this one, depth first, parents before children
    pub fn descendants(&self) -> Vec<Arc<WorldObject>> {
        let mut out = Vec::new();
        let mut stack: Vec<Arc<WorldObject>> = self.children().into_iter().rev().collect();
        while let Some(obj) = stack.pop() {
            stack.extend(obj.children().into_iter().rev());
            out.push(obj);
        }
        out
    }

    /// Find a contained cell by ordinal (buildings)
    pub fn cell_by_number(&self, number: u32) -> Option<Arc<WorldObject>> {
        self.children()
            .into_iter()
            .find(|c| c.cell_number() == Some(number))
    }

    /// Serializable view for diagnostics and the admin API
    pub fn summary(&self) -> ObjectSummary {
        let state = self.state.read();
        ObjectSummary {
            id: self.id,
            template: self.template.clone(),
            kind: state.variant.kind(),
            planet: state.planet.as_ref().map(|p| p.name().to_string()),
            position: state.position,
            orientation: state.orientation,
            parent_id: state.parent_id,
            children: state.children.iter().map(|c| c.id).collect(),
            in_snapshot: state.in_snapshot,
            custom_name: state.custom_name.clone(),
            has_session: state.session.is_some(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectSummary {
    pub id: ObjectId,
    pub template: String,
    pub kind: ObjectKind,
    pub planet: Option<String>,
    pub position: Point3D,
    pub orientation: Quaternion,
    pub parent_id: Option<ObjectId>,
    pub children: Vec<ObjectId>,
    pub in_snapshot: bool,
    pub custom_name: Option<String>,
    pub has_session: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn test_add_child_links_both_edges() {
        let building = make(1, ObjectKind::Building);
        let cell = make(2, ObjectKind::Cell);

        assert!(building.add_child(&cell));
        assert_eq!(cell.parent_id(), Some(1));
        assert!(Arc::ptr_eq(&cell.container().unwrap(), &building));
        assert_eq!(building.child_count(), 1);

        // Adding twice keeps the set unique
        assert!(building.add_child(&cell));
        assert_eq!(building.child_count(), 1);
    }

    #[test]
    fn test_add_child_moves_between_containers() {
        let a = make(1, ObjectKind::Cell);
        let b = make(2, ObjectKind::Cell);
        let item = make(3, ObjectKind::Tangible);

        a.add_child(&item);
        b.add_child(&item);

        assert_eq!(a.child_count(), 0);
        assert_eq!(b.child_count(), 1);
        assert_eq!(item.parent_id(), Some(2));
    }

    #[test]
    fn test_add_child_rejects_cycles() {
        let a = make(1, ObjectKind::Building);
        let b = make(2, ObjectKind::Cell);
        a.add_child(&b);

        assert!(!b.add_child(&a));
        assert!(!a.add_child(&a));
        assert!(a.parent_id().is_none());
    }

    #[test]
    fn test_unresolved_parent() {
        let item = make(5, ObjectKind::Tangible);
        item.set_parent_id(Some(9));
        assert!(item.is_unresolved());

        let cell = make(9, ObjectKind::Cell);
        cell.add_child(&item);
        assert!(!item.is_unresolved());

        // Zero means root
        item.set_parent_id(Some(0));
        assert_eq!(item.parent_id(), None);
        assert!(!item.is_unresolved());
    }

    #[test]
    fn test_descendants_depth_first() {
        let building = make(1, ObjectKind::Building);
        let cell1 = make(2, ObjectKind::Cell);
        let cell2 = make(3, ObjectKind::Cell);
        let chair = make(4, ObjectKind::Tangible);
        building.add_child(&cell1);
        building.add_child(&cell2);
        cell1.add_child(&chair);

        let ids: Vec<ObjectId> = building.descendants().iter().map(|o| o.id()).collect();
        assert_eq!(ids, vec![2, 4, 3]);
    }

    #[test]
    fn test_remove_child_clears_edge() {
        let cell = make(1, ObjectKind::Cell);
        let item = make(2, ObjectKind::Tangible);
        cell.add_child(&item);

        let removed = cell.remove_child(2).unwrap();
        assert_eq!(removed.id(), 2);
        assert!(item.parent_id().is_none());
        assert!(cell.remove_child(2).is_none());
    }

    #[test]
    fn test_respawn_delay_only_on_tangibles() {
        let chest = make(1, ObjectKind::Tangible);
        assert!(chest.set_respawn_delay(Some(Duration::from_secs(30))));
        assert_eq!(chest.respawn_delay(), Some(Duration::from_secs(30)));

        let zero = make(2, ObjectKind::Weapon);
        zero.set_respawn_delay(Some(Duration::ZERO));
        assert_eq!(zero.respawn_delay(), None);

        let cell = make(3, ObjectKind::Cell);
        assert!(!cell.set_respawn_delay(Some(Duration::from_secs(5))));
        assert_eq!(cell.respawn_delay(), None);
    }

    #[test]
    fn test_cell_by_number() {
        let building = make(1, ObjectKind::Building);
        for (id, n) in [(2, 1), (3, 2)] {
            let cell = make(id, ObjectKind::Cell);
            cell.set_cell_number(n);
            building.add_child(&cell);
        }
        assert_eq!(building.cell_by_number(2).unwrap().id(), 3);
        assert!(building.cell_by_number(3).is_none());
    }

    #[test]
    fn test_quaternion_yaw_roundtrip() {
        let q = Quaternion::IDENTITY.rotate_y(std::f32::consts::FRAC_PI_2);
        assert!((q.yaw() - std::f32::consts::FRAC_PI_2).abs() < 1e-5);
    }

    #[test]
    fn test_variant_serde_tagging() {
        let v = Variant::Cell { cell_number: 3 };
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["kind"], "cell");
        assert_eq!(json["cell_number"], 3);
        let back: Variant = serde_json::from_value(json).unwrap();
        assert_eq!(back, v);
    }
}
