//! Object construction

use std::sync::Arc;

use tracing::debug;

use super::{attachments, ObjectService};
use crate::error::{ObjectError, ObjectResult};
use crate::objects::{
    classify, Attachment, ObjectId, ObjectKind, Planet, Point3D, Quaternion, Variant, WorldObject,
};

pub const CELL_TEMPLATE: &str = "object/cell/shared_cell.iff";

/// Parameters for [`ObjectService::create_object`]
#[derive(Debug, Clone)]
pub struct ObjectSpec {
    pub template: String,
    /// 0 allocates a fresh id
    pub id: ObjectId,
    pub planet: Option<Arc<Planet>>,
    pub position: Point3D,
    pub orientation: Quaternion,
    /// Script name used instead of the template's own
    pub server_template: Option<String>,
    /// With an explicit id, treat the object as authoritative rather than snapshot-sourced
    pub override_snapshot: bool,
}

impl ObjectSpec {
    pub fn new(template: &str) -> Self {
        Self {
            template: template.to_string(),
            id: 0,
            planet: None,
            position: Point3D::ORIGIN,
            orientation: Quaternion::IDENTITY,
            server_template: None,
            override_snapshot: false,
        }
    }

    pub fn with_id(mut self, id: ObjectId) -> Self {
        self.id = id;
        self
    }

    pub fn on(mut self, planet: Option<Arc<Planet>>) -> Self {
        self.planet = planet;
        self
    }

    pub fn at(mut self, position: Point3D) -> Self {
        self.position = position;
        self
    }

    pub fn facing(mut self, orientation: Quaternion) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn server_template(mut self, name: Option<String>) -> Self {
        self.server_template = name;
        self
    }

    pub fn override_snapshot(mut self, value: bool) -> Self {
        self.override_snapshot = value;
        self
    }
}

impl ObjectService {
    /// Validate, construct, run setup and register an object.
    ///
    /// Nothing is registered unless construction succeeds; a fresh building
    /// with portal data is registered together with its interior cells.
    pub async fn create_object(&self, spec: ObjectSpec) -> ObjectResult<Arc<WorldObject>> {
        let Some(info) = self.templates.get(&spec.template) else {
            return Err(ObjectError::InvalidTemplate(spec.template));
        };
        let portal_cells = info.portal_cells;
        let Some(kind) = classify(&spec.template) else {
            return Err(ObjectError::UnknownVariant(spec.template));
        };

        let (id, in_snapshot) = if spec.id == 0 {
            (self.allocate_id().await?, false)
        } else {
            (spec.id, !spec.override_snapshot)
        };

        let obj = Arc::new(WorldObject::new(
            id,
            &spec.template,
            Variant::new(kind),
            spec.planet.clone(),
            spec.position,
            spec.orientation,
        ));
        obj.set_in_snapshot(in_snapshot);

        if kind == ObjectKind::Building && !in_snapshot && !spec.override_snapshot {
            // Index 0 is the exterior pathing cell and is never materialized
            let count = portal_cells.unwrap_or(0).saturating_sub(1);
            for number in 1..=count {
                let cell = self.new_cell(spec.planet.clone(), number).await?;
                obj.add_child(&cell);
            }
        }

        if let Some(name) = &spec.server_template {
            obj.set_attachment(
                attachments::SERVER_TEMPLATE,
                Attachment::Value(serde_json::Value::String(name.clone())),
            );
        }
        self.run_script(&obj, "setup", &[&obj]);

        self.registry.put_subtree(&obj);
        debug!(
            object_id = id,
            template = %spec.template,
            planet = ?spec.planet.as_ref().map(|p| p.name()),
            "object created"
        );
        Ok(obj)
    }

    async fn new_cell(&self, planet: Option<Arc<Planet>>, number: u32) -> ObjectResult<Arc<WorldObject>> {
        let id = self.allocate_id().await?;
        let cell = Arc::new(WorldObject::new(
            id,
            CELL_TEMPLATE,
            Variant::Cell { cell_number: number },
            planet,
            Point3D::ORIGIN,
            Quaternion::IDENTITY,
        ));
        self.run_script(&cell, "setup", &[&cell]);
        Ok(cell)
    }

    /// Create an object placed relative to `parent`.
    ///
    /// Without a cell number the offset is rotated by the parent's heading
    /// and translated by its position. The child is recorded in the parent's
    /// `child_objects` attachment.
    pub async fn create_child_object(
        &self,
        parent: &Arc<WorldObject>,
        template: &str,
        offset: Point3D,
        orientation: Quaternion,
        cell_number: Option<u32>,
    ) -> ObjectResult<Arc<WorldObject>> {
        let (position, orientation) = match cell_number {
            Some(_) => (offset, orientation),
            None => {
                let radians = parent.orientation().yaw();
                let origin = parent.position();
                let (sin, cos) = radians.sin_cos();
                let position = Point3D::new(
                    cos * offset.x + sin * offset.z + origin.x,
                    offset.y + origin.y,
                    cos * offset.z - sin * offset.x + origin.z,
                );
                (position, orientation.rotate_y(radians))
            }
        };

        let child = self
            .create_object(
                ObjectSpec::new(template)
                    .on(parent.planet())
                    .at(position)
                    .facing(orientation),
            )
            .await?;

        let mut children = match parent.attachment(attachments::CHILD_OBJECTS) {
            Some(Attachment::Objects(ids)) => ids,
            _ => Vec::new(),
        };
        children.push(child.id());
        parent.set_attachment(attachments::CHILD_OBJECTS, Attachment::Objects(children));

        if let Some(number) = cell_number {
            child.set_attachment(attachments::CELL_NUMBER, Attachment::Value(number.into()));
        }
        Ok(child)
    }

    /// Attach `cell` to `building`.
    ///
    /// A building only takes cells numbered `1..portal_cells` from its
    /// template's portal data; anything else is `InvalidCell`. A building
    /// already holding a different cell with the same number rejects it
    /// with `DuplicatePlacement` carrying the existing cell's id.
    pub fn attach_cell(&self, building: &Arc<WorldObject>, cell: &Arc<WorldObject>) -> ObjectResult<()> {
        let number = cell.cell_number().unwrap_or(0);
        if building.kind() == ObjectKind::Building {
            let slots = self
                .templates
                .get(building.template())
                .and_then(|info| info.portal_cells)
                .unwrap_or(0)
                .saturating_sub(1);
            if number == 0 || number > slots {
                return Err(ObjectError::InvalidCell {
                    building: building.id(),
                    cell_number: number,
                });
            }
        }
        if let Some(existing) = cell.cell_number().and_then(|n| building.cell_by_number(n)) {
            if existing.id() != cell.id() {
                return Err(ObjectError::DuplicatePlacement(existing.id()));
            }
        }
        building.add_child(cell);
        Ok(())
    }

    /// Notify the spatial service of an object's placement
    pub fn add_object_to_scene(&self, obj: &Arc<WorldObject>) {
        let position = obj.position();
        self.spatial.add(obj, position.x, position.z);
    }
}
