//! World bulk loading: persisted buildings, snapshots and buildout tables
//!
//! Each path is idempotent. Objects already resident are skipped, so a
//! planet can be loaded again without duplicating placements.

mod buildout;
mod datatable;
mod snapshot;

use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ObjectError, ObjectResult};
use crate::objects::{classify, Attachment, ObjectId, ObjectKind, Planet, WorldObject};
use crate::service::{attachments, ObjectService, ObjectSpec};

pub use buildout::{read_areas, BuildoutArea, BuildoutRow, Layout, BIG_SPAWN_RADIUS};
pub use datatable::Datatable;
pub use snapshot::{SnapshotRecord, WorldSnapshot};

/// Counters for one load pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub created: usize,
    /// Rows whose object is already resident
    pub skipped: usize,
    /// Rows that could not be parsed or constructed
    pub failed: usize,
    /// Objects left without their container after the pass
    pub unresolved: usize,
}

impl AddAssign for LoadReport {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.unresolved += other.unresolved;
    }
}

/// How a buildout row was remembered between loads
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    /// Rows with their own object id
    Id(ObjectId),
    /// Id-less rows, by position in their area table
    Row {
        planet: u32,
        area: String,
        index: usize,
    },
}

enum Placement {
    Created(Arc<WorldObject>),
    Resident,
}

pub struct WorldLoader {
    service: Arc<ObjectService>,
    data_dir: PathBuf,
    /// Buildout row -> id of the object created for it
    aliases: DashMap<RowKey, ObjectId>,
}

impl WorldLoader {
    pub fn new(service: Arc<ObjectService>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            service,
            data_dir: data_dir.into(),
            aliases: DashMap::new(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn snapshot_path(&self, planet: &Planet) -> PathBuf {
        self.data_dir
            .join("snapshot")
            .join(format!("{}.ws", planet.name()))
    }

    pub fn areas_path(&self, planet: &Planet) -> PathBuf {
        self.data_dir
            .join("datatables/buildout")
            .join(format!("areas_{}.tab", planet.name()))
    }

    pub fn area_path(&self, planet: &Planet, area: &str) -> PathBuf {
        self.data_dir
            .join("datatables/buildout")
            .join(planet.name())
            .join(format!("{}.tab", area))
    }

    /// Load everything known for a planet: persisted buildings, then the
    /// snapshot, then buildout. Missing dataset files are skipped.
    pub async fn load_planet(&self, planet: &Arc<Planet>) -> ObjectResult<LoadReport> {
        let mut report = self.load_buildings(Some(planet)).await?;

        if self.snapshot_path(planet).exists() {
            report += self.load_snapshot(planet).await?;
        } else {
            debug!(planet = planet.name(), "no snapshot");
        }

        if self.areas_path(planet).exists() {
            report += self.load_buildout(planet).await?;
        } else {
            debug!(planet = planet.name(), "no buildout index");
        }

        report.unresolved = self.service.registry().unresolved_count();
        if report.unresolved > 0 {
            warn!(
                planet = planet.name(),
                unresolved = report.unresolved,
                "objects left without their container"
            );
        }
        info!(
            planet = planet.name(),
            created = report.created,
            skipped = report.skipped,
            failed = report.failed,
            "planet loaded"
        );
        Ok(report)
    }

    /// Register every persisted building (all planets when `planet` is None)
    /// together with its stored cells and contents.
    pub async fn load_buildings(&self, planet: Option<&Arc<Planet>>) -> ObjectResult<LoadReport> {
        let registry = self.service.registry();
        let mut report = LoadReport::default();

        for stored in self.service.store().buildings(planet.map(|p| p.id())).await? {
            if registry.contains(stored.id) {
                report.skipped += 1;
                continue;
            }
            let building = stored.materialize(self.service.planets());
            registry.put_subtree(&building);
            self.service.add_object_to_scene(&building);
            report.created += 1;
        }

        info!(
            planet = ?planet.map(|p| p.name()),
            created = report.created,
            skipped = report.skipped,
            "persisted buildings loaded"
        );
        Ok(report)
    }

    pub async fn load_snapshot(&self, planet: &Arc<Planet>) -> ObjectResult<LoadReport> {
        let path = self.snapshot_path(planet);
        let snapshot = WorldSnapshot::load(&path)?;
        self.load_snapshot_records(planet, &snapshot).await
    }

    /// Construct every record, then link parents in a second pass so
    /// records may precede the containers they reference.
    pub async fn load_snapshot_records(
        &self,
        planet: &Arc<Planet>,
        snapshot: &WorldSnapshot,
    ) -> ObjectResult<LoadReport> {
        let registry = self.service.registry();
        let mut report = LoadReport::default();

        for record in &snapshot.records {
            if registry.contains(record.id) {
                debug!(error = %ObjectError::DuplicatePlacement(record.id), "snapshot record skipped");
                report.skipped += 1;
                continue;
            }
            let Some(template) = snapshot.name(record.name_id) else {
                warn!(
                    object_id = record.id,
                    name_id = record.name_id,
                    "snapshot record names no template"
                );
                report.failed += 1;
                continue;
            };

            let spec = ObjectSpec::new(template)
                .with_id(record.id)
                .on(Some(planet.clone()))
                .at(record.position)
                .facing(record.orientation);
            match self.service.create_object(spec).await {
                Ok(obj) => {
                    obj.set_parent_id(Some(record.parent_id));
                    if obj.kind() == ObjectKind::Cell {
                        obj.set_cell_number(record.cell_number);
                    }
                    report.created += 1;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(object_id = record.id, template, error = %e, "snapshot record failed");
                    report.failed += 1;
                }
            }
        }

        let links = registry.resolve_links();
        report.unresolved = links.unresolved;
        if links.unresolved > 0 {
            warn!(
                planet = planet.name(),
                unresolved = links.unresolved,
                "snapshot parents missing after link pass"
            );
        }
        info!(
            planet = planet.name(),
            created = report.created,
            skipped = report.skipped,
            linked = links.linked,
            "snapshot loaded"
        );
        Ok(report)
    }

    /// Load every area in the planet's buildout index
    pub async fn load_buildout(&self, planet: &Arc<Planet>) -> ObjectResult<LoadReport> {
        let index = Datatable::load(&self.areas_path(planet))?;
        let mut report = LoadReport::default();

        for area in read_areas(&index) {
            let area = match area {
                Ok(area) => area,
                Err(e) => {
                    warn!(planet = planet.name(), error = %e, "bad buildout area row");
                    report.failed += 1;
                    continue;
                }
            };
            let path = self.area_path(planet, &area.name);
            let table = match Datatable::load(&path) {
                Ok(table) => table,
                Err(e) => {
                    warn!(planet = planet.name(), area = %area.name, error = %e, "buildout area unreadable");
                    report.failed += 1;
                    continue;
                }
            };
            match self.load_buildout_area(planet, &area, &table).await {
                Ok(area_report) => report += area_report,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(planet = planet.name(), area = %area.name, error = %e, "buildout area skipped");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Place one area table.
    ///
    /// Root and static rows are placed in row order. Contained rows follow,
    /// retried while each pass resolves more containers; rows whose
    /// container never appears are reported as unresolved and not built.
    pub async fn load_buildout_area(
        &self,
        planet: &Arc<Planet>,
        area: &BuildoutArea,
        table: &Datatable,
    ) -> ObjectResult<LoadReport> {
        let layout = Layout::detect(table.column_count())?;
        let mut report = LoadReport::default();
        let mut buildings = Vec::new();
        let mut contained = Vec::new();

        for index in 0..table.row_count() {
            let row = match BuildoutRow::parse(table, index, layout) {
                Ok(row) => row,
                Err(e) => {
                    warn!(area = %area.name, row = index, error = %e, "bad buildout row");
                    report.failed += 1;
                    continue;
                }
            };
            if row.is_contained() {
                contained.push((index, row));
                continue;
            }

            let placed = if row.is_root() {
                self.place_root(planet, area, &row).await
            } else {
                self.place_static(planet, area, index, &row).await
            };
            match placed {
                Ok(Placement::Created(obj)) => {
                    if row.has_portal() && obj.kind() == ObjectKind::Building {
                        buildings.push(obj);
                    }
                    report.created += 1;
                }
                Ok(Placement::Resident) => report.skipped += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(area = %area.name, row = index, error = %e, "buildout row failed");
                    report.failed += 1;
                }
            }
        }

        loop {
            let before = contained.len();
            let mut deferred = Vec::new();
            for (index, row) in contained {
                match self.place_contained(planet, area, index, &row).await {
                    Ok(Placement::Created(_)) => report.created += 1,
                    Ok(Placement::Resident) => report.skipped += 1,
                    Err(ObjectError::UnresolvedParent { .. }) => deferred.push((index, row)),
                    Err(ObjectError::DuplicatePlacement(cell)) => {
                        debug!(area = %area.name, row = index, cell, "cell already present");
                        report.skipped += 1;
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(area = %area.name, row = index, error = %e, "buildout row failed");
                        report.failed += 1;
                    }
                }
            }
            contained = deferred;
            if contained.is_empty() || contained.len() == before {
                break;
            }
        }
        for (index, row) in &contained {
            let error = ObjectError::UnresolvedParent {
                object_id: row.object_id,
                parent_id: row.container_id,
            };
            warn!(area = %area.name, row = index, %error, "buildout row not placed");
            report.unresolved += 1;
        }

        for building in &buildings {
            if let Err(e) = self.service.persist_building(building).await {
                warn!(object_id = building.id(), error = %e, "failed to persist buildout building");
            }
        }

        debug!(
            planet = planet.name(),
            area = %area.name,
            created = report.created,
            skipped = report.skipped,
            failed = report.failed,
            "buildout area loaded"
        );
        Ok(report)
    }

    fn template_for(&self, crc: u32) -> ObjectResult<String> {
        self.service
            .templates()
            .template_for_crc(crc)
            .map(str::to_string)
            .ok_or_else(|| ObjectError::InvalidTemplate(format!("crc {:#010x}", crc)))
    }

    async fn place_root(
        &self,
        planet: &Arc<Planet>,
        area: &BuildoutArea,
        row: &BuildoutRow,
    ) -> ObjectResult<Placement> {
        if self.service.registry().contains(row.object_id) {
            return Ok(Placement::Resident);
        }
        let template = self.template_for(row.template_crc)?;
        let spec = ObjectSpec::new(&template)
            .with_id(row.object_id)
            .on(Some(planet.clone()))
            .at(area.offset(row.position))
            .facing(row.orientation)
            .override_snapshot(row.has_portal());
        let obj = self.service.create_object(spec).await?;
        self.finish_placement(&obj, row);
        self.aliases.insert(RowKey::Id(row.object_id), obj.id());
        Ok(Placement::Created(obj))
    }

    async fn place_static(
        &self,
        planet: &Arc<Planet>,
        area: &BuildoutArea,
        index: usize,
        row: &BuildoutRow,
    ) -> ObjectResult<Placement> {
        let key = RowKey::Row {
            planet: planet.id(),
            area: area.name.clone(),
            index,
        };
        if self.alias_resident(&key) {
            return Ok(Placement::Resident);
        }
        let template = self.template_for(row.template_crc)?;
        let spec = ObjectSpec::new(&template)
            .on(Some(planet.clone()))
            .at(area.offset(row.position))
            .facing(row.orientation);
        let obj = self.service.create_object(spec).await?;
        self.finish_placement(&obj, row);
        self.aliases.insert(key, obj.id());
        Ok(Placement::Created(obj))
    }

    async fn place_contained(
        &self,
        planet: &Arc<Planet>,
        area: &BuildoutArea,
        index: usize,
        row: &BuildoutRow,
    ) -> ObjectResult<Placement> {
        let key = if row.object_id != 0 {
            RowKey::Id(row.object_id)
        } else {
            RowKey::Row {
                planet: planet.id(),
                area: area.name.clone(),
                index,
            }
        };
        if self.alias_resident(&key) {
            return Ok(Placement::Resident);
        }

        let container = self
            .resolve_container(row.container_id)
            .ok_or(ObjectError::UnresolvedParent {
                object_id: row.object_id,
                parent_id: row.container_id,
            })?;
        let template = self.template_for(row.template_crc)?;
        let kind = classify(&template).ok_or_else(|| ObjectError::UnknownVariant(template.clone()))?;

        let into_building = container.kind() == ObjectKind::Building && row.cell_index != 0;
        if kind == ObjectKind::Cell && into_building {
            if let Some(existing) = container.cell_by_number(row.cell_index) {
                // Later rows naming this cell still find it
                self.aliases.insert(key, existing.id());
                return Err(ObjectError::DuplicatePlacement(existing.id()));
            }
        }
        let target = if kind != ObjectKind::Cell && into_building {
            container.cell_by_number(row.cell_index).unwrap_or(container)
        } else {
            container
        };
        // Contents restored with a persisted building carry fresh ids
        if let Some(existing) = target
            .children()
            .into_iter()
            .find(|c| c.template() == template && c.position() == row.position)
        {
            self.aliases.insert(key, existing.id());
            return Ok(Placement::Resident);
        }

        // Contained positions are local to the container
        let spec = ObjectSpec::new(&template)
            .on(Some(planet.clone()))
            .at(row.position)
            .facing(row.orientation);
        let obj = self.service.create_object(spec).await?;
        if kind == ObjectKind::Cell {
            obj.set_cell_number(row.cell_index);
            if let Err(e) = self.service.attach_cell(&target, &obj) {
                self.service.destroy_object(&obj).await?;
                return Err(e);
            }
        } else {
            target.add_child(&obj);
        }
        if row.big_spawn_range() {
            obj.set_attachment(attachments::BIG_SPAWN_RANGE, Attachment::Value(true.into()));
        }
        self.aliases.insert(key, obj.id());
        Ok(Placement::Created(obj))
    }

    fn finish_placement(&self, obj: &Arc<WorldObject>, row: &BuildoutRow) {
        if row.big_spawn_range() {
            obj.set_attachment(attachments::BIG_SPAWN_RANGE, Attachment::Value(true.into()));
        }
        self.service.add_object_to_scene(obj);
    }

    fn alias_resident(&self, key: &RowKey) -> bool {
        self.aliases
            .get(key)
            .map(|id| self.service.registry().contains(*id))
            .unwrap_or(false)
    }

    /// Containers named by a buildout row id resolve through the alias map first
    fn resolve_container(&self, container_id: ObjectId) -> Option<Arc<WorldObject>> {
        let registry = self.service.registry();
        self.aliases
            .get(&RowKey::Id(container_id))
            .and_then(|id| registry.get(*id))
            .or_else(|| registry.get(container_id))
    }
}
