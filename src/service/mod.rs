//! The object service: factory, lifecycle, scheduling and session bind
//! over one shared registry

mod bind;
mod factory;
mod lifecycle;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{ObjectError, ObjectResult};
use crate::lua::{SandboxConfig, ScriptHost};
use crate::objects::{
    script_location, Attachment, EntityStore, IdAllocator, ObjectId, ObjectRegistry, Planets,
    ScriptLocation, StoredObject, TemplateTable, WorldObject,
};
use crate::session::{NoopHooks, Session, ZoneInHooks};
use crate::spatial::{NullSpatial, SpatialService};
use crate::timers::{TaskId, TimerManager};

pub use factory::{ObjectSpec, CELL_TEMPLATE};

/// Attachment keys the service reads and writes
pub mod attachments {
    pub const SERVER_TEMPLATE: &str = "custom_server_template";
    pub const DISCONNECT_TASK: &str = "disconnect_task";
    pub const CHILD_OBJECTS: &str = "child_objects";
    pub const CELL_NUMBER: &str = "cell_number";
    pub const BIG_SPAWN_RANGE: &str = "big_spawn_range";
}

/// Point-in-time counters for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub resident: usize,
    pub unresolved_links: usize,
    pub pending_tasks: usize,
    pub pending_respawns: usize,
    pub highest_id: u64,
    pub templates: usize,
}

pub struct ObjectService {
    registry: Arc<ObjectRegistry>,
    store: Arc<EntityStore>,
    ids: IdAllocator,
    templates: Arc<TemplateTable>,
    planets: Arc<Planets>,
    scripts: ScriptHost,
    spatial: Arc<dyn SpatialService>,
    hooks: Arc<dyn ZoneInHooks>,
    timers: Arc<TimerManager>,
    /// At most one pending respawn per destroyed id
    respawns: DashMap<ObjectId, TaskId>,
    /// Serializes session bind against linger eviction, per creature
    bind_locks: DashMap<ObjectId, Arc<Mutex<()>>>,
    disconnect_linger: Duration,
}

pub struct ObjectServiceBuilder {
    store: Arc<EntityStore>,
    templates: TemplateTable,
    planets: Planets,
    scripts_dir: Option<PathBuf>,
    sandbox: SandboxConfig,
    spatial: Arc<dyn SpatialService>,
    hooks: Arc<dyn ZoneInHooks>,
    disconnect_linger: Duration,
}

impl ObjectServiceBuilder {
    pub fn planets(mut self, planets: Planets) -> Self {
        self.planets = planets;
        self
    }

    pub fn scripts(mut self, dir: Option<PathBuf>, sandbox: SandboxConfig) -> Self {
        self.scripts_dir = dir;
        self.sandbox = sandbox;
        self
    }

    pub fn spatial(mut self, spatial: Arc<dyn SpatialService>) -> Self {
        self.spatial = spatial;
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn ZoneInHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn disconnect_linger(mut self, linger: Duration) -> Self {
        self.disconnect_linger = linger;
        self
    }

    /// Seed the id allocator and start the script host.
    ///
    /// Fails with `AllocationExhausted` when the high-water mark is unreadable.
    pub async fn build(self) -> ObjectResult<Arc<ObjectService>> {
        let registry = ObjectRegistry::shared();
        let ids = IdAllocator::seed(self.store.clone()).await?;
        let scripts = ScriptHost::new(self.scripts_dir, self.sandbox, registry.clone())
            .map_err(|e| ObjectError::Store(e.into()))?;

        info!(
            templates = self.templates.len(),
            planets = self.planets.all().len(),
            scripts = ?scripts.root(),
            "object service ready"
        );

        Ok(Arc::new(ObjectService {
            registry,
            store: self.store,
            ids,
            templates: Arc::new(self.templates),
            planets: Arc::new(self.planets),
            scripts,
            spatial: self.spatial,
            hooks: self.hooks,
            timers: TimerManager::shared(),
            respawns: DashMap::new(),
            bind_locks: DashMap::new(),
            disconnect_linger: self.disconnect_linger,
        }))
    }
}

impl ObjectService {
    pub fn builder(store: Arc<EntityStore>, templates: TemplateTable) -> ObjectServiceBuilder {
        ObjectServiceBuilder {
            store,
            templates,
            planets: Planets::new(),
            scripts_dir: None,
            sandbox: SandboxConfig::default(),
            spatial: Arc::new(NullSpatial),
            hooks: Arc::new(NoopHooks),
            disconnect_linger: Duration::from_secs(180),
        }
    }

    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    pub fn templates(&self) -> &TemplateTable {
        &self.templates
    }

    pub fn planets(&self) -> &Planets {
        &self.planets
    }

    pub fn timers(&self) -> &Arc<TimerManager> {
        &self.timers
    }

    pub fn scripts(&self) -> &ScriptHost {
        &self.scripts
    }

    pub fn spatial(&self) -> &Arc<dyn SpatialService> {
        &self.spatial
    }

    pub fn get_object(&self, id: ObjectId) -> Option<Arc<WorldObject>> {
        self.registry.get(id)
    }

    /// Allocate a fresh object id
    pub async fn allocate_id(&self) -> ObjectResult<ObjectId> {
        self.ids.allocate(&self.registry).await
    }

    /// Find an object by exact custom name.
    ///
    /// Misses in memory fall through to a full scan of persisted creatures;
    /// a persisted hit is materialized but not registered.
    pub async fn find_by_custom_name(&self, name: &str) -> ObjectResult<Option<Arc<WorldObject>>> {
        if let Some(obj) = self.registry.find_by_custom_name(name) {
            return Ok(Some(obj));
        }
        let stored = self.store.find_creature_by_custom_name(name).await?;
        Ok(stored.map(|s| s.materialize(&self.planets)))
    }

    /// Load a persisted creature without registering it
    pub async fn creature_from_store(&self, id: ObjectId) -> ObjectResult<Option<Arc<WorldObject>>> {
        let stored = self.store.get_creature(id).await?;
        Ok(stored.map(|s| s.materialize(&self.planets)))
    }

    /// Persist a creature and its owned subtree
    pub async fn persist_creature(&self, creature: &WorldObject) -> ObjectResult<()> {
        self.store
            .put_creature(&StoredObject::capture(creature))
            .await?;
        Ok(())
    }

    /// Persist a building and its cells and contents
    pub async fn persist_building(&self, building: &WorldObject) -> ObjectResult<()> {
        self.store
            .put_building(&StoredObject::capture(building))
            .await?;
        Ok(())
    }

    /// Close every session in `sessions` plus every session attached to a
    /// resident object. Each distinct session is closed once.
    pub fn drain_sessions(&self, sessions: &[Arc<dyn Session>]) -> usize {
        let mut seen = HashSet::new();
        let resident = self.registry.snapshot().into_iter().filter_map(|o| o.session());
        let mut closed = 0;
        for session in sessions.iter().cloned().chain(resident) {
            if seen.insert(session.id()) {
                session.close();
                closed += 1;
            }
        }
        info!(closed, "sessions drained");
        closed
    }

    pub async fn stats(&self) -> ServiceStats {
        ServiceStats {
            resident: self.registry.len(),
            unresolved_links: self.registry.unresolved_count(),
            pending_tasks: self.timers.timer_count().await,
            pending_respawns: self.respawns.len(),
            highest_id: self.ids.highest().await,
            templates: self.templates.len(),
        }
    }

    fn bind_lock(&self, id: ObjectId) -> Arc<Mutex<()>> {
        self.bind_locks.entry(id).or_default().clone()
    }

    /// Drop our handle and forget the lock once nobody else holds or awaits it
    fn release_bind_lock(&self, id: ObjectId, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.bind_locks.remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Behavior script location for an object, honoring its server template override
    fn script_for(&self, obj: &WorldObject) -> Option<ScriptLocation> {
        let server_template = match obj.attachment(attachments::SERVER_TEMPLATE) {
            Some(Attachment::Value(serde_json::Value::String(s))) => Some(s),
            _ => None,
        };
        script_location(obj.template(), server_template.as_deref())
    }

    /// Run a script event if the object's script defines it
    fn run_script(&self, obj: &Arc<WorldObject>, event: &str, args: &[&Arc<WorldObject>]) -> bool {
        match self.script_for(obj) {
            Some(location) => self.scripts.invoke_logged(&location, event, args),
            None => false,
        }
    }
}
