//! Destruction, respawn, disconnect linger and the background scheduler

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{attachments, ObjectService, ObjectSpec};
use crate::error::ObjectResult;
use crate::objects::{Attachment, ObjectId, ObjectKind, Variant, WorldObject};
use crate::timers::{RespawnPlan, TaskId, Timer, TimerAction, TimerFired};

impl ObjectService {
    /// Destroy a resident object and its whole containment subtree.
    ///
    /// A tangible with a respawn delay is scheduled for re-creation first.
    /// Durable records of snapshot-sourced objects and of buildings are
    /// removed unless a respawn is pending; a persisted character outlives
    /// its live object. Destroying an object that is no longer resident is
    /// a no-op.
    pub async fn destroy_object(&self, obj: &Arc<WorldObject>) -> ObjectResult<()> {
        let id = obj.id();
        match self.registry.get(id) {
            Some(resident) if Arc::ptr_eq(&resident, obj) => {}
            _ => {
                debug!(object_id = id, "destroy of non-resident object ignored");
                return Ok(());
            }
        }

        if obj.kind().is_tangible() {
            if let Some(delay) = obj.respawn_delay() {
                self.schedule_respawn(obj, delay).await;
            }
        }

        self.run_script(obj, "destroy", &[obj]);

        if let Some(container) = obj.container() {
            container.remove_child(id);
        }
        self.spatial.remove(obj);
        let removed = self.registry.remove_subtree(obj);

        let placement = obj.in_snapshot() || obj.kind() == ObjectKind::Building;
        if placement && !self.respawns.contains_key(&id) {
            self.store.delete_entity(id).await?;
        }
        debug!(object_id = id, removed, "object destroyed");
        Ok(())
    }

    /// Destroy `obj` after `delay` on the shared scheduler
    pub async fn destroy_after(&self, obj: &Arc<WorldObject>, delay: Duration) -> TaskId {
        self.timers
            .schedule(obj.id(), TimerAction::Destroy(obj.clone()), delay)
            .await
    }

    /// Destroy by id; unknown ids are ignored
    pub async fn destroy_by_id(&self, id: ObjectId) -> ObjectResult<()> {
        match self.registry.get(id) {
            Some(obj) => self.destroy_object(&obj).await,
            None => Ok(()),
        }
    }

    async fn schedule_respawn(&self, obj: &Arc<WorldObject>, delay: Duration) {
        let server_template = match obj.attachment(attachments::SERVER_TEMPLATE) {
            Some(Attachment::Value(serde_json::Value::String(s))) => Some(s),
            _ => None,
        };
        let plan = RespawnPlan {
            id: obj.id(),
            template: obj.template().to_string(),
            planet: obj.planet(),
            position: obj.position(),
            orientation: obj.orientation(),
            server_template,
            delay,
        };
        let timer = Timer::new(obj.id(), TimerAction::Respawn(plan), delay);

        let reserved = match self.respawns.entry(obj.id()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(timer.id);
                true
            }
        };
        if reserved {
            debug!(object_id = obj.id(), ?delay, "respawn scheduled");
            self.timers.add_timer(timer).await;
        } else {
            debug!(object_id = obj.id(), "respawn already pending");
        }
    }

    /// Cancel a pending respawn. A respawn that fires after this is a no-op.
    pub async fn cancel_respawn(&self, id: ObjectId) -> bool {
        match self.respawns.remove(&id) {
            Some((_, task)) => {
                self.timers.remove_timer(task).await;
                true
            }
            None => false,
        }
    }

    pub fn respawn_pending(&self, id: ObjectId) -> bool {
        self.respawns.contains_key(&id)
    }

    async fn respawn(&self, task: TaskId, plan: RespawnPlan) {
        // Cancelled or superseded tasks no longer own the slot
        if self
            .respawns
            .remove_if(&plan.id, |_, pending| *pending == task)
            .is_none()
        {
            debug!(object_id = plan.id, "stale respawn ignored");
            return;
        }
        if self.registry.contains(plan.id) {
            debug!(object_id = plan.id, "respawn skipped, id already resident");
            return;
        }

        let spec = ObjectSpec::new(&plan.template)
            .with_id(plan.id)
            .on(plan.planet)
            .at(plan.position)
            .facing(plan.orientation)
            .server_template(plan.server_template);
        match self.create_object(spec).await {
            Ok(obj) => {
                if obj.respawn_delay().is_none() {
                    obj.set_respawn_delay(Some(plan.delay));
                }
                self.add_object_to_scene(&obj);
                debug!(object_id = plan.id, "object respawned");
            }
            Err(e) => warn!(object_id = plan.id, error = %e, "respawn failed"),
        }
    }

    /// Mark a creature's client as gone and evict it after the linger delay
    /// unless a session bind reclaims it first.
    pub async fn schedule_disconnect_linger(&self, creature: &Arc<WorldObject>) -> TaskId {
        if let Some(ghost) = player_ghost(creature) {
            ghost.with_variant(|v| {
                if let Variant::Player { link_dead, .. } = v {
                    *link_dead = true;
                }
            });
        }
        creature.take_session();

        if let Some(Attachment::Task(previous)) = creature.take_attachment(attachments::DISCONNECT_TASK) {
            self.timers.remove_timer(previous).await;
        }
        let task = self
            .timers
            .schedule(
                creature.id(),
                TimerAction::DisconnectLinger(creature.clone()),
                self.disconnect_linger,
            )
            .await;
        creature.set_attachment(attachments::DISCONNECT_TASK, Attachment::Task(task));
        debug!(object_id = creature.id(), %task, "disconnect linger scheduled");
        task
    }

    async fn linger_expired(&self, task: TaskId, creature: Arc<WorldObject>) {
        if !still_lingering(&creature, task) {
            debug!(object_id = creature.id(), "linger cancelled, nothing to do");
            return;
        }
        if let Err(e) = self.persist_creature(&creature).await {
            error!(object_id = creature.id(), error = %e, "failed to persist lingering creature");
        }

        let lock = self.bind_lock(creature.id());
        {
            let _guard = lock.lock().await;
            // A bind may have reclaimed the creature while the persist ran
            if still_lingering(&creature, task) {
                creature.take_attachment(attachments::DISCONNECT_TASK);
                if let Some(container) = creature.container() {
                    container.remove_child(creature.id());
                }
                self.spatial.remove(&creature);
                let removed = self.registry.remove_subtree(&creature);
                debug!(object_id = creature.id(), removed, "lingering creature evicted");
            } else {
                debug!(object_id = creature.id(), "creature rebound during linger");
            }
        }
        self.release_bind_lock(creature.id(), lock);
    }

    /// Run a fired timer's action
    async fn run_task(&self, fired: TimerFired) {
        match fired.action {
            TimerAction::Destroy(obj) => {
                if let Err(e) = self.destroy_object(&obj).await {
                    warn!(object_id = fired.object_id, error = %e, "deferred destroy failed");
                }
            }
            TimerAction::Respawn(plan) => self.respawn(fired.id, plan).await,
            TimerAction::DisconnectLinger(creature) => self.linger_expired(fired.id, creature).await,
        }
    }

    /// Run every task due now
    pub async fn run_due_tasks(&self) -> usize {
        self.run_due_tasks_at(Instant::now()).await
    }

    /// Run every task due at `now`, earliest first
    pub async fn run_due_tasks_at(&self, now: Instant) -> usize {
        let fired = self.timers.tick_at(now).await;
        let count = fired.len();
        for task in fired {
            self.run_task(task).await;
        }
        count
    }

    /// Drive scheduled tasks until shutdown is signalled
    pub async fn run_scheduler(self: Arc<Self>, tick: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(?tick, "scheduler started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_due_tasks().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("scheduler stopped");
    }

    /// Invoke the object's `use` handler, falling back to `useObject`
    pub fn use_object(&self, actor: &Arc<WorldObject>, object: &Arc<WorldObject>) -> bool {
        let Some(location) = self.script_for(object) else {
            return false;
        };
        let event = if self.scripts.handler(&location, "use").is_some() {
            "use"
        } else {
            "useObject"
        };
        self.scripts.invoke_logged(&location, event, &[actor, object])
    }

    /// Number of objects anywhere inside `container`
    pub fn objects_in_container(&self, container: &WorldObject) -> usize {
        container.descendants().len()
    }
}

/// True while `task` is the creature's pending linger and no session has reclaimed it
fn still_lingering(creature: &WorldObject, task: TaskId) -> bool {
    creature.session().is_none()
        && matches!(
            creature.attachment(attachments::DISCONNECT_TASK),
            Some(Attachment::Task(current)) if current == task
        )
}

/// The player object slotted under a creature, if any
pub(super) fn player_ghost(creature: &WorldObject) -> Option<Arc<WorldObject>> {
    creature
        .children()
        .into_iter()
        .find(|c| c.kind() == ObjectKind::Player)
}
