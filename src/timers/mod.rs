//! Timer and delayed execution system
//!
//! Provides the single shared delayed-task facility used by lifecycle:
//! - Destroy: deferred destruction of a resident object
//! - Respawn: re-creation of a destroyed tangible at its old identity
//! - DisconnectLinger: eviction of a creature whose client vanished
//!
//! Timers are in memory only. A task that fires after its object moved on
//! is expected to re-check registry state rather than trust the timer.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::objects::{ObjectId, Planet, Point3D, Quaternion, WorldObject};

/// Handle of a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Everything needed to re-create a destroyed object
#[derive(Debug, Clone)]
pub struct RespawnPlan {
    pub id: ObjectId,
    pub template: String,
    pub planet: Option<Arc<Planet>>,
    pub position: Point3D,
    pub orientation: Quaternion,
    pub server_template: Option<String>,
    pub delay: Duration,
}

/// Work a timer performs when it fires
#[derive(Debug, Clone)]
pub enum TimerAction {
    Destroy(Arc<WorldObject>),
    Respawn(RespawnPlan),
    DisconnectLinger(Arc<WorldObject>),
}

/// A one-shot timer that fires after a delay
#[derive(Debug, Clone)]
pub struct Timer {
    pub id: TaskId,
    /// Object this timer acts on
    pub object_id: ObjectId,
    pub fire_at: Instant,
    pub action: TimerAction,
}

impl Timer {
    pub fn new(object_id: ObjectId, action: TimerAction, delay: Duration) -> Self {
        Self::at(object_id, action, Instant::now() + delay)
    }

    pub fn at(object_id: ObjectId, action: TimerAction, fire_at: Instant) -> Self {
        Self {
            id: TaskId::new(),
            object_id,
            fire_at,
            action,
        }
    }

    pub fn is_due_at(&self, now: Instant) -> bool {
        now >= self.fire_at
    }

    /// Time remaining until fire (zero if already due)
    pub fn time_remaining(&self) -> Duration {
        self.fire_at.saturating_duration_since(Instant::now())
    }
}

/// Result of firing a timer
#[derive(Debug, Clone)]
pub struct TimerFired {
    pub id: TaskId,
    pub object_id: ObjectId,
    pub action: TimerAction,
}

/// Pending one-shot timers
#[derive(Debug, Default)]
pub struct TimerManager {
    timers: RwLock<HashMap<TaskId, Timer>>,
}

impl TimerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Add a one-shot timer
    pub async fn add_timer(&self, timer: Timer) -> TaskId {
        let id = timer.id;
        debug!(task = %id, object_id = timer.object_id, "timer scheduled");
        self.timers.write().await.insert(id, timer);
        id
    }

    /// Schedule `action` against `object_id` after `delay`
    pub async fn schedule(
        &self,
        object_id: ObjectId,
        action: TimerAction,
        delay: Duration,
    ) -> TaskId {
        self.add_timer(Timer::new(object_id, action, delay)).await
    }

    /// Remove a timer by ID
    pub async fn remove_timer(&self, timer_id: TaskId) -> bool {
        self.timers.write().await.remove(&timer_id).is_some()
    }

    pub async fn contains(&self, timer_id: TaskId) -> bool {
        self.timers.read().await.contains_key(&timer_id)
    }

    /// Pending timers acting on an object
    pub async fn timers_for_object(&self, object_id: ObjectId) -> Vec<TaskId> {
        self.timers
            .read()
            .await
            .values()
            .filter(|t| t.object_id == object_id)
            .map(|t| t.id)
            .collect()
    }

    /// Remove and return every timer due now
    pub async fn tick(&self) -> Vec<TimerFired> {
        self.tick_at(Instant::now()).await
    }

    /// Remove and return every timer due at `now`, earliest first
    pub async fn tick_at(&self, now: Instant) -> Vec<TimerFired> {
        let mut due: Vec<Timer> = {
            let mut timers = self.timers.write().await;
            let ids: Vec<TaskId> = timers
                .values()
                .filter(|t| t.is_due_at(now))
                .map(|t| t.id)
                .collect();
            ids.iter().filter_map(|id| timers.remove(id)).collect()
        };
        due.sort_by_key(|t| t.fire_at);

        due.into_iter()
            .map(|t| TimerFired {
                id: t.id,
                object_id: t.object_id,
                action: t.action,
            })
            .collect()
    }

    /// Get count of active timers
    pub async fn timer_count(&self) -> usize {
        self.timers.read().await.len()
    }
}
