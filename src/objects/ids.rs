//! Durable, monotonically increasing object id allocation

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{EntityStore, ObjectId, ObjectRegistry};
use crate::error::{ObjectError, ObjectResult};

/// Hands out ids that are unique across the live registry and the durable store.
///
/// The high-water mark is persisted before an id is returned, so a crash
/// after allocation never lets a restarted process reissue it.
pub struct IdAllocator {
    highest: Mutex<u64>,
    store: Arc<EntityStore>,
}

impl IdAllocator {
    /// Seed the counter from the durable high-water mark
    pub async fn seed(store: Arc<EntityStore>) -> ObjectResult<Self> {
        let highest = store
            .read_max()
            .await
            .map_err(ObjectError::AllocationExhausted)?;
        info!(highest, "id allocator seeded");
        Ok(Self {
            highest: Mutex::new(highest),
            store,
        })
    }

    /// Current high-water mark
    pub async fn highest(&self) -> u64 {
        *self.highest.lock().await
    }

    /// Allocate a fresh id, skipping any that are already resident or persisted
    pub async fn allocate(&self, registry: &ObjectRegistry) -> ObjectResult<ObjectId> {
        loop {
            let candidate = {
                let mut highest = self.highest.lock().await;
                let next = *highest + 1;
                self.store
                    .write_max(next)
                    .await
                    .map_err(ObjectError::AllocationExhausted)?;
                *highest = next;
                next
            };

            if registry.contains(candidate) {
                warn!(object_id = candidate, "allocated id already resident, retrying");
                continue;
            }
            if self.store.contains_id(candidate).await? {
                warn!(object_id = candidate, "allocated id already persisted, retrying");
                continue;
            }
            return Ok(candidate);
        }
    }
}
