//! Attaching persisted creatures to client sessions

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::lifecycle::player_ghost;
use super::{attachments, ObjectService};
use crate::error::{ObjectError, ObjectResult};
use crate::objects::{Attachment, ObjectId, Variant, WorldObject};
use crate::session::{SelectCharacter, Session};

/// Presence name: the lowercase first word of a custom name
fn short_name(custom_name: &str) -> String {
    custom_name
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

impl ObjectService {
    /// Decode a SelectCharacter handshake and bind the named creature
    pub async fn handle_select_character(
        &self,
        session: Arc<dyn Session>,
        payload: &[u8],
    ) -> ObjectResult<Arc<WorldObject>> {
        let message =
            SelectCharacter::decode(payload).map_err(|e| ObjectError::Dataset(e.to_string()))?;
        self.bind_session(session, message.character_id).await
    }

    /// Attach a creature to a newly authenticated session.
    ///
    /// A creature that is not resident is loaded from the durable store.
    /// Any pending disconnect linger is cancelled, the creature's subtree is
    /// registered and linked, and the zone-in collaborators are notified.
    pub async fn bind_session(
        &self,
        session: Arc<dyn Session>,
        creature_id: ObjectId,
    ) -> ObjectResult<Arc<WorldObject>> {
        let lock = self.bind_lock(creature_id);
        let bound = {
            let _guard = lock.lock().await;
            self.bind_locked(session, creature_id).await
        };
        self.release_bind_lock(creature_id, lock);
        bound
    }

    async fn bind_locked(
        &self,
        session: Arc<dyn Session>,
        creature_id: ObjectId,
    ) -> ObjectResult<Arc<WorldObject>> {
        let creature = match self.registry.get(creature_id) {
            Some(creature) => creature,
            None => self
                .creature_from_store(creature_id)
                .await?
                .ok_or(ObjectError::NotFound(creature_id))?,
        };

        if let Some(Attachment::Task(task)) = creature.take_attachment(attachments::DISCONNECT_TASK) {
            self.timers.remove_timer(task).await;
            debug!(object_id = creature_id, %task, "disconnect linger cancelled");
        }

        if let Some(previous) = creature.session() {
            if previous.id() != session.id() {
                previous.close();
            }
        }
        creature.set_session(Some(session.clone()));

        self.registry.put_subtree(&creature);
        self.registry.resolve_links();

        if let Some(parent_id) = creature.parent_id() {
            if creature.container().is_none() {
                match self.registry.get(parent_id) {
                    Some(parent) => {
                        parent.add_child(&creature);
                    }
                    None => warn!(
                        error = %ObjectError::UnresolvedParent { object_id: creature_id, parent_id },
                        "creature bound outside its container"
                    ),
                }
            }
        }

        self.zone_in(&session, &creature);
        info!(object_id = creature_id, session = %session.id(), "creature bound to session");
        Ok(creature)
    }

    fn zone_in(&self, session: &Arc<dyn Session>, creature: &Arc<WorldObject>) {
        self.hooks.clear_buffs(creature);
        self.hooks.load_mail_headers(session, creature);
        self.spatial.handle_zone_in(session, creature);

        if let Some(ghost) = player_ghost(creature) {
            let friends = ghost.with_variant(|v| match v {
                Variant::Player { link_dead, friends } => {
                    *link_dead = false;
                    friends.clone()
                }
                _ => Vec::new(),
            });

            if let Some(name) = creature.custom_name() {
                self.hooks.player_status_change(&short_name(&name), true);
            }
            for friend in &friends {
                let online = self.hooks.is_online(friend);
                self.hooks.send_friend_status(session, friend, online);
            }
        }

        self.hooks.post_zone_in(session, creature);
    }
}
