//! Zone-in hand-offs to subsystems outside the object core

use std::sync::Arc;

use super::Session;
use crate::objects::WorldObject;

/// Collaborators notified when a creature is bound to a session.
///
/// Every method defaults to a no-op so a deployment can wire only the
/// subsystems it has.
pub trait ZoneInHooks: Send + Sync {
    fn clear_buffs(&self, _creature: &Arc<WorldObject>) {}

    fn load_mail_headers(&self, _session: &Arc<dyn Session>, _creature: &Arc<WorldObject>) {}

    /// Chat presence, keyed by the lowercase first name
    fn player_status_change(&self, _name: &str, _online: bool) {}

    fn is_online(&self, _name: &str) -> bool {
        false
    }

    fn send_friend_status(&self, _session: &Arc<dyn Session>, _friend: &str, _online: bool) {}

    fn post_zone_in(&self, _session: &Arc<dyn Session>, _creature: &Arc<WorldObject>) {}
}

/// Hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl ZoneInHooks for NoopHooks {}
