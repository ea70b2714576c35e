use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use confer_db::Database;
use confer_types::events::GatewayEvent;
use confer_types::models::PresenceStatus;

use crate::broadcast::RoomBroadcaster;

/// Derives presence transitions from connection lifecycle events and
/// explicit status updates. Persists the transition on the user row and
/// pushes a fire-and-forget `user_status_changed` to everyone connected.
pub struct PresenceTracker {
    db: Arc<Database>,
    broadcaster: Arc<dyn RoomBroadcaster>,
}

impl PresenceTracker {
    pub fn new(db: Arc<Database>, broadcaster: Arc<dyn RoomBroadcaster>) -> Self {
        Self { db, broadcaster }
    }

    /// A connection opened: the user is online regardless of how many other
    /// connections they already hold.
    pub fn connected(&self, user_id: Uuid) -> Result<()> {
        self.transition(user_id, PresenceStatus::Online)
    }

    /// A connection closed. `remaining` is the user's live connection count
    /// after the registry removed this one; only the last close downgrades
    /// to offline, so a second open tab keeps the user online.
    pub fn disconnected(&self, user_id: Uuid, remaining: usize) -> Result<()> {
        if remaining > 0 {
            return Ok(());
        }
        self.transition(user_id, PresenceStatus::Offline)
    }

    /// Explicit user-set status (away, or back to online), independent of
    /// connection count.
    pub fn set_explicit(&self, user_id: Uuid, status: PresenceStatus) -> Result<()> {
        self.transition(user_id, status)
    }

    fn transition(&self, user_id: Uuid, status: PresenceStatus) -> Result<()> {
        self.db
            .set_user_status(&user_id.to_string(), status.as_str())?;
        self.broadcaster.publish(GatewayEvent::UserStatusChanged {
            user_id,
            status,
            last_seen: Some(chrono::Utc::now()),
        });
        Ok(())
    }
}
