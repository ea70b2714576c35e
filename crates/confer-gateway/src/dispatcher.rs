use std::sync::Arc;

use tokio::sync::broadcast;

use confer_db::Database;
use confer_types::events::GatewayEvent;

use crate::broadcast::{LocalBroadcaster, RoomBroadcaster};
use crate::presence::PresenceTracker;
use crate::registry::SessionRegistry;
use crate::typing::TypingTracker;

/// Wires the real-time components together: one session registry, one
/// broadcast fanout, one presence tracker and one typing tracker, all
/// sharing the database handle. Cloned into every connection and into the
/// REST state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    db: Arc<Database>,
    broadcaster: Arc<dyn RoomBroadcaster>,
    registry: SessionRegistry,
    presence: PresenceTracker,
    typing: TypingTracker,
}

impl Dispatcher {
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_broadcaster(db, Arc::new(LocalBroadcaster::new()))
    }

    /// Injection point for a non-local fanout backend.
    pub fn with_broadcaster(db: Arc<Database>, broadcaster: Arc<dyn RoomBroadcaster>) -> Self {
        let presence = PresenceTracker::new(db.clone(), broadcaster.clone());
        Self {
            inner: Arc::new(DispatcherInner {
                db,
                broadcaster,
                registry: SessionRegistry::new(),
                presence,
                typing: TypingTracker::new(),
            }),
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.inner.db
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.inner.presence
    }

    pub fn typing(&self) -> &TypingTracker {
        &self.inner.typing
    }

    /// Publish an event to the fanout. Room-scoped events are filtered by
    /// each connection against its subscribed rooms; unscoped events reach
    /// every connection.
    pub fn publish(&self, event: GatewayEvent) {
        self.inner.broadcaster.publish(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcaster.subscribe()
    }
}
