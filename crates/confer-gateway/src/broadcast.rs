use tokio::sync::broadcast;

use confer_types::events::GatewayEvent;

/// Fan-out seam between event producers and connection send loops. The
/// in-process default below assumes one server owns every connection for a
/// room; a horizontally-scaled deployment swaps in an implementation that
/// bridges a pub/sub backend into the same local channel.
pub trait RoomBroadcaster: Send + Sync {
    /// Fire-and-forget publish. Room scoping rides on the event itself
    /// (`GatewayEvent::conversation_id`); receivers filter on their
    /// subscribed-room set.
    fn publish(&self, event: GatewayEvent);

    /// Subscribe to the local event stream.
    fn subscribe(&self) -> broadcast::Receiver<GatewayEvent>;
}

#[derive(Clone)]
pub struct LocalBroadcaster {
    sender: broadcast::Sender<GatewayEvent>,
}

impl LocalBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }
}

impl Default for LocalBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomBroadcaster for LocalBroadcaster {
    fn publish(&self, event: GatewayEvent) {
        // No receivers is fine: nobody is connected
        let _ = self.sender.send(event);
    }

    fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }
}
