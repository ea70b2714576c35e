use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use confer_types::events::GatewayEvent;

/// Maps each authenticated user to their live connections. A user may hold
/// any number of simultaneous connections (multiple tabs / devices); each
/// gets its own targeted send channel. Injected into the dispatcher rather
/// than living in a process-wide static, so a shared registry backend can
/// replace it without touching call sites.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<Uuid, HashMap<Uuid, mpsc::UnboundedSender<GatewayEvent>>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection for a user. Returns the connection id, the
    /// sender (so the owning connection can queue its own acks and errors)
    /// and the receiver drained by the connection's send task.
    pub async fn register(
        &self,
        user_id: Uuid,
    ) -> (
        Uuid,
        mpsc::UnboundedSender<GatewayEvent>,
        mpsc::UnboundedReceiver<GatewayEvent>,
    ) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id, tx.clone());
        (conn_id, tx, rx)
    }

    /// Remove one connection. Returns how many live connections the user
    /// still has, so presence can decide whether to downgrade: a user with
    /// two tabs open must not flip offline when one tab closes.
    pub async fn unregister(&self, user_id: Uuid, conn_id: Uuid) -> usize {
        let mut map = self.inner.write().await;
        let Some(connections) = map.get_mut(&user_id) else {
            return 0;
        };
        connections.remove(&conn_id);
        let remaining = connections.len();
        if remaining == 0 {
            map.remove(&user_id);
        }
        remaining
    }

    /// Fan a targeted event out to every live connection of one user.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) {
        let map = self.inner.read().await;
        if let Some(connections) = map.get(&user_id) {
            for tx in connections.values() {
                let _ = tx.send(event.clone());
            }
        }
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner
            .read()
            .await
            .get(&user_id)
            .map_or(0, |c| c.len())
    }

    /// Users with at least one live connection.
    pub async fn online_user_ids(&self) -> Vec<Uuid> {
        self.inner.read().await.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracks_multiple_connections_per_user() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();

        let (conn_a, _tx_a, _rx_a) = registry.register(user).await;
        let (conn_b, _tx_b, _rx_b) = registry.register(user).await;
        assert_eq!(registry.connection_count(user).await, 2);

        // Closing one tab leaves the user online
        assert_eq!(registry.unregister(user, conn_a).await, 1);
        assert_eq!(registry.connection_count(user).await, 1);

        // Closing the last one removes the user entirely
        assert_eq!(registry.unregister(user, conn_b).await, 0);
        assert_eq!(registry.connection_count(user).await, 0);
        assert!(registry.online_user_ids().await.is_empty());
    }

    #[tokio::test]
    async fn unregister_of_unknown_connection_is_harmless() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();
        assert_eq!(registry.unregister(user, Uuid::new_v4()).await, 0);

        let (_conn, _tx, _rx) = registry.register(user).await;
        assert_eq!(registry.unregister(user, Uuid::new_v4()).await, 1);
    }

    #[tokio::test]
    async fn send_to_user_reaches_every_connection() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();
        let (_a, _tx_a, mut rx_a) = registry.register(user).await;
        let (_b, _tx_b, mut rx_b) = registry.register(user).await;

        registry
            .send_to_user(
                user,
                GatewayEvent::JoinedConversation {
                    conversation_id: Uuid::new_v4(),
                },
            )
            .await;

        assert!(matches!(
            rx_a.recv().await,
            Some(GatewayEvent::JoinedConversation { .. })
        ));
        assert!(matches!(
            rx_b.recv().await,
            Some(GatewayEvent::JoinedConversation { .. })
        ));
    }
}
