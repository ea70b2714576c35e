use confer_types::events::{ErrorCode, GatewayEvent};
use thiserror::Error;

/// Failure classes for gateway operations. Every variant is scoped to the
/// requesting connection: a failed operation is never broadcast to the room
/// and never leaves partial state behind.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AccessDenied(_) => ErrorCode::AccessDenied,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Validation(_) => ErrorCode::Validation,
            Self::Database(_) => ErrorCode::Internal,
        }
    }

    /// The `error` event sent back to the requesting connection. Database
    /// failures are surfaced as a generic message; the detail goes to the
    /// server log, not the wire.
    pub fn into_event(self) -> GatewayEvent {
        let code = self.code();
        let message = match &self {
            Self::Database(e) => {
                tracing::error!("gateway operation failed: {:#}", e);
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        GatewayEvent::Error { code, message }
    }
}
