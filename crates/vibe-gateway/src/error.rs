use thiserror::Error;

use vibe_store::StoreError;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Rejected before anything was persisted.
    #[error("{0}")]
    Validation(String),

    #[error("authentication required")]
    Unauthorized,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GatewayError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True when a write may not have happened.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_persistence())
    }

    /// Text for the client's `error` event. Persistence details stay in the
    /// server log; the client only learns which action failed.
    pub fn client_message(&self, action: &str) -> String {
        match self {
            Self::Store(e) if e.is_persistence() => format!("Failed to {action}"),
            other => other.to_string(),
        }
    }
}
