use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Upstream service error: {0}")]
    Source(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NotificationError {
    /// Errors caused by a backing service being unavailable.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Stream(_) | Self::Storage(_) | Self::Source(_))
    }
}

impl From<serde_json::Error> for NotificationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
