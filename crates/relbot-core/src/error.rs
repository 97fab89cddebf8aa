use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelbotError {
    #[error("failed to fetch {what}: {message}")]
    TransientFetch { what: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("release store error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("chat transport error: {0}")]
    Chat(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RelbotError {
    pub fn fetch(what: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::TransientFetch {
            what: what.into(),
            message: message.to_string(),
        }
    }

    /// Storage and configuration failures invalidate the whole cycle; every
    /// other variant is scoped to the release being processed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Configuration(_))
    }
}

/// Wrap any displayable backend error as [`RelbotError::Storage`].
pub(crate) fn storage<E: std::fmt::Display>(e: E) -> RelbotError {
    RelbotError::Storage(e.to_string())
}

pub type Result<T> = std::result::Result<T, RelbotError>;
