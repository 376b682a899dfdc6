use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("no document matched the query")]
    NotFound,

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("BSON: {0}")]
    Bson(#[from] bson::error::Error),

    #[error("Serde JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid offset: {0}")]
    InvalidOffset(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl DbError {
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// True for both explicit cancellation and an expired deadline.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// Driver-side failures; these are the only errors the engine logs at `error`.
    #[must_use]
    pub const fn is_driver(&self) -> bool {
        matches!(self, Self::Driver(_) | Self::DuplicateKey(_))
    }
}

impl From<std::io::Error> for DbError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

#[cfg(feature = "mongodb")]
impl From<mongodb::error::Error> for DbError {
    fn from(e: mongodb::error::Error) -> Self {
        Self::Driver(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        assert!(DbError::NotFound.is_not_found());
        assert!(!DbError::Driver("x".into()).is_not_found());
        assert!(DbError::Cancelled.is_cancellation());
        assert!(DbError::DeadlineExceeded.is_cancellation());
        assert!(DbError::DuplicateKey("_id".into()).is_driver());
        assert!(!DbError::Translation("x".into()).is_driver());
    }
}
