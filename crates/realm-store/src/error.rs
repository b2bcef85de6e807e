use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Backing store is unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Stored record is invalid: {0}")]
    InvalidRecord(String),
}

impl StoreError {
    /// Whether retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Io(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
