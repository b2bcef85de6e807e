use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("World id must not be empty")]
    EmptyWorldId,

    #[error("World id is longer than {max} characters")]
    WorldIdTooLong { max: usize },

    #[error("World id contains invalid character {0:?}")]
    InvalidWorldIdChar(char),

    #[error("Malformed chunk key: {0}")]
    MalformedChunkKey(String),
}
