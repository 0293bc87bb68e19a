use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unknown entity kind: {0}")]
    UnknownEntity(String),

    #[error("unknown edit action: {0}")]
    UnknownAction(String),

    #[error("unknown relation kind: {0}")]
    UnknownRelation(String),

    #[error("invalid mask encoding: {0}")]
    InvalidMask(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}
