use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("edit already undone: {edit_id}")]
    AlreadyUndone { edit_id: String },

    #[error("core error: {0}")]
    Core(#[from] opencatalog_core::CoreError),
}
