use opencatalog_core::{
    edit::{EditAction, EntityKind, RelationKind},
    ids::EditId,
    CoreError,
};
use opencatalog_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("target not found: {0}")]
    TargetNotFound(String),

    #[error("edit not found: {0}")]
    EditNotFound(String),

    #[error("edit {edit_id} already undone by {undone_by}")]
    AlreadyUndone { edit_id: String, undone_by: String },

    #[error("undo blocked by {} later conflicting edit(s)", conflicts.len())]
    UndoConflict { conflicts: Vec<EditId> },

    #[error("permission denied for field group(s) {bits:?}")]
    PermissionDenied { bits: Vec<usize>, fields: Vec<String> },

    #[error("no undo strategy for {entity:?} {action:?} (relation {relation:?})")]
    NotImplemented {
        entity: EntityKind,
        action: EditAction,
        relation: Option<RelationKind>,
    },
}
