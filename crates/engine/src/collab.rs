use std::collections::BTreeMap;

use opencatalog_core::{field_value::FieldValue, ids::TargetId};
use opencatalog_storage::{ActivityRecord, SqliteStorage, Storage};

use crate::error::EngineError;

/// Flattened scalar view of a game record, pushed to the search index
/// after a successful commit.
#[derive(Debug, Clone, PartialEq)]
pub struct GameDocument {
    pub target_id: TargetId,
    pub fields: BTreeMap<String, FieldValue>,
}

/// Receives refreshed game documents after edits and undos commit.
/// Failures are logged by the caller and never roll anything back.
pub trait SearchIndex {
    fn upsert_game(&mut self, doc: &GameDocument) -> Result<(), EngineError>;
}

/// Sink for activity feed entries, written inside the same transaction
/// as the edit they describe.
pub trait ActivityFeed {
    fn record(
        &self,
        storage: &mut SqliteStorage,
        entry: &ActivityRecord,
    ) -> Result<(), EngineError>;
}

/// Default feed: persists entries to the activities table.
pub struct StorageActivityFeed;

impl ActivityFeed for StorageActivityFeed {
    fn record(
        &self,
        storage: &mut SqliteStorage,
        entry: &ActivityRecord,
    ) -> Result<(), EngineError> {
        storage.append_activity(entry)?;
        Ok(())
    }
}

/// Index that drops every document. Used where no search backend is
/// wired up.
pub struct NoopSearchIndex;

impl SearchIndex for NoopSearchIndex {
    fn upsert_game(&mut self, _doc: &GameDocument) -> Result<(), EngineError> {
        Ok(())
    }
}
