use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use opencatalog_core::{
    bitmask::BitMask,
    edit::{EditRecord, EntityKind, RelationItem, RelationKind},
    field_value::FieldValue,
    fieldmap,
    ids::{ActorId, RoleId, TargetId},
};
use opencatalog_engine::{
    CatalogEngine, EngineError, GameDocument, SearchIndex, StorageActivityFeed,
};
use opencatalog_storage::SqliteStorage;

/// Search index that records every document it receives, so tests can
/// assert on what would have been pushed to a real backend.
pub struct RecordingSearchIndex {
    docs: Arc<Mutex<Vec<GameDocument>>>,
}

impl SearchIndex for RecordingSearchIndex {
    fn upsert_game(&mut self, doc: &GameDocument) -> Result<(), EngineError> {
        if let Ok(mut docs) = self.docs.lock() {
            docs.push(doc.clone());
        }
        Ok(())
    }
}

/// One engine over an in-memory (or temp-file) database, with a fixed
/// actor and role and a recording search index.
pub struct TestCatalog {
    pub engine: CatalogEngine,
    pub actor: ActorId,
    pub role: RoleId,
    docs: Arc<Mutex<Vec<GameDocument>>>,
    _dir: Option<tempfile::TempDir>,
}

impl TestCatalog {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        crate::init_tracing();
        Ok(Self::assemble(SqliteStorage::open_in_memory()?, None))
    }

    /// Same fixture backed by a file in a temp directory, for tests
    /// that reopen the database.
    pub fn on_disk() -> Result<Self, Box<dyn std::error::Error>> {
        crate::init_tracing();
        let dir = tempfile::tempdir()?;
        let storage = SqliteStorage::open(dir.path().join("catalog.db"))?;
        Ok(Self::assemble(storage, Some(dir)))
    }

    fn assemble(storage: SqliteStorage, dir: Option<tempfile::TempDir>) -> Self {
        let docs = Arc::new(Mutex::new(Vec::new()));
        let engine = CatalogEngine::with_collaborators(
            storage,
            Box::new(RecordingSearchIndex { docs: docs.clone() }),
            Box::new(StorageActivityFeed),
        );
        Self {
            engine,
            actor: ActorId::new(),
            role: RoleId(1),
            docs,
            _dir: dir,
        }
    }

    pub fn indexed_games(&self) -> Vec<GameDocument> {
        self.docs.lock().map(|d| d.clone()).unwrap_or_default()
    }

    // ===== grants =====

    /// Grant the fixture role every field group of the entity.
    pub fn grant_all(&mut self, entity: EntityKind) -> Result<(), EngineError> {
        let mut mask = BitMask::new();
        for group in fieldmap::groups(entity) {
            mask.set(group.bit);
        }
        self.engine.grant_role_mask(self.role, entity, &mask)
    }

    pub fn grant_fields(
        &mut self,
        entity: EntityKind,
        fields: &[&str],
    ) -> Result<(), EngineError> {
        let (mask, _) = fieldmap::mask_for_fields(entity, fields.iter().copied());
        self.engine.grant_role_mask(self.role, entity, &mask)
    }

    pub fn grant_user_fields(
        &mut self,
        actor: ActorId,
        entity: EntityKind,
        fields: &[&str],
    ) -> Result<(), EngineError> {
        let (mask, _) = fieldmap::mask_for_fields(entity, fields.iter().copied());
        self.engine.grant_user_mask(actor, entity, &mask)
    }

    pub fn grant_relation(
        &mut self,
        entity: EntityKind,
        relation: RelationKind,
    ) -> Result<(), EngineError> {
        let mask = fieldmap::mask_for_relation(entity, relation).unwrap_or_else(BitMask::new);
        self.engine.grant_role_mask(self.role, entity, &mask)
    }

    // ===== edit shorthands =====

    pub fn create(&mut self, entity: EntityKind) -> Result<TargetId, EngineError> {
        self.engine.create_record(entity, None)
    }

    pub fn update_scalar(
        &mut self,
        entity: EntityKind,
        target_id: TargetId,
        field: &str,
        value: FieldValue,
    ) -> Result<Option<EditRecord>, EngineError> {
        let mut updates = BTreeMap::new();
        updates.insert(field.to_string(), value);
        self.engine
            .update_scalars(self.actor, self.role, entity, target_id, updates, None)
    }

    pub fn update_scalars(
        &mut self,
        entity: EntityKind,
        target_id: TargetId,
        updates: Vec<(&str, FieldValue)>,
    ) -> Result<Option<EditRecord>, EngineError> {
        let updates = updates
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        self.engine
            .update_scalars(self.actor, self.role, entity, target_id, updates, None)
    }

    pub fn add_items(
        &mut self,
        entity: EntityKind,
        target_id: TargetId,
        relation: RelationKind,
        items: Vec<RelationItem>,
    ) -> Result<EditRecord, EngineError> {
        self.engine.add_relation_items(
            self.actor, self.role, entity, target_id, relation, items, None,
        )
    }
}

/// Build a relation item from field pairs.
pub fn relation_item(fields: Vec<(&str, FieldValue)>) -> RelationItem {
    RelationItem::new(
        fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    )
}

/// A link item with a url and a label.
pub fn link_item(url: &str, label: &str) -> RelationItem {
    relation_item(vec![
        ("url", FieldValue::Text(url.into())),
        ("label", FieldValue::Text(label.into())),
    ])
}

/// A cover item with a url and a type tag.
pub fn cover_item(url: &str, kind: &str) -> RelationItem {
    relation_item(vec![
        ("url", FieldValue::Text(url.into())),
        ("type", FieldValue::Text(kind.into())),
    ])
}
