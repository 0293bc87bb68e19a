pub mod collab;
pub mod conflict;
pub mod editor;
pub mod error;
pub mod inverse;
pub mod permissions;
pub mod undo;

pub use collab::{ActivityFeed, GameDocument, NoopSearchIndex, SearchIndex, StorageActivityFeed};
pub use conflict::{natural_key, ConflictDetector, NaturalKey};
pub use editor::Editor;
pub use error::EngineError;
pub use inverse::InverseApplier;
pub use permissions::{PermissionDetails, PermissionEngine};
pub use undo::{UndoMode, UndoOptions, UndoOrchestrator, UndoOutcome, UndoPreview};

use std::collections::BTreeMap;

use tracing::warn;

use opencatalog_core::{
    bitmask::BitMask,
    edit::{EditRecord, EntityKind, RelationItem, RelationKind},
    field_value::FieldValue,
    ids::{ActorId, EditId, RoleId, TargetId},
};
use opencatalog_storage::{ActivityRecord, SqliteStorage, Storage};

/// Facade over the editor, permission engine and undo orchestrator,
/// sharing one storage handle. Search refresh happens after commit
/// and never fails an edit.
pub struct CatalogEngine {
    storage: SqliteStorage,
    permissions: PermissionEngine,
    editor: Editor,
    orchestrator: UndoOrchestrator,
    search: Box<dyn SearchIndex>,
    activity: Box<dyn ActivityFeed>,
}

impl CatalogEngine {
    pub fn new(storage: SqliteStorage) -> Self {
        Self::with_collaborators(
            storage,
            Box::new(NoopSearchIndex),
            Box::new(StorageActivityFeed),
        )
    }

    pub fn with_collaborators(
        storage: SqliteStorage,
        search: Box<dyn SearchIndex>,
        activity: Box<dyn ActivityFeed>,
    ) -> Self {
        Self {
            storage,
            permissions: PermissionEngine,
            editor: Editor::new(),
            orchestrator: UndoOrchestrator::new(),
            search,
            activity,
        }
    }

    // ===== edit commands =====

    pub fn create_record(
        &mut self,
        entity: EntityKind,
        target_id_hint: Option<TargetId>,
    ) -> Result<TargetId, EngineError> {
        self.editor
            .create_record(&mut self.storage, entity, target_id_hint)
    }

    pub fn update_scalars(
        &mut self,
        actor_id: ActorId,
        actor_role: RoleId,
        entity: EntityKind,
        target_id: TargetId,
        updates: BTreeMap<String, FieldValue>,
        note: Option<String>,
    ) -> Result<Option<EditRecord>, EngineError> {
        let record = self.editor.update_scalars(
            &mut self.storage,
            self.activity.as_ref(),
            actor_id,
            actor_role,
            entity,
            target_id,
            updates,
            note,
        )?;
        if record.is_some() {
            self.refresh_search(entity, target_id);
        }
        Ok(record)
    }

    pub fn add_relation_items(
        &mut self,
        actor_id: ActorId,
        actor_role: RoleId,
        entity: EntityKind,
        target_id: TargetId,
        relation: RelationKind,
        items: Vec<RelationItem>,
        note: Option<String>,
    ) -> Result<EditRecord, EngineError> {
        let record = self.editor.add_relation_items(
            &mut self.storage,
            self.activity.as_ref(),
            actor_id,
            actor_role,
            entity,
            target_id,
            relation,
            items,
            note,
        )?;
        self.refresh_search(entity, target_id);
        Ok(record)
    }

    pub fn remove_relation_items(
        &mut self,
        actor_id: ActorId,
        actor_role: RoleId,
        entity: EntityKind,
        target_id: TargetId,
        relation: RelationKind,
        item_ids: &[i64],
        note: Option<String>,
    ) -> Result<EditRecord, EngineError> {
        let record = self.editor.remove_relation_items(
            &mut self.storage,
            self.activity.as_ref(),
            actor_id,
            actor_role,
            entity,
            target_id,
            relation,
            item_ids,
            note,
        )?;
        self.refresh_search(entity, target_id);
        Ok(record)
    }

    pub fn update_relation_item(
        &mut self,
        actor_id: ActorId,
        actor_role: RoleId,
        entity: EntityKind,
        target_id: TargetId,
        relation: RelationKind,
        item_id: i64,
        fields: BTreeMap<String, FieldValue>,
        note: Option<String>,
    ) -> Result<EditRecord, EngineError> {
        let record = self.editor.update_relation_item(
            &mut self.storage,
            self.activity.as_ref(),
            actor_id,
            actor_role,
            entity,
            target_id,
            relation,
            item_id,
            fields,
            note,
        )?;
        self.refresh_search(entity, target_id);
        Ok(record)
    }

    pub fn set_relation_items(
        &mut self,
        actor_id: ActorId,
        actor_role: RoleId,
        entity: EntityKind,
        target_id: TargetId,
        relation: RelationKind,
        items: Vec<RelationItem>,
        note: Option<String>,
    ) -> Result<EditRecord, EngineError> {
        let record = self.editor.set_relation_items(
            &mut self.storage,
            self.activity.as_ref(),
            actor_id,
            actor_role,
            entity,
            target_id,
            relation,
            items,
            note,
        )?;
        self.refresh_search(entity, target_id);
        Ok(record)
    }

    // ===== undo =====

    pub fn undo(
        &mut self,
        edit_id: EditId,
        actor_id: ActorId,
        actor_role: RoleId,
        options: UndoOptions,
    ) -> Result<UndoOutcome, EngineError> {
        let outcome = self.orchestrator.undo(
            &mut self.storage,
            self.activity.as_ref(),
            edit_id,
            actor_id,
            actor_role,
            options,
        )?;
        if let UndoOutcome::Applied {
            entity, target_id, ..
        } = &outcome
        {
            self.refresh_search(*entity, *target_id);
        }
        Ok(outcome)
    }

    // ===== permissions =====

    pub fn permission_details(
        &self,
        actor_id: ActorId,
        role: RoleId,
        entity: EntityKind,
    ) -> Result<PermissionDetails, EngineError> {
        self.permissions
            .permission_details(&self.storage, actor_id, role, entity)
    }

    pub fn grant_role_mask(
        &mut self,
        role: RoleId,
        entity: EntityKind,
        mask: &BitMask,
    ) -> Result<(), EngineError> {
        self.storage.put_role_mask(role, entity, mask)?;
        Ok(())
    }

    pub fn grant_user_mask(
        &mut self,
        actor_id: ActorId,
        entity: EntityKind,
        mask: &BitMask,
    ) -> Result<(), EngineError> {
        self.storage.put_user_mask(actor_id, entity, mask)?;
        Ok(())
    }

    // ===== ledger queries =====

    pub fn get_edit(&self, edit_id: EditId) -> Result<Option<EditRecord>, EngineError> {
        Ok(self.storage.get_edit(edit_id)?)
    }

    pub fn get_edits_for_target(
        &self,
        entity: EntityKind,
        target_id: TargetId,
    ) -> Result<Vec<EditRecord>, EngineError> {
        Ok(self.storage.get_edits_for_target(entity, target_id)?)
    }

    pub fn get_activities_for_target(
        &self,
        target_id: TargetId,
    ) -> Result<Vec<ActivityRecord>, EngineError> {
        Ok(self.storage.get_activities_for_target(target_id)?)
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut SqliteStorage {
        &mut self.storage
    }

    /// Push the current scalar view to the search index. Only games
    /// are indexed. Failures are logged and swallowed; the edit has
    /// already committed.
    fn refresh_search(&mut self, entity: EntityKind, target_id: TargetId) {
        if entity != EntityKind::Game {
            return;
        }
        let fields = match self.storage.get_fields(target_id) {
            Ok(fields) => fields.into_iter().collect(),
            Err(e) => {
                warn!(target = %target_id, error = %e, "search refresh read failed");
                return;
            }
        };
        let doc = GameDocument { target_id, fields };
        if let Err(e) = self.search.upsert_game(&doc) {
            warn!(target = %target_id, error = %e, "search refresh failed");
        }
    }
}
