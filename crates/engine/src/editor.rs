use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use opencatalog_core::{
    bitmask::BitMask,
    edit::{now_millis, ChangeSet, EditAction, EditRecord, EntityKind, RelationItem, RelationKind},
    field_value::FieldValue,
    fieldmap,
    ids::{ActivityId, ActorId, EditId, RoleId, TargetId},
    CoreError,
};
use opencatalog_storage::{ActivityRecord, CatalogRecord, SqliteStorage, Storage, StorageError};

use crate::collab::ActivityFeed;
use crate::conflict::natural_key;
use crate::error::EngineError;
use crate::permissions::PermissionEngine;

/// Forward edit commands. Every mutation checks permissions first,
/// then captures before-state, applies, and appends one ledger entry
/// and one activity entry in a single transaction.
pub struct Editor {
    permissions: PermissionEngine,
}

impl Default for Editor {
    fn default() -> Self {
        Self::new()
    }
}

impl Editor {
    pub fn new() -> Self {
        Self {
            permissions: PermissionEngine,
        }
    }

    /// Creating a record is not an edit: no ledger entry, nothing to
    /// undo.
    pub fn create_record(
        &self,
        storage: &mut SqliteStorage,
        entity: EntityKind,
        target_id_hint: Option<TargetId>,
    ) -> Result<TargetId, EngineError> {
        let target_id = target_id_hint.unwrap_or_else(TargetId::new);
        let now = now_millis();
        storage.insert_record(&CatalogRecord {
            target_id,
            entity,
            created: now,
            updated: now,
        })?;
        Ok(target_id)
    }

    /// Update scalar fields. Unchanged fields are dropped from the
    /// payload; if nothing remains, no ledger entry is written and
    /// `None` is returned. A `Null` after-value clears the field.
    pub fn update_scalars(
        &self,
        storage: &mut SqliteStorage,
        feed: &dyn ActivityFeed,
        actor_id: ActorId,
        actor_role: RoleId,
        entity: EntityKind,
        target_id: TargetId,
        updates: BTreeMap<String, FieldValue>,
        note: Option<String>,
    ) -> Result<Option<EditRecord>, EngineError> {
        require_record(storage, entity, target_id)?;
        let (mask, unknown) =
            fieldmap::mask_for_fields(entity, updates.keys().map(|k| k.as_str()));
        if !unknown.is_empty() {
            return Err(EngineError::Core(CoreError::InvalidData(format!(
                "unknown field(s) for {}: {}",
                entity.as_str(),
                unknown.join(", ")
            ))));
        }
        self.permissions
            .authorize(storage, actor_id, actor_role, entity, &mask)?;

        let mut before = BTreeMap::new();
        let mut after = BTreeMap::new();
        for (key, new_value) in updates {
            let old_value = storage
                .get_field(target_id, &key)?
                .unwrap_or(FieldValue::Null);
            if old_value == new_value {
                continue;
            }
            before.insert(key.clone(), old_value);
            after.insert(key, new_value);
        }
        if after.is_empty() {
            debug!(target = %target_id, "scalar update was a no-op");
            return Ok(None);
        }

        let field_changes: BTreeSet<String> = after.keys().cloned().collect();
        let (field_mask, _) =
            fieldmap::mask_for_fields(entity, field_changes.iter().map(|k| k.as_str()));
        let now = now_millis();
        let record = EditRecord {
            id: EditId::new(),
            entity,
            target_id,
            action: EditAction::UpdateScalar,
            relation: None,
            field_changes,
            field_mask,
            changes: ChangeSet::Scalar {
                before,
                after: after.clone(),
            },
            actor_id,
            actor_role,
            note,
            created: now,
            updated: now,
            undo: false,
            undo_of: None,
        };

        storage.begin_immediate()?;
        let result = (|| {
            for (key, value) in &after {
                if value.is_null() {
                    storage.clear_field(target_id, key)?;
                } else {
                    storage.set_fields(target_id, &[(key.clone(), value.clone())])?;
                }
            }
            self.finish_edit(storage, feed, &record, now)
        })();
        commit_or_rollback(storage, result)?;
        Ok(Some(record))
    }

    pub fn add_relation_items(
        &self,
        storage: &mut SqliteStorage,
        feed: &dyn ActivityFeed,
        actor_id: ActorId,
        actor_role: RoleId,
        entity: EntityKind,
        target_id: TargetId,
        relation: RelationKind,
        items: Vec<RelationItem>,
        note: Option<String>,
    ) -> Result<EditRecord, EngineError> {
        require_record(storage, entity, target_id)?;
        let mask = self.relation_mask(entity, EditAction::AddRelation, relation)?;
        self.permissions
            .authorize(storage, actor_id, actor_role, entity, &mask)?;

        let before = storage.get_relation_items(target_id, relation)?;
        let now = now_millis();

        storage.begin_immediate()?;
        let result = (|| {
            let ids = storage.insert_relation_items(target_id, relation, &items)?;
            let added: Vec<RelationItem> = items
                .iter()
                .zip(ids)
                .map(|(item, id)| RelationItem::with_id(id, item.fields.clone()))
                .collect();
            let mut after = before.clone();
            after.extend(added.iter().cloned());
            let record = self.relation_record(
                entity,
                target_id,
                EditAction::AddRelation,
                relation,
                mask.clone(),
                ChangeSet::Relation {
                    before: before.clone(),
                    after,
                    added,
                    removed: Vec::new(),
                },
                actor_id,
                actor_role,
                note.clone(),
                now,
            );
            self.finish_edit(storage, feed, &record, now)?;
            Ok(record)
        })();
        commit_or_rollback(storage, result)
    }

    pub fn remove_relation_items(
        &self,
        storage: &mut SqliteStorage,
        feed: &dyn ActivityFeed,
        actor_id: ActorId,
        actor_role: RoleId,
        entity: EntityKind,
        target_id: TargetId,
        relation: RelationKind,
        item_ids: &[i64],
        note: Option<String>,
    ) -> Result<EditRecord, EngineError> {
        require_record(storage, entity, target_id)?;
        let mask = self.relation_mask(entity, EditAction::RemoveRelation, relation)?;
        self.permissions
            .authorize(storage, actor_id, actor_role, entity, &mask)?;

        let before = storage.get_relation_items(target_id, relation)?;
        let removed: Vec<RelationItem> = before
            .iter()
            .filter(|item| item.id.is_some_and(|id| item_ids.contains(&id)))
            .cloned()
            .collect();
        if removed.is_empty() {
            return Err(EngineError::Storage(StorageError::NotFound(format!(
                "no {} item(s) matching {:?} on {}",
                relation.as_str(),
                item_ids,
                target_id
            ))));
        }
        let after: Vec<RelationItem> = before
            .iter()
            .filter(|item| !item.id.is_some_and(|id| item_ids.contains(&id)))
            .cloned()
            .collect();
        let now = now_millis();
        let record = self.relation_record(
            entity,
            target_id,
            EditAction::RemoveRelation,
            relation,
            mask,
            ChangeSet::Relation {
                before,
                after,
                added: Vec::new(),
                removed,
            },
            actor_id,
            actor_role,
            note,
            now,
        );

        storage.begin_immediate()?;
        let result = (|| {
            storage.delete_relation_items_by_id(item_ids)?;
            self.finish_edit(storage, feed, &record, now)
        })();
        commit_or_rollback(storage, result)?;
        Ok(record)
    }

    pub fn update_relation_item(
        &self,
        storage: &mut SqliteStorage,
        feed: &dyn ActivityFeed,
        actor_id: ActorId,
        actor_role: RoleId,
        entity: EntityKind,
        target_id: TargetId,
        relation: RelationKind,
        item_id: i64,
        fields: BTreeMap<String, FieldValue>,
        note: Option<String>,
    ) -> Result<EditRecord, EngineError> {
        require_record(storage, entity, target_id)?;
        let mask = self.relation_mask(entity, EditAction::UpdateRelation, relation)?;
        self.permissions
            .authorize(storage, actor_id, actor_role, entity, &mask)?;

        let old = storage
            .get_relation_item(item_id)?
            .ok_or_else(|| {
                EngineError::Storage(StorageError::NotFound(format!(
                    "{} item {} on {}",
                    relation.as_str(),
                    item_id,
                    target_id
                )))
            })?;
        let new = RelationItem::with_id(item_id, fields);
        let now = now_millis();
        let record = self.relation_record(
            entity,
            target_id,
            EditAction::UpdateRelation,
            relation,
            mask,
            ChangeSet::Relation {
                before: vec![old],
                after: vec![new.clone()],
                added: Vec::new(),
                removed: Vec::new(),
            },
            actor_id,
            actor_role,
            note,
            now,
        );

        storage.begin_immediate()?;
        let result = (|| {
            storage.update_relation_item_fields(item_id, &new)?;
            self.finish_edit(storage, feed, &record, now)
        })();
        commit_or_rollback(storage, result)?;
        Ok(record)
    }

    /// Replace the whole relation list. The payload records the full
    /// before and after lists plus the computed added and removed
    /// sets, matched by natural key.
    pub fn set_relation_items(
        &self,
        storage: &mut SqliteStorage,
        feed: &dyn ActivityFeed,
        actor_id: ActorId,
        actor_role: RoleId,
        entity: EntityKind,
        target_id: TargetId,
        relation: RelationKind,
        items: Vec<RelationItem>,
        note: Option<String>,
    ) -> Result<EditRecord, EngineError> {
        require_record(storage, entity, target_id)?;
        let mask = self.relation_mask(entity, EditAction::SetRelation, relation)?;
        self.permissions
            .authorize(storage, actor_id, actor_role, entity, &mask)?;

        let before = storage.get_relation_items(target_id, relation)?;
        let now = now_millis();

        storage.begin_immediate()?;
        let result = (|| {
            let old_ids: Vec<i64> = before.iter().filter_map(|item| item.id).collect();
            storage.delete_relation_items_by_id(&old_ids)?;
            let ids = storage.insert_relation_items(target_id, relation, &items)?;
            let after: Vec<RelationItem> = items
                .iter()
                .zip(ids)
                .map(|(item, id)| RelationItem::with_id(id, item.fields.clone()))
                .collect();

            let before_keys: Vec<_> = before
                .iter()
                .map(|item| natural_key(relation, item))
                .collect();
            let after_keys: Vec<_> = after
                .iter()
                .map(|item| natural_key(relation, item))
                .collect();
            let added: Vec<RelationItem> = after
                .iter()
                .zip(&after_keys)
                .filter(|(_, key)| !before_keys.contains(key))
                .map(|(item, _)| item.clone())
                .collect();
            let removed: Vec<RelationItem> = before
                .iter()
                .zip(&before_keys)
                .filter(|(_, key)| !after_keys.contains(key))
                .map(|(item, _)| item.clone())
                .collect();

            let record = self.relation_record(
                entity,
                target_id,
                EditAction::SetRelation,
                relation,
                mask.clone(),
                ChangeSet::Relation {
                    before: before.clone(),
                    after,
                    added,
                    removed,
                },
                actor_id,
                actor_role,
                note.clone(),
                now,
            );
            self.finish_edit(storage, feed, &record, now)?;
            Ok(record)
        })();
        commit_or_rollback(storage, result)
    }

    // ===== internals =====

    fn relation_mask(
        &self,
        entity: EntityKind,
        action: EditAction,
        relation: RelationKind,
    ) -> Result<BitMask, EngineError> {
        fieldmap::mask_for_relation(entity, relation).ok_or(EngineError::NotImplemented {
            entity,
            action,
            relation: Some(relation),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn relation_record(
        &self,
        entity: EntityKind,
        target_id: TargetId,
        action: EditAction,
        relation: RelationKind,
        field_mask: BitMask,
        changes: ChangeSet,
        actor_id: ActorId,
        actor_role: RoleId,
        note: Option<String>,
        now: i64,
    ) -> EditRecord {
        EditRecord {
            id: EditId::new(),
            entity,
            target_id,
            action,
            relation: Some(relation),
            field_changes: BTreeSet::new(),
            field_mask,
            changes,
            actor_id,
            actor_role,
            note,
            created: now,
            updated: now,
            undo: false,
            undo_of: None,
        }
    }

    fn finish_edit(
        &self,
        storage: &mut SqliteStorage,
        feed: &dyn ActivityFeed,
        record: &EditRecord,
        now: i64,
    ) -> Result<(), EngineError> {
        storage.append_edit(record)?;
        storage.touch_record(record.target_id, now)?;
        feed.record(
            storage,
            &ActivityRecord {
                activity_id: ActivityId::new(),
                actor_id: record.actor_id,
                entity: record.entity,
                target_id: record.target_id,
                edit_id: record.id,
                action: record.action,
                created: now,
            },
        )?;
        debug!(edit = %record.id, action = record.action.as_str(), "edit recorded");
        Ok(())
    }
}

fn require_record(
    storage: &SqliteStorage,
    entity: EntityKind,
    target_id: TargetId,
) -> Result<(), EngineError> {
    match storage.get_record(target_id)? {
        Some(record) if record.entity == entity => Ok(()),
        _ => Err(EngineError::TargetNotFound(format!(
            "{} {}",
            entity.as_str(),
            target_id
        ))),
    }
}

fn commit_or_rollback<T>(
    storage: &mut SqliteStorage,
    result: Result<T, EngineError>,
) -> Result<T, EngineError> {
    match result {
        Ok(value) => {
            storage.commit()?;
            Ok(value)
        }
        Err(e) => {
            storage.rollback()?;
            Err(e)
        }
    }
}
