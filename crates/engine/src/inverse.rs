use opencatalog_core::{
    edit::{now_millis, ChangeSet, EditAction, EditRecord, EntityKind, RelationItem},
    ids::{ActivityId, ActorId, EditId, RoleId},
};
use opencatalog_storage::{ActivityRecord, SqliteStorage, Storage};

use crate::collab::ActivityFeed;
use crate::conflict::natural_key;
use crate::error::EngineError;

/// Applies the inverse of a ledger entry and appends the matching undo
/// entry. Must run inside an open transaction; the caller owns
/// commit and rollback.
pub struct InverseApplier;

impl InverseApplier {
    pub fn apply_inverse(
        &self,
        storage: &mut SqliteStorage,
        feed: &dyn ActivityFeed,
        record: &EditRecord,
        actor_id: ActorId,
        actor_role: RoleId,
    ) -> Result<EditRecord, EngineError> {
        if record.entity == EntityKind::Character {
            return Err(EngineError::NotImplemented {
                entity: record.entity,
                action: record.action,
                relation: record.relation,
            });
        }
        let (inverse_action, inverse_changes) = match (&record.action, &record.changes) {
            (EditAction::UpdateScalar, ChangeSet::Scalar { before, after }) => {
                for (key, value) in before {
                    if value.is_null() {
                        storage.clear_field(record.target_id, key)?;
                    } else {
                        storage.set_fields(record.target_id, &[(key.clone(), value.clone())])?;
                    }
                }
                (
                    EditAction::UpdateScalar,
                    ChangeSet::Scalar {
                        before: after.clone(),
                        after: before.clone(),
                    },
                )
            }
            (EditAction::AddRelation, ChangeSet::Relation { added, .. }) => {
                let relation = record.relation.ok_or(EngineError::NotImplemented {
                    entity: record.entity,
                    action: record.action,
                    relation: None,
                })?;
                let by_id: Vec<i64> = added.iter().filter_map(|item| item.id).collect();
                storage.delete_relation_items_by_id(&by_id)?;
                let keyless: Vec<&RelationItem> =
                    added.iter().filter(|item| item.id.is_none()).collect();
                if !keyless.is_empty() {
                    let current = storage.get_relation_items(record.target_id, relation)?;
                    let wanted: Vec<_> = keyless
                        .iter()
                        .map(|item| natural_key(relation, item))
                        .collect();
                    let doomed: Vec<i64> = current
                        .iter()
                        .filter(|row| wanted.contains(&natural_key(relation, row)))
                        .filter_map(|row| row.id)
                        .collect();
                    storage.delete_relation_items_by_id(&doomed)?;
                }
                (
                    EditAction::RemoveRelation,
                    ChangeSet::Relation {
                        before: added.clone(),
                        after: Vec::new(),
                        added: Vec::new(),
                        removed: added.clone(),
                    },
                )
            }
            (EditAction::RemoveRelation, ChangeSet::Relation { removed, .. }) => {
                let relation = record.relation.ok_or(EngineError::NotImplemented {
                    entity: record.entity,
                    action: record.action,
                    relation: None,
                })?;
                // INSERT OR IGNORE in storage skips rows that were
                // re-added with the same id in the meantime.
                storage.insert_relation_items(record.target_id, relation, removed)?;
                (
                    EditAction::AddRelation,
                    ChangeSet::Relation {
                        before: Vec::new(),
                        after: removed.clone(),
                        added: removed.clone(),
                        removed: Vec::new(),
                    },
                )
            }
            (EditAction::UpdateRelation, ChangeSet::Relation { before, after, .. }) => {
                if let Some(item) = before.first() {
                    if let Some(item_id) = item.id {
                        storage.update_relation_item_fields(item_id, item)?;
                    }
                }
                (
                    EditAction::UpdateRelation,
                    ChangeSet::Relation {
                        before: after.clone(),
                        after: before.clone(),
                        added: Vec::new(),
                        removed: Vec::new(),
                    },
                )
            }
            _ => {
                return Err(EngineError::NotImplemented {
                    entity: record.entity,
                    action: record.action,
                    relation: record.relation,
                })
            }
        };

        let now = now_millis();
        let inverse = EditRecord {
            id: EditId::new(),
            entity: record.entity,
            target_id: record.target_id,
            action: inverse_action,
            relation: record.relation,
            field_changes: record.field_changes.clone(),
            field_mask: record.field_mask.clone(),
            changes: inverse_changes,
            actor_id,
            actor_role,
            note: None,
            created: now,
            updated: now,
            undo: true,
            undo_of: Some(record.id),
        };
        storage.append_edit(&inverse)?;
        storage.touch_record(record.target_id, now)?;
        feed.record(
            storage,
            &ActivityRecord {
                activity_id: ActivityId::new(),
                actor_id,
                entity: record.entity,
                target_id: record.target_id,
                edit_id: inverse.id,
                action: inverse.action,
                created: now,
            },
        )?;
        Ok(inverse)
    }
}
