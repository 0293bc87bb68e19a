use opencatalog_core::{
    bitmask::BitMask,
    edit::{EditAction, EditRecord, EntityKind, RelationItem, RelationKind},
    field_value::FieldValue,
    ids::*,
};

use crate::error::StorageError;

#[derive(Debug, Clone)]
pub struct CatalogRecord {
    pub target_id: TargetId,
    pub entity: EntityKind,
    pub created: i64,
    pub updated: i64,
}

#[derive(Debug, Clone)]
pub struct ActivityRecord {
    pub activity_id: ActivityId,
    pub actor_id: ActorId,
    pub entity: EntityKind,
    pub target_id: TargetId,
    pub edit_id: EditId,
    pub action: EditAction,
    pub created: i64,
}

pub trait Storage {
    // catalog records

    fn insert_record(&mut self, record: &CatalogRecord) -> Result<(), StorageError>;

    fn get_record(&self, target_id: TargetId) -> Result<Option<CatalogRecord>, StorageError>;

    fn touch_record(&mut self, target_id: TargetId, updated: i64) -> Result<(), StorageError>;

    // scalar fields

    fn get_fields(&self, target_id: TargetId) -> Result<Vec<(String, FieldValue)>, StorageError>;

    fn get_field(
        &self,
        target_id: TargetId,
        field_key: &str,
    ) -> Result<Option<FieldValue>, StorageError>;

    fn set_fields(
        &mut self,
        target_id: TargetId,
        fields: &[(String, FieldValue)],
    ) -> Result<(), StorageError>;

    fn clear_field(&mut self, target_id: TargetId, field_key: &str) -> Result<(), StorageError>;

    // relation items

    /// Bulk insert. Items carrying an id keep it (`INSERT OR IGNORE`, so
    /// re-inserting a row that still exists is a no-op); items without
    /// one get a fresh rowid. Returns the ids in input order.
    fn insert_relation_items(
        &mut self,
        target_id: TargetId,
        relation: RelationKind,
        items: &[RelationItem],
    ) -> Result<Vec<i64>, StorageError>;

    fn get_relation_items(
        &self,
        target_id: TargetId,
        relation: RelationKind,
    ) -> Result<Vec<RelationItem>, StorageError>;

    fn get_relation_item(&self, item_id: i64) -> Result<Option<RelationItem>, StorageError>;

    fn delete_relation_items_by_id(&mut self, item_ids: &[i64]) -> Result<usize, StorageError>;

    fn update_relation_item_fields(
        &mut self,
        item_id: i64,
        item: &RelationItem,
    ) -> Result<(), StorageError>;

    // ledger

    /// Append one ledger entry. A second undo pointing at the same
    /// `undo_of` violates the unique index and surfaces as
    /// `StorageError::AlreadyUndone`.
    fn append_edit(&mut self, record: &EditRecord) -> Result<(), StorageError>;

    fn get_edit(&self, edit_id: EditId) -> Result<Option<EditRecord>, StorageError>;

    fn get_edits_for_target(
        &self,
        entity: EntityKind,
        target_id: TargetId,
    ) -> Result<Vec<EditRecord>, StorageError>;

    /// Non-undo edits on the same record created after `after`, skipping
    /// edits that have themselves been undone. Ascending id order.
    fn get_later_edits(
        &self,
        entity: EntityKind,
        target_id: TargetId,
        after: EditId,
    ) -> Result<Vec<EditRecord>, StorageError>;

    /// The id of the edit that undid `edit_id`, if one exists.
    fn find_undo_of(&self, edit_id: EditId) -> Result<Option<EditId>, StorageError>;

    // permission masks

    fn get_role_mask(&self, role: RoleId, entity: EntityKind) -> Result<BitMask, StorageError>;

    fn get_user_mask(&self, actor_id: ActorId, entity: EntityKind)
    -> Result<BitMask, StorageError>;

    fn put_role_mask(
        &mut self,
        role: RoleId,
        entity: EntityKind,
        mask: &BitMask,
    ) -> Result<(), StorageError>;

    fn put_user_mask(
        &mut self,
        actor_id: ActorId,
        entity: EntityKind,
        mask: &BitMask,
    ) -> Result<(), StorageError>;

    // activity feed

    fn append_activity(&mut self, record: &ActivityRecord) -> Result<(), StorageError>;

    fn get_activities_for_target(
        &self,
        target_id: TargetId,
    ) -> Result<Vec<ActivityRecord>, StorageError>;

    // transactions

    fn begin_immediate(&mut self) -> Result<(), StorageError>;

    fn commit(&mut self) -> Result<(), StorageError>;

    fn rollback(&mut self) -> Result<(), StorageError>;
}
