use std::collections::BTreeSet;
use std::path::Path;

use rusqlite::Connection;

use opencatalog_core::{
    bitmask::BitMask,
    edit::{ChangeSet, EditAction, EditRecord, EntityKind, RelationItem, RelationKind},
    field_value::FieldValue,
    ids::*,
};

use crate::error::StorageError;
use crate::traits::{ActivityRecord, CatalogRecord, Storage};

/// Fixed-size id column read. Length mismatch means a corrupt row.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }
}

const EDIT_COLUMNS: &str = "edit_id, entity, target_id, action, relation, field_changes, \
     field_mask, changes, actor_id, actor_role, note, created, updated, undo, undo_of";

fn read_edit(row: &rusqlite::Row) -> Result<EditRecord, StorageError> {
    let edit_id_bytes: Vec<u8> = row.get(0)?;
    let entity_str: String = row.get(1)?;
    let target_id_bytes: Vec<u8> = row.get(2)?;
    let action_str: String = row.get(3)?;
    let relation_str: Option<String> = row.get(4)?;
    let field_changes_bytes: Vec<u8> = row.get(5)?;
    let field_mask_hex: String = row.get(6)?;
    let changes_bytes: Vec<u8> = row.get(7)?;
    let actor_id_bytes: Vec<u8> = row.get(8)?;
    let actor_role: i64 = row.get(9)?;
    let note: Option<String> = row.get(10)?;
    let created: i64 = row.get(11)?;
    let updated: i64 = row.get(12)?;
    let undo: bool = row.get(13)?;
    let undo_of_bytes: Option<Vec<u8>> = row.get(14)?;

    let field_changes: BTreeSet<String> = rmp_serde::from_slice(&field_changes_bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let undo_of = match undo_of_bytes {
        Some(bytes) => Some(EditId::from_bytes(to_array::<16>(bytes, "undo_of")?)),
        None => None,
    };
    let relation = match relation_str {
        Some(s) => Some(RelationKind::parse(&s)?),
        None => None,
    };

    Ok(EditRecord {
        id: EditId::from_bytes(to_array::<16>(edit_id_bytes, "edit_id")?),
        entity: EntityKind::parse(&entity_str)?,
        target_id: TargetId::from_bytes(to_array::<16>(target_id_bytes, "target_id")?),
        action: EditAction::parse(&action_str)?,
        relation,
        field_changes,
        field_mask: BitMask::from_hex(&field_mask_hex)?,
        changes: ChangeSet::from_msgpack(&changes_bytes)?,
        actor_id: ActorId::from_bytes(to_array::<16>(actor_id_bytes, "actor_id")?),
        actor_role: RoleId(actor_role),
        note,
        created,
        updated,
        undo,
        undo_of,
    })
}

fn tunnel(e: StorageError) -> rusqlite::Error {
    match e {
        StorageError::Sqlite(sq) => sq,
        other => rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Blob,
            Box::new(OpaqueStorageError(other.to_string())),
        ),
    }
}

impl Storage for SqliteStorage {
    fn insert_record(&mut self, record: &CatalogRecord) -> Result<(), StorageError> {
        let result = self.conn.execute(
            "INSERT INTO records (target_id, entity, created, updated) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                record.target_id.as_bytes().as_slice(),
                record.entity.as_str(),
                record.created,
                record.updated,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::ConstraintViolation(format!(
                    "record exists: {}",
                    record.target_id
                )))
            }
            Err(e) => Err(StorageError::Sqlite(e)),
        }
    }

    fn get_record(&self, target_id: TargetId) -> Result<Option<CatalogRecord>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT target_id, entity, created, updated FROM records WHERE target_id = ?1",
        )?;
        let mut rows = stmt.query_map(rusqlite::params![target_id.as_bytes().as_slice()], |row| {
            let tid_bytes: Vec<u8> = row.get(0)?;
            let entity_str: String = row.get(1)?;
            let created: i64 = row.get(2)?;
            let updated: i64 = row.get(3)?;
            Ok((tid_bytes, entity_str, created, updated))
        })?;

        match rows.next() {
            Some(Ok((tid_bytes, entity_str, created, updated))) => Ok(Some(CatalogRecord {
                target_id: TargetId::from_bytes(to_array::<16>(tid_bytes, "target_id")?),
                entity: EntityKind::parse(&entity_str)?,
                created,
                updated,
            })),
            Some(Err(e)) => Err(StorageError::Sqlite(e)),
            None => Ok(None),
        }
    }

    fn touch_record(&mut self, target_id: TargetId, updated: i64) -> Result<(), StorageError> {
        self.conn.execute(
            "UPDATE records SET updated = ?1 WHERE target_id = ?2",
            rusqlite::params![updated, target_id.as_bytes().as_slice()],
        )?;
        Ok(())
    }

    fn get_fields(&self, target_id: TargetId) -> Result<Vec<(String, FieldValue)>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT field_key, value FROM record_fields WHERE target_id = ?1")?;
        let rows = stmt.query_map(rusqlite::params![target_id.as_bytes().as_slice()], |row| {
            let key: String = row.get(0)?;
            let val_bytes: Vec<u8> = row.get(1)?;
            Ok((key, val_bytes))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (key, val_bytes) = row?;
            let value = FieldValue::from_msgpack(&val_bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            result.push((key, value));
        }
        Ok(result)
    }

    fn get_field(
        &self,
        target_id: TargetId,
        field_key: &str,
    ) -> Result<Option<FieldValue>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM record_fields WHERE target_id = ?1 AND field_key = ?2")?;
        let mut rows = stmt.query_map(
            rusqlite::params![target_id.as_bytes().as_slice(), field_key],
            |row| {
                let val_bytes: Vec<u8> = row.get(0)?;
                Ok(val_bytes)
            },
        )?;

        match rows.next() {
            Some(Ok(val_bytes)) => {
                let value = FieldValue::from_msgpack(&val_bytes)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            Some(Err(e)) => Err(StorageError::Sqlite(e)),
            None => Ok(None),
        }
    }

    fn set_fields(
        &mut self,
        target_id: TargetId,
        fields: &[(String, FieldValue)],
    ) -> Result<(), StorageError> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO record_fields (target_id, field_key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(target_id, field_key) DO UPDATE SET value = excluded.value",
        )?;
        for (key, value) in fields {
            let value_bytes = value
                .to_msgpack()
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            stmt.execute(rusqlite::params![
                target_id.as_bytes().as_slice(),
                key,
                value_bytes,
            ])?;
        }
        Ok(())
    }

    fn clear_field(&mut self, target_id: TargetId, field_key: &str) -> Result<(), StorageError> {
        self.conn.execute(
            "DELETE FROM record_fields WHERE target_id = ?1 AND field_key = ?2",
            rusqlite::params![target_id.as_bytes().as_slice(), field_key],
        )?;
        Ok(())
    }

    fn insert_relation_items(
        &mut self,
        target_id: TargetId,
        relation: RelationKind,
        items: &[RelationItem],
    ) -> Result<Vec<i64>, StorageError> {
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            let fields_bytes = rmp_serde::to_vec(&item.fields)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            match item.id {
                Some(item_id) => {
                    self.conn.execute(
                        "INSERT OR IGNORE INTO relation_items (item_id, target_id, relation, fields) VALUES (?1, ?2, ?3, ?4)",
                        rusqlite::params![
                            item_id,
                            target_id.as_bytes().as_slice(),
                            relation.as_str(),
                            fields_bytes,
                        ],
                    )?;
                    ids.push(item_id);
                }
                None => {
                    self.conn.execute(
                        "INSERT INTO relation_items (target_id, relation, fields) VALUES (?1, ?2, ?3)",
                        rusqlite::params![
                            target_id.as_bytes().as_slice(),
                            relation.as_str(),
                            fields_bytes,
                        ],
                    )?;
                    ids.push(self.conn.last_insert_rowid());
                }
            }
        }
        Ok(ids)
    }

    fn get_relation_items(
        &self,
        target_id: TargetId,
        relation: RelationKind,
    ) -> Result<Vec<RelationItem>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT item_id, fields FROM relation_items WHERE target_id = ?1 AND relation = ?2 ORDER BY item_id",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![target_id.as_bytes().as_slice(), relation.as_str()],
            |row| {
                let item_id: i64 = row.get(0)?;
                let fields_bytes: Vec<u8> = row.get(1)?;
                Ok((item_id, fields_bytes))
            },
        )?;

        let mut result = Vec::new();
        for row in rows {
            let (item_id, fields_bytes) = row?;
            let fields = rmp_serde::from_slice(&fields_bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            result.push(RelationItem::with_id(item_id, fields));
        }
        Ok(result)
    }

    fn get_relation_item(&self, item_id: i64) -> Result<Option<RelationItem>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT fields FROM relation_items WHERE item_id = ?1")?;
        let mut rows = stmt.query_map(rusqlite::params![item_id], |row| {
            let fields_bytes: Vec<u8> = row.get(0)?;
            Ok(fields_bytes)
        })?;

        match rows.next() {
            Some(Ok(fields_bytes)) => {
                let fields = rmp_serde::from_slice(&fields_bytes)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(RelationItem::with_id(item_id, fields)))
            }
            Some(Err(e)) => Err(StorageError::Sqlite(e)),
            None => Ok(None),
        }
    }

    fn delete_relation_items_by_id(&mut self, item_ids: &[i64]) -> Result<usize, StorageError> {
        let mut stmt = self
            .conn
            .prepare("DELETE FROM relation_items WHERE item_id = ?1")?;
        let mut deleted = 0;
        for item_id in item_ids {
            deleted += stmt.execute(rusqlite::params![item_id])?;
        }
        Ok(deleted)
    }

    fn update_relation_item_fields(
        &mut self,
        item_id: i64,
        item: &RelationItem,
    ) -> Result<(), StorageError> {
        let fields_bytes = rmp_serde::to_vec(&item.fields)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.conn.execute(
            "UPDATE relation_items SET fields = ?1 WHERE item_id = ?2",
            rusqlite::params![fields_bytes, item_id],
        )?;
        Ok(())
    }

    fn append_edit(&mut self, record: &EditRecord) -> Result<(), StorageError> {
        let field_changes_bytes = rmp_serde::to_vec(&record.field_changes)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let changes_bytes = record.changes.to_msgpack()?;

        let result = self.conn.execute(
            "INSERT INTO edits (edit_id, entity, target_id, action, relation, field_changes, \
             field_mask, changes, actor_id, actor_role, note, created, updated, undo, undo_of) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            rusqlite::params![
                record.id.as_bytes().as_slice(),
                record.entity.as_str(),
                record.target_id.as_bytes().as_slice(),
                record.action.as_str(),
                record.relation.map(|r| r.as_str()),
                field_changes_bytes,
                record.field_mask.to_hex(),
                changes_bytes,
                record.actor_id.as_bytes().as_slice(),
                record.actor_role.as_i64(),
                record.note.as_deref(),
                record.created,
                record.updated,
                record.undo,
                record.undo_of.map(|id| id.as_bytes().to_vec()),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, Some(msg)))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
                    && msg.contains("undo_of") =>
            {
                let edit_id = record
                    .undo_of
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| record.id.to_string());
                Err(StorageError::AlreadyUndone { edit_id })
            }
            Err(rusqlite::Error::SqliteFailure(err, msg))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::ConstraintViolation(
                    msg.unwrap_or_else(|| record.id.to_string()),
                ))
            }
            Err(e) => Err(StorageError::Sqlite(e)),
        }
    }

    fn get_edit(&self, edit_id: EditId) -> Result<Option<EditRecord>, StorageError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {EDIT_COLUMNS} FROM edits WHERE edit_id = ?1"))?;
        let mut rows = stmt.query_map(rusqlite::params![edit_id.as_bytes().as_slice()], |row| {
            read_edit(row).map_err(tunnel)
        })?;

        match rows.next() {
            Some(Ok(record)) => Ok(Some(record)),
            Some(Err(e)) => Err(StorageError::Sqlite(e)),
            None => Ok(None),
        }
    }

    fn get_edits_for_target(
        &self,
        entity: EntityKind,
        target_id: TargetId,
    ) -> Result<Vec<EditRecord>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EDIT_COLUMNS} FROM edits WHERE entity = ?1 AND target_id = ?2 ORDER BY edit_id"
        ))?;
        let records = stmt
            .query_map(
                rusqlite::params![entity.as_str(), target_id.as_bytes().as_slice()],
                |row| read_edit(row).map_err(tunnel),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn get_later_edits(
        &self,
        entity: EntityKind,
        target_id: TargetId,
        after: EditId,
    ) -> Result<Vec<EditRecord>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EDIT_COLUMNS} FROM edits \
             WHERE entity = ?1 AND target_id = ?2 AND edit_id > ?3 AND undo = 0 \
             AND edit_id NOT IN (SELECT undo_of FROM edits WHERE undo_of IS NOT NULL) \
             ORDER BY edit_id"
        ))?;
        let records = stmt
            .query_map(
                rusqlite::params![
                    entity.as_str(),
                    target_id.as_bytes().as_slice(),
                    after.as_bytes().as_slice(),
                ],
                |row| read_edit(row).map_err(tunnel),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn find_undo_of(&self, edit_id: EditId) -> Result<Option<EditId>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT edit_id FROM edits WHERE undo_of = ?1")?;
        let mut rows = stmt.query_map(rusqlite::params![edit_id.as_bytes().as_slice()], |row| {
            let bytes: Vec<u8> = row.get(0)?;
            Ok(bytes)
        })?;

        match rows.next() {
            Some(Ok(bytes)) => Ok(Some(EditId::from_bytes(to_array::<16>(bytes, "edit_id")?))),
            Some(Err(e)) => Err(StorageError::Sqlite(e)),
            None => Ok(None),
        }
    }

    fn get_role_mask(&self, role: RoleId, entity: EntityKind) -> Result<BitMask, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT mask FROM role_field_masks WHERE role = ?1 AND entity = ?2")?;
        let mut rows = stmt.query_map(
            rusqlite::params![role.as_i64(), entity.as_str()],
            |row| {
                let hex: String = row.get(0)?;
                Ok(hex)
            },
        )?;

        match rows.next() {
            Some(Ok(hex)) => Ok(BitMask::from_hex(&hex)?),
            Some(Err(e)) => Err(StorageError::Sqlite(e)),
            None => Ok(BitMask::new()),
        }
    }

    fn get_user_mask(
        &self,
        actor_id: ActorId,
        entity: EntityKind,
    ) -> Result<BitMask, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT mask FROM user_field_masks WHERE actor_id = ?1 AND entity = ?2")?;
        let mut rows = stmt.query_map(
            rusqlite::params![actor_id.as_bytes().as_slice(), entity.as_str()],
            |row| {
                let hex: String = row.get(0)?;
                Ok(hex)
            },
        )?;

        match rows.next() {
            Some(Ok(hex)) => Ok(BitMask::from_hex(&hex)?),
            Some(Err(e)) => Err(StorageError::Sqlite(e)),
            None => Ok(BitMask::new()),
        }
    }

    fn put_role_mask(
        &mut self,
        role: RoleId,
        entity: EntityKind,
        mask: &BitMask,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO role_field_masks (role, entity, mask) VALUES (?1, ?2, ?3)
             ON CONFLICT(role, entity) DO UPDATE SET mask = excluded.mask",
            rusqlite::params![role.as_i64(), entity.as_str(), mask.to_hex()],
        )?;
        Ok(())
    }

    fn put_user_mask(
        &mut self,
        actor_id: ActorId,
        entity: EntityKind,
        mask: &BitMask,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO user_field_masks (actor_id, entity, mask) VALUES (?1, ?2, ?3)
             ON CONFLICT(actor_id, entity) DO UPDATE SET mask = excluded.mask",
            rusqlite::params![actor_id.as_bytes().as_slice(), entity.as_str(), mask.to_hex()],
        )?;
        Ok(())
    }

    fn append_activity(&mut self, record: &ActivityRecord) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO activities (activity_id, actor_id, entity, target_id, edit_id, action, created) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                record.activity_id.as_bytes().as_slice(),
                record.actor_id.as_bytes().as_slice(),
                record.entity.as_str(),
                record.target_id.as_bytes().as_slice(),
                record.edit_id.as_bytes().as_slice(),
                record.action.as_str(),
                record.created,
            ],
        )?;
        Ok(())
    }

    fn get_activities_for_target(
        &self,
        target_id: TargetId,
    ) -> Result<Vec<ActivityRecord>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT activity_id, actor_id, entity, target_id, edit_id, action, created \
             FROM activities WHERE target_id = ?1 ORDER BY created, activity_id",
        )?;
        let rows = stmt.query_map(rusqlite::params![target_id.as_bytes().as_slice()], |row| {
            let activity_id_bytes: Vec<u8> = row.get(0)?;
            let actor_id_bytes: Vec<u8> = row.get(1)?;
            let entity_str: String = row.get(2)?;
            let target_id_bytes: Vec<u8> = row.get(3)?;
            let edit_id_bytes: Vec<u8> = row.get(4)?;
            let action_str: String = row.get(5)?;
            let created: i64 = row.get(6)?;
            Ok((
                activity_id_bytes,
                actor_id_bytes,
                entity_str,
                target_id_bytes,
                edit_id_bytes,
                action_str,
                created,
            ))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (
                activity_id_bytes,
                actor_id_bytes,
                entity_str,
                target_id_bytes,
                edit_id_bytes,
                action_str,
                created,
            ) = row?;
            result.push(ActivityRecord {
                activity_id: ActivityId::from_bytes(to_array::<16>(
                    activity_id_bytes,
                    "activity_id",
                )?),
                actor_id: ActorId::from_bytes(to_array::<16>(actor_id_bytes, "actor_id")?),
                entity: EntityKind::parse(&entity_str)?,
                target_id: TargetId::from_bytes(to_array::<16>(target_id_bytes, "target_id")?),
                edit_id: EditId::from_bytes(to_array::<16>(edit_id_bytes, "edit_id")?),
                action: EditAction::parse(&action_str)?,
                created,
            });
        }
        Ok(result)
    }

    fn begin_immediate(&mut self) -> Result<(), StorageError> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

/// Wrapper error type used to tunnel StorageError through rusqlite's error system
/// in query_map closures that must return rusqlite::Error.
#[derive(Debug)]
struct OpaqueStorageError(String);

impl std::fmt::Display for OpaqueStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for OpaqueStorageError {}
