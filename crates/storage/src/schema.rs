use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -32000;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS records (
    target_id BLOB PRIMARY KEY CHECK (length(target_id) = 16),
    entity TEXT NOT NULL,
    created INTEGER NOT NULL,
    updated INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS record_fields (
    target_id BLOB NOT NULL CHECK (length(target_id) = 16),
    field_key TEXT NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (target_id, field_key)
);

CREATE TABLE IF NOT EXISTS relation_items (
    item_id INTEGER PRIMARY KEY AUTOINCREMENT,
    target_id BLOB NOT NULL CHECK (length(target_id) = 16),
    relation TEXT NOT NULL,
    fields BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_relation_items_target ON relation_items (target_id, relation);

CREATE TABLE IF NOT EXISTS edits (
    edit_id BLOB PRIMARY KEY CHECK (length(edit_id) = 16),
    entity TEXT NOT NULL,
    target_id BLOB NOT NULL CHECK (length(target_id) = 16),
    action TEXT NOT NULL,
    relation TEXT,
    field_changes BLOB NOT NULL,
    field_mask TEXT NOT NULL,
    changes BLOB NOT NULL,
    actor_id BLOB NOT NULL CHECK (length(actor_id) = 16),
    actor_role INTEGER NOT NULL,
    note TEXT,
    created INTEGER NOT NULL,
    updated INTEGER NOT NULL,
    undo INTEGER NOT NULL DEFAULT 0,
    undo_of BLOB CHECK (undo_of IS NULL OR length(undo_of) = 16)
);
CREATE INDEX IF NOT EXISTS idx_edits_target ON edits (entity, target_id, edit_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_edits_undo_of ON edits (undo_of) WHERE undo_of IS NOT NULL;

CREATE TABLE IF NOT EXISTS role_field_masks (
    role INTEGER NOT NULL,
    entity TEXT NOT NULL,
    mask TEXT NOT NULL,
    PRIMARY KEY (role, entity)
);

CREATE TABLE IF NOT EXISTS user_field_masks (
    actor_id BLOB NOT NULL CHECK (length(actor_id) = 16),
    entity TEXT NOT NULL,
    mask TEXT NOT NULL,
    PRIMARY KEY (actor_id, entity)
);

CREATE TABLE IF NOT EXISTS activities (
    activity_id BLOB PRIMARY KEY CHECK (length(activity_id) = 16),
    actor_id BLOB NOT NULL CHECK (length(actor_id) = 16),
    entity TEXT NOT NULL,
    target_id BLOB NOT NULL CHECK (length(target_id) = 16),
    edit_id BLOB NOT NULL CHECK (length(edit_id) = 16),
    action TEXT NOT NULL,
    created INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_activities_target ON activities (target_id, created);
";
