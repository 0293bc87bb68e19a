use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::bitmask::BitMask;
use crate::error::CoreError;
use crate::field_value::FieldValue;
use crate::ids::{ActorId, EditId, RoleId, TargetId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Game,
    Developer,
    Character,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Game => "game",
            Self::Developer => "developer",
            Self::Character => "character",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "game" => Ok(Self::Game),
            "developer" => Ok(Self::Developer),
            "character" => Ok(Self::Character),
            other => Err(CoreError::UnknownEntity(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EditAction {
    UpdateScalar,
    AddRelation,
    RemoveRelation,
    UpdateRelation,
    SetRelation,
}

impl EditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpdateScalar => "update_scalar",
            Self::AddRelation => "add_relation",
            Self::RemoveRelation => "remove_relation",
            Self::UpdateRelation => "update_relation",
            Self::SetRelation => "set_relation",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "update_scalar" => Ok(Self::UpdateScalar),
            "add_relation" => Ok(Self::AddRelation),
            "remove_relation" => Ok(Self::RemoveRelation),
            "update_relation" => Ok(Self::UpdateRelation),
            "set_relation" => Ok(Self::SetRelation),
            other => Err(CoreError::UnknownAction(other.to_string())),
        }
    }

    pub fn is_relation(&self) -> bool {
        !matches!(self, Self::UpdateScalar)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    Link,
    Cover,
    Image,
    Developer,
    Character,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Link => "link",
            Self::Cover => "cover",
            Self::Image => "image",
            Self::Developer => "developer",
            Self::Character => "character",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "link" => Ok(Self::Link),
            "cover" => Ok(Self::Cover),
            "image" => Ok(Self::Image),
            "developer" => Ok(Self::Developer),
            "character" => Ok(Self::Character),
            other => Err(CoreError::UnknownRelation(other.to_string())),
        }
    }
}

/// One row of a relation (a link, a cover, a developer attachment).
/// `id` is the storage row id; items captured before insertion, such as
/// the added side of an ADD payload recorded pre-insert, may lack it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationItem {
    pub id: Option<i64>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl RelationItem {
    pub fn new(fields: BTreeMap<String, FieldValue>) -> Self {
        Self { id: None, fields }
    }

    pub fn with_id(id: i64, fields: BTreeMap<String, FieldValue>) -> Self {
        Self {
            id: Some(id),
            fields,
        }
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    /// blake3 over the msgpack encoding of the fields map. Identity of
    /// last resort for items without a row id or a recognizable key.
    pub fn structural_hash(&self) -> [u8; 32] {
        let bytes = rmp_serde::to_vec(&self.fields).unwrap_or_default();
        *blake3::hash(&bytes).as_bytes()
    }
}

/// Change payload of a ledger entry. The shape is fixed by the action:
/// scalar edits carry before/after value maps, relation edits carry
/// item lists. A record never mixes the two.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeSet {
    Scalar {
        before: BTreeMap<String, FieldValue>,
        after: BTreeMap<String, FieldValue>,
    },
    Relation {
        before: Vec<RelationItem>,
        after: Vec<RelationItem>,
        added: Vec<RelationItem>,
        removed: Vec<RelationItem>,
    },
}

impl ChangeSet {
    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar { .. })
    }

    /// All relation items the payload mentions, across before, after,
    /// added and removed. Empty for scalar payloads.
    pub fn relation_items(&self) -> Box<dyn Iterator<Item = &RelationItem> + '_> {
        match self {
            Self::Scalar { .. } => Box::new(std::iter::empty()),
            Self::Relation {
                before,
                after,
                added,
                removed,
            } => Box::new(before.iter().chain(after).chain(added).chain(removed)),
        }
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

/// Immutable ledger entry. `undone_by` is not stored; it is derived by
/// looking up the entry whose `undo_of` points back at this id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditRecord {
    pub id: EditId,
    pub entity: EntityKind,
    pub target_id: TargetId,
    pub action: EditAction,
    pub relation: Option<RelationKind>,
    /// Scalar field names touched by the edit. Empty for relation edits.
    pub field_changes: BTreeSet<String>,
    /// Field-group projection of the touched fields.
    pub field_mask: BitMask,
    pub changes: ChangeSet,
    pub actor_id: ActorId,
    pub actor_role: RoleId,
    pub note: Option<String>,
    pub created: i64,
    pub updated: i64,
    pub undo: bool,
    pub undo_of: Option<EditId>,
}

impl EditRecord {
    pub fn is_relation(&self) -> bool {
        self.relation.is_some()
    }
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
