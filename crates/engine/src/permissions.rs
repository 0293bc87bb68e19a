use std::collections::BTreeMap;

use opencatalog_core::{
    bitmask::BitMask,
    edit::EntityKind,
    fieldmap,
    ids::{ActorId, RoleId},
};
use opencatalog_storage::{SqliteStorage, Storage};

use crate::error::EngineError;

/// Per-field permission report for one actor on one entity kind.
#[derive(Debug, Clone)]
pub struct PermissionDetails {
    /// Hex rendering of the effective allow mask.
    pub mask: String,
    /// Every known field or relation group name, true when editable.
    pub fields: BTreeMap<String, bool>,
    pub scalar_fields: Vec<String>,
    pub relation_fields: Vec<String>,
}

/// Resolves field-group permissions. Grants are strictly additive:
/// the effective mask is role mask OR per-user mask, and a missing
/// row on either side reads as all-zero.
pub struct PermissionEngine;

impl PermissionEngine {
    pub fn allow_mask(
        &self,
        storage: &SqliteStorage,
        actor_id: ActorId,
        role: RoleId,
        entity: EntityKind,
    ) -> Result<BitMask, EngineError> {
        let role_mask = storage.get_role_mask(role, entity)?;
        let user_mask = storage.get_user_mask(actor_id, entity)?;
        Ok(&role_mask | &user_mask)
    }

    pub fn has_all_bits(&self, allow: &BitMask, required: &BitMask) -> bool {
        allow.contains_all(required)
    }

    /// Check `required` against the actor's allow mask and fail with
    /// the denied bits and their field names.
    pub fn authorize(
        &self,
        storage: &SqliteStorage,
        actor_id: ActorId,
        role: RoleId,
        entity: EntityKind,
        required: &BitMask,
    ) -> Result<(), EngineError> {
        let allow = self.allow_mask(storage, actor_id, role, entity)?;
        if allow.contains_all(required) {
            return Ok(());
        }
        let mut bits = Vec::new();
        let mut fields = Vec::new();
        for bit in required.bits() {
            if allow.test(bit) {
                continue;
            }
            bits.push(bit);
            if let Some(group) = fieldmap::group_for_bit(entity, bit) {
                if group.is_relation() {
                    fields.push(group.name.to_string());
                } else {
                    fields.extend(group.fields.iter().map(|f| f.to_string()));
                }
            }
        }
        Err(EngineError::PermissionDenied { bits, fields })
    }

    pub fn permission_details(
        &self,
        storage: &SqliteStorage,
        actor_id: ActorId,
        role: RoleId,
        entity: EntityKind,
    ) -> Result<PermissionDetails, EngineError> {
        let allow = self.allow_mask(storage, actor_id, role, entity)?;
        let mut fields = BTreeMap::new();
        let mut scalar_fields = Vec::new();
        let mut relation_fields = Vec::new();
        for group in fieldmap::groups(entity) {
            let editable = allow.test(group.bit);
            if group.is_relation() {
                fields.insert(group.name.to_string(), editable);
                if editable {
                    relation_fields.push(group.name.to_string());
                }
            } else {
                for field in group.fields {
                    fields.insert(field.to_string(), editable);
                    if editable {
                        scalar_fields.push(field.to_string());
                    }
                }
            }
        }
        Ok(PermissionDetails {
            mask: allow.to_hex(),
            fields,
            scalar_fields,
            relation_fields,
        })
    }
}
