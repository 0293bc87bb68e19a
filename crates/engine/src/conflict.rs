use std::collections::BTreeSet;

use opencatalog_core::edit::{ChangeSet, EditAction, EditRecord, RelationItem, RelationKind};

/// Identity of a relation item for overlap checks. Falls through from
/// row id to a recognizable text field to a structural hash, so two
/// payloads that captured the same item at different times still meet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum NaturalKey {
    Id(i64),
    Composite(String),
    Hash([u8; 32]),
}

/// Text fields tried in order when an item has no row id.
fn key_fields(kind: RelationKind) -> &'static [&'static str] {
    match kind {
        RelationKind::Link => &["url", "label", "name"],
        RelationKind::Cover => &["url", "type", "dims"],
        _ => &[],
    }
}

pub fn natural_key(kind: RelationKind, item: &RelationItem) -> NaturalKey {
    if let Some(id) = item.id {
        return NaturalKey::Id(id);
    }
    for key in key_fields(kind) {
        if let Some(value) = item.field(key) {
            if let Some(s) = value.as_text() {
                return NaturalKey::Composite(format!("{key}={s}"));
            }
        }
    }
    NaturalKey::Hash(item.structural_hash())
}

/// Decides whether a later edit touches the same data as the edit
/// being undone.
pub struct ConflictDetector;

impl ConflictDetector {
    /// Rules, applied in order: scalar edits conflict on shared field
    /// names, scalar and relation edits never conflict, edits on
    /// different relation kinds never conflict, relation updates
    /// compare row ids, everything else compares natural keys.
    pub fn overlaps(&self, a: &EditRecord, b: &EditRecord) -> bool {
        match (a.action.is_relation(), b.action.is_relation()) {
            (false, false) => !a.field_changes.is_disjoint(&b.field_changes),
            (false, true) | (true, false) => false,
            (true, true) => {
                let (Some(ra), Some(rb)) = (a.relation, b.relation) else {
                    return false;
                };
                if ra != rb {
                    return false;
                }
                if a.action == EditAction::UpdateRelation || b.action == EditAction::UpdateRelation
                {
                    let ids_a = numeric_ids(&a.changes);
                    let ids_b = numeric_ids(&b.changes);
                    return !ids_a.is_disjoint(&ids_b);
                }
                let keys_a = natural_keys(ra, &a.changes);
                let keys_b = natural_keys(rb, &b.changes);
                !keys_a.is_disjoint(&keys_b)
            }
        }
    }
}

fn numeric_ids(changes: &ChangeSet) -> BTreeSet<i64> {
    changes.relation_items().filter_map(|item| item.id).collect()
}

fn natural_keys(kind: RelationKind, changes: &ChangeSet) -> BTreeSet<NaturalKey> {
    changes
        .relation_items()
        .map(|item| natural_key(kind, item))
        .collect()
}
