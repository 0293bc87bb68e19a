use crate::bitmask::BitMask;
use crate::edit::{EntityKind, RelationKind};

/// One row of the field-group registry. Bit indices are stable
/// identifiers per entity; new groups append, existing bits never move.
#[derive(Debug, Clone, Copy)]
pub struct FieldGroup {
    pub entity: EntityKind,
    pub name: &'static str,
    pub bit: usize,
    pub relation: Option<RelationKind>,
    pub fields: &'static [&'static str],
}

impl FieldGroup {
    pub fn is_relation(&self) -> bool {
        self.relation.is_some()
    }
}

/// The registry, ordered by (entity, bit). Unique per (entity, name)
/// and per (entity, bit).
pub const FIELD_GROUPS: &[FieldGroup] = &[
    // game
    FieldGroup {
        entity: EntityKind::Game,
        name: "titles",
        bit: 0,
        relation: None,
        fields: &["title_en", "title_jp", "title_zh"],
    },
    FieldGroup {
        entity: EntityKind::Game,
        name: "release",
        bit: 1,
        relation: None,
        fields: &["release_date", "status"],
    },
    FieldGroup {
        entity: EntityKind::Game,
        name: "description",
        bit: 2,
        relation: None,
        fields: &["description"],
    },
    FieldGroup {
        entity: EntityKind::Game,
        name: "staff",
        bit: 3,
        relation: None,
        fields: &["staff_note"],
    },
    FieldGroup {
        entity: EntityKind::Game,
        name: "link",
        bit: 4,
        relation: Some(RelationKind::Link),
        fields: &[],
    },
    FieldGroup {
        entity: EntityKind::Game,
        name: "cover",
        bit: 5,
        relation: Some(RelationKind::Cover),
        fields: &[],
    },
    FieldGroup {
        entity: EntityKind::Game,
        name: "image",
        bit: 6,
        relation: Some(RelationKind::Image),
        fields: &[],
    },
    FieldGroup {
        entity: EntityKind::Game,
        name: "developer",
        bit: 7,
        relation: Some(RelationKind::Developer),
        fields: &[],
    },
    FieldGroup {
        entity: EntityKind::Game,
        name: "character",
        bit: 8,
        relation: Some(RelationKind::Character),
        fields: &[],
    },
    // developer
    FieldGroup {
        entity: EntityKind::Developer,
        name: "profile",
        bit: 0,
        relation: None,
        fields: &["name", "country"],
    },
    FieldGroup {
        entity: EntityKind::Developer,
        name: "contact",
        bit: 1,
        relation: None,
        fields: &["website", "twitter"],
    },
    FieldGroup {
        entity: EntityKind::Developer,
        name: "description",
        bit: 2,
        relation: None,
        fields: &["description"],
    },
    FieldGroup {
        entity: EntityKind::Developer,
        name: "link",
        bit: 3,
        relation: Some(RelationKind::Link),
        fields: &[],
    },
    // character
    FieldGroup {
        entity: EntityKind::Character,
        name: "profile",
        bit: 0,
        relation: None,
        fields: &["name", "name_jp"],
    },
    FieldGroup {
        entity: EntityKind::Character,
        name: "description",
        bit: 1,
        relation: None,
        fields: &["description"],
    },
    FieldGroup {
        entity: EntityKind::Character,
        name: "image",
        bit: 2,
        relation: Some(RelationKind::Image),
        fields: &[],
    },
];

/// Registry entries for one entity, ascending bit order.
pub fn groups(entity: EntityKind) -> impl Iterator<Item = &'static FieldGroup> {
    FIELD_GROUPS.iter().filter(move |g| g.entity == entity)
}

pub fn group_for_bit(entity: EntityKind, bit: usize) -> Option<&'static FieldGroup> {
    FIELD_GROUPS
        .iter()
        .find(|g| g.entity == entity && g.bit == bit)
}

/// Concrete scalar field names behind one bit.
pub fn fields_for_bit(entity: EntityKind, bit: usize) -> &'static [&'static str] {
    group_for_bit(entity, bit).map(|g| g.fields).unwrap_or(&[])
}

/// Mask covering the named scalar fields. Fields the registry does not
/// know map to no bit and come back in the second slot.
pub fn mask_for_fields<'a, I>(entity: EntityKind, fields: I) -> (BitMask, Vec<String>)
where
    I: IntoIterator<Item = &'a str>,
{
    let mut mask = BitMask::new();
    let mut unknown = Vec::new();
    for field in fields {
        let group = FIELD_GROUPS
            .iter()
            .find(|g| g.entity == entity && !g.is_relation() && g.fields.contains(&field));
        match group {
            Some(g) => mask.set(g.bit),
            None => unknown.push(field.to_string()),
        }
    }
    (mask, unknown)
}

/// Mask with the single bit of a relation group, if the entity has one
/// for this kind.
pub fn mask_for_relation(entity: EntityKind, kind: RelationKind) -> Option<BitMask> {
    FIELD_GROUPS
        .iter()
        .find(|g| g.entity == entity && g.relation == Some(kind))
        .map(|g| BitMask::with_bit(g.bit))
}
