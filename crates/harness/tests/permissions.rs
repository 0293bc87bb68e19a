use opencatalog_core::{
    bitmask::BitMask,
    edit::{EntityKind, RelationKind},
    field_value::FieldValue,
};
use opencatalog_engine::EngineError;
use opencatalog_harness::{link_item, TestCatalog};

// ============================================================================
// Grants
// ============================================================================

#[test]
fn role_and_user_masks_are_additive() -> Result<(), Box<dyn std::error::Error>> {
    let mut cat = TestCatalog::new()?;
    let game = cat.create(EntityKind::Game)?;
    cat.grant_fields(EntityKind::Game, &["title_en"])?;

    // Role covers titles.
    assert!(cat
        .update_scalar(
            EntityKind::Game,
            game,
            "title_en",
            FieldValue::Text("Moon Trail".into()),
        )?
        .is_some());

    // Release group is still denied.
    let result = cat.update_scalar(
        EntityKind::Game,
        game,
        "status",
        FieldValue::Text("released".into()),
    );
    assert!(matches!(result, Err(EngineError::PermissionDenied { .. })));

    // A per-user grant opens it without touching the role.
    cat.grant_user_fields(cat.actor, EntityKind::Game, &["status"])?;
    assert!(cat
        .update_scalar(
            EntityKind::Game,
            game,
            "status",
            FieldValue::Text("released".into()),
        )?
        .is_some());

    Ok(())
}

#[test]
fn denial_names_bits_and_fields() -> Result<(), Box<dyn std::error::Error>> {
    let mut cat = TestCatalog::new()?;
    let game = cat.create(EntityKind::Game)?;
    cat.grant_fields(EntityKind::Game, &["title_en"])?;

    let result = cat.update_scalars(
        EntityKind::Game,
        game,
        vec![
            ("title_jp", FieldValue::Text("月の道".into())),
            ("description", FieldValue::Text("denied".into())),
        ],
    );
    let Err(EngineError::PermissionDenied { bits, fields }) = result else {
        panic!("expected a permission denial, got: {result:?}");
    };
    // titles is granted; only the description group (bit 2) is missing.
    assert_eq!(bits, vec![2]);
    assert!(fields.contains(&"description".to_string()));

    Ok(())
}

#[test]
fn relation_edit_requires_relation_bit() -> Result<(), Box<dyn std::error::Error>> {
    let mut cat = TestCatalog::new()?;
    let game = cat.create(EntityKind::Game)?;
    cat.grant_fields(EntityKind::Game, &["title_en"])?;

    let result = cat.add_items(
        EntityKind::Game,
        game,
        RelationKind::Link,
        vec![link_item("https://example.com", "official")],
    );
    let Err(EngineError::PermissionDenied { bits, fields }) = result else {
        panic!("expected a permission denial, got: {result:?}");
    };
    assert_eq!(bits, vec![4]);
    assert!(fields.contains(&"link".to_string()));

    Ok(())
}

#[test]
fn grants_are_per_entity() -> Result<(), Box<dyn std::error::Error>> {
    let mut cat = TestCatalog::new()?;
    cat.grant_all(EntityKind::Developer)?;
    let dev = cat.create(EntityKind::Developer)?;
    let game = cat.create(EntityKind::Game)?;

    // Developer grant stands.
    assert!(cat
        .update_scalar(
            EntityKind::Developer,
            dev,
            "name",
            FieldValue::Text("Nightcap Studio".into()),
        )?
        .is_some());

    // No game grant exists and nothing carries over from developer.
    let result = cat.update_scalar(
        EntityKind::Game,
        game,
        "title_en",
        FieldValue::Text("Moon Trail".into()),
    );
    assert!(matches!(result, Err(EngineError::PermissionDenied { .. })));

    Ok(())
}

// ============================================================================
// Details report
// ============================================================================

#[test]
fn permission_details_partitions_fields() -> Result<(), Box<dyn std::error::Error>> {
    let mut cat = TestCatalog::new()?;
    // titles (bit 0) and link (bit 4)
    let mut mask = BitMask::with_bit(0);
    mask.set(4);
    cat.engine.grant_role_mask(cat.role, EntityKind::Game, &mask)?;

    let details = cat
        .engine
        .permission_details(cat.actor, cat.role, EntityKind::Game)?;

    assert_eq!(details.mask, mask.to_hex());

    // Every titles field is editable, the rest of the scalars are not.
    assert_eq!(details.fields.get("title_en"), Some(&true));
    assert_eq!(details.fields.get("title_jp"), Some(&true));
    assert_eq!(details.fields.get("description"), Some(&false));
    assert_eq!(details.fields.get("link"), Some(&true));
    assert_eq!(details.fields.get("cover"), Some(&false));

    assert!(details.scalar_fields.contains(&"title_en".to_string()));
    assert!(!details.scalar_fields.contains(&"description".to_string()));
    assert_eq!(details.relation_fields, vec!["link".to_string()]);

    Ok(())
}
