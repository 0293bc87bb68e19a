use opencatalog_core::{
    edit::{ChangeSet, EditAction, EntityKind, RelationKind},
    field_value::FieldValue,
    ids::EditId,
};
use opencatalog_engine::{EngineError, UndoMode, UndoOptions, UndoOutcome};
use opencatalog_harness::{link_item, TestCatalog};
use opencatalog_storage::Storage;

// ============================================================================
// Scalar undo
// ============================================================================

#[test]
fn undo_scalar_restores_previous_value() -> Result<(), Box<dyn std::error::Error>> {
    let mut cat = TestCatalog::new()?;
    cat.grant_all(EntityKind::Game)?;
    let game = cat.create(EntityKind::Game)?;

    cat.update_scalar(
        EntityKind::Game,
        game,
        "title_en",
        FieldValue::Text("Moon Trail".into()),
    )?;
    let edit = cat
        .update_scalar(
            EntityKind::Game,
            game,
            "title_en",
            FieldValue::Text("Mon Trail".into()),
        )?
        .expect("changed update");

    let outcome = cat
        .engine
        .undo(edit.id, cat.actor, cat.role, UndoOptions::default())?;
    let UndoOutcome::Applied { undone, inverses, .. } = outcome else {
        panic!("undo should apply");
    };
    assert_eq!(undone, vec![edit.id]);
    assert_eq!(inverses.len(), 1);

    let title = cat.engine.storage().get_field(game, "title_en")?;
    assert_eq!(title, Some(FieldValue::Text("Moon Trail".into())));

    let inverse = cat
        .engine
        .get_edit(inverses[0])?
        .expect("inverse entry exists");
    assert!(inverse.undo);
    assert_eq!(inverse.undo_of, Some(edit.id));
    assert_eq!(inverse.action, EditAction::UpdateScalar);
    let ChangeSet::Scalar { after, .. } = &inverse.changes else {
        panic!("scalar payload expected");
    };
    assert_eq!(
        after.get("title_en"),
        Some(&FieldValue::Text("Moon Trail".into()))
    );

    Ok(())
}

#[test]
fn undo_missing_edit_fails() -> Result<(), Box<dyn std::error::Error>> {
    let mut cat = TestCatalog::new()?;
    let result = cat
        .engine
        .undo(EditId::new(), cat.actor, cat.role, UndoOptions::default());
    assert!(matches!(result, Err(EngineError::EditNotFound(_))));
    Ok(())
}

#[test]
fn double_undo_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let mut cat = TestCatalog::new()?;
    cat.grant_all(EntityKind::Game)?;
    let game = cat.create(EntityKind::Game)?;

    let edit = cat
        .update_scalar(
            EntityKind::Game,
            game,
            "title_en",
            FieldValue::Text("Moon Trail".into()),
        )?
        .expect("changed update");

    cat.engine
        .undo(edit.id, cat.actor, cat.role, UndoOptions::default())?;
    let result = cat
        .engine
        .undo(edit.id, cat.actor, cat.role, UndoOptions::default());
    assert!(
        matches!(result, Err(EngineError::AlreadyUndone { .. })),
        "second undo should be rejected, got: {result:?}"
    );

    Ok(())
}

#[test]
fn redo_by_undoing_the_undo() -> Result<(), Box<dyn std::error::Error>> {
    let mut cat = TestCatalog::new()?;
    cat.grant_all(EntityKind::Game)?;
    let game = cat.create(EntityKind::Game)?;

    let edit = cat
        .update_scalar(
            EntityKind::Game,
            game,
            "title_en",
            FieldValue::Text("Moon Trail".into()),
        )?
        .expect("changed update");
    let outcome = cat
        .engine
        .undo(edit.id, cat.actor, cat.role, UndoOptions::default())?;
    let UndoOutcome::Applied { inverses, .. } = outcome else {
        panic!("undo should apply");
    };
    assert!(cat.engine.storage().get_field(game, "title_en")?.is_none());

    // An undo entry is a regular ledger entry; undoing it redoes.
    cat.engine
        .undo(inverses[0], cat.actor, cat.role, UndoOptions::default())?;
    let title = cat.engine.storage().get_field(game, "title_en")?;
    assert_eq!(title, Some(FieldValue::Text("Moon Trail".into())));

    Ok(())
}

// ============================================================================
// Conflict gate
// ============================================================================

#[test]
fn strict_undo_blocks_conflicting_edit() -> Result<(), Box<dyn std::error::Error>> {
    let mut cat = TestCatalog::new()?;
    cat.grant_all(EntityKind::Game)?;
    let game = cat.create(EntityKind::Game)?;

    cat.update_scalar(
        EntityKind::Game,
        game,
        "title_en",
        FieldValue::Text("original".into()),
    )?;
    let middle = cat
        .update_scalar(
            EntityKind::Game,
            game,
            "title_en",
            FieldValue::Text("revised".into()),
        )?
        .expect("changed update");
    let latest = cat
        .update_scalar(
            EntityKind::Game,
            game,
            "title_en",
            FieldValue::Text("final".into()),
        )?
        .expect("changed update");

    let result = cat
        .engine
        .undo(middle.id, cat.actor, cat.role, UndoOptions::default());
    let Err(EngineError::UndoConflict { conflicts }) = result else {
        panic!("expected a conflict, got: {result:?}");
    };
    assert_eq!(conflicts, vec![latest.id]);

    // Nothing moved.
    let title = cat.engine.storage().get_field(game, "title_en")?;
    assert_eq!(title, Some(FieldValue::Text("final".into())));

    Ok(())
}

#[test]
fn force_overrides_strict_conflict() -> Result<(), Box<dyn std::error::Error>> {
    let mut cat = TestCatalog::new()?;
    cat.grant_all(EntityKind::Game)?;
    let game = cat.create(EntityKind::Game)?;

    cat.update_scalar(
        EntityKind::Game,
        game,
        "title_en",
        FieldValue::Text("original".into()),
    )?;
    let middle = cat
        .update_scalar(
            EntityKind::Game,
            game,
            "title_en",
            FieldValue::Text("revised".into()),
        )?
        .expect("changed update");
    cat.update_scalar(
        EntityKind::Game,
        game,
        "title_en",
        FieldValue::Text("final".into()),
    )?;

    let options = UndoOptions {
        force: true,
        ..UndoOptions::default()
    };
    let outcome = cat.engine.undo(middle.id, cat.actor, cat.role, options)?;
    assert!(matches!(outcome, UndoOutcome::Applied { .. }));

    // Only the middle edit was reverted; its before value wins.
    let title = cat.engine.storage().get_field(game, "title_en")?;
    assert_eq!(title, Some(FieldValue::Text("original".into())));

    Ok(())
}

#[test]
fn unrelated_later_edit_does_not_block() -> Result<(), Box<dyn std::error::Error>> {
    let mut cat = TestCatalog::new()?;
    cat.grant_all(EntityKind::Game)?;
    let game = cat.create(EntityKind::Game)?;

    let edit = cat
        .update_scalar(
            EntityKind::Game,
            game,
            "title_en",
            FieldValue::Text("Moon Trail".into()),
        )?
        .expect("changed update");
    cat.update_scalar(
        EntityKind::Game,
        game,
        "release_date",
        FieldValue::Timestamp(1700000000000),
    )?;

    let outcome = cat
        .engine
        .undo(edit.id, cat.actor, cat.role, UndoOptions::default())?;
    assert!(matches!(outcome, UndoOutcome::Applied { .. }));

    assert!(cat.engine.storage().get_field(game, "title_en")?.is_none());
    assert_eq!(
        cat.engine.storage().get_field(game, "release_date")?,
        Some(FieldValue::Timestamp(1700000000000))
    );

    Ok(())
}

#[test]
fn relation_conflict_blocks_strict_undo() -> Result<(), Box<dyn std::error::Error>> {
    let mut cat = TestCatalog::new()?;
    cat.grant_all(EntityKind::Game)?;
    let game = cat.create(EntityKind::Game)?;

    let added = cat.add_items(
        EntityKind::Game,
        game,
        RelationKind::Link,
        vec![link_item("https://example.com", "official")],
    )?;
    let ChangeSet::Relation { added: items, .. } = &added.changes else {
        panic!("relation payload expected");
    };
    let item_id = items[0].id.expect("added items carry row ids");

    cat.engine.update_relation_item(
        cat.actor,
        cat.role,
        EntityKind::Game,
        game,
        RelationKind::Link,
        item_id,
        link_item("https://example.com", "homepage").fields,
        None,
    )?;

    let result = cat
        .engine
        .undo(added.id, cat.actor, cat.role, UndoOptions::default());
    assert!(matches!(result, Err(EngineError::UndoConflict { .. })));

    Ok(())
}

// ============================================================================
// Cascade and dry run
// ============================================================================

#[test]
fn cascade_undoes_latest_first() -> Result<(), Box<dyn std::error::Error>> {
    let mut cat = TestCatalog::new()?;
    cat.grant_all(EntityKind::Game)?;
    let game = cat.create(EntityKind::Game)?;

    cat.update_scalar(
        EntityKind::Game,
        game,
        "title_en",
        FieldValue::Text("a".into()),
    )?;
    let middle = cat
        .update_scalar(
            EntityKind::Game,
            game,
            "title_en",
            FieldValue::Text("b".into()),
        )?
        .expect("changed update");
    let latest = cat
        .update_scalar(
            EntityKind::Game,
            game,
            "title_en",
            FieldValue::Text("c".into()),
        )?
        .expect("changed update");

    let options = UndoOptions {
        mode: UndoMode::Cascade,
        ..UndoOptions::default()
    };
    let outcome = cat.engine.undo(middle.id, cat.actor, cat.role, options)?;
    let UndoOutcome::Applied { undone, inverses, .. } = outcome else {
        panic!("cascade should apply");
    };
    assert_eq!(undone, vec![latest.id, middle.id]);
    assert_eq!(inverses.len(), 2);

    let title = cat.engine.storage().get_field(game, "title_en")?;
    assert_eq!(title, Some(FieldValue::Text("a".into())));

    Ok(())
}

#[test]
fn dry_run_previews_without_writing() -> Result<(), Box<dyn std::error::Error>> {
    let mut cat = TestCatalog::new()?;
    cat.grant_all(EntityKind::Game)?;
    let game = cat.create(EntityKind::Game)?;

    cat.update_scalar(
        EntityKind::Game,
        game,
        "title_en",
        FieldValue::Text("a".into()),
    )?;
    let middle = cat
        .update_scalar(
            EntityKind::Game,
            game,
            "title_en",
            FieldValue::Text("b".into()),
        )?
        .expect("changed update");
    let latest = cat
        .update_scalar(
            EntityKind::Game,
            game,
            "title_en",
            FieldValue::Text("c".into()),
        )?
        .expect("changed update");

    let options = UndoOptions {
        mode: UndoMode::Cascade,
        dry_run: true,
        ..UndoOptions::default()
    };
    let outcome = cat.engine.undo(middle.id, cat.actor, cat.role, options)?;
    let UndoOutcome::Preview(preview) = outcome else {
        panic!("dry run should preview");
    };
    assert_eq!(preview.target, middle.id);
    assert_eq!(preview.will_undo, vec![latest.id, middle.id]);
    assert_eq!(preview.conflicts, vec![latest.id]);

    // Nothing changed: value, ledger length, and the edit is still undoable.
    let title = cat.engine.storage().get_field(game, "title_en")?;
    assert_eq!(title, Some(FieldValue::Text("c".into())));
    let edits = cat.engine.get_edits_for_target(EntityKind::Game, game)?;
    assert_eq!(edits.len(), 3);
    assert!(cat.engine.storage().find_undo_of(middle.id)?.is_none());

    Ok(())
}

// ============================================================================
// Relation undo strategies
// ============================================================================

#[test]
fn undo_add_relation_removes_items() -> Result<(), Box<dyn std::error::Error>> {
    let mut cat = TestCatalog::new()?;
    cat.grant_all(EntityKind::Game)?;
    let game = cat.create(EntityKind::Game)?;

    let added = cat.add_items(
        EntityKind::Game,
        game,
        RelationKind::Link,
        vec![
            link_item("https://example.com/a", "official"),
            link_item("https://example.com/b", "wiki"),
        ],
    )?;

    let outcome = cat
        .engine
        .undo(added.id, cat.actor, cat.role, UndoOptions::default())?;
    let UndoOutcome::Applied { inverses, .. } = outcome else {
        panic!("undo should apply");
    };

    let stored = cat
        .engine
        .storage()
        .get_relation_items(game, RelationKind::Link)?;
    assert!(stored.is_empty());

    let inverse = cat
        .engine
        .get_edit(inverses[0])?
        .expect("inverse entry exists");
    assert_eq!(inverse.action, EditAction::RemoveRelation);
    assert_eq!(inverse.relation, Some(RelationKind::Link));

    Ok(())
}

#[test]
fn undo_remove_relation_restores_items() -> Result<(), Box<dyn std::error::Error>> {
    let mut cat = TestCatalog::new()?;
    cat.grant_all(EntityKind::Game)?;
    let game = cat.create(EntityKind::Game)?;

    let added = cat.add_items(
        EntityKind::Game,
        game,
        RelationKind::Link,
        vec![link_item("https://example.com/a", "official")],
    )?;
    let ChangeSet::Relation { added: items, .. } = &added.changes else {
        panic!("relation payload expected");
    };
    let item_id = items[0].id.expect("added items carry row ids");

    let removed = cat.engine.remove_relation_items(
        cat.actor,
        cat.role,
        EntityKind::Game,
        game,
        RelationKind::Link,
        &[item_id],
        None,
    )?;
    assert!(cat
        .engine
        .storage()
        .get_relation_items(game, RelationKind::Link)?
        .is_empty());

    let outcome = cat
        .engine
        .undo(removed.id, cat.actor, cat.role, UndoOptions::default())?;
    let UndoOutcome::Applied { inverses, .. } = outcome else {
        panic!("undo should apply");
    };

    // The row comes back under its original id.
    let stored = cat
        .engine
        .storage()
        .get_relation_items(game, RelationKind::Link)?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, Some(item_id));
    assert_eq!(
        stored[0].field("url"),
        Some(&FieldValue::Text("https://example.com/a".into()))
    );

    let inverse = cat
        .engine
        .get_edit(inverses[0])?
        .expect("inverse entry exists");
    assert_eq!(inverse.action, EditAction::AddRelation);

    Ok(())
}

#[test]
fn undo_update_relation_restores_fields() -> Result<(), Box<dyn std::error::Error>> {
    let mut cat = TestCatalog::new()?;
    cat.grant_all(EntityKind::Game)?;
    let game = cat.create(EntityKind::Game)?;

    let added = cat.add_items(
        EntityKind::Game,
        game,
        RelationKind::Link,
        vec![link_item("https://example.com", "official")],
    )?;
    let ChangeSet::Relation { added: items, .. } = &added.changes else {
        panic!("relation payload expected");
    };
    let item_id = items[0].id.expect("added items carry row ids");

    let updated = cat.engine.update_relation_item(
        cat.actor,
        cat.role,
        EntityKind::Game,
        game,
        RelationKind::Link,
        item_id,
        link_item("https://example.com", "homepage").fields,
        None,
    )?;

    cat.engine
        .undo(updated.id, cat.actor, cat.role, UndoOptions::default())?;

    let stored = cat
        .engine
        .storage()
        .get_relation_item(item_id)?
        .expect("item still exists");
    assert_eq!(
        stored.field("label"),
        Some(&FieldValue::Text("official".into()))
    );

    Ok(())
}

// ============================================================================
// Rejected strategies
// ============================================================================

#[test]
fn set_relation_undo_is_not_implemented() -> Result<(), Box<dyn std::error::Error>> {
    let mut cat = TestCatalog::new()?;
    cat.grant_all(EntityKind::Game)?;
    let game = cat.create(EntityKind::Game)?;

    let set = cat.engine.set_relation_items(
        cat.actor,
        cat.role,
        EntityKind::Game,
        game,
        RelationKind::Link,
        vec![link_item("https://example.com", "official")],
        None,
    )?;

    let result = cat
        .engine
        .undo(set.id, cat.actor, cat.role, UndoOptions::default());
    assert!(
        matches!(result, Err(EngineError::NotImplemented { .. })),
        "set_relation has no inverse, got: {result:?}"
    );

    // The rejected undo rolled back; items are untouched.
    let stored = cat
        .engine
        .storage()
        .get_relation_items(game, RelationKind::Link)?;
    assert_eq!(stored.len(), 1);

    Ok(())
}

#[test]
fn character_undo_is_not_implemented() -> Result<(), Box<dyn std::error::Error>> {
    let mut cat = TestCatalog::new()?;
    cat.grant_all(EntityKind::Character)?;
    let character = cat.create(EntityKind::Character)?;

    let edit = cat
        .update_scalar(
            EntityKind::Character,
            character,
            "name",
            FieldValue::Text("Mio".into()),
        )?
        .expect("changed update");

    let result = cat
        .engine
        .undo(edit.id, cat.actor, cat.role, UndoOptions::default());
    assert!(matches!(result, Err(EngineError::NotImplemented { .. })));

    // The edit itself stands.
    assert_eq!(
        cat.engine.storage().get_field(character, "name")?,
        Some(FieldValue::Text("Mio".into()))
    );

    Ok(())
}

// ============================================================================
// Search refresh
// ============================================================================

#[test]
fn undo_refreshes_search_index() -> Result<(), Box<dyn std::error::Error>> {
    let mut cat = TestCatalog::new()?;
    cat.grant_all(EntityKind::Game)?;
    let game = cat.create(EntityKind::Game)?;

    let edit = cat
        .update_scalar(
            EntityKind::Game,
            game,
            "title_en",
            FieldValue::Text("Moon Trail".into()),
        )?
        .expect("changed update");
    cat.engine
        .undo(edit.id, cat.actor, cat.role, UndoOptions::default())?;

    let docs = cat.indexed_games();
    assert_eq!(docs.len(), 2);
    // The post-undo document no longer carries the title.
    assert!(docs[1].fields.get("title_en").is_none());

    Ok(())
}
