use pricebook_core::{FieldValue, NaturalKey, OperatorId, RowKey};
use pricebook_engine::{ConflictState, EditorConfig, EditorEvent, EngineError, Outcome, Resolution};
use pricebook_harness::{sample_catalog, FlakyBackend, TestDesk, TestOffice};
use pricebook_storage::{PricingBackend, SqliteBackend};

const ALICE: usize = 0;
const BOB: usize = 1;

fn atlas() -> Result<RowKey, Box<dyn std::error::Error>> {
    Ok(RowKey::Base(NaturalKey::from_parts(&["acme", "atlas-large", "us-east"])?))
}

/// Commit `n` distinct notes so the row's version advances by `n`.
fn bump<B: PricingBackend>(desk: &mut TestDesk<B>, row: &RowKey, n: usize) -> Result<(), Box<dyn std::error::Error>> {
    for i in 0..n {
        desk.edit(row, "notes", &format!("revision {i}"))?;
        desk.settle();
    }
    Ok(())
}

/// Alice and Bob both at version 3; then Alice commits version 4 with a new
/// input price that Bob has not seen.
fn diverged_office() -> Result<(TestOffice, RowKey), Box<dyn std::error::Error>> {
    let row = atlas()?;
    let mut office = TestOffice::new(sample_catalog()?)?;
    office.add_desk("alice")?;
    bump(office.desk_mut(ALICE), &row, 3)?;
    office.add_desk("bob")?;
    assert_eq!(office.desk(BOB).version(&row), Some(3));

    let alice = office.desk_mut(ALICE);
    alice.edit(&row, "input_per_1m", "12")?;
    let outcomes = alice.settle();
    assert!(matches!(outcomes[0], Outcome::Committed { version: 4, .. }));
    Ok((office, row))
}

// ============================================================================
// Detection
// ============================================================================

#[test]
fn stale_captured_version_is_a_conflict_with_zero_writes() -> Result<(), Box<dyn std::error::Error>> {
    let (mut office, row) = diverged_office()?;
    let bob = office.desk_mut(BOB);
    let writes_before = bob.backend.write_count()?;

    bob.edit(&row, "input_per_1m", "15")?;
    let outcomes = bob.settle();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], Outcome::Conflicted { server_version: 4, .. }));
    assert_eq!(bob.backend.write_count()?, writes_before);

    let conflict = bob.editor.conflicts_for(&row).unwrap();
    let price = conflict.field("input_per_1m").unwrap();
    assert_eq!(price.local_version, 3);
    assert_eq!(price.server_version, 4);
    assert_eq!(price.pending_value, FieldValue::Currency(15.0));
    assert_eq!(price.server_value, FieldValue::Currency(12.0));
    assert_eq!(price.server_updated_by, Some(OperatorId::new("alice")));
    assert!(price.server_updated_at.is_some());

    assert_eq!(bob.editor.active_conflict(), Some(price));
    // Bob's view is untouched until he decides.
    assert_eq!(bob.value(&row, "input_per_1m"), FieldValue::Currency(10.0));
    assert_eq!(bob.version(&row), Some(3));
    Ok(())
}

#[test]
fn server_value_falls_back_to_base_for_untouched_fields() -> Result<(), Box<dyn std::error::Error>> {
    let (mut office, row) = diverged_office()?;
    let bob = office.desk_mut(BOB);

    // Neither override ever set output_per_1m, so the server's value is the base value.
    bob.edit(&row, "output_per_1m", "30")?;
    bob.settle();
    let conflict = bob.editor.conflicts_for(&row).unwrap();
    assert_eq!(
        conflict.field("output_per_1m").unwrap().server_value,
        FieldValue::Currency(20.0)
    );
    Ok(())
}

#[test]
fn write_side_conflict_without_pre_check() -> Result<(), Box<dyn std::error::Error>> {
    let row = atlas()?;
    let mut office = TestOffice::new(sample_catalog()?)?;
    office.add_desk("alice")?;
    office.add_desk_with(
        "bob",
        EditorConfig {
            pre_commit_check: false,
            ..EditorConfig::default()
        },
    )?;

    let (alice, bob) = office.pair_mut(ALICE, BOB);
    alice.edit(&row, "input_per_1m", "12")?;
    alice.settle();

    // Bob still holds version 0; the backend itself refuses the stale write.
    bob.edit(&row, "input_per_1m", "15")?;
    let outcomes = bob.settle();
    assert!(matches!(outcomes[0], Outcome::Conflicted { server_version: 1, .. }));
    assert_eq!(bob.backend.write_count()?, 1);
    Ok(())
}

#[test]
fn conflicted_field_refuses_new_edits() -> Result<(), Box<dyn std::error::Error>> {
    let (mut office, row) = diverged_office()?;
    let bob = office.desk_mut(BOB);
    bob.edit(&row, "input_per_1m", "15")?;
    bob.settle();

    assert_eq!(bob.editor.conflict_state(&row, "input_per_1m"), ConflictState::Conflicted);
    let err = bob.edit(&row, "input_per_1m", "16").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::FieldConflicted { .. })
    ));

    // Other fields queue, but nothing for the row flushes until resolution.
    assert_eq!(bob.editor.conflict_state(&row, "notes"), ConflictState::NoConflict);
    bob.edit(&row, "notes", "queued behind conflict")?;
    assert!(bob.settle().is_empty());
    assert_eq!(bob.editor.pending_rows(), vec![row.clone()]);
    Ok(())
}

// ============================================================================
// Resolution
// ============================================================================

#[test]
fn overwrite_commits_server_version_plus_one() -> Result<(), Box<dyn std::error::Error>> {
    let (mut office, row) = diverged_office()?;
    let bob = office.desk_mut(BOB);
    bob.edit(&row, "input_per_1m", "15")?;
    bob.settle();

    let mut events = bob.editor.subscribe();
    let outcomes = bob.resolve(&row, Resolution::Overwrite)?;
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], Outcome::Committed { version: 5, .. }));

    assert_eq!(bob.version(&row), Some(5));
    assert_eq!(bob.value(&row, "input_per_1m"), FieldValue::Currency(15.0));
    assert_eq!(bob.backend.snapshot(&row)?.version, 5);
    assert!(bob.editor.active_conflict().is_none());
    assert_eq!(
        events.try_recv()?,
        EditorEvent::ConflictResolved {
            row: row.clone(),
            resolution: Resolution::Overwrite
        }
    );
    Ok(())
}

#[test]
fn edits_queued_behind_an_overwrite_follow_it() -> Result<(), Box<dyn std::error::Error>> {
    let (mut office, row) = diverged_office()?;
    let bob = office.desk_mut(BOB);
    bob.edit(&row, "input_per_1m", "15")?;
    bob.settle();
    bob.edit(&row, "notes", "after the conflict")?;

    bob.resolve(&row, Resolution::Overwrite)?;
    let outcomes = bob.settle();
    assert!(matches!(outcomes[0], Outcome::Committed { version: 6, .. }));
    assert_eq!(bob.value(&row, "notes"), FieldValue::Text("after the conflict".into()));
    Ok(())
}

#[test]
fn overwrite_leaves_the_local_row_matching_the_server() -> Result<(), Box<dyn std::error::Error>> {
    let (mut office, row) = diverged_office()?;
    let key = NaturalKey::from_parts(&["acme", "atlas-large", "us-east"])?;
    let bob = office.desk_mut(BOB);

    // Alice changed input_per_1m; Bob's refused edit is to another field.
    bob.edit(&row, "output_per_1m", "30")?;
    bob.settle();
    let outcomes = bob.resolve(&row, Resolution::Overwrite)?;
    assert!(matches!(outcomes[0], Outcome::Committed { version: 5, .. }));

    let server = bob.backend.snapshot(&row)?;
    let entry = bob.editor.store().override_entry(&key).cloned().unwrap();
    assert_eq!(entry.fields, server.fields);
    assert_eq!(entry.version, server.version);
    assert_eq!(bob.value(&row, "input_per_1m"), FieldValue::Currency(12.0));
    assert_eq!(bob.value(&row, "output_per_1m"), FieldValue::Currency(30.0));
    Ok(())
}

#[test]
fn queued_edit_to_a_changed_field_does_not_ride_an_overwrite() -> Result<(), Box<dyn std::error::Error>> {
    let (mut office, row) = diverged_office()?;
    let bob = office.desk_mut(BOB);
    bob.edit(&row, "output_per_1m", "30")?;
    bob.settle();
    // Typed against the old input price Bob never saw change.
    bob.edit(&row, "input_per_1m", "11")?;

    bob.resolve(&row, Resolution::Overwrite)?;
    let outcomes = bob.settle();
    assert!(matches!(outcomes[0], Outcome::Conflicted { server_version: 5, .. }));
    assert_eq!(
        bob.backend.snapshot(&row)?.fields.get("input_per_1m"),
        Some(&FieldValue::Currency(12.0))
    );
    Ok(())
}

#[test]
fn discard_adopts_the_server_row() -> Result<(), Box<dyn std::error::Error>> {
    let (mut office, row) = diverged_office()?;
    let key = NaturalKey::from_parts(&["acme", "atlas-large", "us-east"])?;
    let bob = office.desk_mut(BOB);

    bob.edit(&row, "input_per_1m", "15")?;
    bob.edit(&row, "output_per_1m", "30")?;
    bob.settle();
    let writes = bob.backend.write_count()?;
    let mut events = bob.editor.subscribe();

    let outcomes = bob.resolve(&row, Resolution::Discard)?;
    assert!(outcomes.is_empty());
    assert_eq!(bob.backend.write_count()?, writes);
    assert!(bob.editor.conflicts_for(&row).is_none());

    // No refused value reached the entry; it mirrors the server instead.
    let entry = bob.editor.store().override_entry(&key).cloned().unwrap();
    assert_eq!(entry.fields, bob.backend.snapshot(&row)?.fields);
    assert_eq!(entry.version, 4);
    assert_eq!(entry.last_updated_by, OperatorId::new("alice"));
    assert_eq!(bob.value(&row, "input_per_1m"), FieldValue::Currency(12.0));
    assert_eq!(bob.value(&row, "output_per_1m"), FieldValue::Currency(20.0));

    assert_eq!(
        events.try_recv()?,
        EditorEvent::ConflictResolved {
            row: row.clone(),
            resolution: Resolution::Discard
        }
    );
    assert_eq!(events.try_recv()?, EditorEvent::RowsChanged { rows: vec![row.clone()] });
    assert_eq!(bob.editor.conflict_state(&row, "input_per_1m"), ConflictState::NoConflict);
    Ok(())
}

#[test]
fn edits_after_a_discard_commit_cleanly() -> Result<(), Box<dyn std::error::Error>> {
    let (mut office, row) = diverged_office()?;
    let bob = office.desk_mut(BOB);
    bob.edit(&row, "input_per_1m", "15")?;
    bob.settle();
    bob.edit(&row, "notes", "queued behind conflict")?;

    bob.resolve(&row, Resolution::Discard)?;
    let outcomes = bob.settle();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], Outcome::Committed { version: 5, .. }));

    bob.edit(&row, "input_per_1m", "16")?;
    let outcomes = bob.settle();
    assert!(matches!(outcomes[0], Outcome::Committed { version: 6, .. }));
    assert!(bob.editor.active_conflict().is_none());
    Ok(())
}

#[test]
fn queued_edit_to_a_changed_field_conflicts_after_discard() -> Result<(), Box<dyn std::error::Error>> {
    let (mut office, row) = diverged_office()?;
    let bob = office.desk_mut(BOB);
    bob.edit(&row, "output_per_1m", "30")?;
    bob.settle();
    bob.edit(&row, "input_per_1m", "11")?;

    bob.resolve(&row, Resolution::Discard)?;
    let outcomes = bob.settle();
    assert!(matches!(outcomes[0], Outcome::Conflicted { server_version: 4, .. }));
    let conflict = bob.editor.conflicts_for(&row).unwrap();
    assert_eq!(conflict.field("input_per_1m").unwrap().server_value, FieldValue::Currency(12.0));
    Ok(())
}

#[test]
fn refresh_adopts_the_server_state() -> Result<(), Box<dyn std::error::Error>> {
    let (mut office, row) = diverged_office()?;
    let bob = office.desk_mut(BOB);
    bob.edit(&row, "input_per_1m", "15")?;
    bob.settle();
    bob.resolve(&row, Resolution::Discard)?;

    let snapshot = bob.backend.snapshot(&row)?;
    bob.editor.refresh(&row, &snapshot)?;
    assert_eq!(bob.version(&row), Some(4));
    assert_eq!(bob.value(&row, "input_per_1m"), FieldValue::Currency(12.0));

    // A fresh edit now captures version 4 and commits cleanly.
    bob.edit(&row, "input_per_1m", "16")?;
    let outcomes = bob.settle();
    assert!(matches!(outcomes[0], Outcome::Committed { version: 5, .. }));
    Ok(())
}

#[test]
fn resolve_without_conflict_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
    let mut desk = TestDesk::in_memory("alice", sample_catalog()?)?;
    let err = desk.resolve(&atlas()?, Resolution::Overwrite).unwrap_err();
    assert!(matches!(err.downcast_ref::<EngineError>(), Some(EngineError::NoConflict(_))));
    Ok(())
}

#[test]
fn overwrite_that_loses_another_race_conflicts_again() -> Result<(), Box<dyn std::error::Error>> {
    let (mut office, row) = diverged_office()?;
    {
        let bob = office.desk_mut(BOB);
        bob.edit(&row, "input_per_1m", "15")?;
        bob.settle();
    }

    // Alice commits again before Bob decides.
    let alice = office.desk_mut(ALICE);
    alice.edit(&row, "input_per_1m", "13")?;
    alice.settle();

    let bob = office.desk_mut(BOB);
    let outcomes = bob.resolve(&row, Resolution::Overwrite)?;
    assert!(matches!(outcomes[0], Outcome::Conflicted { server_version: 5, .. }));
    let conflict = bob.editor.conflicts_for(&row).unwrap();
    assert_eq!(conflict.local_version, 4);
    assert_eq!(conflict.field("input_per_1m").unwrap().server_value, FieldValue::Currency(13.0));

    let outcomes = bob.resolve(&row, Resolution::Overwrite)?;
    assert!(matches!(outcomes[0], Outcome::Committed { version: 6, .. }));
    Ok(())
}

// ============================================================================
// Degraded version check
// ============================================================================

fn flaky_desk() -> Result<TestDesk<FlakyBackend<SqliteBackend>>, Box<dyn std::error::Error>> {
    let operator = OperatorId::new("alice");
    let backend = FlakyBackend::new(SqliteBackend::open_in_memory(operator.clone())?);
    TestDesk::with_operator(backend, operator, EditorConfig::default(), sample_catalog()?)
}

#[test]
fn missing_version_check_writes_directly() -> Result<(), Box<dyn std::error::Error>> {
    let mut desk = flaky_desk()?;
    let row = atlas()?;
    desk.backend.disable_checks(true);

    desk.edit(&row, "input_per_1m", "12")?;
    let outcomes = desk.settle();
    assert!(matches!(outcomes[0], Outcome::Committed { version: 1, .. }));
    assert_eq!(desk.backend.checks(), 1);
    assert_eq!(desk.backend.writes(), 1);
    Ok(())
}

#[test]
fn failed_version_check_is_not_a_conflict() -> Result<(), Box<dyn std::error::Error>> {
    let mut desk = flaky_desk()?;
    let row = atlas()?;
    desk.backend.fail_checks(true);

    desk.edit(&row, "input_per_1m", "12")?;
    let outcomes = desk.settle();
    assert!(matches!(outcomes[0], Outcome::Committed { version: 1, .. }));
    assert!(desk.editor.active_conflict().is_none());
    Ok(())
}

#[test]
fn degraded_check_still_catches_stale_writes() -> Result<(), Box<dyn std::error::Error>> {
    let mut desk = flaky_desk()?;
    let row = atlas()?;
    bump(&mut desk, &row, 1)?;

    // Someone else moves the row behind the editor's back.
    let mut fields = pricebook_harness::fields(&[("notes", FieldValue::Text("elsewhere".into()))]);
    fields.insert("input_per_1m".into(), FieldValue::Currency(11.0));
    desk.backend.inner_mut().write(&row, &fields, 1)?;

    desk.backend.disable_checks(true);
    desk.edit(&row, "input_per_1m", "12")?;
    let outcomes = desk.settle();
    assert!(matches!(outcomes[0], Outcome::Conflicted { server_version: 2, .. }));
    Ok(())
}
