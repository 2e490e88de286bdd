use std::time::Duration;

use pricebook_core::{FieldValue, NaturalKey, OperatorId, RowKey, ValidationReason};
use pricebook_engine::driver::{execute, run_to_idle};
use pricebook_engine::{DirtyState, EditorConfig, EditorEvent, EngineError, Outcome};
use pricebook_harness::{fields, sample_catalog, TestDesk};
use pricebook_storage::SqliteBackend;

fn atlas() -> Result<RowKey, Box<dyn std::error::Error>> {
    Ok(RowKey::Base(NaturalKey::from_parts(&["acme", "atlas-large", "us-east"])?))
}

fn catalog_rows(desk: &TestDesk) -> Vec<RowKey> {
    desk.editor.merged_rows().iter().map(|r| r.row_key()).collect()
}

// ============================================================================
// Coalescing
// ============================================================================

#[test]
fn burst_of_edits_produces_one_write() -> Result<(), Box<dyn std::error::Error>> {
    let mut desk = TestDesk::in_memory("alice", sample_catalog()?)?;
    let row = atlas()?;

    assert!(desk.edit(&row, "input_per_1m", "12")?.is_empty());
    assert!(desk.advance(100).is_empty());
    assert!(desk.edit(&row, "output_per_1m", "25")?.is_empty());
    assert!(desk.advance(100).is_empty());

    // Nothing has been sent while the batch is settling.
    assert_eq!(desk.backend.write_count()?, 0);

    let outcomes = desk.settle();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], Outcome::Committed { version: 1, .. }));

    let history = desk.backend.write_history(&row)?;
    assert_eq!(history.len(), 1);
    assert_eq!(
        history[0].fields,
        fields(&[
            ("input_per_1m", FieldValue::Currency(12.0)),
            ("output_per_1m", FieldValue::Currency(25.0)),
        ])
    );
    assert_eq!(desk.value(&row, "input_per_1m"), FieldValue::Currency(12.0));
    Ok(())
}

#[test]
fn repeated_edits_to_one_field_keep_the_last_value() -> Result<(), Box<dyn std::error::Error>> {
    let mut desk = TestDesk::in_memory("alice", sample_catalog()?)?;
    let row = atlas()?;

    for raw in ["1", "12", "12.5", "13"] {
        desk.edit(&row, "input_per_1m", raw)?;
        desk.advance(50);
    }
    desk.settle();

    let history = desk.backend.write_history(&row)?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].fields, fields(&[("input_per_1m", FieldValue::Currency(13.0))]));
    Ok(())
}

#[test]
fn flush_all_skips_the_debounce() -> Result<(), Box<dyn std::error::Error>> {
    let mut desk = TestDesk::in_memory("alice", sample_catalog()?)?;
    let row = atlas()?;

    desk.edit(&row, "notes", "promo pricing")?;
    let outcomes = desk.flush();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(desk.version(&row), Some(1));
    assert!(desk.editor.pending_rows().is_empty());
    Ok(())
}

#[test]
fn same_row_batches_wait_for_the_commit_in_flight() -> Result<(), Box<dyn std::error::Error>> {
    let mut desk = TestDesk::in_memory("alice", sample_catalog()?)?;
    let row = atlas()?;
    let t0 = desk.now();

    desk.editor.edit(&row, "input_per_1m", "12", t0)?;
    let first = desk.editor.poll(t0 + Duration::from_millis(300));
    assert_eq!(first.len(), 1);

    // A second batch for the same row settles while the first is unanswered.
    desk.editor.edit(&row, "output_per_1m", "25", t0 + Duration::from_millis(310))?;
    assert!(desk.editor.poll(t0 + Duration::from_millis(700)).is_empty());
    assert_eq!(desk.editor.pending_rows(), vec![row.clone()]);

    let outcomes = run_to_idle(&mut desk.editor, &mut desk.backend, first);
    assert!(matches!(outcomes[0], Outcome::Committed { version: 1, .. }));

    // The queued batch now builds on our own commit instead of conflicting.
    assert_eq!(desk.editor.pending_batch(&row).map(|b| b.captured_version), Some(1));
    let second = desk.editor.poll(t0 + Duration::from_millis(700));
    let outcomes = run_to_idle(&mut desk.editor, &mut desk.backend, second);
    assert!(matches!(outcomes[0], Outcome::Committed { version: 2, .. }));

    let versions: Vec<u64> = desk.backend.write_history(&row)?.iter().map(|w| w.version).collect();
    assert_eq!(versions, vec![1, 2]);
    Ok(())
}

#[test]
fn different_rows_flush_independently() -> Result<(), Box<dyn std::error::Error>> {
    let mut desk = TestDesk::in_memory("alice", sample_catalog()?)?;
    let rows = catalog_rows(&desk);
    let t0 = desk.now();

    desk.editor.edit(&rows[0], "notes", "a", t0)?;
    desk.editor.edit(&rows[1], "notes", "b", t0 + Duration::from_millis(200))?;

    let due = desk.editor.poll(t0 + Duration::from_millis(300));
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].row(), rows[0]);

    let due_later = desk.editor.poll(t0 + Duration::from_millis(500));
    assert_eq!(due_later.len(), 1);
    assert_eq!(due_later[0].row(), rows[1]);

    // Both in flight at once; answer them out of order.
    let mut responses: Vec<_> = due
        .into_iter()
        .chain(due_later)
        .map(|r| execute(&mut desk.backend, r))
        .collect();
    responses.reverse();
    let mut follow_ups = Vec::new();
    for response in responses {
        follow_ups.extend(desk.editor.complete(response).requests);
    }
    let outcomes = run_to_idle(&mut desk.editor, &mut desk.backend, follow_ups);
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| matches!(o, Outcome::Committed { version: 1, .. })));
    Ok(())
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn invalid_input_never_reaches_the_queue() -> Result<(), Box<dyn std::error::Error>> {
    let mut desk = TestDesk::in_memory("alice", sample_catalog()?)?;
    let row = atlas()?;

    let cases = [
        ("discount_pct", "150"),
        ("input_per_1m", "-1"),
        ("input_per_1m", "NaN"),
        ("gpu_count", "1.5"),
        ("provider", "acme; drop"),
        ("model", ""),
        ("colour", "blue"),
    ];
    for (field, raw) in cases {
        let err = desk.edit(&row, field, raw).unwrap_err();
        let err = err.downcast_ref::<EngineError>().unwrap();
        assert!(matches!(err, EngineError::Validation(_)), "{field}={raw:?} gave {err}");
    }

    let err = desk.edit(&row, "margin_pct", "101").unwrap_err();
    match err.downcast_ref::<EngineError>() {
        Some(EngineError::Validation(e)) => {
            assert_eq!(e.field, "margin_pct");
            assert_eq!(e.reason, ValidationReason::OutOfRange { min: 0.0, max: 100.0 });
        }
        other => panic!("expected validation error, got {other:?}"),
    }

    assert!(desk.editor.pending_rows().is_empty());
    desk.settle();
    assert_eq!(desk.backend.write_count()?, 0);
    Ok(())
}

#[test]
fn empty_input_is_unset_not_zero() -> Result<(), Box<dyn std::error::Error>> {
    let mut desk = TestDesk::in_memory("alice", sample_catalog()?)?;
    let row = atlas()?;

    desk.edit(&row, "input_per_1m", "")?;
    desk.edit(&row, "output_per_1m", "0")?;
    desk.settle();

    assert_eq!(desk.value(&row, "input_per_1m"), FieldValue::Unset);
    assert_eq!(desk.value(&row, "output_per_1m"), FieldValue::Currency(0.0));

    let merged = desk.editor.merged_row(&row).unwrap();
    assert_eq!(merged.original_values["input_per_1m"], FieldValue::Currency(10.0));
    Ok(())
}

#[test]
fn edits_to_unknown_rows_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let mut desk = TestDesk::in_memory("alice", sample_catalog()?)?;
    let ghost = RowKey::Base(NaturalKey::from_parts(&["nobody", "nothing", "nowhere"])?);

    let err = desk.edit(&ghost, "notes", "x").unwrap_err();
    assert!(matches!(err.downcast_ref::<EngineError>(), Some(EngineError::UnknownRow(_))));
    Ok(())
}

// ============================================================================
// Backpressure
// ============================================================================

#[test]
fn ceiling_force_flushes_oldest_batches() -> Result<(), Box<dyn std::error::Error>> {
    let config = EditorConfig {
        max_pending_batches: 3,
        ..EditorConfig::default()
    };
    let operator = OperatorId::new("alice");
    let backend = SqliteBackend::open_in_memory(operator.clone())?;
    let mut desk = TestDesk::with_operator(backend, operator, config, sample_catalog()?)?;
    let rows = catalog_rows(&desk);

    // Edit back to front so flush order differs from dataset order.
    assert!(desk.edit(&rows[4], "notes", "e")?.is_empty());
    desk.advance(10);
    assert!(desk.edit(&rows[3], "notes", "d")?.is_empty());
    desk.advance(10);
    let outcomes = desk.edit(&rows[2], "notes", "c")?;

    let committed: Vec<RowKey> = outcomes
        .iter()
        .filter_map(|o| match o {
            Outcome::Committed { row, .. } => Some(row.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(committed, vec![rows[4].clone(), rows[3].clone(), rows[2].clone()]);
    assert!(desk.editor.pending_rows().is_empty());

    // Below the ceiling, batches wait for their debounce again.
    assert!(desk.edit(&rows[1], "notes", "b")?.is_empty());
    assert!(desk.edit(&rows[0], "notes", "a")?.is_empty());
    assert_eq!(desk.editor.pending_rows().len(), 2);
    Ok(())
}

// ============================================================================
// Dirty state and events
// ============================================================================

#[test]
fn dirty_state_tracks_unsaved_work() -> Result<(), Box<dyn std::error::Error>> {
    let mut desk = TestDesk::in_memory("alice", sample_catalog()?)?;
    let row = atlas()?;
    let dirty = DirtyState::new();
    desk.editor.attach_dirty_state(&dirty)?;
    assert!(!dirty.is_dirty());

    desk.edit(&row, "notes", "draft")?;
    assert!(dirty.is_dirty());
    desk.settle();
    assert!(!dirty.is_dirty());

    desk.edit(&row, "notes", "second draft")?;
    assert!(dirty.is_dirty());
    desk.editor.teardown();
    assert!(!dirty.is_dirty());
    Ok(())
}

#[test]
fn dirty_state_is_shared_across_editors() -> Result<(), Box<dyn std::error::Error>> {
    let dirty = DirtyState::new();
    let mut a = TestDesk::in_memory("alice", sample_catalog()?)?;
    let mut b = TestDesk::in_memory("bob", sample_catalog()?)?;
    a.editor.attach_dirty_state(&dirty)?;
    b.editor.attach_dirty_state(&dirty)?;
    let row = atlas()?;

    a.edit(&row, "notes", "x")?;
    b.edit(&row, "notes", "y")?;
    assert_eq!(dirty.dirty_count(), 2);

    a.settle();
    assert!(dirty.is_dirty());
    b.settle();
    assert!(!dirty.is_dirty());
    Ok(())
}

#[test]
fn commits_are_announced_to_subscribers() -> Result<(), Box<dyn std::error::Error>> {
    let mut desk = TestDesk::in_memory("alice", sample_catalog()?)?;
    let row = atlas()?;
    let mut events = desk.editor.subscribe();

    desk.edit(&row, "notes", "x")?;
    assert!(events.try_recv().is_err());
    desk.settle();

    assert_eq!(events.try_recv()?, EditorEvent::RowsChanged { rows: vec![row] });
    Ok(())
}
