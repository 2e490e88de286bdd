//! Optimistic concurrency check around every commit.
//!
//! The decisions are pure functions over what the backend reported, so the
//! editor can drive them from responses and callers without an editor can
//! use [`commit`] directly.

use pricebook_core::{FieldMap, RowKey};
use pricebook_storage::{PricingBackend, ServerSnapshot, StorageError, WriteOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckDecision {
    /// Versions match, or the check was unavailable. Write next.
    Proceed,
    /// The server moved past the captured version. Do not write.
    Drift(ServerSnapshot),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { version: u64, snapshot: ServerSnapshot },
    Conflict(ServerSnapshot),
}

/// Interpret a pre-commit version check.
///
/// A failed or unsupported check degrades to a direct write; the backend's
/// own captured-version comparison still catches a stale write.
pub fn evaluate_check(
    row: &RowKey,
    captured_version: u64,
    result: Result<Option<ServerSnapshot>, StorageError>,
) -> CheckDecision {
    match result {
        Ok(Some(snapshot)) if snapshot.version != captured_version => {
            tracing::info!(
                row = %row,
                captured = captured_version,
                server = snapshot.version,
                "version drift detected before write"
            );
            CheckDecision::Drift(snapshot)
        }
        Ok(Some(_)) => CheckDecision::Proceed,
        Ok(None) => {
            tracing::debug!(row = %row, "backend has no version check; writing directly");
            CheckDecision::Proceed
        }
        Err(e) => {
            tracing::warn!(row = %row, error = %e, "version check failed; attempting direct write");
            CheckDecision::Proceed
        }
    }
}

/// Interpret the backend's answer to a write made at `captured_version`.
pub fn evaluate_write(row: &RowKey, captured_version: u64, outcome: WriteOutcome) -> CommitOutcome {
    match outcome {
        WriteOutcome::Committed(snapshot) => {
            let expected = captured_version + 1;
            if snapshot.version != expected {
                tracing::warn!(
                    row = %row,
                    expected,
                    reported = snapshot.version,
                    "backend reported an unexpected committed version"
                );
            }
            CommitOutcome::Committed {
                version: snapshot.version,
                snapshot,
            }
        }
        WriteOutcome::Conflict(snapshot) => {
            tracing::info!(
                row = %row,
                captured = captured_version,
                server = snapshot.version,
                "write rejected as stale"
            );
            CommitOutcome::Conflict(snapshot)
        }
    }
}

/// Check, then write, against a backend in one call.
pub fn commit<B: PricingBackend + ?Sized>(
    backend: &mut B,
    row: &RowKey,
    fields: &FieldMap,
    captured_version: u64,
    pre_check: bool,
) -> Result<CommitOutcome, StorageError> {
    if pre_check {
        let checked = backend.check_version(row);
        if let CheckDecision::Drift(snapshot) = evaluate_check(row, captured_version, checked) {
            return Ok(CommitOutcome::Conflict(snapshot));
        }
    }
    let outcome = backend.write(row, fields, captured_version)?;
    Ok(evaluate_write(row, captured_version, outcome))
}
