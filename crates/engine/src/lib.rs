pub mod coalescer;
pub mod config;
pub mod conflict;
pub mod dirty;
pub mod driver;
pub mod error;
pub mod events;
pub mod guard;
pub mod projection;
pub mod protocol;
pub mod store;

pub use coalescer::{EditCoalescer, PendingBatch};
pub use config::EditorConfig;
pub use conflict::{ConflictResolver, ConflictState, Resolution, RowConflict, VersionConflict};
pub use dirty::{DirtyRegistration, DirtyState};
pub use error::EngineError;
pub use events::EditorEvent;
pub use guard::{CheckDecision, CommitOutcome};
pub use projection::{SortDirection, SortKey, ViewProjection};
pub use protocol::{Completion, Outcome, Request, Response, Ticket};
pub use store::OverrideStore;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use pricebook_core::validate::{validate, validate_map, validate_value};
use pricebook_core::{
    clock, BaseRow, CustomRow, CustomRowId, FieldMap, FieldValue, MergedRow, NaturalKey,
    OperatorId, OverrideEntry, RowKey,
};
use pricebook_storage::{PricingBackend, ServerSnapshot, StorageError, WriteOutcome};
use tokio::sync::broadcast;

use crate::events::EventBus;

/// A commit the editor is waiting on. Exactly one per row.
#[derive(Debug, Clone)]
struct InFlight {
    ticket: Ticket,
    fields: FieldMap,
    captured_version: u64,
    stage: Stage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Checking,
    Writing,
}

#[derive(Debug, Clone)]
enum Removal {
    Revert(NaturalKey),
    DeleteCustom(CustomRowId),
}

impl Removal {
    fn row(&self) -> RowKey {
        match self {
            Self::Revert(key) => RowKey::Base(key.clone()),
            Self::DeleteCustom(id) => RowKey::Custom(*id),
        }
    }
}

/// A batch whose write failed. Kept until the caller retries or abandons it.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedWrite {
    pub row: RowKey,
    pub fields: FieldMap,
    pub captured_version: u64,
    pub error: String,
    pub transient: bool,
}

/// The override editing pipeline for one editing surface.
///
/// Edits are validated, coalesced per row, guarded by an optimistic version
/// check and applied to the [`OverrideStore`] once the backend confirms
/// them. The editor performs no I/O: it returns [`Request`]s and is driven
/// forward by [`Editor::complete`].
pub struct Editor {
    config: EditorConfig,
    operator: OperatorId,
    store: OverrideStore,
    coalescer: EditCoalescer,
    resolver: ConflictResolver,
    in_flight: BTreeMap<RowKey, InFlight>,
    removals: BTreeMap<u64, Removal>,
    failed: BTreeMap<RowKey, FailedWrite>,
    events: EventBus,
    dirty: Option<DirtyRegistration>,
    epoch: u64,
    next_seq: u64,
    torn_down: bool,
}

impl Editor {
    pub fn new(
        config: EditorConfig,
        operator: OperatorId,
        base_rows: Vec<BaseRow>,
        overrides: Vec<OverrideEntry>,
        custom_rows: Vec<CustomRow>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let store = OverrideStore::with_entries(base_rows, overrides, custom_rows)?;
        let orphaned = store.orphaned().len();
        if orphaned > 0 {
            tracing::debug!(orphaned, "overrides without a base row are ignored");
        }
        Ok(Self {
            coalescer: EditCoalescer::new(config.debounce(), config.max_pending_batches),
            events: EventBus::new(config.event_capacity),
            config,
            operator,
            store,
            resolver: ConflictResolver::new(),
            in_flight: BTreeMap::new(),
            removals: BTreeMap::new(),
            failed: BTreeMap::new(),
            dirty: None,
            epoch: 0,
            next_seq: 0,
            torn_down: false,
        })
    }

    /// Build an editor from the backend's stored overrides and custom rows.
    pub fn load<B: PricingBackend + ?Sized>(
        config: EditorConfig,
        operator: OperatorId,
        base_rows: Vec<BaseRow>,
        backend: &B,
    ) -> Result<Self, EngineError> {
        let overrides = backend.load_overrides()?;
        let custom_rows = backend.load_custom_rows()?;
        tracing::info!(
            base = base_rows.len(),
            overrides = overrides.len(),
            custom = custom_rows.len(),
            "editor loaded"
        );
        Self::new(config, operator, base_rows, overrides, custom_rows)
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn operator(&self) -> &OperatorId {
        &self.operator
    }

    pub fn store(&self) -> &OverrideStore {
        &self.store
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    // ========================================================================
    // Editing
    // ========================================================================

    /// Validate raw cell input and queue it for `row`.
    ///
    /// Returns requests only when the pending-batch ceiling forced a flush.
    pub fn edit(
        &mut self,
        row: &RowKey,
        field_key: &str,
        raw: &str,
        now: Instant,
    ) -> Result<Vec<Request>, EngineError> {
        self.ensure_live()?;
        let value = validate(field_key, raw, &self.config.limits)?;
        self.enqueue(row, field_key, value, now)
    }

    /// Queue an already-typed value for `row`.
    pub fn edit_value(
        &mut self,
        row: &RowKey,
        field_key: &str,
        value: FieldValue,
        now: Instant,
    ) -> Result<Vec<Request>, EngineError> {
        self.ensure_live()?;
        validate_value(field_key, &value, &self.config.limits)?;
        self.enqueue(row, field_key, value, now)
    }

    fn enqueue(
        &mut self,
        row: &RowKey,
        field_key: &str,
        value: FieldValue,
        now: Instant,
    ) -> Result<Vec<Request>, EngineError> {
        let version = self
            .store
            .version_of(row)
            .ok_or_else(|| EngineError::UnknownRow(row.to_string()))?;
        if self.resolver.state(row, field_key) == ConflictState::Conflicted {
            return Err(EngineError::FieldConflicted {
                row: row.to_string(),
                field: field_key.to_string(),
            });
        }
        if self.removal_pending(row) {
            return Err(EngineError::RowBusy(row.to_string()));
        }

        let held = self.held_rows();
        let forced = self
            .coalescer
            .enqueue(row, field_key, value, version, now, |r| held.contains(r));
        tracing::debug!(row = %row, field = field_key, captured = version, "edit enqueued");

        let requests = self.begin_commits(forced);
        self.sync_dirty();
        Ok(requests)
    }

    /// Flush every batch whose debounce deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Vec<Request> {
        if self.torn_down {
            return Vec::new();
        }
        let held = self.held_rows();
        let due = self.coalescer.drain_due(now, |r| held.contains(r));
        let requests = self.begin_commits(due);
        self.sync_dirty();
        requests
    }

    /// Flush every pending batch now, ignoring debounce. Rows with a commit
    /// in flight, a conflict or a parked failure keep their batch.
    pub fn flush_all(&mut self) -> Vec<Request> {
        if self.torn_down {
            return Vec::new();
        }
        let held = self.held_rows();
        let batches = self.coalescer.drain_all(|r| held.contains(r));
        let requests = self.begin_commits(batches);
        self.sync_dirty();
        requests
    }

    /// When [`Editor::poll`] next has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.torn_down {
            return None;
        }
        self.coalescer.next_deadline()
    }

    fn begin_commits(&mut self, batches: Vec<PendingBatch>) -> Vec<Request> {
        batches
            .into_iter()
            .map(|batch| {
                tracing::debug!(
                    row = %batch.row,
                    fields = batch.fields.len(),
                    edits = batch.edits,
                    captured = batch.captured_version,
                    "flushing batch"
                );
                self.begin_commit(batch.row, batch.fields, batch.captured_version)
            })
            .collect()
    }

    fn begin_commit(&mut self, row: RowKey, fields: FieldMap, captured_version: u64) -> Request {
        let ticket = self.next_ticket();
        let (stage, request) = if self.config.pre_commit_check {
            (
                Stage::Checking,
                Request::CheckVersion {
                    ticket,
                    row: row.clone(),
                },
            )
        } else {
            (
                Stage::Writing,
                Request::Write {
                    ticket,
                    row: row.clone(),
                    fields: fields.clone(),
                    captured_version,
                },
            )
        };
        self.in_flight.insert(
            row,
            InFlight {
                ticket,
                fields,
                captured_version,
                stage,
            },
        );
        request
    }

    // ========================================================================
    // Responses
    // ========================================================================

    /// Feed back the result of a request. Responses from before a teardown,
    /// or with an unknown ticket, change nothing.
    pub fn complete(&mut self, response: Response) -> Completion {
        let ticket = response.ticket();
        if self.torn_down || ticket.epoch != self.epoch {
            tracing::warn!(
                ?ticket,
                torn_down = self.torn_down,
                "dropping response from a closed session"
            );
            return Completion::dropped();
        }

        let completion = match response {
            Response::VersionChecked { ticket, result } => self.on_checked(ticket, result),
            Response::Written { ticket, result } => self.on_written(ticket, result),
            Response::Reverted { ticket, result } => self.on_reverted(ticket, result),
            Response::CustomDeleted { ticket, result } => self.on_custom_deleted(ticket, result),
        };
        self.sync_dirty();
        completion
    }

    fn on_checked(
        &mut self,
        ticket: Ticket,
        result: Result<Option<ServerSnapshot>, StorageError>,
    ) -> Completion {
        let Some((row, mut flight)) = self.take_in_flight(ticket, Stage::Checking) else {
            return unknown_ticket(ticket);
        };
        match guard::evaluate_check(&row, flight.captured_version, result) {
            CheckDecision::Proceed => {
                flight.stage = Stage::Writing;
                let request = Request::Write {
                    ticket,
                    row: row.clone(),
                    fields: flight.fields.clone(),
                    captured_version: flight.captured_version,
                };
                self.in_flight.insert(row, flight);
                Completion::next(request)
            }
            CheckDecision::Drift(snapshot) => {
                Completion::done(self.raise_conflict(row, flight, snapshot))
            }
        }
    }

    fn on_written(
        &mut self,
        ticket: Ticket,
        result: Result<WriteOutcome, StorageError>,
    ) -> Completion {
        let Some((row, flight)) = self.take_in_flight(ticket, Stage::Writing) else {
            return unknown_ticket(ticket);
        };
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => return Completion::done(self.park_failure(row, flight, error)),
        };

        match guard::evaluate_write(&row, flight.captured_version, outcome) {
            CommitOutcome::Committed { version, snapshot } => {
                let now_ms = wall_clock_ms();
                self.store
                    .apply_commit(&row, &flight.fields, &snapshot, &self.operator, now_ms);
                if self.coalescer.rebase(&row, flight.captured_version, version) {
                    tracing::debug!(row = %row, version, "pending batch rebased onto own commit");
                }
                tracing::debug!(row = %row, version, fields = flight.fields.len(), "commit applied");
                self.events.emit(EditorEvent::RowsChanged {
                    rows: vec![row.clone()],
                });
                Completion::done(Outcome::Committed { row, version })
            }
            CommitOutcome::Conflict(snapshot) => {
                Completion::done(self.raise_conflict(row, flight, snapshot))
            }
        }
    }

    fn on_reverted(&mut self, ticket: Ticket, result: Result<u64, StorageError>) -> Completion {
        let key = match self.removals.remove(&ticket.seq) {
            Some(Removal::Revert(key)) => key,
            Some(other) => {
                self.removals.insert(ticket.seq, other);
                return unknown_ticket(ticket);
            }
            None => return unknown_ticket(ticket),
        };
        let outcome = match result {
            Ok(version) => {
                self.store.revert(&key, version);
                tracing::info!(key = %key, version, "override reverted");
                self.events.emit(EditorEvent::RowsChanged {
                    rows: vec![RowKey::Base(key.clone())],
                });
                Outcome::Reverted { key, version }
            }
            Err(error) => removal_failed(RowKey::Base(key), error),
        };
        Completion::done(outcome)
    }

    fn on_custom_deleted(&mut self, ticket: Ticket, result: Result<(), StorageError>) -> Completion {
        let id = match self.removals.remove(&ticket.seq) {
            Some(Removal::DeleteCustom(id)) => id,
            Some(other) => {
                self.removals.insert(ticket.seq, other);
                return unknown_ticket(ticket);
            }
            None => return unknown_ticket(ticket),
        };
        let outcome = match result {
            Ok(()) => {
                self.store.delete_custom(id);
                tracing::info!(id = %id, "custom row deleted");
                self.events.emit(EditorEvent::RowsChanged {
                    rows: vec![RowKey::Custom(id)],
                });
                Outcome::CustomDeleted { id }
            }
            Err(error) => removal_failed(RowKey::Custom(id), error),
        };
        Completion::done(outcome)
    }

    fn take_in_flight(&mut self, ticket: Ticket, stage: Stage) -> Option<(RowKey, InFlight)> {
        let row = self
            .in_flight
            .iter()
            .find(|(_, f)| f.ticket == ticket && f.stage == stage)
            .map(|(row, _)| row.clone())?;
        self.in_flight.remove(&row).map(|flight| (row, flight))
    }

    fn raise_conflict(&mut self, row: RowKey, flight: InFlight, snapshot: ServerSnapshot) -> Outcome {
        let server_version = snapshot.version;
        let store = &self.store;
        let authoritative = |field: &str| match &row {
            RowKey::Base(key) => store.base_value(key, field),
            RowKey::Custom(_) => FieldValue::Unset,
        };
        self.resolver
            .raise(&row, flight.captured_version, flight.fields, snapshot, authoritative);
        self.events.emit(EditorEvent::ConflictRaised {
            row: row.clone(),
            server_version,
        });
        Outcome::Conflicted { row, server_version }
    }

    fn park_failure(&mut self, row: RowKey, flight: InFlight, error: StorageError) -> Outcome {
        let transient = error.is_transient();
        tracing::warn!(row = %row, error = %error, transient, "write failed; batch parked");
        self.failed.insert(
            row.clone(),
            FailedWrite {
                row: row.clone(),
                fields: flight.fields,
                captured_version: flight.captured_version,
                error: error.to_string(),
                transient,
            },
        );
        self.events.emit(EditorEvent::WriteFailed {
            row: row.clone(),
            error: error.to_string(),
        });
        Outcome::Failed { row, error }
    }

    // ========================================================================
    // Conflicts and failures
    // ========================================================================

    /// Settle the conflict on `row`. Overwrite re-commits the refused values
    /// against the server's version, skipping debounce. Discard drops them
    /// and adopts the server's state for the row.
    pub fn resolve_conflict(
        &mut self,
        row: &RowKey,
        resolution: Resolution,
    ) -> Result<Vec<Request>, EngineError> {
        self.ensure_live()?;
        let resolved = self.resolver.resolve(row, resolution)?;
        self.events.emit(EditorEvent::ConflictResolved {
            row: row.clone(),
            resolution,
        });

        let conflict = resolved.conflict;
        let diverged = self.store.diverged_fields(&conflict.row, &conflict.server);
        self.rebase_queued(
            &conflict.row,
            conflict.local_version,
            conflict.server.version,
            &diverged,
        );
        let requests = match resolution {
            Resolution::Overwrite => {
                vec![self.begin_commit(conflict.row, conflict.pending, conflict.server.version)]
            }
            Resolution::Discard => {
                self.store
                    .adopt(&conflict.row, &conflict.server, &self.operator, wall_clock_ms());
                tracing::debug!(
                    row = %row,
                    discarded = conflict.pending.len(),
                    version = conflict.server.version,
                    "pending values discarded; server state adopted"
                );
                self.events.emit(EditorEvent::RowsChanged {
                    rows: vec![conflict.row],
                });
                Vec::new()
            }
        };
        self.sync_dirty();
        Ok(requests)
    }

    /// Move a batch queued behind a conflict onto the server's version,
    /// unless it edits a field the server changed. Such a batch keeps its
    /// stale version and conflicts on its own.
    fn rebase_queued(&mut self, row: &RowKey, from: u64, to: u64, diverged: &BTreeSet<String>) {
        let touches_diverged = self
            .coalescer
            .get(row)
            .is_some_and(|batch| batch.fields.keys().any(|field| diverged.contains(field)));
        if touches_diverged {
            tracing::debug!(row = %row, captured = from, "queued batch edits fields changed on the server");
            return;
        }
        if self.coalescer.rebase(row, from, to) {
            tracing::debug!(row = %row, version = to, "queued batch rebased onto server version");
        }
    }

    pub fn active_conflict(&self) -> Option<&VersionConflict> {
        self.resolver.active()
    }

    pub fn conflicts_for(&self, row: &RowKey) -> Option<&RowConflict> {
        self.resolver.get(row)
    }

    pub fn conflict_state(&self, row: &RowKey, field_key: &str) -> ConflictState {
        self.resolver.state(row, field_key)
    }

    /// Re-issue a parked failed write.
    pub fn retry(&mut self, row: &RowKey) -> Result<Vec<Request>, EngineError> {
        self.ensure_live()?;
        let failed = self
            .failed
            .remove(row)
            .ok_or_else(|| EngineError::NoFailedWrite(row.to_string()))?;
        tracing::info!(row = %row, captured = failed.captured_version, "retrying failed write");
        let request = self.begin_commit(failed.row, failed.fields, failed.captured_version);
        self.sync_dirty();
        Ok(vec![request])
    }

    /// Give up on a parked failed write. Local state is unchanged.
    pub fn abandon(&mut self, row: &RowKey) -> Result<FailedWrite, EngineError> {
        self.ensure_live()?;
        let failed = self
            .failed
            .remove(row)
            .ok_or_else(|| EngineError::NoFailedWrite(row.to_string()))?;
        tracing::info!(row = %row, fields = failed.fields.len(), "failed write abandoned");
        self.sync_dirty();
        Ok(failed)
    }

    pub fn failed_write(&self, row: &RowKey) -> Option<&FailedWrite> {
        self.failed.get(row)
    }

    pub fn failed_rows(&self) -> Vec<&FailedWrite> {
        self.failed.values().collect()
    }

    // ========================================================================
    // Row lifecycle
    // ========================================================================

    /// Ask the backend to drop the override for `key`. Any pending edits,
    /// conflict or parked failure for the row are discarded.
    pub fn revert(&mut self, key: &NaturalKey) -> Result<Request, EngineError> {
        self.ensure_live()?;
        let row = RowKey::Base(key.clone());
        if !self.store.contains(&row) && self.store.override_entry(key).is_none() {
            return Err(EngineError::UnknownRow(row.to_string()));
        }
        self.ensure_idle(&row)?;
        self.discard_row_state(&row);

        let ticket = self.next_ticket();
        self.removals.insert(ticket.seq, Removal::Revert(key.clone()));
        self.sync_dirty();
        Ok(Request::Revert {
            ticket,
            key: key.clone(),
        })
    }

    /// Ask the backend to delete a custom row.
    pub fn delete_custom(&mut self, id: CustomRowId) -> Result<Request, EngineError> {
        self.ensure_live()?;
        let row = RowKey::Custom(id);
        if !self.store.contains(&row) {
            return Err(EngineError::UnknownRow(row.to_string()));
        }
        self.ensure_idle(&row)?;
        self.discard_row_state(&row);

        let ticket = self.next_ticket();
        self.removals.insert(ticket.seq, Removal::DeleteCustom(id));
        self.sync_dirty();
        Ok(Request::DeleteCustom { ticket, id })
    }

    /// Register a custom row the backend has already created.
    pub fn add_custom(&mut self, row: CustomRow) -> Result<(), EngineError> {
        self.ensure_live()?;
        validate_map(&row.fields, &self.config.limits)?;
        let key = RowKey::Custom(row.id);
        self.store.add_custom(row)?;
        tracing::info!(row = %key, "custom row added");
        self.events.emit(EditorEvent::RowsChanged { rows: vec![key] });
        Ok(())
    }

    /// Adopt the server's state for `row`, e.g. after a reload elsewhere.
    pub fn refresh(&mut self, row: &RowKey, snapshot: &ServerSnapshot) -> Result<(), EngineError> {
        self.ensure_live()?;
        self.ensure_idle(row)?;
        let now_ms = clock::physical_now()?;
        self.store.adopt(row, snapshot, &self.operator, now_ms);
        tracing::debug!(row = %row, version = snapshot.version, "row refreshed from server");
        self.events.emit(EditorEvent::RowsChanged {
            rows: vec![row.clone()],
        });
        Ok(())
    }

    /// Swap in a reloaded base dataset. Overrides stay attached by natural key.
    pub fn reload_base(&mut self, base_rows: Vec<BaseRow>) -> Result<(), EngineError> {
        self.ensure_live()?;
        self.store.set_base(base_rows)?;
        let rows = self.store.merged().iter().map(MergedRow::row_key).collect();
        self.events.emit(EditorEvent::RowsChanged { rows });
        Ok(())
    }

    fn ensure_idle(&self, row: &RowKey) -> Result<(), EngineError> {
        if self.in_flight.contains_key(row) || self.removal_pending(row) {
            return Err(EngineError::RowBusy(row.to_string()));
        }
        Ok(())
    }

    fn discard_row_state(&mut self, row: &RowKey) {
        let pending = self.coalescer.take(row).is_some();
        let conflicted = self.resolver.clear(row).is_some();
        let failed = self.failed.remove(row).is_some();
        if pending || conflicted || failed {
            tracing::debug!(row = %row, pending, conflicted, failed, "row state discarded");
        }
    }

    // ========================================================================
    // Views
    // ========================================================================

    pub fn merged_rows(&self) -> Vec<MergedRow> {
        self.store.merged()
    }

    pub fn merged_row(&self, row: &RowKey) -> Option<MergedRow> {
        self.store.merged_row(row)
    }

    pub fn fingerprint(&self) -> Result<[u8; 32], EngineError> {
        self.store.fingerprint()
    }

    pub fn pending_rows(&self) -> Vec<RowKey> {
        self.coalescer.rows().cloned().collect()
    }

    pub fn pending_batch(&self, row: &RowKey) -> Option<&PendingBatch> {
        self.coalescer.get(row)
    }

    pub fn in_flight_rows(&self) -> Vec<RowKey> {
        self.in_flight.keys().cloned().collect()
    }

    /// Pending, in-flight, conflicted or failed work exists.
    pub fn has_unsaved_work(&self) -> bool {
        !(self.coalescer.is_empty()
            && self.in_flight.is_empty()
            && self.removals.is_empty()
            && self.resolver.is_empty()
            && self.failed.is_empty())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EditorEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Register this editor with a host-owned dirty flag. Replaces any
    /// earlier registration.
    pub fn attach_dirty_state(&mut self, state: &DirtyState) -> Result<(), EngineError> {
        self.ensure_live()?;
        let mut registration = state.register();
        registration.set(self.has_unsaved_work());
        self.dirty = Some(registration);
        Ok(())
    }

    /// Close the editor. Pending batches are dropped unflushed, outstanding
    /// tickets are invalidated and the dirty registration is released.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.epoch += 1;

        let cancelled = self.coalescer.cancel_all();
        let outstanding = self.in_flight.len() + self.removals.len();
        let conflicts = self.resolver.clear_all();
        let failed = self.failed.len();
        self.in_flight.clear();
        self.removals.clear();
        self.failed.clear();
        self.dirty = None;

        tracing::info!(cancelled, outstanding, conflicts, failed, "editor torn down");
        self.events.emit(EditorEvent::TornDown);
    }

    fn ensure_live(&self) -> Result<(), EngineError> {
        if self.torn_down {
            return Err(EngineError::TornDown);
        }
        Ok(())
    }

    fn next_ticket(&mut self) -> Ticket {
        self.next_seq += 1;
        Ticket {
            seq: self.next_seq,
            epoch: self.epoch,
        }
    }

    fn removal_pending(&self, row: &RowKey) -> bool {
        self.removals.values().any(|r| r.row() == *row)
    }

    /// Rows whose next batch must wait.
    fn held_rows(&self) -> BTreeSet<RowKey> {
        self.in_flight
            .keys()
            .chain(self.resolver.rows())
            .chain(self.failed.keys())
            .cloned()
            .chain(self.removals.values().map(Removal::row))
            .collect()
    }

    fn sync_dirty(&mut self) {
        let dirty = self.has_unsaved_work();
        if let Some(registration) = self.dirty.as_mut() {
            registration.set(dirty);
        }
    }
}

fn removal_failed(row: RowKey, error: StorageError) -> Outcome {
    tracing::warn!(row = %row, error = %error, "removal failed");
    Outcome::RemovalFailed { row, error }
}

/// Attribution time for local state when the backend did not report one.
fn wall_clock_ms() -> u64 {
    match clock::physical_now() {
        Ok(ms) => ms,
        Err(error) => {
            tracing::warn!(error = %error, "wall clock unavailable; local attribution time is 0");
            0
        }
    }
}

fn unknown_ticket(ticket: Ticket) -> Completion {
    tracing::warn!(?ticket, "response for an unknown ticket ignored");
    Completion::dropped()
}
