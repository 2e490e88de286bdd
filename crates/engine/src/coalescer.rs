use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use pricebook_core::{FieldMap, FieldValue, RowKey};

/// Accumulated edits for one row, waiting to settle.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBatch {
    pub row: RowKey,
    /// Last value per field.
    pub fields: FieldMap,
    /// Version visible when the first edit of the batch was made.
    pub captured_version: u64,
    pub enqueued_at: Instant,
    /// Restarted by every edit merged into the batch.
    pub deadline: Instant,
    pub edits: u32,
}

/// Debounces per-row edits into batches. At most one batch exists per row.
///
/// The coalescer never reads a clock; every call takes `now` and due
/// batches are drained explicitly.
#[derive(Debug)]
pub struct EditCoalescer {
    debounce: Duration,
    max_batches: usize,
    batches: BTreeMap<RowKey, PendingBatch>,
}

impl EditCoalescer {
    pub fn new(debounce: Duration, max_batches: usize) -> Self {
        Self {
            debounce,
            max_batches: max_batches.max(1),
            batches: BTreeMap::new(),
        }
    }

    /// Merge one field edit into the row's batch, creating it if needed.
    ///
    /// When the number of distinct batches reaches the ceiling, every batch
    /// whose row is not held is returned for immediate flushing, oldest
    /// first. Otherwise the returned vector is empty.
    pub fn enqueue(
        &mut self,
        row: &RowKey,
        field_key: &str,
        value: FieldValue,
        current_version: u64,
        now: Instant,
        held: impl Fn(&RowKey) -> bool,
    ) -> Vec<PendingBatch> {
        let deadline = now + self.debounce;
        if let Some(batch) = self.batches.get_mut(row) {
            batch.fields.insert(field_key.to_string(), value);
            batch.deadline = deadline;
            batch.edits += 1;
            return Vec::new();
        }

        let mut fields = FieldMap::new();
        fields.insert(field_key.to_string(), value);
        self.batches.insert(
            row.clone(),
            PendingBatch {
                row: row.clone(),
                fields,
                captured_version: current_version,
                enqueued_at: now,
                deadline,
                edits: 1,
            },
        );

        if self.batches.len() >= self.max_batches {
            let flushed = self.drain_all(held);
            tracing::debug!(
                flushed = flushed.len(),
                ceiling = self.max_batches,
                "pending batch ceiling reached; force-flushing"
            );
            return flushed;
        }
        Vec::new()
    }

    /// Earliest deadline among pending batches.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.batches.values().map(|b| b.deadline).min()
    }

    /// Remove and return batches whose deadline has passed, oldest first.
    /// Held rows stay queued even when due.
    pub fn drain_due(&mut self, now: Instant, held: impl Fn(&RowKey) -> bool) -> Vec<PendingBatch> {
        self.drain_where(|batch| batch.deadline <= now && !held(&batch.row))
    }

    /// Remove and return every batch whose row is not held, oldest first.
    pub fn drain_all(&mut self, held: impl Fn(&RowKey) -> bool) -> Vec<PendingBatch> {
        self.drain_where(|batch| !held(&batch.row))
    }

    fn drain_where(&mut self, pick: impl Fn(&PendingBatch) -> bool) -> Vec<PendingBatch> {
        let rows: Vec<RowKey> = self
            .batches
            .values()
            .filter(|b| pick(b))
            .map(|b| b.row.clone())
            .collect();
        let mut drained: Vec<PendingBatch> = rows
            .iter()
            .filter_map(|row| self.batches.remove(row))
            .collect();
        drained.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at).then_with(|| a.row.cmp(&b.row)));
        drained
    }

    pub fn get(&self, row: &RowKey) -> Option<&PendingBatch> {
        self.batches.get(row)
    }

    pub fn take(&mut self, row: &RowKey) -> Option<PendingBatch> {
        self.batches.remove(row)
    }

    /// When `row` is known to have moved from `from` to `to` (our own commit,
    /// or a resolved conflict), a batch captured at `from` now builds on
    /// `to`. Batches captured at any other version are left alone so a real
    /// conflict still surfaces.
    pub fn rebase(&mut self, row: &RowKey, from: u64, to: u64) -> bool {
        match self.batches.get_mut(row) {
            Some(batch) if batch.captured_version == from => {
                batch.captured_version = to;
                true
            }
            _ => false,
        }
    }

    /// Drop every pending batch. Returns how many were dropped.
    pub fn cancel_all(&mut self) -> usize {
        let n = self.batches.len();
        self.batches.clear();
        n
    }

    pub fn rows(&self) -> impl Iterator<Item = &RowKey> {
        self.batches.keys()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}
