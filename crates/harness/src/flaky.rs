use std::cell::Cell;

use pricebook_core::{CustomRow, CustomRowId, FieldMap, NaturalKey, OverrideEntry, RowKey};
use pricebook_storage::{PricingBackend, ServerSnapshot, StorageError, WriteOutcome};

/// Wraps a backend and injects failures on demand.
pub struct FlakyBackend<B> {
    inner: B,
    failing_writes: u32,
    lost_responses: u32,
    failing_checks: bool,
    checks_unsupported: bool,
    checks: Cell<u32>,
    writes: u32,
}

impl<B: PricingBackend> FlakyBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            failing_writes: 0,
            lost_responses: 0,
            failing_checks: false,
            checks_unsupported: false,
            checks: Cell::new(0),
            writes: 0,
        }
    }

    /// The next `n` writes fail before reaching the inner backend.
    pub fn fail_next_writes(&mut self, n: u32) {
        self.failing_writes = n;
    }

    /// The next `n` writes land but report a transient failure.
    pub fn lose_next_responses(&mut self, n: u32) {
        self.lost_responses = n;
    }

    pub fn fail_checks(&mut self, failing: bool) {
        self.failing_checks = failing;
    }

    pub fn disable_checks(&mut self, unsupported: bool) {
        self.checks_unsupported = unsupported;
    }

    /// Version checks received, including failed ones.
    pub fn checks(&self) -> u32 {
        self.checks.get()
    }

    /// Writes received, including failed ones.
    pub fn writes(&self) -> u32 {
        self.writes
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut B {
        &mut self.inner
    }
}

impl<B: PricingBackend> PricingBackend for FlakyBackend<B> {
    fn check_version(&self, row: &RowKey) -> Result<Option<ServerSnapshot>, StorageError> {
        self.checks.set(self.checks.get() + 1);
        if self.checks_unsupported {
            return Ok(None);
        }
        if self.failing_checks {
            return Err(StorageError::Transient("injected check failure".into()));
        }
        self.inner.check_version(row)
    }

    fn write(
        &mut self,
        row: &RowKey,
        fields: &FieldMap,
        captured_version: u64,
    ) -> Result<WriteOutcome, StorageError> {
        self.writes += 1;
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(StorageError::Transient("injected write failure".into()));
        }
        let outcome = self.inner.write(row, fields, captured_version)?;
        if self.lost_responses > 0 {
            self.lost_responses -= 1;
            return Err(StorageError::Transient("response lost".into()));
        }
        Ok(outcome)
    }

    fn revert(&mut self, key: &NaturalKey) -> Result<u64, StorageError> {
        self.inner.revert(key)
    }

    fn delete_custom(&mut self, id: CustomRowId) -> Result<(), StorageError> {
        self.inner.delete_custom(id)
    }

    fn insert_custom(&mut self, fields: &FieldMap) -> Result<CustomRow, StorageError> {
        self.inner.insert_custom(fields)
    }

    fn load_overrides(&self) -> Result<Vec<OverrideEntry>, StorageError> {
        self.inner.load_overrides()
    }

    fn load_custom_rows(&self) -> Result<Vec<CustomRow>, StorageError> {
        self.inner.load_custom_rows()
    }
}
