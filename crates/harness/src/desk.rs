use std::time::{Duration, Instant};

use pricebook_core::{BaseRow, CustomRowId, FieldMap, FieldValue, NaturalKey, OperatorId, RowKey};
use pricebook_engine::driver::{insert_custom, run_to_idle};
use pricebook_engine::{Editor, EditorConfig, EngineError, Outcome, Request, Resolution};
use pricebook_storage::{PricingBackend, SqliteBackend};

/// One operator's editing surface: an editor, its backend connection and a
/// simulated clock. Time only moves when the test moves it.
pub struct TestDesk<B = SqliteBackend> {
    pub editor: Editor,
    pub backend: B,
    base_rows: Vec<BaseRow>,
    config: EditorConfig,
    now: Instant,
}

impl TestDesk<SqliteBackend> {
    pub fn in_memory(operator: &str, base_rows: Vec<BaseRow>) -> Result<Self, Box<dyn std::error::Error>> {
        let operator = OperatorId::new(operator);
        let backend = SqliteBackend::open_in_memory(operator.clone())?;
        Self::with_operator(backend, operator, EditorConfig::default(), base_rows)
    }

    pub fn open(
        path: &str,
        operator: &str,
        config: EditorConfig,
        base_rows: Vec<BaseRow>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let operator = OperatorId::new(operator);
        let backend = SqliteBackend::open(path, operator.clone())?;
        Self::with_operator(backend, operator, config, base_rows)
    }
}

impl<B: PricingBackend> TestDesk<B> {
    /// The editor loads whatever the backend already stores.
    pub fn with_operator(
        backend: B,
        operator: OperatorId,
        config: EditorConfig,
        base_rows: Vec<BaseRow>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let editor = Editor::load(config.clone(), operator, base_rows.clone(), &backend)?;
        Ok(Self {
            editor,
            backend,
            base_rows,
            config,
            now: Instant::now(),
        })
    }

    pub fn operator(&self) -> &OperatorId {
        self.editor.operator()
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Type `raw` into a cell. Nothing is sent until the batch settles.
    pub fn edit(&mut self, row: &RowKey, field_key: &str, raw: &str) -> Result<Vec<Outcome>, Box<dyn std::error::Error>> {
        let requests = self.editor.edit(row, field_key, raw, self.now)?;
        Ok(self.run(requests))
    }

    /// Move the clock and drive whatever became due.
    pub fn advance(&mut self, ms: u64) -> Vec<Outcome> {
        self.now += Duration::from_millis(ms);
        let requests = self.editor.poll(self.now);
        self.run(requests)
    }

    /// Advance past the debounce window.
    pub fn settle(&mut self) -> Vec<Outcome> {
        self.advance(self.config.debounce_ms)
    }

    pub fn flush(&mut self) -> Vec<Outcome> {
        let requests = self.editor.flush_all();
        self.run(requests)
    }

    pub fn resolve(&mut self, row: &RowKey, resolution: Resolution) -> Result<Vec<Outcome>, Box<dyn std::error::Error>> {
        let requests = self.editor.resolve_conflict(row, resolution)?;
        Ok(self.run(requests))
    }

    pub fn retry(&mut self, row: &RowKey) -> Result<Vec<Outcome>, Box<dyn std::error::Error>> {
        let requests = self.editor.retry(row)?;
        Ok(self.run(requests))
    }

    pub fn revert(&mut self, key: &NaturalKey) -> Result<Vec<Outcome>, Box<dyn std::error::Error>> {
        let request = self.editor.revert(key)?;
        Ok(self.run(vec![request]))
    }

    pub fn add_custom(&mut self, fields: &FieldMap) -> Result<CustomRowId, Box<dyn std::error::Error>> {
        Ok(insert_custom(&mut self.editor, &mut self.backend, fields)?)
    }

    pub fn delete_custom(&mut self, id: CustomRowId) -> Result<Vec<Outcome>, Box<dyn std::error::Error>> {
        let request = self.editor.delete_custom(id)?;
        Ok(self.run(vec![request]))
    }

    pub fn run(&mut self, requests: Vec<Request>) -> Vec<Outcome> {
        run_to_idle(&mut self.editor, &mut self.backend, requests)
    }

    /// Rendered value of one cell.
    pub fn value(&self, row: &RowKey, field_key: &str) -> FieldValue {
        self.editor.store().value_of(row, field_key)
    }

    pub fn version(&self, row: &RowKey) -> Option<u64> {
        self.editor.store().version_of(row)
    }

    /// Close the editor and open a fresh one on the same backend, as if the
    /// operator reopened the table.
    pub fn reopen(&mut self) -> Result<(), EngineError> {
        self.editor.teardown();
        let operator = self.editor.operator().clone();
        self.editor = Editor::load(self.config.clone(), operator, self.base_rows.clone(), &self.backend)?;
        Ok(())
    }
}
