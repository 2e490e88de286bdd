//! Synchronous event loop: performs an editor's requests against a backend
//! in order until nothing is left to do.

use std::collections::VecDeque;
use std::time::Instant;

use pricebook_core::FieldMap;
use pricebook_storage::PricingBackend;

use crate::error::EngineError;
use crate::protocol::{Outcome, Request, Response};
use crate::Editor;

/// Perform one request.
pub fn execute<B: PricingBackend + ?Sized>(backend: &mut B, request: Request) -> Response {
    match request {
        Request::CheckVersion { ticket, row } => Response::VersionChecked {
            ticket,
            result: backend.check_version(&row),
        },
        Request::Write {
            ticket,
            row,
            fields,
            captured_version,
        } => Response::Written {
            ticket,
            result: backend.write(&row, &fields, captured_version),
        },
        Request::Revert { ticket, key } => Response::Reverted {
            ticket,
            result: backend.revert(&key),
        },
        Request::DeleteCustom { ticket, id } => Response::CustomDeleted {
            ticket,
            result: backend.delete_custom(id),
        },
    }
}

/// Execute `requests` and every follow-up they produce. Returns the final
/// outcome of each request chain in completion order.
pub fn run_to_idle<B: PricingBackend + ?Sized>(
    editor: &mut Editor,
    backend: &mut B,
    requests: Vec<Request>,
) -> Vec<Outcome> {
    let mut queue: VecDeque<Request> = requests.into();
    let mut outcomes = Vec::new();
    while let Some(request) = queue.pop_front() {
        let response = execute(backend, request);
        let completion = editor.complete(response);
        queue.extend(completion.requests);
        if let Some(outcome) = completion.outcome {
            outcomes.push(outcome);
        }
    }
    outcomes
}

/// Flush whatever is due at `now` and drive it to completion.
pub fn settle<B: PricingBackend + ?Sized>(
    editor: &mut Editor,
    backend: &mut B,
    now: Instant,
) -> Vec<Outcome> {
    let requests = editor.poll(now);
    run_to_idle(editor, backend, requests)
}

/// Create a custom row in the backend and register it with the editor.
pub fn insert_custom<B: PricingBackend + ?Sized>(
    editor: &mut Editor,
    backend: &mut B,
    fields: &FieldMap,
) -> Result<pricebook_core::CustomRowId, EngineError> {
    pricebook_core::validate::validate_map(fields, &editor.config().limits)?;
    let row = backend.insert_custom(fields)?;
    let id = row.id;
    editor.add_custom(row)?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use pricebook_core::{BaseRow, FieldValue, OperatorId, RowKey};
    use pricebook_storage::SqliteBackend;

    use crate::EditorConfig;

    fn base() -> BaseRow {
        let mut fields = FieldMap::new();
        fields.insert("provider".into(), FieldValue::Text("acme".into()));
        fields.insert("model".into(), FieldValue::Text("m1".into()));
        fields.insert("region".into(), FieldValue::Text("us-east".into()));
        fields.insert("input_per_1m".into(), FieldValue::Currency(10.0));
        BaseRow::from_fields(fields).unwrap()
    }

    #[test]
    fn edit_settles_through_check_and_write() -> Result<(), Box<dyn std::error::Error>> {
        let operator = OperatorId::new("alice");
        let mut backend = SqliteBackend::open_in_memory(operator.clone())?;
        let base = base();
        let row = RowKey::Base(base.key.clone());
        let mut editor = Editor::new(EditorConfig::default(), operator, vec![base], vec![], vec![])?;

        let t0 = Instant::now();
        editor.edit(&row, "input_per_1m", "12", t0)?;
        assert!(settle(&mut editor, &mut backend, t0).is_empty());

        let outcomes = settle(&mut editor, &mut backend, t0 + Duration::from_millis(300));
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], Outcome::Committed { version: 1, .. }));
        assert_eq!(*editor.merged_row(&row).unwrap().get("input_per_1m"), FieldValue::Currency(12.0));
        assert!(!editor.has_unsaved_work());
        Ok(())
    }

    #[test]
    fn insert_custom_registers_row() -> Result<(), Box<dyn std::error::Error>> {
        let operator = OperatorId::new("alice");
        let mut backend = SqliteBackend::open_in_memory(operator.clone())?;
        let mut editor = Editor::new(EditorConfig::default(), operator, vec![], vec![], vec![])?;

        let mut fields = FieldMap::new();
        fields.insert("display_name".into(), FieldValue::Text("Reserved pool".into()));
        let id = insert_custom(&mut editor, &mut backend, &fields)?;

        let row = editor.merged_row(&RowKey::Custom(id)).unwrap();
        assert!(row.is_custom());
        assert_eq!(row.version, 1);
        Ok(())
    }

    #[test]
    fn invalid_custom_fields_never_reach_backend() -> Result<(), Box<dyn std::error::Error>> {
        let operator = OperatorId::new("alice");
        let mut backend = SqliteBackend::open_in_memory(operator.clone())?;
        let mut editor = Editor::new(EditorConfig::default(), operator, vec![], vec![], vec![])?;

        let mut fields = FieldMap::new();
        fields.insert("discount_pct".into(), FieldValue::Percentage(140.0));
        let err = insert_custom(&mut editor, &mut backend, &fields).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(backend.load_custom_rows()?.is_empty());
        Ok(())
    }
}
