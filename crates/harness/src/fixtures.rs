use pricebook_core::{BaseRow, CoreError, FieldMap, FieldValue};

/// Build a field map from literal pairs.
pub fn fields(pairs: &[(&str, FieldValue)]) -> FieldMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn model_row(
    provider: &str,
    model: &str,
    region: &str,
    input: f64,
    output: f64,
) -> Result<BaseRow, CoreError> {
    let fields = fields(&[
        ("provider", FieldValue::Text(provider.into())),
        ("model", FieldValue::Text(model.into())),
        ("region", FieldValue::Text(region.into())),
        ("input_per_1m", FieldValue::Currency(input)),
        ("output_per_1m", FieldValue::Currency(output)),
    ]);
    BaseRow::from_fields(fields)
}

pub fn compute_row(
    instance_type: &str,
    accelerator: &str,
    region: &str,
    hourly: f64,
    gpus: u64,
) -> Result<BaseRow, CoreError> {
    let fields = fields(&[
        ("instance_type", FieldValue::Text(instance_type.into())),
        ("accelerator", FieldValue::Text(accelerator.into())),
        ("region", FieldValue::Text(region.into())),
        ("hourly_rate", FieldValue::Currency(hourly)),
        ("gpu_count", FieldValue::Count(gpus)),
    ]);
    BaseRow::from_fields(fields)
}

/// A small mixed dataset: three model rows, two compute rows.
pub fn sample_catalog() -> Result<Vec<BaseRow>, CoreError> {
    Ok(vec![
        model_row("acme", "atlas-large", "us-east", 10.0, 20.0)?,
        model_row("acme", "atlas-mini", "us-east", 0.5, 1.5)?,
        model_row("globex", "orbit", "eu-west", 3.0, 9.0)?,
        compute_row("g5.xlarge", "a10g", "us-east", 1.006, 1)?,
        compute_row("p4d.24xlarge", "a100", "us-west", 32.77, 8)?,
    ])
}
