use std::io::Read;
use std::path::Path;

use anyhow::Context;

use crate::models::{BatchRequest, GradeRequest};

#[derive(serde::Deserialize)]
struct CsvRow {
    enrollment_id: String,
    evaluation_type_id: String,
    period_id: String,
    scale_id: String,
    numeric_value: Option<f64>,
    literal_value: Option<String>,
    weight: Option<f64>,
    notes: Option<String>,
    grading_column: Option<String>,
}

impl From<CsvRow> for GradeRequest {
    fn from(row: CsvRow) -> Self {
        GradeRequest {
            enrollment_id: row.enrollment_id,
            evaluation_type_id: row.evaluation_type_id,
            period_id: row.period_id,
            scale_id: row.scale_id,
            numeric_value: row.numeric_value,
            literal_value: row.literal_value.filter(|value| !value.trim().is_empty()),
            weight: row.weight,
            notes: row.notes.filter(|value| !value.trim().is_empty()),
            grading_column: row.grading_column.filter(|value| !value.trim().is_empty()),
        }
    }
}

/// Reads a gradebook export into a batch, one request per row, in file order.
pub fn read_batch<R: Read>(
    reader: R,
    idempotency_key: Option<String>,
) -> anyhow::Result<BatchRequest> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut items = Vec::new();

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid gradebook row {}", index + 1))?;
        items.push(row.into());
    }

    Ok(BatchRequest {
        items,
        idempotency_key,
    })
}

pub fn read_batch_file(
    path: &Path,
    idempotency_key: Option<String>,
) -> anyhow::Result<BatchRequest> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    read_batch(file, idempotency_key)
}
