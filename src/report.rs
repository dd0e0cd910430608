use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use crate::error::{Error, Result};
use crate::experiment::AccuracyRecord;

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Write accuracy records to a file. Dispatch by extension.
///
/// Supported formats:
/// * `.csv`     – one row per record, empty cells for missing accuracies
/// * `.json`    – array of record objects
/// * `.parquet` – one column per record field
pub fn write_records(path: &Path, records: &[AccuracyRecord]) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "csv" => write_csv(path, records),
        "json" => write_json(path, records),
        "parquet" | "pq" => write_parquet(path, records),
        other => Err(Error::Config(format!("unsupported report extension: .{other}"))),
    }?;
    log::info!("Wrote {} records to {}", records.len(), path.display());
    Ok(())
}

fn write_csv(path: &Path, records: &[AccuracyRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_json(path: &Path, records: &[AccuracyRecord]) -> Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), records)?;
    Ok(())
}

/// Columnar layout matching the CSV header.
pub fn records_to_batch(records: &[AccuracyRecord]) -> Result<RecordBatch> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("algo", DataType::Utf8, false),
        Field::new("seed", DataType::UInt64, false),
        Field::new("session", DataType::UInt64, false),
        Field::new("acc_type", DataType::Utf8, false),
        Field::new("all_classes", DataType::Float64, true),
        Field::new("old_classes", DataType::Float64, true),
        Field::new("new_classes", DataType::Float64, true),
    ]));

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.algo.as_str()))),
        Arc::new(UInt64Array::from_iter_values(records.iter().map(|r| r.seed))),
        Arc::new(UInt64Array::from_iter_values(records.iter().map(|r| r.session as u64))),
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.acc_type.as_str()))),
        Arc::new(Float64Array::from(records.iter().map(|r| r.all_classes).collect::<Vec<_>>())),
        Arc::new(Float64Array::from(records.iter().map(|r| r.old_classes).collect::<Vec<_>>())),
        Arc::new(Float64Array::from(records.iter().map(|r| r.new_classes).collect::<Vec<_>>())),
    ];

    Ok(RecordBatch::try_new(schema, columns)?)
}

fn write_parquet(path: &Path, records: &[AccuracyRecord]) -> Result<()> {
    let batch = records_to_batch(records)?;
    let file = std::fs::File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}
