//! Arrow form of exported feed samples.
//!
//! Exports become a two-column record batch (`time`, `value`) that can be
//! written as an Arrow IPC stream for columnar consumers.

use crate::error::{Error, Result};
use crate::models::Point;
use arrow::array::{Array, Float64Array, Int64Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::ipc::writer::StreamWriter;
use lazy_static::lazy_static;
use std::sync::Arc;

lazy_static! {
    /// Schema of exported samples. `time` is epoch seconds; a null `value`
    /// is a missing sample.
    pub static ref POINTS_SCHEMA: Schema = Schema::new(vec![
        Arc::new(Field::new("time", DataType::Int64, false)),
        Arc::new(Field::new("value", DataType::Float64, true)),
    ]);
}

pub fn points_to_record_batch(points: &[Point]) -> Result<RecordBatch> {
    let mut times = Vec::with_capacity(points.len());
    let mut values = Vec::with_capacity(points.len());
    for point in points {
        times.push(point.time);
        values.push(point.value);
    }

    RecordBatch::try_new(
        Arc::new(POINTS_SCHEMA.clone()),
        vec![Arc::new(Int64Array::from(times)), Arc::new(Float64Array::from(values))],
    )
    .map_err(|e| Error::Serialization(format!("Failed to create record batch: {}", e)))
}

/// Reads samples back out of a batch with [`POINTS_SCHEMA`].
pub fn record_batch_to_points(batch: &RecordBatch) -> Result<Vec<Point>> {
    let times = batch
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| Error::Serialization("time column is not Int64".to_string()))?;
    let values = batch
        .column(1)
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| Error::Serialization("value column is not Float64".to_string()))?;

    Ok((0..batch.num_rows())
        .map(|i| Point::new(times.value(i), (!values.is_null(i)).then(|| values.value(i))))
        .collect())
}

/// Encodes a batch as a complete Arrow IPC stream (schema and data).
pub fn encode_record_batch(batch: &RecordBatch) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut buffer, batch.schema().as_ref())
            .map_err(|e| Error::Serialization(format!("Failed to create writer: {}", e)))?;
        writer
            .write(batch)
            .map_err(|e| Error::Serialization(format!("Failed to write batch: {}", e)))?;
        writer
            .finish()
            .map_err(|e| Error::Serialization(format!("Failed to finish writing: {}", e)))?;
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::ipc::reader::StreamReader;
    use std::io::Cursor;

    #[test]
    fn test_batch_keeps_gaps() {
        let points = vec![Point::sample(10, 1.5), Point::gap(20), Point::sample(30, -2.0)];
        let batch = points_to_record_batch(&points).unwrap();
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(batch.column(1).null_count(), 1);
        assert_eq!(record_batch_to_points(&batch).unwrap(), points);
    }

    #[test]
    fn test_ipc_stream_is_readable() {
        let points = vec![Point::sample(100, 4.0), Point::gap(110)];
        let batch = points_to_record_batch(&points).unwrap();
        let bytes = encode_record_batch(&batch).unwrap();

        let reader = StreamReader::try_new(Cursor::new(bytes), None).unwrap();
        assert_eq!(reader.schema().as_ref(), &*POINTS_SCHEMA);
        let batches: Vec<RecordBatch> = reader.collect::<std::result::Result<_, _>>().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(record_batch_to_points(&batches[0]).unwrap(), points);
    }
}
