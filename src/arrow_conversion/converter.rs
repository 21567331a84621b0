//! Converter for transforming decoded result rows into Arrow record batches.
//!
//! Rows arrive row-major from the cursor; the converter transposes them into
//! columns and builds one Arrow array per column.

use crate::error::DecodeError;
use crate::transport::Column;
use crate::types::{Row, SchemaBuilder, Value};
use arrow::array::RecordBatch;
use arrow::datatypes::Schema;
use std::sync::Arc;

use super::builders::build_array;

/// Converter from decoded rows to Arrow `RecordBatch`es for one result schema.
pub struct ArrowConverter {
    schema: Arc<Schema>,
}

impl ArrowConverter {
    /// Create a converter for the given result columns.
    pub fn new(columns: &[Column]) -> Self {
        let schema = SchemaBuilder::new()
            .add_columns(columns.iter().cloned())
            .build();
        Self {
            schema: Arc::new(schema),
        }
    }

    /// Get the Arrow schema for this converter.
    pub fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    /// Convert rows to an Arrow RecordBatch.
    ///
    /// # Errors
    /// Returns `DecodeError` if:
    /// - A row's width doesn't match the schema
    /// - A value cannot be represented in its column's Arrow type
    pub fn convert(&self, rows: &[Row]) -> Result<RecordBatch, DecodeError> {
        if rows.is_empty() {
            return Ok(RecordBatch::new_empty(Arc::clone(&self.schema)));
        }

        let num_columns = self.schema.fields().len();
        for (row_idx, row) in rows.iter().enumerate() {
            if row.len() != num_columns {
                return Err(DecodeError::SchemaMismatch(format!(
                    "Row {} has {} columns, expected {}",
                    row_idx,
                    row.len(),
                    num_columns
                )));
            }
        }

        let columns = transpose_rows_to_columns(rows, num_columns);
        let arrays = self
            .schema
            .fields()
            .iter()
            .zip(columns.iter())
            .enumerate()
            .map(|(col_idx, (field, values))| build_array(field.data_type(), values, col_idx))
            .collect::<Result<Vec<_>, _>>()?;

        RecordBatch::try_new(Arc::clone(&self.schema), arrays)
            .map_err(|e| DecodeError::ArrowError(e.to_string()))
    }
}

/// Transpose row-major values into column-major references.
fn transpose_rows_to_columns(rows: &[Row], num_columns: usize) -> Vec<Vec<&Value>> {
    let mut columns: Vec<Vec<&Value>> = (0..num_columns)
        .map(|_| Vec::with_capacity(rows.len()))
        .collect();

    for row in rows {
        for (col_idx, value) in row.values().iter().enumerate() {
            columns[col_idx].push(value);
        }
    }

    columns
}
