//! # Canonical Data Table
//!
//! A `DataTable` is the rectangular, column-oriented unit every parser
//! produces and every kernel consumes: ordered f64 columns of equal
//! length. The `cycle` column, when present, is integer-valued but stored
//! as f64 like everything else; `cycles()` recovers the sorted distinct
//! integers. Row order is the instrument's native acquisition order and is
//! semantically meaningful for time-series techniques.
//!
//! Arrow `RecordBatch` conversion lives here so the serialization layer
//! can write Parquet/CSV without knowing the table internals. On the Arrow
//! side `cycle` becomes an `Int64` column; all other columns are
//! `Float64`.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use crate::schema::columns;

/// Errors raised when constructing or converting a table.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// Column lengths disagree
    #[error("Column '{column}' has {len} rows, expected {expected}")]
    RaggedColumns {
        /// Offending column name
        column: String,
        /// Its length
        len: usize,
        /// Length of the first column
        expected: usize,
    },

    /// Duplicate column name
    #[error("Duplicate column: {0}")]
    DuplicateColumn(String),

    /// Arrow conversion error
    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),

    /// Unsupported Arrow column type during import
    #[error("Unsupported Arrow type for column '{0}': {1}")]
    UnsupportedType(String, String),
}

/// Rectangular column-oriented table of f64 values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTable {
    names: Vec<String>,
    data: Vec<Vec<f64>>,
}

impl DataTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `(name, values)` pairs, validating rectangularity
    /// and name uniqueness.
    pub fn from_columns(
        columns: impl IntoIterator<Item = (String, Vec<f64>)>,
    ) -> Result<Self, TableError> {
        let mut table = Self::new();
        for (name, values) in columns {
            table.push_column(name, values)?;
        }
        Ok(table)
    }

    /// Append a column, validating length against existing columns.
    pub fn push_column(&mut self, name: String, values: Vec<f64>) -> Result<(), TableError> {
        if self.names.iter().any(|n| *n == name) {
            return Err(TableError::DuplicateColumn(name));
        }
        if let Some(expected) = self.data.first().map(Vec::len) {
            if values.len() != expected {
                return Err(TableError::RaggedColumns { column: name, len: values.len(), expected });
            }
        }
        self.names.push(name);
        self.data.push(values);
        Ok(())
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.data.first().map_or(0, Vec::len)
    }

    /// Number of columns.
    pub fn n_cols(&self) -> usize {
        self.names.len()
    }

    /// `true` when the table holds no rows or no columns.
    pub fn is_empty(&self) -> bool {
        self.n_rows() == 0 || self.n_cols() == 0
    }

    /// Ordered column names.
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    /// Whether a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Borrow a column's values by name.
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.names.iter().position(|n| n == name).map(|i| self.data[i].as_slice())
    }

    /// Iterate `(name, values)` pairs in column order.
    pub fn iter_columns(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.names.iter().map(String::as_str).zip(self.data.iter().map(Vec::as_slice))
    }

    /// Sorted distinct integer values of the `cycle` column; empty when the
    /// column is absent.
    pub fn cycles(&self) -> Vec<i64> {
        let Some(cycle) = self.column(columns::CYCLE) else {
            return Vec::new();
        };
        let mut values: Vec<i64> = cycle.iter().map(|v| *v as i64).collect();
        values.sort_unstable();
        values.dedup();
        values
    }

    /// Rows where `cycle == n`, as a new table. Identity when the cycle
    /// column is absent.
    pub fn filter_by_cycle(&self, n: i64) -> DataTable {
        let Some(cycle) = self.column(columns::CYCLE) else {
            return self.clone();
        };
        let keep: Vec<usize> = cycle
            .iter()
            .enumerate()
            .filter(|(_, v)| **v as i64 == n)
            .map(|(i, _)| i)
            .collect();
        self.take_rows(&keep)
    }

    /// Every `step`-th row starting at row 0.
    pub fn gather_every(&self, step: usize) -> DataTable {
        let step = step.max(1);
        let keep: Vec<usize> = (0..self.n_rows()).step_by(step).collect();
        self.take_rows(&keep)
    }

    fn take_rows(&self, indices: &[usize]) -> DataTable {
        let data = self
            .data
            .iter()
            .map(|col| indices.iter().map(|&i| col[i]).collect())
            .collect();
        DataTable { names: self.names.clone(), data }
    }

    /// Estimated in-memory size in MiB (8 bytes per cell).
    pub fn size_mb(&self) -> f64 {
        (self.n_rows() * self.n_cols() * 8) as f64 / (1024.0 * 1024.0)
    }

    /// Convert to an Arrow `RecordBatch` (`cycle` as Int64, others Float64).
    pub fn to_record_batch(&self) -> Result<RecordBatch, TableError> {
        let mut fields = Vec::with_capacity(self.n_cols());
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.n_cols());
        for (name, values) in self.iter_columns() {
            if name == columns::CYCLE {
                fields.push(Field::new(name, DataType::Int64, false));
                let ints: Vec<i64> = values.iter().map(|v| *v as i64).collect();
                arrays.push(Arc::new(Int64Array::from(ints)));
            } else {
                fields.push(Field::new(name, DataType::Float64, false));
                arrays.push(Arc::new(Float64Array::from(values.to_vec())));
            }
        }
        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
    }

    /// Rebuild a table from Arrow record batches sharing one schema.
    ///
    /// Integer and float columns of any width are accepted and widened to
    /// f64; anything else is an error.
    pub fn from_record_batches(batches: &[RecordBatch]) -> Result<Self, TableError> {
        let mut table = DataTable::new();
        let Some(first) = batches.first() else {
            return Ok(table);
        };
        for (idx, field) in first.schema().fields().iter().enumerate() {
            let mut values = Vec::new();
            for batch in batches {
                let col = batch.column(idx);
                append_as_f64(field.name(), col, &mut values)?;
            }
            table.push_column(field.name().clone(), values)?;
        }
        Ok(table)
    }
}

fn append_as_f64(name: &str, col: &ArrayRef, out: &mut Vec<f64>) -> Result<(), TableError> {
    use arrow::array::{Float32Array, Int32Array};
    use arrow::datatypes::DataType::*;

    match col.data_type() {
        Float64 => {
            let arr = col.as_any().downcast_ref::<Float64Array>().expect("checked type");
            out.extend((0..arr.len()).map(|i| arr.value(i)));
        }
        Float32 => {
            let arr = col.as_any().downcast_ref::<Float32Array>().expect("checked type");
            out.extend((0..arr.len()).map(|i| arr.value(i) as f64));
        }
        Int64 => {
            let arr = col.as_any().downcast_ref::<Int64Array>().expect("checked type");
            out.extend((0..arr.len()).map(|i| arr.value(i) as f64));
        }
        Int32 => {
            let arr = col.as_any().downcast_ref::<Int32Array>().expect("checked type");
            out.extend((0..arr.len()).map(|i| arr.value(i) as f64));
        }
        other => {
            return Err(TableError::UnsupportedType(name.to_string(), format!("{other:?}")));
        }
    }
    Ok(())
}
