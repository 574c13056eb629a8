//! # Canonical Measurement Dataset
//!
//! An [`EchemDataset`] bundles one measurement file's canonical table with
//! its identity and provenance: technique, label, acquisition timestamp,
//! cycle list and the source format it was decoded from. Datasets are
//! treated as immutable once inserted into a session; transforms produce
//! new datasets and the per-file metadata map is the only mutable state.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::schema::Technique;
use crate::table::DataTable;

/// Instrument file format a dataset was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// BioLogic `.mpr` binary
    Biologic,
    /// Gamry `.DTA` text
    Gamry,
}

impl SourceFormat {
    /// Wire tag for the format.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Biologic => "biologic",
            SourceFormat::Gamry => "gamry",
        }
    }

    /// Parse a wire tag.
    pub fn parse(s: &str) -> Option<SourceFormat> {
        match s {
            "biologic" => Some(SourceFormat::Biologic),
            "gamry" => Some(SourceFormat::Gamry),
            _ => None,
        }
    }
}

/// A single parsed measurement in canonical form.
///
/// All data is stored in SI units with standardized column names; see
/// [`crate::schema`] for the registry.
#[derive(Debug, Clone)]
pub struct EchemDataset {
    /// Identity within a session (unique key; never renamed)
    pub filename: String,
    /// The measurement data, canonical columns only plus any unmapped
    /// source columns
    pub table: DataTable,
    /// Detected technique, if any
    pub technique: Option<Technique>,
    /// User-editable display string
    pub label: String,
    /// Acquisition timestamp, when the source format records one
    pub timestamp: Option<NaiveDateTime>,
    /// Sorted distinct cycle indices (empty without a cycle column)
    pub cycles: Vec<i64>,
    /// Source instrument format; absent for imported XAS-derived data
    pub source_format: Option<SourceFormat>,
    /// Filename before any rename (provenance)
    pub original_filename: Option<String>,
    /// SHA-256 of the original file (reserved; may be absent)
    pub file_hash: Option<String>,
    /// Free-form user metadata, string-typed on the wire
    pub user_metadata: HashMap<String, String>,
}

impl EchemDataset {
    /// Assemble a dataset, deriving `cycles` from the table.
    pub fn new(filename: impl Into<String>, table: DataTable) -> Self {
        let filename = filename.into();
        let cycles = table.cycles();
        let label = filename.clone();
        Self {
            filename,
            table,
            technique: None,
            label,
            timestamp: None,
            cycles,
            source_format: None,
            original_filename: None,
            file_hash: None,
            user_metadata: HashMap::new(),
        }
    }

    /// Ordered canonical column names of the table.
    pub fn columns(&self) -> &[String] {
        self.table.column_names()
    }

    /// Estimated in-memory size in MiB.
    pub fn size_mb(&self) -> f64 {
        self.table.size_mb()
    }

    /// Clone the dataset with a different table, keeping identity and
    /// provenance. Used by the non-destructive transforms.
    pub fn with_table(&self, table: DataTable) -> Self {
        let cycles = table.cycles();
        Self { table, cycles, ..self.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::DataTable;

    #[test]
    fn with_table_recomputes_cycles() {
        let table = DataTable::from_columns([
            ("potential_V".to_string(), vec![0.0, 0.1]),
            ("cycle".to_string(), vec![1.0, 2.0]),
        ])
        .unwrap();
        let ds = EchemDataset::new("a.mpr", table);
        assert_eq!(ds.cycles, vec![1, 2]);

        let filtered = ds.with_table(ds.table.filter_by_cycle(1));
        assert_eq!(filtered.cycles, vec![1]);
        assert_eq!(filtered.filename, "a.mpr");
    }

    #[test]
    fn source_format_tags() {
        assert_eq!(SourceFormat::Biologic.as_str(), "biologic");
        assert_eq!(SourceFormat::parse("gamry"), Some(SourceFormat::Gamry));
        assert_eq!(SourceFormat::parse("csv"), None);
    }
}
