//! # Instrument File Parsers
//!
//! Decoders for the proprietary measurement formats this service ingests:
//!
//! - **BioLogic `.mpr`**: a binary container of modules ([`biologic`])
//! - **Gamry `.DTA`**: a text header followed by curve tables ([`gamry`])
//!
//! Both parsers produce an [`EchemDataset`] with canonical column names
//! and SI units (see [`crate::schema`]). Parsing is per-file: a malformed
//! file fails with a [`ParseError`] and never affects other files in a
//! batch.
//!
//! Parsers accept either a filesystem path or raw bytes. Byte input is
//! staged through a scoped temp file whose lifetime guarantees release on
//! every exit path, including parse errors.

use std::io::Write;
use std::path::Path;

use crate::dataset::EchemDataset;
use crate::schema::ColumnMapping;
use crate::table::{DataTable, TableError};

pub mod biologic;
pub mod gamry;

/// Errors produced while decoding an instrument file.
///
/// Every variant carries the offending filename so batch operations can
/// report failures per file.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Malformed input: bad magic, header/unit mismatch, decoder failure
    #[error("Invalid format in '{file}': {detail}")]
    InvalidFormat {
        /// Offending file
        file: String,
        /// What was wrong
        detail: String,
    },

    /// A required structural marker was not found
    #[error("Missing marker in '{file}': {detail}")]
    MissingMarker {
        /// Offending file
        file: String,
        /// Which marker
        detail: String,
    },

    /// The file parsed but contained no data rows
    #[error("No data in '{file}': {detail}")]
    NoData {
        /// Offending file
        file: String,
        /// Context
        detail: String,
    },

    /// Filesystem error while reading the file
    #[error("I/O error reading '{file}': {source}")]
    Io {
        /// Offending file
        file: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Column assembly failed (ragged or duplicate columns)
    #[error("Table error in '{file}': {source}")]
    Table {
        /// Offending file
        file: String,
        /// Underlying error
        #[source]
        source: TableError,
    },

    /// The file extension matches no known format
    #[error("Unsupported file type: '{0}'")]
    UnsupportedExtension(String),
}

impl ParseError {
    pub(crate) fn io(file: &str, source: std::io::Error) -> Self {
        ParseError::Io { file: file.to_string(), source }
    }
}

/// Parse a measurement file, dispatching on the extension
/// (case-insensitive `.mpr` / `.dta`).
pub fn parse_path(path: &Path) -> Result<EchemDataset, ParseError> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mpr" => biologic::read_mpr_file(path, Some(&filename)),
        "dta" => gamry::read_gamry_file(path, Some(&filename)),
        _ => Err(ParseError::UnsupportedExtension(filename)),
    }
}

/// Parse a measurement supplied as bytes.
///
/// The content is staged in a named temp file carrying the original
/// extension; the file is removed when the guard drops, whether parsing
/// succeeded or not.
pub fn parse_bytes(content: &[u8], filename: &str) -> Result<EchemDataset, ParseError> {
    let suffix = Path::new(filename)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
        .unwrap_or_default();

    let mut tmp = tempfile::Builder::new()
        .prefix("operando-upload-")
        .suffix(&suffix)
        .tempfile()
        .map_err(|e| ParseError::io(filename, e))?;
    tmp.write_all(content).map_err(|e| ParseError::io(filename, e))?;
    tmp.flush().map_err(|e| ParseError::io(filename, e))?;

    match suffix.as_str() {
        ".mpr" => biologic::read_mpr_file(tmp.path(), Some(filename)),
        ".dta" => gamry::read_gamry_file(tmp.path(), Some(filename)),
        _ => Err(ParseError::UnsupportedExtension(filename.to_string())),
    }
}

/// Rename and rescale raw source columns through a format map.
///
/// When several source columns target the same canonical name, the first
/// occurrence wins and later duplicates are dropped. Unmapped columns are
/// kept unchanged.
pub(crate) fn standardize_columns(
    raw: Vec<(String, Vec<f64>)>,
    map: &'static [ColumnMapping],
    file: &str,
) -> Result<DataTable, ParseError> {
    let mut seen_canonical: Vec<&'static str> = Vec::new();
    let mut table = DataTable::new();
    for (name, mut values) in raw {
        match crate::schema::lookup_mapping(map, &name) {
            Some(mapping) => {
                if seen_canonical.contains(&mapping.canonical) {
                    continue;
                }
                seen_canonical.push(mapping.canonical);
                if (mapping.factor - 1.0).abs() > f64::EPSILON {
                    for v in &mut values {
                        *v *= mapping.factor;
                    }
                }
                table
                    .push_column(mapping.canonical.to_string(), values)
                    .map_err(|source| ParseError::Table { file: file.to_string(), source })?;
            }
            None => {
                table
                    .push_column(name, values)
                    .map_err(|source| ParseError::Table { file: file.to_string(), source })?;
            }
        }
    }
    Ok(table)
}
