//! # Session Container Export / Import
//!
//! A session is exported as a versioned zip container (schema 2.0.0):
//!
//! ```text
//! metadata.json          # file registry (authoritative)
//! data/<filename>.parquet   or   data/<filename>.csv
//! plots/plots.json       # optional list of plot configs
//! plots/<name>.py        # optional generated code per plot
//! file_table.csv         # convenience: tabular view of the registry
//! ```
//!
//! The importer accepts this layout plus the legacy v1 shape
//! (`metadata.csv` + `data/*.csv` + optional `plot_settings.json`), and
//! tolerates the old field spellings (`parquet_path`, `parquet_name`,
//! `source`, embedded `ui_state`). Format discrimination happens at the
//! container level: whichever registry file is present wins; the schema
//! version string is advisory.

use std::collections::{BTreeSet, HashMap};
use std::io::{Cursor, Read, Write};

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::dataset::{EchemDataset, SourceFormat};
use crate::schema::Technique;
use crate::table::{DataTable, TableError};

/// Current container schema version.
pub const SCHEMA_VERSION: &str = "2.0.0";
/// Container format tag written into the registry.
pub const FORMAT_NAME: &str = "operando-session-export";

/// Errors raised while building or reading a container.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// ZIP archive error
    #[error("ZIP error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    /// Arrow error
    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),

    /// JSON registry error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// CSV encode/decode error
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// Table assembly error
    #[error("Table error: {0}")]
    TableError(#[from] TableError),

    /// Neither `metadata.json` nor `metadata.csv` present
    #[error("Invalid export format: missing metadata.json or metadata.csv")]
    FormatError,
}

/// Data encoding for the per-dataset files in the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    /// Apache Parquet (default)
    #[default]
    Parquet,
    /// Plain CSV, for spreadsheet consumers
    Csv,
}

/// Everything that goes into a container besides the datasets themselves.
#[derive(Debug, Default)]
pub struct ExportOptions {
    /// Data file encoding
    pub format: ExportFormat,
    /// Also write CSV siblings next to parquet files
    pub include_csv: bool,
    /// Plot configurations for `plots/plots.json`
    pub plots_config: Option<Vec<serde_json::Value>>,
    /// Generated code per plot name, written as `plots/<name>.py`
    pub plot_codes: Vec<(String, String)>,
    /// Legacy single-plot UI state, written as `ui_state.json`
    pub plot_settings: Option<serde_json::Value>,
    /// Session metadata map: filename → custom columns (with `label`)
    pub file_metadata: HashMap<String, HashMap<String, String>>,
}

/// Provenance block of a registry entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Provenance {
    /// Filename before any rename
    pub original_filename: Option<String>,
    /// SHA-256 of the original upload (reserved)
    pub file_hash: Option<String>,
}

/// One file entry of the registry. Legacy spellings are accepted on read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileEntry {
    /// Dataset identity
    pub filename: String,
    /// Path of the data file inside the container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_path: Option<String>,
    /// Legacy v1 path field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parquet_path: Option<String>,
    /// Legacy v1 path field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parquet_name: Option<String>,
    /// Technique abbreviation
    pub technique: Option<String>,
    /// ISO-8601 acquisition timestamp
    pub timestamp: Option<String>,
    /// Source format tag (`source` in v1)
    #[serde(default, alias = "source")]
    pub source_format: Option<String>,
    /// Ordered column names
    #[serde(default)]
    pub columns: Vec<String>,
    /// Sorted distinct cycles
    #[serde(default)]
    pub cycles: Vec<i64>,
    /// Display label
    pub label: Option<String>,
    /// Custom metadata columns
    #[serde(default)]
    pub custom: HashMap<String, String>,
    /// Provenance block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    /// Free-form user metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub user_metadata: HashMap<String, String>,
}

/// The authoritative registry at the container root.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExportManifest {
    /// Container schema version (advisory)
    pub schema_version: String,
    /// Format tag
    pub format: String,
    /// Export instant, ISO-8601
    pub exported_at: String,
    /// File registry
    pub files: Vec<FileEntry>,
    /// Legacy embedded UI state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_state: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PlotsBundle {
    plots: Vec<serde_json::Value>,
}

/// Result of importing a container.
#[derive(Debug, Default)]
pub struct ImportedSession {
    /// Reconstructed datasets
    pub datasets: Vec<EchemDataset>,
    /// Legacy UI state, if the container carried one
    pub ui_state: Option<serde_json::Value>,
    /// Plot configurations from `plots/plots.json`
    pub plots_config: Option<Vec<serde_json::Value>>,
    /// Per-file custom metadata merged with labels
    pub file_metadata: HashMap<String, HashMap<String, String>>,
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Export datasets (and session trimmings) to a zip container.
pub fn session_export(
    datasets: &[EchemDataset],
    opts: &ExportOptions,
) -> Result<Vec<u8>, ExportError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let file_opts =
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut manifest = ExportManifest {
        schema_version: SCHEMA_VERSION.to_string(),
        format: FORMAT_NAME.to_string(),
        exported_at: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
        files: Vec::with_capacity(datasets.len()),
        ui_state: None,
    };

    for ds in datasets {
        let data_path = match opts.format {
            ExportFormat::Parquet => {
                let path = format!("data/{}.parquet", ds.filename);
                zip.start_file(path.as_str(), file_opts)?;
                zip.write_all(&table_to_parquet(&ds.table)?)?;
                if opts.include_csv {
                    let csv_path = format!("data/{}.csv", ds.filename);
                    zip.start_file(csv_path.as_str(), file_opts)?;
                    zip.write_all(table_to_csv(&ds.table)?.as_bytes())?;
                }
                path
            }
            ExportFormat::Csv => {
                let path = format!("data/{}.csv", ds.filename);
                zip.start_file(path.as_str(), file_opts)?;
                zip.write_all(table_to_csv(&ds.table)?.as_bytes())?;
                path
            }
        };

        // Session metadata overrides the dataset's own label; the rest of
        // the map travels as custom columns.
        let mut custom = opts.file_metadata.get(&ds.filename).cloned().unwrap_or_default();
        let label = custom.remove("label").unwrap_or_else(|| ds.label.clone());

        manifest.files.push(FileEntry {
            filename: ds.filename.clone(),
            data_path: Some(data_path),
            parquet_path: None,
            parquet_name: None,
            technique: ds.technique.map(|t| t.as_str().to_string()),
            timestamp: ds.timestamp.map(|t| t.format(TIMESTAMP_FORMAT).to_string()),
            source_format: ds.source_format.map(|s| s.as_str().to_string()),
            columns: ds.columns().to_vec(),
            cycles: ds.cycles.clone(),
            label: Some(label),
            custom,
            provenance: Some(Provenance {
                original_filename: ds.original_filename.clone(),
                file_hash: ds.file_hash.clone(),
            }),
            user_metadata: ds.user_metadata.clone(),
        });
    }

    zip.start_file("metadata.json", file_opts)?;
    zip.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())?;

    if let Some(plots) = &opts.plots_config {
        zip.start_file("plots/plots.json", file_opts)?;
        let bundle = PlotsBundle { plots: plots.clone() };
        zip.write_all(serde_json::to_string_pretty(&bundle)?.as_bytes())?;
    }
    for (name, code) in &opts.plot_codes {
        let safe: String = name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        zip.start_file(format!("plots/{safe}.py"), file_opts)?;
        zip.write_all(code.as_bytes())?;
    }
    if opts.plot_settings.is_some() && opts.plots_config.is_none() {
        zip.start_file("ui_state.json", file_opts)?;
        zip.write_all(
            serde_json::to_string_pretty(opts.plot_settings.as_ref().expect("checked above"))?
                .as_bytes(),
        )?;
    }

    if !manifest.files.is_empty() {
        zip.start_file("file_table.csv", file_opts)?;
        zip.write_all(file_table_csv(&manifest.files)?.as_bytes())?;
    }

    Ok(zip.finish()?.into_inner())
}

/// Import a container, accepting both the schema-2 layout and the legacy
/// v1 CSV layout.
pub fn session_import(content: &[u8]) -> Result<ImportedSession, ExportError> {
    let mut archive = ZipArchive::new(Cursor::new(content))?;
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();

    if names.iter().any(|n| n == "metadata.json") {
        import_schema2(&mut archive, &names)
    } else if names.iter().any(|n| n == "metadata.csv") {
        import_legacy(&mut archive, &names)
    } else {
        Err(ExportError::FormatError)
    }
}

fn import_schema2(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    names: &[String],
) -> Result<ImportedSession, ExportError> {
    let manifest: ExportManifest = serde_json::from_slice(&read_entry(archive, "metadata.json")?)?;

    let mut out = ImportedSession::default();

    if names.iter().any(|n| n == "plots/plots.json") {
        let bundle: PlotsBundle =
            serde_json::from_slice(&read_entry(archive, "plots/plots.json")?)?;
        out.plots_config = Some(bundle.plots);
    }
    if names.iter().any(|n| n == "ui_state.json") {
        out.ui_state = Some(serde_json::from_slice(&read_entry(archive, "ui_state.json")?)?);
    } else {
        out.ui_state = manifest.ui_state.clone();
    }

    for entry in &manifest.files {
        let Some(data_path) = resolve_data_path(entry, names) else {
            log::warn!("skipping '{}': no data file in container", entry.filename);
            continue;
        };
        let raw = read_entry(archive, &data_path)?;
        let table = if data_path.ends_with(".parquet") {
            parquet_to_table(raw)?
        } else {
            csv_to_table(&raw)?
        };

        let provenance = entry.provenance.clone().unwrap_or_default();
        let dataset = EchemDataset {
            filename: entry.filename.clone(),
            technique: entry.technique.as_deref().and_then(Technique::parse),
            label: entry.label.clone().unwrap_or_else(|| entry.filename.clone()),
            timestamp: entry.timestamp.as_deref().and_then(parse_timestamp),
            cycles: if entry.cycles.is_empty() { table.cycles() } else { entry.cycles.clone() },
            source_format: entry.source_format.as_deref().and_then(SourceFormat::parse),
            original_filename: provenance.original_filename,
            file_hash: provenance.file_hash,
            user_metadata: entry.user_metadata.clone(),
            table,
        };
        out.datasets.push(dataset);

        let mut custom = entry.custom.clone();
        if let Some(label) = &entry.label {
            custom.insert("label".to_string(), label.clone());
        }
        if !custom.is_empty() {
            out.file_metadata.insert(entry.filename.clone(), custom);
        }
    }

    Ok(out)
}

fn import_legacy(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    names: &[String],
) -> Result<ImportedSession, ExportError> {
    let mut out = ImportedSession::default();

    if names.iter().any(|n| n == "plot_settings.json") {
        out.ui_state = Some(serde_json::from_slice(&read_entry(archive, "plot_settings.json")?)?);
    }

    let meta_raw = read_entry(archive, "metadata.csv")?;
    let mut reader = csv::Reader::from_reader(meta_raw.as_slice());
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let get = |key: &str| {
            headers
                .iter()
                .position(|h| h == key)
                .and_then(|i| record.get(i))
                .map(str::to_string)
                .filter(|s| !s.is_empty())
        };
        rows.push((get("filename"), get("label"), get("technique"), get("timestamp")));
    }

    for (filename, label, technique, timestamp) in rows {
        let Some(filename) = filename else { continue };
        let csv_path = format!("data/{filename}.csv");
        if !names.iter().any(|n| *n == csv_path) {
            continue;
        }
        let table = csv_to_table(&read_entry(archive, &csv_path)?)?;

        let label = label.unwrap_or_else(|| filename.clone());
        out.file_metadata.insert(
            filename.clone(),
            HashMap::from([("label".to_string(), label.clone())]),
        );
        out.datasets.push(EchemDataset {
            filename,
            technique: technique.as_deref().and_then(Technique::parse),
            label,
            timestamp: timestamp.as_deref().and_then(parse_timestamp),
            cycles: table.cycles(),
            source_format: None,
            original_filename: None,
            file_hash: None,
            user_metadata: HashMap::new(),
            table,
        });
    }

    Ok(out)
}

/// Resolve a registry entry's data file: explicit `data_path`, then the
/// legacy fields, then the conventional locations.
fn resolve_data_path(entry: &FileEntry, names: &[String]) -> Option<String> {
    let candidates = [
        entry.data_path.clone(),
        entry.parquet_path.clone(),
        entry.parquet_name.clone(),
        Some(format!("data/{}.parquet", entry.filename)),
        Some(format!("data/{}.csv", entry.filename)),
    ];
    candidates
        .into_iter()
        .flatten()
        .find(|candidate| names.iter().any(|n| n == candidate))
}

fn read_entry(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, ExportError> {
    let mut file = archive.by_name(name)?;
    let mut buf = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Timestamps are parsed with tolerance: plain ISO-8601, with fractional
/// seconds, or RFC 3339. Anything else becomes `None`.
fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|t| t.naive_utc()))
}

fn table_to_parquet(table: &DataTable) -> Result<Vec<u8>, ExportError> {
    let batch = table.to_record_batch()?;
    let mut writer = ArrowWriter::try_new(Vec::new(), batch.schema(), None)?;
    writer.write(&batch)?;
    Ok(writer.into_inner()?)
}

fn parquet_to_table(raw: Vec<u8>) -> Result<DataTable, ExportError> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(raw))?.build()?;
    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    Ok(DataTable::from_record_batches(&batches)?)
}

fn table_to_csv(table: &DataTable) -> Result<String, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(table.column_names())?;
    let is_cycle: Vec<bool> =
        table.column_names().iter().map(|n| n == crate::schema::columns::CYCLE).collect();
    for row in 0..table.n_rows() {
        let record: Vec<String> = table
            .iter_columns()
            .zip(&is_cycle)
            .map(|((_, values), cycle)| {
                if *cycle {
                    format!("{}", values[row] as i64)
                } else {
                    format!("{}", values[row])
                }
            })
            .collect();
        writer.write_record(&record)?;
    }
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn csv_to_table(raw: &[u8]) -> Result<DataTable, ExportError> {
    let mut reader = csv::Reader::from_reader(raw);
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record?;
        for (col, field) in columns.iter_mut().zip(record.iter()) {
            col.push(field.trim().parse::<f64>().unwrap_or(f64::NAN));
        }
    }
    Ok(DataTable::from_columns(headers.into_iter().zip(columns))?)
}

/// Tabular view of the registry for spreadsheet users: the base columns
/// plus the union of all custom keys.
fn file_table_csv(files: &[FileEntry]) -> Result<String, ExportError> {
    let custom_keys: BTreeSet<&str> =
        files.iter().flat_map(|f| f.custom.keys().map(String::as_str)).collect();

    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header = vec!["filename", "label", "technique", "timestamp"];
    header.extend(custom_keys.iter().copied());
    writer.write_record(&header)?;

    for f in files {
        let mut record = vec![
            f.filename.clone(),
            f.label.clone().unwrap_or_default(),
            f.technique.clone().unwrap_or_default(),
            f.timestamp.clone().unwrap_or_default(),
        ];
        for key in &custom_keys {
            record.push(f.custom.get(*key).cloned().unwrap_or_default());
        }
        writer.write_record(&record)?;
    }
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Technique;

    fn dataset(filename: &str) -> EchemDataset {
        let table = DataTable::from_columns([
            ("time_s".to_string(), vec![0.0, 1.0, 2.0]),
            ("current_A".to_string(), vec![0.001, 0.002, 0.003]),
            ("cycle".to_string(), vec![1.0, 1.0, 2.0]),
        ])
        .unwrap();
        let mut ds = EchemDataset::new(filename, table);
        ds.technique = Some(Technique::CA);
        ds.label = "sample A".to_string();
        ds.user_metadata.insert("electrolyte".to_string(), "1M KOH".to_string());
        ds
    }

    #[test]
    fn parquet_round_trip_preserves_dataset() {
        let ds = dataset("run1.mpr");
        let zip = session_export(std::slice::from_ref(&ds), &ExportOptions::default()).unwrap();
        let imported = session_import(&zip).unwrap();

        assert_eq!(imported.datasets.len(), 1);
        let back = &imported.datasets[0];
        assert_eq!(back.filename, "run1.mpr");
        assert_eq!(back.technique, Some(Technique::CA));
        assert_eq!(back.label, "sample A");
        assert_eq!(back.cycles, vec![1, 2]);
        assert_eq!(back.columns(), ds.columns());
        assert_eq!(back.table, ds.table);
        assert_eq!(back.user_metadata.get("electrolyte").map(String::as_str), Some("1M KOH"));
    }

    #[test]
    fn csv_format_round_trips_too() {
        let ds = dataset("run2.mpr");
        let opts = ExportOptions { format: ExportFormat::Csv, ..Default::default() };
        let zip = session_export(std::slice::from_ref(&ds), &opts).unwrap();
        let imported = session_import(&zip).unwrap();
        let back = &imported.datasets[0];
        assert_eq!(back.table.column("current_A").unwrap(), ds.table.column("current_A").unwrap());
        assert_eq!(back.cycles, vec![1, 2]);
    }

    #[test]
    fn session_label_overrides_dataset_label() {
        let ds = dataset("run3.mpr");
        let mut opts = ExportOptions::default();
        opts.file_metadata.insert(
            "run3.mpr".to_string(),
            HashMap::from([
                ("label".to_string(), "renamed".to_string()),
                ("loading_mg".to_string(), "2.5".to_string()),
            ]),
        );
        let zip = session_export(std::slice::from_ref(&ds), &opts).unwrap();
        let imported = session_import(&zip).unwrap();
        assert_eq!(imported.datasets[0].label, "renamed");
        let meta = imported.file_metadata.get("run3.mpr").unwrap();
        assert_eq!(meta.get("loading_mg").map(String::as_str), Some("2.5"));
        assert_eq!(meta.get("label").map(String::as_str), Some("renamed"));
    }

    #[test]
    fn plots_bundle_round_trips() {
        let ds = dataset("run4.mpr");
        let opts = ExportOptions {
            plots_config: Some(vec![serde_json::json!({"name": "p1", "x_col": "time_s"})]),
            plot_codes: vec![("p1".to_string(), "print('hi')".to_string())],
            ..Default::default()
        };
        let zip = session_export(std::slice::from_ref(&ds), &opts).unwrap();

        let mut archive = ZipArchive::new(Cursor::new(zip.as_slice())).unwrap();
        assert!(archive.by_name("plots/p1.py").is_ok());
        drop(archive);

        let imported = session_import(&zip).unwrap();
        let plots = imported.plots_config.unwrap();
        assert_eq!(plots.len(), 1);
        assert_eq!(plots[0]["name"], "p1");
    }

    #[test]
    fn legacy_container_is_accepted() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let opts = SimpleFileOptions::default();
        zip.start_file("metadata.csv", opts).unwrap();
        zip.write_all(b"filename,label,technique,timestamp\nold.mpr,Old Run,CV,bogus\n")
            .unwrap();
        zip.start_file("data/old.mpr.csv", opts).unwrap();
        zip.write_all(b"potential_V,current_A\n0.1,0.001\n0.2,0.002\n").unwrap();
        zip.start_file("plot_settings.json", opts).unwrap();
        zip.write_all(br#"{"x_col": "potential_V"}"#).unwrap();
        let content = zip.finish().unwrap().into_inner();

        let imported = session_import(&content).unwrap();
        assert_eq!(imported.datasets.len(), 1);
        let ds = &imported.datasets[0];
        assert_eq!(ds.technique, Some(Technique::CV));
        assert_eq!(ds.label, "Old Run");
        // Unparsable timestamp degrades to None rather than failing.
        assert!(ds.timestamp.is_none());
        assert!(imported.ui_state.is_some());
    }

    #[test]
    fn missing_registry_is_format_error() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("data/whatever.csv", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"a\n1\n").unwrap();
        let content = zip.finish().unwrap().into_inner();
        assert!(matches!(session_import(&content), Err(ExportError::FormatError)));
    }

    #[test]
    fn legacy_path_fields_resolve() {
        // Build a v2 container, then rewrite the registry to use the v1
        // field spelling.
        let ds = dataset("run5.mpr");
        let zip_bytes =
            session_export(std::slice::from_ref(&ds), &ExportOptions::default()).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(zip_bytes.as_slice())).unwrap();
        let manifest_raw = read_entry(&mut archive, "metadata.json").unwrap();
        let mut manifest: serde_json::Value = serde_json::from_slice(&manifest_raw).unwrap();
        let entry = &mut manifest["files"][0];
        let path = entry["data_path"].take();
        entry["parquet_path"] = path;
        entry["source"] = serde_json::json!("biologic");

        let mut rebuilt = ZipWriter::new(Cursor::new(Vec::new()));
        let opts = SimpleFileOptions::default();
        rebuilt.start_file("metadata.json", opts).unwrap();
        rebuilt.write_all(manifest.to_string().as_bytes()).unwrap();
        rebuilt.start_file("data/run5.mpr.parquet", opts).unwrap();
        rebuilt
            .write_all(&read_entry(&mut archive, "data/run5.mpr.parquet").unwrap())
            .unwrap();
        let content = rebuilt.finish().unwrap().into_inner();

        let imported = session_import(&content).unwrap();
        assert_eq!(imported.datasets.len(), 1);
        assert_eq!(imported.datasets[0].source_format, Some(SourceFormat::Biologic));
    }
}
