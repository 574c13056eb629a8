//! Container round-trip law: `session_import(session_export(D)) ≡ D` for
//! every canonical field, across both data encodings and through the
//! upload path of the original files.

use std::collections::HashMap;

use chrono::NaiveDate;
use operando::dataset::{EchemDataset, SourceFormat};
use operando::export::{session_export, session_import, ExportFormat, ExportOptions};
use operando::parsers::parse_bytes;
use operando::schema::Technique;
use operando::table::DataTable;

fn sample_datasets() -> Vec<EchemDataset> {
    let ca_table = DataTable::from_columns([
        ("time_s".to_string(), vec![0.0, 1.0, 2.0]),
        ("current_A".to_string(), vec![0.001, 0.002, 0.003]),
    ])
    .unwrap();
    let mut ca = EchemDataset::new("run_ca.mpr", ca_table);
    ca.technique = Some(Technique::CA);
    ca.label = "CA run".to_string();
    ca.timestamp = NaiveDate::from_ymd_opt(2024, 6, 13).unwrap().and_hms_opt(10, 30, 0);
    ca.source_format = Some(SourceFormat::Biologic);
    ca.original_filename = Some("run_ca.mpr".to_string());
    ca.user_metadata.insert("cell".to_string(), "H-cell".to_string());

    let cv_table = DataTable::from_columns([
        ("potential_V".to_string(), vec![0.1, 0.2, 0.3, 0.1, 0.2, 0.3]),
        ("current_A".to_string(), vec![1e-4, 2e-4, 3e-4, 1.1e-4, 2.1e-4, 3.1e-4]),
        ("cycle".to_string(), vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0]),
    ])
    .unwrap();
    let mut cv = EchemDataset::new("run_cv.dta", cv_table);
    cv.technique = Some(Technique::CV);
    cv.source_format = Some(SourceFormat::Gamry);

    vec![ca, cv]
}

fn assert_round_trips(original: &EchemDataset, imported: &EchemDataset) {
    assert_eq!(imported.filename, original.filename);
    assert_eq!(imported.columns(), original.columns());
    assert_eq!(imported.table.n_rows(), original.table.n_rows());
    assert_eq!(imported.technique, original.technique);
    assert_eq!(imported.label, original.label);
    assert_eq!(imported.cycles, original.cycles);
    assert_eq!(imported.timestamp, original.timestamp);
    assert_eq!(imported.source_format, original.source_format);
    assert_eq!(imported.user_metadata, original.user_metadata);
}

#[test]
fn parquet_round_trip_is_exact() {
    let datasets = sample_datasets();
    let zip = session_export(&datasets, &ExportOptions::default()).unwrap();
    let imported = session_import(&zip).unwrap();

    assert_eq!(imported.datasets.len(), 2);
    for original in &datasets {
        let back = imported
            .datasets
            .iter()
            .find(|d| d.filename == original.filename)
            .expect("dataset survived the round trip");
        assert_round_trips(original, back);
        assert_eq!(back.table, original.table);
    }
}

#[test]
fn csv_round_trip_preserves_canonical_fields() {
    let datasets = sample_datasets();
    let opts = ExportOptions { format: ExportFormat::Csv, ..Default::default() };
    let zip = session_export(&datasets, &opts).unwrap();
    let imported = session_import(&zip).unwrap();

    for original in &datasets {
        let back = imported
            .datasets
            .iter()
            .find(|d| d.filename == original.filename)
            .expect("dataset survived the round trip");
        assert_round_trips(original, back);
        for (name, values) in original.table.iter_columns() {
            let imported_values = back.table.column(name).unwrap();
            for (a, b) in values.iter().zip(imported_values) {
                assert!((a - b).abs() < 1e-12, "column {name} drifted");
            }
        }
    }
}

#[test]
fn custom_metadata_round_trips_through_registry() {
    let datasets = sample_datasets();
    let mut file_metadata = HashMap::new();
    file_metadata.insert(
        "run_ca.mpr".to_string(),
        HashMap::from([
            ("label".to_string(), "renamed run".to_string()),
            ("loading_mg_cm2".to_string(), "0.25".to_string()),
        ]),
    );
    let opts = ExportOptions { file_metadata, ..Default::default() };
    let zip = session_export(&datasets, &opts).unwrap();
    let imported = session_import(&zip).unwrap();

    let ca = imported.datasets.iter().find(|d| d.filename == "run_ca.mpr").unwrap();
    assert_eq!(ca.label, "renamed run");
    let meta = imported.file_metadata.get("run_ca.mpr").unwrap();
    assert_eq!(meta.get("loading_mg_cm2").map(String::as_str), Some("0.25"));
}

/// A parsed instrument file survives export/import unchanged, including
/// technique detection and cycle bookkeeping.
#[test]
fn parsed_file_survives_container() {
    let dta = "TAG\tCV\n\
CURVE1\tTABLE\t2\n\
\tT\tVf\tIm\n\
\ts\tV\tA\n\
\t0.0\t0.1\t0.001\n\
\t0.1\t0.2\t0.002\n\
CURVE2\tTABLE\t2\n\
\tT\tVf\tIm\n\
\ts\tV\tA\n\
\t0.2\t0.1\t0.003\n\
\t0.3\t0.2\t0.004\n";
    let ds = parse_bytes(dta.as_bytes(), "cycles_cv.dta").unwrap();
    assert_eq!(ds.cycles, vec![1, 2]);

    let zip = session_export(std::slice::from_ref(&ds), &ExportOptions::default()).unwrap();
    let imported = session_import(&zip).unwrap();
    assert_round_trips(&ds, &imported.datasets[0]);
}
