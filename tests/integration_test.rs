//! Integration tests for operando
//!
//! These tests verify the pipeline from raw instrument text to canonical
//! datasets, analyses and session bookkeeping.

use operando::analysis;
use operando::parsers::parse_bytes;
use operando::schema::Technique;
use operando::session::{SessionError, SessionLimits, SessionManager};
use operando::table::DataTable;
use operando::transforms;

const GAMRY_CV: &str = "EXPLAIN\n\
TAG\tCV\n\
TITLE\tLABEL\tSweep test\n\
CURVE1\tTABLE\t3\n\
\tPt\tT\tVf\tIm\n\
\t#\ts\tV vs. Ref.\tA\n\
\t0\t0.0\t0.10\t0.001\n\
\t1\t0.1\t0.20\t0.002\n\
\t2\t0.2\t0.30\t0.003\n\
CURVE2\tTABLE\t3\n\
\tPt\tT\tVf\tIm\n\
\t#\ts\tV vs. Ref.\tA\n\
\t0\t0.3\t0.10\t0.004\n\
\t1\t0.4\t0.20\t0.005\n\
\t2\t0.5\t0.30\t0.006\n";

/// Gamry multi-curve: two 3-row blocks without a Cycle column become one
/// 6-row table with synthesized cycles 1 and 2.
#[test]
fn gamry_multi_curve_to_canonical() {
    let ds = parse_bytes(GAMRY_CV.as_bytes(), "sweep_cv.dta").unwrap();
    assert_eq!(ds.technique, Some(Technique::CV));
    assert_eq!(ds.table.n_rows(), 6);
    assert_eq!(ds.cycles, vec![1, 2]);
    assert_eq!(
        ds.table.column("cycle").unwrap(),
        &[1.0, 1.0, 1.0, 2.0, 2.0, 2.0]
    );
    // Canonical names and units: Gamry amps stay amps.
    assert_eq!(
        ds.table.column("current_A").unwrap(),
        &[0.001, 0.002, 0.003, 0.004, 0.005, 0.006]
    );
}

#[test]
fn hf_intercept_literal_scenario() {
    let table = DataTable::from_columns([
        ("z_real_Ohm".to_string(), vec![5.0, 6.0, 7.0, 8.0]),
        ("z_imag_Ohm".to_string(), vec![-2.0, -1.0, 0.5, 1.5]),
    ])
    .unwrap();
    let r_s = analysis::find_hf_intercept(&table).unwrap();
    assert!((r_s - (6.0 + 2.0 / 3.0)).abs() < 1e-9);
}

#[test]
fn time_average_literal_scenario() {
    let table = DataTable::from_columns([
        ("time_s".to_string(), vec![0.0, 1.0, 2.0, 3.0, 4.0]),
        ("current_A".to_string(), vec![0.1, 0.2, 0.3, 0.4, 0.5]),
    ])
    .unwrap();
    let avg = analysis::calculate_time_average(&table, "current_A", 1.0, 3.0).unwrap();
    assert!((avg - 0.3).abs() < 1e-12);
}

#[test]
fn ir_compensation_literal_scenario() {
    let table = DataTable::from_columns([
        ("potential_V".to_string(), vec![1.0, 1.2]),
        ("current_A".to_string(), vec![0.01, 0.02]),
    ])
    .unwrap();
    let ds = operando::dataset::EchemDataset::new("x.mpr", table);
    let corrected = transforms::ir_compensate(&ds, 10.0).unwrap();
    assert_eq!(
        corrected.table.column("potential_ir_corrected_V").unwrap(),
        &[0.9, 1.0]
    );
    // Original column untouched.
    assert_eq!(corrected.table.column("potential_V").unwrap(), &[1.0, 1.2]);
}

/// Three uploads against a two-file quota: the first two succeed, the
/// third fails per-file, and the session holds exactly two datasets.
#[test]
fn session_quota_batch_semantics() {
    let manager =
        SessionManager::new(SessionLimits { max_files: 2, ..Default::default() });
    let (_, session) = manager.get_or_create(None);

    let mut results = Vec::new();
    for name in ["a_cv.dta", "b_cv.dta", "c_cv.dta"] {
        let ds = parse_bytes(GAMRY_CV.as_bytes(), name).unwrap();
        results.push(manager.add_dataset(&session, ds));
    }

    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    assert!(matches!(results[2], Err(SessionError::QuotaExceeded { .. })));
    assert_eq!(session.lock().unwrap().file_count(), 2);
}

/// End-to-end: parse, transform, analyze on the derived column set.
#[test]
fn parse_transform_analyze_flow() {
    let ds = parse_bytes(GAMRY_CV.as_bytes(), "flow_lsv.dta").unwrap();

    let normalized = transforms::normalize_by_area(&ds, 0.5).unwrap();
    assert!(normalized.table.has_column("current_density_A_cm2"));

    let onset = analysis::onset_potential(&normalized.table, 0.0015).unwrap();
    assert!((onset - 0.2).abs() < 1e-12);

    let cycle1 = transforms::filter_by_cycle(&normalized, 1);
    assert_eq!(cycle1.table.n_rows(), 3);
    let charge = analysis::calculate_charge(&cycle1.table).unwrap();
    assert!(charge > 0.0);
}
