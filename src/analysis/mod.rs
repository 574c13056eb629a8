//! # Technique Analysis Kernels
//!
//! Deterministic numeric routines over canonical tables. Every kernel is a
//! pure function returning `Option<f64>`: `None` means "not applicable"
//! (required column absent, empty window, out-of-range target) and is
//! distinct from a failure. Callers filter by cycle beforehand when a
//! per-cycle result is wanted.
//!
//! Kernels traverse rows in instrument-native order; only the EIS
//! intercepts sort, and only internally.
//!
//! Deliberately not provided (out of scope, use instrument software):
//! Cottrell fitting, CV peak finding/separation/ratio, stability decay
//! metrics, CP transition time.

pub mod chronometry;
pub mod eis;
pub mod ocv;
pub mod voltammetry;

pub use chronometry::{calculate_charge, calculate_time_average, overpotential_at_current};
pub use eis::{find_hf_intercept, find_lf_intercept};
pub use ocv::steady_state_potential;
pub use voltammetry::{current_at_potential, limiting_current, onset_potential};

use crate::schema::columns;
use crate::table::DataTable;

/// `(t_min, t_max)` of the time column, used to pre-fill averaging windows.
pub fn time_range(table: &DataTable) -> Option<(f64, f64)> {
    let time = table.column(columns::TIME_S)?;
    let first = time.first()?;
    let (mut min, mut max) = (*first, *first);
    for t in time {
        min = min.min(*t);
        max = max.max(*t);
    }
    Some((min, max))
}
