//! Chronoamperometry / chronopotentiometry kernels: steady-state window
//! averages, integrated charge and overpotential extraction.

use crate::schema::columns;
use crate::table::DataTable;

/// Arithmetic mean of `column` over rows with `t_start ≤ time ≤ t_end`.
///
/// Used to read steady-state current (CA) or potential (CP) off the tail
/// of a transient. Empty window → `None`.
pub fn calculate_time_average(
    table: &DataTable,
    column: &str,
    t_start: f64,
    t_end: f64,
) -> Option<f64> {
    let time = table.column(columns::TIME_S)?;
    let values = table.column(column)?;

    let mut sum = 0.0;
    let mut count = 0usize;
    for (t, v) in time.iter().zip(values) {
        if *t >= t_start && *t <= t_end {
            sum += v;
            count += 1;
        }
    }
    (count > 0).then(|| sum / count as f64)
}

/// Total charge `Q = ∫ I dt` by trapezoidal integration over
/// (`time_s`, `current_A`). Needs at least two rows.
pub fn calculate_charge(table: &DataTable) -> Option<f64> {
    let time = table.column(columns::TIME_S)?;
    let current = table.column(columns::CURRENT_A)?;
    if time.len() < 2 {
        return None;
    }

    let mut q = 0.0;
    for i in 0..time.len() - 1 {
        q += 0.5 * (current[i] + current[i + 1]) * (time[i + 1] - time[i]);
    }
    Some(q)
}

/// Overpotential at a target current: `|potential[idx] − E_eq|` where
/// `idx` minimizes `|current − I_target|`. `E_eq` defaults to 0 V for
/// OER/HER benchmarking.
pub fn overpotential_at_current(
    table: &DataTable,
    target_current_a: f64,
    equilibrium_v: f64,
) -> Option<f64> {
    let current = table.column(columns::CURRENT_A)?;
    let potential = table.column(columns::POTENTIAL_V)?;
    if current.is_empty() {
        return None;
    }

    let idx = nearest_index(current, target_current_a)?;
    Some((potential[idx] - equilibrium_v).abs())
}

/// Index minimizing `|values[i] − target|`.
pub(crate) fn nearest_index(values: &[f64], target: f64) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .min_by(|a, b| (a.1 - target).abs().total_cmp(&(b.1 - target).abs()))
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ca_table() -> DataTable {
        DataTable::from_columns([
            ("time_s".to_string(), vec![0.0, 1.0, 2.0, 3.0, 4.0]),
            ("current_A".to_string(), vec![0.1, 0.2, 0.3, 0.4, 0.5]),
            ("potential_V".to_string(), vec![1.0, 1.1, 1.2, 1.3, 1.4]),
        ])
        .unwrap()
    }

    #[test]
    fn window_average() {
        let avg = calculate_time_average(&ca_table(), "current_A", 1.0, 3.0).unwrap();
        assert_relative_eq!(avg, 0.3, epsilon = 1e-12);
    }

    #[test]
    fn empty_window_is_none() {
        assert_eq!(calculate_time_average(&ca_table(), "current_A", 10.0, 20.0), None);
        assert_eq!(calculate_time_average(&ca_table(), "missing", 0.0, 1.0), None);
    }

    #[test]
    fn trapezoidal_charge() {
        // Constant 0.1 A over 4 s is 0.4 C; the ramp adds the triangle.
        let q = calculate_charge(&ca_table()).unwrap();
        assert_relative_eq!(q, 1.2, epsilon = 1e-12);
    }

    #[test]
    fn charge_needs_two_rows() {
        let table = DataTable::from_columns([
            ("time_s".to_string(), vec![0.0]),
            ("current_A".to_string(), vec![0.5]),
        ])
        .unwrap();
        assert_eq!(calculate_charge(&table), None);
    }

    #[test]
    fn overpotential_picks_nearest_current() {
        let eta = overpotential_at_current(&ca_table(), 0.31, 0.0).unwrap();
        assert_relative_eq!(eta, 1.2, epsilon = 1e-12);
        let eta = overpotential_at_current(&ca_table(), 0.31, 1.0).unwrap();
        assert_relative_eq!(eta, 0.2, epsilon = 1e-12);
    }
}
