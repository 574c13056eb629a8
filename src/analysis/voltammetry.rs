//! Sweep voltammetry kernels (LSV/CV): onset potential, limiting current
//! and current extraction at a target potential.

use crate::analysis::chronometry::nearest_index;
use crate::schema::columns;
use crate::table::DataTable;

/// Potential at the first row where `|current| > |threshold|`.
pub fn onset_potential(table: &DataTable, threshold_current_a: f64) -> Option<f64> {
    let potential = table.column(columns::POTENTIAL_V)?;
    let current = table.column(columns::CURRENT_A)?;
    let threshold = threshold_current_a.abs();
    current
        .iter()
        .position(|i| i.abs() > threshold)
        .map(|idx| potential[idx])
}

/// Plateau current: mean of the last `max(1, ⌊N·window_frac⌋)` samples.
pub fn limiting_current(table: &DataTable, window_frac: f64) -> Option<f64> {
    let current = table.column(columns::CURRENT_A)?;
    if current.is_empty() {
        return None;
    }
    let n_points = ((current.len() as f64 * window_frac) as usize).max(1);
    let tail = &current[current.len() - n_points.min(current.len())..];
    Some(tail.iter().sum::<f64>() / tail.len() as f64)
}

/// Current at the row whose potential is nearest `potential_v`; `None`
/// when the target lies outside the observed potential range.
pub fn current_at_potential(table: &DataTable, potential_v: f64) -> Option<f64> {
    let potential = table.column(columns::POTENTIAL_V)?;
    let current = table.column(columns::CURRENT_A)?;
    if potential.is_empty() {
        return None;
    }

    let min = potential.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = potential.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if potential_v < min || potential_v > max {
        return None;
    }

    nearest_index(potential, potential_v).map(|idx| current[idx])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn lsv_table() -> DataTable {
        DataTable::from_columns([
            ("potential_V".to_string(), vec![0.0, 0.1, 0.2, 0.3, 0.4]),
            ("current_A".to_string(), vec![1e-6, 5e-6, 2e-4, 8e-4, 9e-4]),
        ])
        .unwrap()
    }

    #[test]
    fn onset_at_first_threshold_crossing() {
        let onset = onset_potential(&lsv_table(), 1e-4).unwrap();
        assert_relative_eq!(onset, 0.2);
        // Cathodic currents count through the absolute value.
        let onset = onset_potential(&lsv_table(), -1e-4).unwrap();
        assert_relative_eq!(onset, 0.2);
        assert_eq!(onset_potential(&lsv_table(), 1.0), None);
    }

    #[test]
    fn limiting_current_tail_mean() {
        // 10% of 5 points floors to 0, clamped to 1 point.
        let lim = limiting_current(&lsv_table(), 0.1).unwrap();
        assert_relative_eq!(lim, 9e-4);
        let lim = limiting_current(&lsv_table(), 0.4).unwrap();
        assert_relative_eq!(lim, (8e-4 + 9e-4) / 2.0);
    }

    #[test]
    fn current_at_potential_range_checked() {
        let i = current_at_potential(&lsv_table(), 0.21).unwrap();
        assert_relative_eq!(i, 2e-4);
        assert_eq!(current_at_potential(&lsv_table(), 0.5), None);
        assert_eq!(current_at_potential(&lsv_table(), -0.1), None);
    }
}
