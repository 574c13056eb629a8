//! Open-circuit kernels: the steady-state (equilibrium) potential read
//! off the final seconds of an OCV/OCP trace.

use crate::schema::columns;
use crate::table::DataTable;

/// Mean potential over the final `window_s` seconds of the trace.
pub fn steady_state_potential(table: &DataTable, window_s: f64) -> Option<f64> {
    let time = table.column(columns::TIME_S)?;
    let potential = table.column(columns::POTENTIAL_V)?;
    let t_max = time.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !t_max.is_finite() {
        return None;
    }

    let t_start = t_max - window_s;
    let mut sum = 0.0;
    let mut count = 0usize;
    for (t, v) in time.iter().zip(potential) {
        if *t >= t_start {
            sum += v;
            count += 1;
        }
    }
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn averages_final_window() {
        let table = DataTable::from_columns([
            ("time_s".to_string(), vec![0.0, 10.0, 20.0, 30.0]),
            ("potential_V".to_string(), vec![0.9, 1.0, 1.1, 1.2]),
        ])
        .unwrap();
        // Final 10 s covers t = 20 and t = 30.
        let v = steady_state_potential(&table, 10.0).unwrap();
        assert_relative_eq!(v, 1.15, epsilon = 1e-12);
    }

    #[test]
    fn missing_columns_yield_none() {
        let table = DataTable::from_columns([("time_s".to_string(), vec![0.0])]).unwrap();
        assert_eq!(steady_state_potential(&table, 5.0), None);
    }
}
