//! Nyquist intercepts for impedance spectra.
//!
//! On a Nyquist plot (`-Im(Z)` vs `Re(Z)`), the high-frequency x-axis
//! crossing is the solution resistance R_s and the low-frequency crossing
//! the total resistance R_total. Both are found by scanning consecutive
//! point pairs for a strict sign change of `-Im(Z)` and interpolating the
//! zero linearly; when the curve never crosses, the point closest to the
//! axis is accepted only if it is within 1 Ω of zero.

use crate::schema::columns;
use crate::table::DataTable;

/// How close to the axis the nearest point must be for the no-crossing
/// fallback, in ohms.
const FALLBACK_TOLERANCE_OHM: f64 = 1.0;

/// High-frequency x-intercept of the Nyquist curve (solution resistance).
///
/// Points are scanned in ascending `z_real_Ohm` order, so the first sign
/// change found is the high-frequency end. The result is invariant under
/// row permutations of the input.
pub fn find_hf_intercept(table: &DataTable) -> Option<f64> {
    intercept(table, false)
}

/// Low-frequency x-intercept of the Nyquist curve (total resistance).
///
/// Identical scan with the order reversed (descending `z_real_Ohm`).
pub fn find_lf_intercept(table: &DataTable) -> Option<f64> {
    intercept(table, true)
}

fn intercept(table: &DataTable, descending: bool) -> Option<f64> {
    let re_z = table.column(columns::Z_REAL_OHM)?;
    let im_z = table.column(columns::Z_IMAG_OHM)?;
    if re_z.is_empty() {
        return None;
    }

    let mut order: Vec<usize> = (0..re_z.len()).collect();
    order.sort_by(|a, b| re_z[*a].total_cmp(&re_z[*b]));
    if descending {
        order.reverse();
    }

    let x: Vec<f64> = order.iter().map(|&i| re_z[i]).collect();
    let y: Vec<f64> = order.iter().map(|&i| -im_z[i]).collect();

    for i in 0..y.len().saturating_sub(1) {
        if y[i] * y[i + 1] < 0.0 {
            let t = -y[i] / (y[i + 1] - y[i]);
            return Some(x[i] + t * (x[i + 1] - x[i]));
        }
    }

    // No crossing: accept the point nearest the axis if close enough.
    let (min_idx, min_abs) = y
        .iter()
        .enumerate()
        .map(|(i, v)| (i, v.abs()))
        .min_by(|a, b| a.1.total_cmp(&b.1))?;
    (min_abs < FALLBACK_TOLERANCE_OHM).then(|| x[min_idx])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn nyquist(points: &[(f64, f64)]) -> DataTable {
        DataTable::from_columns([
            ("z_real_Ohm".to_string(), points.iter().map(|p| p.0).collect()),
            ("z_imag_Ohm".to_string(), points.iter().map(|p| p.1).collect()),
        ])
        .unwrap()
    }

    #[test]
    fn hf_intercept_interpolates_crossing() {
        // y = [2, 1, -0.5, -1.5]; crossing between x=6 and x=7 at t=2/3.
        let table = nyquist(&[(5.0, -2.0), (6.0, -1.0), (7.0, 0.5), (8.0, 1.5)]);
        let r = find_hf_intercept(&table).unwrap();
        assert_relative_eq!(r, 6.0 + 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn hf_intercept_is_permutation_invariant() {
        let table = nyquist(&[(8.0, 1.5), (5.0, -2.0), (7.0, 0.5), (6.0, -1.0)]);
        let r = find_hf_intercept(&table).unwrap();
        assert_relative_eq!(r, 6.0 + 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn lf_intercept_scans_from_large_re() {
        // Semicircle-ish: crossings near both ends.
        let table = nyquist(&[
            (5.0, -0.5),
            (6.0, 1.0),
            (8.0, 1.0),
            (9.0, -0.5),
        ]);
        let hf = find_hf_intercept(&table).unwrap();
        let lf = find_lf_intercept(&table).unwrap();
        assert!(hf < 6.0);
        assert!(lf > 8.0);
    }

    #[test]
    fn fallback_requires_near_zero() {
        // No sign change, closest |y| is 0.4 → accepted.
        let close = nyquist(&[(5.0, -0.4), (6.0, -1.0)]);
        assert_relative_eq!(find_hf_intercept(&close).unwrap(), 5.0);
        // Closest |y| is 3.0 → rejected.
        let far = nyquist(&[(5.0, -3.0), (6.0, -4.0)]);
        assert_eq!(find_hf_intercept(&far), None);
    }

    #[test]
    fn missing_columns_yield_none() {
        let table = DataTable::from_columns([("z_real_Ohm".to_string(), vec![1.0])]).unwrap();
        assert_eq!(find_hf_intercept(&table), None);
        assert_eq!(find_lf_intercept(&table), None);
    }
}
