//! # Scan Normalization, Averaging and Derivatives
//!
//! The per-scan pipeline: read `(energy, μ)` through the scan store,
//! optionally shift the energy axis for calibration (capturing the
//! pre-shift E0), run the pre-edge provider, and report everything a
//! reviewer needs. Dataset averaging normalizes every scan marked good
//! with its stored parameters and reports per-bin mean and sample
//! standard deviation; the retained individual curves feed the
//! leave-one-out contribution analysis that flags noisy scans.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::xas::preedge::{PreEdgeParams, PreEdgeProvider};
use crate::xas::store::{read_scan_data, BeamlineConfig, ScanStore};
use crate::xas::XasError;

/// Review status of a scan. Only good scans enter an average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    /// Not yet reviewed
    #[default]
    Unreviewed,
    /// Accepted for averaging
    Good,
    /// Excluded from averaging
    Ignore,
}

/// Parameters for normalizing one scan.
#[derive(Debug, Clone)]
pub struct NormalizationRequest<'a> {
    /// Scan id
    pub scan: &'a str,
    /// Numerator channel (logical beamline name)
    pub numerator: &'a str,
    /// Optional denominator channel
    pub denominator: Option<&'a str>,
    /// Pre-/post-edge windows; absent fields auto-select
    pub windows: PreEdgeParams,
    /// Energy mask lower bound (keV)
    pub energy_min: Option<f64>,
    /// Energy mask upper bound (keV)
    pub energy_max: Option<f64>,
    /// Calibration shift added to the energy axis (eV)
    pub energy_shift: Option<f64>,
}

/// Result of normalizing a single scan.
#[derive(Debug, Clone)]
pub struct NormalizedScan {
    /// Energy in eV (after any alignment shift)
    pub energy: Array1<f64>,
    /// Raw absorption
    pub mu: Array1<f64>,
    /// Normalized absorption
    pub norm: Array1<f64>,
    /// Pre-edge baseline over the full range
    pub pre_edge_line: Array1<f64>,
    /// Post-edge polynomial over the full range
    pub post_edge_line: Array1<f64>,
    /// Edge energy (eV)
    pub e0: f64,
    /// Edge step height
    pub edge_step: f64,
    /// Pre-edge window start actually used (relative to E0)
    pub pre1: f64,
    /// Pre-edge window end actually used
    pub pre2: f64,
    /// Post-edge window start actually used
    pub norm1: f64,
    /// Post-edge window end actually used
    pub norm2: f64,
    /// Whether an alignment shift was applied
    pub aligned: bool,
    /// The shift that was applied (eV; 0 when unaligned)
    pub energy_shift_applied: f64,
    /// E0 found before the shift, when aligned
    pub e0_before_alignment: Option<f64>,
}

/// Normalize one scan with optional energy alignment.
///
/// When a nonzero `energy_shift` is given, a preliminary pre-edge pass on
/// the unshifted axis captures `e0_before_alignment`, then the shift is
/// added and the final pass runs on the shifted axis.
pub fn normalize_single_scan(
    store: &dyn ScanStore,
    beamline: &BeamlineConfig,
    provider: &dyn PreEdgeProvider,
    req: &NormalizationRequest<'_>,
) -> Result<NormalizedScan, XasError> {
    let (mut energy, mu) = read_scan_data(
        store,
        beamline,
        req.scan,
        req.numerator,
        req.denominator,
        req.energy_min,
        req.energy_max,
    )?;

    let shift = req.energy_shift.unwrap_or(0.0);
    let aligned = shift != 0.0;
    let mut e0_before_alignment = None;
    if aligned {
        let preliminary = provider.pre_edge(&energy, &mu, &req.windows)?;
        e0_before_alignment = Some(preliminary.e0);
        energy += shift;
    }

    let report = provider.pre_edge(&energy, &mu, &req.windows)?;
    Ok(NormalizedScan {
        energy,
        mu,
        norm: report.norm,
        pre_edge_line: report.pre_edge_line,
        post_edge_line: report.post_edge_line,
        e0: report.e0,
        edge_step: report.edge_step,
        pre1: report.pre1,
        pre2: report.pre2,
        norm1: report.norm1,
        norm2: report.norm2,
        aligned,
        energy_shift_applied: shift,
        e0_before_alignment,
    })
}

/// Stored per-scan normalization parameters, as kept in the project DB.
#[derive(Debug, Clone, Default)]
pub struct ScanParams {
    /// Windows relative to E0
    pub windows: PreEdgeParams,
    /// Calibration shift (eV)
    pub energy_shift: f64,
    /// Review status
    pub status: ScanStatus,
}

/// Result of averaging the good scans of a dataset.
#[derive(Debug, Clone)]
pub struct AveragedData {
    /// Energy grid (from the first kept scan)
    pub energy: Array1<f64>,
    /// Per-bin mean of the normalized curves
    pub norm: Array1<f64>,
    /// Per-bin standard deviation (zero vector when n = 1)
    pub std: Array1<f64>,
    /// Mean edge energy across kept scans
    pub e0: f64,
    /// Number of scans averaged
    pub n_scans: usize,
    /// Scan ids in averaging order
    pub scan_list: Vec<String>,
    /// The individual normalized curves, for quality analysis
    pub individual_norms: Vec<Array1<f64>>,
}

/// One scan's effect on the average's noise.
#[derive(Debug, Clone, Serialize)]
pub struct ScanContribution {
    /// Scan id
    pub scan_key: String,
    /// Mean per-bin σ of the average rebuilt without this scan
    pub mean_std_without: f64,
    /// `mean_std − mean_std_without`; positive means removing the scan
    /// reduces noise
    pub improvement: f64,
}

impl AveragedData {
    /// Arithmetic mean of the per-bin standard deviation.
    pub fn mean_std(&self) -> f64 {
        if self.std.is_empty() {
            return 0.0;
        }
        self.std.sum() / self.std.len() as f64
    }

    /// Leave-one-out contribution of every kept scan. Empty when fewer
    /// than two curves were retained.
    pub fn contribution_analysis(&self) -> Vec<ScanContribution> {
        if self.individual_norms.len() < 2 {
            return Vec::new();
        }
        let baseline = self.mean_std();
        self.scan_list
            .iter()
            .enumerate()
            .map(|(skip, scan_key)| {
                let rest: Vec<&Array1<f64>> = self
                    .individual_norms
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != skip)
                    .map(|(_, curve)| curve)
                    .collect();
                let mean_std_without = mean_of(&per_bin_std(&rest));
                ScanContribution {
                    scan_key: scan_key.clone(),
                    mean_std_without,
                    improvement: baseline - mean_std_without,
                }
            })
            .collect()
    }
}

/// Average all scans marked good, normalizing each with its stored
/// parameters. Scans that fail to normalize are skipped with a warning;
/// `None` when nothing could be averaged.
///
/// All kept scans are assumed to share the first scan's energy grid
/// (grid policy is the caller's responsibility).
#[allow(clippy::too_many_arguments)]
pub fn average_scans(
    store: &dyn ScanStore,
    beamline: &BeamlineConfig,
    provider: &dyn PreEdgeProvider,
    scan_params: &[(String, ScanParams)],
    numerator: &str,
    denominator: Option<&str>,
    energy_min: Option<f64>,
    energy_max: Option<f64>,
) -> Result<Option<AveragedData>, XasError> {
    let good: Vec<&(String, ScanParams)> =
        scan_params.iter().filter(|(_, p)| p.status == ScanStatus::Good).collect();
    if good.is_empty() {
        return Ok(None);
    }

    let mut scan_list = Vec::new();
    let mut norms = Vec::new();
    let mut energies = Vec::new();
    let mut e0_sum = 0.0;
    for (scan, params) in good {
        let req = NormalizationRequest {
            scan,
            numerator,
            denominator,
            windows: params.windows,
            energy_min,
            energy_max,
            energy_shift: (params.energy_shift != 0.0).then_some(params.energy_shift),
        };
        match normalize_single_scan(store, beamline, provider, &req) {
            Ok(result) => {
                scan_list.push(scan.clone());
                e0_sum += result.e0;
                energies.push(result.energy);
                norms.push(result.norm);
            }
            Err(err) => {
                log::warn!("failed to normalize scan {scan}: {err}");
            }
        }
    }
    if norms.is_empty() {
        return Ok(None);
    }

    let energy = energies.swap_remove(0);
    let n_bins = energy.len();
    let n_scans = norms.len();

    let mut mean = Array1::zeros(n_bins);
    for norm in &norms {
        mean += norm;
    }
    mean /= n_scans as f64;

    let refs: Vec<&Array1<f64>> = norms.iter().collect();
    let std = if n_scans > 1 { per_bin_std(&refs) } else { Array1::zeros(n_bins) };

    Ok(Some(AveragedData {
        energy,
        norm: mean,
        std,
        e0: e0_sum / n_scans as f64,
        n_scans,
        scan_list,
        individual_norms: norms,
    }))
}

/// Per-bin population standard deviation over a set of equally long
/// curves (matching `np.std(..., axis=0)`).
fn per_bin_std(curves: &[&Array1<f64>]) -> Array1<f64> {
    let n = curves.len();
    let Some(first) = curves.first() else {
        return Array1::zeros(0);
    };
    let bins = first.len();
    let mut std = Array1::zeros(bins);
    for bin in 0..bins {
        let mean = curves.iter().map(|c| c[bin]).sum::<f64>() / n as f64;
        let var = curves.iter().map(|c| (c[bin] - mean).powi(2)).sum::<f64>() / n as f64;
        std[bin] = var.sqrt();
    }
    std
}

fn mean_of(values: &Array1<f64>) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.sum() / values.len() as f64
    }
}

/// Numerical derivative of `data` with respect to `energy`.
///
/// The grid step is taken as the mean of `diff(energy)`; interior points
/// use central differences and the boundaries one-sided differences.
/// `order` 2 applies the operation twice. A `smoothing_window` greater
/// than one applies a same-length boxcar moving average to the final
/// array.
pub fn calculate_derivative(
    energy: &Array1<f64>,
    data: &Array1<f64>,
    order: u8,
    smoothing_window: usize,
) -> Result<Array1<f64>, XasError> {
    if !(1..=2).contains(&order) {
        return Err(XasError::EvalError("derivative order must be 1 or 2".to_string()));
    }
    if energy.len() != data.len() || energy.len() < 2 {
        return Err(XasError::EvalError(
            "derivative needs at least two equally sized arrays".to_string(),
        ));
    }

    let de = (energy[energy.len() - 1] - energy[0]) / (energy.len() - 1) as f64;
    if de.abs() < f64::EPSILON {
        return Err(XasError::EvalError("degenerate energy grid".to_string()));
    }

    let mut deriv = gradient(data, de);
    if order == 2 {
        deriv = gradient(&deriv, de);
    }
    if smoothing_window > 1 {
        deriv = boxcar_same(&deriv, smoothing_window);
    }
    Ok(deriv)
}

fn gradient(data: &Array1<f64>, de: f64) -> Array1<f64> {
    let n = data.len();
    let mut out = Array1::zeros(n);
    out[0] = (data[1] - data[0]) / de;
    out[n - 1] = (data[n - 1] - data[n - 2]) / de;
    for i in 1..n - 1 {
        out[i] = (data[i + 1] - data[i - 1]) / (2.0 * de);
    }
    out
}

/// `np.convolve(data, ones(w)/w, mode="same")`.
fn boxcar_same(data: &Array1<f64>, window: usize) -> Array1<f64> {
    let n = data.len();
    let w = window.min(n.max(1));
    let weight = 1.0 / window as f64;
    let offset = (w - 1) / 2;
    let mut out = Array1::zeros(n);
    for i in 0..n {
        let center = i + offset;
        let mut acc = 0.0;
        for k in 0..w {
            if let Some(j) = center.checked_sub(k) {
                if j < n {
                    acc += data[j] * weight;
                }
            }
        }
        out[i] = acc;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xas::preedge::LarchStylePreEdge;
    use crate::xas::store::MemoryScanStore;
    use approx::assert_relative_eq;

    /// Synthetic edge plus a ripple the pre-edge line cannot absorb, so
    /// noisy scans stay noisy after normalization.
    fn edge_mu(energy_kev: f64, e0_ev: f64, ripple: f64) -> f64 {
        let e = energy_kev * 1000.0;
        0.1 + 0.5 * (1.0 + ((e - e0_ev) / 5.0).tanh()) + ripple * ((e - 7000.0) / 7.0).sin()
    }

    /// Store with three scans on a shared grid; scan 1.3 carries a large
    /// ripple ruining the average.
    fn store() -> MemoryScanStore {
        let mut store = MemoryScanStore::new();
        let grid: Vec<f64> = (0..400).map(|i| 6.9 + i as f64 * 0.001).collect();
        for (scan, ripple) in [("1.1", 0.0), ("1.2", 0.002), ("1.3", 0.08)] {
            let mu: Vec<f64> = grid.iter().map(|e| edge_mu(*e, 7120.0, ripple)).collect();
            store.insert(scan, "instrument", "energy_enc", grid.clone());
            store.insert(scan, "instrument", "mu_roi", mu);
        }
        store
    }

    fn request(scan: &str) -> NormalizationRequest<'_> {
        NormalizationRequest {
            scan,
            numerator: "mu_roi",
            denominator: None,
            windows: PreEdgeParams::default(),
            energy_min: None,
            energy_max: None,
            energy_shift: None,
        }
    }

    #[test]
    fn normalization_reports_edge() {
        let store = store();
        let beamline = BeamlineConfig::bm23();
        let result =
            normalize_single_scan(&store, &beamline, &LarchStylePreEdge, &request("1.1")).unwrap();
        assert_relative_eq!(result.e0, 7120.0, epsilon = 3.0);
        assert!(!result.aligned);
        assert_eq!(result.energy_shift_applied, 0.0);
        assert!(result.e0_before_alignment.is_none());
        assert_eq!(result.energy.len(), result.norm.len());
    }

    #[test]
    fn alignment_shifts_energy_and_keeps_previous_e0() {
        let store = store();
        let beamline = BeamlineConfig::bm23();
        let mut req = request("1.1");
        req.energy_shift = Some(2.5);
        let result =
            normalize_single_scan(&store, &beamline, &LarchStylePreEdge, &req).unwrap();
        assert!(result.aligned);
        assert_relative_eq!(result.energy_shift_applied, 2.5);
        let before = result.e0_before_alignment.unwrap();
        assert_relative_eq!(result.e0, before + 2.5, epsilon = 1.1);
    }

    fn good(shift: f64) -> ScanParams {
        ScanParams { windows: PreEdgeParams::default(), energy_shift: shift, status: ScanStatus::Good }
    }

    #[test]
    fn averaging_uses_only_good_scans() {
        let store = store();
        let beamline = BeamlineConfig::bm23();
        let params = vec![
            ("1.1".to_string(), good(0.0)),
            ("1.2".to_string(), good(0.0)),
            ("1.3".to_string(), ScanParams { status: ScanStatus::Ignore, ..Default::default() }),
        ];
        let avg = average_scans(
            &store,
            &beamline,
            &LarchStylePreEdge,
            &params,
            "mu_roi",
            None,
            None,
            None,
        )
        .unwrap()
        .unwrap();
        assert_eq!(avg.n_scans, 2);
        assert_eq!(avg.scan_list, vec!["1.1", "1.2"]);
        assert_eq!(avg.individual_norms.len(), 2);
    }

    #[test]
    fn single_scan_average_has_zero_std() {
        let store = store();
        let beamline = BeamlineConfig::bm23();
        let params = vec![("1.1".to_string(), good(0.0))];
        let avg = average_scans(
            &store,
            &beamline,
            &LarchStylePreEdge,
            &params,
            "mu_roi",
            None,
            None,
            None,
        )
        .unwrap()
        .unwrap();
        assert_eq!(avg.n_scans, 1);
        assert!(avg.std.iter().all(|s| *s == 0.0));
        assert_eq!(avg.mean_std(), 0.0);
        assert!(avg.contribution_analysis().is_empty());
    }

    #[test]
    fn no_good_scans_yields_none() {
        let store = store();
        let beamline = BeamlineConfig::bm23();
        let params =
            vec![("1.1".to_string(), ScanParams { status: ScanStatus::Unreviewed, ..Default::default() })];
        let avg = average_scans(
            &store,
            &beamline,
            &LarchStylePreEdge,
            &params,
            "mu_roi",
            None,
            None,
            None,
        )
        .unwrap();
        assert!(avg.is_none());
    }

    #[test]
    fn contribution_flags_the_noisy_scan() {
        let store = store();
        let beamline = BeamlineConfig::bm23();
        let params = vec![
            ("1.1".to_string(), good(0.0)),
            ("1.2".to_string(), good(0.0)),
            ("1.3".to_string(), good(0.0)),
        ];
        let avg = average_scans(
            &store,
            &beamline,
            &LarchStylePreEdge,
            &params,
            "mu_roi",
            None,
            None,
            None,
        )
        .unwrap()
        .unwrap();

        let contributions = avg.contribution_analysis();
        assert_eq!(contributions.len(), 3);
        // Dropping the offset scan (1.3) improves the noise the most.
        let best = contributions
            .iter()
            .max_by(|a, b| a.improvement.total_cmp(&b.improvement))
            .unwrap();
        assert_eq!(best.scan_key, "1.3");
        assert!(best.improvement > 0.0);
    }

    #[test]
    fn derivative_of_linear_ramp_is_slope() {
        let energy = Array1::from_iter((0..100).map(|i| 7000.0 + i as f64 * 0.5));
        let mu = energy.mapv(|e| 3.0 * e + 7.0);
        let d1 = calculate_derivative(&energy, &mu, 1, 1).unwrap();
        for v in d1.iter() {
            assert_relative_eq!(*v, 3.0, epsilon = 1e-9);
        }
        let d2 = calculate_derivative(&energy, &mu, 2, 1).unwrap();
        for v in d2.iter() {
            assert_relative_eq!(*v, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn smoothing_preserves_constant_derivative() {
        let energy = Array1::from_iter((0..50).map(|i| i as f64));
        let mu = energy.mapv(|e| 2.0 * e);
        let smoothed = calculate_derivative(&energy, &mu, 1, 5).unwrap();
        // Interior bins see the full window of identical values.
        for v in smoothed.iter().skip(2).take(smoothed.len() - 4) {
            assert_relative_eq!(*v, 2.0, epsilon = 1e-9);
        }
        // Same-mode convolution tapers at the boundaries.
        assert!(smoothed[0] < 2.0);
    }

    #[test]
    fn invalid_order_rejected() {
        let energy = Array1::from_vec(vec![0.0, 1.0]);
        let mu = Array1::from_vec(vec![0.0, 1.0]);
        assert!(calculate_derivative(&energy, &mu, 3, 1).is_err());
        assert!(calculate_derivative(&energy, &mu, 0, 1).is_err());
    }
}
