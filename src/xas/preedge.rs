//! # Pre-edge Normalization Contract
//!
//! XANES normalization subtracts a linear pre-edge baseline and scales by
//! the edge step read off a post-edge polynomial. The algorithm itself is
//! pluggable through [`PreEdgeProvider`] so the pipeline stays agnostic of
//! the provider; [`LarchStylePreEdge`] is the built-in implementation and
//! preserves the observable outputs of the classic XAFS treatment: `e0`,
//! `edge_step`, `norm`, both fit lines, and the window bounds actually
//! used.
//!
//! Window parameters are energies relative to E0 (eV). Absent parameters
//! request auto-selection: pre `[-200, -30]` and norm `[150, emax − e0]`,
//! clamped to the observed range.

use nalgebra::{DMatrix, DVector};
use ndarray::Array1;

use crate::xas::XasError;

/// Normalization windows relative to E0, in eV. `None` requests
/// auto-selection.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PreEdgeParams {
    /// Pre-edge window start
    pub pre1: Option<f64>,
    /// Pre-edge window end
    pub pre2: Option<f64>,
    /// Post-edge window start
    pub norm1: Option<f64>,
    /// Post-edge window end
    pub norm2: Option<f64>,
}

/// Everything a pre-edge run reports.
#[derive(Debug, Clone)]
pub struct PreEdgeReport {
    /// Edge energy (eV), located at the absorption derivative maximum
    pub e0: f64,
    /// Edge step height, `post(e0) − pre(e0)`
    pub edge_step: f64,
    /// Normalized absorption, `(μ − pre_line) / edge_step`
    pub norm: Array1<f64>,
    /// Pre-edge baseline evaluated over the full energy range
    pub pre_edge_line: Array1<f64>,
    /// Post-edge polynomial evaluated over the full energy range
    pub post_edge_line: Array1<f64>,
    /// Pre-edge window start actually used (relative to E0)
    pub pre1: f64,
    /// Pre-edge window end actually used
    pub pre2: f64,
    /// Post-edge window start actually used
    pub norm1: f64,
    /// Post-edge window end actually used
    pub norm2: f64,
}

/// The pre-edge normalization seam.
pub trait PreEdgeProvider: Send + Sync {
    /// Run pre-edge normalization on `(energy_eV, mu)`.
    fn pre_edge(
        &self,
        energy: &Array1<f64>,
        mu: &Array1<f64>,
        params: &PreEdgeParams,
    ) -> Result<PreEdgeReport, XasError>;
}

/// Built-in provider following the classic Larch treatment.
#[derive(Debug, Clone, Copy, Default)]
pub struct LarchStylePreEdge;

/// Auto window defaults relative to E0, in eV.
const AUTO_PRE1: f64 = -200.0;
const AUTO_PRE2: f64 = -30.0;
const AUTO_NORM1: f64 = 150.0;
/// Post-edge windows narrower than this fall back to a linear fit.
const QUADRATIC_MIN_SPAN_EV: f64 = 50.0;

impl PreEdgeProvider for LarchStylePreEdge {
    fn pre_edge(
        &self,
        energy: &Array1<f64>,
        mu: &Array1<f64>,
        params: &PreEdgeParams,
    ) -> Result<PreEdgeReport, XasError> {
        if energy.len() != mu.len() {
            return Err(XasError::Normalization(format!(
                "energy and mu lengths differ ({} vs {})",
                energy.len(),
                mu.len()
            )));
        }
        if energy.len() < 8 {
            return Err(XasError::Normalization(
                "too few points for pre-edge normalization".to_string(),
            ));
        }

        let e0 = find_e0(energy, mu)?;
        let emin = energy[0].min(energy[energy.len() - 1]);
        let emax = energy[0].max(energy[energy.len() - 1]);

        // Clamp requested (or default) windows to the observed range.
        let pre1 = params.pre1.unwrap_or(AUTO_PRE1).max(emin - e0);
        let mut pre2 = params.pre2.unwrap_or(AUTO_PRE2);
        if pre2 <= pre1 {
            pre2 = pre1 / 3.0;
        }
        let norm2 = params.norm2.unwrap_or(emax - e0).min(emax - e0);
        let mut norm1 = params.norm1.unwrap_or(AUTO_NORM1).min(norm2);
        if norm1 >= norm2 {
            norm1 = norm2 / 3.0;
        }

        // Fits are done in E − e0 for conditioning.
        let rel: Vec<f64> = energy.iter().map(|e| e - e0).collect();
        let pre_coeffs = fit_window(&rel, mu, pre1, pre2, 1)
            .ok_or_else(|| XasError::Normalization("pre-edge window holds no points".to_string()))?;

        let span = norm2 - norm1;
        let degree = if span < QUADRATIC_MIN_SPAN_EV { 1 } else { 2 };
        let post_coeffs = fit_window(&rel, mu, norm1, norm2, degree).ok_or_else(|| {
            XasError::Normalization("post-edge window holds no points".to_string())
        })?;

        let pre_edge_line = Array1::from_iter(rel.iter().map(|x| polyval(&pre_coeffs, *x)));
        let post_edge_line = Array1::from_iter(rel.iter().map(|x| polyval(&post_coeffs, *x)));

        let edge_step = polyval(&post_coeffs, 0.0) - polyval(&pre_coeffs, 0.0);
        if !edge_step.is_finite() || edge_step.abs() < f64::EPSILON {
            return Err(XasError::Normalization("vanishing edge step".to_string()));
        }

        let norm = Array1::from_iter(
            mu.iter().zip(pre_edge_line.iter()).map(|(m, p)| (m - p) / edge_step),
        );

        Ok(PreEdgeReport {
            e0,
            edge_step,
            norm,
            pre_edge_line,
            post_edge_line,
            pre1,
            pre2,
            norm1,
            norm2,
        })
    }
}

/// E0 = energy at the maximum of dμ/dE (central differences, one-sided at
/// the boundaries).
fn find_e0(energy: &Array1<f64>, mu: &Array1<f64>) -> Result<f64, XasError> {
    let n = energy.len();
    let mut best = (0usize, f64::NEG_INFINITY);
    for i in 0..n {
        let (lo, hi) = if i == 0 {
            (0, 1)
        } else if i == n - 1 {
            (n - 2, n - 1)
        } else {
            (i - 1, i + 1)
        };
        let de = energy[hi] - energy[lo];
        if de.abs() < f64::EPSILON {
            continue;
        }
        let d = (mu[hi] - mu[lo]) / de;
        if d > best.1 {
            best = (i, d);
        }
    }
    if best.1.is_finite() {
        Ok(energy[best.0])
    } else {
        Err(XasError::Normalization("could not locate the absorption edge".to_string()))
    }
}

/// Least-squares polynomial fit over the points with `lo ≤ x ≤ hi`;
/// coefficients lowest order first. `None` when the window has too few
/// points for the degree.
fn fit_window(
    x: &[f64],
    y: &Array1<f64>,
    lo: f64,
    hi: f64,
    degree: usize,
) -> Option<Vec<f64>> {
    let points: Vec<(f64, f64)> = x
        .iter()
        .zip(y.iter())
        .filter(|(xi, _)| **xi >= lo && **xi <= hi)
        .map(|(xi, yi)| (*xi, *yi))
        .collect();
    if points.len() < degree + 1 {
        return None;
    }
    polyfit(&points, degree)
}

fn polyfit(points: &[(f64, f64)], degree: usize) -> Option<Vec<f64>> {
    let design = DMatrix::from_fn(points.len(), degree + 1, |r, c| points[r].0.powi(c as i32));
    let rhs = DVector::from_iterator(points.len(), points.iter().map(|(_, y)| *y));
    let svd = design.svd(true, true);
    svd.solve(&rhs, 1e-12).ok().map(|solution| solution.iter().copied().collect())
}

fn polyval(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c)
}
