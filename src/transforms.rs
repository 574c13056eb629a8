//! # Dataset Transforms
//!
//! All transforms are non-destructive: they return a new dataset with an
//! added canonical column (or fewer rows, for the filters) and never
//! overwrite input columns. Derived column names follow the registry in
//! [`crate::schema`].

use crate::dataset::EchemDataset;
use crate::schema::{columns, reference_potential};
use crate::table::TableError;

/// Errors raised by transform parameters.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// Reference electrode not in the closed table
    #[error("Unknown reference electrode: {0}")]
    UnknownReference(String),

    /// A required canonical column is missing
    #[error("Missing column: {0}")]
    MissingColumn(String),

    /// Divisor must be positive
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Column assembly failed
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Convert the potential column to a different reference electrode.
///
/// Adds `potential_vs_<to>_V`, offset by
/// `E(from vs SHE) − E(to vs SHE)`; the source column is untouched.
pub fn convert_reference(
    dataset: &EchemDataset,
    from_ref: &str,
    to_ref: &str,
    column: &str,
) -> Result<EchemDataset, TransformError> {
    let from = reference_potential(from_ref)
        .ok_or_else(|| TransformError::UnknownReference(from_ref.to_string()))?;
    let to = reference_potential(to_ref)
        .ok_or_else(|| TransformError::UnknownReference(to_ref.to_string()))?;
    let offset = from - to;

    let new_col = format!("potential_vs_{}_V", sanitize_reference(to_ref));
    derive_column(dataset, column, &new_col, |v| v + offset)
}

/// Correct the potential for uncompensated solution resistance.
///
/// Adds `potential_ir_corrected_V = potential_V − current_A · R`.
pub fn ir_compensate(
    dataset: &EchemDataset,
    resistance_ohm: f64,
) -> Result<EchemDataset, TransformError> {
    let current = dataset
        .table
        .column(columns::CURRENT_A)
        .ok_or_else(|| TransformError::MissingColumn(columns::CURRENT_A.to_string()))?
        .to_vec();
    let potential = dataset
        .table
        .column(columns::POTENTIAL_V)
        .ok_or_else(|| TransformError::MissingColumn(columns::POTENTIAL_V.to_string()))?;

    let corrected: Vec<f64> = potential
        .iter()
        .zip(&current)
        .map(|(v, i)| v - i * resistance_ohm)
        .collect();

    let mut table = dataset.table.clone();
    table.push_column(columns::POTENTIAL_IR_CORRECTED_V.to_string(), corrected)?;
    Ok(dataset.with_table(table))
}

/// Normalize current by electrode area; adds `current_density_A_cm2`.
pub fn normalize_by_area(
    dataset: &EchemDataset,
    area_cm2: f64,
) -> Result<EchemDataset, TransformError> {
    if area_cm2 <= 0.0 {
        return Err(TransformError::InvalidParameter("area must be positive".to_string()));
    }
    derive_column(dataset, columns::CURRENT_A, columns::CURRENT_DENSITY_A_CM2, |i| i / area_cm2)
}

/// Normalize current by active-material mass; adds `current_A_g`.
pub fn normalize_by_mass(
    dataset: &EchemDataset,
    mass_g: f64,
) -> Result<EchemDataset, TransformError> {
    if mass_g <= 0.0 {
        return Err(TransformError::InvalidParameter("mass must be positive".to_string()));
    }
    derive_column(dataset, columns::CURRENT_A, columns::CURRENT_A_G, |i| i / mass_g)
}

/// Restrict the dataset to a single cycle. No-op when the cycle column is
/// absent; the original dataset is never modified.
pub fn filter_by_cycle(dataset: &EchemDataset, cycle: i64) -> EchemDataset {
    dataset.with_table(dataset.table.filter_by_cycle(cycle))
}

/// Thin the dataset to at most `max_points` rows by taking every
/// ⌈N/max_points⌉-th row. Identity when the table already fits.
pub fn downsample(dataset: &EchemDataset, max_points: usize) -> EchemDataset {
    let n = dataset.table.n_rows();
    if max_points == 0 || n <= max_points {
        return dataset.clone();
    }
    let step = n.div_ceil(max_points);
    dataset.with_table(dataset.table.gather_every(step))
}

fn derive_column(
    dataset: &EchemDataset,
    source: &str,
    target: &str,
    f: impl Fn(f64) -> f64,
) -> Result<EchemDataset, TransformError> {
    let values = dataset
        .table
        .column(source)
        .ok_or_else(|| TransformError::MissingColumn(source.to_string()))?;
    let derived: Vec<f64> = values.iter().map(|v| f(*v)).collect();

    let mut table = dataset.table.clone();
    table.push_column(target.to_string(), derived)?;
    Ok(dataset.with_table(table))
}

/// Reference names become column-name-safe by dropping parens and
/// replacing spaces and slashes.
fn sanitize_reference(name: &str) -> String {
    name.replace(['(', ')'], "").replace([' ', '/'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::EchemDataset;
    use crate::table::DataTable;
    use approx::assert_relative_eq;

    fn dataset() -> EchemDataset {
        let table = DataTable::from_columns([
            ("potential_V".to_string(), vec![1.0, 1.2]),
            ("current_A".to_string(), vec![0.01, 0.02]),
        ])
        .unwrap();
        EchemDataset::new("t.mpr", table)
    }

    #[test]
    fn ir_compensation_adds_column() {
        let ds = ir_compensate(&dataset(), 10.0).unwrap();
        let corrected = ds.table.column("potential_ir_corrected_V").unwrap();
        assert_relative_eq!(corrected[0], 0.9, epsilon = 1e-12);
        assert_relative_eq!(corrected[1], 1.0, epsilon = 1e-12);
        // Inputs unchanged.
        assert_eq!(ds.table.column("potential_V").unwrap(), &[1.0, 1.2]);
    }

    #[test]
    fn reference_conversion_round_trips() {
        let ds = convert_reference(&dataset(), "Ag/AgCl (sat. KCl)", "SHE", "potential_V").unwrap();
        let col = ds.table.column("potential_vs_SHE_V").unwrap();
        assert_relative_eq!(col[0], 1.197, epsilon = 1e-12);

        // Applying the inverse offset to the derived column restores the
        // original potentials.
        let back =
            convert_reference(&ds, "SHE", "Ag/AgCl (sat. KCl)", "potential_vs_SHE_V").unwrap();
        let restored = back.table.column("potential_vs_Ag_AgCl_sat._KCl_V").unwrap();
        assert_relative_eq!(restored[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(restored[1], 1.2, epsilon = 1e-12);
    }

    #[test]
    fn unknown_reference_rejected() {
        let err = convert_reference(&dataset(), "SHE", "Banana", "potential_V").unwrap_err();
        assert!(matches!(err, TransformError::UnknownReference(_)));
    }

    #[test]
    fn area_and_mass_normalization() {
        let ds = normalize_by_area(&dataset(), 2.0).unwrap();
        assert_relative_eq!(ds.table.column("current_density_A_cm2").unwrap()[1], 0.01);
        let ds = normalize_by_mass(&ds, 0.5).unwrap();
        assert_relative_eq!(ds.table.column("current_A_g").unwrap()[0], 0.02);
        assert!(matches!(
            normalize_by_area(&dataset(), 0.0),
            Err(TransformError::InvalidParameter(_))
        ));
    }

    #[test]
    fn downsample_identity_when_small() {
        let ds = dataset();
        let thin = downsample(&ds, 10);
        assert_eq!(thin.table.n_rows(), 2);
        let thin = downsample(&ds, 1);
        assert_eq!(thin.table.n_rows(), 1);
    }
}
