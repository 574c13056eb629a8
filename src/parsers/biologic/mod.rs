//! # BioLogic `.mpr` Parser
//!
//! EC-Lab writes measurements as a modular binary container. The
//! [`mpr`] submodule decodes the container into a raw column dictionary;
//! this module maps those columns onto the canonical registry, rescales
//! units (`<I>/mA` → `current_A`), and derives technique, label and cycle
//! list from the filename and the `cycle number` column.

use std::path::Path;

use crate::dataset::{EchemDataset, SourceFormat};
use crate::parsers::{standardize_columns, ParseError};
use crate::schema::{label_from_filename, technique_from_filename, BIOLOGIC_COLUMN_MAP};

pub mod mpr;

/// Read a BioLogic `.mpr` file into a canonical dataset.
pub fn read_mpr_file(path: &Path, filename: Option<&str>) -> Result<EchemDataset, ParseError> {
    let filename = filename
        .map(str::to_string)
        .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| path.display().to_string());

    let bytes = std::fs::read(path).map_err(|e| ParseError::io(&filename, e))?;
    let contents = mpr::decode(&bytes).map_err(|e| match e {
        mpr::MprError::NoDataModule => ParseError::MissingMarker {
            file: filename.clone(),
            detail: e.to_string(),
        },
        other => ParseError::InvalidFormat { file: filename.clone(), detail: other.to_string() },
    })?;

    if contents.columns.iter().all(|(_, v)| v.is_empty()) {
        return Err(ParseError::NoData {
            file: filename,
            detail: "data module holds zero rows".to_string(),
        });
    }

    let table = standardize_columns(contents.columns, BIOLOGIC_COLUMN_MAP, &filename)?;
    let technique = technique_from_filename(&filename);
    let label = label_from_filename(&filename);
    let cycles = table.cycles();

    Ok(EchemDataset {
        original_filename: Some(filename.clone()),
        filename,
        table,
        technique,
        label,
        timestamp: contents.timestamp,
        cycles,
        source_format: Some(SourceFormat::Biologic),
        file_hash: None,
        user_metadata: Default::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::parse_bytes;
    use crate::schema::Technique;

    #[test]
    fn milliamp_current_becomes_amperes() {
        // Column 11 is `<I>/mA`; canonical current is in amperes.
        let bytes =
            mpr::encode::build_mpr(&[(4, vec![0.0, 1.0, 2.0]), (11, vec![1.0, 2.0, 3.0])], "01/02/24");
        let ds = parse_bytes(&bytes, "CA_sample_01_CA.mpr").unwrap();
        assert_eq!(ds.technique, Some(Technique::CA));
        assert_eq!(ds.label, "CA_sample");
        assert_eq!(ds.table.column("current_A").unwrap(), &[0.001, 0.002, 0.003]);
        assert_eq!(ds.table.column("time_s").unwrap(), &[0.0, 1.0, 2.0]);
        assert_eq!(ds.source_format, Some(SourceFormat::Biologic));
        assert!(ds.timestamp.is_some());
    }

    #[test]
    fn cycle_column_yields_sorted_cycles() {
        let bytes = mpr::encode::build_mpr(
            &[(6, vec![0.1, 0.2, 0.3, 0.4]), (24, vec![2.0, 1.0, 2.0, 1.0])],
            "01/02/24",
        );
        let ds = parse_bytes(&bytes, "CV_loop.mpr").unwrap();
        assert_eq!(ds.cycles, vec![1, 2]);
        assert!(ds.table.has_column("cycle"));
    }

    #[test]
    fn eis_columns_map_with_source_sign() {
        let bytes = mpr::encode::build_mpr(
            &[
                (32, vec![1000.0, 10.0]),
                (37, vec![5.0, 30.0]),
                (38, vec![2.0, -1.0]),
            ],
            "01/02/24",
        );
        let ds = parse_bytes(&bytes, "PEIS_test.mpr").unwrap();
        assert_eq!(ds.technique, Some(Technique::PEIS));
        // -Im(Z)/Ohm is stored as-is under z_imag_Ohm; no sign flip.
        let z_imag = ds.table.column("z_imag_Ohm").unwrap();
        assert!((z_imag[0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn garbage_is_invalid_format() {
        let err = parse_bytes(b"garbage bytes", "x.mpr").unwrap_err();
        assert!(matches!(err, ParseError::InvalidFormat { .. }));
    }
}
