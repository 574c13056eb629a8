//! # Canonical Column Registry
//!
//! Every parsed measurement is normalized to a closed set of canonical
//! column names, each tied to a target SI unit. Parsers consult the
//! per-format lookup tables in this module to rename source columns and
//! rescale their values; everything downstream (analysis kernels,
//! transforms, the export container) speaks only canonical names.
//!
//! ## Canonical schema
//!
//! | Column | Unit | Description |
//! |--------|------|-------------|
//! | time_s | s | Elapsed time |
//! | potential_V | V | Working electrode potential |
//! | current_A | A | Current |
//! | z_real_Ohm | Ω | Real impedance |
//! | z_imag_Ohm | Ω | Imaginary impedance |
//! | z_mag_Ohm | Ω | Impedance magnitude |
//! | z_phase_deg | ° | Impedance phase |
//! | frequency_Hz | Hz | Frequency |
//! | cycle | (none) | Cycle index (integer-valued) |
//!
//! Transforms may append derived columns (`potential_ir_corrected_V`,
//! `potential_vs_<ref>_V`, `current_density_A_cm2`, `current_A_g`); these
//! never replace the originals.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Column names as constants for type safety
pub mod columns {
    /// Elapsed time in seconds
    pub const TIME_S: &str = "time_s";
    /// Working electrode potential in volts
    pub const POTENTIAL_V: &str = "potential_V";
    /// Current in amperes
    pub const CURRENT_A: &str = "current_A";
    /// Real impedance in ohms
    pub const Z_REAL_OHM: &str = "z_real_Ohm";
    /// Imaginary impedance in ohms (sign as presented by the source format)
    pub const Z_IMAG_OHM: &str = "z_imag_Ohm";
    /// Impedance magnitude in ohms
    pub const Z_MAG_OHM: &str = "z_mag_Ohm";
    /// Impedance phase in degrees
    pub const Z_PHASE_DEG: &str = "z_phase_deg";
    /// Frequency in hertz
    pub const FREQUENCY_HZ: &str = "frequency_Hz";
    /// Cycle index (dimensionless, integer-valued)
    pub const CYCLE: &str = "cycle";

    // Derived columns appended by transforms.
    /// iR-corrected potential in volts
    pub const POTENTIAL_IR_CORRECTED_V: &str = "potential_ir_corrected_V";
    /// Area-normalized current density in A/cm²
    pub const CURRENT_DENSITY_A_CM2: &str = "current_density_A_cm2";
    /// Mass-normalized current in A/g
    pub const CURRENT_A_G: &str = "current_A_g";
}

/// One entry of the canonical registry.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    /// Canonical column name
    pub name: &'static str,
    /// Target SI unit symbol (empty for dimensionless)
    pub unit: &'static str,
    /// Human-readable description
    pub description: &'static str,
}

/// The closed registry of canonical columns with their SI target units.
pub const STANDARD_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec { name: columns::TIME_S, unit: "s", description: "Elapsed time" },
    ColumnSpec { name: columns::POTENTIAL_V, unit: "V", description: "Working electrode potential" },
    ColumnSpec { name: columns::CURRENT_A, unit: "A", description: "Current" },
    ColumnSpec { name: columns::Z_REAL_OHM, unit: "Ohm", description: "Real impedance" },
    ColumnSpec { name: columns::Z_IMAG_OHM, unit: "Ohm", description: "Imaginary impedance" },
    ColumnSpec { name: columns::Z_MAG_OHM, unit: "Ohm", description: "Impedance magnitude" },
    ColumnSpec { name: columns::Z_PHASE_DEG, unit: "deg", description: "Impedance phase" },
    ColumnSpec { name: columns::FREQUENCY_HZ, unit: "Hz", description: "Frequency" },
    ColumnSpec { name: columns::CYCLE, unit: "", description: "Cycle index (dimensionless)" },
];

/// Look up the SI unit of a canonical column, if it is in the registry.
pub fn unit_of(name: &str) -> Option<&'static str> {
    STANDARD_COLUMNS.iter().find(|c| c.name == name).map(|c| c.unit)
}

/// A source-column mapping: canonical name plus the multiplicative factor
/// that converts source-unit values into the target SI unit.
#[derive(Debug, Clone, Copy)]
pub struct ColumnMapping {
    /// Source column name as it appears in the instrument file
    pub source: &'static str,
    /// Canonical name the column is renamed to
    pub canonical: &'static str,
    /// `source_unit / target_unit`; 1.0 when no conversion is needed
    pub factor: f64,
}

/// BioLogic source column → canonical mapping.
///
/// `<I>/mA` is the only rescaled column (mA → A).
pub const BIOLOGIC_COLUMN_MAP: &[ColumnMapping] = &[
    ColumnMapping { source: "time/s", canonical: columns::TIME_S, factor: 1.0 },
    ColumnMapping { source: "Ewe/V", canonical: columns::POTENTIAL_V, factor: 1.0 },
    ColumnMapping { source: "<I>/mA", canonical: columns::CURRENT_A, factor: 1e-3 },
    ColumnMapping { source: "Re(Z)/Ohm", canonical: columns::Z_REAL_OHM, factor: 1.0 },
    ColumnMapping { source: "-Im(Z)/Ohm", canonical: columns::Z_IMAG_OHM, factor: 1.0 },
    ColumnMapping { source: "|Z|/Ohm", canonical: columns::Z_MAG_OHM, factor: 1.0 },
    ColumnMapping { source: "Phase(Z)/deg", canonical: columns::Z_PHASE_DEG, factor: 1.0 },
    ColumnMapping { source: "freq/Hz", canonical: columns::FREQUENCY_HZ, factor: 1.0 },
    ColumnMapping { source: "cycle number", canonical: columns::CYCLE, factor: 1.0 },
];

/// Gamry source column → canonical mapping.
///
/// Gamry writes amperes directly; no current rescaling. Several source
/// spellings map to the same canonical target; the first occurrence in a
/// file wins and later duplicates are dropped.
pub const GAMRY_COLUMN_MAP: &[ColumnMapping] = &[
    ColumnMapping { source: "T", canonical: columns::TIME_S, factor: 1.0 },
    ColumnMapping { source: "Time", canonical: columns::TIME_S, factor: 1.0 },
    ColumnMapping { source: "Vf", canonical: columns::POTENTIAL_V, factor: 1.0 },
    ColumnMapping { source: "V", canonical: columns::POTENTIAL_V, factor: 1.0 },
    ColumnMapping { source: "E", canonical: columns::POTENTIAL_V, factor: 1.0 },
    ColumnMapping { source: "Im", canonical: columns::CURRENT_A, factor: 1.0 },
    ColumnMapping { source: "I", canonical: columns::CURRENT_A, factor: 1.0 },
    ColumnMapping { source: "Zreal", canonical: columns::Z_REAL_OHM, factor: 1.0 },
    ColumnMapping { source: "Zimag", canonical: columns::Z_IMAG_OHM, factor: 1.0 },
    ColumnMapping { source: "Zmod", canonical: columns::Z_MAG_OHM, factor: 1.0 },
    ColumnMapping { source: "Zphz", canonical: columns::Z_PHASE_DEG, factor: 1.0 },
    ColumnMapping { source: "Freq", canonical: columns::FREQUENCY_HZ, factor: 1.0 },
    ColumnMapping { source: "Cycle", canonical: columns::CYCLE, factor: 1.0 },
];

/// Look up a source column in a format map.
pub fn lookup_mapping(map: &'static [ColumnMapping], source: &str) -> Option<ColumnMapping> {
    map.iter().find(|m| m.source == source).copied()
}

/// Closed set of electrochemistry technique abbreviations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Technique {
    /// Cyclic voltammetry
    CV,
    /// Linear sweep voltammetry
    LSV,
    /// Chronoamperometry
    CA,
    /// Chronopotentiometry
    CP,
    /// Open circuit voltage
    OCV,
    /// Open circuit potential
    OCP,
    /// Potentiostatic impedance spectroscopy
    PEIS,
    /// Galvanostatic impedance spectroscopy
    GEIS,
    /// Impedance spectroscopy (unspecified control)
    EIS,
    /// Chronocoulometry / constant current
    CC,
    /// iR determination (PEIS-based)
    ZIR,
}

impl Technique {
    /// All known abbreviations, used by the filename heuristics.
    pub const ALL: &'static [Technique] = &[
        Technique::CA,
        Technique::CC,
        Technique::CP,
        Technique::CV,
        Technique::LSV,
        Technique::OCV,
        Technique::OCP,
        Technique::PEIS,
        Technique::GEIS,
        Technique::EIS,
        Technique::ZIR,
    ];

    /// The canonical abbreviation string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Technique::CV => "CV",
            Technique::LSV => "LSV",
            Technique::CA => "CA",
            Technique::CP => "CP",
            Technique::OCV => "OCV",
            Technique::OCP => "OCP",
            Technique::PEIS => "PEIS",
            Technique::GEIS => "GEIS",
            Technique::EIS => "EIS",
            Technique::CC => "CC",
            Technique::ZIR => "ZIR",
        }
    }

    /// Parse an abbreviation; `None` for anything outside the closed set.
    pub fn parse(s: &str) -> Option<Technique> {
        Technique::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    /// Default x/y plot columns for the technique.
    pub fn default_axes(&self) -> (&'static str, &'static str) {
        match self {
            Technique::CV | Technique::LSV => (columns::POTENTIAL_V, columns::CURRENT_A),
            Technique::CA => (columns::TIME_S, columns::CURRENT_A),
            Technique::CP | Technique::OCV | Technique::OCP | Technique::CC => {
                (columns::TIME_S, columns::POTENTIAL_V)
            }
            Technique::PEIS | Technique::GEIS | Technique::EIS | Technique::ZIR => {
                (columns::Z_REAL_OHM, columns::Z_IMAG_OHM)
            }
        }
    }
}

impl std::fmt::Display for Technique {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static TRAILING_CHANNEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"_C\d+$").expect("static regex"));
static MULTI_SCAN_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_(\d{2})_([A-Z]+)$").expect("static regex"));

/// Detect the technique from a measurement filename.
///
/// The stem (extension and trailing `_C<n>` channel suffix removed) is
/// matched in three passes: the multi-scan `_NN_ABBR` suffix, a leading
/// `ABBR_` (or the stem being exactly an abbreviation), and finally any
/// underscore-separated part that is a known abbreviation.
pub fn technique_from_filename(filename: &str) -> Option<Technique> {
    let base = filename_stem(filename);
    let base = TRAILING_CHANNEL.replace(&base, "");

    if let Some(caps) = MULTI_SCAN_SUFFIX.captures(&base) {
        if let Some(t) = caps.get(2).and_then(|m| Technique::parse(m.as_str())) {
            return Some(t);
        }
    }

    for t in Technique::ALL {
        if base.starts_with(&format!("{}_", t.as_str())) || base == t.as_str() {
            return Some(*t);
        }
    }

    base.split('_').find_map(Technique::parse)
}

/// Derive the user-facing label from a measurement filename by stripping
/// the extension, a trailing `_C<n>` channel suffix and a trailing
/// `_NN_ABBR` multi-scan suffix.
pub fn label_from_filename(filename: &str) -> String {
    let base = filename_stem(filename);
    let base = TRAILING_CHANNEL.replace(&base, "");
    MULTI_SCAN_SUFFIX.replace(&base, "").into_owned()
}

fn filename_stem(filename: &str) -> String {
    let lower = filename.to_ascii_lowercase();
    for ext in [".mpr", ".dta"] {
        if lower.ends_with(ext) {
            return filename[..filename.len() - ext.len()].to_string();
        }
    }
    filename.to_string()
}

/// Reference electrode potentials vs SHE at 25 °C, in volts.
pub const REFERENCE_ELECTRODES: &[(&str, f64)] = &[
    ("SHE", 0.0),
    ("Ag/AgCl (sat. KCl)", 0.197),
    ("Ag/AgCl (3M KCl)", 0.210),
    ("Ag/AgCl (3M NaCl)", 0.209),
    ("SCE", 0.244),
    ("Hg/HgO (1M NaOH)", 0.140),
    ("Hg/HgO (1M KOH)", 0.098),
    ("Hg/Hg2SO4 (sat. K2SO4)", 0.654),
];

/// Potential of a reference electrode vs SHE, if known.
pub fn reference_potential(name: &str) -> Option<f64> {
    REFERENCE_ELECTRODES.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_units() {
        assert_eq!(unit_of("current_A"), Some("A"));
        assert_eq!(unit_of("cycle"), Some(""));
        assert_eq!(unit_of("nonsense"), None);
    }

    #[test]
    fn biologic_current_is_rescaled() {
        let m = lookup_mapping(BIOLOGIC_COLUMN_MAP, "<I>/mA").unwrap();
        assert_eq!(m.canonical, columns::CURRENT_A);
        assert!((m.factor - 1e-3).abs() < 1e-15);
    }

    #[test]
    fn gamry_current_is_not_rescaled() {
        let m = lookup_mapping(GAMRY_COLUMN_MAP, "Im").unwrap();
        assert_eq!(m.canonical, columns::CURRENT_A);
        assert_eq!(m.factor, 1.0);
    }

    #[test]
    fn technique_multi_scan_suffix() {
        assert_eq!(technique_from_filename("CA_sample_01_CA.mpr"), Some(Technique::CA));
        assert_eq!(technique_from_filename("run_02_PEIS_C03.mpr"), Some(Technique::PEIS));
    }

    #[test]
    fn technique_head_and_parts() {
        assert_eq!(technique_from_filename("CV_scan1.mpr"), Some(Technique::CV));
        assert_eq!(technique_from_filename("LSV.mpr"), Some(Technique::LSV));
        assert_eq!(technique_from_filename("sample_OCV_run.mpr"), Some(Technique::OCV));
        assert_eq!(technique_from_filename("nothing_here.mpr"), None);
    }

    #[test]
    fn label_strips_suffixes() {
        assert_eq!(label_from_filename("CA_sample_01_CA.mpr"), "CA_sample");
        assert_eq!(label_from_filename("CA_sample_01_CA_C02.mpr"), "CA_sample");
        assert_eq!(label_from_filename("plain.mpr"), "plain");
    }

    #[test]
    fn reference_table() {
        assert_eq!(reference_potential("SCE"), Some(0.244));
        assert_eq!(reference_potential("Ag/AgCl (sat. KCl)"), Some(0.197));
        assert_eq!(reference_potential("unknown"), None);
    }
}
