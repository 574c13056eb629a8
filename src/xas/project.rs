//! # XAS Project Database
//!
//! The XAS review workflow persists its bookkeeping (which datasets
//! exist, how each scan is normalized and reviewed, which ROIs and energy
//! references are defined, and saved peak fits) as a single JSON
//! document (`project_db.json`) in the project folder. Collections are
//! upsert-keyed by their natural unique tuples; deletes of referenced ROI
//! configs and references are refused.
//!
//! A project is open at most once per process: the server owns an
//! option-typed handle behind a mutex, and opening a new project replaces
//! (and thereby closes) the previous one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::xas::peakfit::LorentzianPeak;
use crate::xas::processing::ScanStatus;
use crate::xas::store::{scan_project_datasets, DatasetInfo};

/// Name of the document store file inside the project folder.
pub const DB_FILENAME: &str = "project_db.json";

/// Errors raised by project operations.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    /// Unknown dataset, scan, ROI or reference
    #[error("Not found: {0}")]
    NotFound(String),

    /// Deletion refused because records still reference the target
    #[error("In use by {n} scan(s)")]
    InUse {
        /// Number of referencing scans
        n: usize,
    },

    /// Filesystem error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Document (de)serialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// A named ROI: numerator/denominator channel combination with optional
/// element tag and energy window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiConfig {
    /// Unique name
    pub name: String,
    /// Numerator channel (logical beamline name)
    pub numerator: String,
    /// Optional denominator channel
    #[serde(default)]
    pub denominator: Option<String>,
    /// Element tag, e.g. "Fe"
    #[serde(default)]
    pub element: Option<String>,
    /// Energy mask lower bound (keV)
    #[serde(default)]
    pub energy_min: Option<f64>,
    /// Energy mask upper bound (keV)
    #[serde(default)]
    pub energy_max: Option<f64>,
}

/// Stored review/normalization state of one scan under one ROI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Sample name
    pub sample: String,
    /// Dataset name
    pub dataset: String,
    /// ROI name
    pub roi: String,
    /// Scan id
    pub scan: String,
    /// Pre-edge window start (relative to E0); `None` = auto
    #[serde(default)]
    pub pre1: Option<f64>,
    /// Pre-edge window end
    #[serde(default)]
    pub pre2: Option<f64>,
    /// Post-edge window start
    #[serde(default)]
    pub norm1: Option<f64>,
    /// Post-edge window end
    #[serde(default)]
    pub norm2: Option<f64>,
    /// Review status
    #[serde(default)]
    pub status: ScanStatus,
    /// Whether the scan is energy-aligned
    #[serde(default)]
    pub aligned: bool,
    /// Reference used for alignment, if any
    #[serde(default)]
    pub reference_name: Option<String>,
    /// Calibration shift (eV)
    #[serde(default)]
    pub energy_shift: f64,
}

/// A saved energy calibration: a measured E0 tied to a known target E0
/// through an energy shift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceRecord {
    /// Unique name
    pub name: String,
    /// Element, e.g. "Pt"
    pub element: String,
    /// Sample the reference was measured on
    pub source_sample: String,
    /// Dataset the reference was measured on
    pub source_dataset: String,
    /// Scans that went into the measured E0
    pub scans: Vec<String>,
    /// Measured edge energy (eV)
    pub measured_e0: f64,
    /// Standard deviation of the measured edge energy (eV)
    pub measured_e0_std: f64,
    /// Tabulated edge energy (eV)
    pub target_e0: f64,
    /// `target_e0 − measured_e0` (eV)
    pub energy_shift: f64,
    /// ISO date the reference was created
    pub created_date: String,
}

/// A saved peak fit for one sample/dataset/ROI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakFitRecord {
    /// Sample name
    pub sample: String,
    /// Dataset name
    pub dataset: String,
    /// ROI name
    pub roi: String,
    /// Number of peaks fitted
    pub n_peaks: usize,
    /// Fitted parameters
    pub params: Vec<LorentzianPeak>,
    /// Savitzky–Golay window used for the second derivative
    pub savgol_window: usize,
    /// Savitzky–Golay polynomial order
    pub savgol_polyorder: usize,
    /// Fit window `(E_min, E_max)` in eV
    pub energy_range: (f64, f64),
    /// Fit quality
    pub r_squared: f64,
    /// Free-form notes
    #[serde(default)]
    pub notes: Option<String>,
    /// ISO date of the last update
    pub updated_date: String,
}

/// The document store: five collections in one JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectDb {
    /// Discovered datasets
    #[serde(default)]
    pub datasets: Vec<DatasetInfo>,
    /// ROI definitions
    #[serde(default)]
    pub roi_configs: Vec<RoiConfig>,
    /// Per-scan review state
    #[serde(default)]
    pub scans: Vec<ScanRecord>,
    /// Energy references
    #[serde(default)]
    pub references: Vec<ReferenceRecord>,
    /// Saved peak fits
    #[serde(default)]
    pub peak_fits: Vec<PeakFitRecord>,
}

/// An open project folder.
#[derive(Debug)]
pub struct XasProject {
    root: PathBuf,
    db_path: PathBuf,
    db: ProjectDb,
}

/// Default ROI set seeded into fresh projects (BM23 channel names).
fn default_roi_configs() -> Vec<RoiConfig> {
    vec![
        RoiConfig {
            name: "mu_roi".to_string(),
            numerator: "mu_roi".to_string(),
            denominator: None,
            element: None,
            energy_min: None,
            energy_max: None,
        },
        RoiConfig {
            name: "Ir_Pt/I0".to_string(),
            numerator: "Ir_Pt_corr".to_string(),
            denominator: Some("I0".to_string()),
            element: Some("Ir".to_string()),
            energy_min: None,
            energy_max: None,
        },
        RoiConfig {
            name: "Pt/I0".to_string(),
            numerator: "Pt_corr".to_string(),
            denominator: Some("I0".to_string()),
            element: Some("Pt".to_string()),
            energy_min: None,
            energy_max: None,
        },
    ]
}

impl XasProject {
    /// Open a project folder: load (or create) the document store, rescan
    /// the raw-data tree and upsert the datasets collection, and seed the
    /// default ROI set when none is defined yet.
    pub fn open(root: &Path, raw_data_folders: &[String]) -> Result<Self, ProjectError> {
        let db_path = root.join(DB_FILENAME);
        let db: ProjectDb = if db_path.exists() {
            serde_json::from_slice(&std::fs::read(&db_path)?)?
        } else {
            ProjectDb::default()
        };

        let mut project = Self { root: root.to_path_buf(), db_path, db };

        let discovered = scan_project_datasets(&project.root, raw_data_folders)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        for info in discovered {
            project.upsert_dataset(info)?;
        }

        if project.db.roi_configs.is_empty() {
            project.db.roi_configs = default_roi_configs();
            project.save()?;
        }

        log::info!(
            "opened project at {} ({} datasets, {} ROI configs)",
            project.root.display(),
            project.db.datasets.len(),
            project.db.roi_configs.len()
        );
        Ok(project)
    }

    /// The project root folder.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read-only view of the store.
    pub fn db(&self) -> &ProjectDb {
        &self.db
    }

    fn save(&self) -> Result<(), ProjectError> {
        std::fs::write(&self.db_path, serde_json::to_string_pretty(&self.db)?)?;
        Ok(())
    }

    // ---- datasets -------------------------------------------------------

    /// Insert or update a dataset, keyed on `(sample, dataset)`. An
    /// existing record keeps its cached valid scans.
    pub fn upsert_dataset(&mut self, info: DatasetInfo) -> Result<(), ProjectError> {
        match self
            .db
            .datasets
            .iter_mut()
            .find(|d| d.sample == info.sample && d.dataset == info.dataset)
        {
            Some(existing) => {
                existing.h5_files = info.h5_files;
            }
            None => self.db.datasets.push(info),
        }
        self.save()
    }

    /// Look up a dataset by its key tuple.
    pub fn dataset(&self, sample: &str, dataset: &str) -> Result<&DatasetInfo, ProjectError> {
        self.db
            .datasets
            .iter()
            .find(|d| d.sample == sample && d.dataset == dataset)
            .ok_or_else(|| ProjectError::NotFound(format!("dataset {sample}/{dataset}")))
    }

    /// Cache the valid-scan list for a dataset.
    pub fn set_valid_scans(
        &mut self,
        sample: &str,
        dataset: &str,
        scans: Vec<String>,
    ) -> Result<(), ProjectError> {
        let record = self
            .db
            .datasets
            .iter_mut()
            .find(|d| d.sample == sample && d.dataset == dataset)
            .ok_or_else(|| ProjectError::NotFound(format!("dataset {sample}/{dataset}")))?;
        record.valid_scans = Some(scans);
        self.save()
    }

    // ---- ROI configs ----------------------------------------------------

    /// Insert or update an ROI config, keyed on its name.
    pub fn upsert_roi(&mut self, roi: RoiConfig) -> Result<(), ProjectError> {
        match self.db.roi_configs.iter_mut().find(|r| r.name == roi.name) {
            Some(existing) => *existing = roi,
            None => self.db.roi_configs.push(roi),
        }
        self.save()
    }

    /// Look up an ROI config by name.
    pub fn roi(&self, name: &str) -> Result<&RoiConfig, ProjectError> {
        self.db
            .roi_configs
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| ProjectError::NotFound(format!("ROI '{name}'")))
    }

    /// Delete an ROI config. Refused with [`ProjectError::InUse`] while
    /// scan records reference it.
    pub fn delete_roi(&mut self, name: &str) -> Result<(), ProjectError> {
        if !self.db.roi_configs.iter().any(|r| r.name == name) {
            return Err(ProjectError::NotFound(format!("ROI '{name}'")));
        }
        let n = self.db.scans.iter().filter(|s| s.roi == name).count();
        if n > 0 {
            return Err(ProjectError::InUse { n });
        }
        self.db.roi_configs.retain(|r| r.name != name);
        self.save()
    }

    // ---- scans ----------------------------------------------------------

    /// Insert or update a scan record, keyed on
    /// `(sample, dataset, roi, scan)`.
    pub fn upsert_scan(&mut self, record: ScanRecord) -> Result<(), ProjectError> {
        match self.db.scans.iter_mut().find(|s| {
            s.sample == record.sample
                && s.dataset == record.dataset
                && s.roi == record.roi
                && s.scan == record.scan
        }) {
            Some(existing) => *existing = record,
            None => self.db.scans.push(record),
        }
        self.save()
    }

    /// Look up one scan record.
    pub fn scan(
        &self,
        sample: &str,
        dataset: &str,
        roi: &str,
        scan: &str,
    ) -> Option<&ScanRecord> {
        self.db.scans.iter().find(|s| {
            s.sample == sample && s.dataset == dataset && s.roi == roi && s.scan == scan
        })
    }

    /// All scan records of one sample/dataset/ROI, as a scan-id map.
    pub fn scans_for(
        &self,
        sample: &str,
        dataset: &str,
        roi: &str,
    ) -> HashMap<String, &ScanRecord> {
        self.db
            .scans
            .iter()
            .filter(|s| s.sample == sample && s.dataset == dataset && s.roi == roi)
            .map(|s| (s.scan.clone(), s))
            .collect()
    }

    // ---- references -----------------------------------------------------

    /// Insert or update a reference, keyed on its name.
    pub fn upsert_reference(&mut self, record: ReferenceRecord) -> Result<(), ProjectError> {
        match self.db.references.iter_mut().find(|r| r.name == record.name) {
            Some(existing) => *existing = record,
            None => self.db.references.push(record),
        }
        self.save()
    }

    /// Look up a reference by name.
    pub fn reference(&self, name: &str) -> Result<&ReferenceRecord, ProjectError> {
        self.db
            .references
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| ProjectError::NotFound(format!("reference '{name}'")))
    }

    /// Delete a reference. Refused with [`ProjectError::InUse`] while scan
    /// records use it for alignment.
    pub fn delete_reference(&mut self, name: &str) -> Result<(), ProjectError> {
        if !self.db.references.iter().any(|r| r.name == name) {
            return Err(ProjectError::NotFound(format!("reference '{name}'")));
        }
        let n = self
            .db
            .scans
            .iter()
            .filter(|s| s.reference_name.as_deref() == Some(name))
            .count();
        if n > 0 {
            return Err(ProjectError::InUse { n });
        }
        self.db.references.retain(|r| r.name != name);
        self.save()
    }

    // ---- peak fits ------------------------------------------------------

    /// Insert or update a peak fit, keyed on `(sample, dataset, roi)`.
    pub fn upsert_peak_fit(&mut self, record: PeakFitRecord) -> Result<(), ProjectError> {
        match self.db.peak_fits.iter_mut().find(|p| {
            p.sample == record.sample && p.dataset == record.dataset && p.roi == record.roi
        }) {
            Some(existing) => *existing = record,
            None => self.db.peak_fits.push(record),
        }
        self.save()
    }

    /// Look up the saved peak fit for one sample/dataset/ROI.
    pub fn peak_fit(&self, sample: &str, dataset: &str, roi: &str) -> Option<&PeakFitRecord> {
        self.db
            .peak_fits
            .iter()
            .find(|p| p.sample == sample && p.dataset == dataset && p.roi == roi)
    }
}
