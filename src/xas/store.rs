//! # Scan Stores
//!
//! The XAS pipeline reads beamline archives through the [`ScanStore`]
//! seam: a scan is a top-level group, a parent path groups channels, and
//! each channel's `data` member is a 1-D array. The concrete HDF5 backend
//! ([`Hdf5ScanStore`]) is compiled behind the `hdf5` feature because it
//! needs the native library; [`MemoryScanStore`] backs tests and demo
//! data.
//!
//! This module also owns the filesystem project scan
//! ([`scan_project_datasets`]) that walks `sample/dataset/*.h5` trees, and
//! the per-beamline channel path presets.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::xas::XasError;

/// Read access to one measurement archive.
pub trait ScanStore {
    /// Top-level scan group keys, in natural scan order.
    fn scan_keys(&self) -> Result<Vec<String>, XasError>;

    /// Parent group names under a scan.
    fn parent_paths(&self, scan: &str) -> Result<Vec<String>, XasError>;

    /// Channel names under `scan/parent`.
    fn channels(&self, scan: &str, parent: &str) -> Result<Vec<String>, XasError>;

    /// Whether `scan/parent/channel` exists.
    fn has_channel(&self, scan: &str, parent: &str, channel: &str) -> bool;

    /// Read `scan/parent/channel` as a 1-D array (scalars become a
    /// single-element array).
    fn read_channel(&self, scan: &str, parent: &str, channel: &str)
        -> Result<Array1<f64>, XasError>;
}

/// Natural ordering for dotted scan ids: `1.1 < 1.2 < 2.1`. Ids that do
/// not parse sort after all numeric ones.
pub fn scan_sort_key(scan: &str) -> (i64, i64) {
    let mut parts = scan.split('.');
    let major = parts.next().and_then(|p| p.parse().ok());
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    match major {
        Some(major) => (major, minor),
        None => (i64::MAX, 0),
    }
}

/// Sort scan ids naturally in place.
pub fn sort_scans(scans: &mut [String]) {
    scans.sort_by_key(|s| scan_sort_key(s));
}

/// Per-beamline channel layout: where channels live inside a scan and the
/// logical-name → H5-path map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeamlineConfig {
    /// Parent group inside each scan (default "instrument")
    pub parent_path: String,
    /// Logical channel name → H5 dataset path
    pub h5_paths: HashMap<String, String>,
}

impl BeamlineConfig {
    /// Resolve a logical channel name to its H5 path.
    pub fn path_of(&self, channel: &str) -> Option<&str> {
        self.h5_paths.get(channel).map(String::as_str)
    }

    /// ESRF BM23 preset.
    pub fn bm23() -> Self {
        let h5_paths = [
            ("energy", "energy_enc"),
            ("I0", "I0"),
            ("Ir_Pt_corr", "Ir_Pt_corr_det00"),
            ("Pt_corr", "Pt_corr_det00"),
            ("Ir2_corr", "Ir2_corr_det00"),
            ("Mn_corr", "Mn_corr_det00"),
            ("mu_roi", "mu_roi"),
            ("Co2_corr", "Co2_corr_det00"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self { parent_path: "instrument".to_string(), h5_paths }
    }
}

/// One discovered dataset folder: `sample/dataset` holding H5 files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetInfo {
    /// Sample folder name
    pub sample: String,
    /// Dataset folder name
    pub dataset: String,
    /// H5 files, relative to the project root, sorted
    pub h5_files: Vec<String>,
    /// Valid scan ids, populated on demand
    pub valid_scans: Option<Vec<String>>,
}

/// Walk a project folder for H5 files, two directory levels deep
/// (`<root>/<raw folder>/<sample>/<dataset>/*.h5`; the raw-folder level is
/// skipped when `raw_data_folders` is empty).
pub fn scan_project_datasets(
    project_path: &Path,
    raw_data_folders: &[String],
) -> Result<Vec<DatasetInfo>, XasError> {
    let search_roots: Vec<PathBuf> = if raw_data_folders.is_empty() {
        vec![project_path.to_path_buf()]
    } else {
        raw_data_folders.iter().map(|f| project_path.join(f)).collect()
    };

    let mut datasets = Vec::new();
    for root in search_roots {
        if !root.exists() {
            continue;
        }
        for sample_dir in sorted_dirs(&root)? {
            let sample = dir_name(&sample_dir);
            for dataset_dir in sorted_dirs(&sample_dir)? {
                let mut h5_files: Vec<String> = std::fs::read_dir(&dataset_dir)?
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| {
                        p.is_file()
                            && p.extension().map(|e| e.eq_ignore_ascii_case("h5")).unwrap_or(false)
                    })
                    .filter_map(|p| {
                        p.strip_prefix(project_path)
                            .ok()
                            .map(|rel| rel.to_string_lossy().into_owned())
                    })
                    .collect();
                h5_files.sort();
                if !h5_files.is_empty() {
                    datasets.push(DatasetInfo {
                        sample: sample.clone(),
                        dataset: dir_name(&dataset_dir),
                        h5_files,
                        valid_scans: None,
                    });
                }
            }
        }
    }
    Ok(datasets)
}

fn sorted_dirs(root: &Path) -> Result<Vec<PathBuf>, XasError> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Scan ids whose subtree holds the configured energy path (and, when
/// given, the numerator's path) under the beamline parent path.
pub fn find_valid_scans(
    store: &dyn ScanStore,
    beamline: &BeamlineConfig,
    numerator: Option<&str>,
) -> Result<Vec<String>, XasError> {
    let energy_path = beamline
        .path_of("energy")
        .ok_or_else(|| XasError::NotFound("beamline config has no 'energy' channel".to_string()))?;

    let mut valid = Vec::new();
    for scan in store.scan_keys()? {
        if !store.has_channel(&scan, &beamline.parent_path, energy_path) {
            continue;
        }
        if let Some(num) = numerator {
            match beamline.path_of(num) {
                Some(path) if store.has_channel(&scan, &beamline.parent_path, path) => {}
                _ => continue,
            }
        }
        valid.push(scan);
    }
    sort_scans(&mut valid);
    Ok(valid)
}

/// Read `(energy_eV, signal)` for one scan: numerator over optional
/// denominator, masked to `[energy_min, energy_max]` keV, then converted
/// to eV.
#[allow(clippy::too_many_arguments)]
pub fn read_scan_data(
    store: &dyn ScanStore,
    beamline: &BeamlineConfig,
    scan: &str,
    numerator: &str,
    denominator: Option<&str>,
    energy_min: Option<f64>,
    energy_max: Option<f64>,
) -> Result<(Array1<f64>, Array1<f64>), XasError> {
    let parent = &beamline.parent_path;
    let energy_path = beamline
        .path_of("energy")
        .ok_or_else(|| XasError::NotFound("beamline config has no 'energy' channel".to_string()))?;
    let numerator_path = beamline
        .path_of(numerator)
        .ok_or_else(|| XasError::NotFound(format!("channel '{numerator}' not configured")))?;

    let energy_kev = store.read_channel(scan, parent, energy_path)?;
    let numerator_data = store.read_channel(scan, parent, numerator_path)?;

    let mu = match denominator {
        Some(den) => {
            let den_path = beamline
                .path_of(den)
                .ok_or_else(|| XasError::NotFound(format!("channel '{den}' not configured")))?;
            let den_data = store.read_channel(scan, parent, den_path)?;
            if den_data.len() != numerator_data.len() {
                return Err(XasError::EvalError(format!(
                    "numerator and denominator lengths differ ({} vs {})",
                    numerator_data.len(),
                    den_data.len()
                )));
            }
            &numerator_data / &den_data
        }
        None => numerator_data,
    };

    let (energy_kev, mu) = mask_energy(energy_kev, mu, energy_min, energy_max)?;
    Ok((energy_kev * 1000.0, mu))
}

/// Apply an inclusive keV mask to `(energy, signal)`.
pub fn mask_energy(
    energy: Array1<f64>,
    signal: Array1<f64>,
    energy_min: Option<f64>,
    energy_max: Option<f64>,
) -> Result<(Array1<f64>, Array1<f64>), XasError> {
    if energy_min.is_none() && energy_max.is_none() {
        return Ok((energy, signal));
    }
    let keep: Vec<usize> = energy
        .iter()
        .enumerate()
        .filter(|(_, e)| {
            energy_min.map_or(true, |lo| **e >= lo) && energy_max.map_or(true, |hi| **e <= hi)
        })
        .map(|(i, _)| i)
        .collect();
    if keep.is_empty() {
        return Err(XasError::Normalization(
            "energy filtering removed all data; check energy_min and energy_max".to_string(),
        ));
    }
    let energy = Array1::from_iter(keep.iter().map(|&i| energy[i]));
    let signal = Array1::from_iter(keep.iter().map(|&i| signal[i]));
    Ok((energy, signal))
}

/// Parent paths and channel names of the first scan, for the direct-view
/// mode where users pick channels without an ROI config.
pub fn channel_inventory(
    store: &dyn ScanStore,
) -> Result<BTreeMap<String, Vec<String>>, XasError> {
    let scans = store.scan_keys()?;
    let Some(first) = scans.first() else {
        return Ok(BTreeMap::new());
    };
    let mut inventory = BTreeMap::new();
    for parent in store.parent_paths(first)? {
        let mut channels = store.channels(first, &parent)?;
        channels.sort();
        inventory.insert(parent, channels);
    }
    Ok(inventory)
}

/// Read raw X/Y channel data for direct-view plotting, each with an
/// optional denominator.
#[allow(clippy::too_many_arguments)]
pub fn read_direct_channels(
    store: &dyn ScanStore,
    scan: &str,
    parent: &str,
    x_channel: &str,
    y_channel: &str,
    x_denominator: Option<&str>,
    y_denominator: Option<&str>,
) -> Result<(Array1<f64>, Array1<f64>), XasError> {
    let read = |channel: &str| store.read_channel(scan, parent, channel);
    let mut x = read(x_channel)?;
    if let Some(den) = x_denominator {
        x = &x / &read(den)?;
    }
    let mut y = read(y_channel)?;
    if let Some(den) = y_denominator {
        y = &y / &read(den)?;
    }
    Ok((x, y))
}

/// In-memory scan store used by tests and demo data.
#[derive(Debug, Clone, Default)]
pub struct MemoryScanStore {
    scans: BTreeMap<String, BTreeMap<String, BTreeMap<String, Array1<f64>>>>,
}

impl MemoryScanStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a channel array under `scan/parent/channel`.
    pub fn insert(
        &mut self,
        scan: &str,
        parent: &str,
        channel: &str,
        data: impl Into<Array1<f64>>,
    ) -> &mut Self {
        self.scans
            .entry(scan.to_string())
            .or_default()
            .entry(parent.to_string())
            .or_default()
            .insert(channel.to_string(), data.into());
        self
    }
}

impl ScanStore for MemoryScanStore {
    fn scan_keys(&self) -> Result<Vec<String>, XasError> {
        let mut keys: Vec<String> = self.scans.keys().cloned().collect();
        sort_scans(&mut keys);
        Ok(keys)
    }

    fn parent_paths(&self, scan: &str) -> Result<Vec<String>, XasError> {
        self.scans
            .get(scan)
            .map(|parents| parents.keys().cloned().collect())
            .ok_or_else(|| XasError::NotFound(format!("scan '{scan}'")))
    }

    fn channels(&self, scan: &str, parent: &str) -> Result<Vec<String>, XasError> {
        self.scans
            .get(scan)
            .and_then(|parents| parents.get(parent))
            .map(|channels| channels.keys().cloned().collect())
            .ok_or_else(|| XasError::NotFound(format!("'{scan}/{parent}'")))
    }

    fn has_channel(&self, scan: &str, parent: &str, channel: &str) -> bool {
        self.scans
            .get(scan)
            .and_then(|parents| parents.get(parent))
            .map(|channels| channels.contains_key(channel))
            .unwrap_or(false)
    }

    fn read_channel(
        &self,
        scan: &str,
        parent: &str,
        channel: &str,
    ) -> Result<Array1<f64>, XasError> {
        self.scans
            .get(scan)
            .and_then(|parents| parents.get(parent))
            .and_then(|channels| channels.get(channel))
            .cloned()
            .ok_or_else(|| XasError::NotFound(format!("'{scan}/{parent}/{channel}'")))
    }
}

/// HDF5-backed scan store. Channels may be stored either as a group with
/// a `data` member or as a plain dataset.
#[cfg(feature = "hdf5")]
pub struct Hdf5ScanStore {
    file: hdf5::File,
}

#[cfg(feature = "hdf5")]
impl Hdf5ScanStore {
    /// Open an H5 archive read-only.
    pub fn open(path: &Path) -> Result<Self, XasError> {
        Ok(Self { file: hdf5::File::open(path)? })
    }

    fn scan_group(&self, scan: &str) -> Result<hdf5::Group, XasError> {
        self.file.group(scan).map_err(|_| XasError::NotFound(format!("scan '{scan}'")))
    }
}

#[cfg(feature = "hdf5")]
impl ScanStore for Hdf5ScanStore {
    fn scan_keys(&self) -> Result<Vec<String>, XasError> {
        let mut keys: Vec<String> = self
            .file
            .member_names()?
            .into_iter()
            .filter(|name| self.file.group(name).is_ok())
            .collect();
        sort_scans(&mut keys);
        Ok(keys)
    }

    fn parent_paths(&self, scan: &str) -> Result<Vec<String>, XasError> {
        let group = self.scan_group(scan)?;
        Ok(group
            .member_names()?
            .into_iter()
            .filter(|name| group.group(name).is_ok())
            .collect())
    }

    fn channels(&self, scan: &str, parent: &str) -> Result<Vec<String>, XasError> {
        let group = self
            .scan_group(scan)?
            .group(parent)
            .map_err(|_| XasError::NotFound(format!("'{scan}/{parent}'")))?;
        Ok(group.member_names()?)
    }

    fn has_channel(&self, scan: &str, parent: &str, channel: &str) -> bool {
        self.file
            .group(scan)
            .and_then(|g| g.group(parent))
            .map(|g| g.link_exists(channel))
            .unwrap_or(false)
    }

    fn read_channel(
        &self,
        scan: &str,
        parent: &str,
        channel: &str,
    ) -> Result<Array1<f64>, XasError> {
        let parent_group = self
            .scan_group(scan)?
            .group(parent)
            .map_err(|_| XasError::NotFound(format!("'{scan}/{parent}'")))?;

        // Group/data layout first, then a plain dataset.
        let dataset = match parent_group.group(channel) {
            Ok(channel_group) => channel_group
                .dataset("data")
                .map_err(|_| XasError::NotFound(format!("'{scan}/{parent}/{channel}/data'")))?,
            Err(_) => parent_group
                .dataset(channel)
                .map_err(|_| XasError::NotFound(format!("'{scan}/{parent}/{channel}'")))?,
        };

        if dataset.ndim() == 0 {
            let value: f64 = dataset.read_scalar()?;
            Ok(Array1::from_elem(1, value))
        } else {
            Ok(dataset.read_1d::<f64>()?)
        }
    }
}
