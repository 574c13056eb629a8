//! # XAS Processing
//!
//! X-ray absorption spectroscopy support: reading beamline H5 archives
//! through the [`store::ScanStore`] seam, XANES pre-edge normalization,
//! scan averaging with per-bin variance, smoothed derivatives, Lorentzian
//! second-derivative peak fitting, a sandboxed channel-expression
//! evaluator, and the persisted project database that indexes samples,
//! datasets, scans, ROIs, references and peak fits.
//!
//! The numeric pipeline is synchronous and store-agnostic; the concrete
//! HDF5 backend lives behind the `hdf5` cargo feature while tests and the
//! demo path use the in-memory store.

pub mod expr;
pub mod peakfit;
pub mod preedge;
pub mod processing;
pub mod project;
pub mod store;

pub use peakfit::{estimate_initial_guesses, fit_peaks, lorentzian_d2, LorentzianPeak, PeakFitResult};
pub use preedge::{LarchStylePreEdge, PreEdgeParams, PreEdgeProvider, PreEdgeReport};
pub use processing::{
    average_scans, calculate_derivative, normalize_single_scan, AveragedData, NormalizationRequest,
    NormalizedScan, ScanContribution, ScanStatus,
};
pub use project::{ProjectError, XasProject};
pub use store::{
    find_valid_scans, scan_project_datasets, BeamlineConfig, DatasetInfo, MemoryScanStore,
    ScanStore,
};

/// Errors raised across the XAS pipeline.
#[derive(Debug, thiserror::Error)]
pub enum XasError {
    /// The expression references no resolvable channel
    #[error("No valid channel names found in expression: {0}")]
    NoChannels(String),

    /// A referenced scan or channel does not exist in the store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Expression evaluation failed (parse error, shape mismatch,
    /// arithmetic failure)
    #[error("Expression evaluation failed: {0}")]
    EvalError(String),

    /// Pre-edge normalization could not be performed
    #[error("Normalization failed: {0}")]
    Normalization(String),

    /// Filesystem error while scanning or reading the archive
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// HDF5 backend error
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5Error(#[from] hdf5::Error),
}
