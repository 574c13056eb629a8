//! # operando - Electrochemistry & XAS Lab Data Service
//!
//! `operando` ingests raw electrochemistry (EC) and X-ray absorption
//! spectroscopy (XAS) measurement files, normalizes them into a canonical
//! SI-unit columnar model, applies technique-specific analyses, and
//! exposes the results through a stateful multi-session HTTP service with
//! a round-trippable export container and reproducible generated scripts.
//!
//! ## Key Features
//!
//! - **Canonical Data Model**: BioLogic `.mpr` binaries and Gamry `.DTA`
//!   text files decode into one columnar table shape with standardized
//!   column names and SI units.
//!
//! - **Analysis Kernels**: EIS Nyquist intercepts, time-window averages,
//!   charge integration, onset/limiting/at-potential extraction, OCV
//!   steady state; all pure functions over canonical tables.
//!
//! - **XAS Pipeline**: pre-edge normalization, scan averaging with
//!   per-bin variance and leave-one-out contribution analysis, smoothed
//!   derivatives, and Lorentzian second-derivative peak fitting, driven
//!   by a persisted project database.
//!
//! - **Round-trippable Containers**: sessions export as a versioned zip
//!   (Parquet or CSV data, file registry, plot bundles, generated
//!   scripts) and import back exactly, legacy layouts included.
//!
//! - **Session Isolation**: per-user sessions with file/memory quotas,
//!   cookie identity, TTL expiry and background reaping.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use operando::parsers;
//! use operando::analysis;
//!
//! let dataset = parsers::parse_path(std::path::Path::new("CA_sample_01_CA.mpr"))?;
//! if let Some(q) = analysis::calculate_charge(&dataset.table) {
//!     println!("total charge: {q} C");
//! }
//! # Ok::<(), operando::parsers::ParseError>(())
//! ```
//!
//! ## Architecture
//!
//! The library is organized into the following modules:
//!
//! - [`schema`]: canonical column registry, unit map, technique detection
//! - [`table`] / [`dataset`]: the columnar table and its measurement wrapper
//! - [`parsers`]: BioLogic and Gamry decoders
//! - [`analysis`]: EC analysis kernels
//! - [`transforms`]: non-destructive derived columns and filters
//! - [`xas`]: scan stores, normalization, averaging, peak fitting, project DB
//! - [`session`]: per-user session state and quotas
//! - [`export`]: the zip container writer/reader
//! - [`codegen`]: reproducible Python script generation
//! - [`server`]: the axum HTTP façade
//! - [`config`]: TOML application configuration

// Documentation lints - enforce complete documentation for publication
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
// Allow some patterns common in scientific code
#![allow(clippy::too_many_arguments)]

pub mod analysis;
pub mod codegen;
pub mod config;
pub mod dataset;
pub mod export;
pub mod parsers;
pub mod schema;
pub mod server;
pub mod session;
pub mod table;
pub mod transforms;
pub mod xas;

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::analysis::{
        calculate_charge, calculate_time_average, current_at_potential, find_hf_intercept,
        find_lf_intercept, limiting_current, onset_potential, overpotential_at_current,
        steady_state_potential,
    };
    pub use crate::config::AppConfig;
    pub use crate::dataset::{EchemDataset, SourceFormat};
    pub use crate::export::{session_export, session_import, ExportFormat, ExportOptions};
    pub use crate::parsers::{parse_bytes, parse_path, ParseError};
    pub use crate::schema::{columns, Technique};
    pub use crate::session::{SessionLimits, SessionManager};
    pub use crate::table::DataTable;
    pub use crate::transforms::{
        convert_reference, downsample, filter_by_cycle, ir_compensate, normalize_by_area,
        normalize_by_mass,
    };
    pub use crate::xas::{
        average_scans, calculate_derivative, fit_peaks, normalize_single_scan, BeamlineConfig,
        LarchStylePreEdge, MemoryScanStore, ScanStore, XasProject,
    };
}
