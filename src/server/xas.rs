//! XAS workbench endpoints: project lifecycle, scan navigation,
//! normalization, averaging, derivatives, peak fitting, ROI and reference
//! management, and normalization-script generation. The project is a
//! process singleton behind the state mutex; opening a new project
//! replaces the previous one.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use ndarray::Array1;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::codegen::{self, XasScanParams, XasScriptRequest};
use crate::server::{ApiError, AppState, OpenProject};
use crate::xas::preedge::{LarchStylePreEdge, PreEdgeParams};
use crate::xas::processing::{self, NormalizationRequest, ScanParams, ScanStatus};
use crate::xas::project::{ReferenceRecord, RoiConfig, ScanRecord, XasProject};
use crate::xas::peakfit;
use crate::xas::store::{self, ScanStore};

#[derive(Debug, Deserialize)]
pub(super) struct OpenProjectRequest {
    path: PathBuf,
    #[serde(default)]
    raw_data_folders: Vec<String>,
    /// Beamline preset name; defaults to BM23
    #[serde(default)]
    beamline: Option<String>,
}

pub(super) async fn open_project(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OpenProjectRequest>,
) -> Result<Json<Value>, ApiError> {
    let beamline_name = request.beamline.as_deref().unwrap_or("BM23");
    let beamline = state
        .config
        .beamline(beamline_name)
        .cloned()
        .ok_or_else(|| ApiError::not_found(format!("unknown beamline '{beamline_name}'")))?;

    let project = XasProject::open(&request.path, &request.raw_data_folders)?;
    let summary = summarize(&project);

    // Replacing the handle implicitly closes any previously open project.
    let mut slot = state.project.lock().expect("project mutex poisoned");
    *slot = Some(OpenProject { project, beamline });
    Ok(Json(summary))
}

pub(super) async fn close_project(State(state): State<Arc<AppState>>) -> Json<Value> {
    let closed = state.project.lock().expect("project mutex poisoned").take().is_some();
    Json(json!({ "closed": closed }))
}

pub(super) async fn project_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    with_project(&state, |open| Ok(summarize(&open.project))).map(Json)
}

fn summarize(project: &XasProject) -> Value {
    let db = project.db();
    json!({
        "path": project.root(),
        "n_datasets": db.datasets.len(),
        "n_rois": db.roi_configs.len(),
        "n_references": db.references.len(),
        "n_scan_records": db.scans.len(),
    })
}

/// Run `f` with the open project, or 404 when none is open.
fn with_project<T>(
    state: &AppState,
    f: impl FnOnce(&mut OpenProject) -> Result<T, ApiError>,
) -> Result<T, ApiError> {
    let mut slot = state.project.lock().expect("project mutex poisoned");
    let open = slot.as_mut().ok_or_else(|| ApiError::not_found("no project is open"))?;
    f(open)
}

/// Open the scan store behind a dataset's first H5 file.
#[cfg(feature = "hdf5")]
fn open_store(root: &FsPath, h5_rel: &str) -> Result<Box<dyn ScanStore>, ApiError> {
    let store = store::Hdf5ScanStore::open(&root.join(h5_rel))?;
    Ok(Box::new(store))
}

#[cfg(not(feature = "hdf5"))]
fn open_store(_root: &FsPath, _h5_rel: &str) -> Result<Box<dyn ScanStore>, ApiError> {
    Err(ApiError::internal(
        "HDF5 support is not compiled in; rebuild with `--features hdf5`",
    ))
}

fn first_h5<'a>(
    project: &'a XasProject,
    sample: &str,
    dataset: &str,
) -> Result<&'a str, ApiError> {
    let info = project.dataset(sample, dataset)?;
    info.h5_files
        .first()
        .map(String::as_str)
        .ok_or_else(|| ApiError::not_found(format!("dataset {sample}/{dataset} has no H5 files")))
}

pub(super) async fn list_datasets(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    with_project(&state, |open| Ok(Json(json!({ "datasets": open.project.db().datasets }))))
}

#[derive(Debug, Deserialize)]
pub(super) struct ChannelsRequest {
    sample: String,
    dataset: String,
}

/// Parent paths and channel names of the first scan, for direct-view
/// channel pickers.
pub(super) async fn channels(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChannelsRequest>,
) -> Result<Json<Value>, ApiError> {
    with_project(&state, |open| {
        let h5 = first_h5(&open.project, &request.sample, &request.dataset)?.to_string();
        let store = open_store(open.project.root(), &h5)?;
        let inventory = store::channel_inventory(store.as_ref())?;
        Ok(Json(json!({ "channels": inventory })))
    })
}

#[derive(Debug, Deserialize)]
pub(super) struct DirectReadRequest {
    sample: String,
    dataset: String,
    scan: String,
    parent_path: String,
    x_channel: String,
    y_channel: String,
    #[serde(default)]
    x_denominator: Option<String>,
    #[serde(default)]
    y_denominator: Option<String>,
}

/// Raw X/Y channel data without an ROI config (direct-view mode).
pub(super) async fn direct_read(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DirectReadRequest>,
) -> Result<Json<Value>, ApiError> {
    with_project(&state, |open| {
        let h5 = first_h5(&open.project, &request.sample, &request.dataset)?.to_string();
        let store = open_store(open.project.root(), &h5)?;
        let (x, y) = store::read_direct_channels(
            store.as_ref(),
            &request.scan,
            &request.parent_path,
            &request.x_channel,
            &request.y_channel,
            request.x_denominator.as_deref(),
            request.y_denominator.as_deref(),
        )?;
        Ok(Json(json!({ "x": x.to_vec(), "y": y.to_vec() })))
    })
}

#[derive(Debug, Deserialize)]
pub(super) struct ExpressionRequest {
    sample: String,
    dataset: String,
    scan: String,
    expression: String,
}

/// Evaluate a whitelisted math expression over one scan's channels.
pub(super) async fn evaluate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExpressionRequest>,
) -> Result<Json<Value>, ApiError> {
    with_project(&state, |open| {
        let h5 = first_h5(&open.project, &request.sample, &request.dataset)?.to_string();
        let store = open_store(open.project.root(), &h5)?;

        let inventory = store::channel_inventory(store.as_ref())?;
        let available: Vec<String> = inventory
            .iter()
            .flat_map(|(parent, channels)| {
                channels.iter().map(move |c| format!("{parent}/{c}"))
            })
            .collect();

        let result = crate::xas::expr::evaluate_expression(
            store.as_ref(),
            &request.scan,
            &request.expression,
            &available,
        )?;
        Ok(Json(json!({ "result": result.to_vec() })))
    })
}

#[derive(Debug, Deserialize)]
pub(super) struct ValidScansRequest {
    sample: String,
    dataset: String,
    /// Checking against an ROI also requires its numerator channel
    #[serde(default)]
    roi: Option<String>,
}

pub(super) async fn valid_scans(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ValidScansRequest>,
) -> Result<Json<Value>, ApiError> {
    with_project(&state, |open| {
        let numerator = match &request.roi {
            Some(roi) => Some(open.project.roi(roi)?.numerator.clone()),
            None => None,
        };
        let h5 = first_h5(&open.project, &request.sample, &request.dataset)?.to_string();
        let store = open_store(open.project.root(), &h5)?;
        let scans = store::find_valid_scans(store.as_ref(), &open.beamline, numerator.as_deref())?;
        open.project.set_valid_scans(&request.sample, &request.dataset, scans.clone())?;
        Ok(Json(json!({ "valid_scans": scans })))
    })
}

#[derive(Debug, Deserialize)]
pub(super) struct NormalizeRequest {
    sample: String,
    dataset: String,
    roi: String,
    scan: String,
    /// Window overrides; stored per-scan parameters apply when absent
    #[serde(default)]
    pre1: Option<f64>,
    #[serde(default)]
    pre2: Option<f64>,
    #[serde(default)]
    norm1: Option<f64>,
    #[serde(default)]
    norm2: Option<f64>,
    #[serde(default)]
    energy_shift: Option<f64>,
}

pub(super) async fn normalize(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NormalizeRequest>,
) -> Result<Json<Value>, ApiError> {
    with_project(&state, |open| {
        let roi = open.project.roi(&request.roi)?.clone();
        let stored = open
            .project
            .scan(&request.sample, &request.dataset, &request.roi, &request.scan)
            .cloned();
        let h5 = first_h5(&open.project, &request.sample, &request.dataset)?.to_string();
        let store = open_store(open.project.root(), &h5)?;

        let windows = PreEdgeParams {
            pre1: request.pre1.or_else(|| stored.as_ref().and_then(|s| s.pre1)),
            pre2: request.pre2.or_else(|| stored.as_ref().and_then(|s| s.pre2)),
            norm1: request.norm1.or_else(|| stored.as_ref().and_then(|s| s.norm1)),
            norm2: request.norm2.or_else(|| stored.as_ref().and_then(|s| s.norm2)),
        };
        let shift = request
            .energy_shift
            .or_else(|| stored.as_ref().map(|s| s.energy_shift).filter(|s| *s != 0.0));

        let result = processing::normalize_single_scan(
            store.as_ref(),
            &open.beamline,
            &LarchStylePreEdge,
            &NormalizationRequest {
                scan: &request.scan,
                numerator: &roi.numerator,
                denominator: roi.denominator.as_deref(),
                windows,
                energy_min: roi.energy_min,
                energy_max: roi.energy_max,
                energy_shift: shift,
            },
        )?;

        Ok(Json(json!({
            "scan": request.scan,
            "energy_eV": result.energy.to_vec(),
            "mu_raw": result.mu.to_vec(),
            "mu_norm": result.norm.to_vec(),
            "mu_pre": result.pre_edge_line.to_vec(),
            "mu_post": result.post_edge_line.to_vec(),
            "e0": result.e0,
            "edge_step": result.edge_step,
            "pre1": result.pre1,
            "pre2": result.pre2,
            "norm1": result.norm1,
            "norm2": result.norm2,
            "aligned": result.aligned,
            "energy_shift_applied": result.energy_shift_applied,
            "e0_before_alignment": result.e0_before_alignment,
        })))
    })
}

pub(super) async fn upsert_scan_params(
    State(state): State<Arc<AppState>>,
    Json(record): Json<ScanRecord>,
) -> Result<Json<Value>, ApiError> {
    with_project(&state, |open| {
        if let Some(reference) = &record.reference_name {
            open.project.reference(reference)?;
        }
        open.project.upsert_scan(record)?;
        Ok(Json(json!({ "saved": true })))
    })
}

#[derive(Debug, Deserialize)]
pub(super) struct AverageRequest {
    sample: String,
    dataset: String,
    roi: String,
}

pub(super) async fn average(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AverageRequest>,
) -> Result<Json<Value>, ApiError> {
    with_project(&state, |open| {
        let roi = open.project.roi(&request.roi)?.clone();
        let records = open.project.scans_for(&request.sample, &request.dataset, &request.roi);
        let scan_params: Vec<(String, ScanParams)> = records
            .into_iter()
            .map(|(scan, record)| {
                (
                    scan,
                    ScanParams {
                        windows: PreEdgeParams {
                            pre1: record.pre1,
                            pre2: record.pre2,
                            norm1: record.norm1,
                            norm2: record.norm2,
                        },
                        energy_shift: record.energy_shift,
                        status: record.status,
                    },
                )
            })
            .collect();

        let h5 = first_h5(&open.project, &request.sample, &request.dataset)?.to_string();
        let store = open_store(open.project.root(), &h5)?;
        let averaged = processing::average_scans(
            store.as_ref(),
            &open.beamline,
            &LarchStylePreEdge,
            &scan_params,
            &roi.numerator,
            roi.denominator.as_deref(),
            roi.energy_min,
            roi.energy_max,
        )?;

        let Some(avg) = averaged else {
            return Ok(Json(json!({ "average": Value::Null })));
        };
        Ok(Json(json!({
            "average": {
                "energy": avg.energy.to_vec(),
                "norm": avg.norm.to_vec(),
                "std": avg.std.to_vec(),
                "e0": avg.e0,
                "n_scans": avg.n_scans,
                "scan_list": avg.scan_list,
                "mean_std": avg.mean_std(),
            },
            "contributions": avg.contribution_analysis(),
        })))
    })
}

#[derive(Debug, Deserialize)]
pub(super) struct DerivativeRequest {
    energy: Vec<f64>,
    data: Vec<f64>,
    #[serde(default = "default_order")]
    order: u8,
    #[serde(default = "default_smoothing")]
    smoothing_window: usize,
}

fn default_order() -> u8 {
    1
}
fn default_smoothing() -> usize {
    1
}

pub(super) async fn derivative(
    Json(request): Json<DerivativeRequest>,
) -> Result<Json<Value>, ApiError> {
    let energy = Array1::from_vec(request.energy);
    let data = Array1::from_vec(request.data);
    let deriv =
        processing::calculate_derivative(&energy, &data, request.order, request.smoothing_window)?;
    Ok(Json(json!({ "derivative": deriv.to_vec() })))
}

#[derive(Debug, Deserialize)]
pub(super) struct PeakFitRequest {
    energy: Vec<f64>,
    d2mu: Vec<f64>,
    n_peaks: usize,
    energy_range: (f64, f64),
    /// Estimated from the data when absent
    #[serde(default)]
    initial_guesses: Option<Vec<peakfit::LorentzianPeak>>,
    /// When present and the fit succeeds, persist it in the project DB
    #[serde(default)]
    save: Option<SavePeakFit>,
}

#[derive(Debug, Deserialize)]
pub(super) struct SavePeakFit {
    sample: String,
    dataset: String,
    roi: String,
    savgol_window: usize,
    savgol_polyorder: usize,
    #[serde(default)]
    notes: Option<String>,
}

pub(super) async fn peakfit(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PeakFitRequest>,
) -> Result<Json<Value>, ApiError> {
    let energy = Array1::from_vec(request.energy);
    let d2mu = Array1::from_vec(request.d2mu);
    let guesses = request
        .initial_guesses
        .unwrap_or_else(|| peakfit::estimate_initial_guesses(&energy, &d2mu, request.n_peaks));

    let result =
        peakfit::fit_peaks(&energy, &d2mu, request.n_peaks, &guesses, request.energy_range);

    if let (true, Some(save)) = (result.success, request.save) {
        with_project(&state, |open| {
            open.project.upsert_peak_fit(crate::xas::project::PeakFitRecord {
                sample: save.sample,
                dataset: save.dataset,
                roi: save.roi,
                n_peaks: result.n_peaks,
                params: result.params.clone(),
                savgol_window: save.savgol_window,
                savgol_polyorder: save.savgol_polyorder,
                energy_range: request.energy_range,
                r_squared: result.r_squared.unwrap_or(0.0),
                notes: save.notes,
                updated_date: Utc::now().format("%Y-%m-%d").to_string(),
            })?;
            Ok(())
        })?;
    }

    Ok(Json(json!(result)))
}

pub(super) async fn list_rois(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    with_project(&state, |open| Ok(Json(json!({ "rois": open.project.db().roi_configs }))))
}

pub(super) async fn upsert_roi(
    State(state): State<Arc<AppState>>,
    Json(roi): Json<RoiConfig>,
) -> Result<Json<Value>, ApiError> {
    with_project(&state, |open| {
        open.project.upsert_roi(roi)?;
        Ok(Json(json!({ "saved": true })))
    })
}

pub(super) async fn delete_roi(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    with_project(&state, |open| {
        open.project.delete_roi(&name)?;
        Ok(Json(json!({ "deleted": name })))
    })
}

pub(super) async fn list_references(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    with_project(&state, |open| Ok(Json(json!({ "references": open.project.db().references }))))
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateReference {
    name: String,
    element: String,
    source_sample: String,
    source_dataset: String,
    scans: Vec<String>,
    measured_e0: f64,
    measured_e0_std: f64,
    target_e0: f64,
}

pub(super) async fn upsert_reference(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateReference>,
) -> Result<Json<Value>, ApiError> {
    with_project(&state, |open| {
        let energy_shift = request.target_e0 - request.measured_e0;
        open.project.upsert_reference(ReferenceRecord {
            name: request.name.clone(),
            element: request.element,
            source_sample: request.source_sample,
            source_dataset: request.source_dataset,
            scans: request.scans,
            measured_e0: request.measured_e0,
            measured_e0_std: request.measured_e0_std,
            target_e0: request.target_e0,
            energy_shift,
            created_date: Utc::now().format("%Y-%m-%d").to_string(),
        })?;
        Ok(Json(json!({ "saved": request.name, "energy_shift": energy_shift })))
    })
}

pub(super) async fn delete_reference(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    with_project(&state, |open| {
        open.project.delete_reference(&name)?;
        Ok(Json(json!({ "deleted": name })))
    })
}

#[derive(Debug, Deserialize)]
pub(super) struct CodegenRequest {
    sample: String,
    dataset: String,
    roi: String,
    #[serde(default)]
    backend: Option<codegen::PlotBackend>,
}

/// Emit a self-contained normalization script for one sample/dataset/ROI
/// from the project's stored per-scan parameters (good scans only).
pub(super) async fn codegen_script(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CodegenRequest>,
) -> Result<Json<Value>, ApiError> {
    with_project(&state, |open| {
        let roi = open.project.roi(&request.roi)?.clone();
        let info = open.project.dataset(&request.sample, &request.dataset)?.clone();
        let records = open.project.scans_for(&request.sample, &request.dataset, &request.roi);

        let mut scans: Vec<XasScanParams> = records
            .values()
            .filter(|r| r.status == ScanStatus::Good)
            .map(|r| XasScanParams {
                scan: r.scan.clone(),
                pre1: r.pre1,
                pre2: r.pre2,
                norm1: r.norm1,
                norm2: r.norm2,
                energy_shift: r.energy_shift,
            })
            .collect();
        scans.sort_by_key(|s| store::scan_sort_key(&s.scan));

        let mut h5_paths: Vec<(String, String)> = open
            .beamline
            .h5_paths
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        h5_paths.sort();

        let script = codegen::generate_xas_script(&XasScriptRequest {
            sample: request.sample.clone(),
            dataset: request.dataset.clone(),
            roi: request.roi.clone(),
            h5_files: info.h5_files,
            parent_path: open.beamline.parent_path.clone(),
            h5_paths,
            numerator: roi.numerator,
            denominator: roi.denominator,
            energy_min: roi.energy_min,
            energy_max: roi.energy_max,
            scans,
            backend: request.backend,
        });
        Ok(Json(json!({ "code": script })))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::xas::store::BeamlineConfig;

    fn state_with_project() -> (tempfile::TempDir, Arc<AppState>) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("SampleA/set1")).unwrap();
        std::fs::write(dir.path().join("SampleA/set1/scan_001.h5"), b"").unwrap();

        let state = Arc::new(AppState::new(AppConfig::default()));
        let project = XasProject::open(dir.path(), &[]).unwrap();
        *state.project.lock().unwrap() =
            Some(OpenProject { project, beamline: BeamlineConfig::bm23() });
        (dir, state)
    }

    #[tokio::test]
    async fn project_summary_requires_open_project() {
        let state = Arc::new(AppState::new(AppConfig::default()));
        let err = project_summary(State(state)).await.unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn reference_create_computes_shift() {
        let (_dir, state) = state_with_project();
        let body = upsert_reference(
            State(state.clone()),
            Json(CreateReference {
                name: "Pt-foil".to_string(),
                element: "Pt".to_string(),
                source_sample: "SampleA".to_string(),
                source_dataset: "set1".to_string(),
                scans: vec!["1.1".to_string()],
                measured_e0: 11561.0,
                measured_e0_std: 0.1,
                target_e0: 11564.0,
            }),
        )
        .await
        .unwrap();
        assert_eq!(body.0["energy_shift"], json!(3.0));

        let refs = list_references(State(state)).await.unwrap();
        assert_eq!(refs.0["references"][0]["name"], "Pt-foil");
    }

    #[tokio::test]
    async fn codegen_uses_good_scans_only() {
        let (_dir, state) = state_with_project();
        {
            let mut slot = state.project.lock().unwrap();
            let open = slot.as_mut().unwrap();
            for (scan, status) in [("1.1", ScanStatus::Good), ("1.2", ScanStatus::Ignore)] {
                open.project
                    .upsert_scan(ScanRecord {
                        sample: "SampleA".to_string(),
                        dataset: "set1".to_string(),
                        roi: "mu_roi".to_string(),
                        scan: scan.to_string(),
                        pre1: None,
                        pre2: None,
                        norm1: None,
                        norm2: None,
                        status,
                        aligned: false,
                        reference_name: None,
                        energy_shift: 0.0,
                    })
                    .unwrap();
            }
        }

        let body = codegen_script(
            State(state),
            Json(CodegenRequest {
                sample: "SampleA".to_string(),
                dataset: "set1".to_string(),
                roi: "mu_roi".to_string(),
                backend: None,
            }),
        )
        .await
        .unwrap();
        let code = body.0["code"].as_str().unwrap();
        assert!(code.contains("\"1.1\""));
        assert!(!code.contains("\"1.2\""));
        assert!(code.contains("pre_edge"));
    }

    #[tokio::test]
    async fn derivative_endpoint_round_trips() {
        let body = derivative(Json(DerivativeRequest {
            energy: (0..10).map(|i| i as f64).collect(),
            data: (0..10).map(|i| 2.0 * i as f64).collect(),
            order: 1,
            smoothing_window: 1,
        }))
        .await
        .unwrap();
        let deriv = body.0["derivative"].as_array().unwrap();
        assert!((deriv[4].as_f64().unwrap() - 2.0).abs() < 1e-12);
    }
}
