//! Electrochemistry session endpoints: upload, dataset access, analyses,
//! transforms and container export/import. Handlers stay thin; every
//! numeric decision lives in the core modules.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE, HeaderMap};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::analysis;
use crate::codegen::{self, PlotSettings};
use crate::dataset::EchemDataset;
use crate::export::{self, ExportFormat, ExportOptions};
use crate::parsers;
use crate::schema::columns;
use crate::server::{resolve_session, with_session_cookie, ApiError, AppState};
use crate::table::DataTable;
use crate::transforms;

/// Upload extensions accepted by `/api/upload`.
const ACCEPTED_EXTENSIONS: &[&str] = &["mpr", "dta", "zip"];

fn dataset_summary(ds: &EchemDataset, meta: Option<&HashMap<String, String>>) -> Value {
    json!({
        "filename": ds.filename,
        "label": meta
            .and_then(|m| m.get("label").cloned())
            .unwrap_or_else(|| ds.label.clone()),
        "technique": ds.technique.map(|t| t.as_str()),
        "columns": ds.columns(),
        "cycles": ds.cycles,
        "n_rows": ds.table.n_rows(),
        "timestamp": ds.timestamp.map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string()),
        "source_format": ds.source_format.map(|s| s.as_str()),
        "size_mb": ds.size_mb(),
        "metadata": meta,
    })
}

fn table_payload(table: &DataTable) -> Value {
    let data: serde_json::Map<String, Value> = table
        .iter_columns()
        .map(|(name, values)| (name.to_string(), json!(values)))
        .collect();
    json!({ "n_rows": table.n_rows(), "columns": table.column_names(), "data": data })
}

pub(super) async fn session_info(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let (sid, session) = resolve_session(&state, &headers);
    let body = {
        let session = session.lock().expect("session mutex poisoned");
        json!({
            "session_id": sid,
            "file_count": session.file_count(),
            "memory_mb": session.memory_estimate_mb(),
            "created_at": session.created_at.to_rfc3339(),
        })
    };
    with_session_cookie(&state, &sid, Json(body))
}

pub(super) async fn delete_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<Value> {
    let (sid, _) = resolve_session(&state, &headers);
    state.sessions.delete_session(&sid);
    Json(json!({ "deleted": sid }))
}

pub(super) async fn admin_stats(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(state.sessions.stats()))
}

/// Multi-file upload. Each file succeeds or fails on its own; quota and
/// parse errors are reported per file and never abort the batch.
pub(super) async fn upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let (sid, session) = resolve_session(&state, &headers);
    let max_file_mb = state.sessions.limits().max_file_size_mb;

    let mut results = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                results.push(json!({ "filename": filename, "success": false, "error": e.to_string() }));
                continue;
            }
        };

        let ext = filename.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
        if !ACCEPTED_EXTENSIONS.contains(&ext.as_str()) {
            results.push(json!({
                "filename": filename,
                "success": false,
                "error": format!("unsupported file type '.{ext}'"),
            }));
            continue;
        }
        let size_mb = content.len() as f64 / (1024.0 * 1024.0);
        if size_mb > max_file_mb {
            results.push(json!({
                "filename": filename,
                "success": false,
                "error": format!("Quota exceeded (file size): {size_mb:.1} MiB > {max_file_mb:.1} MiB"),
            }));
            continue;
        }

        if ext == "zip" {
            results.extend(import_datasets(&state, &session, &content));
            continue;
        }

        match parsers::parse_bytes(&content, &filename) {
            Ok(dataset) => match state.sessions.add_dataset(&session, dataset) {
                Ok(()) => results.push(json!({ "filename": filename, "success": true })),
                Err(err) => results.push(json!({
                    "filename": filename,
                    "success": false,
                    "error": err.to_string(),
                })),
            },
            Err(err) => results.push(json!({
                "filename": filename,
                "success": false,
                "error": err.to_string(),
            })),
        }
    }

    let file_count = session.lock().expect("session mutex poisoned").file_count();
    let body = json!({ "results": results, "file_count": file_count });
    Ok(with_session_cookie(&state, &sid, Json(body)))
}

/// Import a container's datasets into the session, one result per file.
fn import_datasets(
    state: &AppState,
    session: &std::sync::Mutex<crate::session::SessionState>,
    content: &[u8],
) -> Vec<Value> {
    let imported = match export::session_import(content) {
        Ok(imported) => imported,
        Err(err) => return vec![json!({ "filename": "(container)", "success": false, "error": err.to_string() })],
    };

    let mut results = Vec::new();
    for dataset in imported.datasets {
        let filename = dataset.filename.clone();
        match state.sessions.add_dataset(session, dataset) {
            Ok(()) => {
                if let Some(meta) = imported.file_metadata.get(&filename) {
                    let patch = meta
                        .iter()
                        .map(|(k, v)| (k.clone(), Some(v.clone())))
                        .collect();
                    session
                        .lock()
                        .expect("session mutex poisoned")
                        .update_metadata(&filename, patch);
                }
                results.push(json!({ "filename": filename, "success": true }));
            }
            Err(err) => results.push(json!({
                "filename": filename,
                "success": false,
                "error": err.to_string(),
            })),
        }
    }
    results
}

pub(super) async fn list_files(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let (sid, session) = resolve_session(&state, &headers);
    let body = {
        let session = session.lock().expect("session mutex poisoned");
        let mut files: Vec<Value> = session
            .datasets
            .values()
            .map(|ds| dataset_summary(ds, session.file_metadata.get(&ds.filename)))
            .collect();
        files.sort_by(|a, b| a["filename"].as_str().cmp(&b["filename"].as_str()));
        json!({ "files": files })
    };
    with_session_cookie(&state, &sid, Json(body))
}

#[derive(Debug, Deserialize)]
pub(super) struct DataQuery {
    /// Restrict to one cycle before returning
    cycle: Option<i64>,
    /// Downsample to at most this many rows
    max_points: Option<usize>,
}

pub(super) async fn file_data(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(filename): Path<String>,
    Query(query): Query<DataQuery>,
) -> Result<Response, ApiError> {
    let (sid, session) = resolve_session(&state, &headers);
    let body = {
        let session = session.lock().expect("session mutex poisoned");
        let ds = session
            .datasets
            .get(&filename)
            .ok_or_else(|| ApiError::not_found(format!("File not found: {filename}")))?;

        let mut view = ds.clone();
        if let Some(cycle) = query.cycle {
            view = transforms::filter_by_cycle(&view, cycle);
        }
        if let Some(max_points) = query.max_points {
            view = transforms::downsample(&view, max_points);
        }
        let mut body = dataset_summary(&view, session.file_metadata.get(&filename));
        body["table"] = table_payload(&view.table);
        body
    };
    Ok(with_session_cookie(&state, &sid, Json(body)))
}

pub(super) async fn delete_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let (sid, session) = resolve_session(&state, &headers);
    session.lock().expect("session mutex poisoned").remove_dataset(&filename)?;
    Ok(with_session_cookie(&state, &sid, Json(json!({ "deleted": filename }))))
}

/// Metadata patch: values set; explicit nulls delete keys.
pub(super) async fn update_metadata(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(filename): Path<String>,
    Json(patch): Json<HashMap<String, Option<String>>>,
) -> Result<Response, ApiError> {
    let (sid, session) = resolve_session(&state, &headers);
    let body = {
        let mut session = session.lock().expect("session mutex poisoned");
        if !session.datasets.contains_key(&filename) {
            return Err(ApiError::not_found(format!("File not found: {filename}")));
        }
        session.update_metadata(&filename, patch);
        json!({ "filename": filename, "metadata": session.file_metadata.get(&filename) })
    };
    Ok(with_session_cookie(&state, &sid, Json(body)))
}

/// One analysis request; kernels returning `None` surface as a null
/// result, distinguishing "not applicable" from failure.
#[derive(Debug, Deserialize)]
pub(super) struct AnalysisRequest {
    #[serde(flatten)]
    kind: AnalysisKind,
    /// Filter to one cycle before analyzing
    cycle: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "analysis", rename_all = "snake_case")]
enum AnalysisKind {
    HfIntercept,
    LfIntercept,
    TimeAverage { column: String, t_start: f64, t_end: f64 },
    Charge,
    OverpotentialAtCurrent {
        target_current_a: f64,
        #[serde(default)]
        equilibrium_v: f64,
    },
    OnsetPotential { threshold_current_a: f64 },
    LimitingCurrent {
        #[serde(default = "default_window_frac")]
        window_frac: f64,
    },
    CurrentAtPotential { potential_v: f64 },
    SteadyStatePotential {
        #[serde(default = "default_window_s")]
        window_s: f64,
    },
    TimeRange,
}

fn default_window_frac() -> f64 {
    0.1
}
fn default_window_s() -> f64 {
    10.0
}

pub(super) async fn analyze(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(filename): Path<String>,
    Json(request): Json<AnalysisRequest>,
) -> Result<Response, ApiError> {
    let (sid, session) = resolve_session(&state, &headers);
    let body = {
        let session = session.lock().expect("session mutex poisoned");
        let ds = session
            .datasets
            .get(&filename)
            .ok_or_else(|| ApiError::not_found(format!("File not found: {filename}")))?;

        let table = match request.cycle {
            Some(cycle) => ds.table.filter_by_cycle(cycle),
            None => ds.table.clone(),
        };

        let result: Value = match &request.kind {
            AnalysisKind::HfIntercept => json!(analysis::find_hf_intercept(&table)),
            AnalysisKind::LfIntercept => json!(analysis::find_lf_intercept(&table)),
            AnalysisKind::TimeAverage { column, t_start, t_end } => {
                json!(analysis::calculate_time_average(&table, column, *t_start, *t_end))
            }
            AnalysisKind::Charge => json!(analysis::calculate_charge(&table)),
            AnalysisKind::OverpotentialAtCurrent { target_current_a, equilibrium_v } => {
                json!(analysis::overpotential_at_current(&table, *target_current_a, *equilibrium_v))
            }
            AnalysisKind::OnsetPotential { threshold_current_a } => {
                json!(analysis::onset_potential(&table, *threshold_current_a))
            }
            AnalysisKind::LimitingCurrent { window_frac } => {
                json!(analysis::limiting_current(&table, *window_frac))
            }
            AnalysisKind::CurrentAtPotential { potential_v } => {
                json!(analysis::current_at_potential(&table, *potential_v))
            }
            AnalysisKind::SteadyStatePotential { window_s } => {
                json!(analysis::steady_state_potential(&table, *window_s))
            }
            AnalysisKind::TimeRange => json!(analysis::time_range(&table)),
        };
        json!({ "filename": filename, "result": result })
    };
    Ok(with_session_cookie(&state, &sid, Json(body)))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "transform", rename_all = "snake_case")]
pub(super) enum TransformRequest {
    ConvertReference {
        from_ref: String,
        to_ref: String,
        #[serde(default = "default_potential_column")]
        column: String,
    },
    IrCompensate { resistance_ohm: f64 },
    NormalizeByArea { area_cm2: f64 },
    NormalizeByMass { mass_g: f64 },
    FilterByCycle { cycle: i64 },
    Downsample { max_points: usize },
}

fn default_potential_column() -> String {
    columns::POTENTIAL_V.to_string()
}

/// Transforms are non-destructive: the response carries the derived
/// dataset; the stored one is never modified.
pub(super) async fn transform(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(filename): Path<String>,
    Json(request): Json<TransformRequest>,
) -> Result<Response, ApiError> {
    let (sid, session) = resolve_session(&state, &headers);
    let body = {
        let session = session.lock().expect("session mutex poisoned");
        let ds = session
            .datasets
            .get(&filename)
            .ok_or_else(|| ApiError::not_found(format!("File not found: {filename}")))?;

        let derived = match &request {
            TransformRequest::ConvertReference { from_ref, to_ref, column } => {
                transforms::convert_reference(ds, from_ref, to_ref, column)?
            }
            TransformRequest::IrCompensate { resistance_ohm } => {
                transforms::ir_compensate(ds, *resistance_ohm)?
            }
            TransformRequest::NormalizeByArea { area_cm2 } => {
                transforms::normalize_by_area(ds, *area_cm2)?
            }
            TransformRequest::NormalizeByMass { mass_g } => {
                transforms::normalize_by_mass(ds, *mass_g)?
            }
            TransformRequest::FilterByCycle { cycle } => transforms::filter_by_cycle(ds, *cycle),
            TransformRequest::Downsample { max_points } => {
                transforms::downsample(ds, *max_points)
            }
        };

        let mut body = dataset_summary(&derived, session.file_metadata.get(&filename));
        body["table"] = table_payload(&derived.table);
        body
    };
    Ok(with_session_cookie(&state, &sid, Json(body)))
}

#[derive(Debug, Deserialize)]
pub(super) struct PlotExportEntry {
    settings: PlotSettings,
    filenames: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct ExportRequest {
    /// "parquet" (default) or "csv"
    format: String,
    include_csv: bool,
    plots: Vec<PlotExportEntry>,
}

pub(super) async fn export_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ExportRequest>,
) -> Result<Response, ApiError> {
    let (sid, session) = resolve_session(&state, &headers);

    let format = match request.format.as_str() {
        "" | "parquet" => ExportFormat::Parquet,
        "csv" => ExportFormat::Csv,
        other => return Err(ApiError::bad_request(format!("unknown export format '{other}'"))),
    };
    let data_ext = match format {
        ExportFormat::Parquet => "parquet",
        ExportFormat::Csv => "csv",
    };

    let zip_bytes = {
        let session = session.lock().expect("session mutex poisoned");
        let mut datasets: Vec<EchemDataset> = session.datasets.values().cloned().collect();
        datasets.sort_by(|a, b| a.filename.cmp(&b.filename));

        let mut plots_config = Vec::new();
        let mut plot_codes = Vec::new();
        for entry in &request.plots {
            let files: Vec<(String, String)> = entry
                .filenames
                .iter()
                .map(|f| {
                    let label = session
                        .file_metadata
                        .get(f)
                        .and_then(|m| m.get("label").cloned())
                        .unwrap_or_else(|| f.clone());
                    (format!("data/{f}.{data_ext}"), label)
                })
                .collect();
            plot_codes
                .push((entry.settings.name.clone(), codegen::generate_plot_script(&entry.settings, &files)));
            plots_config.push(serde_json::to_value(&entry.settings).map_err(export::ExportError::from)?);
        }

        let opts = ExportOptions {
            format,
            include_csv: request.include_csv,
            plots_config: (!plots_config.is_empty()).then_some(plots_config),
            plot_codes,
            plot_settings: None,
            file_metadata: session.file_metadata.clone(),
        };
        export::session_export(&datasets, &opts)?
    };

    let response = (
        [
            (CONTENT_TYPE, "application/zip"),
            (CONTENT_DISPOSITION, "attachment; filename=\"session_export.zip\""),
        ],
        zip_bytes,
    );
    Ok(with_session_cookie(&state, &sid, response))
}

pub(super) async fn import_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let (sid, session) = resolve_session(&state, &headers);
    let results = import_datasets(&state, &session, &body);
    let file_count = session.lock().expect("session mutex poisoned").file_count();
    Ok(with_session_cookie(
        &state,
        &sid,
        Json(json!({ "results": results, "file_count": file_count })),
    ))
}

#[derive(Debug, Deserialize)]
pub(super) struct PlotCodeRequest {
    settings: PlotSettings,
    /// `(path, label)` per trace; paths as they will appear next to the
    /// generated script
    files: Vec<(String, String)>,
}

pub(super) async fn plot_code(
    Json(request): Json<PlotCodeRequest>,
) -> Json<Value> {
    let script = codegen::generate_plot_script(&request.settings, &request.files);
    Json(json!({ "name": request.settings.name, "code": script }))
}
