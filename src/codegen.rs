//! # Reproducible Script Generation
//!
//! Exported containers carry self-contained Python scripts that rebuild a
//! plot (from the exported data files) or an XAS normalization (from the
//! beamline H5 files) without this service. The generators are pure
//! functions of their inputs: the emitted script resolves data paths as
//! siblings of itself and performs no network access.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Plotting backend for generated scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlotBackend {
    /// matplotlib (default; static figures)
    #[default]
    Matplotlib,
    /// plotly (interactive HTML)
    Plotly,
}

/// Plot configuration as stored in `plots/plots.json`.
///
/// Field defaults mirror the chart-builder defaults so partially filled
/// configs from older exports still generate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotSettings {
    /// Plot name; becomes the script and output filename stem
    pub name: String,
    /// X column
    pub x_col: String,
    /// Y column
    pub y_col: String,
    /// Axis label override (defaults to the column name)
    #[serde(default)]
    pub x_label: Option<String>,
    /// Axis label override (defaults to the column name)
    #[serde(default)]
    pub y_label: Option<String>,
    /// Title (defaults to the plot name)
    #[serde(default)]
    pub title: Option<String>,
    /// "linear" or "log"
    #[serde(default = "default_scale")]
    pub x_scale: String,
    /// "linear" or "log"
    #[serde(default = "default_scale")]
    pub y_scale: String,
    /// Axis range overrides
    #[serde(default)]
    pub x_min: Option<f64>,
    /// Axis range overrides
    #[serde(default)]
    pub x_max: Option<f64>,
    /// Axis range overrides
    #[serde(default)]
    pub y_min: Option<f64>,
    /// Axis range overrides
    #[serde(default)]
    pub y_max: Option<f64>,
    /// Trace line width
    #[serde(default = "default_line_width")]
    pub line_width: f64,
    /// Draw a grid
    #[serde(default = "default_true")]
    pub show_grid: bool,
    /// Draw the legend
    #[serde(default = "default_true")]
    pub show_legend: bool,
    /// Backend tag
    #[serde(default)]
    pub backend: PlotBackend,
}

fn default_scale() -> String {
    "linear".to_string()
}
fn default_line_width() -> f64 {
    2.0
}
fn default_true() -> bool {
    true
}

/// Per-scan parameters embedded into a normalization script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XasScanParams {
    /// Scan id, e.g. "1.1"
    pub scan: String,
    /// Pre-edge window start relative to E0 (eV); `None` = auto
    pub pre1: Option<f64>,
    /// Pre-edge window end relative to E0 (eV); `None` = auto
    pub pre2: Option<f64>,
    /// Post-edge window start relative to E0 (eV); `None` = auto
    pub norm1: Option<f64>,
    /// Post-edge window end relative to E0 (eV); `None` = auto
    pub norm2: Option<f64>,
    /// Calibration shift added to the energy axis (eV)
    pub energy_shift: f64,
}

/// Everything a normalization script needs, gathered from the project DB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XasScriptRequest {
    /// Sample name (for the header comment and output naming)
    pub sample: String,
    /// Dataset name
    pub dataset: String,
    /// ROI name
    pub roi: String,
    /// H5 files, relative to the script's directory
    pub h5_files: Vec<String>,
    /// Parent group inside each scan
    pub parent_path: String,
    /// Channel name → H5 path map for the beamline
    pub h5_paths: Vec<(String, String)>,
    /// Numerator channel name
    pub numerator: String,
    /// Optional denominator channel name
    pub denominator: Option<String>,
    /// Energy mask lower bound (keV)
    pub energy_min: Option<f64>,
    /// Energy mask upper bound (keV)
    pub energy_max: Option<f64>,
    /// Scans to normalize and average (good scans only)
    pub scans: Vec<XasScanParams>,
    /// Plotting backend; `None` emits no plot
    pub backend: Option<PlotBackend>,
}

fn py_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "None".to_string(), |v| format!("{v}"))
}

fn py_str(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Generate a self-contained Python script reproducing one plot from the
/// exported data files (`files` is `(path, label)` per trace).
pub fn generate_plot_script(settings: &PlotSettings, files: &[(String, String)]) -> String {
    match settings.backend {
        PlotBackend::Matplotlib => matplotlib_script(settings, files),
        PlotBackend::Plotly => plotly_script(settings, files),
    }
}

fn script_header(what: &str) -> String {
    format!(
        "#!/usr/bin/env python3\n\
         # {what}\n\
         # Generated by operando; the script is self-contained and reads its\n\
         # data files relative to its own location.\n\n"
    )
}

fn load_block(files: &[(String, String)]) -> String {
    let mut s = String::new();
    s.push_str("HERE = Path(__file__).resolve().parent\n\nFILES = [\n");
    for (path, label) in files {
        let _ = writeln!(s, "    ({}, {}),", py_str(path), py_str(label));
    }
    s.push_str(
        "]\n\n\
         def load(path):\n\
         \x20   path = HERE / path\n\
         \x20   if path.suffix == \".parquet\":\n\
         \x20       return pd.read_parquet(path)\n\
         \x20   return pd.read_csv(path)\n\n",
    );
    s
}

fn matplotlib_script(settings: &PlotSettings, files: &[(String, String)]) -> String {
    let mut s = script_header(&format!("Reproduces the '{}' plot.", settings.name));
    s.push_str("from pathlib import Path\n\nimport matplotlib.pyplot as plt\nimport pandas as pd\n\n");
    s.push_str(&load_block(files));

    let x_label = settings.x_label.clone().unwrap_or_else(|| settings.x_col.clone());
    let y_label = settings.y_label.clone().unwrap_or_else(|| settings.y_col.clone());
    let title = settings.title.clone().unwrap_or_else(|| settings.name.clone());

    let _ = writeln!(s, "fig, ax = plt.subplots(figsize=(8, 5))");
    let _ = writeln!(s, "for path, label in FILES:");
    let _ = writeln!(s, "    df = load(path)");
    let _ = writeln!(
        s,
        "    ax.plot(df[{x}], df[{y}], label=label, linewidth={lw})",
        x = py_str(&settings.x_col),
        y = py_str(&settings.y_col),
        lw = settings.line_width,
    );
    let _ = writeln!(s, "ax.set_xlabel({})", py_str(&x_label));
    let _ = writeln!(s, "ax.set_ylabel({})", py_str(&y_label));
    let _ = writeln!(s, "ax.set_title({})", py_str(&title));
    let _ = writeln!(s, "ax.set_xscale({})", py_str(&settings.x_scale));
    let _ = writeln!(s, "ax.set_yscale({})", py_str(&settings.y_scale));
    if settings.x_min.is_some() || settings.x_max.is_some() {
        let _ = writeln!(
            s,
            "ax.set_xlim({}, {})",
            py_opt(settings.x_min),
            py_opt(settings.x_max)
        );
    }
    if settings.y_min.is_some() || settings.y_max.is_some() {
        let _ = writeln!(
            s,
            "ax.set_ylim({}, {})",
            py_opt(settings.y_min),
            py_opt(settings.y_max)
        );
    }
    if settings.show_grid {
        let _ = writeln!(s, "ax.grid(True, alpha=0.3)");
    }
    if settings.show_legend {
        let _ = writeln!(s, "ax.legend()");
    }
    let _ = writeln!(s, "fig.tight_layout()");
    let _ = writeln!(s, "fig.savefig(HERE / {}, dpi=300)", py_str(&format!("{}.png", settings.name)));
    let _ = writeln!(s, "plt.show()");
    s
}

fn plotly_script(settings: &PlotSettings, files: &[(String, String)]) -> String {
    let mut s = script_header(&format!("Reproduces the '{}' plot.", settings.name));
    s.push_str("from pathlib import Path\n\nimport pandas as pd\nimport plotly.graph_objects as go\n\n");
    s.push_str(&load_block(files));

    let x_label = settings.x_label.clone().unwrap_or_else(|| settings.x_col.clone());
    let y_label = settings.y_label.clone().unwrap_or_else(|| settings.y_col.clone());
    let title = settings.title.clone().unwrap_or_else(|| settings.name.clone());

    let _ = writeln!(s, "fig = go.Figure()");
    let _ = writeln!(s, "for path, label in FILES:");
    let _ = writeln!(s, "    df = load(path)");
    let _ = writeln!(
        s,
        "    fig.add_trace(go.Scatter(x=df[{x}], y=df[{y}], name=label, line=dict(width={lw})))",
        x = py_str(&settings.x_col),
        y = py_str(&settings.y_col),
        lw = settings.line_width,
    );
    let _ = writeln!(
        s,
        "fig.update_layout(title={title}, xaxis_title={x}, yaxis_title={y}, showlegend={legend})",
        title = py_str(&title),
        x = py_str(&x_label),
        y = py_str(&y_label),
        legend = if settings.show_legend { "True" } else { "False" },
    );
    let _ = writeln!(s, "fig.update_xaxes(type={})", py_str(&settings.x_scale));
    let _ = writeln!(s, "fig.update_yaxes(type={})", py_str(&settings.y_scale));
    let _ = writeln!(s, "fig.write_html(HERE / {})", py_str(&format!("{}.html", settings.name)));
    let _ = writeln!(s, "fig.show()");
    s
}

/// Generate a self-contained Python script reproducing an XAS
/// normalization and average for one sample/dataset/ROI.
pub fn generate_xas_script(req: &XasScriptRequest) -> String {
    let mut s = script_header(&format!(
        "Reproduces the normalization of {} / {} (ROI '{}').",
        req.sample, req.dataset, req.roi
    ));
    s.push_str(
        "from pathlib import Path\n\n\
         import h5py\n\
         import numpy as np\n\
         from larch import Group\n\
         from larch.xafs import pre_edge\n\n",
    );

    s.push_str("HERE = Path(__file__).resolve().parent\n\n");
    s.push_str("H5_FILES = [\n");
    for f in &req.h5_files {
        let _ = writeln!(s, "    {},", py_str(f));
    }
    s.push_str("]\n\nH5_PATHS = {\n");
    for (name, path) in &req.h5_paths {
        let _ = writeln!(s, "    {}: {},", py_str(name), py_str(path));
    }
    s.push_str("}\n\n");

    let _ = writeln!(s, "PARENT_PATH = {}", py_str(&req.parent_path));
    let _ = writeln!(s, "NUMERATOR = {}", py_str(&req.numerator));
    let _ = writeln!(
        s,
        "DENOMINATOR = {}",
        req.denominator.as_deref().map_or_else(|| "None".to_string(), py_str)
    );
    let _ = writeln!(s, "ENERGY_MIN = {}  # keV", py_opt(req.energy_min));
    let _ = writeln!(s, "ENERGY_MAX = {}  # keV", py_opt(req.energy_max));
    s.push('\n');

    s.push_str("SCANS = [\n");
    for scan in &req.scans {
        let _ = writeln!(
            s,
            "    dict(scan={}, pre1={}, pre2={}, norm1={}, norm2={}, energy_shift={}),",
            py_str(&scan.scan),
            py_opt(scan.pre1),
            py_opt(scan.pre2),
            py_opt(scan.norm1),
            py_opt(scan.norm2),
            scan.energy_shift,
        );
    }
    s.push_str("]\n\n");

    s.push_str(
        "def read_scan(h5, scan, channel):\n\
         \x20   data = h5[scan][PARENT_PATH][H5_PATHS[channel]][\"data\"][:]\n\
         \x20   return np.asarray(data, dtype=float)\n\n\
         def normalize(h5, params):\n\
         \x20   energy = read_scan(h5, params[\"scan\"], \"energy\")\n\
         \x20   mu = read_scan(h5, params[\"scan\"], NUMERATOR)\n\
         \x20   if DENOMINATOR:\n\
         \x20       mu = mu / read_scan(h5, params[\"scan\"], DENOMINATOR)\n\
         \x20   mask = np.ones(len(energy), dtype=bool)\n\
         \x20   if ENERGY_MIN is not None:\n\
         \x20       mask &= energy >= ENERGY_MIN\n\
         \x20   if ENERGY_MAX is not None:\n\
         \x20       mask &= energy <= ENERGY_MAX\n\
         \x20   energy, mu = energy[mask] * 1000.0, mu[mask]\n\
         \x20   energy = energy + params[\"energy_shift\"]\n\
         \x20   dat = Group()\n\
         \x20   dat.energy, dat.mu = energy, mu\n\
         \x20   pre_edge(dat, group=dat, pre1=params[\"pre1\"], pre2=params[\"pre2\"],\n\
         \x20            norm1=params[\"norm1\"], norm2=params[\"norm2\"])\n\
         \x20   return dat\n\n\
         groups = []\n\
         for h5_file in H5_FILES:\n\
         \x20   with h5py.File(HERE / h5_file, \"r\") as h5:\n\
         \x20       for params in SCANS:\n\
         \x20           if params[\"scan\"] in h5:\n\
         \x20               groups.append(normalize(h5, params))\n\n\
         energy = groups[0].energy\n\
         norms = np.array([g.norm for g in groups])\n\
         avg = norms.mean(axis=0)\n\
         std = norms.std(axis=0) if len(groups) > 1 else np.zeros_like(avg)\n\n",
    );

    let out_stem = format!("{}_{}_{}", req.sample, req.dataset, req.roi);
    let _ = writeln!(
        s,
        "np.savetxt(HERE / {}, np.column_stack([energy, avg, std]),\n           header=\"energy_eV norm std\")",
        py_str(&format!("{out_stem}_normalized.dat"))
    );

    match req.backend {
        Some(PlotBackend::Matplotlib) => {
            s.push_str(
                "\nimport matplotlib.pyplot as plt\n\n\
                 fig, ax = plt.subplots(figsize=(8, 5))\n\
                 for g, params in zip(groups, SCANS):\n\
                 \x20   ax.plot(g.energy, g.norm, alpha=0.3, label=params[\"scan\"])\n\
                 ax.plot(energy, avg, color=\"black\", linewidth=2, label=\"average\")\n\
                 ax.set_xlabel(\"Energy (eV)\")\n\
                 ax.set_ylabel(\"Normalized \\u03bc(E)\")\n\
                 ax.legend(fontsize=8)\n\
                 fig.tight_layout()\n",
            );
            let _ = writeln!(s, "fig.savefig(HERE / {}, dpi=300)", py_str(&format!("{out_stem}.png")));
            s.push_str("plt.show()\n");
        }
        Some(PlotBackend::Plotly) => {
            s.push_str(
                "\nimport plotly.graph_objects as go\n\n\
                 fig = go.Figure()\n\
                 for g, params in zip(groups, SCANS):\n\
                 \x20   fig.add_trace(go.Scatter(x=g.energy, y=g.norm, opacity=0.3, name=params[\"scan\"]))\n\
                 fig.add_trace(go.Scatter(x=energy, y=avg, name=\"average\", line=dict(color=\"black\", width=2)))\n\
                 fig.update_layout(xaxis_title=\"Energy (eV)\", yaxis_title=\"Normalized mu(E)\")\n",
            );
            let _ = writeln!(s, "fig.write_html(HERE / {})", py_str(&format!("{out_stem}.html")));
            s.push_str("fig.show()\n");
        }
        None => {}
    }

    s
}
