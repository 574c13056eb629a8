use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use operando::export::{session_export, ExportFormat, ExportOptions};
use operando::parsers;

pub fn run(files: Vec<PathBuf>, output: PathBuf, csv: bool) -> Result<()> {
    let mut datasets = Vec::new();
    let mut failures = 0usize;
    for file in &files {
        match parsers::parse_path(file) {
            Ok(dataset) => {
                log::info!("parsed {}", dataset.filename);
                datasets.push(dataset);
            }
            Err(err) => {
                // Batch semantics: report and continue with the rest.
                eprintln!("error: {err}");
                failures += 1;
            }
        }
    }
    if datasets.is_empty() {
        bail!("no parsable input files");
    }

    let opts = ExportOptions {
        format: if csv { ExportFormat::Csv } else { ExportFormat::Parquet },
        ..Default::default()
    };
    let bytes = session_export(&datasets, &opts)?;
    std::fs::write(&output, bytes)
        .with_context(|| format!("writing {}", output.display()))?;

    println!(
        "wrote {} ({} dataset(s), {} failed)",
        output.display(),
        datasets.len(),
        failures
    );
    Ok(())
}
