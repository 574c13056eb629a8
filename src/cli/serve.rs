use std::path::PathBuf;

use anyhow::{Context, Result};

use operando::config::AppConfig;
use operando::server;

pub fn run(config_path: Option<PathBuf>, bind: Option<String>) -> Result<()> {
    let mut config = match config_path {
        Some(path) => AppConfig::from_file(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => AppConfig::default(),
    };
    if let Some(bind) = bind {
        config.bind_address = bind;
    }

    tokio::runtime::Runtime::new()
        .context("starting async runtime")?
        .block_on(server::serve(config))
}
