use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod export;
mod inspect;
mod serve;

/// operando - Electrochemistry & XAS Lab Data Service
#[derive(Parser)]
#[command(name = "operando")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// Load settings from a TOML config file
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Override the bind address from the config
        #[arg(short, long, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Parse a measurement file and print a summary
    Inspect {
        /// Input .mpr or .dta file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Pack measurement files into a session export container
    Export {
        /// Input .mpr / .dta files
        #[arg(value_name = "FILES", required = true)]
        files: Vec<PathBuf>,

        /// Output zip path
        #[arg(short, long, default_value = "session_export.zip")]
        output: PathBuf,

        /// Write CSV data files instead of Parquet
        #[arg(long)]
        csv: bool,
    },
}

impl Cli {
    pub fn verbosity(&self) -> u8 {
        self.verbose
    }
}

pub fn init_logging(verbosity: u8) {
    let log_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();
}

pub fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve { config, bind } => serve::run(config, bind),
        Commands::Inspect { file } => inspect::run(file),
        Commands::Export { files, output, csv } => export::run(files, output, csv),
    }
}
