//! # operando server & tools
//!
//! Command-line entry point: run the HTTP service, inspect a measurement
//! file, or pack measurement files into an export container.
//!
//! ## Usage
//!
//! ```bash
//! # Run the service
//! operando serve --config operando.toml
//!
//! # Summarize a measurement file
//! operando inspect CA_sample_01_CA.mpr
//!
//! # Pack files into a session container
//! operando export run1.mpr run2.dta -o session.zip
//! ```

mod cli;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli::init_logging(cli.verbosity());
    cli::dispatch(cli)
}
