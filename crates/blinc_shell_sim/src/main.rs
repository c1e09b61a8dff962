//! blinc-shell-sim - run the headless shell simulation

use std::path::PathBuf;

use anyhow::Result;
use blinc_shell_sim::config::CONFIG_FILE_NAME;
use blinc_shell_sim::{run, SimConfig};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "blinc-shell-sim")]
#[command(about = "Simulate engines sharing a merged platform/raster thread pair")]
#[command(version)]
struct Cli {
    /// Config file or directory containing shell-sim.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the number of frames
    #[arg(long)]
    frames: Option<u32>,

    /// Override the number of engines
    #[arg(long)]
    engines: Option<usize>,

    /// Override the lease requested on platform view frames
    #[arg(long)]
    lease_term: Option<usize>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => SimConfig::load_from_path(path)?,
        None => {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() {
                SimConfig::load_from_path(&local)?
            } else {
                SimConfig::default()
            }
        }
    };
    if let Some(frames) = cli.frames {
        config.frames = frames;
    }
    if let Some(engines) = cli.engines {
        config.engines = engines;
    }
    if let Some(lease_term) = cli.lease_term {
        config.lease_term = lease_term;
    }

    let report = run(&config)?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.summary());
    }

    Ok(())
}
