//! Command-line driver: run scroll scripts and print decision traces.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use viewplay::simulate::{ScrollScript, Simulation};
use viewplay::CoordinatorConfig;

#[derive(Parser)]
#[command(name = "viewplay")]
#[command(version)]
#[command(about = "Viewport-driven media playback coordination")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scroll script and print the resulting decision trace
    Simulate {
        /// Path to the scroll script (JSON)
        #[arg(short, long)]
        script: PathBuf,

        /// Coordinator configuration file (JSON); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print only the SHA-256 digest of the trace
        #[arg(long)]
        digest: bool,
    },
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Simulate {
            script,
            config,
            digest,
        } => simulate(&script, config.as_deref(), digest),
    }
}

fn simulate(
    script_path: &Path,
    config_path: Option<&Path>,
    digest_only: bool,
) -> Result<(), anyhow::Error> {
    let json = fs::read_to_string(script_path)
        .with_context(|| format!("reading script {}", script_path.display()))?;
    let script = ScrollScript::from_json(&json)?;

    let config = match config_path {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let config: CoordinatorConfig = serde_json::from_str(&json)
                .with_context(|| format!("parsing config {}", path.display()))?;
            config
        }
        None => CoordinatorConfig::default(),
    };

    let trace = Simulation::new(script, config)?.run();
    if digest_only {
        println!("{}", trace.digest());
    } else {
        print!("{}", trace.render());
    }
    Ok(())
}
