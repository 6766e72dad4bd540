use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use lumen_config::LumenConfig;
use lumen_model::ItemId;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod check;
mod dedupe;
mod inspect;
mod simulate;

#[derive(Parser)]
#[command(name = "lumenctl", about = "Lumen preloader operator tool", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load and validate configuration, printing guard-rail warnings
    CheckConfig {
        /// Config file to check instead of the usual search order
        #[arg(long)]
        path: Option<PathBuf>,
        /// Print the normalized configuration as TOML
        #[arg(long)]
        show: bool,
        /// Exit with an error when any warning is raised
        #[arg(long)]
        strict: bool,
    },
    /// Replay a JSON interaction trace and print the profile and predictions
    Simulate {
        /// Trace file: {"device", "network", "events": [...]}
        #[arg(long)]
        trace: PathBuf,
        /// Number of predictions to print
        #[arg(long, default_value_t = 5)]
        predict: usize,
        /// Predict from this item instead of the last viewed one
        #[arg(long)]
        from: Option<String>,
    },
    /// Fingerprint local files and list duplicate pairs
    Dedupe {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Minimum filename similarity for a fuzzy match (0..=1)
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Summarize a cache snapshot file
    SnapshotInspect { file: PathBuf },
}

fn load_config() -> Result<LumenConfig> {
    let (config, source) = LumenConfig::load_from_env()?;
    tracing::debug!(%source, "configuration loaded");
    Ok(config.into_normalized())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::CheckConfig { path, show, strict } => {
            let report = check::check(path.as_deref())?;
            print!("{}", check::render(&report, show)?);
            if strict && !report.warnings.is_empty() {
                bail!("{} configuration warning(s)", report.warnings.len());
            }
        }
        Command::Simulate {
            trace,
            predict,
            from,
        } => {
            let config = load_config()?;
            let trace = simulate::load_trace(&trace)?;
            let report = simulate::replay(
                trace,
                config.behavior,
                config.prediction,
                from.map(ItemId::new),
                predict,
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Dedupe { files, threshold } => {
            let mut config = load_config()?.duplicates;
            if let Some(threshold) = threshold {
                if !(0.0..=1.0).contains(&threshold) {
                    bail!("--threshold must be within 0..=1, got {threshold}");
                }
                config.similarity_threshold = threshold;
            }
            let pairs = dedupe::scan(&files, config)?;
            tracing::info!(files = files.len(), pairs = pairs.len(), "duplicate scan finished");
            println!("{}", serde_json::to_string_pretty(&pairs)?);
        }
        Command::SnapshotInspect { file } => {
            let summary = inspect::inspect(&file, chrono::Utc::now()).await?;
            if !summary.supported {
                tracing::warn!(
                    version = summary.version,
                    "snapshot version is not restorable by this build"
                );
            }
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
