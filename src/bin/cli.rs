//! Mirror Monitor CLI
//!
//! Local execution entry point: schedule the fleet, run it once, or work on
//! stored snapshot files directly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use mirror_monitor::{
    error::{AppError, Result},
    models::{Config, Diff, MirrorTree},
    pipeline::{DeltaEngine, DiffEngine, Monitor},
    storage::{DocumentStore, LATEST_DIFFS_COLLECTION, LocalStorage, SnapshotRepository},
    utils::log as report,
};

/// Mirror Monitor - FTP/SFTP/HTTP mirror fleet checker
#[derive(Parser, Debug)]
#[command(
    name = "mirror-monitor",
    version,
    about = "Crawls mirrors and compares them against their master"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "data/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Schedule every mirror and run until Ctrl-C
    Run,

    /// Run the pipeline once now
    Crawl {
        /// Only this mirror (default: master first, then every secondary)
        #[arg(long)]
        mirror: Option<String>,
    },

    /// Diff two stored trees
    Diff {
        master: PathBuf,
        mirror: PathBuf,

        /// Report every missing node, not only the top of each subtree
        #[arg(long)]
        exhaustive: bool,
    },

    /// Compute the delta between two stored trees of the same mirror
    Delta {
        older: PathBuf,
        newer: PathBuf,

        /// Write the delta document here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate the configuration file
    Validate,

    /// Show every configured mirror's last visit and error, then the latest stored diffs
    Status,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool, configured: &str) {
    let level = if verbose { "debug" } else { configured };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn read_tree(path: &Path) -> Result<MirrorTree> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = Config::load(&cli.config);
    let level = loaded
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());
    init_logging(cli.verbose, &level);

    match cli.command {
        Command::Run => {
            let config = loaded?;
            let monitor = Arc::new(Monitor::from_config(&config)?);
            let mut scheduler = monitor.start()?;
            log::info!("Monitoring {} mirrors, press Ctrl-C to stop", monitor.mirror_names().len());

            tokio::signal::ctrl_c().await?;
            log::info!("Shutting down...");
            scheduler.shutdown();
        }

        Command::Crawl { mirror } => {
            let config = loaded?;
            let monitor = Monitor::from_config(&config)?;
            let runs = match mirror {
                Some(name) => vec![(name.clone(), monitor.run_mirror(&name).await)],
                None => monitor.run_once_all().await,
            };

            report::header("Crawl results");
            let mut failed = 0usize;
            for (name, result) in &runs {
                match result {
                    Ok(Some(outcome)) => {
                        report::sub_item(&format!("{name}: stored {}", outcome.stored_id));
                        if let Some(diff) = &outcome.diff {
                            report::block(&diff.report());
                        }
                    }
                    Ok(None) => report::sub_item(&format!("{name}: skipped, already running")),
                    Err(e) => {
                        failed += 1;
                        report::sub_item(&format!("{name}: FAILED {e}"));
                    }
                }
            }
            report::summary(
                "Crawl",
                &[
                    ("Mirrors", runs.len().to_string()),
                    ("Failed", failed.to_string()),
                ],
            );
        }

        Command::Diff {
            master,
            mirror,
            exhaustive,
        } => {
            let master = read_tree(&master)?;
            let mirror = read_tree(&mirror)?;
            let engine = if exhaustive {
                DiffEngine::exhaustive()
            } else {
                DiffEngine::new()
            };
            let diff = engine.diff(&master, &mirror);

            report::header(&format!("{} against {}", mirror.mirror_id, master.mirror_id));
            for entry in &diff.entries {
                report::sub_item(&entry.to_string());
            }
            report::block(&diff.stats().report());
        }

        Command::Delta {
            older,
            newer,
            output,
        } => {
            let older = read_tree(&older)?;
            let newer = read_tree(&newer)?;
            if older.mirror_id != newer.mirror_id {
                return Err(AppError::validation(format!(
                    "trees belong to different mirrors ({} and {})",
                    older.mirror_id, newer.mirror_id
                )));
            }
            let delta = DeltaEngine::new().compute(&older, &newer);
            report::block(&delta.report());

            if let Some(path) = output {
                std::fs::write(&path, serde_json::to_string_pretty(&delta)?)?;
                log::info!("Delta saved to {}", path.display());
            }
        }

        Command::Validate => {
            log::info!("Validating {}...", cli.config.display());
            let config = loaded?;
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!(
                "✓ Config OK (master plus {} mirrors)",
                config.mirrors.len()
            );
        }

        Command::Status => {
            let config = loaded?;
            let store: Arc<dyn DocumentStore> = Arc::new(LocalStorage::new(&config.storage.root));
            let repository = SnapshotRepository::new(Arc::clone(&store));

            let mut mirrors = vec![config.master_mirror()?];
            mirrors.extend(config.secondary_mirrors());
            report::header("Mirrors");
            for status in repository.stored_status(&mirrors).await? {
                report::sub_item(&format!(
                    "{} ({}): last visit {}, {} runs, {} failed",
                    status.name,
                    status.role,
                    status.last_visit_display(),
                    status.runs,
                    status.failures
                ));
                if let Some(error) = &status.last_error {
                    report::sub_item(&format!("    last error: {error}"));
                }
            }

            let ids = store.list(LATEST_DIFFS_COLLECTION).await?;
            if ids.is_empty() {
                log::info!("No diff stored yet.");
            }
            for id in ids {
                let Some(diff): Option<Diff> = repository.latest_diff(&id.mirror_id).await? else {
                    continue;
                };
                report::header(&diff.mirror_id);
                report::sub_item(&format!(
                    "Crawled {} against master of {}",
                    diff.mirror_timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
                    diff.reference_timestamp.format("%Y-%m-%d %H:%M:%S UTC")
                ));
                report::block(&diff.stats().report());
            }
        }
    }

    log::info!("Done!");

    Ok(())
}
