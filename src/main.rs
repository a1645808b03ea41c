use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;

use exosweep::cache::ArtifactStore;
use exosweep::config::{DataPaths, SweepSettings};
use exosweep::sweep::{default_factory, sweep, SweepGrid, SweepVariable};

#[derive(Parser)]
#[command(name = "exosweep", version, about = "Threshold-sweep evaluation of transit light-curve classifiers")]
struct Cli {
    /// Base data directory; overrides the EXOSWEEP_DATA_PATH environment
    /// variable.
    #[arg(long, global = true)]
    data_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a vary-one hyperparameter sweep and write per-repeat run records.
    Sweep {
        /// Variable to vary; all others are pinned at their grid midpoint.
        /// One of: num-bins, depth, noise, num-series, positive-fraction,
        /// batch-size, layer-count, layer-width, dropout.
        #[arg(long)]
        variable: SweepVariable,

        /// Independent repetitions per grid point.
        #[arg(long, default_value_t = 1)]
        repetitions: u32,

        /// Recompute and overwrite cached artifacts even on a hit.
        #[arg(long)]
        overwrite: bool,
    },

    /// Print artifact cache entry counts and size.
    CacheStats,
}

fn resolve_paths(data_root: Option<PathBuf>) -> Result<DataPaths> {
    match data_root {
        Some(root) => Ok(DataPaths::at(root)),
        None => DataPaths::from_env(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = resolve_paths(cli.data_root)?;

    match cli.command {
        Command::Sweep {
            variable,
            repetitions,
            overwrite,
        } => {
            let settings = SweepSettings::load(&std::env::current_dir()?);
            let grid = SweepGrid::default();
            let store = ArtifactStore::open(&paths.cache_dir())?;
            let factory = default_factory();

            let report = sweep(
                &grid,
                variable,
                factory.as_ref(),
                repetitions,
                &settings,
                &paths,
                &store,
                overwrite,
            )?;

            println!();
            println!("{} {}", "run".green().bold(), report.run_id.bold());
            for record in &report.records {
                let auc = match record.auc {
                    Some(a) => format!("{:.4}", a),
                    None => "cached".to_string(),
                };
                println!(
                    "  {} = {:<10} rep {}  auc {}  pr points {}",
                    record.variable,
                    record.value,
                    record.repetition,
                    auc.cyan(),
                    record.pr_test.len()
                );
            }
            let stats = store.stats();
            println!(
                "{} {} bin / {} metric entries, {}",
                "cache".green().bold(),
                stats.bin_entries,
                stats.metric_entries,
                stats.size_human()
            );
        }

        Command::CacheStats => {
            let store = ArtifactStore::open(&paths.cache_dir())?;
            let stats = store.stats();
            println!("{}", "artifact cache".green().bold());
            println!("  binned views  {}", stats.bin_entries);
            println!("  metric grids  {}", stats.metric_entries);
            println!("  size          {}", stats.size_human());
        }
    }

    Ok(())
}
