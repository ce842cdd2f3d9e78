//! Cluster-node entry point: process one package
//!
//! Example:
//!   knnpack --input /tmp/divided/package00004/package00004_descriptor.json \
//!           --max-k 100 --distance-function euclidean --multithreading

use clap::Parser;
use knnpack::distance::metric_by_name;
use knnpack::{PackageRunner, ProcessorConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "knnpack", version, about = "Compute k-NN distance lists for one package")]
struct Args {
    /// Path of the package descriptor
    #[arg(short, long)]
    input: PathBuf,

    /// Number of neighbors to keep per point
    #[arg(long = "max-k")]
    max_k: usize,

    /// Distance function: euclidean, squared-euclidean, manhattan, cosine
    #[arg(long = "distance-function", default_value = "euclidean")]
    distance_function: String,

    /// Use as many worker threads as there are cpus (default is one)
    #[arg(long)]
    multithreading: bool,

    /// Log at debug level instead of info
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let metric = match metric_by_name(&args.distance_function) {
        Ok(metric) => metric,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let mut config = ProcessorConfig::new(args.max_k);
    config.multithreading = args.multithreading;

    let runner = PackageRunner::new(args.input, config, Arc::from(metric));
    match runner.run() {
        Ok(summary) => {
            tracing::info!(
                "done: {} pairings processed, {} skipped",
                summary.tasks_run,
                summary.skipped
            );
        }
        Err(e) => {
            tracing::error!("processing failed: {}", e);
            std::process::exit(1);
        }
    }
}
