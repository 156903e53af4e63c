// src/main.rs
use anyhow::{anyhow, Result};
use env_logger::{Builder, Env};
use log::{info, warn};
use rayon::ThreadPoolBuilder;
use restructure_files::driver::{default_worker_count, run_datasets};
use restructure_files::PreprocessingConfig;
use std::path::PathBuf;
use std::time::Instant;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "restructure_files",
    about = "Copy nested per-well images into one flat folder per well"
)]
struct Opt {
    /// Use the HPC raw image root instead of the local one
    #[structopt(long = "hpc")]
    hpc: bool,

    /// Dataset table (JSON)
    #[structopt(short = "c", long = "config", parse(from_os_str), default_value = "config/preprocessing.json")]
    config: PathBuf,

    /// Only process these datasets (repeatable, default = all)
    #[structopt(short = "d", long = "dataset")]
    datasets: Vec<String>,

    /// Number of wells processed in parallel (default = available cores minus 2)
    #[structopt(short = "w", long = "workers")]
    workers: Option<usize>,
}

fn main() -> Result<()> {
    let start_time = Instant::now();

    // Initialize env_logger
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    builder.init();

    let opt = Opt::from_args();
    info!("HPC: {}", opt.hpc);

    let config = PreprocessingConfig::load(&opt.config)?;
    let rules = config.qc_rules()?;
    let raw_root = config.raw_root(opt.hpc);
    info!("Raw image root: {:?}", raw_root);
    info!(
        "Channels: {:?}, matching: {:?}",
        config.channels, config.channel_matching
    );

    let workers = opt.workers.unwrap_or_else(default_worker_count).max(1);
    ThreadPoolBuilder::new()
        .num_threads(workers)
        .build_global()
        .map_err(|e| anyhow!("Failed to build thread pool: {:?}", e))?;
    info!("Initialized thread pool with {} threads", workers);

    for name in &opt.datasets {
        if !config.datasets.iter().any(|d| &d.name == name) {
            warn!("Dataset {} is not in {:?}", name, opt.config);
        }
    }

    let totals = run_datasets(&config.datasets, raw_root, &opt.datasets, &rules);

    let elapsed = start_time.elapsed();
    info!("All done! Processing completed in {:.2} seconds", elapsed.as_secs_f64());

    if !totals.is_clean() {
        return Err(anyhow!(
            "{} dataset(s) could not be resolved, {} dataset(s) failed and {} well(s) failed",
            totals.unresolved,
            totals.failed_datasets,
            totals.failed_wells
        ));
    }
    Ok(())
}
