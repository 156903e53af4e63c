use crate::config::{DatasetRecord, ResolvedDataset};
use crate::copy::{process_well_dir, well_name, WellStatus};
use crate::error::RestructureError;
use crate::qc::{child_dirs, QcRules};
use anyhow::{Context, Result};
use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use rayon::prelude::*;
use std::fs;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};

/// Result of one well once it has gone through the pool.
#[derive(Debug)]
pub enum WellResult {
    Done(WellStatus),
    Failed { well: String, error: String },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DatasetSummary {
    pub processed_wells: usize,
    pub skipped_wells: usize,
    pub failed_wells: usize,
    pub copied_images: usize,
}

impl DatasetSummary {
    pub fn from_results(results: &[WellResult]) -> Self {
        let mut summary = DatasetSummary::default();
        for result in results {
            match result {
                WellResult::Done(status @ WellStatus::Processed { .. }) => {
                    summary.processed_wells += 1;
                    summary.copied_images += status.copied();
                }
                WellResult::Done(WellStatus::Skipped { .. }) => summary.skipped_wells += 1,
                WellResult::Failed { .. } => summary.failed_wells += 1,
            }
        }
        summary
    }

    pub fn total_wells(&self) -> usize {
        self.processed_wells + self.skipped_wells + self.failed_wells
    }
}

/// Pool size for `available` cores: two are left free, never fewer than one worker.
pub fn worker_count(available: usize) -> usize {
    available.saturating_sub(2).max(1)
}

pub fn default_worker_count() -> usize {
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    worker_count(available)
}

/// Well directories directly under a dataset source root.
pub fn list_well_dirs(source: &Path) -> Result<Vec<PathBuf>, RestructureError> {
    child_dirs(source)
}

/// Runs one well, turning both errors and panics into `WellResult::Failed`
/// so a single bad well never takes its siblings down.
pub fn run_isolated<F>(well_dir: &Path, work: F) -> WellResult
where
    F: FnOnce() -> Result<WellStatus, RestructureError>,
{
    let well = well_name(well_dir);
    match std::panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(Ok(status)) => WellResult::Done(status),
        Ok(Err(e)) => WellResult::Failed {
            well,
            error: e.to_string(),
        },
        Err(_) => WellResult::Failed {
            well,
            error: "panic while processing well".to_string(),
        },
    }
}

/// Copies every well of `dataset` in parallel on the current rayon pool.
/// Returns `None` when the source holds no well directories.
pub fn run_dataset(dataset: &ResolvedDataset, rules: &QcRules) -> Result<Option<DatasetSummary>> {
    info!(
        "Processing {}: {:?} -> {:?}",
        dataset.name, dataset.source, dataset.destination
    );

    fs::create_dir_all(&dataset.destination)
        .with_context(|| format!("Failed to create destination {:?}", dataset.destination))?;

    let well_dirs = list_well_dirs(&dataset.source)
        .with_context(|| format!("Failed to list wells in {:?}", dataset.source))?;
    if well_dirs.is_empty() {
        warn!("Skipping {}: No well directories found", dataset.name);
        return Ok(None);
    }
    info!("Found {} well directories for {}", well_dirs.len(), dataset.name);

    let style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
        .progress_chars("#>-");
    let pb = ProgressBar::new(well_dirs.len() as u64);
    pb.set_style(style);
    pb.set_message(format!("Processing {}", dataset.name));

    let results: Vec<WellResult> = well_dirs
        .par_iter()
        .map(|well_dir| {
            let result = run_isolated(well_dir, || {
                process_well_dir(well_dir, &dataset.destination, rules)
            });
            log_well_result(&result);
            pb.inc(1);
            result
        })
        .collect();

    pb.finish_and_clear();

    let summary = DatasetSummary::from_results(&results);
    write_processing_info(dataset, &summary)?;
    info!(
        "Completed processing {}: {} processed, {} skipped, {} failed, {} images copied",
        dataset.name,
        summary.processed_wells,
        summary.skipped_wells,
        summary.failed_wells,
        summary.copied_images
    );
    Ok(Some(summary))
}

/// Failure counts across a whole run of datasets.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunTotals {
    pub unresolved: usize,
    pub failed_datasets: usize,
    pub failed_wells: usize,
}

impl RunTotals {
    pub fn is_clean(&self) -> bool {
        self.unresolved == 0 && self.failed_datasets == 0 && self.failed_wells == 0
    }
}

/// Runs the `selected` datasets (all when empty) one after another. A dataset
/// that cannot be resolved or fails as a whole is logged and counted, and the
/// next one still runs.
pub fn run_datasets(
    records: &[DatasetRecord],
    raw_root: &Path,
    selected: &[String],
    rules: &QcRules,
) -> RunTotals {
    let mut totals = RunTotals::default();

    for record in records {
        if !selected.is_empty() && !selected.contains(&record.name) {
            continue;
        }

        let dataset = match record.resolve(raw_root) {
            Ok(d) => d,
            Err(e) => {
                error!("Skipping {}: {}", record.name, e);
                totals.unresolved += 1;
                continue;
            }
        };

        match run_dataset(&dataset, rules) {
            Ok(Some(summary)) => totals.failed_wells += summary.failed_wells,
            Ok(None) => {}
            Err(e) => {
                error!("Error processing {}: {:#}", dataset.name, e);
                totals.failed_datasets += 1;
            }
        }
    }

    totals
}

fn log_well_result(result: &WellResult) {
    match result {
        WellResult::Done(status @ WellStatus::Processed { nested, .. }) => {
            info!("{}", status);
            for n in nested {
                info!("  {}", n);
            }
        }
        WellResult::Done(status) => warn!("{}", status),
        WellResult::Failed { well, error: e } => error!("Error processing well {}: {}", well, e),
    }
}

fn write_processing_info(dataset: &ResolvedDataset, summary: &DatasetSummary) -> Result<()> {
    let info_content = format!(
        "Run at: {}\nDataset: {}\nSource: {}\nTotal wells: {}\nProcessed wells: {}\nSkipped wells: {}\nFailed wells: {}\nImages copied: {}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        dataset.name,
        dataset.source.display(),
        summary.total_wells(),
        summary.processed_wells,
        summary.skipped_wells,
        summary.failed_wells,
        summary.copied_images
    );
    let path = dataset.destination.join("processing_info.txt");
    fs::write(&path, info_content).with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}
