// src/main.rs
mod rename;

use anyhow::{anyhow, Context, Result};
use env_logger::{Builder, Env};
use log::{error, info, warn};
use rename::{apply_rule, RenameRule};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "patient_rename",
    about = "Strip instrument-added suffixes from patient directory and file names"
)]
struct Opt {
    /// Use the HPC raw image root instead of the local one
    #[structopt(long = "hpc")]
    hpc: bool,

    /// Config file holding the rename table (JSON)
    #[structopt(short = "c", long = "config", parse(from_os_str), default_value = "config/preprocessing.json")]
    config: PathBuf,

    /// Only apply the rules of these patients (repeatable, default = all)
    #[structopt(short = "p", long = "patient")]
    patients: Vec<String>,

    /// Log the planned renames without touching the filesystem
    #[structopt(long = "dry-run")]
    dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct ComputeRoots {
    local: PathBuf,
    hpc: PathBuf,
}

/// The parts of the shared preprocessing config the renamer reads.
#[derive(Debug, Clone, Deserialize)]
struct RenameConfig {
    compute_roots: ComputeRoots,
    #[serde(default)]
    rename: Vec<RenameRule>,
}

impl RenameConfig {
    fn load(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read config {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config {:?}", path))
    }

    fn raw_root(&self, hpc: bool) -> &Path {
        if hpc {
            &self.compute_roots.hpc
        } else {
            &self.compute_roots.local
        }
    }
}

fn main() -> Result<()> {
    // Initialize env_logger
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    builder.init();

    let opt = Opt::from_args();
    info!("HPC: {}", opt.hpc);

    let config = RenameConfig::load(&opt.config)?;
    let raw_root = config.raw_root(opt.hpc);
    info!("Raw image root: {:?}", raw_root);

    for patient in &opt.patients {
        if !config.rename.iter().any(|r| &r.patient == patient) {
            warn!("No rename rule for patient {}", patient);
        }
    }

    let mut renamed = 0;
    let mut failed = 0;
    for rule in &config.rename {
        if !opt.patients.is_empty() && !opt.patients.contains(&rule.patient) {
            continue;
        }
        match apply_rule(rule, raw_root, opt.dry_run) {
            Ok(count) => {
                info!("{}: {} entries renamed", rule.patient, count);
                renamed += count;
            }
            Err(e) => {
                error!("{}: {:#}", rule.patient, e);
                failed += 1;
            }
        }
    }

    info!("All done! {} entries renamed", renamed);
    if failed > 0 {
        return Err(anyhow!("{} rename rule(s) failed", failed));
    }
    Ok(())
}
