use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// How instrument-added noise is removed from a name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenameStrategy {
    /// Delete every occurrence of `token`, e.g. `" (60X)"`. With
    /// `include_files`, files one level below each directory are cleaned too.
    StripToken {
        token: String,
        #[serde(default)]
        include_files: bool,
    },
    /// Keep only the part before the first `" ("`.
    StripBracketedSuffix,
}

impl RenameStrategy {
    fn includes_files(&self) -> bool {
        matches!(
            self,
            RenameStrategy::StripToken {
                include_files: true,
                ..
            }
        )
    }

    /// Cleaned directory name.
    pub fn clean_dir_name(&self, name: &str) -> String {
        match self {
            RenameStrategy::StripToken { token, .. } => strip_token(name, token),
            RenameStrategy::StripBracketedSuffix => match name.split_once(" (") {
                Some((head, _)) => head.to_string(),
                None => name.to_string(),
            },
        }
    }

    /// Cleaned file name. Only the stem is touched; the extension is kept as is.
    pub fn clean_file_name(&self, name: &str) -> String {
        let path = Path::new(name);
        let (stem, extension) = match (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|e| e.to_str()),
        ) {
            (Some(stem), Some(ext)) => (stem, Some(ext)),
            _ => (name, None),
        };
        let stem = self.clean_dir_name(stem);
        match extension {
            Some(ext) => format!("{}.{}", stem, ext),
            None => stem,
        }
    }
}

fn strip_token(name: &str, token: &str) -> String {
    if token.is_empty() {
        name.to_string()
    } else {
        name.replace(token, "")
    }
}

/// One patient's renaming job, as listed in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct RenameRule {
    pub patient: String,
    pub root: PathBuf,
    #[serde(default)]
    pub under_raw_root: bool,
    pub strategy: RenameStrategy,
}

impl RenameRule {
    /// The root this rule works on, which must already exist.
    pub fn resolve_root(&self, raw_root: &Path) -> Result<PathBuf> {
        let root = if self.under_raw_root {
            raw_root.join(&self.root)
        } else {
            self.root.clone()
        };
        root.canonicalize()
            .with_context(|| format!("Root for {} does not exist: {:?}", self.patient, root))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameOp {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// Works out every rename under `root` before any of them runs.
///
/// Files are planned inside their original parent and ordered before the
/// directory renames, so executing the plan front to back never joins a child
/// onto a parent path that has already moved. Names that are already clean
/// produce no operation.
pub fn plan_renames(root: &Path, strategy: &RenameStrategy) -> Result<Vec<RenameOp>> {
    let dirs = sorted_entries(root, |p| p.is_dir())?;

    let mut file_ops = Vec::new();
    if strategy.includes_files() {
        for dir in &dirs {
            for file in sorted_entries(dir, |p| p.is_file())? {
                if let Some(op) = plan_one(&file, |name| strategy.clean_file_name(name)) {
                    file_ops.push(op);
                }
            }
        }
    }

    let dir_ops = dirs
        .iter()
        .filter_map(|dir| plan_one(dir, |name| strategy.clean_dir_name(name)));

    Ok(file_ops.into_iter().chain(dir_ops).collect())
}

fn plan_one<F>(path: &Path, clean: F) -> Option<RenameOp>
where
    F: Fn(&str) -> String,
{
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => {
            warn!("Skipping non UTF-8 name: {:?}", path);
            return None;
        }
    };
    let cleaned = clean(name);
    if cleaned == name {
        return None;
    }
    if cleaned.is_empty() || (cleaned.starts_with('.') && !name.starts_with('.')) {
        warn!("Cleaning {:?} leaves an empty name, leaving it alone", path);
        return None;
    }
    Some(RenameOp {
        from: path.to_path_buf(),
        to: path.with_file_name(cleaned),
    })
}

fn sorted_entries<F>(dir: &Path, keep: F) -> Result<Vec<PathBuf>>
where
    F: Fn(&Path) -> bool,
{
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {:?}", dir))? {
        let path = entry.with_context(|| format!("Failed to read {:?}", dir))?.path();
        if keep(&path) {
            entries.push(path);
        }
    }
    entries.sort();
    Ok(entries)
}

/// Executes a plan in order. An existing target is an error, never overwritten.
pub fn execute_plan(plan: &[RenameOp]) -> Result<usize> {
    for op in plan {
        if op.to.exists() {
            return Err(anyhow!(
                "Cannot rename {:?}: target {:?} already exists",
                op.from,
                op.to
            ));
        }
        fs::rename(&op.from, &op.to)
            .with_context(|| format!("Failed to rename {:?} -> {:?}", op.from, op.to))?;
        info!("Renamed {:?} -> {:?}", op.from, op.to);
    }
    Ok(plan.len())
}

/// Plans and (unless `dry_run`) executes one rule. Returns the number of renames.
pub fn apply_rule(rule: &RenameRule, raw_root: &Path, dry_run: bool) -> Result<usize> {
    let root = rule.resolve_root(raw_root)?;
    info!("{}: cleaning names under {:?}", rule.patient, root);

    let plan = plan_renames(&root, &rule.strategy)?;
    if plan.is_empty() {
        info!("{}: all names already clean", rule.patient);
        return Ok(0);
    }

    if dry_run {
        for op in &plan {
            info!("[dry run] {:?} -> {:?}", op.from, op.to);
        }
        return Ok(plan.len());
    }

    execute_plan(&plan)
}
