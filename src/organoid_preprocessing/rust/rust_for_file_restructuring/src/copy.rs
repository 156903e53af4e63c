use crate::error::{RestructureError, SkipReason};
use crate::qc::{
    channel_counts, counts_are_balanced, has_consistent_naming, image_files,
    is_image_folder_empty, QcRules,
};
use std::fmt;
use std::fs::{self, File, FileTimes};
use std::io;
use std::path::{Path, PathBuf};

/// Outcome of one directory nested inside a well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NestedStatus {
    Processed { dir: PathBuf, copied: usize },
    Skipped { dir: PathBuf, reason: SkipReason },
}

impl NestedStatus {
    pub fn copied(&self) -> usize {
        match self {
            NestedStatus::Processed { copied, .. } => *copied,
            NestedStatus::Skipped { .. } => 0,
        }
    }
}

impl fmt::Display for NestedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NestedStatus::Processed { dir, copied } => {
                write!(f, "Processed {} ({} images copied)", dir.display(), copied)
            }
            NestedStatus::Skipped { dir, reason } => {
                write!(f, "Skipping {}: {}", dir.display(), reason)
            }
        }
    }
}

/// Outcome of one well, including what happened to each of its nested directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WellStatus {
    Skipped { well: String, reason: SkipReason },
    Processed { well: String, nested: Vec<NestedStatus> },
}

impl WellStatus {
    pub fn copied(&self) -> usize {
        match self {
            WellStatus::Processed { nested, .. } => nested.iter().map(NestedStatus::copied).sum(),
            WellStatus::Skipped { .. } => 0,
        }
    }
}

impl fmt::Display for WellStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WellStatus::Skipped { well, reason } => write!(f, "Skipping {}: {}", well, reason),
            WellStatus::Processed { well, nested } => {
                let accepted = nested
                    .iter()
                    .filter(|n| matches!(n, NestedStatus::Processed { .. }))
                    .count();
                write!(
                    f,
                    "Processed {}: {}/{} nested directories accepted, {} images copied",
                    well,
                    accepted,
                    nested.len(),
                    self.copied()
                )
            }
        }
    }
}

/// Checks a nested directory and, if it passes, flattens its images into
/// `dest_well_dir`. Failed checks come back as `Ok(Skipped)`; only I/O
/// problems are errors.
pub fn process_nested_dir(
    nested_dir: &Path,
    dest_well_dir: &Path,
    rules: &QcRules,
) -> Result<NestedStatus, RestructureError> {
    match validate_nested_dir(nested_dir, rules) {
        Ok(()) => {}
        Err(e) => {
            return match e.skip_reason() {
                Some(reason) => Ok(NestedStatus::Skipped {
                    dir: nested_dir.to_path_buf(),
                    reason,
                }),
                None => Err(e),
            }
        }
    }

    let mut copied = 0;
    for image in image_files(nested_dir, &rules.extensions)? {
        let excluded = image
            .file_name()
            .map(|n| n.to_string_lossy().contains(rules.exclude_marker.as_str()))
            .unwrap_or(true);
        if excluded {
            continue;
        }
        copy_preserving_metadata(&image, dest_well_dir)?;
        copied += 1;
    }

    Ok(NestedStatus::Processed {
        dir: nested_dir.to_path_buf(),
        copied,
    })
}

fn validate_nested_dir(nested_dir: &Path, rules: &QcRules) -> Result<(), RestructureError> {
    if !nested_dir.is_dir() {
        return Err(RestructureError::NotADirectory(nested_dir.to_path_buf()));
    }
    if is_image_folder_empty(nested_dir, &rules.extensions)? {
        return Err(RestructureError::EmptyImageSet(nested_dir.to_path_buf()));
    }
    let counts = channel_counts(nested_dir, &rules.channels, &rules.extensions)?;
    if !counts_are_balanced(&counts) {
        return Err(RestructureError::ChannelCountMismatch {
            dir: nested_dir.to_path_buf(),
            counts,
        });
    }
    Ok(())
}

/// Copies every accepted nested directory of `well_dir` into `dest_dir/<well name>`.
pub fn process_well_dir(
    well_dir: &Path,
    dest_dir: &Path,
    rules: &QcRules,
) -> Result<WellStatus, RestructureError> {
    let well = well_name(well_dir);

    if !has_consistent_naming(well_dir)? {
        return Ok(WellStatus::Skipped {
            well,
            reason: SkipReason::InconsistentNaming,
        });
    }

    let dest_well_dir = dest_dir.join(&well);
    fs::create_dir_all(&dest_well_dir).map_err(|e| RestructureError::io(&dest_well_dir, e))?;

    let mut children = Vec::new();
    for entry in fs::read_dir(well_dir).map_err(|e| RestructureError::io(well_dir, e))? {
        let entry = entry.map_err(|e| RestructureError::io(well_dir, e))?;
        children.push(entry.path());
    }
    children.sort();

    let nested = children
        .iter()
        .map(|child| process_nested_dir(child, &dest_well_dir, rules))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(WellStatus::Processed { well, nested })
}

pub fn well_name(well_dir: &Path) -> String {
    well_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| well_dir.display().to_string())
}

/// Copies `src` into `dest_dir` under the same file name, keeping permissions
/// and access/modification times. An existing file of that name is replaced,
/// even when an earlier run left it read-only.
pub fn copy_preserving_metadata(src: &Path, dest_dir: &Path) -> Result<PathBuf, RestructureError> {
    let file_name = src.file_name().ok_or_else(|| {
        RestructureError::io(src, io::Error::new(io::ErrorKind::InvalidInput, "no file name"))
    })?;
    let dest = dest_dir.join(file_name);

    if fs::symlink_metadata(&dest).is_ok() {
        fs::remove_file(&dest).map_err(|e| RestructureError::io(&dest, e))?;
    }
    fs::copy(src, &dest).map_err(|e| RestructureError::io(src, e))?;

    let metadata = fs::metadata(src).map_err(|e| RestructureError::io(src, e))?;
    let mut times = FileTimes::new();
    if let Ok(accessed) = metadata.accessed() {
        times = times.set_accessed(accessed);
    }
    if let Ok(modified) = metadata.modified() {
        times = times.set_modified(modified);
    }
    // Explicit times need ownership of the file, not write access.
    File::open(&dest)
        .and_then(|f| f.set_times(times))
        .map_err(|e| RestructureError::io(&dest, e))?;

    Ok(dest)
}
