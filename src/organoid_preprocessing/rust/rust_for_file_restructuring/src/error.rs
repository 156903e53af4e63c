use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Everything that can stop a well or a nested directory from being copied.
///
/// The first four variants are quality-control outcomes: the unit is skipped
/// and the run carries on. The rest are real failures that abort the unit of
/// work they happened in.
#[derive(Debug, thiserror::Error)]
pub enum RestructureError {
    #[error("{0:?} is not a directory")]
    NotADirectory(PathBuf),

    #[error("inconsistent nested folder names within well {well}")]
    InconsistentNaming { well: String },

    #[error("no images found under {0:?}")]
    EmptyImageSet(PathBuf),

    #[error("unequal images per channel under {dir:?}: {}", format_counts(.counts))]
    ChannelCountMismatch {
        dir: PathBuf,
        counts: BTreeMap<String, usize>,
    },

    #[error("filesystem error at {path:?}: {source}")]
    FilesystemIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Walk(#[from] walkdir::Error),

    #[error("invalid config {path:?}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid channel pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl RestructureError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        RestructureError::FilesystemIo {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Quality-control failures are skips, not errors.
    pub fn is_recoverable(&self) -> bool {
        self.skip_reason().is_some()
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            RestructureError::NotADirectory(_) => Some(SkipReason::NotADirectory),
            RestructureError::InconsistentNaming { .. } => Some(SkipReason::InconsistentNaming),
            RestructureError::EmptyImageSet(_) => Some(SkipReason::NoImages),
            RestructureError::ChannelCountMismatch { counts, .. } => {
                Some(SkipReason::UnequalChannels {
                    counts: counts.clone(),
                })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotADirectory,
    InconsistentNaming,
    NoImages,
    UnequalChannels { counts: BTreeMap<String, usize> },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotADirectory => write!(f, "Not a directory"),
            SkipReason::InconsistentNaming => {
                write!(f, "Inconsistent nested folder names within well")
            }
            SkipReason::NoImages => write!(f, "No images found"),
            SkipReason::UnequalChannels { counts } => {
                write!(f, "Unequal images per channel ({})", format_counts(counts))
            }
        }
    }
}

fn format_counts(counts: &BTreeMap<String, usize>) -> String {
    counts
        .iter()
        .map(|(channel, count)| format!("{}: {}", channel, count))
        .collect::<Vec<_>>()
        .join(", ")
}
