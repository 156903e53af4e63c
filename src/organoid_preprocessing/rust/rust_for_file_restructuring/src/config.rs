use crate::error::RestructureError;
use crate::qc::{ChannelMatcher, ImageExtensions, QcRules};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Raw instrument output roots, one per compute environment.
#[derive(Debug, Clone, Deserialize)]
pub struct ComputeRoots {
    pub local: PathBuf,
    pub hpc: PathBuf,
}

/// How a channel token is located in a file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMatching {
    /// Token may appear anywhere; a name holding two tokens counts for both.
    #[default]
    Substring,
    /// Token must be bounded by non-alphanumeric characters or the name ends.
    Delimited,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetRecord {
    pub name: String,
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// A dataset whose source root has been located on disk.
#[derive(Debug, Clone)]
pub struct ResolvedDataset {
    pub name: String,
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl DatasetRecord {
    /// Joins the source onto the raw root and requires it to exist.
    pub fn resolve(&self, raw_root: &Path) -> Result<ResolvedDataset, RestructureError> {
        let joined = raw_root.join(&self.source);
        let source = joined
            .canonicalize()
            .map_err(|e| RestructureError::io(&joined, e))?;
        Ok(ResolvedDataset {
            name: self.name.clone(),
            source,
            destination: self.destination.clone(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreprocessingConfig {
    pub compute_roots: ComputeRoots,
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
    #[serde(default)]
    pub channel_matching: ChannelMatching,
    #[serde(default = "default_exclude_marker")]
    pub exclude_marker: String,
    pub datasets: Vec<DatasetRecord>,
}

fn default_channels() -> Vec<String> {
    ["405", "488", "555", "640", "TRANS", "Merge"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_image_extensions() -> Vec<String> {
    vec!["tif".to_string(), "tiff".to_string()]
}

fn default_exclude_marker() -> String {
    "Tile".to_string()
}

impl PreprocessingConfig {
    pub fn load(path: &Path) -> Result<Self, RestructureError> {
        let content = fs::read_to_string(path).map_err(|e| RestructureError::io(path, e))?;
        Self::from_json(&content, path)
    }

    fn from_json(content: &str, path: &Path) -> Result<Self, RestructureError> {
        serde_json::from_str(content).map_err(|source| RestructureError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn raw_root(&self, hpc: bool) -> &Path {
        if hpc {
            &self.compute_roots.hpc
        } else {
            &self.compute_roots.local
        }
    }

    pub fn qc_rules(&self) -> Result<QcRules, RestructureError> {
        Ok(QcRules {
            channels: ChannelMatcher::new(&self.channels[..], self.channel_matching)?,
            extensions: ImageExtensions::new(&self.image_extensions[..]),
            exclude_marker: self.exclude_marker.clone(),
        })
    }
}
