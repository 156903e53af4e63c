//! Flattens nested per-well instrument output into one directory per well,
//! copying only the nested directories that pass structural quality control.

pub mod config;
pub mod copy;
pub mod driver;
pub mod error;
pub mod qc;

pub use config::{ChannelMatching, DatasetRecord, PreprocessingConfig, ResolvedDataset};
pub use copy::{process_nested_dir, process_well_dir, NestedStatus, WellStatus};
pub use driver::{run_dataset, DatasetSummary};
pub use error::{RestructureError, SkipReason};
pub use qc::{
    has_consistent_naming, has_equal_images_per_channel, is_image_folder_empty, QcRules,
};
