//! Harvest orchestration: pagination walk, Parquet append, watermark commit.

pub mod config;
pub mod dataset;
pub mod harvest;
pub mod walker;

pub use config::HarvestConfig;
pub use dataset::{AppendedPart, DatasetWriter};
pub use harvest::{commit, run_once_from_env, HarvestReport, Harvester};
pub use walker::{StopReason, WalkResult, Walker};

pub const CRATE_NAME: &str = "licita-sync";
