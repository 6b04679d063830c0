pub mod chunk;
pub mod clean;
pub mod compare;
pub mod inventory;
pub mod select;
pub mod status;

use std::path::Path;

use anyhow::{Context, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::info;

use crate::repair::{RepairConfig, RepairPipeline};

pub(crate) fn build_pipeline(repair_config: Option<&Path>) -> Result<RepairPipeline> {
    if let Some(path) = repair_config {
        info!(path = %path.display(), "loading repair vocabulary");
    }
    RepairPipeline::new(RepairConfig::load_or_default(repair_config)?)
}

/// `None` lets rayon size the pool from the available cores.
pub(crate) fn build_thread_pool(jobs: Option<usize>) -> Result<ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(jobs.unwrap_or(0))
        .build()
        .context("failed to build worker thread pool")
}
