// src/config.rs

//! Construction-time tuning for the pixel pipeline.
//!
//! A config can be deserialized from JSON; any missing field takes its
//! default value.

use crate::error::PipelineError;
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunable parameters for a [`PixelPipeline`](crate::PixelPipeline).
///
/// # Invariants
///
/// - `fragment_size >= 1`
/// - `queue_capacity > fragment_size`
/// - `min_block_size >= 64`
/// - `num_workers`, when set, is `>= 1`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Slots in the command ring. One slot always stays free, so at most
    /// `queue_capacity - 1` commands are in flight.
    ///
    /// **Default: 1024**
    pub queue_capacity: usize,

    /// Commands between publications of the writer index (and between
    /// publications of each worker's reader index).
    ///
    /// Larger fragments mean fewer atomic stores and wakeups but more latency
    /// before workers see new commands.
    ///
    /// **Default: 8**
    pub fragment_size: usize,

    /// Smallest arena block, in bytes. Larger commands get a block of their own
    /// size.
    ///
    /// **Default: 16 KiB**
    pub min_block_size: usize,

    /// Worker thread count. `None` uses the detected core count.
    pub num_workers: Option<usize>,

    /// Workers are named `"{prefix}-{core}"`.
    pub thread_name_prefix: String,
}

impl PipelineConfig {
    pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
    pub const DEFAULT_FRAGMENT_SIZE: usize = 8;
    pub const DEFAULT_MIN_BLOCK_SIZE: usize = 16 * 1024;

    /// Check the invariants listed on the type.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.fragment_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "fragment_size must be >= 1".to_string(),
            ));
        }
        if self.queue_capacity <= self.fragment_size {
            return Err(PipelineError::InvalidConfig(format!(
                "queue_capacity ({}) must be greater than fragment_size ({})",
                self.queue_capacity, self.fragment_size
            )));
        }
        if self.min_block_size < 64 {
            return Err(PipelineError::InvalidConfig(format!(
                "min_block_size must be >= 64, got {}",
                self.min_block_size
            )));
        }
        if self.num_workers == Some(0) {
            return Err(PipelineError::InvalidConfig(
                "num_workers must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self, PipelineError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| PipelineError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Number of workers the pipeline will start.
    pub fn worker_count(&self) -> usize {
        if let Some(n) = self.num_workers {
            return n;
        }
        match std::thread::available_parallelism() {
            Ok(n) => n.get(),
            Err(e) => {
                warn!("Could not detect core count ({}), using a single worker", e);
                1
            }
        }
    }

    /// Builder-style override of the worker count.
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = Some(num_workers);
        self
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
            fragment_size: Self::DEFAULT_FRAGMENT_SIZE,
            min_block_size: Self::DEFAULT_MIN_BLOCK_SIZE,
            num_workers: None,
            thread_name_prefix: "pixel-worker".to_string(),
        }
    }
}
