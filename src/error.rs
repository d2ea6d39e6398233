// src/error.rs

//! Error types for the pixel pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced to the producer side of the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to read configuration {}: {source}", path.display())]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
    #[error("command layout of {size} bytes with alignment {align} cannot be placed in an arena block")]
    UnsupportedLayout { size: usize, align: usize },
    #[error("invalid surface: {width}x{height} needs {expected} pixels, got {actual}")]
    InvalidSurface {
        width: usize,
        height: usize,
        expected: usize,
        actual: usize,
    },
    #[error("invalid framebuffer size {width}x{height}")]
    InvalidFramebuffer { width: usize, height: usize },
    #[error("framebuffer is bound to another pipeline")]
    FramebufferInUse,
    #[error("failed to spawn pixel worker {core}: {source}")]
    WorkerSpawn {
        core: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("pixel worker {core} faulted: {message}")]
    WorkerFaulted { core: usize, message: String },
}

/// Invariant violations detected while a command runs on a worker.
///
/// Every variant is fatal: the worker records the fault and panics, and the
/// producer sees [`PipelineError::WorkerFaulted`] on its next call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("no destination framebuffer bound")]
    NoDestination,
    #[error("sampler slot {index} is out of range (max {max})")]
    SamplerOutOfRange { index: usize, max: usize },
    #[error("sampler slot {index} has no texture bound")]
    MissingSampler { index: usize },
    #[error("row {row} is not owned by core {core} of {num_cores}")]
    RowNotOwned {
        row: i32,
        core: usize,
        num_cores: usize,
    },
    #[error("row {row} is outside the destination (height {height})")]
    RowOutOfBounds { row: i32, height: usize },
    #[error("triangle list has {count} vertices, expected a multiple of 3")]
    InvalidVertexCount { count: usize },
    #[error("pixel block of {width}x{height} needs {expected} pixels, got {actual}")]
    PixelBlockSize {
        width: usize,
        height: usize,
        expected: usize,
        actual: usize,
    },
}

/// Result of running one command on one core.
pub type CommandResult = Result<(), CommandError>;
