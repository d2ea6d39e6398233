// src/lib.rs

//! Multi-core pixel command pipeline.
//!
//! A single producer queues drawing and state commands into a bounded ring;
//! one worker thread per core runs every command in the same order. Draw
//! commands split the destination by row (`y mod N`), so workers never write
//! the same pixel and need no locks on the framebuffer.
//!
//! ```no_run
//! use pixel_pipeline::{Canvas, Color, PipelineConfig, PixelPipeline, Rect};
//!
//! # fn main() -> Result<(), pixel_pipeline::PipelineError> {
//! let pipeline = PixelPipeline::new(PipelineConfig::default())?;
//! let mut canvas = Canvas::new(pipeline, 320, 200)?;
//! canvas.clear(Color::BLACK)?;
//! canvas.fill_rect(Rect::new(10, 10, 100, 50), Color::RED)?;
//! let pixels = canvas.read_pixels()?;
//! assert_eq!(pixels.len(), 320 * 200);
//! # Ok(())
//! # }
//! ```

pub mod arena;
pub mod canvas;
pub mod color;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod geometry;
pub mod partition;
pub mod pipeline;
pub mod stats;
pub mod surface;

mod queue;
mod sync;
mod worker;

pub use arena::{Arena, ArenaBox, ArenaStats};
pub use canvas::Canvas;
pub use color::{BlendMode, Color};
pub use command::{CommandBox, CommandKind, PixelCommand};
pub use config::PipelineConfig;
pub use context::{ContextState, PixelThreadContext, MAX_SAMPLERS};
pub use error::{CommandError, CommandResult, PipelineError};
pub use geometry::{Point, Rect};
pub use partition::CorePartition;
pub use pipeline::PixelPipeline;
pub use stats::{PipelineStats, WorkerStats};
pub use surface::{Framebuffer, Texture};
