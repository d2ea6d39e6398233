// src/command/mod.rs

//! Pixel commands: the units of work the pipeline executes.
//!
//! Every worker runs every command, in queue order. What differs is the
//! command's family:
//!
//! - [`CommandKind::Broadcast`] commands mutate the per-core
//!   [`PixelThreadContext`]. Each worker applies the same instance to its own
//!   context, so all contexts converge without talking to each other.
//! - [`CommandKind::Draw`] commands write destination pixels, restricted to
//!   the rows the calling core owns (see [`crate::partition`]). They must not
//!   touch context state.
//!
//! Commands capture all of their inputs by value when constructed; the
//! producer may reuse its own buffers as soon as a command is queued.

use crate::arena::{Arena, ArenaBox};
use crate::context::PixelThreadContext;
use crate::error::{CommandResult, PipelineError};

pub mod draw;
pub mod state;


pub use draw::{BlitPixels, Clear, DrawLine, DrawSprite, DrawTriangles, FillRect};
pub use state::{ResetClipRect, SetBlendMode, SetClipRect, SetDestination, SetSampler};

/// Which family a command belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Applied by every worker to its own context.
    Broadcast,
    /// Writes destination rows owned by the calling worker.
    Draw,
}

/// A unit of work queued into the pipeline.
///
/// `run` is called once per worker, concurrently across workers, with each
/// worker's own context. It must not block and must not write anything outside
/// the context and the rows handed out by
/// [`PixelThreadContext::dest_row`].
///
/// An `Err` is fatal for the whole pipeline.
pub trait PixelCommand: Send + Sync {
    fn kind(&self) -> CommandKind;

    fn run(&self, context: &mut PixelThreadContext) -> CommandResult;

    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// An arena-allocated, type-erased command. Ownership moves into the pipeline
/// when it is queued.
pub type CommandBox = ArenaBox<dyn PixelCommand>;

impl Arena {
    /// Move `command` into the arena and erase its type.
    pub fn alloc_command<C: PixelCommand + 'static>(
        &mut self,
        command: C,
    ) -> Result<CommandBox, PipelineError> {
        let typed = self.alloc(command)?;
        let raw: std::ptr::NonNull<dyn PixelCommand> = ArenaBox::<C>::into_raw(typed);
        // Safety: ownership of the same value and slot moves from `typed`.
        Ok(unsafe { ArenaBox::from_raw(raw) })
    }
}
