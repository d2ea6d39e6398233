// src/context.rs

//! Per-worker rendering state.
//!
//! Each worker owns exactly one [`PixelThreadContext`] for its whole life. It
//! is created when the worker thread starts, mutated in place by broadcast
//! commands, and dropped when the thread exits. Because every worker applies
//! the same broadcast commands in the same queue order, all contexts hold the
//! same state at any given queue position.
//!
//! Contexts are only created by the worker pool, and their state only changes
//! through the crate's broadcast commands. Commands defined elsewhere can read
//! the state and reach destination pixels through
//! [`PixelThreadContext::dest_row`].

use crate::color::BlendMode;
use crate::error::CommandError;
use crate::geometry::Rect;
use crate::partition::CorePartition;
use crate::surface::{Framebuffer, Texture};
use std::sync::Arc;

/// Number of texture sampler slots per context.
pub const MAX_SAMPLERS: usize = 4;

/// Mutable state visible to commands running on one worker.
pub struct PixelThreadContext {
    partition: CorePartition,
    destination: Option<Arc<Framebuffer>>,
    clip_rect: Option<Rect>,
    blend_mode: BlendMode,
    samplers: [Option<Arc<Texture>>; MAX_SAMPLERS],
    /// Bumped by every state setter.
    generation: u64,
}

/// Comparable snapshot of a context's broadcast state.
///
/// Bound resources are identified by address, so two contexts compare equal
/// only if they reference the very same framebuffer and textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextState {
    pub destination: Option<usize>,
    pub clip_rect: Option<Rect>,
    pub blend_mode: BlendMode,
    pub samplers: [Option<usize>; MAX_SAMPLERS],
}

impl PixelThreadContext {
    /// Fresh context: no destination, no clip, `SrcOver` blending, empty samplers.
    pub(crate) fn new(core: usize, num_cores: usize) -> Self {
        Self {
            partition: CorePartition::new(core, num_cores),
            destination: None,
            clip_rect: None,
            blend_mode: BlendMode::default(),
            samplers: Default::default(),
            generation: 0,
        }
    }

    pub fn core(&self) -> usize {
        self.partition.core()
    }

    pub fn num_cores(&self) -> usize {
        self.partition.num_cores()
    }

    pub fn partition(&self) -> CorePartition {
        self.partition
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    // --- Broadcast state ---

    pub(crate) fn set_destination(&mut self, destination: Option<Arc<Framebuffer>>) {
        self.destination = destination;
        self.generation += 1;
    }

    pub fn destination(&self) -> Option<&Arc<Framebuffer>> {
        self.destination.as_ref()
    }

    /// `None` removes the clip (the whole destination is drawable).
    pub(crate) fn set_clip_rect(&mut self, clip_rect: Option<Rect>) {
        self.clip_rect = clip_rect;
        self.generation += 1;
    }

    pub(crate) fn set_blend_mode(&mut self, blend_mode: BlendMode) {
        self.blend_mode = blend_mode;
        self.generation += 1;
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    pub(crate) fn set_sampler(
        &mut self,
        index: usize,
        texture: Option<Arc<Texture>>,
    ) -> Result<(), CommandError> {
        let slot = self
            .samplers
            .get_mut(index)
            .ok_or(CommandError::SamplerOutOfRange {
                index,
                max: MAX_SAMPLERS,
            })?;
        *slot = texture;
        self.generation += 1;
        Ok(())
    }

    /// Texture bound to sampler `index`.
    pub fn sampler(&self, index: usize) -> Result<&Arc<Texture>, CommandError> {
        self.samplers
            .get(index)
            .ok_or(CommandError::SamplerOutOfRange {
                index,
                max: MAX_SAMPLERS,
            })?
            .as_ref()
            .ok_or(CommandError::MissingSampler { index })
    }

    /// Drawable area: the clip rect intersected with the destination bounds.
    pub fn clip_rect(&self) -> Result<Rect, CommandError> {
        let bounds = self
            .destination
            .as_ref()
            .ok_or(CommandError::NoDestination)?
            .bounds();
        Ok(match self.clip_rect {
            Some(clip) => clip.intersect(&bounds),
            None => bounds,
        })
    }

    pub fn state(&self) -> ContextState {
        ContextState {
            destination: self.destination.as_ref().map(|d| Arc::as_ptr(d) as usize),
            clip_rect: self.clip_rect,
            blend_mode: self.blend_mode,
            samplers: std::array::from_fn(|i| {
                self.samplers[i].as_ref().map(|t| Arc::as_ptr(t) as usize)
            }),
        }
    }

    // --- Destination access ---

    /// Mutable destination row `y`.
    ///
    /// Fails unless a destination is bound, `y` lies inside it, and this core
    /// owns `y`. This is the only way commands reach destination pixels, which
    /// is what keeps concurrent workers on disjoint rows.
    pub fn dest_row(&mut self, y: i32) -> Result<&mut [u32], CommandError> {
        let dest = self.destination.as_ref().ok_or(CommandError::NoDestination)?;
        if y < 0 || y as usize >= dest.height() {
            return Err(CommandError::RowOutOfBounds {
                row: y,
                height: dest.height(),
            });
        }
        if !self.partition.owns(y) {
            return Err(CommandError::RowNotOwned {
                row: y,
                core: self.partition.core(),
                num_cores: self.partition.num_cores(),
            });
        }
        // Safety: `y` is in bounds, only this core owns row `y`, and the
        // returned borrow is tied to `&mut self`, so this core cannot hold two
        // views of the row at once.
        Ok(unsafe { dest.row_mut(y as usize) })
    }
}

impl std::fmt::Debug for PixelThreadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelThreadContext")
            .field("core", &self.core())
            .field("num_cores", &self.num_cores())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_identity() {
        let ctx = PixelThreadContext::new(0, 1);
        let state = ctx.state();
        assert_eq!(state.destination, None);
        assert_eq!(state.clip_rect, None);
        assert_eq!(state.blend_mode, BlendMode::SrcOver);
        assert_eq!(state.samplers, [None; MAX_SAMPLERS]);
        assert_eq!(ctx.clip_rect(), Err(CommandError::NoDestination));
    }

    #[test]
    fn clip_is_bounded_by_destination() {
        let mut ctx = PixelThreadContext::new(0, 1);
        ctx.set_destination(Some(Arc::new(Framebuffer::new(10, 10).unwrap())));
        assert_eq!(ctx.clip_rect().unwrap(), Rect::new(0, 0, 10, 10));
        ctx.set_clip_rect(Some(Rect::new(-5, 2, 50, 8)));
        assert_eq!(ctx.clip_rect().unwrap(), Rect::new(0, 2, 10, 8));
    }

    #[test]
    fn setters_bump_generation() {
        let mut ctx = PixelThreadContext::new(0, 1);
        let before = ctx.generation();
        ctx.set_blend_mode(BlendMode::Add);
        ctx.set_sampler(1, Some(Arc::new(Texture::from_pixels(1, 1, vec![0]).unwrap())))
            .unwrap();
        assert_eq!(ctx.generation(), before + 2);
        assert!(ctx.sampler(1).is_ok());
        assert_eq!(
            ctx.sampler(0).unwrap_err(),
            CommandError::MissingSampler { index: 0 }
        );
        assert_eq!(
            ctx.set_sampler(MAX_SAMPLERS, None).unwrap_err(),
            CommandError::SamplerOutOfRange {
                index: MAX_SAMPLERS,
                max: MAX_SAMPLERS
            }
        );
    }

    #[test]
    fn dest_row_enforces_ownership() {
        let fb = Arc::new(Framebuffer::new(4, 4).unwrap());
        let mut ctx = PixelThreadContext::new(1, 2);
        ctx.set_destination(Some(fb));
        assert!(ctx.dest_row(1).is_ok());
        assert!(ctx.dest_row(3).is_ok());
        assert_eq!(
            ctx.dest_row(2).unwrap_err(),
            CommandError::RowNotOwned {
                row: 2,
                core: 1,
                num_cores: 2
            }
        );
        assert_eq!(
            ctx.dest_row(5).unwrap_err(),
            CommandError::RowOutOfBounds { row: 5, height: 4 }
        );
    }
}
