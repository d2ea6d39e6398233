// src/command/state.rs

//! Broadcast commands that change per-core rendering state.

use super::{CommandKind, PixelCommand};
use crate::color::BlendMode;
use crate::context::PixelThreadContext;
use crate::error::CommandResult;
use crate::geometry::Rect;
use crate::surface::{Framebuffer, Texture};
use std::sync::Arc;

/// Bind the framebuffer that subsequent draw commands render into.
///
/// Built by [`PixelPipeline::set_destination`](crate::PixelPipeline::set_destination),
/// which claims the framebuffer for that pipeline first.
#[derive(Debug, Clone)]
pub struct SetDestination {
    destination: Option<Arc<Framebuffer>>,
}

impl SetDestination {
    /// `None` unbinds the destination, dropping the workers' references to it.
    pub(crate) fn new(destination: Option<Arc<Framebuffer>>) -> Self {
        Self { destination }
    }

    pub fn destination(&self) -> Option<&Arc<Framebuffer>> {
        self.destination.as_ref()
    }
}

impl PixelCommand for SetDestination {
    fn kind(&self) -> CommandKind {
        CommandKind::Broadcast
    }

    fn run(&self, context: &mut PixelThreadContext) -> CommandResult {
        context.set_destination(self.destination.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetClipRect {
    pub rect: Rect,
}

impl SetClipRect {
    pub fn new(rect: Rect) -> Self {
        Self { rect }
    }
}

impl PixelCommand for SetClipRect {
    fn kind(&self) -> CommandKind {
        CommandKind::Broadcast
    }

    fn run(&self, context: &mut PixelThreadContext) -> CommandResult {
        context.set_clip_rect(Some(self.rect));
        Ok(())
    }
}

/// Remove the clip rect; the whole destination becomes drawable.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResetClipRect;

impl PixelCommand for ResetClipRect {
    fn kind(&self) -> CommandKind {
        CommandKind::Broadcast
    }

    fn run(&self, context: &mut PixelThreadContext) -> CommandResult {
        context.set_clip_rect(None);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetBlendMode {
    pub mode: BlendMode,
}

impl SetBlendMode {
    pub fn new(mode: BlendMode) -> Self {
        Self { mode }
    }
}

impl PixelCommand for SetBlendMode {
    fn kind(&self) -> CommandKind {
        CommandKind::Broadcast
    }

    fn run(&self, context: &mut PixelThreadContext) -> CommandResult {
        context.set_blend_mode(self.mode);
        Ok(())
    }
}

/// Bind (or clear) a texture in sampler slot `index`.
#[derive(Debug, Clone)]
pub struct SetSampler {
    pub index: usize,
    pub texture: Option<Arc<Texture>>,
}

impl SetSampler {
    pub fn new(index: usize, texture: Arc<Texture>) -> Self {
        Self {
            index,
            texture: Some(texture),
        }
    }

    pub fn clear(index: usize) -> Self {
        Self {
            index,
            texture: None,
        }
    }
}

impl PixelCommand for SetSampler {
    fn kind(&self) -> CommandKind {
        CommandKind::Broadcast
    }

    fn run(&self, context: &mut PixelThreadContext) -> CommandResult {
        context.set_sampler(self.index, self.texture.clone())
    }
}
