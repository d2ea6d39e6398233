// src/canvas.rs

//! Drawing front end.
//!
//! A [`Canvas`] owns a pipeline and the framebuffer it renders into, and turns
//! drawing calls into queued commands. Every call copies its inputs, so slices
//! passed in may be reused immediately.

use crate::color::{BlendMode, Color};
use crate::command::{
    BlitPixels, Clear, DrawLine, DrawSprite, DrawTriangles, FillRect, ResetClipRect,
    SetBlendMode, SetClipRect, SetSampler,
};
use crate::error::PipelineError;
use crate::geometry::{Point, Rect};
use crate::pipeline::PixelPipeline;
use crate::surface::{Framebuffer, Texture};
use log::debug;
use std::sync::Arc;

pub struct Canvas {
    pipeline: PixelPipeline,
    framebuffer: Arc<Framebuffer>,
}

impl Canvas {
    /// Bind a fresh `width` x `height` framebuffer as `pipeline`'s destination.
    pub fn new(mut pipeline: PixelPipeline, width: usize, height: usize) -> Result<Self, PipelineError> {
        let framebuffer = Arc::new(Framebuffer::new(width, height)?);
        pipeline.set_destination(Some(Arc::clone(&framebuffer)))?;
        Ok(Self {
            pipeline,
            framebuffer,
        })
    }

    pub fn width(&self) -> usize {
        self.framebuffer.width()
    }

    pub fn height(&self) -> usize {
        self.framebuffer.height()
    }

    pub fn pipeline(&self) -> &PixelPipeline {
        &self.pipeline
    }

    // --- State ---

    pub fn set_clip_rect(&mut self, rect: Rect) -> Result<(), PipelineError> {
        self.pipeline.submit(SetClipRect::new(rect))
    }

    pub fn reset_clip_rect(&mut self) -> Result<(), PipelineError> {
        self.pipeline.submit(ResetClipRect)
    }

    pub fn set_blend_mode(&mut self, mode: BlendMode) -> Result<(), PipelineError> {
        self.pipeline.submit(SetBlendMode::new(mode))
    }

    pub fn set_sampler(&mut self, index: usize, texture: Arc<Texture>) -> Result<(), PipelineError> {
        self.pipeline.submit(SetSampler::new(index, texture))
    }

    pub fn clear_sampler(&mut self, index: usize) -> Result<(), PipelineError> {
        self.pipeline.submit(SetSampler::clear(index))
    }

    // --- Drawing ---

    pub fn clear(&mut self, color: Color) -> Result<(), PipelineError> {
        self.pipeline.submit(Clear::new(color))
    }

    pub fn fill_rect(&mut self, rect: Rect, color: Color) -> Result<(), PipelineError> {
        self.pipeline.submit(FillRect::new(rect, color))
    }

    pub fn draw_line(&mut self, from: (i32, i32), to: (i32, i32), color: Color) -> Result<(), PipelineError> {
        self.pipeline.submit(DrawLine::new(from, to, color))
    }

    /// Triangle list; `vertices.len()` must be a multiple of three.
    pub fn draw_triangles(&mut self, vertices: &[Point], color: Color) -> Result<(), PipelineError> {
        if vertices.is_empty() {
            return Ok(());
        }
        self.pipeline
            .submit(DrawTriangles::new(vertices.to_vec(), color))
    }

    pub fn draw_sprite(&mut self, sprite: DrawSprite) -> Result<(), PipelineError> {
        self.pipeline.submit(sprite)
    }

    /// Blit a row-major block of `width` x `height` pixels to `(x, y)`.
    pub fn draw_pixels(
        &mut self,
        x: i32,
        y: i32,
        width: usize,
        height: usize,
        pixels: &[u32],
    ) -> Result<(), PipelineError> {
        self.pipeline
            .submit(BlitPixels::new(x, y, width, height, pixels.to_vec()))
    }

    // --- Frame management ---

    /// Replace the framebuffer with a cleared one of the new size. Commands
    /// already queued still render into the old buffer.
    pub fn resize(&mut self, width: usize, height: usize) -> Result<(), PipelineError> {
        let framebuffer = Arc::new(Framebuffer::new(width, height)?);
        self.pipeline
            .set_destination(Some(Arc::clone(&framebuffer)))?;
        self.framebuffer = framebuffer;
        debug!("canvas resized to {}x{}", width, height);
        Ok(())
    }

    /// Block until everything drawn so far is in the framebuffer.
    pub fn flush(&mut self) -> Result<(), PipelineError> {
        self.pipeline.wait_for_workers()
    }

    /// Flush, then copy out the framebuffer (row-major `0xAARRGGBB`).
    pub fn read_pixels(&mut self) -> Result<Vec<u32>, PipelineError> {
        self.pipeline.read_pixels(&self.framebuffer)
    }

    /// Give back the pipeline. The framebuffer stays bound until the
    /// pipeline's next destination change.
    pub fn into_pipeline(self) -> PixelPipeline {
        self.pipeline
    }
}

impl std::fmt::Debug for Canvas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canvas")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("pipeline", &self.pipeline)
            .finish()
    }
}
