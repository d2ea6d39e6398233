// src/surface.rs

//! Pixel storage: the shared destination framebuffer and read-only textures.

use crate::color::Color;
use crate::error::PipelineError;
use crate::geometry::Rect;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Destination pixel buffer shared by every worker.
///
/// Workers never lock it. A row is only handed out mutably (through
/// [`PixelThreadContext::dest_row`](crate::PixelThreadContext::dest_row)) to
/// the core that owns it under the row partition, and a core runs one command
/// at a time, so no two threads ever hold the same row.
///
/// A framebuffer is bound to at most one pipeline at a time. The pipeline
/// claims it when it becomes a destination and releases it once its workers
/// can no longer reach it.
pub struct Framebuffer {
    width: usize,
    height: usize,
    pixels: Box<[UnsafeCell<u32>]>,
    /// Id of the pipeline holding the buffer, or `0` when unbound.
    owner: AtomicU64,
}

// Safety: all mutation goes through `row_mut`, whose callers guarantee that
// each row is accessed by at most one thread at a time (row partition within
// the single owning pipeline), and reads of the whole buffer only happen after
// that pipeline has drained.
unsafe impl Sync for Framebuffer {}

impl Framebuffer {
    /// A `width` x `height` buffer filled with `0` (transparent black).
    pub fn new(width: usize, height: usize) -> Result<Self, PipelineError> {
        Self::filled(width, height, 0)
    }

    /// Both sides must be non-zero and fit in an `i32`.
    pub fn filled(width: usize, height: usize, pixel: u32) -> Result<Self, PipelineError> {
        let len = width
            .checked_mul(height)
            .filter(|&len| len > 0)
            .filter(|_| i32::try_from(width).is_ok() && i32::try_from(height).is_ok())
            .ok_or(PipelineError::InvalidFramebuffer { width, height })?;
        Ok(Self {
            width,
            height,
            pixels: (0..len).map(|_| UnsafeCell::new(pixel)).collect(),
            owner: AtomicU64::new(0),
        })
    }

    /// Whether some pipeline currently holds this buffer.
    pub fn is_bound(&self) -> bool {
        self.owner() != 0
    }

    pub(crate) fn owner(&self) -> u64 {
        self.owner.load(Ordering::Acquire)
    }

    /// Bind to pipeline `owner`. `false` if another pipeline holds the buffer.
    pub(crate) fn claim(&self, owner: u64) -> bool {
        debug_assert_ne!(owner, 0);
        match self
            .owner
            .compare_exchange(0, owner, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => current == owner,
        }
    }

    /// Undo [`claim`](Self::claim). The caller's workers must be done with
    /// the buffer.
    pub(crate) fn release(&self, owner: u64) {
        let _ = self
            .owner
            .compare_exchange(owner, 0, Ordering::AcqRel, Ordering::Relaxed);
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Whole-buffer rectangle.
    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width as i32, self.height as i32)
    }

    /// Mutable view of row `y`.
    ///
    /// # Safety
    ///
    /// `y < height`, and no other reference to this row may be live for the
    /// duration of the returned borrow.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn row_mut(&self, y: usize) -> &mut [u32] {
        debug_assert!(y < self.height);
        let start = self.pixels[y * self.width..].as_ptr();
        // UnsafeCell<u32> is repr(transparent) over u32.
        std::slice::from_raw_parts_mut(UnsafeCell::raw_get(start), self.width)
    }

    /// Copy out every pixel, row-major.
    ///
    /// # Safety
    ///
    /// No worker may be writing to this buffer; the pipeline that renders into
    /// it must be drained.
    pub(crate) unsafe fn snapshot(&self) -> Vec<u32> {
        self.pixels.iter().map(|p| *p.get()).collect()
    }
}

impl std::fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framebuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("owner", &self.owner())
            .finish_non_exhaustive()
    }
}

/// Immutable source image bound into a sampler slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Texture {
    width: usize,
    height: usize,
    pixels: Box<[u32]>,
}

impl Texture {
    /// Wrap row-major `0xAARRGGBB` pixels.
    pub fn from_pixels(width: usize, height: usize, pixels: Vec<u32>) -> Result<Self, PipelineError> {
        let expected = width * height;
        if pixels.len() != expected || expected == 0 {
            return Err(PipelineError::InvalidSurface {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels: pixels.into_boxed_slice(),
        })
    }

    /// Single-color texture.
    pub fn solid(width: usize, height: usize, color: Color) -> Result<Self, PipelineError> {
        Self::from_pixels(width, height, vec![color.to_argb(); width * height])
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Texel at integer coordinates, clamped to the edge.
    #[inline]
    pub fn texel(&self, x: i32, y: i32) -> u32 {
        let x = x.clamp(0, self.width as i32 - 1) as usize;
        let y = y.clamp(0, self.height as i32 - 1) as usize;
        self.pixels[y * self.width + x]
    }

    /// Nearest texel for normalized coordinates in `0.0..=1.0`.
    #[inline]
    pub fn sample_nearest(&self, u: f32, v: f32) -> u32 {
        let x = (u * self.width as f32).floor() as i32;
        let y = (v * self.height as f32).floor() as i32;
        self.texel(x, y)
    }
}
