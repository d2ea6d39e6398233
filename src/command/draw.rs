// src/command/draw.rs

//! Drawing commands.
//!
//! Each one clips its footprint against the context's drawable area and then
//! walks only the rows owned by the calling core. Per-pixel results depend only
//! on the command and the pixel's coordinates, never on the partition, so the
//! output is identical for any worker count.

use super::{CommandKind, PixelCommand};
use crate::color::{modulate, Color};
use crate::context::PixelThreadContext;
use crate::error::{CommandError, CommandResult};
use crate::geometry::{Point, Rect};

/// Column range of `area` as slice indices. `area` must be non-empty and
/// inside the destination.
#[inline]
fn columns(area: &Rect) -> std::ops::Range<usize> {
    area.left as usize..area.right as usize
}

/// Fill the drawable area with `color`, ignoring the blend mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clear {
    pub color: Color,
}

impl Clear {
    pub fn new(color: Color) -> Self {
        Self { color }
    }
}

impl PixelCommand for Clear {
    fn kind(&self) -> CommandKind {
        CommandKind::Draw
    }

    fn run(&self, context: &mut PixelThreadContext) -> CommandResult {
        let area = context.clip_rect()?;
        if area.is_empty() {
            return Ok(());
        }
        let pixel = self.color.to_argb();
        for y in context.partition().rows(area.top, area.bottom) {
            context.dest_row(y)?[columns(&area)].fill(pixel);
        }
        Ok(())
    }
}

/// Solid rectangle, blended with the current blend mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillRect {
    pub rect: Rect,
    pub color: Color,
}

impl FillRect {
    pub fn new(rect: Rect, color: Color) -> Self {
        Self { rect, color }
    }
}

impl PixelCommand for FillRect {
    fn kind(&self) -> CommandKind {
        CommandKind::Draw
    }

    fn run(&self, context: &mut PixelThreadContext) -> CommandResult {
        let area = self.rect.intersect(&context.clip_rect()?);
        if area.is_empty() {
            return Ok(());
        }
        let src = self.color.to_argb();
        let blend = context.blend_mode();
        for y in context.partition().rows(area.top, area.bottom) {
            for dst in &mut context.dest_row(y)?[columns(&area)] {
                *dst = blend.blend(src, *dst);
            }
        }
        Ok(())
    }
}

/// One-pixel-wide line between two pixel coordinates, both endpoints included.
///
/// The line takes one step per pixel along its longer axis. At step `i` the
/// shorter axis has advanced `round(i * minor / major)` pixels, with halves
/// rounding away from the start point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawLine {
    pub from: (i32, i32),
    pub to: (i32, i32),
    pub color: Color,
}

impl DrawLine {
    pub fn new(from: (i32, i32), to: (i32, i32), color: Color) -> Self {
        Self { from, to, color }
    }
}

/// Steps `i` in `0..=steps` whose coordinate `start + i * dir` lies in `lo..hi`.
fn step_range(start: i64, dir: i64, lo: i32, hi: i32, steps: i64) -> std::ops::Range<i64> {
    let (first, end) = if dir >= 0 {
        (lo as i64 - start, hi as i64 - start)
    } else {
        (start - hi as i64 + 1, start - lo as i64 + 1)
    };
    first.max(0)..end.min(steps + 1)
}

impl PixelCommand for DrawLine {
    fn kind(&self) -> CommandKind {
        CommandKind::Draw
    }

    fn run(&self, context: &mut PixelThreadContext) -> CommandResult {
        let clip = context.clip_rect()?;
        if clip.is_empty() {
            return Ok(());
        }
        let partition = context.partition();
        let src = self.color.to_argb();
        let blend = context.blend_mode();

        let (x0, y0) = (self.from.0 as i64, self.from.1 as i64);
        let (dx, dy) = (self.to.0 as i64 - x0, self.to.1 as i64 - y0);
        let x_major = dx.abs() >= dy.abs();
        let (steps, minor) = if x_major {
            (dx.abs(), dy.abs())
        } else {
            (dy.abs(), dx.abs())
        };

        // Only the steps whose major coordinate lands inside the clip.
        let range = if x_major {
            step_range(x0, dx.signum(), clip.left, clip.right, steps)
        } else {
            step_range(y0, dy.signum(), clip.top, clip.bottom, steps)
        };
        for i in range {
            let offset = if steps == 0 {
                0
            } else {
                ((2 * i as i128 * minor as i128 + steps as i128) / (2 * steps as i128)) as i64
            };
            let (x, y) = if x_major {
                (x0 + i * dx.signum(), y0 + offset * dy.signum())
            } else {
                (x0 + offset * dx.signum(), y0 + i * dy.signum())
            };
            let (Ok(x), Ok(y)) = (i32::try_from(x), i32::try_from(y)) else {
                continue;
            };
            if partition.owns(y) && clip.contains(x, y) {
                let dst = &mut context.dest_row(y)?[x as usize];
                *dst = blend.blend(src, *dst);
            }
        }
        Ok(())
    }
}

/// Flat-colored triangle list. Every three vertices form one triangle.
///
/// A pixel is covered when its center `(x + 0.5, y + 0.5)` lies inside the
/// triangle, with left and top edges inclusive and right and bottom edges
/// exclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawTriangles {
    pub vertices: Vec<Point>,
    pub color: Color,
}

impl DrawTriangles {
    pub fn new(vertices: Vec<Point>, color: Color) -> Self {
        Self { vertices, color }
    }

    /// Horizontal extent covered at scanline height `ypos`, as `(left, right)`.
    fn span(tri: &[Point], ypos: f32) -> Option<(f32, f32)> {
        let mut hits = [0.0f32; 2];
        let mut count = 0;
        for i in 0..3 {
            let (a, b) = (tri[i], tri[(i + 1) % 3]);
            let (top, bottom) = if a.y <= b.y { (a, b) } else { (b, a) };
            if top.y == bottom.y || ypos < top.y || ypos >= bottom.y {
                continue;
            }
            if count == 2 {
                break;
            }
            let t = (ypos - top.y) / (bottom.y - top.y);
            hits[count] = top.x + t * (bottom.x - top.x);
            count += 1;
        }
        (count == 2).then(|| (hits[0].min(hits[1]), hits[0].max(hits[1])))
    }
}

impl PixelCommand for DrawTriangles {
    fn kind(&self) -> CommandKind {
        CommandKind::Draw
    }

    fn run(&self, context: &mut PixelThreadContext) -> CommandResult {
        if self.vertices.len() % 3 != 0 {
            return Err(CommandError::InvalidVertexCount {
                count: self.vertices.len(),
            });
        }
        let clip = context.clip_rect()?;
        if clip.is_empty() {
            return Ok(());
        }
        let partition = context.partition();
        let src = self.color.to_argb();
        let blend = context.blend_mode();

        for tri in self.vertices.chunks_exact(3) {
            let min_y = tri.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
            let max_y = tri.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max);
            if !min_y.is_finite() || !max_y.is_finite() {
                continue;
            }
            // Rows whose centers fall in [min_y, max_y).
            let start_y = ((min_y - 0.5).ceil() as i32).max(clip.top);
            let end_y = ((max_y - 0.5).ceil() as i32).min(clip.bottom);

            for y in partition.rows(start_y, end_y) {
                let Some((left, right)) = Self::span(tri, y as f32 + 0.5) else {
                    continue;
                };
                let x0 = ((left - 0.5).ceil() as i32).max(clip.left);
                let x1 = ((right - 0.5).ceil() as i32).min(clip.right);
                if x0 >= x1 {
                    continue;
                }
                for dst in &mut context.dest_row(y)?[x0 as usize..x1 as usize] {
                    *dst = blend.blend(src, *dst);
                }
            }
        }
        Ok(())
    }
}

/// Textured axis-aligned rectangle with nearest-texel sampling.
///
/// `texcoords` are normalized `[u0, v0, u1, v1]` mapped onto `dest`; each
/// texel is modulated by `tint` before blending.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawSprite {
    pub dest: Rect,
    pub texcoords: [f32; 4],
    pub sampler: usize,
    pub tint: Color,
}

impl DrawSprite {
    /// Whole texture in `sampler`, untinted, stretched over `dest`.
    pub fn new(dest: Rect, sampler: usize) -> Self {
        Self {
            dest,
            texcoords: [0.0, 0.0, 1.0, 1.0],
            sampler,
            tint: Color::WHITE,
        }
    }

    pub fn with_texcoords(mut self, texcoords: [f32; 4]) -> Self {
        self.texcoords = texcoords;
        self
    }

    pub fn with_tint(mut self, tint: Color) -> Self {
        self.tint = tint;
        self
    }
}

impl PixelCommand for DrawSprite {
    fn kind(&self) -> CommandKind {
        CommandKind::Draw
    }

    fn run(&self, context: &mut PixelThreadContext) -> CommandResult {
        let texture = context.sampler(self.sampler)?.clone();
        let area = self.dest.intersect(&context.clip_rect()?);
        if area.is_empty() {
            return Ok(());
        }
        let blend = context.blend_mode();
        let tint = (self.tint != Color::WHITE).then(|| self.tint.to_argb());
        let [u0, v0, u1, v1] = self.texcoords;
        let du = (u1 - u0) / self.dest.width() as f32;
        let dv = (v1 - v0) / self.dest.height() as f32;

        for y in context.partition().rows(area.top, area.bottom) {
            let v = v0 + (y as i64 - self.dest.top as i64) as f32 * dv + 0.5 * dv;
            let row = context.dest_row(y)?;
            for x in area.left..area.right {
                let u = u0 + (x as i64 - self.dest.left as i64) as f32 * du + 0.5 * du;
                let mut texel = texture.sample_nearest(u, v);
                if let Some(tint) = tint {
                    texel = modulate(texel, tint);
                }
                let dst = &mut row[x as usize];
                *dst = blend.blend(texel, *dst);
            }
        }
        Ok(())
    }
}

/// Copy a block of pixels, captured by value, to `(x, y)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlitPixels {
    pub x: i32,
    pub y: i32,
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u32>,
}

impl BlitPixels {
    pub fn new(x: i32, y: i32, width: usize, height: usize, pixels: Vec<u32>) -> Self {
        Self {
            x,
            y,
            width,
            height,
            pixels,
        }
    }
}

impl PixelCommand for BlitPixels {
    fn kind(&self) -> CommandKind {
        CommandKind::Draw
    }

    fn run(&self, context: &mut PixelThreadContext) -> CommandResult {
        let expected = self.width.checked_mul(self.height);
        if expected != Some(self.pixels.len()) {
            return Err(CommandError::PixelBlockSize {
                width: self.width,
                height: self.height,
                expected: expected.unwrap_or(usize::MAX),
                actual: self.pixels.len(),
            });
        }
        let dest = Rect::from_xywh(
            self.x,
            self.y,
            i32::try_from(self.width).unwrap_or(i32::MAX),
            i32::try_from(self.height).unwrap_or(i32::MAX),
        );
        let area = dest.intersect(&context.clip_rect()?);
        if area.is_empty() {
            return Ok(());
        }
        let blend = context.blend_mode();
        let src_x = (area.left as i64 - self.x as i64) as usize;

        for y in context.partition().rows(area.top, area.bottom) {
            let src_start = (y as i64 - self.y as i64) as usize * self.width + src_x;
            let src = &self.pixels[src_start..src_start + area.width() as usize];
            let dst = &mut context.dest_row(y)?[columns(&area)];
            for (d, s) in dst.iter_mut().zip(src) {
                *d = blend.blend(*s, *d);
            }
        }
        Ok(())
    }
}
