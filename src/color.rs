// src/color.rs

//! Pixel colors and blend math.
//!
//! Framebuffer and texture pixels are packed `u32` values laid out as
//! `0xAARRGGBB`. Blending is scalar integer math, so the same inputs always
//! produce the same bits no matter which worker computes them.

use serde::{Deserialize, Serialize};

/// An 8-bit-per-channel color with straight (non-premultiplied) alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const RED: Color = Color::rgb(255, 0, 0);
    pub const GREEN: Color = Color::rgb(0, 255, 0);
    pub const BLUE: Color = Color::rgb(0, 0, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Opaque color.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::rgba(r, g, b, 255)
    }

    /// Pack into `0xAARRGGBB`.
    #[inline]
    pub const fn to_argb(self) -> u32 {
        (self.a as u32) << 24 | (self.r as u32) << 16 | (self.g as u32) << 8 | self.b as u32
    }

    /// Unpack from `0xAARRGGBB`.
    #[inline]
    pub const fn from_argb(pixel: u32) -> Self {
        Self {
            a: (pixel >> 24) as u8,
            r: (pixel >> 16) as u8,
            g: (pixel >> 8) as u8,
            b: pixel as u8,
        }
    }
}

impl From<u32> for Color {
    fn from(pixel: u32) -> Self {
        Color::from_argb(pixel)
    }
}

impl From<Color> for u32 {
    fn from(color: Color) -> Self {
        color.to_argb()
    }
}

/// How a source pixel combines with the destination pixel it lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlendMode {
    /// Source replaces destination.
    Copy,
    /// Source alpha over destination.
    #[default]
    SrcOver,
    /// Per-channel saturating add.
    Add,
    /// Per-channel modulate.
    Multiply,
}

#[inline]
fn div255(x: u32) -> u32 {
    (x + 127) / 255
}

#[inline]
fn channels(pixel: u32) -> [u32; 4] {
    [
        pixel >> 24,
        (pixel >> 16) & 0xff,
        (pixel >> 8) & 0xff,
        pixel & 0xff,
    ]
}

#[inline]
fn pack(c: [u32; 4]) -> u32 {
    c[0] << 24 | c[1] << 16 | c[2] << 8 | c[3]
}

impl BlendMode {
    /// Combine `src` onto `dst`. Both are `0xAARRGGBB`.
    #[inline]
    pub fn blend(self, src: u32, dst: u32) -> u32 {
        match self {
            BlendMode::Copy => src,
            BlendMode::SrcOver => {
                let s = channels(src);
                let d = channels(dst);
                let sa = s[0];
                if sa == 255 {
                    return src;
                }
                if sa == 0 {
                    return dst;
                }
                let inv = 255 - sa;
                pack([
                    sa + div255(d[0] * inv),
                    div255(s[1] * sa + d[1] * inv),
                    div255(s[2] * sa + d[2] * inv),
                    div255(s[3] * sa + d[3] * inv),
                ])
            }
            BlendMode::Add => {
                let s = channels(src);
                let d = channels(dst);
                pack([
                    (s[0] + d[0]).min(255),
                    (s[1] + d[1]).min(255),
                    (s[2] + d[2]).min(255),
                    (s[3] + d[3]).min(255),
                ])
            }
            BlendMode::Multiply => modulate(src, dst),
        }
    }
}

/// Per-channel multiply of two packed pixels, including alpha.
#[inline]
pub fn modulate(a: u32, b: u32) -> u32 {
    let a = channels(a);
    let b = channels(b);
    pack([
        div255(a[0] * b[0]),
        div255(a[1] * b[1]),
        div255(a[2] * b[2]),
        div255(a[3] * b[3]),
    ])
}
