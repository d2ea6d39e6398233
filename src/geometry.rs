// src/geometry.rs

//! Integer rectangles and float points used by the drawing commands.

use serde::{Deserialize, Serialize};

/// Half-open rectangle: covers `left..right` by `top..bottom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Rectangle of `width` x `height` at `(x, y)`. Edges past `i32::MAX`
    /// saturate.
    pub const fn from_xywh(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self::new(x, y, x.saturating_add(width), y.saturating_add(height))
    }

    pub fn width(&self) -> i32 {
        self.right.saturating_sub(self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        self.bottom.saturating_sub(self.top).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    /// Overlap of two rectangles. May be empty.
    pub fn intersect(&self, other: &Rect) -> Rect {
        Rect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        )
    }
}

/// A point in destination pixel space. Pixel centers sit at `+0.5`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_and_emptiness() {
        let a = Rect::new(0, 0, 100, 100);
        let b = Rect::new(50, 50, 150, 150);
        assert_eq!(a.intersect(&b), Rect::new(50, 50, 100, 100));

        let c = Rect::new(200, 200, 300, 300);
        assert!(a.intersect(&c).is_empty());
        assert_eq!(a.intersect(&c).width(), 0);
    }

    #[test]
    fn half_open_containment() {
        let r = Rect::from_xywh(10, 10, 5, 5);
        assert!(r.contains(10, 10));
        assert!(r.contains(14, 14));
        assert!(!r.contains(15, 14));
        assert_eq!(r.width(), 5);
    }

    #[test]
    fn extreme_coordinates_saturate() {
        let r = Rect::from_xywh(i32::MAX - 1, i32::MIN, 4, 10);
        assert_eq!(r.right, i32::MAX);
        assert_eq!(r.width(), 1);
        assert_eq!(r.height(), 10);

        let wide = Rect::new(i32::MIN, 0, i32::MAX, 1);
        assert_eq!(wide.width(), i32::MAX);
        assert_eq!(wide.intersect(&Rect::new(0, 0, 8, 8)), Rect::new(0, 0, 8, 1));
    }
}
