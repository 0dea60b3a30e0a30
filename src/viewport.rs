//! Zoom and pan for the graph view.
//!
//! A uniform-scale affine transform from layout (world) coordinates to screen
//! coordinates: `screen = world * scale + translate`. It is purely a display
//! concern and never feeds back into the simulation.

use serde::{Deserialize, Serialize};

pub const MIN_SCALE: f64 = 0.1;
pub const MAX_SCALE: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub scale: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            scale: 1.0,
            tx: 0.0,
            ty: 0.0,
        }
    }
}

impl Viewport {
    pub fn to_screen(&self, x: f64, y: f64) -> (f64, f64) {
        (x * self.scale + self.tx, y * self.scale + self.ty)
    }

    pub fn to_world(&self, sx: f64, sy: f64) -> (f64, f64) {
        ((sx - self.tx) / self.scale, (sy - self.ty) / self.scale)
    }

    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.tx += dx;
        self.ty += dy;
    }

    /// Multiply the scale by `factor`, keeping the world point under the
    /// screen point `(sx, sy)` fixed.
    pub fn zoom_at(&mut self, sx: f64, sy: f64, factor: f64) {
        if !factor.is_finite() || factor <= 0.0 {
            return;
        }
        let (wx, wy) = self.to_world(sx, sy);
        self.scale = (self.scale * factor).clamp(MIN_SCALE, MAX_SCALE);
        self.tx = sx - wx * self.scale;
        self.ty = sy - wy * self.scale;
    }

    /// Fit the world bounding box into a `width` × `height` screen with
    /// `padding` pixels on each side.
    pub fn fit(&mut self, bounds: [f64; 4], width: f64, height: f64, padding: f64) {
        let [min_x, min_y, max_x, max_y] = bounds;
        let w = (max_x - min_x).max(1.0);
        let h = (max_y - min_y).max(1.0);
        let avail_w = (width - 2.0 * padding).max(1.0);
        let avail_h = (height - 2.0 * padding).max(1.0);
        self.scale = (avail_w / w).min(avail_h / h).clamp(MIN_SCALE, MAX_SCALE);
        let cx = (min_x + max_x) / 2.0;
        let cy = (min_y + max_y) / 2.0;
        self.tx = width / 2.0 - cx * self.scale;
        self.ty = height / 2.0 - cy * self.scale;
    }
}

/// Bounding box `[min_x, min_y, max_x, max_y]` of a set of points.
pub fn bounds<I: IntoIterator<Item = (f64, f64)>>(points: I) -> Option<[f64; 4]> {
    points.into_iter().fold(None, |acc, (x, y)| match acc {
        None => Some([x, y, x, y]),
        Some([a, b, c, d]) => Some([a.min(x), b.min(y), c.max(x), d.max(y)]),
    })
}
