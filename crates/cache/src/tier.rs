//! Scale tiers and canvas-size capping
//!
//! Surfaces are rendered at a small fixed set of scales so that continuous
//! zooming only re-rasterizes when the zoom crosses into another tier.

use doc_model::{surface_dimensions, PageSize};
use serde::Serialize;
use std::fmt;

/// Scales surfaces are rendered at, ascending.
pub const SCALE_TIERS: [f32; 9] = [0.25, 0.5, 0.75, 1.0, 1.25, 1.5, 2.0, 3.0, 4.0];

/// Index of the 1.0 tier, used for non-finite or non-positive scales.
const UNIT_TIER: u8 = 3;

/// One entry of [`SCALE_TIERS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ScaleTier(u8);

impl ScaleTier {
    /// Fixed tier thumbnails are rendered at before fitting to the requested width.
    pub const THUMBNAIL: ScaleTier = ScaleTier(0);

    /// Tier nearest to `scale`. Ties round to the higher tier.
    pub fn nearest(scale: f32) -> Self {
        if !scale.is_finite() || scale <= 0.0 {
            return Self(UNIT_TIER);
        }

        let mut best = 0;
        for (index, tier) in SCALE_TIERS.iter().enumerate() {
            if (tier - scale).abs() <= (SCALE_TIERS[best] - scale).abs() {
                best = index;
            }
        }
        Self(best as u8)
    }

    pub fn scale(self) -> f32 {
        SCALE_TIERS[self.0 as usize]
    }
}

impl fmt::Display for ScaleTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.scale())
    }
}

/// Largest scale `<= scale` whose surface fits in `max_canvas_pixels`.
///
/// Uses the area ratio (`sqrt(max / (w*h))`) and then nudges down until the floored
/// surface dimensions respect the cap.
pub fn cap_scale(size: PageSize, scale: f32, max_canvas_pixels: u64) -> f32 {
    let max_pixels = max_canvas_pixels.max(1);
    if pixel_count(size, scale) <= max_pixels {
        return scale;
    }

    let area = size.area().max(1.0);
    let mut capped = ((max_pixels as f64 / area).sqrt() as f32).min(scale);
    for _ in 0..64 {
        let pixels = pixel_count(size, capped);
        if pixels <= max_pixels {
            break;
        }
        capped *= ((max_pixels as f64 / pixels as f64).sqrt() * 0.999) as f32;
    }
    capped
}

fn pixel_count(size: PageSize, scale: f32) -> u64 {
    let (width, height) = surface_dimensions(size, scale);
    width as u64 * height as u64
}
