//! Document / viewport / overlay coordinate mapping.
//!
//! All transforms are linear in `scale` and carry no state. A non-positive or
//! non-finite scale is a caller bug and panics.

use doc_model::FieldRect;

/// Point in document units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DocPoint {
    pub x: f64,
    pub y: f64,
}

impl DocPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Point in viewport pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewportPoint {
    pub x: f64,
    pub y: f64,
}

impl ViewportPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Page-local placement of an overlay element, in viewport pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OverlayRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

pub fn scale_from_percent(zoom_percent: f64) -> f64 {
    zoom_percent / 100.0
}

fn assert_scale(scale: f64) {
    assert!(scale.is_finite() && scale > 0.0, "scale must be finite and positive, got {scale}");
}

pub fn to_viewport(point: DocPoint, scale: f64) -> ViewportPoint {
    assert_scale(scale);
    ViewportPoint { x: point.x * scale, y: point.y * scale }
}

pub fn to_document(point: ViewportPoint, scale: f64) -> DocPoint {
    assert_scale(scale);
    DocPoint { x: point.x / scale, y: point.y / scale }
}

/// Overlay geometry of a field rectangle at `scale`. Inverted corners are normalized first
/// so width and height are never negative.
pub fn overlay_rect(rect: FieldRect, scale: f64) -> OverlayRect {
    assert_scale(scale);
    let rect = rect.normalized();
    OverlayRect {
        left: rect.x1 as f64 * scale,
        top: rect.y1 as f64 * scale,
        width: (rect.x2 - rect.x1) as f64 * scale,
        height: (rect.y2 - rect.y1) as f64 * scale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn transforms_are_mutually_inverse() {
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..10_000 {
            let point = DocPoint::new(rng.gen_range(-5_000.0..50_000.0), rng.gen_range(-5_000.0..50_000.0));
            let scale = rng.gen_range(0.01..8.0);

            let round_trip = to_document(to_viewport(point, scale), scale);
            assert!((round_trip.x - point.x).abs() < 1e-6, "{point:?} at {scale}");
            assert!((round_trip.y - point.y).abs() < 1e-6, "{point:?} at {scale}");
        }
    }

    #[test]
    fn overlay_rect_scales_field_geometry() {
        let rect = overlay_rect(FieldRect::new(10.0, 20.0, 110.0, 45.0), 1.5);
        assert_eq!(rect, OverlayRect { left: 15.0, top: 30.0, width: 150.0, height: 37.5 });
    }

    #[test]
    fn overlay_rect_normalizes_inverted_rects() {
        let rect = overlay_rect(FieldRect::new(110.0, 45.0, 10.0, 20.0), 2.0);
        assert_eq!(rect.left, 20.0);
        assert_eq!(rect.top, 40.0);
        assert_eq!(rect.width, 200.0);
        assert_eq!(rect.height, 50.0);
    }

    #[test]
    #[should_panic(expected = "scale must be finite and positive")]
    fn zero_scale_is_a_caller_bug() {
        let _ = to_viewport(DocPoint::new(1.0, 1.0), 0.0);
    }

    #[test]
    #[should_panic]
    fn nan_scale_is_a_caller_bug() {
        let _ = to_document(ViewportPoint::new(1.0, 1.0), f64::NAN);
    }
}
