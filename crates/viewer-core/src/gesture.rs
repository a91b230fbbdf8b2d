use crate::coords::ViewportPoint;
use crate::zoom::ZoomController;

/// One active touch, in viewport pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchPoint {
    pub id: u64,
    pub x: f64,
    pub y: f64,
}

impl TouchPoint {
    pub fn new(id: u64, x: f64, y: f64) -> Self {
        Self { id, x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PinchState {
    Idle,
    Tracking { initial_distance: f64, baseline_zoom: f64 },
}

/// Two-finger pinch recognizer driving [`ZoomController::zoom_about`].
#[derive(Debug, Clone)]
pub struct PinchTracker {
    state: PinchState,
}

impl Default for PinchTracker {
    fn default() -> Self {
        Self { state: PinchState::Idle }
    }
}

impl PinchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PinchState {
        self.state
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self.state, PinchState::Tracking { .. })
    }

    pub fn on_touch_start(&mut self, touches: &[TouchPoint], zoom: &ZoomController) {
        if touches.len() == 2 && !self.is_tracking() {
            self.begin(touches, zoom);
        }
    }

    /// Returns whether the zoom changed.
    pub fn on_touch_move(&mut self, touches: &[TouchPoint], zoom: &mut ZoomController) -> bool {
        let [first, second] = touches else {
            return false;
        };

        let PinchState::Tracking { initial_distance, baseline_zoom } = self.state else {
            self.begin(touches, zoom);
            return false;
        };

        let factor = distance(first, second) / initial_distance;
        let centroid = ViewportPoint::new((first.x + second.x) / 2.0, (first.y + second.y) / 2.0);
        let anchor = zoom.viewport().snapshot().viewport_to_doc(centroid);
        zoom.zoom_about(baseline_zoom * factor, anchor)
    }

    pub fn on_touch_end(&mut self, remaining: &[TouchPoint]) {
        if remaining.len() < 2 {
            self.state = PinchState::Idle;
        }
    }

    fn begin(&mut self, touches: &[TouchPoint], zoom: &ZoomController) {
        let [first, second] = touches else {
            return;
        };
        let initial_distance = distance(first, second);
        if initial_distance > f64::EPSILON {
            self.state = PinchState::Tracking { initial_distance, baseline_zoom: zoom.zoom_percent() };
        }
    }
}

fn distance(a: &TouchPoint, b: &TouchPoint) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}
