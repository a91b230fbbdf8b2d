use log::debug;

use crate::coords::{self, DocPoint, ViewportPoint};
use crate::state::{ScrollOffset, SharedViewport};

pub const MIN_ZOOM_PERCENT: f64 = 25.0;
pub const MAX_ZOOM_PERCENT: f64 = 400.0;
pub const DEFAULT_ZOOM_PERCENT: f64 = 100.0;
pub const DEFAULT_FIT_PADDING: f64 = 40.0;

/// Discrete levels visited by [`ZoomController::step_in`] / [`ZoomController::step_out`].
pub const ZOOM_LEVELS: [f64; 9] = [25.0, 50.0, 75.0, 100.0, 125.0, 150.0, 200.0, 300.0, 400.0];

const LEVEL_EPSILON: f64 = 1e-6;

/// Clamps to `[25, 400]`. Non-finite input falls back to 100.
pub fn clamp_zoom(percent: f64) -> f64 {
    if !percent.is_finite() {
        return DEFAULT_ZOOM_PERCENT;
    }
    percent.clamp(MIN_ZOOM_PERCENT, MAX_ZOOM_PERCENT)
}

/// Nearest level strictly above `current`.
pub fn next_zoom_level(current: f64) -> Option<f64> {
    ZOOM_LEVELS.iter().copied().find(|level| *level > current + LEVEL_EPSILON)
}

/// Nearest level strictly below `current`.
pub fn previous_zoom_level(current: f64) -> Option<f64> {
    ZOOM_LEVELS.iter().rev().copied().find(|level| *level < current - LEVEL_EPSILON)
}

pub fn fit_width_percent(container_width: f64, page_width: f64, padding: f64) -> f64 {
    if container_width <= 0.0 || page_width <= 0.0 {
        return DEFAULT_ZOOM_PERCENT;
    }
    clamp_zoom((container_width - padding) / page_width * 100.0)
}

pub fn fit_page_percent(
    container_width: f64,
    container_height: f64,
    page_width: f64,
    page_height: f64,
    padding: f64,
) -> f64 {
    if container_width <= 0.0 || container_height <= 0.0 || page_width <= 0.0 || page_height <= 0.0 {
        return DEFAULT_ZOOM_PERCENT;
    }

    let width = (container_width - padding) / page_width;
    let height = (container_height - padding) / page_height;

    clamp_zoom(width.min(height) * 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZoomMode {
    Percent,
    FitWidth { page_width: f64 },
    FitPage { page_width: f64, page_height: f64 },
}

/// Owns zoom changes on the shared viewport. Fit modes are sticky: they are
/// re-applied when the container is resized, until an explicit zoom replaces them.
pub struct ZoomController {
    viewport: SharedViewport,
    mode: ZoomMode,
    fit_padding: f64,
}

impl ZoomController {
    pub fn new(viewport: SharedViewport, fit_padding: f64) -> Self {
        Self { viewport, mode: ZoomMode::Percent, fit_padding: fit_padding.max(0.0) }
    }

    pub fn viewport(&self) -> &SharedViewport {
        &self.viewport
    }

    pub fn zoom_percent(&self) -> f64 {
        self.viewport.zoom_percent()
    }

    pub fn mode(&self) -> ZoomMode {
        self.mode
    }

    pub fn step_in(&mut self) -> bool {
        match next_zoom_level(self.zoom_percent()) {
            Some(level) => self.set_zoom(level),
            None => false,
        }
    }

    pub fn step_out(&mut self) -> bool {
        match previous_zoom_level(self.zoom_percent()) {
            Some(level) => self.set_zoom(level),
            None => false,
        }
    }

    /// Sets an explicit zoom, keeping the container center in place.
    pub fn set_zoom(&mut self, percent: f64) -> bool {
        let anchor = self.viewport.snapshot().center_doc_point();
        self.zoom_about(percent, anchor)
    }

    /// Multiplies the zoom by `scale_factor`, keeping `anchor` under the same viewport pixel.
    pub fn set_continuous_zoom(&mut self, scale_factor: f64, anchor: DocPoint) -> bool {
        if !scale_factor.is_finite() || scale_factor <= 0.0 {
            debug!("ignoring continuous zoom with factor {scale_factor}");
            return false;
        }
        let target = self.zoom_percent() * scale_factor;
        self.zoom_about(target, anchor)
    }

    /// Zooms to `percent` with `anchor` (continuous document point) pinned on screen.
    /// Scroll offsets clamp at zero, so the anchor may drift near the top/left edge.
    /// Leaves any fit mode.
    pub fn zoom_about(&mut self, percent: f64, anchor: DocPoint) -> bool {
        self.mode = ZoomMode::Percent;
        let state = self.viewport.snapshot();
        let on_screen = state.doc_to_viewport(anchor);
        let current = clamp_zoom(percent);

        let scaled = coords::to_viewport(anchor, coords::scale_from_percent(current));
        let scroll = ScrollOffset::new(scaled.x - on_screen.x, scaled.y - on_screen.y);
        self.viewport.set_zoom(current, scroll)
    }

    pub fn fit_to_width(&mut self, container_width: f64, page_width: f64) -> bool {
        self.mode = ZoomMode::FitWidth { page_width };
        self.apply_fit(fit_width_percent(container_width, page_width, self.fit_padding))
    }

    pub fn fit_to_page(
        &mut self,
        container_width: f64,
        container_height: f64,
        page_width: f64,
        page_height: f64,
    ) -> bool {
        self.mode = ZoomMode::FitPage { page_width, page_height };
        self.apply_fit(fit_page_percent(
            container_width,
            container_height,
            page_width,
            page_height,
            self.fit_padding,
        ))
    }

    /// Records the new container size and re-applies a sticky fit mode.
    pub fn on_container_resize(&mut self, width: f64, height: f64) -> bool {
        let resized = self.viewport.set_container(width, height);
        let zoomed = match self.mode {
            ZoomMode::Percent => false,
            ZoomMode::FitWidth { page_width } => self.fit_to_width(width, page_width),
            ZoomMode::FitPage { page_width, page_height } => {
                self.fit_to_page(width, height, page_width, page_height)
            }
        };
        resized || zoomed
    }

    // Fit modes keep the document row at the top of the container and drop horizontal scroll.
    fn apply_fit(&mut self, percent: f64) -> bool {
        let state = self.viewport.snapshot();
        let top = state.viewport_to_doc(ViewportPoint::new(0.0, 0.0));
        let scaled = coords::to_viewport(DocPoint::new(0.0, top.y), coords::scale_from_percent(percent));
        self.viewport.set_zoom(percent, ScrollOffset::new(0.0, scaled.y))
    }
}
