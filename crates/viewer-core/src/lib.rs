//! Viewport geometry and zoom: coordinate transforms, the shared viewport store,
//! continuous page layout and the zoom/pinch controllers.

pub mod coords;
pub mod gesture;
pub mod layout;
pub mod state;
pub mod zoom;

pub use coords::{overlay_rect, scale_from_percent, to_document, to_viewport, DocPoint, OverlayRect, ViewportPoint};
pub use gesture::{PinchState, PinchTracker, TouchPoint};
pub use layout::{DocumentLayout, DEFAULT_PAGE_GAP};
pub use state::{ScrollOffset, SharedViewport, SubscriptionId, ViewportChange, ViewportState, ViewportStore};
pub use zoom::{
    clamp_zoom, fit_page_percent, fit_width_percent, next_zoom_level, previous_zoom_level, ZoomController,
    ZoomMode, DEFAULT_FIT_PADDING, DEFAULT_ZOOM_PERCENT, MAX_ZOOM_PERCENT, MIN_ZOOM_PERCENT, ZOOM_LEVELS,
};
