//! Docview Core Library
//!
//! Viewer session for paginated documents: the virtual scroller that keeps
//! the pages around the viewport rendered, the page node pool it recycles,
//! the form overlay synchronizer and the viewer configuration.

pub mod config;
pub mod error;
pub mod nodes;
pub mod overlay;
pub mod scroller;
pub mod viewer;

pub use config::ViewerConfig;
pub use error::ViewerError;
pub use nodes::{NodeId, PageNodePool};
pub use overlay::{ElementId, FormOverlaySynchronizer, MountedElement, OverlayHost, RecordingOverlayHost};
pub use scroller::{PageState, ScrollWindows, ScrollerConfig, ScrollerEvent, VirtualScroller};
pub use viewer::{Viewer, ViewerContext, ViewerOptions};
