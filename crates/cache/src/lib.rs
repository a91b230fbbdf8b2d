//! Docview Cache Library
//!
//! Render cache for page surfaces: scale tiers, budget selection from device
//! capabilities, and a byte-bounded LRU of rendered surfaces with a pinned
//! prefetch window and a separate thumbnail table.

pub mod config;
pub mod render_cache;
pub mod stats;
pub mod tier;

pub use config::{CacheBudget, ConfigError, DeviceCapabilities, DeviceCapabilityProbe, SystemProbe, StaticProbe};
pub use render_cache::{RenderCache, RenderError, SurfaceFuture, DEFAULT_MAX_THUMBNAILS};
pub use stats::CacheStats;
pub use tier::{cap_scale, ScaleTier, SCALE_TIERS};
