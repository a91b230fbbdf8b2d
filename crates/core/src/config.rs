//! Viewer configuration
//!
//! Settings are read from `viewer.toml` in the platform config directory
//! (`~/.config/docview/viewer.toml` on Linux). Missing keys take their
//! defaults; a missing file means all defaults.

use docview_cache::{CacheBudget, ConfigError, DeviceCapabilityProbe, DEFAULT_MAX_THUMBNAILS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use viewer_core::{DEFAULT_FIT_PADDING, DEFAULT_PAGE_GAP};

use crate::scroller::ScrollerConfig;

const CONFIG_DIR: &str = "docview";
const CONFIG_FILE: &str = "viewer.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Quiet period after scrolling or zooming before pages are re-evaluated
    pub rendering_delay_ms: u64,
    /// Pages beyond the prefetch window whose nodes are kept
    pub retention_margin: u32,
    /// Rasterization failures before a page shows the error placeholder
    pub max_render_retries: u32,
    /// Vertical gap between pages, in document units
    pub page_gap: f32,
    /// Padding subtracted from the container in fit modes, in pixels
    pub fit_padding: f64,
    pub max_thumbnails: usize,
    /// Fixed budget; detected from the device when absent
    pub budget: Option<CacheBudget>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            rendering_delay_ms: 100,
            retention_margin: 2,
            max_render_retries: 3,
            page_gap: DEFAULT_PAGE_GAP,
            fit_padding: DEFAULT_FIT_PADDING,
            max_thumbnails: DEFAULT_MAX_THUMBNAILS,
            budget: None,
        }
    }
}

impl ViewerConfig {
    /// `viewer.toml` in the platform config directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Load from the default path, falling back to defaults when the file does not exist
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io { path: path.to_path_buf(), source };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io_error)
    }

    pub fn rendering_delay(&self) -> Duration {
        Duration::from_millis(self.rendering_delay_ms)
    }

    /// Budget to run with: the configured one or the device tier, then env overrides
    pub fn resolve_budget(&self, probe: &dyn DeviceCapabilityProbe) -> Result<CacheBudget, ConfigError> {
        let budget = self.budget.unwrap_or_else(|| CacheBudget::detect(probe)).apply_env()?;
        budget.validate()?;
        Ok(budget)
    }

    /// Scroller settings for a resolved budget
    pub fn scroller_config(&self, budget: &CacheBudget) -> ScrollerConfig {
        ScrollerConfig {
            prefetch_pages: budget.prefetch_pages,
            retention_margin: self.retention_margin,
            rendering_delay: self.rendering_delay(),
            max_render_retries: self.max_render_retries,
        }
    }
}
