//! Cache budget selection.
//!
//! The budget is picked once at startup from the device's capabilities and is
//! never mutated afterwards. Environment variables can override individual
//! fields, which is how benchmarks and the CLI pin a budget.

use log::debug;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;

const GB: u64 = 1024 * 1024 * 1024;
const MB: usize = 1024 * 1024;
const DEFAULT_TOTAL_RAM_GB_HINT: u64 = 8;

pub const TOTAL_RAM_ENV: &str = "DOCVIEW_TOTAL_RAM_GB";
pub const MOBILE_ENV: &str = "DOCVIEW_MOBILE";
pub const MAX_RESIDENT_PAGES_ENV: &str = "DOCVIEW_MAX_RESIDENT_PAGES";
pub const MAX_CANVAS_PIXELS_ENV: &str = "DOCVIEW_MAX_CANVAS_PIXELS";
pub const PREFETCH_PAGES_ENV: &str = "DOCVIEW_PREFETCH_PAGES";
pub const AVERAGE_PAGE_BYTES_ENV: &str = "DOCVIEW_AVERAGE_PAGE_BYTES";

/// Memory limits for rendered surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheBudget {
    /// Surfaces the byte limit is sized for
    pub max_resident_pages: usize,
    /// Upper bound on `width * height` of any single surface
    pub max_canvas_pixels: u64,
    /// Pages kept rendered on each side of the visible range
    pub prefetch_pages: u32,
    /// Per-page byte estimate the byte limit is computed from
    pub average_page_bytes: usize,
}

impl Default for CacheBudget {
    fn default() -> Self {
        Self::for_device(&DeviceCapabilities::default())
    }
}

impl CacheBudget {
    /// Selects a budget tier from device capabilities.
    ///
    /// Mobile devices get the conservative tier regardless of RAM, since their
    /// canvas limits are far below desktop ones.
    pub fn for_device(capabilities: &DeviceCapabilities) -> Self {
        if capabilities.mobile {
            return Self {
                max_resident_pages: 6,
                max_canvas_pixels: 4_194_304,
                prefetch_pages: 1,
                average_page_bytes: 4 * MB,
            };
        }

        let gb = capabilities.total_ram_bytes as f64 / GB as f64;
        let (max_resident_pages, max_canvas_pixels, prefetch_pages) = if gb <= 4.0 {
            (10, 8_388_608, 2)
        } else if gb <= 8.0 {
            (20, 16_777_216, 3)
        } else if gb <= 16.0 {
            (32, 16_777_216, 4)
        } else {
            (48, 33_554_432, 5)
        };

        Self { max_resident_pages, max_canvas_pixels, prefetch_pages, average_page_bytes: 8 * MB }
    }

    /// Probes the device once and selects a budget for it.
    pub fn detect(probe: &dyn DeviceCapabilityProbe) -> Self {
        Self::for_device(&probe.capabilities())
    }

    /// Byte ceiling for resident surfaces.
    pub fn byte_limit(&self) -> usize {
        self.max_resident_pages.saturating_mul(self.average_page_bytes)
    }

    /// Applies overrides from environment variables.
    ///
    /// - `DOCVIEW_MAX_RESIDENT_PAGES`
    /// - `DOCVIEW_MAX_CANVAS_PIXELS`
    /// - `DOCVIEW_PREFETCH_PAGES`
    /// - `DOCVIEW_AVERAGE_PAGE_BYTES`
    ///
    /// # Errors
    /// Returns an error if any set variable does not parse as a positive integer
    /// (`DOCVIEW_PREFETCH_PAGES` may be zero).
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Some(value) = env_number::<usize>(MAX_RESIDENT_PAGES_ENV, false)? {
            self.max_resident_pages = value;
        }
        if let Some(value) = env_number::<u64>(MAX_CANVAS_PIXELS_ENV, false)? {
            self.max_canvas_pixels = value;
        }
        if let Some(value) = env_number::<u32>(PREFETCH_PAGES_ENV, true)? {
            self.prefetch_pages = value;
        }
        if let Some(value) = env_number::<usize>(AVERAGE_PAGE_BYTES_ENV, false)? {
            self.average_page_bytes = value;
        }
        Ok(self)
    }

    /// Rejects budgets that cannot hold a single surface.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_resident_pages == 0 {
            return Err(ConfigError::invalid("max_resident_pages", "0"));
        }
        if self.max_canvas_pixels == 0 {
            return Err(ConfigError::invalid("max_canvas_pixels", "0"));
        }
        if self.average_page_bytes == 0 {
            return Err(ConfigError::invalid("average_page_bytes", "0"));
        }
        Ok(())
    }
}

fn env_number<T>(key: &str, allow_zero: bool) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default,
{
    let Ok(raw) = std::env::var(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<T>() {
        Ok(value) if allow_zero || value != T::default() => Ok(Some(value)),
        _ => Err(ConfigError::invalid(key, &raw)),
    }
}

/// What the device-capability probe reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceCapabilities {
    pub total_ram_bytes: u64,
    pub mobile: bool,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self { total_ram_bytes: DEFAULT_TOTAL_RAM_GB_HINT * GB, mobile: false }
    }
}

impl DeviceCapabilities {
    pub fn from_total_ram_gb(gb: u64, mobile: bool) -> Self {
        Self { total_ram_bytes: gb.saturating_mul(GB), mobile }
    }
}

pub trait DeviceCapabilityProbe {
    fn capabilities(&self) -> DeviceCapabilities;
}

/// Reads the installed RAM of this machine.
///
/// `DOCVIEW_TOTAL_RAM_GB` overrides the detected amount and `DOCVIEW_MOBILE`
/// selects the mobile tier. When neither the override nor the system report
/// a size, an 8 GB desktop is assumed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl DeviceCapabilityProbe for SystemProbe {
    fn capabilities(&self) -> DeviceCapabilities {
        let ram_override = std::env::var(TOTAL_RAM_ENV).ok();
        let mobile = std::env::var(MOBILE_ENV).ok();
        resolve_capabilities(ram_override.as_deref(), mobile.as_deref(), system_total_ram_bytes)
    }
}

fn resolve_capabilities(
    ram_override: Option<&str>,
    mobile: Option<&str>,
    system_ram: impl FnOnce() -> Option<u64>,
) -> DeviceCapabilities {
    let override_bytes = ram_override
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(|gb| gb.saturating_mul(GB));
    let total_ram_bytes = override_bytes
        .or_else(system_ram)
        .unwrap_or(DEFAULT_TOTAL_RAM_GB_HINT * GB);
    let mobile = mobile.is_some_and(|value| matches!(value.trim(), "1" | "true" | "yes"));

    DeviceCapabilities { total_ram_bytes, mobile }
}

fn system_total_ram_bytes() -> Option<u64> {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    let total = system.total_memory();
    if total == 0 {
        debug!("system did not report total memory");
        return None;
    }
    Some(total)
}

/// Probe returning fixed capabilities.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub DeviceCapabilities);

impl DeviceCapabilityProbe for StaticProbe {
    fn capabilities(&self) -> DeviceCapabilities {
        self.0
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl ConfigError {
    pub fn invalid(key: &str, value: &str) -> Self {
        Self::InvalidValue { key: key.to_owned(), value: value.to_owned() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    fn test_mobile_tier_ignores_ram() {
        let budget = CacheBudget::for_device(&DeviceCapabilities::from_total_ram_gb(32, true));
        assert_eq!(budget.max_canvas_pixels, 4_194_304);
        assert_eq!(budget.prefetch_pages, 1);
        assert_eq!(budget.byte_limit(), 6 * 4 * MB);
    }

    #[test]
    fn test_desktop_tiers_grow_with_ram() {
        let tiers: Vec<_> = [4, 8, 16, 64]
            .into_iter()
            .map(|gb| CacheBudget::for_device(&DeviceCapabilities::from_total_ram_gb(gb, false)))
            .collect();

        for pair in tiers.windows(2) {
            assert!(pair[0].max_resident_pages < pair[1].max_resident_pages);
            assert!(pair[0].byte_limit() < pair[1].byte_limit());
        }
        assert_eq!(CacheBudget::default(), tiers[1]);
    }

    #[test]
    fn test_detect_uses_reported_capabilities() {
        let probe = StaticProbe(DeviceCapabilities::from_total_ram_gb(2, false));
        assert_eq!(CacheBudget::detect(&probe).max_resident_pages, 10);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let budget = CacheBudget { max_resident_pages: 0, ..CacheBudget::default() };
        assert!(matches!(budget.validate(), Err(ConfigError::InvalidValue { .. })));
        assert!(CacheBudget::default().validate().is_ok());
    }

    #[test]
    fn test_budget_deserializes_partial_tables() {
        let budget: CacheBudget = toml::from_str("prefetch_pages = 7").unwrap();
        assert_eq!(budget.prefetch_pages, 7);
        assert_eq!(budget.max_resident_pages, CacheBudget::default().max_resident_pages);
    }

    #[test]
    fn test_capabilities_prefer_override_then_system_then_hint() {
        let from_override = resolve_capabilities(Some("32"), None, || Some(4 * GB));
        assert_eq!(from_override, DeviceCapabilities::from_total_ram_gb(32, false));

        let from_system = resolve_capabilities(Some("lots"), Some("yes"), || Some(4 * GB));
        assert_eq!(from_system, DeviceCapabilities::from_total_ram_gb(4, true));

        let from_hint = resolve_capabilities(None, Some("0"), || None);
        assert_eq!(from_hint, DeviceCapabilities::default());
    }

    #[test]
    #[serial]
    fn test_system_capabilities_read_installed_ram() {
        let _guard = EnvGuard::new(&[TOTAL_RAM_ENV, MOBILE_ENV]);
        env::remove_var(TOTAL_RAM_ENV);
        env::remove_var(MOBILE_ENV);

        let expected = system_total_ram_bytes().unwrap_or(DEFAULT_TOTAL_RAM_GB_HINT * GB);
        let capabilities = SystemProbe.capabilities();
        assert_eq!(capabilities.total_ram_bytes, expected);
        assert!(!capabilities.mobile);

        env::set_var(TOTAL_RAM_ENV, "32");
        env::set_var(MOBILE_ENV, "true");
        assert_eq!(SystemProbe.capabilities(), DeviceCapabilities::from_total_ram_gb(32, true));
    }

    #[test]
    #[serial]
    fn test_apply_env_overrides() {
        let _guard = EnvGuard::new(&[
            MAX_RESIDENT_PAGES_ENV,
            MAX_CANVAS_PIXELS_ENV,
            PREFETCH_PAGES_ENV,
            AVERAGE_PAGE_BYTES_ENV,
        ]);

        env::set_var(MAX_RESIDENT_PAGES_ENV, "12");
        env::remove_var(MAX_CANVAS_PIXELS_ENV);
        env::set_var(PREFETCH_PAGES_ENV, "0");
        env::set_var(AVERAGE_PAGE_BYTES_ENV, "1024");

        let budget = CacheBudget::default().apply_env().unwrap();
        assert_eq!(budget.max_resident_pages, 12);
        assert_eq!(budget.max_canvas_pixels, CacheBudget::default().max_canvas_pixels);
        assert_eq!(budget.prefetch_pages, 0);
        assert_eq!(budget.byte_limit(), 12 * 1024);
    }

    #[test]
    #[serial]
    fn test_apply_env_invalid() {
        let _guard = EnvGuard::new(&[MAX_RESIDENT_PAGES_ENV]);

        env::set_var(MAX_RESIDENT_PAGES_ENV, "0");
        assert!(CacheBudget::default().apply_env().is_err());

        env::set_var(MAX_RESIDENT_PAGES_ENV, "not_a_number");
        let error = CacheBudget::default().apply_env().unwrap_err();
        assert!(error.to_string().contains(MAX_RESIDENT_PAGES_ENV));
    }

    // Helper to save and restore environment variables
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars = var_names.iter().map(|name| (name.to_string(), env::var(name).ok())).collect();
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }
}
