//! Hierarchy cache configuration.
//!
//! Controlled via the `[cache]` section of `coursebook.toml`.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_TTL_HOURS: u64 = 24;
/// Longest accepted entry lifetime: one year.
pub const MAX_TTL_HOURS: u64 = 24 * 365;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve the hierarchy through the cache. When off every read hits the store.
    pub enabled: bool,
    /// Lifetime of a populated entry. A safety net for missed invalidations.
    pub ttl_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_hours: DEFAULT_TTL_HOURS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            ttl_hours: settings.ttl_hours.get(),
        }
    }
}

impl CacheConfig {
    /// Entry lifetime, clamped to between one hour and [`MAX_TTL_HOURS`].
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours.clamp(1, MAX_TTL_HOURS) * 3600)
    }
}
