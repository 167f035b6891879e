// Store configuration
//
// Defaults consider environment variables, mirroring the dashboard config.

use crate::entitlement::HttpEntitlementConfig;
use std::time::Duration;

pub const DEFAULT_DEBOUNCE_MS: u64 = 275;
pub const DEFAULT_FALLBACK_DAYS: u32 = 1;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Tunables shared by every filter store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    /// Quiet period before a filter edit triggers a fetch
    pub debounce_ms: u64,
    /// Window length used when the URL carries no usable `from`
    pub fallback_days: u32,
    /// Base URL of the entitlement endpoint, if fetched over HTTP
    pub entitlement_url: Option<String>,
    pub request_timeout_ms: u64,
    /// Buffer size of the settled-snapshot broadcast channel
    pub snapshot_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            fallback_days: DEFAULT_FALLBACK_DAYS,
            entitlement_url: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            snapshot_buffer: 64,
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            debounce_ms: std::env::var("VIGIL_DEBOUNCE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.debounce_ms),
            fallback_days: std::env::var("VIGIL_FALLBACK_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.fallback_days),
            entitlement_url: std::env::var("VIGIL_ENTITLEMENT_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            request_timeout_ms: std::env::var("VIGIL_REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.request_timeout_ms),
            snapshot_buffer: defaults.snapshot_buffer,
        }
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// HTTP source settings, when an entitlement URL is configured
    pub fn http_entitlements(&self) -> Option<HttpEntitlementConfig> {
        self.entitlement_url
            .as_ref()
            .map(|base_url| HttpEntitlementConfig {
                base_url: base_url.clone(),
                timeout_ms: self.request_timeout_ms,
                user_agent: format!("vigil/{}", env!("CARGO_PKG_VERSION")),
            })
    }
}
