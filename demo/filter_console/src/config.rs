use std::fs;
use std::path::{Path, PathBuf};

use vigil_core::StoreConfig;

/// High-level configuration for the filter console demo
#[derive(Clone, Debug)]
pub struct FilterConsoleConfig {
    pub store: StoreConfig,
    /// View profile name (security_events, geo_map, revenue_leak or an alias)
    pub view: String,
    pub tenant_id: String,
    /// Page URL the store is mounted from
    pub url: String,
    /// Local entitlement payload; takes precedence over the HTTP source
    pub entitlements_file: Option<PathBuf>,
}

impl Default for FilterConsoleConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::from_env(),
            view: std::env::var("FILTER_CONSOLE_VIEW")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "security_events".to_string()),
            tenant_id: std::env::var("FILTER_CONSOLE_TENANT")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "demo-tenant".to_string()),
            url: "/events".to_string(),
            entitlements_file: std::env::var("FILTER_CONSOLE_ENTITLEMENTS")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        }
    }
}

impl FilterConsoleConfig {
    /// Load configuration from a TOML file (path via FILTER_CONSOLE_CONFIG or ./filter_console.toml),
    /// overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let default = Self::default();
        let path = std::env::var("FILTER_CONSOLE_CONFIG")
            .unwrap_or_else(|_| "filter_console.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target: "filter_console", path = %path, "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => match toml::from_str::<FilterConsoleToml>(&s) {
                Ok(t) => t.overlay(default),
                Err(e) => {
                    tracing::warn!(target: "filter_console", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target: "filter_console", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }

    /// Positional overrides: `[view] [url] [entitlements.json]`
    pub fn with_args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        if let Some(view) = args.next() {
            self.view = view;
        }
        if let Some(url) = args.next() {
            self.url = url;
        }
        if let Some(path) = args.next() {
            self.entitlements_file = Some(PathBuf::from(path));
        }
        self
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct FilterConsoleToml {
    pub view: Option<String>,
    pub tenant_id: Option<String>,
    pub url: Option<String>,
    pub entitlements_file: Option<PathBuf>,
    pub store: Option<StoreToml>,
}

impl FilterConsoleToml {
    fn overlay(self, mut base: FilterConsoleConfig) -> FilterConsoleConfig {
        if let Some(v) = self.view {
            base.view = v;
        }
        if let Some(t) = self.tenant_id {
            base.tenant_id = t;
        }
        if let Some(u) = self.url {
            base.url = u;
        }
        if let Some(f) = self.entitlements_file {
            base.entitlements_file = Some(f);
        }
        if let Some(s) = self.store {
            s.apply(&mut base.store);
        }
        base
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct StoreToml {
    pub debounce_ms: Option<u64>,
    pub fallback_days: Option<u32>,
    pub entitlement_url: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub snapshot_buffer: Option<usize>,
}
impl StoreToml {
    fn apply(self, s: &mut StoreConfig) {
        if let Some(v) = self.debounce_ms {
            s.debounce_ms = v;
        }
        if let Some(v) = self.fallback_days {
            s.fallback_days = v;
        }
        if let Some(v) = self.entitlement_url.filter(|u| !u.is_empty()) {
            s.entitlement_url = Some(v);
        }
        if let Some(v) = self.request_timeout_ms {
            s.request_timeout_ms = v;
        }
        if let Some(v) = self.snapshot_buffer {
            s.snapshot_buffer = v.max(1);
        }
    }
}
