// Entitlement gate
//
// Maps a tenant's plan/limits payload onto the handful of values the filter
// store needs: a tri-state feature flag, a geo granularity level, an optional
// history ceiling and optional option allow-lists. Mapping is pure and
// tolerant of any missing or malformed sub-field.

use crate::time_window::RangePreset;
use crate::{Result, VigilError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Feature availability as last reported by the entitlement endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureFlag {
    /// No successful fetch yet, or the fetch failed
    #[default]
    Unknown,
    Enabled,
    Disabled,
}

/// How a view treats an `Unknown` feature flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Unknown behaves as enabled
    FailOpen,
    /// Unknown behaves as disabled (locked state)
    FailClosed,
}

impl FeatureFlag {
    pub fn resolve(self, policy: FailurePolicy) -> bool {
        match self {
            FeatureFlag::Enabled => true,
            FeatureFlag::Disabled => false,
            FeatureFlag::Unknown => policy == FailurePolicy::FailOpen,
        }
    }
}

/// Geographic / network detail a plan may see, ordered `Country < City < Asn`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Country,
    #[default]
    City,
    Asn,
}

impl Granularity {
    /// Case-insensitive read; anything unrecognised is `City`
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("country") => Granularity::Country,
            Some("city") => Granularity::City,
            Some("asn") => Granularity::Asn,
            _ => Granularity::City,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Country => "country",
            Granularity::City => "city",
            Granularity::Asn => "asn",
        }
    }
}

/// Result fields a view model may show at a given granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldVisibility {
    pub country: bool,
    pub city: bool,
    pub asn: bool,
    pub ip_hash: bool,
}

impl FieldVisibility {
    pub fn for_granularity(granularity: Granularity) -> Self {
        Self {
            country: true,
            city: granularity >= Granularity::City,
            asn: granularity >= Granularity::Asn,
            ip_hash: granularity >= Granularity::Asn,
        }
    }
}

/// Map rendering modes, each unlocked by a granularity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapMode {
    Country,
    City,
    Asn,
}

impl MapMode {
    pub const ALL: [MapMode; 3] = [MapMode::Country, MapMode::City, MapMode::Asn];

    pub fn required(self) -> Granularity {
        match self {
            MapMode::Country => Granularity::Country,
            MapMode::City => Granularity::City,
            MapMode::Asn => Granularity::Asn,
        }
    }

    pub fn available(granularity: Granularity) -> Vec<MapMode> {
        Self::ALL
            .into_iter()
            .filter(|m| m.required() <= granularity)
            .collect()
    }
}

/// Gate output for the current tenant
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntitlementSnapshot {
    pub feature: FeatureFlag,
    pub granularity: Granularity,
    /// Maximum `to - from` in days; `None` is unlimited
    pub history_days: Option<u32>,
    /// `None` allows every category the view offers
    pub allowed_categories: Option<Vec<String>>,
    /// `None` allows every severity the view offers
    pub allowed_severities: Option<Vec<String>>,
}

impl EntitlementSnapshot {
    /// State before the first successful fetch, or after a failed one
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn permits_range(&self, preset: RangePreset) -> bool {
        preset.fits_history(self.history_days)
    }

    pub fn field_visibility(&self) -> FieldVisibility {
        FieldVisibility::for_granularity(self.granularity)
    }
}

/// Payload paths the gate reads for one view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementKeys {
    /// Looked up under `features`
    pub feature: String,
    /// Looked up under `limits`
    pub history_days: String,
    /// Looked up under `limits`
    pub granularity: String,
    /// Looked up under `limits`
    pub allowed_categories: String,
    /// Looked up under `limits`
    pub allowed_severities: String,
}

impl EntitlementKeys {
    pub fn for_feature(feature: &str, history_days: &str) -> Self {
        Self {
            feature: feature.to_string(),
            history_days: history_days.to_string(),
            granularity: "geo_granularity".to_string(),
            allowed_categories: "allowed_categories".to_string(),
            allowed_severities: "allowed_severities".to_string(),
        }
    }
}

/// Source of raw entitlement payloads, one per tenant
#[async_trait]
pub trait EntitlementSource: Send + Sync {
    async fn fetch(&self, tenant_id: &str) -> Result<Value>;
}

/// Pure mapping from payload to snapshot
#[derive(Debug, Clone)]
pub struct EntitlementGate {
    keys: EntitlementKeys,
}

impl EntitlementGate {
    pub fn new(keys: EntitlementKeys) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &EntitlementKeys {
        &self.keys
    }

    pub fn evaluate(&self, payload: &Value) -> EntitlementSnapshot {
        let features = payload.get("features");
        let limits = payload.get("limits");
        let limit = |name: &str| limits.and_then(|l| l.get(name));

        let feature = match features
            .and_then(|f| f.get(&self.keys.feature))
            .and_then(Value::as_bool)
        {
            Some(true) => FeatureFlag::Enabled,
            Some(false) => FeatureFlag::Disabled,
            None => FeatureFlag::Unknown,
        };

        EntitlementSnapshot {
            feature,
            granularity: Granularity::from_raw(
                limit(self.keys.granularity.as_str()).and_then(Value::as_str),
            ),
            history_days: limit(self.keys.history_days.as_str()).and_then(parse_history_days),
            allowed_categories: limit(self.keys.allowed_categories.as_str())
                .and_then(parse_string_list),
            allowed_severities: limit(self.keys.allowed_severities.as_str())
                .and_then(parse_string_list),
        }
    }

    /// Fetch and map; any failure yields the unknown snapshot
    pub async fn resolve(
        &self,
        source: &dyn EntitlementSource,
        tenant_id: &str,
    ) -> EntitlementSnapshot {
        match source.fetch(tenant_id).await {
            Ok(payload) => {
                let snapshot = self.evaluate(&payload);
                debug!(
                    target: "entitlement",
                    tenant = %tenant_id,
                    feature = ?snapshot.feature,
                    granularity = snapshot.granularity.as_str(),
                    history_days = ?snapshot.history_days,
                    "Entitlements resolved"
                );
                snapshot
            }
            Err(e) => {
                warn!(target: "entitlement", tenant = %tenant_id, error = %e, "Entitlement fetch failed");
                EntitlementSnapshot::unknown()
            }
        }
    }
}

/// Positive finite day count, rounded up; anything else is unlimited
fn parse_history_days(value: &Value) -> Option<u32> {
    let days = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !days.is_finite() || days <= 0.0 {
        return None;
    }
    Some(days.ceil().min(f64::from(u32::MAX)) as u32)
}

fn parse_string_list(value: &Value) -> Option<Vec<String>> {
    let items = value.as_array()?;
    Some(
        items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
    )
}

/// Serves one fixed payload for every tenant
#[derive(Debug, Clone)]
pub struct StaticEntitlementSource {
    payload: Value,
}

impl StaticEntitlementSource {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(Self::new(serde_json::from_str(raw)?))
    }
}

#[async_trait]
impl EntitlementSource for StaticEntitlementSource {
    async fn fetch(&self, _tenant_id: &str) -> Result<Value> {
        Ok(self.payload.clone())
    }
}

/// Configuration for the HTTP entitlement source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpEntitlementConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub user_agent: String,
}

/// Fetches `GET {base_url}/tenants/{tenant}/entitlements`
pub struct HttpEntitlementSource {
    config: HttpEntitlementConfig,
    http_client: reqwest::Client,
}

impl HttpEntitlementSource {
    pub fn new(config: HttpEntitlementConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(&config.user_agent)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            config,
            http_client,
        }
    }

    /// Tenant id goes in as one escaped path segment
    fn endpoint(&self, tenant_id: &str) -> Result<reqwest::Url> {
        let invalid = || {
            VigilError::EntitlementFetch(format!("invalid base url: {}", self.config.base_url))
        };
        let mut url = reqwest::Url::parse(&self.config.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .push("tenants")
            .push(tenant_id)
            .push("entitlements");
        Ok(url)
    }
}

#[async_trait]
impl EntitlementSource for HttpEntitlementSource {
    async fn fetch(&self, tenant_id: &str) -> Result<Value> {
        let url = self.endpoint(tenant_id)?;
        debug!(target: "entitlement", url = %url, "Fetching entitlements");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| VigilError::EntitlementFetch(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(VigilError::EntitlementFetch(format!(
                "endpoint returned status: {}",
                response.status()
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| VigilError::EntitlementFetch(format!("invalid payload: {}", e)))
    }
}
