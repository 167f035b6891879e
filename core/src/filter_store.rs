// Filter state store
//
// Sole owner and writer of a view's FilterState. Every input (mount, user
// edit, entitlement arrival, tenant or website switch) runs the same linear
// pipeline:
//
//   ensure window -> clamp to plan history -> reconcile options
//     -> replace URL -> publish snapshot (debounced for user edits)
//
// Plan-driven changes publish immediately so a forbidden window is never
// left pending behind a debounce timer.

use crate::config::StoreConfig;
use crate::debounce::{DebounceScheduler, Settled};
use crate::entitlement::{
    EntitlementSnapshot, FeatureFlag, FieldVisibility, Granularity, MapMode,
};
use crate::filter_state::{parse_country_code, parse_ip_hash, FilterState, OptionList};
use crate::time_window::{
    clamp_time_window, ensure_time_window, resolve_range_value_in, RangePreset, RangeSelection,
    Timestamp,
};
use crate::url_codec::UrlFilterCodec;
use crate::view::ViewProfile;
use crate::{Result, VigilError};
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Source of "now" for window normalization
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Hand-driven clock for tests and replays
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: Timestamp) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: ChronoDuration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.lock().map(|g| *g).unwrap_or_else(|e| *e.into_inner())
    }
}

/// History-replacing navigation target for URL writes
pub trait HistorySink: Send + Sync {
    fn replace(&self, url: &str);
}

/// Records every replaced URL; stands in for the browser history in tests and demos
#[derive(Default)]
pub struct MemoryHistory {
    entries: Mutex<Vec<String>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<String> {
        self.entries.lock().ok().and_then(|e| e.last().cloned())
    }

    pub fn replace_count(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl HistorySink for MemoryHistory {
    fn replace(&self, url: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(url.to_string());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorePhase {
    Uninitialized,
    Ready,
}

/// Debounce timers are scoped to a tenant and a view
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebounceKey {
    pub tenant_id: String,
    pub view: String,
}

/// Identifies the live snapshot a fetch was issued for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotTag {
    pub tenant_id: String,
    pub generation: u64,
}

/// Settled filters handed to data-fetching consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSnapshot {
    pub tag: SnapshotTag,
    pub filters: FilterState,
}

pub type SettledSnapshot = Settled<DebounceKey, FilterSnapshot>;

/// User-facing notice that the plan shortened the requested window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeNotice {
    pub days: u32,
}

impl fmt::Display for RangeNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.days == 1 {
            write!(f, "Range limited to last 1 day")
        } else {
            write!(f, "Range limited to last {} days", self.days)
        }
    }
}

/// A time-range picker entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeOption {
    pub preset: RangePreset,
    pub label: &'static str,
    pub enabled: bool,
    pub requires_upgrade: bool,
}

/// A category/severity picker entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub enabled: bool,
    pub requires_upgrade: bool,
}

/// A single user edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterEdit {
    /// Custom window; missing or invalid bounds are repaired
    Window {
        from: Option<Timestamp>,
        to: Option<Timestamp>,
    },
    Range(RangePreset),
    Category(Option<String>),
    Severity(Option<String>),
    Environment(Option<u64>),
    IpHash(Option<String>),
    /// Trimmed and upper-cased before validation
    CountryCode(Option<String>),
    IncludeDemo(bool),
}

impl FilterEdit {
    fn touches_window(&self) -> bool {
        matches!(self, FilterEdit::Window { .. } | FilterEdit::Range(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeSource {
    Mount,
    User { window: bool },
    Entitlement,
    Context,
}

impl ChangeSource {
    fn touches_window(self) -> bool {
        match self {
            ChangeSource::User { window } => window,
            _ => true,
        }
    }
}

/// Owns the filter state of one mounted view.
///
/// User edits are debounced on the ambient tokio runtime. Without one they
/// publish immediately; nothing here panics for lack of a runtime.
pub struct FilterStateStore {
    profile: ViewProfile,
    codec: UrlFilterCodec,
    clock: Arc<dyn Clock>,
    history: Arc<dyn HistorySink>,
    debouncer: DebounceScheduler<DebounceKey, FilterSnapshot>,
    debounce_delay: Duration,
    phase: StorePhase,
    tenant_id: String,
    state: Option<FilterState>,
    entitlements: Option<EntitlementSnapshot>,
    notice: Option<RangeNotice>,
    selection: Option<String>,
    generation: u64,
    location: String,
}

impl FilterStateStore {
    pub fn new(
        profile: ViewProfile,
        config: &StoreConfig,
        tenant_id: impl Into<String>,
        clock: Arc<dyn Clock>,
        history: Arc<dyn HistorySink>,
    ) -> Self {
        let codec = profile.codec(config.fallback_days);
        Self {
            profile,
            codec,
            clock,
            history,
            debouncer: DebounceScheduler::new(config.snapshot_buffer),
            debounce_delay: config.debounce_delay(),
            phase: StorePhase::Uninitialized,
            tenant_id: tenant_id.into(),
            state: None,
            entitlements: None,
            notice: None,
            selection: None,
            generation: 0,
            location: String::new(),
        }
    }

    /// Seed state from the page URL. Runs once; the store never reads the URL again.
    pub fn mount(&mut self, url: &str) -> Result<&FilterState> {
        if self.phase == StorePhase::Ready {
            return Err(VigilError::AlreadyMounted);
        }

        let parsed = self.codec.parse(url, self.clock.now());
        self.location = url.to_string();
        self.state = Some(parsed);
        self.phase = StorePhase::Ready;

        info!(
            target: "filters",
            view = %self.profile.name,
            tenant = %self.tenant_id,
            "Filter store mounted"
        );

        self.run_pipeline(ChangeSource::Mount, None);
        self.ready_state()
    }

    /// Apply one user edit; the fetch-triggering snapshot is debounced
    pub fn apply(&mut self, edit: FilterEdit) -> Result<&FilterState> {
        let now = self.clock.now();
        let fallback_days = self.codec.fallback_days();
        let window = edit.touches_window();

        let state = self.state.as_mut().ok_or(VigilError::NotReady)?;
        let before = state.clone();

        match edit {
            FilterEdit::Window { from, to } => {
                let w = ensure_time_window(from, to, now, fallback_days);
                state.from = w.from;
                state.to = w.to;
            }
            FilterEdit::Range(preset) => {
                let w = preset.window(now);
                state.from = w.from;
                state.to = w.to;
            }
            FilterEdit::Category(value) => state.category = value,
            FilterEdit::Severity(value) => state.severity = value,
            FilterEdit::Environment(id) => state.env_id = id,
            FilterEdit::IpHash(value) => state.ip_hash = value.as_deref().and_then(parse_ip_hash),
            FilterEdit::CountryCode(value) => {
                state.country_code = value
                    .map(|v| v.trim().to_ascii_uppercase())
                    .as_deref()
                    .and_then(parse_country_code)
            }
            FilterEdit::IncludeDemo(on) => state.include_demo = on,
        }

        self.run_pipeline(ChangeSource::User { window }, Some(before));
        self.ready_state()
    }

    /// Entitlements resolved for `tenant_id`. Stale results for another tenant are ignored.
    pub fn apply_entitlements(
        &mut self,
        tenant_id: &str,
        snapshot: EntitlementSnapshot,
    ) -> Result<&FilterState> {
        if self.phase != StorePhase::Ready {
            return Err(VigilError::NotReady);
        }
        if tenant_id != self.tenant_id {
            debug!(
                target: "filters",
                stale = %tenant_id,
                live = %self.tenant_id,
                "Ignoring entitlements for a previous tenant"
            );
            return self.ready_state();
        }

        self.entitlements = Some(snapshot);
        self.run_pipeline(ChangeSource::Entitlement, None);
        self.ready_state()
    }

    /// Hard reset onto another tenant. Entitlements must be fetched again.
    pub fn switch_tenant(&mut self, tenant_id: impl Into<String>) -> Result<&FilterState> {
        let tenant_id = tenant_id.into();
        if self.phase != StorePhase::Ready {
            return Err(VigilError::NotReady);
        }
        if tenant_id == self.tenant_id {
            return self.ready_state();
        }

        let previous = std::mem::replace(&mut self.tenant_id, tenant_id);
        let cancelled = self.debouncer.cancel_where(|k| k.tenant_id == previous);
        info!(
            target: "filters",
            view = %self.profile.name,
            from_tenant = %previous,
            to_tenant = %self.tenant_id,
            cancelled,
            "Tenant switched"
        );

        self.entitlements = None;
        self.notice = None;
        self.selection = None;
        if let Some(state) = self.state.as_mut() {
            state.website_id = None;
            state.env_id = None;
        }
        self.run_pipeline(ChangeSource::Context, None);
        self.ready_state()
    }

    /// Hard reset onto another website of the same tenant
    pub fn switch_website(&mut self, website_id: Option<u64>) -> Result<&FilterState> {
        let state = self.state.as_mut().ok_or(VigilError::NotReady)?;
        if state.website_id == website_id {
            return self.ready_state();
        }

        state.website_id = website_id;
        state.env_id = None;
        self.selection = None;
        self.debouncer.cancel(&self.debounce_key());
        info!(
            target: "filters",
            view = %self.profile.name,
            tenant = %self.tenant_id,
            website_id = ?website_id,
            "Website switched"
        );

        self.run_pipeline(ChangeSource::Context, None);
        self.ready_state()
    }

    fn run_pipeline(&mut self, source: ChangeSource, before: Option<FilterState>) {
        let now = self.clock.now();
        let fallback_days = self.codec.fallback_days();
        let history_days = self.entitlements.as_ref().and_then(|e| e.history_days);
        let allowed_categories = self
            .entitlements
            .as_ref()
            .and_then(|e| e.allowed_categories.as_deref());
        let allowed_severities = self
            .entitlements
            .as_ref()
            .and_then(|e| e.allowed_severities.as_deref());

        let Some(state) = self.state.as_mut() else {
            return;
        };

        let window = ensure_time_window(Some(state.from), Some(state.to), now, fallback_days);
        let outcome = clamp_time_window(window.from, window.to, now, history_days);
        state.from = outcome.window.from;
        state.to = outcome.window.to;

        state.category = self
            .codec
            .categories()
            .reconcile(state.category.as_deref(), allowed_categories);
        state.severity = self
            .codec
            .severities()
            .reconcile(state.severity.as_deref(), allowed_severities);

        if outcome.clamped {
            let days = history_days.unwrap_or_default();
            info!(
                target: "filters",
                view = %self.profile.name,
                tenant = %self.tenant_id,
                days,
                "Window clamped to plan history"
            );
            self.notice = Some(RangeNotice { days });
        } else if source.touches_window() {
            self.notice = None;
        }

        if let (ChangeSource::User { .. }, Some(before)) = (source, before.as_ref()) {
            if *before == *state {
                debug!(target: "filters", view = %self.profile.name, "Edit left filters unchanged");
                return;
            }
        }

        let url = self.codec.serialize(state, &self.location);
        if url != self.location {
            self.history.replace(&url);
            self.location = url;
        }

        self.generation += 1;
        let snapshot = FilterSnapshot {
            tag: SnapshotTag {
                tenant_id: self.tenant_id.clone(),
                generation: self.generation,
            },
            filters: state.clone(),
        };
        let key = DebounceKey {
            tenant_id: self.tenant_id.clone(),
            view: self.profile.name.clone(),
        };

        debug!(
            target: "filters",
            view = %self.profile.name,
            generation = self.generation,
            source = ?source,
            "Filter pipeline ran"
        );

        match source {
            ChangeSource::User { .. } => {
                self.debouncer.schedule(key, snapshot, self.debounce_delay)
            }
            ChangeSource::Mount | ChangeSource::Entitlement | ChangeSource::Context => {
                self.debouncer.emit_now(key, snapshot)
            }
        }
    }

    fn ready_state(&self) -> Result<&FilterState> {
        self.state.as_ref().ok_or(VigilError::NotReady)
    }

    fn debounce_key(&self) -> DebounceKey {
        DebounceKey {
            tenant_id: self.tenant_id.clone(),
            view: self.profile.name.clone(),
        }
    }

    pub fn phase(&self) -> StorePhase {
        self.phase
    }

    pub fn profile(&self) -> &ViewProfile {
        &self.profile
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// `None` until mounted
    pub fn state(&self) -> Option<&FilterState> {
        self.state.as_ref()
    }

    /// The URL as last written (or as mounted)
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn notice(&self) -> Option<RangeNotice> {
        self.notice
    }

    pub fn entitlements(&self) -> Option<&EntitlementSnapshot> {
        self.entitlements.as_ref()
    }

    /// Raw tri-state flag; `Unknown` until entitlements arrive
    pub fn feature_flag(&self) -> FeatureFlag {
        self.entitlements
            .as_ref()
            .map(|e| e.feature)
            .unwrap_or_default()
    }

    /// Flag resolved through the view's failure policy
    pub fn feature_enabled(&self) -> bool {
        self.feature_flag().resolve(self.profile.failure_policy)
    }

    pub fn granularity(&self) -> Granularity {
        self.entitlements
            .as_ref()
            .map(|e| e.granularity)
            .unwrap_or_default()
    }

    /// Presentation-only gating; never feeds back into the snapshot
    pub fn field_visibility(&self) -> FieldVisibility {
        FieldVisibility::for_granularity(self.granularity())
    }

    pub fn map_modes(&self) -> Vec<MapMode> {
        MapMode::available(self.granularity())
    }

    /// Preset matching the current window, derived on every call
    pub fn range_selection(&self) -> Option<RangeSelection> {
        self.state
            .as_ref()
            .map(|s| resolve_range_value_in(&self.profile.presets, s.from, s.to))
    }

    pub fn range_options(&self) -> Vec<RangeOption> {
        let history_days = self.entitlements.as_ref().and_then(|e| e.history_days);
        self.profile
            .presets
            .iter()
            .map(|&preset| {
                let enabled = preset.fits_history(history_days);
                RangeOption {
                    preset,
                    label: preset.label(),
                    enabled,
                    requires_upgrade: !enabled,
                }
            })
            .collect()
    }

    pub fn category_options(&self) -> Vec<SelectOption> {
        let allow = self
            .entitlements
            .as_ref()
            .and_then(|e| e.allowed_categories.as_deref());
        select_options(&self.profile.categories, allow)
    }

    pub fn severity_options(&self) -> Vec<SelectOption> {
        let allow = self
            .entitlements
            .as_ref()
            .and_then(|e| e.allowed_severities.as_deref());
        select_options(&self.profile.severities, allow)
    }

    /// Tag of the live snapshot
    pub fn current_tag(&self) -> SnapshotTag {
        SnapshotTag {
            tenant_id: self.tenant_id.clone(),
            generation: self.generation,
        }
    }

    /// Pass `value` through only if it was fetched for the live snapshot
    pub fn accept<T>(&self, tag: &SnapshotTag, value: T) -> Option<T> {
        if *tag == self.current_tag() {
            Some(value)
        } else {
            debug!(
                target: "filters",
                stale_generation = tag.generation,
                live_generation = self.generation,
                "Discarding result for a superseded snapshot"
            );
            None
        }
    }

    /// Drilldown selection tied to the current context
    pub fn select(&mut self, id: Option<String>) {
        self.selection = id;
    }

    pub fn selection(&self) -> Option<&str> {
        self.selection.as_deref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettledSnapshot> {
        self.debouncer.subscribe()
    }

    pub fn has_pending_snapshot(&self) -> bool {
        self.debouncer.is_pending(&self.debounce_key())
    }
}

fn select_options(list: &OptionList, allow: Option<&[String]>) -> Vec<SelectOption> {
    list.values
        .iter()
        .map(|value| {
            let enabled = list.is_permitted(value, allow);
            SelectOption {
                value: value.clone(),
                enabled,
                requires_upgrade: !enabled,
            }
        })
        .collect()
}
