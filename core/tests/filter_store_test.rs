//! Filter state store tests
//!
//! Drives the mount -> edit -> entitlement -> context pipeline against a
//! manual wall clock and tokio's paused timer.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::{advance, sleep};
use vigil_core::entitlement::{EntitlementSnapshot, FeatureFlag, Granularity, MapMode};
use vigil_core::filter_store::{
    Clock, FilterEdit, FilterStateStore, ManualClock, MemoryHistory, RangeNotice, StorePhase,
};
use vigil_core::time_window::{RangePreset, RangeSelection, Timestamp};
use vigil_core::{StoreConfig, ViewProfile, VigilError};

fn now() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
}

struct Harness {
    store: FilterStateStore,
    clock: Arc<ManualClock>,
    history: Arc<MemoryHistory>,
}

fn harness(profile: ViewProfile) -> Harness {
    let clock = Arc::new(ManualClock::new(now()));
    let history = Arc::new(MemoryHistory::new());
    let config = StoreConfig {
        debounce_ms: 250,
        ..StoreConfig::default()
    };
    let store = FilterStateStore::new(
        profile,
        &config,
        "tenant-a",
        clock.clone(),
        history.clone(),
    );
    Harness {
        store,
        clock,
        history,
    }
}

fn limited(days: u32) -> EntitlementSnapshot {
    EntitlementSnapshot {
        history_days: Some(days),
        ..EntitlementSnapshot::unknown()
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn inputs_before_mount_are_rejected() {
    let Harness { mut store, .. } = harness(ViewProfile::security_events());

    assert_eq!(store.phase(), StorePhase::Uninitialized);
    assert!(store.state().is_none());
    assert!(matches!(
        store.apply(FilterEdit::IncludeDemo(true)),
        Err(VigilError::NotReady)
    ));
    assert!(matches!(
        store.apply_entitlements("tenant-a", limited(2)),
        Err(VigilError::NotReady)
    ));
    assert!(matches!(
        store.switch_tenant("tenant-b"),
        Err(VigilError::NotReady)
    ));
    assert!(matches!(
        store.switch_website(Some(3)),
        Err(VigilError::NotReady)
    ));
}

#[tokio::test(start_paused = true)]
async fn mount_parses_rewrites_url_and_publishes_immediately() {
    let Harness {
        mut store, history, ..
    } = harness(ViewProfile::security_events());
    let mut rx = store.subscribe();

    let state = store
        .mount("/events?from=2024-06-03T12:00:00Z&category=threat&website_id=4")
        .expect("mount")
        .clone();

    assert_eq!(store.phase(), StorePhase::Ready);
    assert_eq!(state.from, now() - ChronoDuration::days(7));
    assert_eq!(state.to, now());
    assert_eq!(state.category.as_deref(), Some("threat"));
    assert_eq!(state.website_id, Some(4));

    assert_eq!(history.replace_count(), 1);
    assert_eq!(history.current().as_deref(), Some(store.location()));
    assert!(store.location().contains("to=2024-06-10T12%3A00%3A00.000Z"));

    let settled = rx.try_recv().expect("mount snapshot is not debounced");
    assert_eq!(settled.value.tag.tenant_id, "tenant-a");
    assert_eq!(settled.value.tag.generation, 1);
    assert_eq!(settled.value.filters, state);

    assert!(matches!(
        store.mount("/events"),
        Err(VigilError::AlreadyMounted)
    ));
}

#[tokio::test(start_paused = true)]
async fn canonical_url_is_not_rewritten() {
    let Harness {
        mut store, history, ..
    } = harness(ViewProfile::security_events());
    store.mount("/events").expect("mount");
    let canonical = store.location().to_string();

    let Harness {
        store: mut second,
        history: second_history,
        ..
    } = harness(ViewProfile::security_events());
    second.mount(&canonical).expect("mount");

    assert_eq!(history.replace_count(), 1);
    assert_eq!(second_history.replace_count(), 0);
    assert_eq!(second.location(), canonical);
}

// =============================================================================
// Entitlement-driven changes
// =============================================================================

#[tokio::test(start_paused = true)]
async fn history_limit_clamps_seven_day_window_without_user_action() {
    let Harness {
        mut store, history, ..
    } = harness(ViewProfile::security_events());
    let mut rx = store.subscribe();
    store
        .mount("/events?from=2024-06-03T12:00:00Z&to=2024-06-10T12:00:00Z")
        .expect("mount");
    rx.try_recv().expect("mount snapshot");

    let state = store
        .apply_entitlements("tenant-a", limited(2))
        .expect("ready")
        .clone();

    assert_eq!(state.from, Utc.with_ymd_and_hms(2024, 6, 8, 12, 0, 0).unwrap());
    assert_eq!(state.to, now());

    let notice = store.notice().expect("notice");
    assert_eq!(notice, RangeNotice { days: 2 });
    assert_eq!(notice.to_string(), "Range limited to last 2 days");

    assert_eq!(history.replace_count(), 2);
    assert!(store.location().contains("from=2024-06-08T12%3A00%3A00.000Z"));

    let settled = rx.try_recv().expect("clamp is published synchronously");
    assert_eq!(settled.value.filters.from, state.from);
    assert_eq!(settled.value.tag.generation, 2);
    assert!(!store.has_pending_snapshot());
}

#[tokio::test(start_paused = true)]
async fn single_day_notice_is_singular() {
    assert_eq!(
        RangeNotice { days: 1 }.to_string(),
        "Range limited to last 1 day"
    );
}

#[tokio::test(start_paused = true)]
async fn downgrade_reassigns_disallowed_selections() {
    let Harness { mut store, .. } = harness(ViewProfile::security_events());
    store
        .mount("/events?category=threat&severity=critical")
        .expect("mount");

    let downgrade = EntitlementSnapshot {
        allowed_categories: Some(vec!["login".to_string(), "bot".to_string()]),
        allowed_severities: Some(vec!["low".to_string(), "medium".to_string()]),
        ..EntitlementSnapshot::unknown()
    };
    let state = store
        .apply_entitlements("tenant-a", downgrade)
        .expect("ready")
        .clone();

    assert_eq!(state.category.as_deref(), Some("login"));
    assert_eq!(state.severity, None);

    let threat = store
        .category_options()
        .into_iter()
        .find(|o| o.value == "threat")
        .expect("threat listed");
    assert!(!threat.enabled);
    assert!(threat.requires_upgrade);

    let enabled: Vec<String> = store
        .severity_options()
        .into_iter()
        .filter(|o| o.enabled)
        .map(|o| o.value)
        .collect();
    assert_eq!(enabled, vec!["low".to_string(), "medium".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn plan_without_permitted_category_round_trips() {
    let Harness {
        mut store, clock, ..
    } = harness(ViewProfile::security_events());
    store.mount("/events?category=threat").expect("mount");

    let locked = EntitlementSnapshot {
        allowed_categories: Some(vec!["checkout".to_string()]),
        ..EntitlementSnapshot::unknown()
    };
    store
        .apply_entitlements("tenant-a", locked)
        .expect("ready");

    assert_eq!(store.state().and_then(|s| s.category.clone()), None);
    assert!(store.location().contains("category=&") || store.location().ends_with("category="));

    let parsed = store.profile().codec(1).parse(store.location(), clock.now());
    assert_eq!(Some(&parsed), store.state());
}

#[tokio::test(start_paused = true)]
async fn range_options_beyond_history_require_upgrade() {
    let Harness { mut store, .. } = harness(ViewProfile::security_events());
    store.mount("/events").expect("mount");
    store
        .apply_entitlements("tenant-a", limited(7))
        .expect("ready");

    let options = store.range_options();
    let labels: Vec<(&str, bool)> = options.iter().map(|o| (o.label, o.enabled)).collect();
    assert_eq!(labels, vec![("24h", true), ("7d", true), ("30d", false)]);
    assert!(options[2].requires_upgrade);

    store
        .apply(FilterEdit::Range(RangePreset::Last30Days))
        .expect("ready");
    assert_eq!(store.notice(), Some(RangeNotice { days: 7 }));
    assert_eq!(
        store.range_selection(),
        Some(RangeSelection::Preset(RangePreset::Last7Days))
    );
}

#[tokio::test(start_paused = true)]
async fn entitlement_clamp_supersedes_pending_edit() {
    let Harness { mut store, .. } = harness(ViewProfile::security_events());
    let mut rx = store.subscribe();
    store.mount("/events").expect("mount");
    rx.try_recv().expect("mount snapshot");

    store
        .apply(FilterEdit::Window {
            from: Some(now() - ChronoDuration::days(7)),
            to: Some(now()),
        })
        .expect("ready");
    assert!(store.has_pending_snapshot());

    store
        .apply_entitlements("tenant-a", limited(2))
        .expect("ready");
    assert!(!store.has_pending_snapshot());

    let settled = rx.try_recv().expect("clamped snapshot");
    assert_eq!(settled.value.filters.from, now() - ChronoDuration::days(2));
    assert_eq!(settled.value.tag.generation, 3);

    sleep(Duration::from_secs(1)).await;
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn window_edit_clears_notice_once_it_fits() {
    let Harness { mut store, .. } = harness(ViewProfile::security_events());
    store
        .mount("/events?from=2024-06-03T12:00:00Z")
        .expect("mount");
    store
        .apply_entitlements("tenant-a", limited(2))
        .expect("ready");
    assert!(store.notice().is_some());

    store
        .apply(FilterEdit::Category(Some("bot".to_string())))
        .expect("ready");
    assert!(store.notice().is_some());

    store
        .apply(FilterEdit::Range(RangePreset::Last24Hours))
        .expect("ready");
    assert_eq!(store.notice(), None);
}

#[tokio::test(start_paused = true)]
async fn stale_tenant_entitlements_are_ignored() {
    let Harness { mut store, .. } = harness(ViewProfile::security_events());
    let mut rx = store.subscribe();
    store.mount("/events?from=2024-06-03T12:00:00Z").expect("mount");
    store.switch_tenant("tenant-b").expect("ready");
    while rx.try_recv().is_ok() {}

    let before = store.state().cloned();
    store
        .apply_entitlements("tenant-a", limited(2))
        .expect("ready");

    assert_eq!(store.state().cloned(), before);
    assert!(store.entitlements().is_none());
    assert_eq!(store.notice(), None);
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn feature_flag_follows_view_failure_policy() {
    let Harness {
        store: mut events, ..
    } = harness(ViewProfile::security_events());
    let Harness { store: mut map, .. } = harness(ViewProfile::geo_map());
    events.mount("/events").expect("mount");
    map.mount("/map").expect("mount");

    assert_eq!(events.feature_flag(), FeatureFlag::Unknown);
    assert!(events.feature_enabled());
    assert!(!map.feature_enabled());

    let enabled = EntitlementSnapshot {
        feature: FeatureFlag::Enabled,
        ..EntitlementSnapshot::unknown()
    };
    map.apply_entitlements("tenant-a", enabled).expect("ready");
    assert!(map.feature_enabled());
}

#[tokio::test(start_paused = true)]
async fn granularity_gates_presentation_only() {
    let Harness { mut store, .. } = harness(ViewProfile::geo_map());
    store.mount("/map?ip_hash=ab12").expect("mount");

    assert_eq!(store.granularity(), Granularity::City);
    assert_eq!(store.map_modes(), vec![MapMode::Country, MapMode::City]);

    let country = EntitlementSnapshot {
        granularity: Granularity::Country,
        ..EntitlementSnapshot::unknown()
    };
    let state = store
        .apply_entitlements("tenant-a", country)
        .expect("ready")
        .clone();

    assert_eq!(store.map_modes(), vec![MapMode::Country]);
    let visible = store.field_visibility();
    assert!(!visible.city);
    assert!(!visible.ip_hash);
    assert_eq!(state.ip_hash.as_deref(), Some("ab12"));
}

// =============================================================================
// User edits
// =============================================================================

#[tokio::test(start_paused = true)]
async fn edit_burst_writes_url_eagerly_and_publishes_once() {
    let Harness {
        mut store, history, ..
    } = harness(ViewProfile::security_events());
    let mut rx = store.subscribe();
    store.mount("/events").expect("mount");
    rx.try_recv().expect("mount snapshot");
    let writes = history.replace_count();

    store
        .apply(FilterEdit::Category(Some("bot".to_string())))
        .expect("ready");
    advance(Duration::from_millis(50)).await;
    store
        .apply(FilterEdit::Severity(Some("high".to_string())))
        .expect("ready");
    advance(Duration::from_millis(50)).await;
    store.apply(FilterEdit::IncludeDemo(true)).expect("ready");

    assert_eq!(history.replace_count(), writes + 3);
    assert!(store.location().ends_with("&category=bot&severity=high&demo=1"));
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

    let settled = rx.recv().await.expect("debounced snapshot");
    assert_eq!(settled.value.tag.generation, 4);
    assert_eq!(settled.value.filters.category.as_deref(), Some("bot"));
    assert_eq!(settled.value.filters.severity.as_deref(), Some("high"));
    assert!(settled.value.filters.include_demo);

    sleep(Duration::from_secs(1)).await;
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn unchanged_edit_publishes_nothing() {
    let Harness {
        mut store, history, ..
    } = harness(ViewProfile::security_events());
    let mut rx = store.subscribe();
    store.mount("/events?category=threat").expect("mount");
    rx.try_recv().expect("mount snapshot");
    let writes = history.replace_count();
    let tag = store.current_tag();

    store
        .apply(FilterEdit::Category(Some("threat".to_string())))
        .expect("ready");

    assert_eq!(history.replace_count(), writes);
    assert_eq!(store.current_tag(), tag);
    assert!(!store.has_pending_snapshot());
}

#[tokio::test(start_paused = true)]
async fn invalid_edits_are_repaired() {
    let Harness { mut store, .. } = harness(ViewProfile::security_events());
    store.mount("/events").expect("mount");

    let state = store
        .apply(FilterEdit::Window {
            from: Some(now() + ChronoDuration::days(1)),
            to: Some(now() - ChronoDuration::days(3)),
        })
        .expect("ready")
        .clone();
    assert_eq!(state.to, now() - ChronoDuration::days(3));
    assert_eq!(state.from, now() - ChronoDuration::days(4));
    assert_eq!(store.range_selection(), Some(RangeSelection::Preset(RangePreset::Last24Hours)));

    store
        .apply(FilterEdit::Category(Some("bogus".to_string())))
        .expect("ready");
    assert_eq!(store.state().and_then(|s| s.category.clone()).as_deref(), Some("login"));

    store
        .apply(FilterEdit::CountryCode(Some(" de ".to_string())))
        .expect("ready");
    assert_eq!(
        store.state().and_then(|s| s.country_code.clone()).as_deref(),
        Some("DE")
    );

    store
        .apply(FilterEdit::CountryCode(Some("Germany".to_string())))
        .expect("ready");
    assert_eq!(store.state().and_then(|s| s.country_code.clone()), None);
}

#[tokio::test(start_paused = true)]
async fn store_state_round_trips_through_its_url() {
    let Harness {
        mut store, clock, ..
    } = harness(ViewProfile::security_events());
    store
        .mount("/events?tab=table&website_id=12#row-3")
        .expect("mount");
    store.apply(FilterEdit::Environment(Some(2))).expect("ready");
    store
        .apply(FilterEdit::IpHash(Some("  9f8e  ".to_string())))
        .expect("ready");
    store
        .apply(FilterEdit::Window {
            from: Some(now() - ChronoDuration::hours(30) + ChronoDuration::milliseconds(250)),
            to: None,
        })
        .expect("ready");

    let parsed = store.profile().codec(1).parse(store.location(), clock.now());
    assert_eq!(Some(&parsed), store.state());
    assert!(store.location().starts_with("/events?tab=table&"));
    assert!(store.location().ends_with("#row-3"));
}

// =============================================================================
// Context switches
// =============================================================================

#[tokio::test(start_paused = true)]
async fn tenant_switch_supersedes_old_context() {
    let Harness { mut store, .. } = harness(ViewProfile::security_events());
    let mut rx = store.subscribe();
    store
        .mount("/events?website_id=4&env_id=9")
        .expect("mount");
    rx.try_recv().expect("mount snapshot");
    store
        .apply_entitlements("tenant-a", limited(30))
        .expect("ready");
    rx.try_recv().expect("entitlement snapshot");

    store.select(Some("evt-1".to_string()));
    store
        .apply(FilterEdit::Category(Some("bot".to_string())))
        .expect("ready");
    let stale = store.current_tag();
    assert!(store.has_pending_snapshot());

    let state = store.switch_tenant("tenant-b").expect("ready").clone();

    assert_eq!(store.tenant_id(), "tenant-b");
    assert_eq!(state.website_id, None);
    assert_eq!(state.env_id, None);
    assert_eq!(store.selection(), None);
    assert!(store.entitlements().is_none());

    let settled = rx.try_recv().expect("context snapshot");
    assert_eq!(settled.key.tenant_id, "tenant-b");
    assert_eq!(settled.value.tag, store.current_tag());

    sleep(Duration::from_secs(1)).await;
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

    assert_eq!(store.accept(&stale, "rows"), None);
    assert_eq!(store.accept(&store.current_tag(), "rows"), Some("rows"));
}

#[tokio::test(start_paused = true)]
async fn website_switch_resets_environment_and_selection() {
    let Harness { mut store, .. } = harness(ViewProfile::revenue_leak());
    let mut rx = store.subscribe();
    store
        .mount("/revenue?website_id=4&env_id=9")
        .expect("mount");
    rx.try_recv().expect("mount snapshot");
    store.select(Some("incident-7".to_string()));

    let state = store.switch_website(Some(5)).expect("ready").clone();

    assert_eq!(state.website_id, Some(5));
    assert_eq!(state.env_id, None);
    assert_eq!(store.selection(), None);
    assert!(store.location().contains("website_id=5"));
    assert!(!store.location().contains("env_id"));

    let settled = rx.try_recv().expect("context snapshot");
    assert_eq!(settled.value.tag.generation, 2);
}

#[test]
fn edits_outside_a_runtime_publish_immediately() {
    let Harness { mut store, .. } = harness(ViewProfile::security_events());
    let mut rx = store.subscribe();
    store.mount("/events").expect("mount");
    rx.try_recv().expect("mount snapshot");

    store.apply(FilterEdit::IncludeDemo(true)).expect("ready");

    let settled = rx.try_recv().expect("published without a timer");
    assert!(settled.value.filters.include_demo);
    assert_eq!(settled.value.tag.generation, 2);
    assert!(!store.has_pending_snapshot());
}
