mod config;
use config::FilterConsoleConfig;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use vigil_core::{
    EntitlementSource, FilterEdit, FilterStateStore, HttpEntitlementSource, MemoryHistory,
    StaticEntitlementSource, SystemClock, ViewProfile,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logging / tracing
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,vigil_core=debug,filter_console=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    // Defaults + env + optional TOML overlay, then positional args
    let cfg = FilterConsoleConfig::load().with_args(std::env::args().skip(1));

    let profile = ViewProfile::by_name(&cfg.view)
        .ok_or_else(|| format!("unknown view '{}'", cfg.view))?;
    let gate = profile.gate();
    info!(target: "filter_console", view = %profile.name, url = %cfg.url, "Starting filter console");

    let http = cfg.store.http_entitlements();
    let source: Box<dyn EntitlementSource> = match (&cfg.entitlements_file, http) {
        (Some(path), _) => {
            let raw = std::fs::read_to_string(path)?;
            Box::new(StaticEntitlementSource::from_json(&raw)?)
        }
        (None, Some(http)) => Box::new(HttpEntitlementSource::new(http)),
        (None, None) => {
            warn!(target: "filter_console", "No entitlement source configured; plan stays unknown");
            Box::new(StaticEntitlementSource::new(json!({})))
        }
    };

    let history = Arc::new(MemoryHistory::new());
    let mut store = FilterStateStore::new(
        profile,
        &cfg.store,
        cfg.tenant_id.clone(),
        Arc::new(SystemClock),
        history.clone(),
    );
    let mut settled = store.subscribe();

    // 1) Mount from the page URL
    store.mount(&cfg.url)?;
    println!("mounted    {}", store.location());

    // 2) Entitlements for the live tenant
    let snapshot = gate.resolve(source.as_ref(), &cfg.tenant_id).await;
    store.apply_entitlements(&cfg.tenant_id, snapshot)?;
    println!(
        "plan       feature_enabled={} granularity={} history_days={:?}",
        store.feature_enabled(),
        store.granularity().as_str(),
        store.entitlements().and_then(|e| e.history_days)
    );
    if let Some(notice) = store.notice() {
        println!("notice     {notice}");
    }

    // 3) A burst of edits; only the last state is published
    let longest = store.profile().presets.last().copied();
    if let Some(preset) = longest {
        store.apply(FilterEdit::Range(preset))?;
    }
    store.apply(FilterEdit::IncludeDemo(true))?;
    println!("replaced   {}", store.location());

    for option in store.range_options() {
        let lock = if option.requires_upgrade { " (upgrade)" } else { "" };
        println!("range      {}{}", option.label, lock);
    }

    // Drain what mount/entitlements published, then wait out the debounce
    let wait = cfg.store.debounce_delay() * 4 + Duration::from_millis(100);
    loop {
        match tokio::time::timeout(wait, settled.recv()).await {
            Ok(Ok(s)) => {
                let live = store.accept(&s.value.tag, ()).is_some();
                println!(
                    "settled    gen={} live={} {}",
                    s.value.tag.generation,
                    live,
                    serde_json::to_string(&s.value.filters)?
                );
                if live {
                    break;
                }
            }
            Ok(Err(e)) => {
                warn!(target: "filter_console", error = %e, "Snapshot stream closed");
                break;
            }
            Err(_) => {
                warn!(target: "filter_console", "No settled snapshot before timeout");
                break;
            }
        }
    }

    info!(target: "filter_console", url_writes = history.replace_count(), "Done");
    Ok(())
}
