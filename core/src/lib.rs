// Vigil Core Library
// Time-window and filter synchronization shared by the dashboard views

pub mod config;
pub mod debounce;
pub mod entitlement;
pub mod filter_state;
pub mod filter_store;
pub mod time_window;
pub mod url_codec;
pub mod view;

// Export core types
pub use config::StoreConfig;
pub use debounce::{DebounceScheduler, Settled};
pub use entitlement::{
    EntitlementGate, EntitlementKeys, EntitlementSnapshot, EntitlementSource, FailurePolicy,
    FeatureFlag, FieldVisibility, Granularity, HttpEntitlementConfig, HttpEntitlementSource,
    MapMode, StaticEntitlementSource,
};
pub use filter_state::{FilterState, OptionDefault, OptionList};
pub use filter_store::{
    Clock, FilterEdit, FilterSnapshot, FilterStateStore, HistorySink, ManualClock,
    MemoryHistory, RangeNotice, SnapshotTag, StorePhase, SystemClock,
};
pub use time_window::{
    clamp_time_window, ensure_time_window, resolve_range_value, ClampOutcome, RangePreset,
    RangeSelection, TimeWindow, Timestamp,
};
pub use url_codec::UrlFilterCodec;
pub use view::ViewProfile;

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VigilError {
    #[error("Filter store is not mounted")]
    NotReady,

    #[error("Filter store is already mounted")]
    AlreadyMounted,

    #[error("Entitlement fetch error: {0}")]
    EntitlementFetch(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
pub type Result<T> = std::result::Result<T, VigilError>;
