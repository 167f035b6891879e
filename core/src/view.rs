// View profiles
//
// Each dashboard view only contributes its option lists, range presets,
// entitlement keys and its policy for an unknown feature flag. Everything
// else is shared.

use crate::entitlement::{EntitlementGate, EntitlementKeys, FailurePolicy};
use crate::filter_state::{OptionDefault, OptionList};
use crate::time_window::RangePreset;
use crate::url_codec::UrlFilterCodec;
use serde::{Deserialize, Serialize};

const SEVERITIES: [&str; 4] = ["low", "medium", "high", "critical"];

/// Static filter schema for one view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewProfile {
    /// Stable view name, also part of the debounce key
    pub name: String,
    pub categories: OptionList,
    pub severities: OptionList,
    /// Presets offered by the range picker, shortest first
    pub presets: Vec<RangePreset>,
    pub entitlement_keys: EntitlementKeys,
    pub failure_policy: FailurePolicy,
}

impl ViewProfile {
    /// Security events table; fails open while entitlements are unknown
    pub fn security_events() -> Self {
        Self {
            name: "security_events".to_string(),
            categories: OptionList::new(
                ["login", "threat", "bot", "abuse"],
                OptionDefault::First,
            ),
            severities: OptionList::new(SEVERITIES, OptionDefault::Any),
            presets: vec![
                RangePreset::Last24Hours,
                RangePreset::Last7Days,
                RangePreset::Last30Days,
            ],
            entitlement_keys: EntitlementKeys::for_feature(
                "security_events",
                "events_history_days",
            ),
            failure_policy: FailurePolicy::FailOpen,
        }
    }

    /// Geo-activity map; shows the locked state while entitlements are unknown
    pub fn geo_map() -> Self {
        Self {
            name: "geo_map".to_string(),
            categories: OptionList::new(["login", "threat", "bot"], OptionDefault::First),
            severities: OptionList::none(),
            presets: vec![
                RangePreset::LastHour,
                RangePreset::Last24Hours,
                RangePreset::Last7Days,
            ],
            entitlement_keys: EntitlementKeys::for_feature("geo_map", "geo_history_days"),
            failure_policy: FailurePolicy::FailClosed,
        }
    }

    /// Revenue-impact incidents
    pub fn revenue_leak() -> Self {
        Self {
            name: "revenue_leak".to_string(),
            categories: OptionList::new(
                ["checkout", "refund", "chargeback", "promo_abuse"],
                OptionDefault::First,
            ),
            severities: OptionList::new(["low", "medium", "high"], OptionDefault::Any),
            presets: vec![
                RangePreset::Last24Hours,
                RangePreset::Last7Days,
                RangePreset::Last30Days,
                RangePreset::Last90Days,
            ],
            entitlement_keys: EntitlementKeys::for_feature(
                "revenue_leak",
                "revenue_history_days",
            ),
            failure_policy: FailurePolicy::FailOpen,
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "security_events" | "events" => Some(Self::security_events()),
            "geo_map" | "map" => Some(Self::geo_map()),
            "revenue_leak" | "revenue" => Some(Self::revenue_leak()),
            _ => None,
        }
    }

    pub fn codec(&self, fallback_days: u32) -> UrlFilterCodec {
        UrlFilterCodec::new(
            self.categories.clone(),
            self.severities.clone(),
            fallback_days,
        )
    }

    pub fn gate(&self) -> EntitlementGate {
        EntitlementGate::new(self.entitlement_keys.clone())
    }
}
