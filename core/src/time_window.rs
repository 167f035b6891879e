// Time window normalization
//
// Repairs arbitrary (from, to) pairs into bounded windows and classifies a
// window against the canonical range presets. Everything here is pure: the
// caller supplies `now`, nothing reads the clock.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamps carried by filter state. Millisecond resolution after normalization.
pub type Timestamp = DateTime<Utc>;

/// Slack allowed when matching a window against a preset duration.
pub const RANGE_TOLERANCE_MS: i64 = 15 * 60 * 1000;

const CUSTOM_LABEL: &str = "custom";

/// Canonical time-range presets offered by the range picker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangePreset {
    LastHour,
    Last24Hours,
    Last7Days,
    Last30Days,
    Last90Days,
}

impl RangePreset {
    pub const ALL: [RangePreset; 5] = [
        RangePreset::LastHour,
        RangePreset::Last24Hours,
        RangePreset::Last7Days,
        RangePreset::Last30Days,
        RangePreset::Last90Days,
    ];

    pub fn label(self) -> &'static str {
        match self {
            RangePreset::LastHour => "1h",
            RangePreset::Last24Hours => "24h",
            RangePreset::Last7Days => "7d",
            RangePreset::Last30Days => "30d",
            RangePreset::Last90Days => "90d",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.label() == label)
    }

    pub fn duration(self) -> Duration {
        match self {
            RangePreset::LastHour => Duration::hours(1),
            RangePreset::Last24Hours => Duration::hours(24),
            RangePreset::Last7Days => Duration::days(7),
            RangePreset::Last30Days => Duration::days(30),
            RangePreset::Last90Days => Duration::days(90),
        }
    }

    /// True when a plan with `max_days` of history can serve this preset
    pub fn fits_history(self, max_days: Option<u32>) -> bool {
        match max_days {
            Some(days) => self.duration() <= Duration::days(i64::from(days)),
            None => true,
        }
    }

    /// The window this preset selects, ending at `now`
    pub fn window(self, now: Timestamp) -> TimeWindow {
        let to = now.trunc_subsecs(3);
        TimeWindow {
            from: to.checked_sub_signed(self.duration()).unwrap_or(DateTime::<Utc>::MIN_UTC),
            to,
        }
    }
}

impl fmt::Display for RangePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Derived label for the current window: a preset, or `Custom` when none matches.
///
/// `Custom` is never offered as a selectable option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeSelection {
    Preset(RangePreset),
    Custom,
}

impl RangeSelection {
    pub fn label(self) -> &'static str {
        match self {
            RangeSelection::Preset(p) => p.label(),
            RangeSelection::Custom => CUSTOM_LABEL,
        }
    }

    pub fn is_custom(self) -> bool {
        matches!(self, RangeSelection::Custom)
    }
}

/// A half-open `[from, to)` query window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: Timestamp,
    pub to: Timestamp,
}

impl TimeWindow {
    pub fn span(&self) -> Duration {
        self.to.signed_duration_since(self.from)
    }
}

/// Result of applying a plan history ceiling to a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClampOutcome {
    pub window: TimeWindow,
    pub clamped: bool,
}

fn days_before(t: Timestamp, days: u32) -> Timestamp {
    t.checked_sub_signed(Duration::days(i64::from(days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Repair an arbitrary pair into a window satisfying `from <= to <= now`.
///
/// A missing or future `to` becomes `now`; a missing `from`, or one after the
/// repaired `to`, becomes `to - fallback_days`. Idempotent for a fixed `now`.
pub fn ensure_time_window(
    from: Option<Timestamp>,
    to: Option<Timestamp>,
    now: Timestamp,
    fallback_days: u32,
) -> TimeWindow {
    let now = now.trunc_subsecs(3);

    let to = match to.map(|t| t.trunc_subsecs(3)) {
        Some(t) if t <= now => t,
        _ => now,
    };
    let from = match from.map(|f| f.trunc_subsecs(3)) {
        Some(f) if f <= to => f,
        _ => days_before(to, fallback_days),
    };

    TimeWindow { from, to }
}

/// Shrink a window so it lies within the last `max_days` before `now`.
///
/// No-op when `max_days` is unset. A window that falls entirely before the
/// allowed start is replaced by `[now - max_days, now]`.
pub fn clamp_time_window(
    from: Timestamp,
    to: Timestamp,
    now: Timestamp,
    max_days: Option<u32>,
) -> ClampOutcome {
    let Some(days) = max_days else {
        return ClampOutcome {
            window: TimeWindow { from, to },
            clamped: false,
        };
    };

    let now = now.trunc_subsecs(3);
    let max_start = days_before(now, days);
    let mut clamped = false;

    let mut next_to = to;
    if next_to > now {
        next_to = now;
        clamped = true;
    }
    let mut next_from = from;
    if next_from < max_start {
        next_from = max_start;
        clamped = true;
    }
    if next_from > next_to {
        next_from = max_start;
        next_to = now;
        clamped = true;
    }

    ClampOutcome {
        window: TimeWindow {
            from: next_from,
            to: next_to,
        },
        clamped,
    }
}

/// Classify a window against every known preset
pub fn resolve_range_value(from: Timestamp, to: Timestamp) -> RangeSelection {
    resolve_range_value_in(&RangePreset::ALL, from, to)
}

/// Classify a window against a view's own preset list
pub fn resolve_range_value_in(
    presets: &[RangePreset],
    from: Timestamp,
    to: Timestamp,
) -> RangeSelection {
    let span_ms = to.signed_duration_since(from).num_milliseconds();
    presets
        .iter()
        .copied()
        .find(|p| (span_ms - p.duration().num_milliseconds()).abs() <= RANGE_TOLERANCE_MS)
        .map(RangeSelection::Preset)
        .unwrap_or(RangeSelection::Custom)
}
