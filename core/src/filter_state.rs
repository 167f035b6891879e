// Filter state data model
//
// The typed record every view renders its controls from, plus the option
// lists and field validators shared by the URL codec and the store.

use crate::time_window::Timestamp;
use serde::{Deserialize, Serialize};

/// Current filter values for one view instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterState {
    /// Window start (inclusive)
    pub from: Timestamp,
    /// Window end (exclusive)
    pub to: Timestamp,
    pub website_id: Option<u64>,
    pub env_id: Option<u64>,
    /// `None` means "any"
    pub category: Option<String>,
    /// `None` means "any"
    pub severity: Option<String>,
    pub ip_hash: Option<String>,
    /// Two uppercase ASCII letters when present
    pub country_code: Option<String>,
    pub include_demo: bool,
}

/// What an enumerated field falls back to when its value is missing or rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionDefault {
    /// The first permitted option
    First,
    /// No selection ("any")
    Any,
}

/// Fixed option list for an enumerated filter field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionList {
    pub values: Vec<String>,
    pub default: OptionDefault,
}

impl OptionList {
    pub fn new<I, S>(values: I, default: OptionDefault) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
            default,
        }
    }

    /// An empty list; the field is always "any"
    pub fn none() -> Self {
        Self {
            values: Vec::new(),
            default: OptionDefault::Any,
        }
    }

    pub fn contains(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }

    /// Options that survive a plan allow-list. `None` allows everything.
    pub fn permitted<'a>(&'a self, allow: Option<&'a [String]>) -> impl Iterator<Item = &'a str> {
        self.values
            .iter()
            .filter(move |v| allow.map_or(true, |list| list.iter().any(|a| a == *v)))
            .map(String::as_str)
    }

    pub fn is_permitted(&self, value: &str, allow: Option<&[String]>) -> bool {
        self.permitted(allow).any(|v| v == value)
    }

    /// Coerce a candidate into a permitted value, or the field default
    pub fn reconcile(&self, current: Option<&str>, allow: Option<&[String]>) -> Option<String> {
        if let Some(value) = current {
            if self.is_permitted(value, allow) {
                return Some(value.to_string());
            }
        }
        match self.default {
            OptionDefault::First => self.permitted(allow).next().map(str::to_string),
            OptionDefault::Any => None,
        }
    }

    /// Query value for a selection; `None` omits the key.
    ///
    /// A `First` field leaves out its default and writes an empty value when
    /// nothing is selected, so a plan that permits no option survives a reload.
    pub fn encode<'a>(&self, current: Option<&'a str>) -> Option<&'a str> {
        let first = self.values.first().map(String::as_str);
        match (self.default, current) {
            (_, Some("")) => None,
            (OptionDefault::First, Some(v)) if Some(v) == first => None,
            (_, Some(v)) => Some(v),
            (OptionDefault::First, None) if first.is_some() => Some(""),
            (_, None) => None,
        }
    }

    /// Inverse of `encode` for a raw query value, without a plan allow-list
    pub fn decode(&self, raw: Option<&str>) -> Option<String> {
        match raw {
            Some("") if self.default == OptionDefault::First => None,
            other => self.reconcile(other, None),
        }
    }
}

/// Strict digit-string identifier; anything else is absent
pub fn parse_entity_id(raw: &str) -> Option<u64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

/// Exactly two uppercase ASCII letters, or absent
pub fn parse_country_code(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    if bytes.len() == 2 && bytes.iter().all(u8::is_ascii_uppercase) {
        Some(raw.to_string())
    } else {
        None
    }
}

/// Opaque hash fragment; blank collapses to absent
pub fn parse_ip_hash(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
