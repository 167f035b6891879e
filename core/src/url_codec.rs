// URL filter codec
//
// The query string is the shareable source of truth for a view's filters.
// `parse` turns arbitrary location text into a fully defaulted FilterState;
// `serialize` writes the state back without touching the path, the fragment
// or query keys this codec does not own.

use crate::filter_state::{
    parse_country_code, parse_entity_id, parse_ip_hash, FilterState, OptionList,
};
use crate::time_window::{ensure_time_window, Timestamp};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use url::form_urlencoded;

pub const KEY_FROM: &str = "from";
pub const KEY_TO: &str = "to";
pub const KEY_WEBSITE_ID: &str = "website_id";
pub const KEY_ENV_ID: &str = "env_id";
pub const KEY_CATEGORY: &str = "category";
pub const KEY_SEVERITY: &str = "severity";
pub const KEY_IP_HASH: &str = "ip_hash";
pub const KEY_COUNTRY_CODE: &str = "country_code";
pub const KEY_DEMO: &str = "demo";

/// Owned keys in serialization order
pub const OWNED_KEYS: [&str; 9] = [
    KEY_FROM,
    KEY_TO,
    KEY_WEBSITE_ID,
    KEY_ENV_ID,
    KEY_CATEGORY,
    KEY_SEVERITY,
    KEY_IP_HASH,
    KEY_COUNTRY_CODE,
    KEY_DEMO,
];

/// A location split into its path part, raw query and fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location<'a> {
    /// Everything before `?` (scheme, host and path, or a bare path)
    pub base: &'a str,
    pub query: &'a str,
    pub fragment: Option<&'a str>,
}

impl<'a> Location<'a> {
    pub fn split(url: &'a str) -> Self {
        let (rest, fragment) = match url.find('#') {
            Some(i) => (&url[..i], Some(&url[i + 1..])),
            None => (url, None),
        };
        let (base, query) = match rest.find('?') {
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => (rest, ""),
        };
        Self {
            base,
            query,
            fragment,
        }
    }

    /// First value for `key`, percent-decoded
    pub fn param(&self, key: &str) -> Option<String> {
        form_urlencoded::parse(self.query.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    pub fn has_param(&self, key: &str) -> bool {
        form_urlencoded::parse(self.query.as_bytes()).any(|(k, _)| k == key)
    }
}

/// Render a timestamp the way the codec writes it: RFC 3339, milliseconds, `Z`
pub fn format_timestamp(t: Timestamp) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Lenient timestamp read: RFC 3339, a zone-less date-time taken as UTC, or a bare date
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(t.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

/// Query-string codec for one view's filter schema
#[derive(Debug, Clone)]
pub struct UrlFilterCodec {
    categories: OptionList,
    severities: OptionList,
    fallback_days: u32,
}

impl UrlFilterCodec {
    pub fn new(categories: OptionList, severities: OptionList, fallback_days: u32) -> Self {
        Self {
            categories,
            severities,
            fallback_days,
        }
    }

    pub fn categories(&self) -> &OptionList {
        &self.categories
    }

    pub fn severities(&self) -> &OptionList {
        &self.severities
    }

    pub fn fallback_days(&self) -> u32 {
        self.fallback_days
    }

    /// Read every owned key with a typed, validated default. Never fails.
    pub fn parse(&self, url: &str, now: Timestamp) -> FilterState {
        let location = Location::split(url);

        let from = location.param(KEY_FROM).as_deref().and_then(parse_timestamp);
        let to = location.param(KEY_TO).as_deref().and_then(parse_timestamp);
        let window = ensure_time_window(from, to, now, self.fallback_days);


        FilterState {
            from: window.from,
            to: window.to,
            website_id: location
                .param(KEY_WEBSITE_ID)
                .as_deref()
                .and_then(parse_entity_id),
            env_id: location.param(KEY_ENV_ID).as_deref().and_then(parse_entity_id),
            category: self.categories.decode(location.param(KEY_CATEGORY).as_deref()),
            severity: self.severities.decode(location.param(KEY_SEVERITY).as_deref()),
            ip_hash: location.param(KEY_IP_HASH).as_deref().and_then(parse_ip_hash),
            country_code: location
                .param(KEY_COUNTRY_CODE)
                .as_deref()
                .and_then(parse_country_code),
            include_demo: location.has_param(KEY_DEMO),
        }
    }

    /// Write `state` into `current_url`, keeping its base, fragment and foreign keys.
    ///
    /// Owned keys are written in a fixed order after any foreign keys; a key
    /// whose value is absent or neutral is omitted. A category left empty by
    /// the plan is written as `category=` so it reads back as empty.
    pub fn serialize(&self, state: &FilterState, current_url: &str) -> String {
        let location = Location::split(current_url);
        let mut query = form_urlencoded::Serializer::new(String::new());

        for (key, value) in form_urlencoded::parse(location.query.as_bytes()) {
            if !OWNED_KEYS.iter().any(|owned| *owned == key) {
                query.append_pair(&key, &value);
            }
        }

        query.append_pair(KEY_FROM, &format_timestamp(state.from));
        query.append_pair(KEY_TO, &format_timestamp(state.to));
        if let Some(id) = state.website_id {
            query.append_pair(KEY_WEBSITE_ID, &id.to_string());
        }
        if let Some(id) = state.env_id {
            query.append_pair(KEY_ENV_ID, &id.to_string());
        }
        if let Some(category) = self.categories.encode(state.category.as_deref()) {
            query.append_pair(KEY_CATEGORY, category);
        }
        if let Some(severity) = self.severities.encode(state.severity.as_deref()) {
            query.append_pair(KEY_SEVERITY, severity);
        }
        if let Some(hash) = state.ip_hash.as_deref().filter(|h| !h.is_empty()) {
            query.append_pair(KEY_IP_HASH, hash);
        }
        if let Some(code) = state.country_code.as_deref() {
            query.append_pair(KEY_COUNTRY_CODE, code);
        }
        if state.include_demo {
            query.append_pair(KEY_DEMO, "1");
        }

        let query = query.finish();
        let mut out = String::with_capacity(location.base.len() + query.len() + 2);
        out.push_str(location.base);
        if !query.is_empty() {
            out.push('?');
            out.push_str(&query);
        }
        if let Some(fragment) = location.fragment {
            out.push('#');
            out.push_str(fragment);
        }
        out
    }
}
