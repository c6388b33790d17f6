//! Naming convention for the Charteto collector.
//!
//! The collector silently discards metrics whose name does not start with a
//! letter, rejects forward slashes anywhere in a name (even percent-encoded),
//! and corrupts tag keys that begin with a digit into empty strings.
//! [`ChartetoNaming`] rewrites raw names so none of that happens:
//!
//! ```text
//! raw name ─► delegate ─► '/' → '_' ─► JSON-escape ─► "m." prefix
//!          ─► truncate to 200 ─► strip trailing '.'
//! ```

use std::fmt;
use std::fmt::Write as _;

use serde::Serialize;

use crate::types::MeterType;

/// Longest name the collector accepts, in characters.
pub const MAX_NAME_LENGTH: usize = 200;

/// Prepended to names and tag keys that would otherwise be dropped.
pub const MARKER_PREFIX: &str = "m.";

/// Base naming policy applied before the collector-specific rules.
pub trait NamingConvention: Send + Sync {
    fn name(&self, name: &str, meter_type: MeterType, base_unit: Option<&str>) -> String;

    fn tag_key(&self, key: &str) -> String {
        key.to_string()
    }

    fn tag_value(&self, value: &str) -> String {
        value.to_string()
    }
}

/// Dot-separated names, passed through as registered.
#[derive(Debug, Clone, Copy, Default)]
pub struct DotNaming;

impl NamingConvention for DotNaming {
    fn name(&self, name: &str, _meter_type: MeterType, _base_unit: Option<&str>) -> String {
        name.to_string()
    }
}

// ── Sanitized strings ──────────────────────────────────────────────

/// A metric name that satisfies the collector's lexical rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SanitizedName(String);

/// A tag key that is JSON-escaped and never starts with a digit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SanitizedTagKey(String);

/// A JSON-escaped tag value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SanitizedTagValue(String);

impl SanitizedName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl SanitizedTagKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl SanitizedTagValue {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SanitizedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SanitizedTagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SanitizedTagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── ChartetoNaming ─────────────────────────────────────────────────

/// Collector-safe naming layered over a delegate convention.
#[derive(Debug, Clone, Default)]
pub struct ChartetoNaming<D = DotNaming> {
    delegate: D,
}

impl ChartetoNaming {
    /// Collector naming over plain dot-separated names.
    pub fn new() -> Self {
        Self::with_delegate(DotNaming)
    }
}

impl<D: NamingConvention> ChartetoNaming<D> {
    pub fn with_delegate(delegate: D) -> Self {
        Self { delegate }
    }

    /// Sanitize a metric name.
    ///
    /// An empty delegate result is treated like any other name without a
    /// leading letter and becomes the bare marker (`"m"` once the trailing
    /// dot is stripped).
    pub fn sanitize_name(
        &self,
        name: &str,
        meter_type: MeterType,
        base_unit: Option<&str>,
    ) -> SanitizedName {
        SanitizedName(self.name_within(name, meter_type, base_unit, MAX_NAME_LENGTH))
    }

    /// Sanitize `name` and append `.suffix`. The base name is truncated
    /// first so the suffix always survives the length limit.
    pub fn sanitize_suffixed_name(
        &self,
        name: &str,
        suffix: &str,
        meter_type: MeterType,
        base_unit: Option<&str>,
    ) -> SanitizedName {
        let suffix = escape_json(&suffix.replace('/', "_"));
        let budget = MAX_NAME_LENGTH.saturating_sub(suffix.chars().count() + 1);

        let mut out = self.name_within(name, meter_type, base_unit, budget);
        out.push('.');
        out.push_str(&suffix);
        SanitizedName(out)
    }

    fn name_within(
        &self,
        name: &str,
        meter_type: MeterType,
        base_unit: Option<&str>,
        limit: usize,
    ) -> String {
        let base = self.delegate.name(name, meter_type, base_unit).replace('/', "_");

        let mut out = String::with_capacity(base.len().min(limit) + MARKER_PREFIX.len());
        if !base.chars().next().is_some_and(char::is_alphabetic) {
            out.push_str(MARKER_PREFIX);
        }
        push_escaped(&mut out, &base, Some(limit));

        let trimmed = out.trim_end_matches('.').len();
        out.truncate(trimmed);
        out
    }

    /// Sanitize a tag key. Keys starting with a digit get the marker prefix;
    /// an empty key becomes the marker itself.
    pub fn sanitize_tag_key(&self, key: &str) -> SanitizedTagKey {
        let base = self.delegate.tag_key(key);

        let mut out = String::with_capacity(base.len() + MARKER_PREFIX.len());
        match base.chars().next() {
            None => out.push_str(MARKER_PREFIX),
            Some(c) if c.is_ascii_digit() => out.push_str(MARKER_PREFIX),
            Some(_) => {}
        }
        push_escaped(&mut out, &base, None);
        SanitizedTagKey(out)
    }

    /// Sanitize a tag value. Values may start with a digit.
    pub fn sanitize_tag_value(&self, value: &str) -> SanitizedTagValue {
        let base = self.delegate.tag_value(value);
        let mut out = String::with_capacity(base.len());
        push_escaped(&mut out, &base, None);
        SanitizedTagValue(out)
    }
}

impl<D: NamingConvention> NamingConvention for ChartetoNaming<D> {
    fn name(&self, name: &str, meter_type: MeterType, base_unit: Option<&str>) -> String {
        self.sanitize_name(name, meter_type, base_unit).0
    }

    fn tag_key(&self, key: &str) -> String {
        self.sanitize_tag_key(key).0
    }

    fn tag_value(&self, value: &str) -> String {
        self.sanitize_tag_value(value).0
    }
}

/// JSON-escape a string (quotes, backslashes, control characters).
pub fn escape_json(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    push_escaped(&mut out, input, None);
    out
}

/// Append the escaped form of `input` to `out`, stopping before the first
/// escape sequence that would push `out` past `limit` characters. Escape
/// sequences are never split.
fn push_escaped(out: &mut String, input: &str, limit: Option<usize>) {
    let mut len = out.chars().count();
    let mut token = String::with_capacity(6);

    for c in input.chars() {
        token.clear();
        escape_char(c, &mut token);

        if let Some(limit) = limit {
            let width = token.chars().count();
            if len + width > limit {
                break;
            }
            len += width;
        }
        out.push_str(&token);
    }
}

fn escape_char(c: char, out: &mut String) {
    match c {
        '"' => out.push_str("\\\""),
        '\\' => out.push_str("\\\\"),
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        '\u{08}' => out.push_str("\\b"),
        '\u{0c}' => out.push_str("\\f"),
        c if (c as u32) < 0x20 => {
            let _ = write!(out, "\\u{:04x}", c as u32);
        }
        c => out.push(c),
    }
}
