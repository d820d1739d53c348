//! # Scrubbing
//!
//! Replaces volatile substrings of canonical text with stable placeholders so snapshots stay
//! reproducible across runs, machines and time zones.
//!
//! ## Pipeline Order
//!
//! 1. Line endings are normalized to `\n`.
//! 2. Date-times matching a configured format become `DateTimeOffset_N` / `DateTime_N`
//!    (offset formats are tried first).
//! 3. GUID-shaped substrings become `Guid_N`.
//! 4. User rules run in registration order.
//!
//! Placeholder numbering lives in a [`ScrubContext`], which the engine creates once per
//! verification call: the same GUID gets the same number in every target of that call, and
//! numbering restarts with the next call.
//!
//! Built-in placeholders never match the built-in patterns, so scrubbing scrubbed text is a
//! no-op. User rules are expected to keep that property.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::trace;
use uuid::Uuid;

use crate::diagnostics::Result;
use crate::{err_cause, err_msg};

lazy_static! {
    static ref GUID_PATTERN: Regex = Regex::new(
        r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}"
    )
    .expect("GUID pattern is valid");
}

/// Formats recognized without any registration.
const DEFAULT_OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%:z"];
const DEFAULT_DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.fZ", "%Y-%m-%dT%H:%M:%S%.f"];

// =====================
// Date formats
// =====================

/// Whether a format carries a UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateKind {
    DateTime,
    DateTimeOffset,
}

impl DateKind {
    fn placeholder_prefix(&self) -> &'static str {
        match self {
            DateKind::DateTime => "DateTime",
            DateKind::DateTimeOffset => "DateTimeOffset",
        }
    }
}

/// A chrono strftime format compiled into a search pattern.
#[derive(Debug, Clone)]
pub struct DateFormat {
    format: String,
    kind: DateKind,
    regex: Regex,
}

impl DateFormat {
    /// Compiles `format`. Specifiers that cannot be searched for reliably are rejected here,
    /// at registration, rather than when text is scrubbed.
    pub fn new(format: &str, kind: DateKind) -> Result<Self> {
        let pattern = format_to_pattern(format)?;
        let regex = Regex::new(&pattern).map_err(|e| {
            err_cause!(
                Configuration,
                e,
                "date format '{}' produced an invalid pattern",
                format
            )
        })?;
        Ok(Self {
            format: format.to_string(),
            kind,
            regex,
        })
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn kind(&self) -> DateKind {
        self.kind
    }

    /// A candidate is only scrubbed if chrono accepts it, so `2020-13-45` stays visible.
    fn accepts(&self, candidate: &str) -> bool {
        match self.kind {
            DateKind::DateTimeOffset => DateTime::parse_from_str(candidate, &self.format).is_ok(),
            DateKind::DateTime => {
                NaiveDateTime::parse_from_str(candidate, &self.format).is_ok()
                    || NaiveDate::parse_from_str(candidate, &self.format).is_ok()
                    || NaiveTime::parse_from_str(candidate, &self.format).is_ok()
            }
        }
    }
}

/// Default date formats, offset formats first.
pub fn default_date_formats() -> Vec<DateFormat> {
    let offsets = DEFAULT_OFFSET_FORMATS
        .iter()
        .map(|f| (f, DateKind::DateTimeOffset));
    let naive = DEFAULT_DATETIME_FORMATS
        .iter()
        .map(|f| (f, DateKind::DateTime));
    offsets
        .chain(naive)
        .filter_map(|(f, kind)| DateFormat::new(f, kind).ok())
        .collect()
}

/// Translates a strftime format into a regex matching the text it would produce.
fn format_to_pattern(format: &str) -> Result<String> {
    let mut pattern = String::new();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            pattern.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4])));
            continue;
        }
        let spec = match chars.next() {
            Some(':') => match chars.next() {
                Some('z') => ":z".to_string(),
                other => return Err(unsupported(format, other.map(|c| format!(":{c}")))),
            },
            Some('.') => {
                let mut spec = ".".to_string();
                for next in chars.by_ref() {
                    spec.push(next);
                    if next == 'f' {
                        break;
                    }
                    if spec.len() > 2 {
                        break;
                    }
                }
                spec
            }
            Some(d @ ('3' | '6' | '9')) => match chars.next() {
                Some('f') => format!("{d}f"),
                other => return Err(unsupported(format, other.map(|c| format!("{d}{c}")))),
            },
            Some(c) => c.to_string(),
            None => return Err(unsupported(format, None)),
        };
        let piece = match spec.as_str() {
            "Y" => r"\d{4}",
            "y" | "m" | "d" | "H" | "I" | "M" | "S" | "C" => r"\d{2}",
            "e" => r"[ \d]\d",
            "j" => r"\d{3}",
            "b" | "h" | "a" => r"[A-Za-z]{3}",
            "B" | "A" => r"[A-Za-z]+",
            "p" => r"(?:AM|PM|am|pm)",
            "z" => r"[+-]\d{4}",
            ":z" => r"[+-]\d{2}:\d{2}",
            "f" => r"\d{1,9}",
            ".f" => r"(?:\.\d{1,9})?",
            ".3f" => r"\.\d{3}",
            ".6f" => r"\.\d{6}",
            ".9f" => r"\.\d{9}",
            "3f" => r"\d{3}",
            "6f" => r"\d{6}",
            "9f" => r"\d{9}",
            "T" => r"\d{2}:\d{2}:\d{2}",
            "R" => r"\d{2}:\d{2}",
            "F" => r"\d{4}-\d{2}-\d{2}",
            "D" => r"\d{2}/\d{2}/\d{2}",
            "%" => "%",
            _ => return Err(unsupported(format, Some(spec))),
        };
        pattern.push_str(piece);
    }
    Ok(pattern)
}

fn unsupported(format: &str, spec: Option<String>) -> crate::VerifyError {
    match spec {
        Some(spec) => err_msg!(
            Configuration,
            "date format '{}' uses unsupported specifier '%{}'",
            format,
            spec
        ),
        None => err_msg!(Configuration, "date format '{}' ends with a bare '%'", format),
    }
}

// =====================
// User rules
// =====================

/// A user-registered scrubbing rule.
#[derive(Clone)]
pub enum ScrubRule {
    /// Regex replacement; `$1`-style group references are honoured in `replacement`.
    Pattern { regex: Regex, replacement: String },
    /// Drops every line containing any of the needles.
    RemoveLinesContaining(Vec<String>),
    /// Arbitrary transform.
    Custom(Arc<dyn Fn(&str) -> String + Send + Sync>),
}

impl ScrubRule {
    /// Compiles a regex rule; a malformed pattern is a configuration error.
    pub fn pattern(pattern: &str, replacement: impl Into<String>) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| {
            err_cause!(Configuration, e, "invalid scrubber pattern '{}'", pattern)
        })?;
        Ok(ScrubRule::Pattern {
            regex,
            replacement: replacement.into(),
        })
    }

    pub fn remove_lines_containing<I, S>(needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScrubRule::RemoveLinesContaining(needles.into_iter().map(Into::into).collect())
    }

    pub fn custom(f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        ScrubRule::Custom(Arc::new(f))
    }

    fn apply(&self, text: &str) -> String {
        match self {
            ScrubRule::Pattern { regex, replacement } => {
                regex.replace_all(text, replacement.as_str()).into_owned()
            }
            ScrubRule::RemoveLinesContaining(needles) => text
                .split('\n')
                .filter(|line| !needles.iter().any(|n| line.contains(n.as_str())))
                .collect::<Vec<_>>()
                .join("\n"),
            ScrubRule::Custom(f) => f(text),
        }
    }
}

impl fmt::Debug for ScrubRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrubRule::Pattern { regex, replacement } => f
                .debug_struct("Pattern")
                .field("regex", &regex.as_str())
                .field("replacement", replacement)
                .finish(),
            ScrubRule::RemoveLinesContaining(needles) => f
                .debug_tuple("RemoveLinesContaining")
                .field(needles)
                .finish(),
            ScrubRule::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

// =====================
// Placeholder numbering
// =====================

/// Placeholder numbering state for one verification call.
#[derive(Debug, Default)]
pub struct ScrubContext {
    seen: HashMap<&'static str, HashMap<String, usize>>,
}

impl ScrubContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `{category}_{n}`, where `n` is the first-encounter index of `value`.
    fn placeholder(&mut self, category: &'static str, value: &str) -> String {
        let values = self.seen.entry(category).or_default();
        let next = values.len() + 1;
        let index = *values.entry(value.to_string()).or_insert(next);
        format!("{category}_{index}")
    }
}

// =====================
// Scrubber
// =====================

/// The assembled scrubbing configuration for one call.
#[derive(Debug, Clone)]
pub struct Scrubber {
    pub scrub_date_times: bool,
    pub scrub_guids: bool,
    date_formats: Vec<DateFormat>,
    rules: Vec<ScrubRule>,
}

impl Default for Scrubber {
    fn default() -> Self {
        Self {
            scrub_date_times: true,
            scrub_guids: true,
            date_formats: default_date_formats(),
            rules: Vec::new(),
        }
    }
}

impl Scrubber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_date_formats(mut self, formats: Vec<DateFormat>) -> Self {
        self.date_formats = formats;
        self
    }

    pub fn add_date_format(&mut self, format: DateFormat) {
        self.date_formats.push(format);
    }

    pub fn add_rule(&mut self, rule: ScrubRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[ScrubRule] {
        &self.rules
    }

    /// Scrubs `text`, numbering placeholders through `ctx`.
    pub fn scrub(&self, text: &str, ctx: &mut ScrubContext) -> String {
        let mut text = normalize_line_endings(text);

        if self.scrub_date_times {
            let offsets = self
                .date_formats
                .iter()
                .filter(|f| f.kind == DateKind::DateTimeOffset);
            let naive = self
                .date_formats
                .iter()
                .filter(|f| f.kind == DateKind::DateTime);
            for format in offsets.chain(naive) {
                text = replace_matches(
                    &format.regex,
                    &text,
                    |candidate| format.accepts(candidate).then(|| candidate.to_string()),
                    format.kind.placeholder_prefix(),
                    ctx,
                );
            }
        }

        if self.scrub_guids {
            text = replace_matches(
                &GUID_PATTERN,
                &text,
                |candidate| Uuid::parse_str(candidate).ok().map(|u| u.to_string()),
                "Guid",
                ctx,
            );
        }

        for rule in &self.rules {
            text = rule.apply(&text);
        }
        text
    }
}

/// Scrubs with a fresh context; convenience for single-target use.
pub fn scrub(text: &str, scrubber: &Scrubber) -> String {
    scrubber.scrub(text, &mut ScrubContext::new())
}

pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Replaces every boundary-delimited match that `key` accepts. `key` returns the identity
/// used for numbering, so differently-cased spellings of one GUID share a placeholder.
fn replace_matches(
    regex: &Regex,
    text: &str,
    key: impl Fn(&str) -> Option<String>,
    category: &'static str,
    ctx: &mut ScrubContext,
) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let mut replaced = 0usize;
    for m in regex.find_iter(text) {
        if !is_token_boundary(text, m.start(), m.end()) {
            continue;
        }
        let Some(identity) = key(m.as_str()) else {
            continue;
        };
        out.push_str(&text[last..m.start()]);
        out.push_str(&ctx.placeholder(category, &identity));
        last = m.end();
        replaced += 1;
    }
    if replaced == 0 {
        return text.to_string();
    }
    out.push_str(&text[last..]);
    trace!(category, replaced, "scrubbed volatile values");
    out
}

fn is_token_boundary(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(|c| c.is_alphanumeric()) && !after.is_some_and(|c| c.is_alphanumeric())
}
