//! Stateless field extractors.
//!
//! Every function here is total: a failed match returns `None` (or an empty
//! map) and the caller moves on to the next interpretation of the line.
//! Nothing in this module can fail on content.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::metrics::{FrequencyResidency, StateResidency};

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+(?:\.[0-9]+)?").expect("number regex"));

static FREQ_RESIDENCY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) MHz:\s*([\d.]+)%").expect("frequency residency regex"));

// ---------------------------------------------------------------------------
// Percentages and durations
// ---------------------------------------------------------------------------

/// Clamp a percentage into `[0, 100]`. NaN collapses to 0.
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

/// Convert `value` expressed in `unit` (`us`, `ms`, `s`) to nanoseconds.
/// Unknown units yield 0.
pub fn to_nanoseconds(value: f64, unit: &str) -> u64 {
    let scale = match unit.to_ascii_lowercase().as_str() {
        "us" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        _ => return 0,
    };
    let nanos = (value * scale).round();
    if nanos.is_finite() && nanos > 0.0 {
        nanos as u64
    } else {
        0
    }
}

/// Busy percentage for a GPU-process line.
///
/// An explicit percentage wins when it parses. Otherwise the busy share is
/// `active / window`, which is 0 for an empty window.
pub fn derive_busy_percent(active_nanos: u64, explicit: Option<&str>, window: Duration) -> f64 {
    if let Some(parsed) = explicit.and_then(|s| s.trim().parse::<f64>().ok()) {
        return clamp_percent(parsed);
    }

    let window_nanos = window.as_nanos();
    if window_nanos == 0 || active_nanos == 0 {
        return 0.0;
    }

    clamp_percent(active_nanos as f64 / window_nanos as f64 * 100.0)
}

// ---------------------------------------------------------------------------
// Token gates
// ---------------------------------------------------------------------------

/// True when `haystack` contains every token. Substring based, order
/// independent.
pub fn has_all(haystack: &str, tokens: &[&str]) -> bool {
    tokens.iter().all(|t| haystack.contains(t))
}

/// True when `haystack` contains none of the tokens.
pub fn has_none(haystack: &str, tokens: &[&str]) -> bool {
    !has_any(haystack, tokens)
}

/// True when `haystack` contains at least one token.
pub fn has_any(haystack: &str, tokens: &[&str]) -> bool {
    tokens.iter().any(|t| haystack.contains(t))
}

// ---------------------------------------------------------------------------
// Value extraction
// ---------------------------------------------------------------------------

/// Rightmost number preceding the last occurrence of `unit`.
///
/// The text before the unit is cut at the first `(` and then reduced to what
/// follows the last `:`, so `"Total: 10.0 W out of 100.0 W"` yields 100.0 and
/// `"CPU Power: 15.5 W (100%)"` yields 15.5.
pub fn parse_trailing_value(line: &str, unit: &str) -> Option<f64> {
    // ASCII lowercasing keeps byte offsets aligned with `line`.
    let lower = line.to_ascii_lowercase();
    let idx = lower.rfind(&unit.to_ascii_lowercase())?;

    let mut segment = &line[..idx];
    if let Some(paren) = segment.find('(') {
        segment = &segment[..paren];
    }
    if let Some(colon) = segment.rfind(':') {
        segment = &segment[colon + 1..];
    }

    NUMBER.find_iter(segment).last()?.as_str().parse().ok()
}

/// First number before `unit` in the text after the first colon.
///
/// Meant for `"Label: VALUE% (breakdown...)"` lines: the breakdown is dropped
/// before the unit is searched for.
pub fn parse_leading_value_after_colon(line: &str, unit: &str) -> Option<f64> {
    let segment = match line.find(':') {
        Some(colon) => &line[colon + 1..],
        None => line,
    };
    let segment = match segment.find('(') {
        Some(paren) => &segment[..paren],
        None => segment,
    };

    let idx = segment
        .to_ascii_lowercase()
        .find(&unit.to_ascii_lowercase())?;

    NUMBER.find(&segment[..idx])?.as_str().parse().ok()
}

/// Body of the first parenthetical in `line`, with trailing `)` removed.
pub fn parenthesized(line: &str) -> Option<&str> {
    let open = line.find('(')?;
    Some(line[open + 1..].trim_end_matches(')'))
}

/// Parse `"<int> MHz: <float>%"` pairs. Later duplicates overwrite earlier
/// ones.
pub fn parse_freq_residency(body: &str) -> FrequencyResidency {
    let mut residency = FrequencyResidency::new();
    for caps in FREQ_RESIDENCY.captures_iter(body) {
        let (Ok(freq), Ok(percent)) = (caps[1].parse::<u32>(), caps[2].parse::<f64>()) else {
            continue;
        };
        residency.insert(freq, clamp_percent(percent));
    }
    residency
}

/// Parse `"NAME : value% NAME : value% ..."` in positional groups of three
/// whitespace-separated tokens. Groups whose name lacks `prefix` are skipped.
pub fn parse_named_states(body: &str, prefix: &str) -> StateResidency {
    let tokens: Vec<&str> = body.split_whitespace().collect();
    let mut states = StateResidency::new();

    for group in tokens.chunks_exact(3) {
        let name = group[0].trim_matches(':');
        if !name.starts_with(prefix) {
            continue;
        }
        if let Ok(value) = group[2].trim_end_matches('%').parse::<f64>() {
            states.insert(name.to_string(), clamp_percent(value));
        }
    }

    states
}

// ---------------------------------------------------------------------------
// Power
// ---------------------------------------------------------------------------

fn power_value(line: &str, unit: &str) -> Option<f64> {
    parse_trailing_value(line, unit).or_else(|| parse_leading_value_after_colon(line, unit))
}

/// Power in watts from a line reporting either `mW` or `W`.
///
/// `mW` is tried first because `w` is a suffix of it.
pub fn parse_power_watts(line: &str) -> Option<f64> {
    match power_value(line, "mw") {
        Some(mw) => Some(mw / 1000.0),
        None => power_value(line, "w"),
    }
}

/// Power in milliwatts from a line reporting either `mW` or `W`.
pub fn parse_power_milliwatts(line: &str) -> Option<f64> {
    match power_value(line, "mw") {
        Some(mw) => Some(mw),
        None => power_value(line, "w").map(|w| w * 1000.0),
    }
}
