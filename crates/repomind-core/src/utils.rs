// SPDX-License-Identifier: Apache-2.0

//! Text utility functions for RepoMind.
//!
//! Truncation for prompt assembly, compact counts for badges and stats cards,
//! and relative timestamps for visitor listings.

use chrono::{DateTime, TimeZone, Utc};

/// Truncates text to a maximum length with a custom suffix.
///
/// Uses character count (not byte count) to safely handle multi-byte UTF-8.
/// The suffix is included in the max length calculation.
///
/// # Examples
///
/// ```
/// use repomind_core::utils::truncate_with_suffix;
///
/// let text = "This is a very long string that needs truncation";
/// let result = truncate_with_suffix(text, 20, "... [more]");
/// assert!(result.ends_with("... [more]"));
/// assert!(result.chars().count() <= 20);
/// ```
#[must_use]
pub fn truncate_with_suffix(text: &str, max_len: usize, suffix: &str) -> String {
    let char_count = text.chars().count();
    if char_count <= max_len {
        text.to_string()
    } else {
        let suffix_len = suffix.chars().count();
        let truncate_at = max_len.saturating_sub(suffix_len);
        let truncated: String = text.chars().take(truncate_at).collect();
        format!("{truncated}{suffix}")
    }
}

/// Truncates text to a maximum length with default ellipsis suffix "...".
///
/// # Examples
///
/// ```
/// use repomind_core::utils::truncate;
///
/// assert_eq!(truncate("Hello", 10), "Hello");
/// assert_eq!(truncate("Hello, world", 8), "Hello...");
/// ```
#[must_use]
pub fn truncate(text: &str, max_len: usize) -> String {
    truncate_with_suffix(text, max_len, "...")
}

/// Formats a count compactly: `999`, `1.2k`, `3.4M`.
///
/// A trailing `.0` is dropped.
///
/// # Examples
///
/// ```
/// use repomind_core::utils::format_count;
///
/// assert_eq!(format_count(999), "999");
/// assert_eq!(format_count(1_234), "1.2k");
/// assert_eq!(format_count(2_000_000), "2M");
/// ```
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_count(n: u64) -> String {
    let (value, unit) = match n {
        0..1_000 => return n.to_string(),
        1_000..1_000_000 => (n as f64 / 1_000.0, "k"),
        _ => (n as f64 / 1_000_000.0, "M"),
    };
    let rounded = format!("{value:.1}");
    let rounded = rounded.strip_suffix(".0").unwrap_or(&rounded);
    format!("{rounded}{unit}")
}

/// Formats a `DateTime<Utc>` relative to `now` (e.g., "3 days ago").
#[must_use]
pub fn format_relative_time_from(dt: &DateTime<Utc>, now: &DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(*dt);

    let plural = |n: i64, unit: &str| {
        if n == 1 {
            format!("1 {unit} ago")
        } else {
            format!("{n} {unit}s ago")
        }
    };

    if duration.num_days() > 30 {
        plural(duration.num_days() / 30, "month")
    } else if duration.num_days() > 0 {
        plural(duration.num_days(), "day")
    } else if duration.num_hours() > 0 {
        plural(duration.num_hours(), "hour")
    } else if duration.num_minutes() > 0 {
        plural(duration.num_minutes(), "minute")
    } else {
        "just now".to_string()
    }
}

/// Formats a millisecond epoch timestamp relative to now.
///
/// Out-of-range timestamps are reported as "unknown".
#[must_use]
pub fn format_relative_millis(millis: i64) -> String {
    match Utc.timestamp_millis_opt(millis).single() {
        Some(dt) => format_relative_time_from(&dt, &Utc::now()),
        None => "unknown".to_string(),
    }
}
