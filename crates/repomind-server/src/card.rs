// SPDX-License-Identifier: Apache-2.0

//! SVG stats card and shields.io badge payloads.

use repomind_core::AnalyticsSnapshot;
use repomind_core::utils::format_count;
use serde::Serialize;

const CARD_WIDTH: u32 = 400;
const CARD_HEIGHT: u32 = 150;

/// shields.io endpoint badge body.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Badge {
    /// Always 1.
    pub schema_version: u8,
    /// Left-hand text.
    pub label: String,
    /// Right-hand text.
    pub message: String,
    /// Right-hand background color.
    pub color: String,
}

impl Badge {
    /// Badge reporting the total number of questions answered.
    #[must_use]
    pub fn queries(total: u64) -> Self {
        Self {
            schema_version: 1,
            label: "questions answered".to_string(),
            message: format_count(total),
            color: "blueviolet".to_string(),
        }
    }
}

/// Escapes text for inclusion in SVG markup.
#[must_use]
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn top_entry(stats: &std::collections::BTreeMap<String, u64>) -> Option<(&str, u64)> {
    stats
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(k, v)| (k.as_str(), *v))
}

/// Renders the analytics snapshot as a fixed-size SVG card.
#[must_use]
pub fn render_stats_card(snapshot: &AnalyticsSnapshot) -> String {
    let rows = [
        ("Questions", format_count(snapshot.total_queries)),
        ("Visitors", format_count(snapshot.total_visitors)),
        ("Active (24h)", format_count(snapshot.active_users_24h)),
        (
            "Top country",
            top_entry(&snapshot.country_stats).map_or_else(|| "n/a".to_string(), |(k, _)| k.to_string()),
        ),
    ];

    let mut body = String::new();
    for (i, (label, value)) in rows.iter().enumerate() {
        let y = 60 + i * 22;
        body.push_str(&format!(
            "  <text x=\"24\" y=\"{y}\" class=\"label\">{}</text>\n  <text x=\"{}\" y=\"{y}\" class=\"value\" text-anchor=\"end\">{}</text>\n",
            escape_xml(label),
            CARD_WIDTH - 24,
            escape_xml(value),
        ));
    }

    format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{CARD_WIDTH}\" height=\"{CARD_HEIGHT}\" viewBox=\"0 0 {CARD_WIDTH} {CARD_HEIGHT}\" role=\"img\" aria-label=\"RepoMind stats\">\n\
  <style>\n\
    .title {{ font: 600 16px sans-serif; fill: #a78bfa; }}\n\
    .label {{ font: 400 13px sans-serif; fill: #c9d1d9; }}\n\
    .value {{ font: 600 13px sans-serif; fill: #ffffff; }}\n\
  </style>\n\
  <rect x=\"0.5\" y=\"0.5\" rx=\"8\" width=\"{}\" height=\"{}\" fill=\"#0d1117\" stroke=\"#30363d\"/>\n\
  <text x=\"24\" y=\"32\" class=\"title\">RepoMind Stats</text>\n\
{body}</svg>\n",
        CARD_WIDTH - 1,
        CARD_HEIGHT - 1,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn badge_uses_compact_count() {
        let badge = Badge::queries(1_234);
        assert_eq!(badge.message, "1.2k");
        let json = serde_json::to_value(&badge).expect("serialize");
        assert_eq!(json["schemaVersion"], 1);
    }

    #[test]
    fn escape_covers_markup_characters() {
        assert_eq!(escape_xml("<a & 'b'>"), "&lt;a &amp; &apos;b&apos;&gt;");
    }

    #[test]
    fn card_renders_counts_and_top_country() {
        let snapshot = AnalyticsSnapshot {
            total_queries: 1_500,
            total_visitors: 12,
            country_stats: [("DE".to_string(), 3), ("US".to_string(), 7)].into(),
            ..AnalyticsSnapshot::default()
        };

        let svg = render_stats_card(&snapshot);
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains(">1.5k<"));
        assert!(svg.contains(">12<"));
        assert!(svg.contains(">US<"));
        assert!(svg.trim_end().ends_with("</svg>"));
    }

    #[test]
    fn empty_snapshot_renders() {
        let svg = render_stats_card(&AnalyticsSnapshot::default());
        assert!(svg.contains(">n/a<"));
    }
}
