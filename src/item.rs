//! Backend alert/recommendation records and the per-field resolvers the feed
//! filters, sorts, and groups on.
//!
//! Field precedence is explicit per resolver:
//! - current probability: `probability_curr`, then `market_p_yes`
//! - previous probability: `probability_prev`, then `prev_market_p_yes`
//! - price before/after a move: `old_price`/`new_price`, then the market probabilities
//! - move size: `|after - before|` when both prices resolve, else `|delta_pct|`, `|move|`, 0

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

const MAX_RATIONALE_LINES: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertItem {
    pub id: Option<i64>,
    #[serde(rename = "type")]
    pub alert_type: Option<String>,
    pub market_id: Option<String>,
    pub title: Option<String>,
    pub category: Option<String>,
    #[serde(rename = "move")]
    pub price_move: Option<f64>,
    pub delta_pct: Option<f64>,
    pub market_p_yes: Option<f64>,
    pub prev_market_p_yes: Option<f64>,
    pub probability_curr: Option<f64>,
    pub probability_prev: Option<f64>,
    pub old_price: Option<f64>,
    pub new_price: Option<f64>,
    pub liquidity: Option<f64>,
    pub volume_24h: Option<f64>,
    pub strength: Option<String>,
    pub confidence: Option<String>,
    pub suggested_action: Option<String>,
    pub signal_type: Option<String>,
    pub delivery_status: Option<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub filter_reasons: Vec<String>,
    pub market_slug: Option<String>,
    pub market_url: Option<String>,
    pub snapshot_bucket: Option<String>,
    pub source_ts: Option<String>,
    pub triggered_at: Option<String>,
    pub created_at: Option<String>,
    pub message: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Which list a view pages through. Identity keys and storage keys differ per feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Alerts,
    Copilot,
}

impl FeedKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alerts => "alerts",
            Self::Copilot => "copilot",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "alerts" => Some(Self::Alerts),
            "copilot" => Some(Self::Copilot),
            _ => None,
        }
    }

    pub fn page_size(self) -> u32 {
        match self {
            Self::Alerts => 50,
            Self::Copilot => 10,
        }
    }

    /// Stable per-item key used for page de-duplication and triage state.
    pub fn item_key(self, item: &AlertItem) -> String {
        if let Some(id) = item.id {
            return match self {
                Self::Alerts => format!("alert:{id}"),
                Self::Copilot => format!("rec:{id}"),
            };
        }

        let created_at = non_empty(&item.created_at).unwrap_or("unknown");
        match self {
            Self::Alerts => format!(
                "alert:{}:{}",
                non_empty(&item.market_id).unwrap_or("unknown"),
                created_at
            ),
            Self::Copilot => format!(
                "rec:{}:{}",
                non_empty(&item.market_url).unwrap_or("unknown"),
                created_at
            ),
        }
    }
}

impl AlertItem {
    pub fn probability_current(&self) -> Option<f64> {
        self.probability_curr.or(self.market_p_yes)
    }

    pub fn probability_previous(&self) -> Option<f64> {
        self.probability_prev.or(self.prev_market_p_yes)
    }

    pub fn price_before(&self) -> Option<f64> {
        self.old_price.or(self.prev_market_p_yes)
    }

    pub fn price_after(&self) -> Option<f64> {
        self.new_price.or(self.market_p_yes)
    }

    pub fn move_value(&self) -> f64 {
        match (self.price_before(), self.price_after()) {
            (Some(before), Some(after)) => (after - before).abs(),
            _ => self.delta_pct.or(self.price_move).unwrap_or(0.0).abs(),
        }
    }

    pub fn move_delta(&self) -> f64 {
        self.price_after().unwrap_or(0.0) - self.price_before().unwrap_or(0.0)
    }

    pub fn strength_label(&self) -> Option<&str> {
        non_empty(&self.strength).or_else(|| non_empty(&self.confidence))
    }

    pub fn is_fast(&self) -> bool {
        self.alert_type
            .as_deref()
            .map(|kind| kind.to_ascii_uppercase().contains("FAST"))
            .unwrap_or(false)
    }

    pub fn is_actionable(&self) -> bool {
        match non_empty(&self.suggested_action) {
            Some(action) => !action.eq_ignore_ascii_case("IGNORE"),
            None => false,
        }
    }

    pub fn is_sent(&self) -> bool {
        self.delivery_status.as_deref() == Some("sent")
    }

    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        non_empty(&self.created_at).and_then(parse_timestamp)
    }

    /// Up to three short rationale lines, from `message` when present, else `filter_reasons`.
    pub fn rationale_lines(&self) -> Vec<String> {
        if let Some(message) = non_empty(&self.message) {
            return message
                .lines()
                .map(|line| {
                    line.trim_start_matches(|c: char| {
                        c.is_whitespace() || c == '-' || c == '*' || c == '•'
                    })
                    .trim()
                })
                .filter(|line| !line.is_empty())
                .take(MAX_RATIONALE_LINES)
                .map(str::to_string)
                .collect();
        }

        self.filter_reasons
            .iter()
            .take(MAX_RATIONALE_LINES)
            .cloned()
            .collect()
    }
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_key_prefers_numeric_id() {
        let item = AlertItem {
            id: Some(42),
            market_id: Some("m-1".to_string()),
            ..AlertItem::default()
        };
        assert_eq!(FeedKind::Alerts.item_key(&item), "alert:42");
        assert_eq!(FeedKind::Copilot.item_key(&item), "rec:42");
    }

    #[test]
    fn item_key_falls_back_to_composite() {
        let item = AlertItem {
            market_id: Some("m-1".to_string()),
            market_url: Some("https://polymarket.com/event/x".to_string()),
            created_at: Some("2026-01-01T00:00:00Z".to_string()),
            ..AlertItem::default()
        };
        assert_eq!(
            FeedKind::Alerts.item_key(&item),
            "alert:m-1:2026-01-01T00:00:00Z"
        );
        assert_eq!(
            FeedKind::Copilot.item_key(&item),
            "rec:https://polymarket.com/event/x:2026-01-01T00:00:00Z"
        );
        assert_eq!(
            FeedKind::Alerts.item_key(&AlertItem::default()),
            "alert:unknown:unknown"
        );
    }

    #[test]
    fn probability_resolvers_follow_precedence() {
        let item = AlertItem {
            probability_curr: Some(0.7),
            market_p_yes: Some(0.6),
            prev_market_p_yes: Some(0.4),
            ..AlertItem::default()
        };
        assert_eq!(item.probability_current(), Some(0.7));
        assert_eq!(item.probability_previous(), Some(0.4));

        let fallback = AlertItem {
            market_p_yes: Some(0.6),
            ..AlertItem::default()
        };
        assert_eq!(fallback.probability_current(), Some(0.6));
        assert_eq!(fallback.probability_previous(), None);
    }

    #[test]
    fn move_value_uses_prices_then_delta_then_move() {
        let priced = AlertItem {
            old_price: Some(0.40),
            new_price: Some(0.25),
            delta_pct: Some(0.9),
            ..AlertItem::default()
        };
        assert!((priced.move_value() - 0.15).abs() < 1e-12);
        assert!((priced.move_delta() + 0.15).abs() < 1e-12);

        let delta_only = AlertItem {
            delta_pct: Some(-0.08),
            price_move: Some(0.5),
            ..AlertItem::default()
        };
        assert!((delta_only.move_value() - 0.08).abs() < 1e-12);

        let move_only = AlertItem {
            price_move: Some(-0.3),
            ..AlertItem::default()
        };
        assert!((move_only.move_value() - 0.3).abs() < 1e-12);
        assert_eq!(AlertItem::default().move_value(), 0.0);
    }

    #[test]
    fn fast_and_actionable_flags_are_case_insensitive() {
        let item = AlertItem {
            alert_type: Some("dislocation_fast".to_string()),
            suggested_action: Some("follow".to_string()),
            ..AlertItem::default()
        };
        assert!(item.is_fast());
        assert!(item.is_actionable());

        let ignored = AlertItem {
            suggested_action: Some("Ignore".to_string()),
            ..AlertItem::default()
        };
        assert!(!ignored.is_fast());
        assert!(!ignored.is_actionable());
        assert!(!AlertItem::default().is_actionable());
    }

    #[test]
    fn strength_label_falls_back_to_confidence() {
        let item = AlertItem {
            strength: Some(String::new()),
            confidence: Some("HIGH".to_string()),
            ..AlertItem::default()
        };
        assert_eq!(item.strength_label(), Some("HIGH"));
    }

    #[test]
    fn timestamps_parse_rfc3339_and_naive() {
        let zoned = parse_timestamp("2026-03-01T10:00:00+02:00").unwrap();
        assert_eq!(zoned.to_rfc3339(), "2026-03-01T08:00:00+00:00");

        let naive = parse_timestamp("2026-03-01T10:00:00.123456").unwrap();
        assert_eq!(naive.timestamp(), 1_772_359_200);
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn rationale_prefers_message_lines() {
        let item = AlertItem {
            message: Some("- first\n\n• second\r\n * third\nfourth".to_string()),
            filter_reasons: vec!["reason".to_string()],
            ..AlertItem::default()
        };
        assert_eq!(item.rationale_lines(), vec!["first", "second", "third"]);

        let reasons = AlertItem {
            filter_reasons: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            ..AlertItem::default()
        };
        assert_eq!(reasons.rationale_lines(), vec!["a", "b", "c"]);
    }

    #[test]
    fn deserializes_partial_payloads() {
        let item: AlertItem = serde_json::from_str(
            r#"{"id": 7, "type": "FAST", "move": 0.1, "title": "Will it rain?", "extra": 1}"#,
        )
        .unwrap();
        assert_eq!(item.id, Some(7));
        assert_eq!(item.alert_type.as_deref(), Some("FAST"));
        assert_eq!(item.price_move, Some(0.1));
        assert!(item.filter_reasons.is_empty());
    }
}
