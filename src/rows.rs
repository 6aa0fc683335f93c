//! Flattens a filtered feed into header and item rows for list rendering.

use std::collections::BTreeSet;

use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::item::{AlertItem, FeedKind};

pub const ACTION_GROUP_ORDER: [&str; 5] = ["FOLLOW", "WATCH", "WAIT", "IGNORE", "UNKNOWN"];
pub const CONFIDENCE_GROUP_ORDER: [&str; 4] = ["HIGH", "MEDIUM", "LOW", "UNKNOWN"];
const UNKNOWN_GROUP: &str = "UNKNOWN";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupingMode {
    #[default]
    None,
    Date,
    Action,
    Confidence,
}

impl GroupingMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "date" => Some(Self::Date),
            "action" => Some(Self::Action),
            "confidence" => Some(Self::Confidence),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Date => "date",
            Self::Action => "action",
            Self::Confidence => "confidence",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Row<'a> {
    Header {
        key: String,
        label: String,
        count: usize,
    },
    Item {
        key: String,
        item: &'a AlertItem,
    },
}

impl Row<'_> {
    pub fn key(&self) -> &str {
        match self {
            Row::Header { key, .. } | Row::Item { key, .. } => key,
        }
    }

    pub fn is_header(&self) -> bool {
        matches!(self, Row::Header { .. })
    }
}

/// Start of "today" and "yesterday" in the viewer's timezone, as UTC instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayBoundaries {
    pub today_start: DateTime<Utc>,
    pub yesterday_start: DateTime<Utc>,
}

impl DayBoundaries {
    pub fn at(now: DateTime<Utc>, tz: Tz) -> Self {
        let today = now.with_timezone(&tz).date_naive();
        let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);
        Self {
            today_start: local_midnight(today, tz),
            yesterday_start: local_midnight(yesterday, tz),
        }
    }
}

fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let naive = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    // A DST jump can skip local midnight; fall back to the naive instant as UTC.
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
}

#[derive(Debug, Clone, Copy)]
pub struct RowProjector {
    kind: FeedKind,
    mode: GroupingMode,
    days: DayBoundaries,
}

impl RowProjector {
    pub fn new(kind: FeedKind, mode: GroupingMode) -> Self {
        Self {
            kind,
            mode,
            days: DayBoundaries::at(Utc::now(), Tz::UTC),
        }
    }

    pub fn with_clock(mut self, now: DateTime<Utc>, tz: Tz) -> Self {
        self.days = DayBoundaries::at(now, tz);
        self
    }

    /// Collapsed headers keep their full count but emit no item rows.
    pub fn project<'a>(
        &self,
        items: &[&'a AlertItem],
        collapsed: &BTreeSet<String>,
    ) -> Vec<Row<'a>> {
        let order: &[&str] = match self.mode {
            GroupingMode::None => {
                return items.iter().map(|item| self.item_row(item)).collect();
            }
            GroupingMode::Date => &["today", "yesterday", "older"],
            GroupingMode::Action => &ACTION_GROUP_ORDER,
            GroupingMode::Confidence => &CONFIDENCE_GROUP_ORDER,
        };

        let mut buckets: Vec<Vec<&'a AlertItem>> = vec![Vec::new(); order.len()];
        for item in items {
            let value = self.group_value(item);
            let slot = order
                .iter()
                .position(|candidate| *candidate == value)
                .unwrap_or(order.len() - 1);
            buckets[slot].push(*item);
        }

        let mut rows = Vec::with_capacity(items.len() + order.len());
        for (value, members) in order.iter().zip(buckets) {
            if members.is_empty() {
                continue;
            }
            let key = format!("{}:{}", self.mode.as_str(), value);
            let hidden = collapsed.contains(&key);
            rows.push(Row::Header {
                key,
                label: group_label(self.mode, value),
                count: members.len(),
            });
            if !hidden {
                rows.extend(members.into_iter().map(|item| self.item_row(item)));
            }
        }

        rows
    }

    fn item_row<'a>(&self, item: &'a AlertItem) -> Row<'a> {
        Row::Item {
            key: self.kind.item_key(item),
            item,
        }
    }

    fn group_value(&self, item: &AlertItem) -> String {
        match self.mode {
            GroupingMode::None => String::new(),
            GroupingMode::Date => match item.created_at_utc() {
                Some(created) if created >= self.days.today_start => "today".into(),
                Some(created) if created >= self.days.yesterday_start => "yesterday".into(),
                _ => "older".into(),
            },
            GroupingMode::Action => upper_or_unknown(&item.suggested_action),
            GroupingMode::Confidence => upper_or_unknown(&item.confidence),
        }
    }
}

fn upper_or_unknown(value: &Option<String>) -> String {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.trim().to_ascii_uppercase())
        .unwrap_or_else(|| UNKNOWN_GROUP.to_string())
}

fn group_label(mode: GroupingMode, value: &str) -> String {
    match (mode, value) {
        (GroupingMode::Date, "today") => "Today".into(),
        (GroupingMode::Date, "yesterday") => "Yesterday".into(),
        (GroupingMode::Date, _) => "Older".into(),
        _ => value.to_string(),
    }
}
