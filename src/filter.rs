//! Client-side predicate and sort order applied to the already-fetched feed.

use std::cmp::Ordering;

use crate::item::{AlertItem, FeedKind};
use crate::query::{CopilotStatus, FilterState, SortKey, StateFilter};
use crate::triage::{TriageMap, TriageState};

const CLOSEST_PIVOT: f64 = 0.5;

/// One filter evaluation context; build once per render, then test every item.
pub struct Matcher<'a> {
    state: &'a FilterState,
    triage: &'a TriageMap,
    kind: FeedKind,
    strengths: Vec<String>,
    search: String,
    enforce_delivery_status: bool,
}

impl<'a> Matcher<'a> {
    pub fn new(state: &'a FilterState, triage: &'a TriageMap, kind: FeedKind) -> Self {
        Self {
            state,
            triage,
            kind,
            strengths: state
                .strengths
                .iter()
                .map(|value| value.to_lowercase())
                .collect(),
            search: state.query.trim().to_lowercase(),
            // Alerts are pre-filtered by the server; the copilot feed re-checks delivery locally.
            enforce_delivery_status: matches!(kind, FeedKind::Copilot),
        }
    }

    pub fn with_delivery_check(mut self, enforce: bool) -> Self {
        self.enforce_delivery_status = enforce;
        self
    }

    pub fn kind(&self) -> FeedKind {
        self.kind
    }

    pub fn triage_state(&self, item: &AlertItem) -> TriageState {
        self.triage.state_of(&self.kind.item_key(item))
    }

    pub fn matches(&self, item: &AlertItem) -> bool {
        let state = self.state;

        let triage = self.triage_state(item);
        let state_ok = match state.state_filter {
            StateFilter::All => true,
            StateFilter::Active => triage == TriageState::Pending,
            StateFilter::Saved => triage == TriageState::Saved,
            StateFilter::Dismissed => triage == TriageState::Dismissed,
        };
        if !state_ok {
            return false;
        }

        if !self.strengths.is_empty() {
            let label = item.strength_label().unwrap_or("").to_lowercase();
            if !self.strengths.contains(&label) {
                return false;
            }
        }

        if !state.themes.is_empty() {
            let category = item.category.as_deref().unwrap_or("");
            if !state.themes.contains(category) {
                return false;
            }
        }

        if state.fast_only && !item.is_fast() {
            return false;
        }
        if state.actionable_only && !item.is_actionable() {
            return false;
        }

        if let Some(action) = &state.action {
            let item_action = item.suggested_action.as_deref().unwrap_or("");
            if !item_action.eq_ignore_ascii_case(action) {
                return false;
            }
        }

        // Unknown metrics never fail a threshold; unknown move resolves to 0.
        if below(item.liquidity, state.min_liquidity) {
            return false;
        }
        if below(item.volume_24h, state.min_volume) {
            return false;
        }
        if let Some(min_move) = state.min_move {
            if item.move_value() < min_move {
                return false;
            }
        }

        if let Some(probability) = item.probability_current() {
            if state.p_min.map(|min| probability < min).unwrap_or(false) {
                return false;
            }
            if state.p_max.map(|max| probability > max).unwrap_or(false) {
                return false;
            }
        }

        if !self.search.is_empty() && !haystack(item).contains(&self.search) {
            return false;
        }

        if self.enforce_delivery_status {
            match state.copilot {
                CopilotStatus::All => {}
                CopilotStatus::Sent if !item.is_sent() => return false,
                CopilotStatus::Skipped if item.is_sent() => return false,
                CopilotStatus::Sent | CopilotStatus::Skipped => {}
            }
        }

        true
    }

    /// Pending first, then saved, then dismissed.
    pub fn state_rank(&self, item: &AlertItem) -> u8 {
        match self.triage_state(item) {
            TriageState::Pending => 0,
            TriageState::Saved => 1,
            TriageState::Dismissed => 2,
        }
    }

    pub fn filter_and_sort<'i>(&self, items: &'i [AlertItem]) -> Vec<&'i AlertItem> {
        let mut out: Vec<&AlertItem> = items.iter().filter(|item| self.matches(item)).collect();
        let compare = compare_for(self.state.sort);

        if self.state.state_filter == StateFilter::All {
            out.sort_by(|a, b| {
                self.state_rank(a)
                    .cmp(&self.state_rank(b))
                    .then_with(|| compare(a, b))
            });
        } else {
            out.sort_by(|a, b| compare(a, b));
        }

        out
    }

    pub fn count_matching<'i>(&self, items: impl IntoIterator<Item = &'i AlertItem>) -> usize {
        items.into_iter().filter(|item| self.matches(item)).count()
    }
}

/// Comparator for a sort key. Items missing the sort metric go last.
pub fn compare_for(sort: SortKey) -> fn(&AlertItem, &AlertItem) -> Ordering {
    match sort {
        SortKey::Newest => compare_newest,
        SortKey::Move => compare_move,
        SortKey::Liquidity => compare_liquidity,
        SortKey::Volume => compare_volume,
        SortKey::Closest => compare_closest,
    }
}

fn compare_newest(a: &AlertItem, b: &AlertItem) -> Ordering {
    match (a.created_at_utc(), b.created_at_utc()) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_move(a: &AlertItem, b: &AlertItem) -> Ordering {
    b.move_value().total_cmp(&a.move_value())
}

fn compare_liquidity(a: &AlertItem, b: &AlertItem) -> Ordering {
    descending_known_first(a.liquidity, b.liquidity)
}

fn compare_volume(a: &AlertItem, b: &AlertItem) -> Ordering {
    descending_known_first(a.volume_24h, b.volume_24h)
}

fn compare_closest(a: &AlertItem, b: &AlertItem) -> Ordering {
    let distance = |item: &AlertItem| {
        item.probability_current()
            .map(|p| (p - CLOSEST_PIVOT).abs())
    };
    match (distance(a), distance(b)) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn descending_known_first(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn below(value: Option<f64>, min: Option<f64>) -> bool {
    match (value, min) {
        (Some(value), Some(min)) => value < min,
        _ => false,
    }
}

fn haystack(item: &AlertItem) -> String {
    [
        &item.title,
        &item.category,
        &item.market_id,
        &item.market_slug,
        &item.market_url,
        &item.signal_type,
    ]
    .into_iter()
    .filter_map(|field| field.as_deref().filter(|value| !value.is_empty()))
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase()
}
