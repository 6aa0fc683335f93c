//! Feed filter state and its URL/local-snapshot codec.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::storage::KeyValueStore;

pub const DEFAULT_WINDOW_MINUTES: u32 = 24 * 60;

pub const SUGGESTED_ACTIONS: [&str; 4] = ["FOLLOW", "WATCH", "WAIT", "IGNORE"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePreset {
    pub id: &'static str,
    pub label: &'static str,
    pub minutes: Option<u32>,
}

pub const RANGE_PRESETS: [RangePreset; 4] = [
    RangePreset {
        id: "60m",
        label: "Last 60m",
        minutes: Some(60),
    },
    RangePreset {
        id: "24h",
        label: "Last 24h",
        minutes: Some(24 * 60),
    },
    RangePreset {
        id: "7d",
        label: "Last 7d",
        minutes: Some(7 * 24 * 60),
    },
    RangePreset {
        id: "custom",
        label: "Custom",
        minutes: None,
    },
];

pub fn preset_from_window(minutes: u32) -> &'static str {
    RANGE_PRESETS
        .iter()
        .find(|preset| preset.minutes == Some(minutes))
        .map(|preset| preset.id)
        .unwrap_or("custom")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopilotStatus {
    #[default]
    All,
    Sent,
    Skipped,
}

impl CopilotStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Some(Self::All),
            "sent" => Some(Self::Sent),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Backend `copilot` parameter; `None` means "do not send".
    pub fn as_param(self) -> Option<&'static str> {
        match self {
            Self::All => None,
            Self::Sent => Some("sent"),
            Self::Skipped => Some("skipped"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Newest,
    Move,
    Liquidity,
    Volume,
    Closest,
}

impl SortKey {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "newest" => Some(Self::Newest),
            "move" => Some(Self::Move),
            "liquidity" => Some(Self::Liquidity),
            "volume" => Some(Self::Volume),
            "closest" => Some(Self::Closest),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Newest => "newest",
            Self::Move => "move",
            Self::Liquidity => "liquidity",
            Self::Volume => "volume",
            Self::Closest => "closest",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Newest => "Newest",
            Self::Move => "Biggest move",
            Self::Liquidity => "Highest liquidity",
            Self::Volume => "Highest volume",
            Self::Closest => "Closest to p=0.5",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateFilter {
    #[default]
    Active,
    All,
    Saved,
    Dismissed,
}

impl StateFilter {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "all" => Some(Self::All),
            "saved" => Some(Self::Saved),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::All => "all",
            Self::Saved => "saved",
            Self::Dismissed => "dismissed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterState {
    pub query: String,
    pub strengths: BTreeSet<String>,
    pub themes: BTreeSet<String>,
    pub window_minutes: u32,
    pub copilot: CopilotStatus,
    pub fast_only: bool,
    pub actionable_only: bool,
    pub min_liquidity: Option<f64>,
    pub min_volume: Option<f64>,
    pub min_move: Option<f64>,
    pub p_min: Option<f64>,
    pub p_max: Option<f64>,
    pub sort: SortKey,
    pub state_filter: StateFilter,
    pub action: Option<String>,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            query: String::new(),
            strengths: BTreeSet::new(),
            themes: BTreeSet::new(),
            window_minutes: DEFAULT_WINDOW_MINUTES,
            copilot: CopilotStatus::All,
            fast_only: false,
            actionable_only: false,
            min_liquidity: None,
            min_volume: None,
            min_move: None,
            p_min: None,
            p_max: None,
            sort: SortKey::Newest,
            state_filter: StateFilter::Active,
            action: None,
        }
    }
}

/// The subset of filters the backend evaluates. Changing it requires a new fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFilters {
    pub window_minutes: u32,
    pub strengths: BTreeSet<String>,
    pub themes: BTreeSet<String>,
    pub copilot: CopilotStatus,
}

impl Default for ServerFilters {
    fn default() -> Self {
        Self::from(&FilterState::default())
    }
}

impl From<&FilterState> for ServerFilters {
    fn from(state: &FilterState) -> Self {
        Self {
            window_minutes: state.window_minutes,
            strengths: state.strengths.clone(),
            themes: state.themes.clone(),
            copilot: state.copilot,
        }
    }
}

impl ServerFilters {
    /// The backend takes a single strength; several selected values stay client-side.
    pub fn single_strength(&self) -> Option<&str> {
        single(&self.strengths)
    }

    pub fn single_theme(&self) -> Option<&str> {
        single(&self.themes)
    }
}

impl FilterState {
    /// Restores `window_minutes > 0`, `p_min <= p_max`, and a known action.
    pub fn normalized(mut self) -> Self {
        if self.window_minutes == 0 {
            self.window_minutes = DEFAULT_WINDOW_MINUTES;
        }
        if let (Some(min), Some(max)) = (self.p_min, self.p_max) {
            if min > max {
                self.p_min = Some(max);
                self.p_max = Some(min);
            }
        }
        self.action = self.action.as_deref().and_then(normalize_action);
        self
    }

    pub fn server_filters(&self) -> ServerFilters {
        ServerFilters::from(self)
    }

    pub fn is_server_dirty(&self, applied: &ServerFilters) -> bool {
        self.server_filters() != *applied
    }

    pub fn window_label(&self) -> String {
        RANGE_PRESETS
            .iter()
            .find(|preset| preset.minutes == Some(self.window_minutes))
            .map(|preset| preset.label.to_string())
            .unwrap_or_else(|| format!("Window {}m", self.window_minutes))
    }

    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if !self.query.is_empty() {
            parts.push(format!("Search \"{}\"", self.query));
        }
        if !self.strengths.is_empty() {
            parts.push(format!(
                "Strength: {}",
                self.strengths.iter().cloned().collect::<Vec<_>>().join(", ")
            ));
        }
        if !self.themes.is_empty() {
            parts.push(format!("Themes: {}", self.themes.len()));
        }
        if self.fast_only {
            parts.push("FAST only".to_string());
        }
        if self.actionable_only {
            parts.push("Actionable only".to_string());
        }
        if let Some(action) = &self.action {
            parts.push(format!("Action: {action}"));
        }
        if let Some(value) = self.min_liquidity {
            parts.push(format!("Min liq: {value}"));
        }
        if let Some(value) = self.min_volume {
            parts.push(format!("Min vol: {value}"));
        }
        if let Some(value) = self.min_move {
            parts.push(format!("Min move: {value}"));
        }
        if self.p_min.is_some() || self.p_max.is_some() {
            parts.push(format!(
                "p: {}-{}",
                self.p_min.map(|v| v.to_string()).unwrap_or_else(|| "0".into()),
                self.p_max.map(|v| v.to_string()).unwrap_or_else(|| "1".into())
            ));
        }
        parts.push(self.window_label());
        parts.push(format!("Sort: {}", self.sort.label()));
        parts.join(" | ")
    }
}

/// Emits only fields that differ from their defaults.
pub fn encode_query(state: &FilterState) -> String {
    let mut out = form_urlencoded::Serializer::new(String::new());

    if !state.query.is_empty() {
        out.append_pair("q", &state.query);
    }
    if !state.strengths.is_empty() {
        out.append_pair("strengths", &join_set(&state.strengths));
    }
    if !state.themes.is_empty() {
        out.append_pair("themes", &join_set(&state.themes));
    }
    if state.window_minutes != DEFAULT_WINDOW_MINUTES {
        out.append_pair("window", &state.window_minutes.to_string());
    }
    if let Some(copilot) = state.copilot.as_param() {
        out.append_pair("copilot", copilot);
    }
    if state.fast_only {
        out.append_pair("fast", "1");
    }
    if state.actionable_only {
        out.append_pair("actionable", "1");
    }
    for (key, value) in [
        ("min_liquidity", state.min_liquidity),
        ("min_volume_24h", state.min_volume),
        ("min_move", state.min_move),
        ("p_min", state.p_min),
        ("p_max", state.p_max),
    ] {
        if let Some(value) = value {
            out.append_pair(key, &value.to_string());
        }
    }
    if state.sort != SortKey::Newest {
        out.append_pair("sort", state.sort.as_str());
    }
    if state.state_filter != StateFilter::Active {
        out.append_pair("state", state.state_filter.as_str());
    }
    if let Some(action) = &state.action {
        out.append_pair("action", action);
    }

    out.finish()
}

/// Parses recognized keys over the defaults. Unknown keys and unparseable values are ignored.
pub fn decode_query(query: &str) -> FilterState {
    let mut state = FilterState::default();
    let query = query.strip_prefix('?').unwrap_or(query);

    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "q" => state.query = value.into_owned(),
            "strengths" => state.strengths = parse_list(&value),
            "themes" => state.themes = parse_list(&value),
            "window" => {
                state.window_minutes = value
                    .trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|minutes| *minutes > 0)
                    .unwrap_or(DEFAULT_WINDOW_MINUTES)
            }
            "copilot" => state.copilot = CopilotStatus::parse(&value).unwrap_or_default(),
            "fast" => state.fast_only = value == "1",
            "actionable" => state.actionable_only = value == "1",
            "min_liquidity" => state.min_liquidity = parse_number(&value),
            "min_volume_24h" => state.min_volume = parse_number(&value),
            "min_move" => state.min_move = parse_number(&value),
            "p_min" => state.p_min = parse_number(&value),
            "p_max" => state.p_max = parse_number(&value),
            "sort" => state.sort = SortKey::parse(&value).unwrap_or_default(),
            "state" => state.state_filter = StateFilter::parse(&value).unwrap_or_default(),
            "action" => state.action = normalize_action(&value),
            _ => {}
        }
    }

    state.normalized()
}

pub fn parse_list(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn normalize_action(raw: &str) -> Option<String> {
    let upper = raw.trim().to_ascii_uppercase();
    SUGGESTED_ACTIONS
        .contains(&upper.as_str())
        .then_some(upper)
}

fn join_set(values: &BTreeSet<String>) -> String {
    values.iter().cloned().collect::<Vec<_>>().join(",")
}

fn single(values: &BTreeSet<String>) -> Option<&str> {
    if values.len() == 1 {
        values.iter().next().map(String::as_str)
    } else {
        None
    }
}

/// URL codec plus the local snapshot used on a first visit without query parameters.
#[derive(Clone)]
pub struct QueryCodec {
    store: Arc<dyn KeyValueStore>,
    snapshot_key: &'static str,
}

impl QueryCodec {
    pub fn new(store: Arc<dyn KeyValueStore>, snapshot_key: &'static str) -> Self {
        Self {
            store,
            snapshot_key,
        }
    }

    pub fn encode(&self, state: &FilterState) -> String {
        encode_query(state)
    }

    pub fn decode(&self, query: &str) -> FilterState {
        decode_query(query)
    }

    pub fn load_snapshot(&self) -> Option<FilterState> {
        let raw = match self.store.get(self.snapshot_key) {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(
                    component = "query",
                    event = "query.snapshot.load_error",
                    storage_key = self.snapshot_key,
                    error = %err
                );
                return None;
            }
        };

        match serde_json::from_str::<FilterState>(&raw) {
            Ok(state) => Some(state.normalized()),
            Err(err) => {
                debug!(
                    component = "query",
                    event = "query.snapshot.corrupt",
                    storage_key = self.snapshot_key,
                    error = %err
                );
                None
            }
        }
    }

    pub fn save_snapshot(&self, state: &FilterState) {
        let result = serde_json::to_string(state)
            .map_err(crate::storage::StorageError::from)
            .and_then(|payload| self.store.set(self.snapshot_key, &payload));
        if let Err(err) = result {
            warn!(
                component = "query",
                event = "query.snapshot.save_error",
                storage_key = self.snapshot_key,
                error = %err
            );
        }
    }

    /// URL parameters win; the snapshot only applies when the URL carries none.
    pub fn initial_state(&self, query: &str) -> FilterState {
        let query = query.strip_prefix('?').unwrap_or(query);
        if !query.is_empty() {
            return self.decode(query);
        }
        self.load_snapshot().unwrap_or_default()
    }
}
