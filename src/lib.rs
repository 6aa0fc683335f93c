//! PMD feed core crate.
//!
//! Filtering and cursor pagination for the Alerts and Copilot feeds:
//! - URL/snapshot filter codec and local triage marks
//! - page accumulation against the backend list endpoints
//! - client-side predicate, sort order and grouped row projection
//! - an axum dashboard rendering both feeds

mod api;
mod dashboard;
mod filter;
mod history;
mod item;
mod observability;
mod pager;
mod query;
mod rows;
mod storage;
mod triage;
mod view;

pub use api::{
    backend_config_from_env, list_path, list_query_params, normalize_list_payload,
    BackendConfig, BackendConfigError, FeedPage, FeedTransport, FetchError, HttpBackend,
    PageRequest, ALERTS_PATH, COPILOT_PATH,
};
pub use dashboard::{
    dashboard_router, dashboard_server_config_from_env, demo_feed, render_feed_html,
    DashboardConfig, DashboardServerConfig, InMemoryFeedTransport,
};
pub use filter::{compare_for, Matcher};
pub use history::{HistoryCache, HistoryPoint, PriceHistory, DEFAULT_HISTORY_CACHE_CAPACITY};
pub use item::{parse_timestamp, AlertItem, FeedKind};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_backend_selected, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError,
};
pub use pager::{PageAccumulator, PageOutcome};
pub use query::{
    decode_query, encode_query, parse_list, parse_number, preset_from_window, CopilotStatus,
    FilterState, QueryCodec, RangePreset, ServerFilters, SortKey, StateFilter,
    DEFAULT_WINDOW_MINUTES, RANGE_PRESETS, SUGGESTED_ACTIONS,
};
pub use rows::{
    DayBoundaries, GroupingMode, Row, RowProjector, ACTION_GROUP_ORDER, CONFIDENCE_GROUP_ORDER,
};
pub use storage::{
    storage_keys, KeyValueStore, MemoryStore, SqliteStore, StorageError, StorageKeys,
    ALERTS_FILTERS_KEY, ALERTS_STATE_KEY, ALERTS_VIEW_KEY, COPILOT_FILTERS_KEY,
    COPILOT_STATE_KEY, COPILOT_VIEW_KEY,
};
pub use triage::{LocalTriageStore, TriageMap, TriageMark, TriageState};
pub use view::{Density, FeedView, ViewOutcome, ViewPrefs};
