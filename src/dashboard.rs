//! Feed dashboard: HTML and JSON routes over one `FeedView` per feed kind.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use axum::{
    extract::{Path, Query, RawQuery, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::{Duration, SecondsFormat, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::{FeedPage, FeedTransport, FetchError, PageRequest};
use crate::history::{HistoryCache, PriceHistory};
use crate::item::{AlertItem, FeedKind};
use crate::observability::{non_empty, parse_bool};
use crate::query::{decode_query, SortKey, StateFilter, RANGE_PRESETS, SUGGESTED_ACTIONS};
use crate::rows::{GroupingMode, Row};
use crate::storage::KeyValueStore;
use crate::triage::TriageState;
use crate::view::{Density, FeedView, ViewOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardConfig {
    pub login_url: String,
    pub timezone: Tz,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            login_url: "/login".to_string(),
            timezone: Tz::UTC,
        }
    }
}

/// Settings for the `dashboard_server` binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardServerConfig {
    pub addr: String,
    pub storage_path: Option<PathBuf>,
    pub login_url: String,
    pub timezone: Tz,
    pub use_demo: bool,
}

impl Default for DashboardServerConfig {
    fn default() -> Self {
        let dashboard = DashboardConfig::default();
        Self {
            addr: "127.0.0.1:8080".to_string(),
            storage_path: None,
            login_url: dashboard.login_url,
            timezone: dashboard.timezone,
            use_demo: false,
        }
    }
}

impl DashboardServerConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        let read = |key: &str| non_empty(lookup(key));

        if let Some(addr) = read("PMD_DASHBOARD_ADDR") {
            cfg.addr = addr;
        }
        cfg.storage_path = read("PMD_STORAGE_PATH").map(PathBuf::from);
        if let Some(login_url) = read("PMD_LOGIN_URL") {
            cfg.login_url = login_url;
        }
        match read("PMD_TIMEZONE").map(|raw| raw.parse::<Tz>()) {
            Some(Ok(timezone)) => cfg.timezone = timezone,
            Some(Err(err)) => warn!(
                component = "dashboard",
                event = "config.timezone.invalid",
                error = %err
            ),
            None => {}
        }
        if let Some(use_demo) = read("PMD_DASHBOARD_USE_DEMO").as_deref().and_then(parse_bool) {
            cfg.use_demo = use_demo;
        }
        cfg
    }

    pub fn dashboard(&self) -> DashboardConfig {
        DashboardConfig {
            login_url: self.login_url.clone(),
            timezone: self.timezone,
        }
    }
}

pub fn dashboard_server_config_from_env() -> DashboardServerConfig {
    DashboardServerConfig::from_lookup(|key| std::env::var(key).ok())
}

/// Fixed list served from memory; used by demo mode and tests.
#[derive(Clone)]
pub struct InMemoryFeedTransport {
    inner: Arc<RwLock<InMemoryFeeds>>,
}

#[derive(Debug, Clone, Default)]
struct InMemoryFeeds {
    alerts: Vec<AlertItem>,
    copilot: Vec<AlertItem>,
    unauthorized: bool,
}

impl InMemoryFeedTransport {
    pub fn new(alerts: Vec<AlertItem>, copilot: Vec<AlertItem>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(InMemoryFeeds {
                alerts,
                copilot,
                unauthorized: false,
            })),
        }
    }

    pub fn demo() -> Self {
        let (alerts, copilot) = demo_feed();
        Self::new(alerts, copilot)
    }

    pub fn replace_items(&self, kind: FeedKind, items: Vec<AlertItem>) {
        let mut guard = self
            .inner
            .write()
            .expect("in-memory feed lock should not be poisoned");
        match kind {
            FeedKind::Alerts => guard.alerts = items,
            FeedKind::Copilot => guard.copilot = items,
        }
    }

    /// Makes every later request fail as if the session had expired.
    pub fn expire_session(&self) {
        self.inner
            .write()
            .expect("in-memory feed lock should not be poisoned")
            .unauthorized = true;
    }
}

impl FeedTransport for InMemoryFeedTransport {
    fn fetch_page(&self, req: &PageRequest) -> Result<FeedPage, FetchError> {
        let guard = self
            .inner
            .read()
            .expect("in-memory feed lock should not be poisoned");
        if guard.unauthorized {
            return Err(FetchError::Unauthorized);
        }

        let source = match req.kind {
            FeedKind::Alerts => &guard.alerts,
            FeedKind::Copilot => &guard.copilot,
        };
        let matching: Vec<&AlertItem> = source
            .iter()
            .filter(|item| server_side_match(item, req))
            .collect();

        // The cursor is the offset of the next page.
        let offset = req
            .cursor
            .as_deref()
            .and_then(|cursor| cursor.parse::<usize>().ok())
            .unwrap_or(0);
        let limit = req.limit.max(1) as usize;
        let end = offset.saturating_add(limit).min(matching.len());
        let items = matching
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|item| (*item).clone())
            .collect();

        Ok(FeedPage {
            items,
            next_cursor: (end < matching.len()).then(|| end.to_string()),
            total: req.include_total.then_some(matching.len() as u64),
        })
    }

    fn fetch_history(&self, alert_id: i64, range: &str) -> Result<PriceHistory, FetchError> {
        let guard = self
            .inner
            .read()
            .expect("in-memory feed lock should not be poisoned");
        if guard.unauthorized {
            return Err(FetchError::Unauthorized);
        }
        let found = guard
            .alerts
            .iter()
            .chain(guard.copilot.iter())
            .find(|item| item.id == Some(alert_id));
        let Some(item) = found else {
            return Err(FetchError::Status {
                status: 404,
                message: "Alert not found".to_string(),
            });
        };

        let points = [
            (item.triggered_at.as_ref(), item.probability_previous()),
            (item.created_at.as_ref(), item.probability_current()),
        ]
        .into_iter()
        .filter_map(|(ts, p_yes)| {
            Some(crate::history::HistoryPoint {
                ts: ts?.clone(),
                p_yes,
                p_no: p_yes.map(|p| 1.0 - p),
            })
        })
        .collect();

        Ok(PriceHistory {
            points,
            meta: serde_json::json!({ "range": range }),
        })
    }
}

fn server_side_match(item: &AlertItem, req: &PageRequest) -> bool {
    let filters = &req.filters;
    if let Some(strength) = filters.single_strength() {
        if !item
            .strength_label()
            .is_some_and(|label| label.eq_ignore_ascii_case(strength))
        {
            return false;
        }
    }
    if let Some(category) = filters.single_theme() {
        if item.category.as_deref() != Some(category) {
            return false;
        }
    }
    match item.created_at_utc() {
        Some(created) => {
            created >= Utc::now() - Duration::minutes(i64::from(filters.window_minutes))
        }
        None => true,
    }
}

/// A small mixed feed relative to the current time.
pub fn demo_feed() -> (Vec<AlertItem>, Vec<AlertItem>) {
    let now = Utc::now();
    let at = |minutes_ago: i64| {
        (now - Duration::minutes(minutes_ago)).to_rfc3339_opts(SecondsFormat::Secs, true)
    };

    let samples = [
        (1, "Will BTC close above 100k this week?", "Crypto", "FAST_MOVE", 0.62, 0.48, 250_000.0, 1_200_000.0, "HIGH", "FOLLOW", "sent", 5),
        (2, "Fed cuts rates in December?", "Macro", "MOVE", 0.41, 0.37, 90_000.0, 310_000.0, "MEDIUM", "WATCH", "sent", 45),
        (3, "Incumbent wins the runoff?", "Politics", "MOVE", 0.55, 0.57, 40_000.0, 75_000.0, "LOW", "WAIT", "skipped", 300),
        (4, "ETH ETF inflows top $1B?", "Crypto", "FAST_MOVE", 0.18, 0.31, 12_000.0, 22_000.0, "MEDIUM", "IGNORE", "skipped", 1_500),
        (5, "Champions League favourite advances?", "Sports", "MOVE", 0.77, 0.70, 60_000.0, 140_000.0, "HIGH", "FOLLOW", "sent", 2_900),
    ];

    let alerts: Vec<AlertItem> = samples
        .iter()
        .map(
            |&(id, title, category, kind, p_now, p_prev, liquidity, volume, strength, action, delivery, minutes_ago)| {
                AlertItem {
                    id: Some(id),
                    alert_type: Some(kind.to_string()),
                    market_id: Some(format!("demo-market-{id}")),
                    title: Some(title.to_string()),
                    category: Some(category.to_string()),
                    market_p_yes: Some(p_now),
                    prev_market_p_yes: Some(p_prev),
                    liquidity: Some(liquidity),
                    volume_24h: Some(volume),
                    strength: Some(strength.to_string()),
                    confidence: Some(strength.to_string()),
                    suggested_action: Some(action.to_string()),
                    signal_type: Some(kind.to_lowercase()),
                    delivery_status: Some(delivery.to_string()),
                    market_slug: Some(format!("demo-market-{id}")),
                    market_url: Some(format!("https://polymarket.com/event/demo-market-{id}")),
                    triggered_at: Some(at(minutes_ago + 10)),
                    created_at: Some(at(minutes_ago)),
                    message: Some(format!(
                        "- Probability moved {:+.0} pts\n- Liquidity {:.0}k",
                        (p_now - p_prev) * 100.0,
                        liquidity / 1000.0
                    )),
                    ..AlertItem::default()
                }
            },
        )
        .collect();

    let copilot = alerts
        .iter()
        .filter(|item| item.id.is_some_and(|id| id % 2 == 1))
        .cloned()
        .map(|mut item| {
            item.id = item.id.map(|id| id + 100);
            item.filter_reasons = vec!["Liquidity above floor".to_string()];
            item
        })
        .collect();

    (alerts, copilot)
}

#[derive(Clone)]
struct DashboardAppState {
    alerts: Arc<Mutex<ViewSlot>>,
    copilot: Arc<Mutex<ViewSlot>>,
    history: Arc<Mutex<HistoryCache>>,
    transport: Arc<dyn FeedTransport>,
    login_url: Arc<str>,
}

struct ViewSlot {
    view: FeedView,
    opened: bool,
}

impl DashboardAppState {
    fn slot(&self, kind: FeedKind) -> Arc<Mutex<ViewSlot>> {
        match kind {
            FeedKind::Alerts => self.alerts.clone(),
            FeedKind::Copilot => self.copilot.clone(),
        }
    }
}

pub fn dashboard_router(
    transport: Arc<dyn FeedTransport>,
    store: Arc<dyn KeyValueStore>,
    cfg: DashboardConfig,
) -> Router {
    let slot = |kind| {
        Arc::new(Mutex::new(ViewSlot {
            view: FeedView::new(kind, transport.clone(), store.clone()).with_timezone(cfg.timezone),
            opened: false,
        }))
    };
    let state = DashboardAppState {
        alerts: slot(FeedKind::Alerts),
        copilot: slot(FeedKind::Copilot),
        history: Arc::new(Mutex::new(HistoryCache::default())),
        transport: transport.clone(),
        login_url: Arc::from(cfg.login_url.as_str()),
    };

    Router::new()
        .route("/feed/{kind}", get(get_feed_html))
        .route("/feed/{kind}/rows", get(get_feed_rows))
        .route("/feed/{kind}/more", post(post_load_more))
        .route("/feed/{kind}/triage", post(post_triage))
        .route("/feed/{kind}/bulk", post(post_bulk))
        .route("/feed/{kind}/groups/toggle", post(post_toggle_group))
        .route("/feed/{kind}/prefs", post(post_prefs))
        .route("/feed/{kind}/history/{id}", get(get_history))
        .with_state(state)
}

fn lock_slot(slot: &Mutex<ViewSlot>) -> std::sync::MutexGuard<'_, ViewSlot> {
    slot.lock().expect("feed view lock should not be poisoned")
}

/// Prepares under the lock, fetches without it, then applies under the lock again.
/// A response that lost a race with a newer fetch comes back as `Stale`.
fn fetch_unlocked(
    slot: &Mutex<ViewSlot>,
    prepare: impl FnOnce(&mut ViewSlot) -> Option<PageRequest>,
) -> ViewOutcome {
    let (req, transport) = {
        let mut guard = lock_slot(slot);
        match prepare(&mut guard) {
            Some(req) => (req, guard.view.transport()),
            None => return ViewOutcome::Ignored,
        }
    };
    let result = transport.fetch_page(&req);
    lock_slot(slot).view.complete(&req, result)
}

/// First visit opens the view; later query strings replace the draft and apply it.
fn sync_with_query(slot: &Mutex<ViewSlot>, query: &str) -> ViewOutcome {
    fetch_unlocked(slot, |slot| {
        if !slot.opened {
            slot.opened = true;
            return Some(slot.view.prepare_open(query));
        }
        if query.is_empty() {
            return None;
        }
        slot.view.replace_filters(decode_query(query));
        Some(slot.view.prepare_apply())
    })
}

fn parse_kind(raw: &str) -> Result<FeedKind, Response> {
    FeedKind::parse(raw).ok_or_else(|| (StatusCode::NOT_FOUND, "unknown feed").into_response())
}

async fn blocking<T, F>(task: F) -> Result<T, Response>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task).await.map_err(|err| {
        warn!(
            component = "dashboard",
            event = "http.task.failed",
            error = %err
        );
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

fn feed_path(kind: FeedKind) -> String {
    format!("/feed/{}", kind.as_str())
}

fn outcome_redirect(state: &DashboardAppState, kind: FeedKind, outcome: &ViewOutcome) -> Response {
    match outcome {
        ViewOutcome::Unauthorized => Redirect::to(&state.login_url).into_response(),
        _ => Redirect::to(&feed_path(kind)).into_response(),
    }
}

fn log_request(kind: FeedKind, route: &str, outcome: &ViewOutcome) {
    info!(
        component = "dashboard",
        event = "http.feed.request",
        feed = kind.as_str(),
        route,
        outcome = ?outcome
    );
}

async fn get_feed_html(
    State(state): State<DashboardAppState>,
    Path(kind): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };
    let slot = state.slot(kind);
    let query = query.unwrap_or_default();

    let rendered = blocking(move || {
        let outcome = sync_with_query(&slot, &query);
        let html = (outcome != ViewOutcome::Unauthorized)
            .then(|| render_feed_html(&lock_slot(&slot).view));
        (outcome, html)
    })
    .await;

    match rendered {
        Ok((outcome, html)) => {
            log_request(kind, "html", &outcome);
            match html {
                Some(html) => Html(html).into_response(),
                None => Redirect::to(&state.login_url).into_response(),
            }
        }
        Err(response) => response,
    }
}

#[derive(Debug, Serialize)]
struct FeedRowsResponse<'a> {
    rows: Vec<Row<'a>>,
    can_load_more: bool,
    showing: String,
    summary: String,
    error: Option<&'a str>,
}

async fn get_feed_rows(
    State(state): State<DashboardAppState>,
    Path(kind): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };
    let slot = state.slot(kind);
    let query = query.unwrap_or_default();

    let rendered = blocking(move || {
        let outcome = sync_with_query(&slot, &query);
        if outcome == ViewOutcome::Unauthorized {
            return (outcome, None);
        }
        let guard = lock_slot(&slot);
        let view = &guard.view;
        let body = FeedRowsResponse {
            rows: view.rows(),
            can_load_more: view.can_load_more(),
            showing: view.showing_label(),
            summary: view.filters().summary(),
            error: view.pager().error(),
        };
        let json = serde_json::to_value(&body).unwrap_or(serde_json::Value::Null);
        (outcome, Some(json))
    })
    .await;

    match rendered {
        Ok((outcome, json)) => {
            log_request(kind, "rows", &outcome);
            match json {
                Some(json) => Json(json).into_response(),
                None => (
                    StatusCode::UNAUTHORIZED,
                    Json(serde_json::json!({ "redirect": state.login_url.as_ref() })),
                )
                    .into_response(),
            }
        }
        Err(response) => response,
    }
}

async fn post_load_more(
    State(state): State<DashboardAppState>,
    Path(kind): Path<String>,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };
    let slot = state.slot(kind);

    match blocking(move || fetch_unlocked(&slot, |slot| slot.view.prepare_load_more())).await {
        Ok(outcome) => {
            log_request(kind, "more", &outcome);
            outcome_redirect(&state, kind, &outcome)
        }
        Err(response) => response,
    }
}

const DEFAULT_HISTORY_RANGE: &str = "24h";

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    range: Option<String>,
}

/// Chart data for the detail drawer, served from the shared history cache.
async fn get_history(
    State(state): State<DashboardAppState>,
    Path((kind, alert_id)): Path<(String, i64)>,
    Query(params): Query<HistoryQuery>,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };
    let range = params
        .range
        .map(|range| range.trim().to_string())
        .filter(|range| !range.is_empty())
        .unwrap_or_else(|| DEFAULT_HISTORY_RANGE.to_string());

    let cache = state.history.clone();
    let transport = state.transport.clone();
    let fetch_range = range.clone();
    let result = blocking(move || {
        let mut cache = cache
            .lock()
            .expect("history cache lock should not be poisoned");
        let result = cache.get_or_fetch(alert_id, &fetch_range, transport.as_ref());
        if matches!(result, Err(FetchError::Unauthorized)) {
            cache.clear();
        }
        result
    })
    .await;

    let result = match result {
        Ok(result) => result,
        Err(response) => return response,
    };
    info!(
        component = "dashboard",
        event = "http.history.request",
        feed = kind.as_str(),
        alert_id,
        range = %range,
        ok = result.is_ok()
    );

    match result {
        Ok(history) => Json(history).into_response(),
        Err(FetchError::Unauthorized) => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "redirect": state.login_url.as_ref() })),
        )
            .into_response(),
        Err(err) => {
            let status = match &err {
                FetchError::Status { status: 404, .. } => StatusCode::NOT_FOUND,
                _ => StatusCode::BAD_GATEWAY,
            };
            (status, Json(serde_json::json!({ "error": err.user_message() }))).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct TriageForm {
    key: String,
    state: String,
}

async fn post_triage(
    State(state): State<DashboardAppState>,
    Path(kind): Path<String>,
    Form(form): Form<TriageForm>,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };
    let Some(triage_state) = TriageState::parse(&form.state) else {
        return (StatusCode::BAD_REQUEST, "unknown triage state").into_response();
    };

    lock_slot(&state.slot(kind))
        .view
        .set_triage(&form.key, triage_state);
    log_request(kind, "triage", &ViewOutcome::Updated);
    Redirect::to(&feed_path(kind)).into_response()
}

#[derive(Debug, Deserialize)]
struct BulkForm {
    action: String,
}

async fn post_bulk(
    State(state): State<DashboardAppState>,
    Path(kind): Path<String>,
    Form(form): Form<BulkForm>,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };

    let slot = state.slot(kind);
    let mut guard = lock_slot(&slot);
    let changed = match form.action.as_str() {
        "dismiss_visible" => guard.view.dismiss_visible(),
        "save_actionable" => guard.view.save_visible_actionable(),
        _ => return (StatusCode::BAD_REQUEST, "unknown bulk action").into_response(),
    };
    drop(guard);

    info!(
        component = "dashboard",
        event = "http.feed.request",
        feed = kind.as_str(),
        route = "bulk",
        action = %form.action,
        changed
    );
    Redirect::to(&feed_path(kind)).into_response()
}

#[derive(Debug, Deserialize)]
struct ToggleForm {
    key: String,
}

async fn post_toggle_group(
    State(state): State<DashboardAppState>,
    Path(kind): Path<String>,
    Form(form): Form<ToggleForm>,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };
    lock_slot(&state.slot(kind)).view.toggle_group(&form.key);
    Redirect::to(&feed_path(kind)).into_response()
}

#[derive(Debug, Deserialize)]
struct PrefsForm {
    grouping: Option<String>,
    density: Option<String>,
}

async fn post_prefs(
    State(state): State<DashboardAppState>,
    Path(kind): Path<String>,
    Form(form): Form<PrefsForm>,
) -> Response {
    let kind = match parse_kind(&kind) {
        Ok(kind) => kind,
        Err(response) => return response,
    };
    let slot = state.slot(kind);
    let mut guard = lock_slot(&slot);
    if let Some(grouping) = form.grouping.as_deref().and_then(GroupingMode::parse) {
        guard.view.set_grouping(grouping);
    }
    if let Some(density) = form.density.as_deref().and_then(Density::parse) {
        guard.view.set_density(density);
    }
    drop(guard);
    Redirect::to(&feed_path(kind)).into_response()
}

const FEED_STYLE: &str = "<style>:root{--bg:#f5f1e7;--card:#fff;--ink:#182026;--muted:#5f6a73;--line:#d7dce1;--head:#14343f;--warn:#9a5b00;--bad:#a12a2a}*{box-sizing:border-box}body{margin:0;color:var(--ink);font-family:\"Space Grotesk\",\"Avenir Next\",\"Segoe UI\",sans-serif;background:linear-gradient(160deg,#f5f1e7,#e9f0f2);min-height:100vh}.shell{max-width:1100px;margin:0 auto;padding:24px 18px}.hero{background:linear-gradient(135deg,#102f3a,#24576b);color:#f7fbfc;border-radius:16px;padding:18px 20px}.hero h1{margin:0 0 8px;font-size:1.5rem}.hero nav a{color:#dcebf0;margin-right:14px}.bar{display:flex;flex-wrap:wrap;gap:10px;align-items:center;margin-top:14px;font-size:.85rem}.bar .summary{color:var(--muted)}.dirty{color:var(--warn)}.error{margin-top:12px;padding:10px 14px;border-radius:10px;background:#fde8e8;color:var(--bad)}form.inline{display:inline}.filters{margin-top:14px;display:flex;flex-wrap:wrap;gap:8px;background:var(--card);border:1px solid var(--line);border-radius:12px;padding:12px}.filters label{font-size:.78rem;color:var(--muted);display:flex;flex-direction:column;gap:2px}.feed{margin-top:14px}.group{margin:16px 0 6px;font-size:.8rem;text-transform:uppercase;letter-spacing:.04em;color:var(--head)}.item{background:var(--card);border:1px solid var(--line);border-radius:12px;padding:12px 14px;margin-bottom:8px}.compact .item{padding:6px 10px;margin-bottom:4px}.item h3{margin:0 0 4px;font-size:1rem}.meta{font-size:.8rem;color:var(--muted);display:flex;flex-wrap:wrap;gap:10px}.state-saved{border-left:4px solid #0c5f78}.state-dismissed{opacity:.6}.rationale{margin:6px 0 0;padding-left:18px;font-size:.82rem}button{cursor:pointer;border-radius:8px;border:1px solid var(--line);background:#fff;padding:4px 9px;font-size:.78rem}</style>\n";

pub fn render_feed_html(view: &FeedView) -> String {
    let kind = view.kind();
    let base = feed_path(kind);
    let filters = view.filters();
    let prefs = view.prefs();
    let title = match kind {
        FeedKind::Alerts => "Alerts",
        FeedKind::Copilot => "Copilot feed",
    };

    let mut out = String::new();
    out.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    out.push_str(&format!("<title>PMD {}</title>\n", escape_html(title)));
    out.push_str(FEED_STYLE);
    out.push_str("</head><body><main class=\"shell\">\n");
    out.push_str(&format!(
        "<section class=\"hero\"><h1>{}</h1><nav><a href=\"/feed/alerts\">Alerts</a><a href=\"/feed/copilot\">Copilot</a></nav></section>\n",
        escape_html(title)
    ));

    out.push_str("<div class=\"bar\">");
    out.push_str(&format!(
        "<strong id=\"showing\">{}</strong>",
        escape_html(&view.showing_label())
    ));
    out.push_str(&format!(
        "<span class=\"summary\">{}</span>",
        escape_html(&filters.summary())
    ));
    if view.is_server_dirty() {
        out.push_str("<span class=\"dirty\">Unsaved changes</span>");
    }
    for (action, label) in [
        ("dismiss_visible", "Dismiss visible"),
        ("save_actionable", "Save actionable"),
    ] {
        out.push_str(&format!(
            "<form class=\"inline\" method=\"post\" action=\"{base}/bulk\"><input type=\"hidden\" name=\"action\" value=\"{action}\"><button type=\"submit\">{label}</button></form>"
        ));
    }
    out.push_str(&format!(
        "<form class=\"inline\" method=\"post\" action=\"{base}/prefs\">{}{}<button type=\"submit\">View</button></form>",
        select_html(
            "grouping",
            &["none", "date", "action", "confidence"].map(|v| (v, v)),
            prefs.grouping.as_str()
        ),
        select_html(
            "density",
            &[("comfortable", "comfortable"), ("compact", "compact")],
            prefs.density.as_str()
        ),
    ));
    out.push_str("</div>\n");

    if let Some(error) = view.pager().error() {
        out.push_str(&format!(
            "<div class=\"error\" role=\"alert\">{} <a href=\"{base}?{}\">Retry</a></div>\n",
            escape_html(error),
            escape_html(&view.query_string())
        ));
    }

    out.push_str(&render_filter_form(&base, view));

    let list_class = match prefs.density {
        Density::Comfortable => "feed",
        Density::Compact => "feed compact",
    };
    out.push_str(&format!("<section class=\"{list_class}\" id=\"feed\">\n"));
    let rows = view.rows();
    if rows.is_empty() && !view.pager().is_loading() {
        out.push_str("<p class=\"empty\">No items match the current filters.</p>\n");
    }
    for row in &rows {
        match row {
            Row::Header { key, label, count } => {
                let marker = if view.collapsed().contains(key) { "+" } else { "-" };
                out.push_str(&format!(
                    "<form class=\"group\" method=\"post\" action=\"{base}/groups/toggle\"><input type=\"hidden\" name=\"key\" value=\"{}\"><button type=\"submit\">{marker}</button> {} ({count})</form>\n",
                    escape_html(key),
                    escape_html(label)
                ));
            }
            Row::Item { key, item } => {
                let triage_state = view.triage().state_of(key);
                out.push_str(&render_item_html(&base, key, item, triage_state));
            }
        }
    }
    out.push_str("</section>\n");

    if view.can_load_more() {
        out.push_str(&format!(
            "<form method=\"post\" action=\"{base}/more\" id=\"load-more\"><button type=\"submit\">Load more</button></form>\n"
        ));
    }

    out.push_str("</main></body></html>\n");
    out
}

fn render_filter_form(base: &str, view: &FeedView) -> String {
    let filters = view.filters();
    let join = |values: &std::collections::BTreeSet<String>| {
        values.iter().cloned().collect::<Vec<_>>().join(",")
    };
    let number = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();
    let window = filters.window_minutes.to_string();

    let mut out = format!("<form class=\"filters\" method=\"get\" action=\"{base}\" id=\"filters-form\">");
    out.push_str(&text_input("q", "Search", &filters.query));
    out.push_str(&text_input("strengths", "Strength", &join(&filters.strengths)));
    out.push_str(&text_input("themes", "Themes", &join(&filters.themes)));

    let windows: Vec<(String, &str)> = RANGE_PRESETS
        .iter()
        .filter_map(|preset| preset.minutes.map(|m| (m.to_string(), preset.label)))
        .collect();
    let mut window_options: Vec<(&str, &str)> =
        windows.iter().map(|(value, label)| (value.as_str(), *label)).collect();
    if !window_options.iter().any(|(value, _)| *value == window) {
        window_options.push((window.as_str(), "Custom"));
    }
    out.push_str(&labelled("Window", &select_html("window", &window_options, &window)));

    out.push_str(&labelled(
        "Copilot",
        &select_html(
            "copilot",
            &[("all", "All"), ("sent", "Sent"), ("skipped", "Skipped")],
            filters.copilot.as_param().unwrap_or("all"),
        ),
    ));
    let sorts = [
        SortKey::Newest,
        SortKey::Move,
        SortKey::Liquidity,
        SortKey::Volume,
        SortKey::Closest,
    ]
    .map(|sort| (sort.as_str(), sort.label()));
    out.push_str(&labelled("Sort", &select_html("sort", &sorts, filters.sort.as_str())));
    let states = [
        StateFilter::Active,
        StateFilter::All,
        StateFilter::Saved,
        StateFilter::Dismissed,
    ]
    .map(|state| (state.as_str(), state.as_str()));
    out.push_str(&labelled(
        "State",
        &select_html("state", &states, filters.state_filter.as_str()),
    ));
    let mut actions: Vec<(&str, &str)> = vec![("", "Any")];
    actions.extend(SUGGESTED_ACTIONS.iter().map(|action| (*action, *action)));
    out.push_str(&labelled(
        "Action",
        &select_html("action", &actions, filters.action.as_deref().unwrap_or("")),
    ));

    out.push_str(&text_input("min_liquidity", "Min liquidity", &number(filters.min_liquidity)));
    out.push_str(&text_input("min_volume_24h", "Min volume", &number(filters.min_volume)));
    out.push_str(&text_input("min_move", "Min move", &number(filters.min_move)));
    out.push_str(&text_input("p_min", "P min", &number(filters.p_min)));
    out.push_str(&text_input("p_max", "P max", &number(filters.p_max)));
    out.push_str(&checkbox("fast", "FAST only", filters.fast_only));
    out.push_str(&checkbox("actionable", "Actionable only", filters.actionable_only));
    out.push_str("<button type=\"submit\">Apply</button>");
    out.push_str(&format!("<a href=\"{base}?window=1440\">Clear</a>"));
    out.push_str("</form>\n");
    out
}

fn render_item_html(base: &str, key: &str, item: &AlertItem, state: TriageState) -> String {
    let title = item.title.as_deref().unwrap_or("Untitled market");
    let mut out = format!(
        "<article class=\"item state-{}\" data-key=\"{}\">",
        state.as_str(),
        escape_html(key)
    );
    match item.market_url.as_deref() {
        Some(url) => out.push_str(&format!(
            "<h3><a target=\"_blank\" rel=\"noopener noreferrer\" href=\"{}\">{}</a></h3>",
            escape_html(url),
            escape_html(title)
        )),
        None => out.push_str(&format!("<h3>{}</h3>", escape_html(title))),
    }

    out.push_str("<div class=\"meta\">");
    let mut meta: Vec<String> = Vec::new();
    if let Some(category) = &item.category {
        meta.push(category.clone());
    }
    if let Some(strength) = item.strength_label() {
        meta.push(strength.to_uppercase());
    }
    if let Some(action) = &item.suggested_action {
        meta.push(action.to_uppercase());
    }
    if let Some(p) = item.probability_current() {
        meta.push(format!("p={:.0}%", p * 100.0));
    }
    meta.push(format!("move {:+.1} pts", item.move_delta() * 100.0));
    if let Some(liquidity) = item.liquidity {
        meta.push(format!("liq {liquidity:.0}"));
    }
    if let Some(created) = item.created_at_utc() {
        meta.push(created.format("%Y-%m-%d %H:%M UTC").to_string());
    }
    for entry in meta {
        out.push_str(&format!("<span>{}</span>", escape_html(&entry)));
    }
    out.push_str("</div>");

    let lines = item.rationale_lines();
    if !lines.is_empty() {
        out.push_str("<ul class=\"rationale\">");
        for line in lines {
            out.push_str(&format!("<li>{}</li>", escape_html(&line)));
        }
        out.push_str("</ul>");
    }

    if let Some(id) = item.id {
        out.push_str(&format!(
            "<a class=\"history\" href=\"{base}/history/{id}?range=24h\">History</a>"
        ));
    }

    for (target, label) in [
        (TriageState::Saved, "Save"),
        (TriageState::Dismissed, "Dismiss"),
        (TriageState::Pending, "Reset"),
    ] {
        if target == state {
            continue;
        }
        out.push_str(&format!(
            "<form class=\"inline\" method=\"post\" action=\"{base}/triage\"><input type=\"hidden\" name=\"key\" value=\"{}\"><input type=\"hidden\" name=\"state\" value=\"{}\"><button type=\"submit\">{label}</button></form>",
            escape_html(key),
            target.as_str()
        ));
    }
    out.push_str("</article>\n");
    out
}

fn labelled(label: &str, control: &str) -> String {
    format!("<label>{}{control}</label>", escape_html(label))
}

fn text_input(name: &str, label: &str, value: &str) -> String {
    labelled(
        label,
        &format!(
            "<input name=\"{name}\" value=\"{}\">",
            escape_html(value)
        ),
    )
}

fn checkbox(name: &str, label: &str, checked: bool) -> String {
    let checked = if checked { " checked" } else { "" };
    format!(
        "<label><input type=\"checkbox\" name=\"{name}\" value=\"1\"{checked}>{}</label>",
        escape_html(label)
    )
}

fn select_html(name: &str, options: &[(&str, &str)], selected: &str) -> String {
    let mut out = format!("<select name=\"{name}\">");
    for (value, label) in options {
        let marker = if *value == selected { " selected" } else { "" };
        out.push_str(&format!(
            "<option value=\"{}\"{marker}>{}</option>",
            escape_html(value),
            escape_html(label)
        ));
    }
    out.push_str("</select>");
    out
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
