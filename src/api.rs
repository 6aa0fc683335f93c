//! Backend list/history transport and the response-shape adapter.

use std::env;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::history::PriceHistory;
use crate::item::{AlertItem, FeedKind};
use crate::observability::non_empty;
use crate::query::ServerFilters;

pub const ALERTS_PATH: &str = "/alerts/latest";
pub const COPILOT_PATH: &str = "/copilot/recommendations";

const UNREACHABLE_MESSAGE: &str = "API unreachable";
const FALLBACK_ERROR_MESSAGE: &str = "Request failed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub session_cookie: Option<String>,
    pub user_id: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            timeout_ms: 10_000,
            max_retries: 1,
            retry_backoff_ms: 200,
            session_cookie: None,
            user_id: None,
        }
    }
}

impl BackendConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        let read = |key: &str| non_empty(lookup(key));

        if let Some(base_url) = read("PMD_API_BASE_URL") {
            cfg.base_url = base_url;
        }
        if let Some(timeout_ms) = read("PMD_API_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            cfg.timeout_ms = timeout_ms;
        }
        if let Some(retries) = read("PMD_API_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            cfg.max_retries = retries;
        }
        if let Some(backoff) = read("PMD_API_RETRY_BACKOFF_MS").and_then(|v| v.parse().ok()) {
            cfg.retry_backoff_ms = backoff;
        }
        cfg.session_cookie = read("PMD_SESSION_COOKIE");
        cfg.user_id = read("PMD_USER_ID");
        cfg
    }
}

pub fn backend_config_from_env() -> BackendConfig {
    BackendConfig::from_lookup(|key| env::var(key).ok())
}

#[derive(Debug, Error)]
pub enum BackendConfigError {
    #[error("invalid backend base URL '{url}': {message}")]
    InvalidBaseUrl { url: String, message: String },
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("session expired or missing")]
    Unauthorized,
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("API unreachable: {0}")]
    Transport(String),
    #[error("invalid response payload: {0}")]
    Decode(String),
}

impl FetchError {
    /// Text for the retryable error banner.
    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthorized => "Session expired".to_string(),
            Self::Status { message, .. } => message.clone(),
            Self::Transport(_) => UNREACHABLE_MESSAGE.to_string(),
            Self::Decode(_) => FALLBACK_ERROR_MESSAGE.to_string(),
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status >= 500,
            Self::Transport(_) => true,
            Self::Unauthorized | Self::Decode(_) => false,
        }
    }
}

/// One list request, tagged with the generation of the view state that issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub generation: u64,
    pub kind: FeedKind,
    pub filters: ServerFilters,
    pub cursor: Option<String>,
    pub append: bool,
    pub include_total: bool,
    pub limit: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedPage {
    pub items: Vec<AlertItem>,
    pub next_cursor: Option<String>,
    pub total: Option<u64>,
}

pub trait FeedTransport: Send + Sync + 'static {
    fn fetch_page(&self, req: &PageRequest) -> Result<FeedPage, FetchError>;
    fn fetch_history(&self, alert_id: i64, range: &str) -> Result<PriceHistory, FetchError>;
}

pub fn list_path(kind: FeedKind) -> &'static str {
    match kind {
        FeedKind::Alerts => ALERTS_PATH,
        FeedKind::Copilot => COPILOT_PATH,
    }
}

/// Query parameters for a list request; empty values are omitted.
pub fn list_query_params(req: &PageRequest, user_id: Option<&str>) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("window_minutes", req.filters.window_minutes.to_string()),
        ("limit", req.limit.to_string()),
        ("paginate", "1".to_string()),
    ];
    if let Some(cursor) = req.cursor.as_deref().filter(|c| !c.is_empty()) {
        params.push(("cursor", cursor.to_string()));
    }
    if req.include_total {
        params.push(("include_total", "1".to_string()));
    }
    if let Some(strength) = req.filters.single_strength() {
        params.push(("strength", strength.to_string()));
    }
    if let Some(category) = req.filters.single_theme() {
        params.push(("category", category.to_string()));
    }
    if let Some(copilot) = req.filters.copilot.as_param() {
        params.push(("copilot", copilot.to_string()));
    }
    if let Some(user_id) = user_id.filter(|id| !id.is_empty()) {
        params.push(("user_id", user_id.to_string()));
    }
    params
}

#[derive(Deserialize)]
struct PagedPayload {
    #[serde(default)]
    items: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    next_cursor: Option<String>,
    #[serde(default)]
    total: Option<u64>,
}

/// Accepts a bare item array (legacy) or `{items, next_cursor, total}`.
/// Any other shape is an empty page with no continuation.
pub fn normalize_list_payload(body: &[u8]) -> Result<FeedPage, FetchError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(FeedPage::default());
    }

    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|err| FetchError::Decode(err.to_string()))?;

    let page = match value {
        serde_json::Value::Array(raw_items) => FeedPage {
            items: decode_items(raw_items),
            next_cursor: None,
            total: None,
        },
        serde_json::Value::Object(ref map) if map.contains_key("items") => {
            let payload: PagedPayload = serde_json::from_value(value)
                .map_err(|err| FetchError::Decode(err.to_string()))?;
            FeedPage {
                items: decode_items(payload.items.unwrap_or_default()),
                next_cursor: payload.next_cursor.filter(|cursor| !cursor.is_empty()),
                total: payload.total,
            }
        }
        _ => FeedPage::default(),
    };

    Ok(page)
}

fn decode_items(raw_items: Vec<serde_json::Value>) -> Vec<AlertItem> {
    let raw_count = raw_items.len();
    let items: Vec<AlertItem> = raw_items
        .into_iter()
        .filter_map(|raw| serde_json::from_value(raw).ok())
        .collect();

    if items.len() != raw_count {
        debug!(
            component = "api",
            event = "api.items.skipped",
            skipped = raw_count - items.len()
        );
    }
    items
}

fn error_message(body: &[u8]) -> String {
    #[derive(Deserialize)]
    struct Detail {
        detail: Option<serde_json::Value>,
    }

    serde_json::from_slice::<Detail>(body)
        .ok()
        .and_then(|parsed| parsed.detail)
        .and_then(|detail| detail.as_str().map(str::to_string))
        .filter(|detail| !detail.is_empty())
        .unwrap_or_else(|| FALLBACK_ERROR_MESSAGE.to_string())
}

/// Blocking HTTP transport for the PMD backend.
pub struct HttpBackend {
    client: reqwest::blocking::Client,
    base_url: Url,
    cfg: BackendConfig,
}

impl HttpBackend {
    pub fn new(cfg: BackendConfig) -> Result<Self, BackendConfigError> {
        let base_url =
            Url::parse(&cfg.base_url).map_err(|err| BackendConfigError::InvalidBaseUrl {
                url: cfg.base_url.clone(),
                message: err.to_string(),
            })?;
        if base_url.cannot_be_a_base() {
            return Err(BackendConfigError::InvalidBaseUrl {
                url: cfg.base_url.clone(),
                message: "not a base URL".to_string(),
            });
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|err| BackendConfigError::HttpClientBuild(err.to_string()))?;

        Ok(Self {
            client,
            base_url,
            cfg,
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.cfg
    }

    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Url {
        let mut url = self.base_url.clone();
        let joined = format!("{}{}", url.path().trim_end_matches('/'), path);
        url.set_path(&joined);
        url.set_query(None);
        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(key, value)| (*key, value.as_str())));
        }
        url
    }

    fn get_with_retry(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let mut attempt: u32 = 0;
        loop {
            match self.get_once(url) {
                Ok(body) => return Ok(body),
                Err(err) if !err.is_retryable() || attempt >= self.cfg.max_retries => {
                    return Err(err)
                }
                Err(err) => {
                    attempt = attempt.saturating_add(1);
                    let shift = attempt.saturating_sub(1).min(10);
                    let sleep_ms = self.cfg.retry_backoff_ms.saturating_mul(1u64 << shift);
                    warn!(
                        component = "api",
                        event = "api.request.retry",
                        path = url.path(),
                        attempt,
                        sleep_ms,
                        error = %err
                    );
                    std::thread::sleep(std::time::Duration::from_millis(sleep_ms));
                }
            }
        }
    }

    fn get_once(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let mut request = self.client.get(url.clone());
        if let Some(cookie) = &self.cfg.session_cookie {
            request = request.header(reqwest::header::COOKIE, cookie.as_str());
        }

        let response = request
            .send()
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        match status {
            200..=299 => Ok(body),
            401 => Err(FetchError::Unauthorized),
            _ => Err(FetchError::Status {
                status,
                message: error_message(&body),
            }),
        }
    }

    fn fetch_list(&self, path: &str, req: &PageRequest) -> Result<FeedPage, FetchError> {
        let params = list_query_params(req, self.cfg.user_id.as_deref());
        let url = self.endpoint(path, &params);
        let body = self.get_with_retry(&url)?;
        normalize_list_payload(&body)
    }
}

impl FeedTransport for HttpBackend {
    fn fetch_page(&self, req: &PageRequest) -> Result<FeedPage, FetchError> {
        match self.fetch_list(list_path(req.kind), req) {
            // Older backends only expose the alerts list.
            Err(FetchError::Status { status: 404, .. }) if req.kind == FeedKind::Copilot => {
                info!(
                    component = "api",
                    event = "api.copilot.legacy_fallback",
                    generation = req.generation
                );
                self.fetch_list(ALERTS_PATH, req)
            }
            other => other,
        }
    }

    fn fetch_history(&self, alert_id: i64, range: &str) -> Result<PriceHistory, FetchError> {
        let path = format!("/alerts/{alert_id}/history");
        let url = self.endpoint(&path, &[("range", range.to_string())]);
        let body = self.get_with_retry(&url)?;
        serde_json::from_slice(&body).map_err(|err| FetchError::Decode(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{parse_list, CopilotStatus, FilterState};

    fn request(filters: ServerFilters) -> PageRequest {
        PageRequest {
            generation: 1,
            kind: FeedKind::Alerts,
            filters,
            cursor: None,
            append: false,
            include_total: true,
            limit: 50,
        }
    }

    #[test]
    fn config_reads_overrides_and_ignores_garbage() {
        let cfg = BackendConfig::from_lookup(|key| match key {
            "PMD_API_BASE_URL" => Some("https://api.pmd.test".to_string()),
            "PMD_API_TIMEOUT_MS" => Some("abc".to_string()),
            "PMD_API_MAX_RETRIES" => Some("3".to_string()),
            "PMD_SESSION_COOKIE" => Some("  ".to_string()),
            "PMD_USER_ID" => Some("u-9".to_string()),
            _ => None,
        });
        assert_eq!(cfg.base_url, "https://api.pmd.test");
        assert_eq!(cfg.timeout_ms, 10_000);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.session_cookie, None);
        assert_eq!(cfg.user_id.as_deref(), Some("u-9"));
    }

    #[test]
    fn bare_array_payload_has_no_cursor() {
        let page = normalize_list_payload(br#"[{"id":1},{"id":2}]"#).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next_cursor, None);
        assert_eq!(page.total, None);
    }

    #[test]
    fn paged_payload_keeps_cursor_and_total() {
        let page =
            normalize_list_payload(br#"{"items":[{"id":1}],"next_cursor":"abc","total":120}"#)
                .unwrap();
        assert_eq!(page.items[0].id, Some(1));
        assert_eq!(page.next_cursor.as_deref(), Some("abc"));
        assert_eq!(page.total, Some(120));

        let exhausted =
            normalize_list_payload(br#"{"items":[],"next_cursor":null,"total":null}"#).unwrap();
        assert!(exhausted.items.is_empty());
        assert_eq!(exhausted.next_cursor, None);
    }

    #[test]
    fn unknown_shapes_and_empty_bodies_are_empty_pages() {
        assert_eq!(
            normalize_list_payload(br#"{"detail":"nope"}"#).unwrap(),
            FeedPage::default()
        );
        assert_eq!(normalize_list_payload(b"  ").unwrap(), FeedPage::default());
        assert!(matches!(
            normalize_list_payload(b"<html>"),
            Err(FetchError::Decode(_))
        ));
    }

    #[test]
    fn malformed_items_are_skipped() {
        let page = normalize_list_payload(br#"{"items":[{"id":"x"},{"id":3}],"next_cursor":""}"#)
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, Some(3));
        assert_eq!(page.next_cursor, None);
    }

    #[test]
    fn null_filter_reasons_keep_the_item() {
        let page = normalize_list_payload(
            br#"{"items":[{"id":1},{"id":2,"filter_reasons":null},{"id":3,"filter_reasons":["thin book"]}]}"#,
        )
        .unwrap();
        let ids: Vec<Option<i64>> = page.items.iter().map(|item| item.id).collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(3)]);
        assert!(page.items[1].filter_reasons.is_empty());
        assert_eq!(page.items[2].filter_reasons, vec!["thin book".to_string()]);
    }

    #[test]
    fn query_params_send_single_strength_and_theme_only() {
        let state = FilterState {
            strengths: parse_list("high"),
            themes: parse_list("Crypto,Politics"),
            copilot: CopilotStatus::Sent,
            window_minutes: 60,
            ..FilterState::default()
        };
        let mut req = request(state.server_filters());
        req.cursor = Some("c2".to_string());

        let params = list_query_params(&req, Some("user-1"));
        assert_eq!(
            params,
            vec![
                ("window_minutes", "60".to_string()),
                ("limit", "50".to_string()),
                ("paginate", "1".to_string()),
                ("cursor", "c2".to_string()),
                ("include_total", "1".to_string()),
                ("strength", "high".to_string()),
                ("copilot", "sent".to_string()),
                ("user_id", "user-1".to_string()),
            ]
        );
    }

    #[test]
    fn error_detail_becomes_message() {
        assert_eq!(error_message(br#"{"detail":"Plan limit reached"}"#), "Plan limit reached");
        assert_eq!(error_message(br#"{"detail":{"errors":{}}}"#), "Request failed");
        assert_eq!(error_message(b""), "Request failed");
    }

    #[test]
    fn endpoint_joins_base_path_and_params() {
        let backend = HttpBackend::new(BackendConfig {
            base_url: "https://api.example.com/v1/".to_string(),
            ..BackendConfig::default()
        })
        .unwrap();
        let url = backend.endpoint("/alerts/latest", &[("limit", "10".to_string())]);
        assert_eq!(url.as_str(), "https://api.example.com/v1/alerts/latest?limit=10");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let err = HttpBackend::new(BackendConfig {
            base_url: "not a url".to_string(),
            ..BackendConfig::default()
        });
        assert!(matches!(err, Err(BackendConfigError::InvalidBaseUrl { .. })));
    }

    #[test]
    fn retryable_errors_are_server_and_transport_failures() {
        assert!(FetchError::Status {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!FetchError::Status {
            status: 404,
            message: String::new()
        }
        .is_retryable());
        assert!(FetchError::Transport("reset".into()).is_retryable());
        assert!(!FetchError::Unauthorized.is_retryable());
        assert_eq!(
            FetchError::Transport("reset".into()).user_message(),
            "API unreachable"
        );
    }
}
