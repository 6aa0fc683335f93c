//! Probability history for one alert, with a bounded cache owned by the caller.

use std::num::NonZeroUsize;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::{FeedTransport, FetchError};

pub const DEFAULT_HISTORY_CACHE_CAPACITY: usize = 32;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryPoint {
    pub ts: String,
    pub p_yes: Option<f64>,
    pub p_no: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceHistory {
    pub points: Vec<HistoryPoint>,
    pub meta: serde_json::Value,
}

pub struct HistoryCache {
    entries: LruCache<(i64, String), PriceHistory>,
}

impl Default for HistoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CACHE_CAPACITY)
    }
}

impl HistoryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    pub fn get(&mut self, alert_id: i64, range: &str) -> Option<&PriceHistory> {
        self.entries.get(&(alert_id, range.to_string()))
    }

    pub fn insert(&mut self, alert_id: i64, range: &str, history: PriceHistory) {
        self.entries.put((alert_id, range.to_string()), history);
    }

    /// Failed fetches are not cached, so the next call retries.
    pub fn get_or_fetch(
        &mut self,
        alert_id: i64,
        range: &str,
        transport: &dyn FeedTransport,
    ) -> Result<PriceHistory, FetchError> {
        if let Some(hit) = self.get(alert_id, range) {
            debug!(
                component = "history",
                event = "history.cache.hit",
                alert_id,
                range
            );
            return Ok(hit.clone());
        }

        let history = transport.fetch_history(alert_id, range)?;
        self.insert(alert_id, range, history.clone());
        Ok(history)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
