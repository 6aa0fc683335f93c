//! One feed view's state container: draft filters, triage overlay, preferences and pagination.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::{FeedPage, FeedTransport, FetchError, PageRequest};
use crate::filter::Matcher;
use crate::item::{AlertItem, FeedKind};
use crate::pager::{PageAccumulator, PageOutcome};
use crate::query::{FilterState, QueryCodec, ServerFilters};
use crate::rows::{GroupingMode, Row, RowProjector};
use crate::storage::{storage_keys, KeyValueStore};
use crate::triage::{LocalTriageStore, TriageMap, TriageState};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Density {
    #[default]
    Comfortable,
    Compact,
}

impl Density {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "comfortable" => Some(Self::Comfortable),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Comfortable => "comfortable",
            Self::Compact => "compact",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewPrefs {
    pub density: Density,
    pub grouping: GroupingMode,
}

/// Result of a view operation that may touch the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewOutcome {
    Updated,
    /// Load-more was not offered or a fetch was already outstanding.
    Ignored,
    Stale,
    Unauthorized,
    Failed { message: String },
}

impl From<PageOutcome> for ViewOutcome {
    fn from(outcome: PageOutcome) -> Self {
        match outcome {
            PageOutcome::Updated { .. } => Self::Updated,
            PageOutcome::Stale => Self::Stale,
            PageOutcome::Unauthorized => Self::Unauthorized,
            PageOutcome::Failed { message } => Self::Failed { message },
        }
    }
}

pub struct FeedView {
    kind: FeedKind,
    transport: Arc<dyn FeedTransport>,
    codec: QueryCodec,
    triage_store: LocalTriageStore,
    store: Arc<dyn KeyValueStore>,
    view_key: &'static str,
    timezone: Tz,
    draft: FilterState,
    triage: TriageMap,
    prefs: ViewPrefs,
    collapsed: BTreeSet<String>,
    pager: PageAccumulator,
}

impl FeedView {
    pub fn new(
        kind: FeedKind,
        transport: Arc<dyn FeedTransport>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let keys = storage_keys(kind);
        Self {
            kind,
            transport,
            codec: QueryCodec::new(store.clone(), keys.filters),
            triage_store: LocalTriageStore::new(store.clone(), keys.triage),
            store,
            view_key: keys.view,
            timezone: Tz::UTC,
            draft: FilterState::default(),
            triage: TriageMap::new(),
            prefs: ViewPrefs::default(),
            collapsed: BTreeSet::new(),
            pager: PageAccumulator::new(kind),
        }
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn kind(&self) -> FeedKind {
        self.kind
    }

    pub fn filters(&self) -> &FilterState {
        &self.draft
    }

    pub fn triage(&self) -> &TriageMap {
        &self.triage
    }

    pub fn prefs(&self) -> ViewPrefs {
        self.prefs
    }

    pub fn collapsed(&self) -> &BTreeSet<String> {
        &self.collapsed
    }

    pub fn pager(&self) -> &PageAccumulator {
        &self.pager
    }

    pub fn is_server_dirty(&self) -> bool {
        self.draft.is_server_dirty(self.pager.applied())
    }

    pub fn query_string(&self) -> String {
        self.codec.encode(&self.draft)
    }

    /// Mount: URL or snapshot filters, stored triage and preferences, then the first page.
    pub fn open(&mut self, query: &str) -> ViewOutcome {
        let req = self.prepare_open(query);
        self.run(&req)
    }

    pub fn prepare_open(&mut self, query: &str) -> PageRequest {
        self.draft = self.codec.initial_state(query);
        self.triage = self.triage_store.load();
        self.prefs = self.load_prefs();
        self.collapsed.clear();
        self.prepare_fresh(self.draft.server_filters())
    }

    /// Re-fetches with the filters last applied; draft edits stay unapplied.
    pub fn refresh(&mut self) -> ViewOutcome {
        let req = self.prepare_refresh();
        self.run(&req)
    }

    pub fn load_more(&mut self) -> ViewOutcome {
        match self.prepare_load_more() {
            Some(req) => self.run(&req),
            None => ViewOutcome::Ignored,
        }
    }

    pub fn apply_filters(&mut self) -> ViewOutcome {
        let req = self.prepare_apply();
        self.run(&req)
    }

    pub fn clear_filters(&mut self) -> ViewOutcome {
        self.draft = FilterState::default();
        self.apply_filters()
    }

    /// Replaces the draft only; server-side fields take effect on the next apply.
    pub fn replace_filters(&mut self, state: FilterState) {
        self.draft = state.normalized();
    }

    pub fn prepare_refresh(&mut self) -> PageRequest {
        let applied = self.pager.applied().clone();
        self.prepare_fresh(applied)
    }

    pub fn prepare_apply(&mut self) -> PageRequest {
        self.draft = std::mem::take(&mut self.draft).normalized();
        self.codec.save_snapshot(&self.draft);
        self.prepare_fresh(self.draft.server_filters())
    }

    pub fn prepare_load_more(&mut self) -> Option<PageRequest> {
        if !self.can_load_more() {
            return None;
        }
        self.pager.begin_append()
    }

    fn prepare_fresh(&mut self, filters: ServerFilters) -> PageRequest {
        self.pager.begin_fresh(filters, true)
    }

    /// Applies a response produced outside the view, for callers that fetch without holding it.
    pub fn complete(
        &mut self,
        req: &PageRequest,
        result: Result<FeedPage, FetchError>,
    ) -> ViewOutcome {
        let matcher = Matcher::new(&self.draft, &self.triage, self.kind);
        self.pager.apply(req, result, &matcher).into()
    }

    pub fn transport(&self) -> Arc<dyn FeedTransport> {
        self.transport.clone()
    }

    fn run(&mut self, req: &PageRequest) -> ViewOutcome {
        let matcher = Matcher::new(&self.draft, &self.triage, self.kind);
        self.pager
            .fetch(req, self.transport.as_ref(), &matcher)
            .into()
    }

    fn matcher(&self) -> Matcher<'_> {
        Matcher::new(&self.draft, &self.triage, self.kind)
    }

    pub fn set_triage(&mut self, key: &str, state: TriageState) {
        self.triage.set_state(key, state);
        self.triage_store.save(&self.triage);
    }

    pub fn dismiss_visible(&mut self) -> usize {
        let keys: Vec<String> = self
            .filtered()
            .into_iter()
            .map(|item| self.kind.item_key(item))
            .collect();
        self.bulk_set(keys, TriageState::Dismissed)
    }

    pub fn save_visible_actionable(&mut self) -> usize {
        let keys: Vec<String> = self
            .filtered()
            .into_iter()
            .filter(|item| item.is_actionable())
            .map(|item| self.kind.item_key(item))
            .collect();
        self.bulk_set(keys, TriageState::Saved)
    }

    fn bulk_set(&mut self, keys: Vec<String>, state: TriageState) -> usize {
        let count = keys.len();
        if count == 0 {
            return 0;
        }
        self.triage.bulk_set_state(keys, state);
        self.triage_store.save(&self.triage);
        debug!(
            component = "view",
            event = "triage.bulk",
            feed = self.kind.as_str(),
            state = state.as_str(),
            count
        );
        count
    }

    pub fn filtered(&self) -> Vec<&AlertItem> {
        self.matcher().filter_and_sort(self.pager.items())
    }

    pub fn rows(&self) -> Vec<Row<'_>> {
        self.rows_at(Utc::now())
    }

    pub fn rows_at(&self, now: DateTime<Utc>) -> Vec<Row<'_>> {
        let filtered = self.filtered();
        RowProjector::new(self.kind, self.prefs.grouping)
            .with_clock(now, self.timezone)
            .project(&filtered, &self.collapsed)
    }

    pub fn can_load_more(&self) -> bool {
        let filtered = self.filtered().len();
        self.pager
            .can_load_more(filtered, self.draft.state_filter, &self.triage)
    }

    pub fn showing_label(&self) -> String {
        let noun = match self.kind {
            FeedKind::Alerts => "alerts",
            FeedKind::Copilot => "recommendations",
        };
        let showing = self.filtered().len();
        match self.pager.total_count() {
            Some(total) => format!("Showing {showing} of {total} {noun}"),
            None => format!("Showing {showing}+ {noun}"),
        }
    }

    /// Returns whether the group is collapsed afterwards.
    pub fn toggle_group(&mut self, key: &str) -> bool {
        if self.collapsed.remove(key) {
            false
        } else {
            self.collapsed.insert(key.to_string());
            true
        }
    }

    pub fn set_grouping(&mut self, grouping: GroupingMode) {
        if self.prefs.grouping != grouping {
            self.prefs.grouping = grouping;
            self.collapsed.clear();
            self.save_prefs();
        }
    }

    pub fn set_density(&mut self, density: Density) {
        if self.prefs.density != density {
            self.prefs.density = density;
            self.save_prefs();
        }
    }

    fn load_prefs(&self) -> ViewPrefs {
        match self.store.get(self.view_key) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                debug!(
                    component = "view",
                    event = "view.prefs.corrupt",
                    storage_key = self.view_key,
                    error = %err
                );
                ViewPrefs::default()
            }),
            Ok(None) => ViewPrefs::default(),
            Err(err) => {
                warn!(
                    component = "view",
                    event = "view.prefs.load_error",
                    storage_key = self.view_key,
                    error = %err
                );
                ViewPrefs::default()
            }
        }
    }

    fn save_prefs(&self) {
        let result = serde_json::to_string(&self.prefs)
            .map_err(crate::storage::StorageError::from)
            .and_then(|payload| self.store.set(self.view_key, &payload));
        if let Err(err) = result {
            warn!(
                component = "view",
                event = "view.prefs.save_error",
                storage_key = self.view_key,
                error = %err
            );
        }
    }
}
