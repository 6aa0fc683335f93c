//! Cursor pagination state for one feed: dedup-merge of pages and the two "has more" flags.

use std::collections::HashSet;

use tracing::{info, warn};

use crate::api::{FeedPage, FeedTransport, FetchError, PageRequest};
use crate::filter::Matcher;
use crate::item::{AlertItem, FeedKind};
use crate::query::{ServerFilters, StateFilter};
use crate::triage::{TriageMap, TriageState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    Updated { added: usize, matching: usize },
    /// Response for a superseded request; nothing changed.
    Stale,
    /// Session expired. Cached state is untouched and the caller should redirect.
    Unauthorized,
    Failed { message: String },
}

#[derive(Debug, Clone)]
pub struct PageAccumulator {
    kind: FeedKind,
    items: Vec<AlertItem>,
    keys: HashSet<String>,
    cursor: Option<String>,
    has_more_on_server: bool,
    has_more_matching_filter: bool,
    total_count: Option<u64>,
    loading: bool,
    loading_more: bool,
    error: Option<String>,
    generation: u64,
    applied: ServerFilters,
}

impl PageAccumulator {
    pub fn new(kind: FeedKind) -> Self {
        Self {
            kind,
            items: Vec::new(),
            keys: HashSet::new(),
            cursor: None,
            has_more_on_server: false,
            has_more_matching_filter: true,
            total_count: None,
            loading: false,
            loading_more: false,
            error: None,
            generation: 0,
            applied: ServerFilters::default(),
        }
    }

    pub fn kind(&self) -> FeedKind {
        self.kind
    }

    pub fn items(&self) -> &[AlertItem] {
        &self.items
    }

    pub fn is_loaded(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn has_more_on_server(&self) -> bool {
        self.has_more_on_server
    }

    pub fn has_more_matching_filter(&self) -> bool {
        self.has_more_matching_filter
    }

    pub fn total_count(&self) -> Option<u64> {
        self.total_count
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_loading_more(&self) -> bool {
        self.loading_more
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn applied(&self) -> &ServerFilters {
        &self.applied
    }

    /// Starts a fresh fetch. Any request still in flight becomes stale.
    /// Cached items, cursor and applied filters stay as they are until `apply`.
    pub fn begin_fresh(&mut self, filters: ServerFilters, include_total: bool) -> PageRequest {
        self.generation = self.generation.wrapping_add(1);
        self.loading = true;
        self.loading_more = false;

        PageRequest {
            generation: self.generation,
            kind: self.kind,
            filters,
            cursor: None,
            append: false,
            include_total,
            limit: self.kind.page_size(),
        }
    }

    /// `None` while a fetch is outstanding or once the server is exhausted.
    pub fn begin_append(&mut self) -> Option<PageRequest> {
        if self.loading || self.loading_more || !self.has_more_on_server {
            return None;
        }
        let cursor = self.cursor.clone()?;
        self.loading_more = true;

        Some(PageRequest {
            generation: self.generation,
            kind: self.kind,
            filters: self.applied.clone(),
            cursor: Some(cursor),
            append: true,
            include_total: false,
            limit: self.kind.page_size(),
        })
    }

    pub fn apply(
        &mut self,
        req: &PageRequest,
        result: Result<FeedPage, FetchError>,
        matcher: &Matcher<'_>,
    ) -> PageOutcome {
        if req.generation != self.generation {
            info!(
                component = "pager",
                event = "feed.fetch.stale",
                feed = self.kind.as_str(),
                generation = req.generation,
                current_generation = self.generation,
                append = req.append
            );
            return PageOutcome::Stale;
        }

        if req.append {
            self.loading_more = false;
        } else {
            self.loading = false;
        }

        let page = match result {
            Ok(page) => page,
            Err(FetchError::Unauthorized) => {
                warn!(
                    component = "pager",
                    event = "feed.fetch.unauthorized",
                    feed = self.kind.as_str()
                );
                return PageOutcome::Unauthorized;
            }
            Err(err) => {
                let message = err.user_message();
                warn!(
                    component = "pager",
                    event = "feed.fetch.error",
                    feed = self.kind.as_str(),
                    append = req.append,
                    error = %err
                );
                if !req.append {
                    self.items.clear();
                    self.keys.clear();
                    self.cursor = None;
                    self.total_count = None;
                    self.has_more_on_server = false;
                    self.has_more_matching_filter = true;
                    self.applied = req.filters.clone();
                }
                self.error = Some(message.clone());
                return PageOutcome::Failed { message };
            }
        };

        let FeedPage {
            items,
            next_cursor,
            total,
        } = page;
        let page_len = items.len();
        let matching = matcher.count_matching(items.iter());

        if !req.append {
            self.items.clear();
            self.keys.clear();
        }
        let added = self.merge(items);

        if req.append {
            if page_len == 0 {
                self.cursor = None;
            } else {
                self.cursor = next_cursor;
            }
            if matching == 0 {
                self.has_more_matching_filter = false;
            }
            if total.is_some() {
                self.total_count = total;
            }
        } else {
            self.cursor = next_cursor;
            self.has_more_matching_filter = true;
            self.total_count = total;
            self.applied = req.filters.clone();
        }
        self.has_more_on_server = self.cursor.is_some();
        self.error = None;

        info!(
            component = "pager",
            event = "feed.fetch.finish",
            feed = self.kind.as_str(),
            append = req.append,
            page_items = page_len,
            added,
            matching,
            loaded = self.items.len(),
            has_more_on_server = self.has_more_on_server
        );

        PageOutcome::Updated { added, matching }
    }

    /// First occurrence of a key wins, including duplicates inside one page.
    fn merge(&mut self, incoming: Vec<AlertItem>) -> usize {
        let before = self.items.len();
        for item in incoming {
            let key = self.kind.item_key(&item);
            if self.keys.insert(key) {
                self.items.push(item);
            }
        }
        self.items.len() - before
    }

    pub fn can_load_more(
        &self,
        filtered_count: usize,
        state_filter: StateFilter,
        triage: &TriageMap,
    ) -> bool {
        if !self.has_more_on_server || filtered_count == 0 {
            return false;
        }
        match state_filter {
            // Saved/dismissed marks are local, so keep paging while a marked key is still unseen.
            StateFilter::Saved => self.has_unloaded(triage, TriageState::Saved),
            StateFilter::Dismissed => self.has_unloaded(triage, TriageState::Dismissed),
            StateFilter::Active | StateFilter::All => self.has_more_matching_filter,
        }
    }

    fn has_unloaded(&self, triage: &TriageMap, state: TriageState) -> bool {
        triage.keys_with(state).any(|key| !self.keys.contains(key))
    }

    /// Runs one request synchronously against `transport` and applies the result.
    pub fn fetch(
        &mut self,
        req: &PageRequest,
        transport: &dyn FeedTransport,
        matcher: &Matcher<'_>,
    ) -> PageOutcome {
        info!(
            component = "pager",
            event = "feed.fetch.start",
            feed = self.kind.as_str(),
            generation = req.generation,
            append = req.append,
            window_minutes = req.filters.window_minutes
        );
        let result = transport.fetch_page(req);
        self.apply(req, result, matcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::FilterState;

    fn item(id: i64) -> AlertItem {
        AlertItem {
            id: Some(id),
            ..AlertItem::default()
        }
    }

    fn page(ids: &[i64], cursor: Option<&str>, total: Option<u64>) -> FeedPage {
        FeedPage {
            items: ids.iter().copied().map(item).collect(),
            next_cursor: cursor.map(str::to_string),
            total,
        }
    }

    fn ids(acc: &PageAccumulator) -> Vec<i64> {
        acc.items().iter().filter_map(|item| item.id).collect()
    }

    #[test]
    fn fresh_page_replaces_and_tracks_cursor() {
        let state = FilterState::default();
        let triage = TriageMap::new();
        let matcher = Matcher::new(&state, &triage, FeedKind::Alerts);
        let mut acc = PageAccumulator::new(FeedKind::Alerts);

        let req = acc.begin_fresh(state.server_filters(), true);
        assert!(acc.is_loading());
        assert_eq!(req.limit, 50);
        acc.apply(&req, Ok(page(&[1, 2], Some("c1"), Some(10))), &matcher);

        assert!(!acc.is_loading());
        assert_eq!(ids(&acc), vec![1, 2]);
        assert_eq!(acc.cursor(), Some("c1"));
        assert!(acc.has_more_on_server());
        assert_eq!(acc.total_count(), Some(10));
    }

    #[test]
    fn append_dedups_with_first_occurrence_winning() {
        let state = FilterState::default();
        let triage = TriageMap::new();
        let matcher = Matcher::new(&state, &triage, FeedKind::Alerts);
        let mut acc = PageAccumulator::new(FeedKind::Alerts);

        let req = acc.begin_fresh(state.server_filters(), true);
        acc.apply(&req, Ok(page(&[1, 2], Some("c1"), Some(4))), &matcher);

        let more = acc.begin_append().unwrap();
        assert_eq!(more.cursor.as_deref(), Some("c1"));
        assert!(acc.begin_append().is_none());

        let outcome = acc.apply(&more, Ok(page(&[2, 3, 3], None, None)), &matcher);
        assert_eq!(
            outcome,
            PageOutcome::Updated {
                added: 1,
                matching: 3
            }
        );
        assert_eq!(ids(&acc), vec![1, 2, 3]);
        assert!(!acc.has_more_on_server());
        assert_eq!(acc.total_count(), Some(4));
        assert!(acc.begin_append().is_none());
    }

    #[test]
    fn empty_append_ends_paging_even_with_cursor() {
        let state = FilterState::default();
        let triage = TriageMap::new();
        let matcher = Matcher::new(&state, &triage, FeedKind::Alerts);
        let mut acc = PageAccumulator::new(FeedKind::Alerts);

        let req = acc.begin_fresh(state.server_filters(), false);
        acc.apply(&req, Ok(page(&[1], Some("c1"), None)), &matcher);
        let more = acc.begin_append().unwrap();
        acc.apply(&more, Ok(page(&[], Some("c2"), None)), &matcher);

        assert!(!acc.has_more_on_server());
        assert_eq!(acc.cursor(), None);
    }

    #[test]
    fn append_with_no_matches_stops_offering_more() {
        let state = FilterState {
            fast_only: true,
            ..FilterState::default()
        };
        let triage = TriageMap::new();
        let matcher = Matcher::new(&state, &triage, FeedKind::Alerts);
        let mut acc = PageAccumulator::new(FeedKind::Alerts);

        let req = acc.begin_fresh(state.server_filters(), false);
        let fast = AlertItem {
            id: Some(1),
            alert_type: Some("FAST_MOVE".into()),
            ..AlertItem::default()
        };
        acc.apply(
            &req,
            Ok(FeedPage {
                items: vec![fast],
                next_cursor: Some("c1".into()),
                total: None,
            }),
            &matcher,
        );
        assert!(acc.can_load_more(1, state.state_filter, &triage));

        let more = acc.begin_append().unwrap();
        acc.apply(&more, Ok(page(&[2, 3], Some("c2"), None)), &matcher);
        assert!(acc.has_more_on_server());
        assert!(!acc.has_more_matching_filter());
        assert!(!acc.can_load_more(1, state.state_filter, &triage));

        // A fresh fetch resets the matching flag.
        let req = acc.begin_fresh(state.server_filters(), false);
        assert!(acc.has_more_matching_filter());
        acc.apply(&req, Ok(page(&[4], Some("c9"), None)), &matcher);
        assert!(acc.has_more_matching_filter());
    }

    #[test]
    fn stale_append_after_fresh_is_discarded() {
        let state = FilterState::default();
        let triage = TriageMap::new();
        let matcher = Matcher::new(&state, &triage, FeedKind::Alerts);
        let mut acc = PageAccumulator::new(FeedKind::Alerts);

        let req = acc.begin_fresh(state.server_filters(), false);
        acc.apply(&req, Ok(page(&[1], Some("c1"), None)), &matcher);
        let more = acc.begin_append().unwrap();

        let fresh = acc.begin_fresh(state.server_filters(), false);
        acc.apply(&fresh, Ok(page(&[10, 11], None, None)), &matcher);

        let outcome = acc.apply(&more, Ok(page(&[99], Some("zz"), None)), &matcher);
        assert_eq!(outcome, PageOutcome::Stale);
        assert_eq!(ids(&acc), vec![10, 11]);
        assert!(!acc.has_more_on_server());
    }

    #[test]
    fn errors_clear_fresh_lists_but_keep_appended_ones() {
        let state = FilterState::default();
        let triage = TriageMap::new();
        let matcher = Matcher::new(&state, &triage, FeedKind::Alerts);
        let mut acc = PageAccumulator::new(FeedKind::Alerts);

        let req = acc.begin_fresh(state.server_filters(), false);
        acc.apply(&req, Ok(page(&[1, 2], Some("c1"), None)), &matcher);

        let more = acc.begin_append().unwrap();
        let outcome = acc.apply(
            &more,
            Err(FetchError::Status {
                status: 502,
                message: "Bad gateway".into(),
            }),
            &matcher,
        );
        assert_eq!(
            outcome,
            PageOutcome::Failed {
                message: "Bad gateway".into()
            }
        );
        assert_eq!(ids(&acc), vec![1, 2]);
        assert_eq!(acc.error(), Some("Bad gateway"));
        assert!(acc.begin_append().is_some());

        let req = acc.begin_fresh(state.server_filters(), false);
        acc.apply(&req, Err(FetchError::Transport("refused".into())), &matcher);
        assert!(acc.items().is_empty());
        assert_eq!(acc.error(), Some("API unreachable"));
        assert!(!acc.has_more_on_server());
    }

    #[test]
    fn unauthorized_leaves_cached_state_alone() {
        let state = FilterState::default();
        let triage = TriageMap::new();
        let matcher = Matcher::new(&state, &triage, FeedKind::Alerts);
        let mut acc = PageAccumulator::new(FeedKind::Alerts);

        let req = acc.begin_fresh(state.server_filters(), false);
        acc.apply(&req, Ok(page(&[1], Some("c1"), None)), &matcher);

        let req = acc.begin_fresh(state.server_filters(), false);
        let outcome = acc.apply(&req, Err(FetchError::Unauthorized), &matcher);
        assert_eq!(outcome, PageOutcome::Unauthorized);
        assert_eq!(ids(&acc), vec![1]);
        assert_eq!(acc.cursor(), Some("c1"));
        assert_eq!(acc.error(), None);
    }

    #[test]
    fn unauthorized_fresh_fetch_keeps_cursor_paired_with_its_filters() {
        let state = FilterState::default();
        let narrowed = FilterState {
            window_minutes: 60,
            ..FilterState::default()
        };
        let triage = TriageMap::new();
        let matcher = Matcher::new(&state, &triage, FeedKind::Alerts);
        let mut acc = PageAccumulator::new(FeedKind::Alerts);

        let req = acc.begin_fresh(state.server_filters(), true);
        acc.apply(&req, Ok(page(&[1, 2], Some("c1"), Some(9))), &matcher);

        let req = acc.begin_fresh(narrowed.server_filters(), true);
        assert_eq!(req.filters.window_minutes, 60);
        assert_eq!(acc.applied().window_minutes, 1440);
        acc.apply(&req, Err(FetchError::Unauthorized), &matcher);

        assert_eq!(acc.applied(), &state.server_filters());
        assert_eq!(acc.total_count(), Some(9));
        let more = acc.begin_append().unwrap();
        assert_eq!(more.cursor.as_deref(), Some("c1"));
        assert_eq!(more.filters.window_minutes, 1440);

        let outcome = acc.apply(&more, Ok(page(&[3], None, None)), &matcher);
        assert!(matches!(outcome, PageOutcome::Updated { added: 1, .. }));

        let req = acc.begin_fresh(narrowed.server_filters(), true);
        acc.apply(&req, Ok(page(&[4], None, Some(1))), &matcher);
        assert_eq!(acc.applied().window_minutes, 60);
        assert_eq!(ids(&acc), vec![4]);
    }

    #[test]
    fn saved_view_keeps_paging_while_marked_keys_are_unloaded() {
        let state = FilterState {
            state_filter: StateFilter::Saved,
            ..FilterState::default()
        };
        let mut triage = TriageMap::new();
        triage.set_state("alert:1", TriageState::Saved);
        let matcher = Matcher::new(&state, &triage, FeedKind::Alerts);
        let mut acc = PageAccumulator::new(FeedKind::Alerts);

        let req = acc.begin_fresh(state.server_filters(), false);
        acc.apply(&req, Ok(page(&[1, 2], Some("c1"), None)), &matcher);
        assert!(!acc.can_load_more(1, StateFilter::Saved, &triage));

        triage.set_state("alert:77", TriageState::Saved);
        assert!(acc.can_load_more(1, StateFilter::Saved, &triage));
        assert!(!acc.can_load_more(0, StateFilter::Saved, &triage));
    }
}
