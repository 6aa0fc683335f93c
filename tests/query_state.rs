use std::sync::Arc;

use pmd::{
    compare_for, decode_query, encode_query, parse_list, AlertItem, CopilotStatus, FeedKind,
    FilterState, KeyValueStore, LocalTriageStore, Matcher, QueryCodec, SortKey, SqliteStore,
    StateFilter, TriageMap, TriageState,
};

fn with_liquidity(id: i64, liquidity: f64) -> AlertItem {
    AlertItem {
        id: Some(id),
        liquidity: Some(liquidity),
        ..AlertItem::default()
    }
}

fn with_probability(id: i64, p: Option<f64>) -> AlertItem {
    AlertItem {
        id: Some(id),
        market_p_yes: p,
        ..AlertItem::default()
    }
}

#[test]
fn default_filters_match_every_item() {
    let state = FilterState::default();
    let triage = TriageMap::new();
    let items = vec![
        AlertItem::default(),
        with_liquidity(1, 0.0),
        with_probability(2, Some(0.99)),
        AlertItem {
            id: Some(3),
            alert_type: Some("FAST_MOVE".to_string()),
            suggested_action: Some("IGNORE".to_string()),
            delivery_status: Some("skipped".to_string()),
            ..AlertItem::default()
        },
    ];

    for kind in [FeedKind::Alerts, FeedKind::Copilot] {
        let matcher = Matcher::new(&state, &triage, kind);
        assert!(items.iter().all(|item| matcher.matches(item)));
    }
}

#[test]
fn min_liquidity_keeps_only_the_deeper_market() {
    let state = FilterState {
        min_liquidity: Some(1000.0),
        ..FilterState::default()
    };
    let triage = TriageMap::new();
    let items = vec![with_liquidity(1, 500.0), with_liquidity(2, 1500.0)];

    let matcher = Matcher::new(&state, &triage, FeedKind::Alerts);
    let kept: Vec<i64> = matcher
        .filter_and_sort(&items)
        .iter()
        .filter_map(|item| item.id)
        .collect();
    assert_eq!(kept, vec![2]);
}

#[test]
fn saved_state_filter_keeps_saved_items_only() {
    let state = FilterState {
        state_filter: StateFilter::Saved,
        ..FilterState::default()
    };
    let mut triage = TriageMap::new();
    triage.set_state("alert:1", TriageState::Saved);
    let items = vec![with_liquidity(1, 10.0), with_liquidity(2, 10.0)];

    let matcher = Matcher::new(&state, &triage, FeedKind::Alerts);
    let kept: Vec<i64> = matcher
        .filter_and_sort(&items)
        .iter()
        .filter_map(|item| item.id)
        .collect();
    assert_eq!(kept, vec![1]);
}

#[test]
fn closest_sort_orders_by_distance_from_even_odds() {
    let mut items = vec![
        with_probability(1, Some(0.9)),
        with_probability(2, None),
        with_probability(3, Some(0.5)),
        with_probability(4, Some(0.3)),
    ];
    items.sort_by(compare_for(SortKey::Closest));

    let order: Vec<Option<f64>> = items.iter().map(|item| item.market_p_yes).collect();
    assert_eq!(order, vec![Some(0.5), Some(0.3), Some(0.9), None]);
}

#[test]
fn set_state_is_idempotent_and_pending_removes() {
    let mut once = TriageMap::new();
    once.set_state("rec:7", TriageState::Saved);
    let mut twice = once.clone();
    twice.set_state("rec:7", TriageState::Saved);
    assert_eq!(once, twice);

    twice.set_state("rec:7", TriageState::Pending);
    assert!(twice.is_empty());
    assert_eq!(twice.state_of("rec:7"), TriageState::Pending);
}

#[test]
fn encode_decode_round_trips_reachable_states() {
    let states = vec![
        FilterState::default(),
        FilterState {
            query: "btc & eth".to_string(),
            strengths: parse_list("high,medium"),
            themes: parse_list("Crypto"),
            window_minutes: 60,
            copilot: CopilotStatus::Skipped,
            fast_only: true,
            actionable_only: true,
            min_liquidity: Some(2500.0),
            min_volume: Some(10_000.0),
            min_move: Some(0.05),
            p_min: Some(0.2),
            p_max: Some(0.8),
            sort: SortKey::Closest,
            state_filter: StateFilter::Dismissed,
            action: Some("WATCH".to_string()),
        },
        FilterState {
            window_minutes: 7 * 24 * 60,
            state_filter: StateFilter::All,
            ..FilterState::default()
        },
    ];

    for state in states {
        assert_eq!(decode_query(&encode_query(&state)), state);
    }
    assert_eq!(encode_query(&FilterState::default()), "");
}

#[test]
fn decode_ignores_junk_and_repairs_invariants() {
    let state = decode_query("window=-5&p_min=0.9&p_max=0.1&min_liquidity=lots&utm_source=x&sort=weird");
    assert_eq!(state.window_minutes, 1440);
    assert_eq!(state.p_min, Some(0.1));
    assert_eq!(state.p_max, Some(0.9));
    assert_eq!(state.min_liquidity, None);
    assert_eq!(state.sort, SortKey::Newest);
}

#[test]
fn sqlite_store_persists_snapshot_and_triage_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pmd.sqlite");

    {
        let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(&path).unwrap());
        let codec = QueryCodec::new(store.clone(), "copilot-feed-filters-v1");
        codec.save_snapshot(&FilterState {
            query: "fed".to_string(),
            window_minutes: 60,
            ..FilterState::default()
        });

        let triage = LocalTriageStore::new(store, "copilot-feed-state-v1");
        let mut map = TriageMap::new();
        map.bulk_set_state(["rec:1", "rec:2"], TriageState::Dismissed);
        triage.save(&map);
    }

    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(&path).unwrap());
    let codec = QueryCodec::new(store.clone(), "copilot-feed-filters-v1");
    let restored = codec.initial_state("");
    assert_eq!(restored.query, "fed");
    assert_eq!(restored.window_minutes, 60);
    // URL parameters win over the stored snapshot.
    assert_eq!(codec.initial_state("?q=cpi").query, "cpi");

    let map = LocalTriageStore::new(store, "copilot-feed-state-v1").load();
    assert_eq!(map.len(), 2);
    assert_eq!(map.state_of("rec:2"), TriageState::Dismissed);
}
