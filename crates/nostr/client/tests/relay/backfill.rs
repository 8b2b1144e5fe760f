use crate::support::{MockRelay, Reply, ReplyEnd, note};
use nostr::{Event, KeyValueStore, MemoryStore};
use nostr_client::{
    BackfillConfig, BackfillEngine, BackfillState, BackfillStop, Filter, continuation_key,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn history(count: u64) -> Vec<Event> {
    (1..=count).map(|i| note(&format!("n{i}"), i)).collect()
}

fn engine(page_limit: usize) -> BackfillEngine {
    BackfillEngine::new(BackfillConfig {
        page_limit,
        page_timeout: Duration::from_secs(2),
        relay_budget: Duration::from_secs(10),
        ..BackfillConfig::default()
    })
}

#[tokio::test]
async fn pages_through_full_history_on_one_connection() {
    let relay = MockRelay::honoring(history(25)).await;
    let mut seen = HashSet::new();

    let report = engine(10)
        .backfill(&relay.url, &Filter::new().kinds([1]), 1_000, |event| {
            assert!(seen.insert(event.id));
        })
        .await;

    assert_eq!(seen.len(), 25);
    assert_eq!(report.delivered, 25);
    assert_eq!(report.stop, BackfillStop::Exhausted);
    assert_eq!(report.pages, 4);
    assert_eq!(report.watermark, 0);
    assert_eq!(relay.connections(), 1);

    let untils: Vec<u64> = relay
        .requests()
        .iter()
        .map(|filters| filters[0]["until"].as_u64().unwrap())
        .collect();
    assert_eq!(untils, vec![1_000, 15, 5, 0]);
    assert!(relay.requests().iter().all(|filters| filters[0]["limit"] == 10));
}

#[tokio::test]
async fn relay_ignoring_until_stalls_instead_of_looping() {
    let page = vec![note("x", 30), note("y", 20), note("z", 10)];
    let relay = MockRelay::serving(page.clone()).await;

    let report = engine(10)
        .backfill(&relay.url, &Filter::new(), 10, |_| {})
        .await;
    assert_eq!(report.stop, BackfillStop::Stalled);
    assert_eq!(report.pages, 1);

    let report = engine(10)
        .backfill(&relay.url, &Filter::new(), 500, |_| {})
        .await;
    assert_eq!(report.stop, BackfillStop::Stalled);
    assert_eq!(report.pages, 2);
    assert_eq!(report.watermark, 9);
    assert_eq!(
        report.states,
        vec![
            BackfillState::Open,
            BackfillState::Requesting,
            BackfillState::Draining,
            BackfillState::Requesting,
            BackfillState::Draining,
            BackfillState::Closed,
        ]
    );
}

#[tokio::test]
async fn short_window_at_the_watermark_is_exhausted() {
    let relay = MockRelay::honoring(history(3)).await;

    let report = engine(2)
        .backfill(&relay.url, &Filter::new(), 100, |_| {})
        .await;

    assert_eq!(report.delivered, 3);
    assert_eq!(report.pages, 2);
    assert_eq!(report.stop, BackfillStop::Exhausted);
    assert_eq!(report.watermark, 1);
    assert_eq!(relay.requests()[1][0]["until"], 1);
}

#[tokio::test]
async fn full_window_pinned_at_the_watermark_stalls() {
    let crowded = vec![note("p", 50), note("q", 50), note("r", 40)];
    let relay = MockRelay::honoring(crowded).await;

    let report = engine(2)
        .backfill(&relay.url, &Filter::new(), 50, |_| {})
        .await;

    assert_eq!(report.pages, 1);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.stop, BackfillStop::Stalled);
    assert_eq!(report.watermark, 50);
}

#[tokio::test]
async fn relay_close_keeps_continuation_for_resume() {
    let events = history(25);
    let served = events.clone();
    let relay = MockRelay::start(move |index, _| {
        if index == 0 {
            Reply::events(served[15..].iter().rev().cloned().collect())
        } else {
            Reply::default().then(ReplyEnd::Closed("rate-limited: slow down".into()))
        }
    })
    .await;

    let store = Arc::new(MemoryStore::new());
    let filter = Filter::new().kinds([1]);
    let report = engine(10)
        .with_store(store.clone())
        .backfill(&relay.url, &filter, 1_000, |_| {})
        .await;

    assert_eq!(
        report.stop,
        BackfillStop::ClosedByRelay("rate-limited: slow down".to_string())
    );
    assert_eq!(report.delivered, 10);
    let key = continuation_key(&relay.url, &filter);
    assert_eq!(store.get(&key).as_deref(), Some("15"));

    // A fresh walk starting higher resumes from the stored watermark.
    let resumed = MockRelay::honoring(events).await;
    let resume_key = continuation_key(&resumed.url, &filter);
    store.put(&resume_key, "15".to_string());
    let report = engine(10)
        .with_store(store.clone())
        .backfill(&resumed.url, &filter, 1_000, |_| {})
        .await;
    assert_eq!(report.delivered, 15);
    assert_eq!(report.stop, BackfillStop::Exhausted);
    assert_eq!(resumed.requests()[0][0]["until"], 15);
    assert_eq!(store.get(&resume_key), None);
}

#[tokio::test]
async fn silent_page_ends_at_page_timeout() {
    let relay = MockRelay::start(|index, _| {
        if index == 0 {
            Reply::events(vec![note("only", 50)]).then(ReplyEnd::Silent)
        } else {
            Reply::default()
        }
    })
    .await;

    let engine = BackfillEngine::new(BackfillConfig {
        page_limit: 10,
        page_timeout: Duration::from_millis(200),
        relay_budget: Duration::from_secs(10),
        ..BackfillConfig::default()
    });
    let report = engine.backfill(&relay.url, &Filter::new(), 100, |_| {}).await;

    assert_eq!(report.delivered, 1);
    assert_eq!(report.pages, 2);
    assert_eq!(report.stop, BackfillStop::Exhausted);
}

#[tokio::test]
async fn budget_bounds_a_silent_relay() {
    let relay = MockRelay::silent().await;
    let engine = BackfillEngine::new(BackfillConfig {
        page_limit: 10,
        page_timeout: Duration::from_secs(5),
        relay_budget: Duration::from_millis(300),
        ..BackfillConfig::default()
    });

    let started = std::time::Instant::now();
    let report = engine.backfill(&relay.url, &Filter::new(), 100, |_| {}).await;
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(report.stop, BackfillStop::BudgetExhausted);
}

#[tokio::test]
async fn dropped_connection_is_reported() {
    let relay = MockRelay::start(|_, _| {
        Reply::events(vec![note("a", 5)]).then(ReplyEnd::Hangup)
    })
    .await;
    let report = engine(10)
        .backfill(&relay.url, &Filter::new(), 100, |_| {})
        .await;
    assert!(matches!(report.stop, BackfillStop::ConnectionFailed(_)));
}

#[tokio::test]
async fn backfill_all_walks_relays_in_order_with_progress() {
    let first = MockRelay::honoring(history(3)).await;
    let second = MockRelay::honoring(history(5)).await;
    let mut progress = Vec::new();
    let mut delivered = 0;

    let reports = engine(2)
        .backfill_all(
            [first.url.as_str(), second.url.as_str()],
            &Filter::new(),
            100,
            |_| delivered += 1,
            |relay, index, total| progress.push((relay.to_string(), index, total)),
        )
        .await;

    assert_eq!(delivered, 8);
    assert_eq!(reports.len(), 2);
    assert_eq!(
        progress,
        vec![(first.url.clone(), 0, 2), (second.url.clone(), 1, 2)]
    );
    assert!(
        reports
            .iter()
            .all(|report| report.stop == BackfillStop::Exhausted)
    );
}
