use crate::support::{MockRelay, Reply, ReplyEnd, note, profile, refused_url};
use nostr::nip19::{self, EventPointer};
use nostr_client::{
    FanoutConfig, FanoutCoordinator, Filter, MergePolicy, SessionEnd, TimelineQuery,
};
use std::time::{Duration, Instant};

fn coordinator() -> FanoutCoordinator {
    FanoutCoordinator::new(FanoutConfig {
        lookup_timeout: Duration::from_secs(3),
        timeline_timeout: Duration::from_secs(3),
        ..FanoutConfig::default()
    })
}

fn sorted_ids(events: &[nostr::Event]) -> Vec<String> {
    let mut ids: Vec<String> = events.iter().map(|event| event.id.clone()).collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn union_dedup_merges_overlapping_relays() {
    let first = MockRelay::start(|_, _| {
        Reply::events(vec![note("a", 1), note("b", 2)]).after(Duration::from_millis(60))
    })
    .await;
    let second = MockRelay::serving(vec![note("b", 2), note("c", 3)]).await;
    let third = MockRelay::start(|_, _| {
        Reply::events(vec![note("c", 3), note("d", 4)]).after(Duration::from_millis(20))
    })
    .await;

    let result = coordinator()
        .query(
            [&first.url, &second.url, &third.url],
            vec![Filter::new().kinds([1])],
            MergePolicy::UnionDedup,
            Duration::from_secs(3),
        )
        .await;

    assert_eq!(sorted_ids(&result.events), vec!["a", "b", "c", "d"]);
    assert_eq!(result.completed, 3);
    assert_eq!(result.responded, 3);
    assert!(!result.timed_out);
}

#[tokio::test]
async fn single_worker_serves_relays_one_at_a_time() {
    let first = MockRelay::serving(vec![note("a", 1)]).await;
    let second = MockRelay::serving(vec![note("b", 2)]).await;
    let third = MockRelay::serving(vec![note("c", 3)]).await;
    let coordinator = FanoutCoordinator::new(FanoutConfig {
        max_concurrent_relays: 1,
        ..FanoutConfig::default()
    });

    let result = coordinator
        .query(
            [&first.url, &second.url, &third.url],
            vec![Filter::new().kinds([1])],
            MergePolicy::UnionDedup,
            Duration::from_secs(3),
        )
        .await;

    assert_eq!(sorted_ids(&result.events), vec!["a", "b", "c"]);
    assert_eq!(result.completed, 3);
    assert!(!result.timed_out);
}

#[tokio::test]
async fn relay_waiting_for_a_worker_gives_up_at_the_deadline() {
    let silent = MockRelay::silent().await;
    let queued = MockRelay::serving(vec![note("late", 1)]).await;
    let coordinator = FanoutCoordinator::new(FanoutConfig {
        max_concurrent_relays: 1,
        ..FanoutConfig::default()
    });

    let started = Instant::now();
    let result = coordinator
        .query(
            [&silent.url, &queued.url],
            vec![Filter::new().kinds([1])],
            MergePolicy::UnionDedup,
            Duration::from_millis(300),
        )
        .await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(result.events.is_empty());
    assert!(result.timed_out);
    assert_eq!(queued.connections(), 0);
}

#[tokio::test]
async fn first_non_empty_returns_before_the_deadline() {
    let slow = MockRelay::silent().await;
    let fast = MockRelay::start(|_, _| {
        Reply::events(vec![note("winner", 5)])
            .after(Duration::from_millis(50))
            .then(ReplyEnd::Silent)
    })
    .await;
    let never = MockRelay::silent().await;

    let started = Instant::now();
    let result = coordinator()
        .query(
            [&slow.url, &fast.url, &never.url],
            vec![Filter::new().ids(["winner"])],
            MergePolicy::FirstNonEmpty,
            Duration::from_secs(5),
        )
        .await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(
        result.first().map(|event| event.id.as_str()),
        Some("winner")
    );
    assert!(!result.timed_out);
}

#[tokio::test]
async fn silent_relays_yield_empty_result_at_the_deadline() {
    let relays = [
        MockRelay::silent().await,
        MockRelay::silent().await,
        MockRelay::silent().await,
    ];
    let timeout = Duration::from_millis(300);

    let started = Instant::now();
    let result = coordinator()
        .query(
            relays.iter().map(|relay| relay.url.as_str()),
            vec![Filter::new().kinds([1])],
            MergePolicy::UnionDedup,
            timeout,
        )
        .await;
    let elapsed = started.elapsed();

    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + Duration::from_millis(700));
    assert!(result.events.is_empty());
    assert!(result.timed_out);
    assert_eq!(result.targets, 3);
}

#[tokio::test]
async fn cancelled_sessions_send_close() {
    let silent = MockRelay::silent().await;
    let answering = MockRelay::start(|_, _| {
        Reply::events(vec![note("x", 1)]).after(Duration::from_millis(200))
    })
    .await;

    let result = coordinator()
        .query(
            [&answering.url, &silent.url],
            vec![Filter::new().kinds([1])],
            MergePolicy::FirstNonEmpty,
            Duration::from_secs(5),
        )
        .await;
    assert_eq!(result.events.len(), 1);

    let deadline = Instant::now() + Duration::from_secs(2);
    while silent.closes().is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(silent.closes().len(), 1);
}

#[tokio::test]
async fn unreachable_and_closing_relays_complete_without_data() {
    let refused = refused_url().await;
    let closing =
        MockRelay::start(|_, _| Reply::default().then(ReplyEnd::Closed("auth-required: no".into())))
            .await;
    let serving = MockRelay::serving(vec![note("only", 1)]).await;

    let result = coordinator()
        .query(
            [refused.as_str(), &closing.url, &serving.url],
            vec![Filter::new().kinds([1])],
            MergePolicy::UnionDedup,
            Duration::from_secs(3),
        )
        .await;

    assert_eq!(sorted_ids(&result.events), vec!["only"]);
    assert_eq!(result.completed, 3);
    assert_eq!(result.responded, 2);
    assert!(result.outcomes.iter().any(|outcome| matches!(
        &outcome.end,
        SessionEnd::ClosedByRelay(reason) if reason == "auth-required: no"
    )));
    assert!(
        result
            .outcomes
            .iter()
            .any(|outcome| matches!(outcome.end, SessionEnd::ConnectFailed(_)))
    );
}

#[tokio::test]
async fn events_outside_the_filter_are_dropped() {
    let mut reaction = note("reaction", 3);
    reaction.kind = 7;
    let relay = MockRelay::serving(vec![note("kept", 1), reaction]).await;

    let result = coordinator()
        .query(
            [&relay.url],
            vec![Filter::new().kinds([1])],
            MergePolicy::UnionDedup,
            Duration::from_secs(3),
        )
        .await;
    assert_eq!(sorted_ids(&result.events), vec!["kept"]);
}

#[tokio::test]
async fn newest_profile_wins_and_is_cached() {
    let pubkey = "b".repeat(64);
    let stale_key = pubkey.clone();
    let fresh_key = pubkey.clone();
    let stale = MockRelay::start(move |_, _| {
        Reply::events(vec![profile("p1", &stale_key, 100, "old")])
    })
    .await;
    let fresh = MockRelay::start(move |_, _| {
        Reply::events(vec![profile("p2", &fresh_key, 200, "new")]).after(Duration::from_millis(40))
    })
    .await;

    let coordinator = coordinator();
    let targets = [stale.url.clone(), fresh.url.clone()];
    let found = coordinator.fetch_profile(&targets, &pubkey).await;
    assert_eq!(found.map(|event| event.id), Some("p2".to_string()));

    let requests_before = stale.requests().len() + fresh.requests().len();
    let again = coordinator.fetch_profile(&targets, &pubkey).await;
    assert_eq!(again.map(|event| event.id), Some("p2".to_string()));
    assert_eq!(
        stale.requests().len() + fresh.requests().len(),
        requests_before
    );
}

#[tokio::test]
async fn timeline_is_newest_first_and_limited() {
    let one = MockRelay::serving(vec![note("a", 10), note("c", 30)]).await;
    let two = MockRelay::serving(vec![note("b", 20), note("c", 30), note("d", 40)]).await;

    let query = TimelineQuery {
        authors: vec!["a".repeat(64)],
        kinds: vec![1],
        limit: Some(3),
        ..TimelineQuery::default()
    };
    let result = coordinator()
        .fetch_timeline([&one.url, &two.url], &query)
        .await;
    let ids: Vec<&str> = result.events.iter().map(|event| event.id.as_str()).collect();
    assert_eq!(ids, vec!["d", "c", "b"]);

    let sent = one.requests();
    assert_eq!(sent[0][0]["kinds"], serde_json::json!([1]));
    assert_eq!(sent[0][0]["limit"], serde_json::json!(3));
}

#[tokio::test]
async fn resolve_entity_uses_relay_hints() {
    let event_id = "e".repeat(64);
    let hinted = MockRelay::serving(vec![note(&event_id, 50)]).await;

    let address = nip19::encode_nevent(&EventPointer {
        id: event_id.clone(),
        relays: vec![hinted.url.clone()],
        author: None,
        kind: Some(1),
    })
    .unwrap();
    let entity = nip19::decode(&address).unwrap();

    let found = coordinator()
        .resolve_entity(&entity, Vec::<String>::new())
        .await;
    assert_eq!(found.map(|event| event.id), Some(event_id));
    assert_eq!(hinted.requests().len(), 1);
}

#[tokio::test]
async fn publish_collects_confirmations() {
    let relay = MockRelay::silent().await;
    let refused = refused_url().await;
    let event = note("published", 1);

    let confirmations = coordinator()
        .publish([relay.url.as_str(), refused.as_str()], &event, Duration::from_secs(2))
        .await;

    assert_eq!(confirmations.len(), 2);
    assert!(confirmations[0].accepted);
    assert_eq!(confirmations[0].event_id, "published");
    assert!(!confirmations[1].accepted);
    assert_eq!(relay.published().len(), 1);
}
