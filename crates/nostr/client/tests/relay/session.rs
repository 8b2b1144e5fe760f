use crate::support::{MockRelay, Reply, note};
use nostr_client::{Filter, RelayConfig, RelaySession, SessionEnd, SubscriptionFrame, fetch};
use std::time::{Duration, Instant};

#[tokio::test]
async fn malformed_frames_are_skipped_without_ending_the_session() {
    let stray = serde_json::to_string(&note("stray", 1)).unwrap();
    let unknown_token = format!(r#"["EVENT","not-ours",{stray}]"#);
    let relay = MockRelay::start(move |_, _| {
        Reply::events(vec![note("a", 5)]).raw_first(&[
            "this is not json",
            r#"{"EVENT":"an object, not an array"}"#,
            r#"["EVENT","{token}",{"id":1,"kind":"text"}]"#,
            r#"["EVENT","{token}"]"#,
            r#"["WHATEVER","{token}"]"#,
            unknown_token.as_str(),
        ])
    })
    .await;

    let mut seen = Vec::new();
    let outcome = fetch(
        &relay.url,
        vec![Filter::new().kinds([1])],
        &RelayConfig::default(),
        tokio::time::Instant::now() + Duration::from_secs(3),
        |event| seen.push(event.id),
    )
    .await;

    assert_eq!(seen, vec!["a"]);
    assert_eq!(outcome.delivered, 1);
    assert_eq!(outcome.end, SessionEnd::EndOfStored);
}

#[tokio::test]
async fn close_is_sent_once_and_ends_the_frame_stream() {
    let relay = MockRelay::serving(vec![note("a", 5)]).await;
    let mut session =
        RelaySession::open(&relay.url, vec![Filter::new()], RelayConfig::default())
            .await
            .unwrap();
    let token = session.subscription_id().as_str().to_string();

    assert!(matches!(
        session.next_frame().await,
        Some(SubscriptionFrame::Event(event)) if event.id == "a"
    ));
    assert!(matches!(
        session.next_frame().await,
        Some(SubscriptionFrame::EndOfStored)
    ));

    session.close().await;
    session.close().await;
    assert!(session.next_frame().await.is_none());

    let deadline = Instant::now() + Duration::from_secs(2);
    while relay.closes().is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(relay.closes(), vec![token]);
}
