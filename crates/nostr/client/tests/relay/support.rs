//! In-process relay for integration tests.

use futures_util::{SinkExt, StreamExt};
use nostr::Event;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// What the relay sends back for one `REQ`.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub delay: Duration,
    /// Text frames sent verbatim before the events; `{token}` is replaced
    /// with the subscription id.
    pub raw: Vec<String>,
    pub events: Vec<Event>,
    pub end: ReplyEnd,
}

#[derive(Debug, Clone, Default)]
pub enum ReplyEnd {
    #[default]
    EndOfStored,
    Closed(String),
    /// Send nothing after the events and keep the socket open.
    Silent,
    /// Drop the connection after the events.
    Hangup,
}

impl Reply {
    pub fn events(events: Vec<Event>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    pub fn silent() -> Self {
        Self {
            end: ReplyEnd::Silent,
            ..Self::default()
        }
    }

    pub fn raw_first(mut self, frames: &[&str]) -> Self {
        self.raw = frames.iter().map(ToString::to_string).collect();
        self
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn then(mut self, end: ReplyEnd) -> Self {
        self.end = end;
        self
    }
}

type Handler = Arc<dyn Fn(usize, &[Value]) -> Reply + Send + Sync>;

#[derive(Default)]
struct Journal {
    connections: usize,
    requests: Vec<Vec<Value>>,
    closes: Vec<String>,
    published: Vec<Event>,
}

pub struct MockRelay {
    pub url: String,
    journal: Arc<Mutex<Journal>>,
    server: JoinHandle<()>,
}

impl MockRelay {
    /// Start a relay whose reply to the n-th `REQ` (0-based) is `handler(n, filters)`.
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(usize, &[Value]) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let journal = Arc::new(Mutex::new(Journal::default()));
        let handler: Handler = Arc::new(handler);

        let server_journal = Arc::clone(&journal);
        let server = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let journal = Arc::clone(&server_journal);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let Ok(ws) = accept_async(stream).await else {
                        return;
                    };
                    journal.lock().unwrap().connections += 1;
                    serve(ws, journal, handler).await;
                });
            }
        });

        Self {
            url,
            journal,
            server,
        }
    }

    /// Reply to every `REQ` with `events` then `EOSE`.
    pub async fn serving(events: Vec<Event>) -> Self {
        Self::start(move |_, _| Reply::events(events.clone())).await
    }

    /// Accept connections but never answer.
    pub async fn silent() -> Self {
        Self::start(|_, _| Reply::silent()).await
    }

    /// Serve `events` honouring `until`, `since` and `limit`, newest first.
    pub async fn honoring(events: Vec<Event>) -> Self {
        Self::start(move |_, filters| Reply::events(select(&events, filters))).await
    }

    pub fn connections(&self) -> usize {
        self.journal.lock().unwrap().connections
    }

    pub fn requests(&self) -> Vec<Vec<Value>> {
        self.journal.lock().unwrap().requests.clone()
    }

    pub fn closes(&self) -> Vec<String> {
        self.journal.lock().unwrap().closes.clone()
    }

    pub fn published(&self) -> Vec<Event> {
        self.journal.lock().unwrap().published.clone()
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn serve(
    mut ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    journal: Arc<Mutex<Journal>>,
    handler: Handler,
) {
    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(Value::Array(frame)) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        match frame.first().and_then(Value::as_str) {
            Some("REQ") => {
                let token = frame[1].as_str().unwrap_or_default().to_string();
                let filters = frame[2..].to_vec();
                let index = {
                    let mut journal = journal.lock().unwrap();
                    journal.requests.push(filters.clone());
                    journal.requests.len() - 1
                };
                let reply = handler(index, &filters);
                if !reply.delay.is_zero() {
                    tokio::time::sleep(reply.delay).await;
                }
                for frame in &reply.raw {
                    let frame = frame.replace("{token}", &token);
                    if ws.send(Message::Text(frame)).await.is_err() {
                        return;
                    }
                }
                for event in reply.events {
                    let frame = json!(["EVENT", token, event]).to_string();
                    if ws.send(Message::Text(frame)).await.is_err() {
                        return;
                    }
                }
                let end = match reply.end {
                    ReplyEnd::EndOfStored => json!(["EOSE", token]),
                    ReplyEnd::Closed(reason) => json!(["CLOSED", token, reason]),
                    ReplyEnd::Silent => continue,
                    ReplyEnd::Hangup => return,
                };
                if ws.send(Message::Text(end.to_string())).await.is_err() {
                    return;
                }
            }
            Some("CLOSE") => {
                let token = frame[1].as_str().unwrap_or_default().to_string();
                journal.lock().unwrap().closes.push(token);
            }
            Some("EVENT") => {
                let Ok(event) = serde_json::from_value::<Event>(frame[1].clone()) else {
                    continue;
                };
                let ok = json!(["OK", event.id, true, ""]).to_string();
                journal.lock().unwrap().published.push(event);
                if ws.send(Message::Text(ok)).await.is_err() {
                    return;
                }
            }
            _ => {}
        }
    }
}

fn select(events: &[Event], filters: &[Value]) -> Vec<Event> {
    let filter = filters.first().cloned().unwrap_or_default();
    let until = filter.get("until").and_then(Value::as_u64).unwrap_or(u64::MAX);
    let since = filter.get("since").and_then(Value::as_u64).unwrap_or(0);
    let limit = filter
        .get("limit")
        .and_then(Value::as_u64)
        .map_or(usize::MAX, |limit| limit as usize);

    let mut matching: Vec<Event> = events
        .iter()
        .filter(|event| event.created_at <= until && event.created_at >= since)
        .cloned()
        .collect();
    matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    matching.truncate(limit);
    matching
}

pub fn note(id: &str, created_at: u64) -> Event {
    Event {
        id: id.to_string(),
        pubkey: "a".repeat(64),
        created_at,
        kind: 1,
        tags: vec![],
        content: format!("note {id}"),
        sig: "f".repeat(128),
    }
}

pub fn profile(id: &str, pubkey: &str, created_at: u64, name: &str) -> Event {
    Event {
        id: id.to_string(),
        pubkey: pubkey.to_string(),
        created_at,
        kind: 0,
        tags: vec![],
        content: json!({ "name": name }).to_string(),
        sig: "f".repeat(128),
    }
}

/// A `ws://` URL nothing is listening on.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);
    url
}
