use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, BodyDataStream};
use axum::http::{Request, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use futures::channel::mpsc::{UnboundedSender, unbounded};
use futures_util::StreamExt;
use serde_json::{Value, json};
use tempfile::{TempDir, tempdir};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use workq::broker::Broker;
use workq::config::Settings;
use workq::persistence::{SledStore, Store, StoreError, StoreResult};
use workq::transport::{AppState, build_router};

struct TestApp {
    router: Router,
    broker: Arc<Broker>,
    shutdown: CancellationToken,
    _dir: Option<TempDir>,
}

fn app_with_store(store: Arc<dyn Store>, dir: Option<TempDir>, max_payload_bytes: usize) -> TestApp {
    let broker = Arc::new(Broker::new(store));
    let shutdown = CancellationToken::new();
    let mut server = Settings::default().server;
    server.max_payload_bytes = max_payload_bytes;
    let state = AppState::new(broker.clone(), &server, shutdown.clone());
    TestApp {
        router: build_router(state),
        broker,
        shutdown,
        _dir: dir,
    }
}

fn test_app() -> TestApp {
    let dir = tempdir().expect("tempdir");
    let store = SledStore::open(dir.path(), false).expect("open store");
    app_with_store(Arc::new(store), Some(dir), 1024)
}

/// Store whose writes always fail.
struct BrokenStore;

impl Store for BrokenStore {
    fn insert(&self, _topic: &str, _payload: &[u8]) -> StoreResult<()> {
        Err(StoreError::Closed)
    }
    fn fetch_next(&self, _topic: &str) -> StoreResult<Option<Bytes>> {
        Ok(None)
    }
    fn commit(&self, topic: &str) -> StoreResult<()> {
        Err(StoreError::NothingClaimed(topic.to_string()))
    }
    fn requeue(&self, topic: &str) -> StoreResult<()> {
        Err(StoreError::NothingClaimed(topic.to_string()))
    }
    fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

async fn publish(app: &TestApp, uri: &str, payload: &[u8]) -> (StatusCode, Bytes) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::from(payload.to_vec()))
        .expect("request");
    let response = app.router.clone().oneshot(request).await.expect("publish");
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, body)
}

/// Client half of an open subscription.
struct Subscription {
    commands: UnboundedSender<Result<Bytes, io::Error>>,
    frames: BodyDataStream,
}

impl Subscription {
    async fn open(app: &TestApp, topic: &str) -> Self {
        let (commands, rx) = unbounded::<Result<Bytes, io::Error>>();
        let request = Request::builder()
            .method("POST")
            .uri(format!("/subscribe/{topic}"))
            .body(Body::from_stream(rx))
            .expect("request");

        let response = app.router.clone().oneshot(request).await.expect("subscribe");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );

        Self {
            commands,
            frames: response.into_body().into_data_stream(),
        }
    }

    fn send_raw(&self, raw: &'static str) {
        self.commands
            .unbounded_send(Ok(Bytes::from_static(raw.as_bytes())))
            .expect("send command");
    }

    fn send(&self, command: &str) {
        let line = format!("{}\n", json!(command));
        self.commands
            .unbounded_send(Ok(Bytes::from(line)))
            .expect("send command");
    }

    async fn frame(&mut self) -> Value {
        let chunk = timeout(Duration::from_secs(2), self.frames.next())
            .await
            .expect("no frame received")
            .expect("response ended")
            .expect("body error");
        serde_json::from_slice(&chunk).expect("frame is json")
    }

    async fn message(&mut self) -> Vec<u8> {
        let frame = self.frame().await;
        let encoded = frame.as_str().unwrap_or_else(|| panic!("expected message, got {frame}"));
        STANDARD.decode(encoded).expect("base64 payload")
    }

    async fn assert_silent(&mut self) {
        let pending = timeout(Duration::from_millis(150), self.frames.next()).await;
        assert!(pending.is_err(), "unexpected frame: {pending:?}");
    }

    async fn assert_ended(&mut self) {
        let end = timeout(Duration::from_secs(2), self.frames.next())
            .await
            .expect("response did not end");
        assert!(end.is_none(), "expected end of stream, got {end:?}");
    }
}

async fn wait_for_consumers(broker: &Broker, topic: &str, expected: usize) {
    timeout(Duration::from_secs(2), async {
        while broker.consumer_count(topic) != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("consumer count never settled");
}

#[tokio::test]
async fn publish_returns_created() {
    let app = test_app();
    let (status, body) = publish(&app, "/publish/orders", b"a").await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body.is_empty());
}

#[tokio::test]
async fn missing_topic_is_bad_request() {
    let app = test_app();

    for uri in ["/publish", "/publish/", "/subscribe", "/subscribe/"] {
        let (status, body) = publish(&app, uri, b"a").await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({ "error": "invalid topic value" }), "{uri}");
    }
}

#[tokio::test]
async fn oversized_publish_is_a_read_error() {
    let app = test_app();
    let payload = vec![b'x'; 4096];

    let (status, body) = publish(&app, "/publish/orders", &payload).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body, json!({ "error": "error reading the request body" }));
}

#[tokio::test]
async fn store_failure_on_publish_is_internal_error() {
    let app = app_with_store(Arc::new(BrokenStore), None, 1024);

    let (status, body) = publish(&app, "/publish/orders", b"a").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body, json!({ "error": "error publishing to broker" }));
}

#[tokio::test]
async fn end_to_end_init_ack_until_cancelled() {
    let app = test_app();
    publish(&app, "/publish/orders", b"a").await;
    publish(&app, "/publish/orders", b"b").await;

    let mut sub = Subscription::open(&app, "orders").await;
    sub.send("INIT");
    assert_eq!(sub.message().await, b"a");

    sub.send("ACK");
    assert_eq!(sub.message().await, b"b");

    // queue drained: the ACK waits for a publish
    sub.send("ACK");
    sub.assert_silent().await;

    app.shutdown.cancel();
    sub.assert_ended().await;
    wait_for_consumers(&app.broker, "orders", 0).await;
}

#[tokio::test]
async fn waiting_subscription_receives_later_publish() {
    let app = test_app();

    let mut sub = Subscription::open(&app, "jobs").await;
    sub.send("INIT");
    sub.assert_silent().await;

    let (status, _) = publish(&app, "/publish/jobs", b"late").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(sub.message().await, b"late");
}

#[tokio::test]
async fn disconnect_implies_nack() {
    let app = test_app();

    let mut first = Subscription::open(&app, "T").await;
    publish(&app, "/publish/T", b"x").await;
    first.send("INIT");
    assert_eq!(first.message().await, b"x");

    // client goes away without ACK/NACK
    first.commands.close_channel();
    first.assert_ended().await;

    let mut second = Subscription::open(&app, "T").await;
    second.send("INIT");
    assert_eq!(second.message().await, b"x");
}

#[tokio::test]
async fn nack_puts_message_back_in_front() {
    let app = test_app();
    for payload in ["m1", "m2", "m3"] {
        publish(&app, "/publish/orders", payload.as_bytes()).await;
    }

    let mut first = Subscription::open(&app, "orders").await;
    let mut second = Subscription::open(&app, "orders").await;

    first.send("INIT");
    assert_eq!(first.message().await, b"m1");

    // m1 is in flight, second has to wait
    second.send("INIT");
    second.assert_silent().await;

    first.send("NACK");
    // whoever asks next gets m1 again, never m2 first
    let mut redelivered = Vec::new();
    tokio::select! {
        payload = first.message() => redelivered.push(payload),
        payload = second.message() => redelivered.push(payload),
    }
    assert_eq!(redelivered, vec![b"m1".to_vec()]);
}

#[tokio::test]
async fn unrecognised_command_keeps_the_stream_open() {
    let app = test_app();
    publish(&app, "/publish/orders", b"a").await;

    let mut sub = Subscription::open(&app, "orders").await;
    sub.send("PING");
    assert_eq!(
        sub.frame().await,
        json!({ "error": "unrecognised command received" })
    );

    sub.send("INIT");
    assert_eq!(sub.message().await, b"a");
}

#[tokio::test]
async fn ack_before_init_is_fatal() {
    let app = test_app();

    let mut sub = Subscription::open(&app, "orders").await;
    sub.send("ACK");
    assert_eq!(sub.frame().await, json!({ "error": "error ACKing message" }));
    sub.assert_ended().await;
}

#[tokio::test]
async fn malformed_command_is_fatal() {
    let app = test_app();

    let mut sub = Subscription::open(&app, "orders").await;
    sub.send_raw("{\"cmd\": \"INIT\"}\n");
    assert_eq!(sub.frame().await, json!({ "error": "error decoding command" }));
    sub.assert_ended().await;
}

#[tokio::test]
async fn commands_split_across_chunks_are_reassembled() {
    let app = test_app();
    publish(&app, "/publish/orders", b"a").await;

    let mut sub = Subscription::open(&app, "orders").await;
    sub.send_raw("\"IN");
    sub.assert_silent().await;
    sub.send_raw("IT\"");
    assert_eq!(sub.message().await, b"a");
}

#[tokio::test]
async fn dropping_the_response_cancels_a_waiting_subscription() {
    let app = test_app();

    let sub = Subscription::open(&app, "idle").await;
    sub.send("INIT");
    wait_for_consumers(&app.broker, "idle", 1).await;

    drop(sub);
    wait_for_consumers(&app.broker, "idle", 0).await;

    // the topic still works for the next subscriber
    publish(&app, "/publish/idle", b"z").await;
    let mut next = Subscription::open(&app, "idle").await;
    next.send("INIT");
    assert_eq!(next.message().await, b"z");
}
