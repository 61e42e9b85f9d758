//! HTTP routes of the broker.
//!
//! Handlers log under a per-request span carrying a `request_id`, the handler
//! name and the topic.

use std::convert::Infallible;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use bytes::Bytes;
use futures::future;
use futures_util::{SinkExt, Stream, TryStreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tokio_util::sync::{CancellationToken, DropGuard, PollSender};
use tracing::{Instrument, Span, debug, error, field, info, info_span};
use uuid::Uuid;

use crate::broker::Broker;
use crate::config::ServerSettings;
use crate::transport::error::{ApiError, CodecError, ServerError, api_bad_request, api_internal};
use crate::transport::message::{CommandCodec, Frame};
use crate::transport::protocol::serve_consumer;

/// Frames a subscription may queue ahead of the connection.
const FRAME_BUFFER: usize = 16;

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub max_payload_bytes: usize,
    /// Cancelled on server shutdown; every subscription waits on a child.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(broker: Arc<Broker>, settings: &ServerSettings, shutdown: CancellationToken) -> Self {
        Self {
            broker,
            max_payload_bytes: settings.max_payload_bytes,
            shutdown,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/publish/:topic", post(publish))
        .route("/publish", post(publish))
        .route("/publish/", post(publish))
        .route("/subscribe/:topic", post(subscribe))
        .route("/subscribe", post(subscribe))
        .route("/subscribe/", post(subscribe))
        .with_state(state)
}

/// Serve the router on `addr` until `state.shutdown` is cancelled.
pub async fn start_http_server(addr: &str, state: AppState) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on http://{}", listener.local_addr()?);

    let shutdown = state.shutdown.clone();
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

fn topic_from(path: Option<Path<String>>) -> Result<String, ApiError> {
    match path {
        Some(Path(topic)) if !topic.is_empty() => Ok(topic),
        _ => {
            debug!("invalid topic in path");
            Err(api_bad_request(ServerError::InvalidTopic))
        }
    }
}

async fn publish(
    State(state): State<AppState>,
    topic: Option<Path<String>>,
    body: Body,
) -> Result<StatusCode, ApiError> {
    let span = info_span!(
        "request",
        request_id = %Uuid::new_v4(),
        handler = "publish",
        topic = field::Empty
    );

    async move {
        let topic = topic_from(topic)?;
        Span::current().record("topic", topic.as_str());
        info!("publishing to topic");

        let payload = axum::body::to_bytes(body, state.max_payload_bytes)
            .await
            .map_err(|e| {
                error!(error = %e, "failed reading request body");
                api_internal(ServerError::ReadBody)
            })?;

        state.broker.publish(&topic, &payload).map_err(|e| {
            error!(error = %e, "failed to publish to broker");
            api_internal(ServerError::Publish)
        })?;

        debug!(bytes = payload.len(), "successfully published to topic");
        Ok::<_, ApiError>(StatusCode::CREATED)
    }
    .instrument(span)
    .await
}

async fn subscribe(
    State(state): State<AppState>,
    topic: Option<Path<String>>,
    body: Body,
) -> Result<Response, ApiError> {
    let span = info_span!(
        "request",
        request_id = %Uuid::new_v4(),
        handler = "subscribe",
        topic = field::Empty
    );

    let topic = span.in_scope(|| topic_from(topic))?;
    span.record("topic", topic.as_str());
    span.in_scope(|| info!("subscribing to topic"));

    let consumer = state.broker.subscribe(&topic);
    let cancel = state.shutdown.child_token();

    let reader = StreamReader::new(
        body.into_data_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::ConnectionAborted, e)),
    );
    let commands = FramedRead::new(reader, CommandCodec);

    let (tx, rx) = mpsc::channel::<Bytes>(FRAME_BUFFER);
    let frames = PollSender::new(tx)
        .sink_map_err(|_| CodecError::Closed)
        .with(|frame: Frame| future::ready(frame.into_bytes()));

    tokio::spawn(serve_consumer(consumer, commands, frames, cancel.clone()).instrument(span));

    let body = Body::from_stream(ResponseFrames {
        frames: rx,
        _cancel_on_drop: cancel.drop_guard(),
    });
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// Response body of a subscription: one chunk per frame.
///
/// Dropping it (the client went away) cancels the subscription, which
/// unblocks a consumer waiting for a message.
struct ResponseFrames {
    frames: mpsc::Receiver<Bytes>,
    _cancel_on_drop: DropGuard,
}

impl Stream for ResponseFrames {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().frames.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}
