//! Errors of the HTTP surface.
//!
//! [`ServerError`] holds the messages clients see, either as a JSON body or
//! as an error frame on a subscription. [`CodecError`] covers reading
//! commands and writing frames.

use std::io;

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ServerError {
    #[error("invalid topic value")]
    InvalidTopic,
    #[error("error reading the request body")]
    ReadBody,
    #[error("error publishing to broker")]
    Publish,
    #[error("error getting next value for consumer")]
    NextValue,
    #[error("error ACKing message")]
    Ack,
    #[error("error NACKing message")]
    Nack,
    #[error("error decoding command")]
    DecodingCommand,
    #[error("unrecognised command received")]
    UnrecognisedCommand,
}

#[derive(Debug, Error)]
pub enum CodecError {
    /// The request body failed underneath us; the peer is gone.
    #[error("transport read failed: {0}")]
    Io(#[from] io::Error),
    #[error("malformed command: {0}")]
    Json(#[from] serde_json::Error),
    #[error("request body ended inside a command")]
    Truncated,
    #[error("command longer than {0} bytes")]
    TooLong(usize),
    #[error("response stream closed")]
    Closed,
}

impl CodecError {
    /// Whether the error means the client went away rather than sent
    /// something we cannot read.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, CodecError::Io(_) | CodecError::Closed)
    }
}

/// JSON error object, `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl From<ServerError> for ErrorBody {
    fn from(err: ServerError) -> Self {
        Self {
            error: err.to_string(),
        }
    }
}

/// Status code plus JSON error body, returned by handlers before any
/// streaming starts.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub fn api_bad_request(err: ServerError) -> ApiError {
    ApiError {
        status: StatusCode::BAD_REQUEST,
        body: err.into(),
    }
}

pub fn api_internal(err: ServerError) -> ApiError {
    ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: err.into(),
    }
}
