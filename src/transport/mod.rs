//! The `transport` module carries the broker over HTTP.
//!
//! `POST /publish/:topic` stores a payload. `POST /subscribe/:topic` opens a
//! long-lived exchange: the request body is a stream of JSON command strings
//! (`"INIT"`, `"ACK"`, `"NACK"`) and the response body a stream of JSON
//! frames, one per command, each handed to the connection as soon as it is
//! written.

pub mod error;
pub mod http;
pub mod message;
pub mod protocol;

pub use http::{AppState, build_router, start_http_server};
