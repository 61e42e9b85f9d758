//! # workq
//!
//! `workq` is a topic-based work-queue broker served over streaming HTTP.
//! Producers publish opaque payloads to named topics; consumers subscribe and
//! receive one message at a time, acknowledging (ACK) or rejecting (NACK)
//! each before the next is handed out. Every message goes to one consumer,
//! competing-consumer style, and survives consumer disconnects
//! (at-least-once delivery).
//!
//! ## Core Modules
//!
//! - `broker`: topic registry, wake-up of waiting consumers, the `Consumer`
//!   state machine.
//! - `persistence`: the durable per-topic queue (`Store`) and its sled backend.
//! - `transport`: HTTP routes and the subscription command protocol.
//! - `config`: settings loaded from defaults, files and the environment.
//! - `utils`: shared error types and logging setup.

pub mod broker;
pub mod config;
pub mod persistence;
pub mod transport;
pub mod utils;
