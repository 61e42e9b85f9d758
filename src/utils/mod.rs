//! The `utils` module collects the pieces shared across `workq`:
//! the broker-level error type and tracing initialisation.

pub mod error;
pub mod logging;

pub use error::BrokerError;
