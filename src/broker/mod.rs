pub mod consumer;
pub mod engine;
pub mod message;
pub mod topic;

pub use consumer::Consumer;
pub use engine::Broker;
pub use message::{Event, Payload};
