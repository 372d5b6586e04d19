//! Real-time event fabric: one state machine per connection (§4.3),
//! pooled and rebalanced across ≤50-topic clients (§4.4).

pub mod client;
pub mod pool;
pub mod protocol;

pub use client::{ClientState, Notification, WsClient};
pub use pool::Pool;
