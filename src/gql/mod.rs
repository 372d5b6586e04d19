//! Single chokepoint for all server communication, spec.md §4.2.

pub mod client;
pub mod ops;
pub mod retry;

pub use client::Client;
pub use retry::RetryError;
