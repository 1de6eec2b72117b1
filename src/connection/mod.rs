//! Connection management for the gateway link
//!
//! This module handles:
//! - The persistent TCP connection with automatic reconnection
//! - Replaying the topic subscription after each reconnect
//! - Bounded delivery of inbound command messages

mod manager;

pub use manager::{ConnectionConfig, ConnectionEvent, ConnectionManager, Subscription};
