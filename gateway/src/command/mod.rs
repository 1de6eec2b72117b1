//! Request tracking for the gateway
//!
//! This module handles:
//! - Assigning message ids to outgoing commands
//! - Matching replies to requests by correlation id
//! - Reporting requests that never got a reply

mod pending;
mod timeout;

pub use pending::{PendingRequest, PendingRequests};
pub use timeout::TimeoutTracker;
