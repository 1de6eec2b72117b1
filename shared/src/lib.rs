//! iotexec Shared Protocol Types
//!
//! This crate provides the message types, header codec and frame codec shared
//! between the exec service running on the device and the gateway it talks to.

pub mod codec;
pub mod header;
pub mod state_machine;

use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

pub use header::{CorrelationId, HeaderBlock, HeaderError, HeaderProperty, ResponseHeaders};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Message size and queue limits for the exec service
pub mod limits {
    /// Maximum combined header + body length of a command message
    pub const MAX_MESSAGE_LENGTH: usize = 4096;

    /// Maximum number of command messages the transport may hold pending
    pub const MAX_PENDING_MESSAGES: usize = 10;

    /// Capacity of the correlation id destination, terminator included
    pub const CORRELATION_ID_CAPACITY: usize = 64;

    /// Scratch capacity used when composing reply headers
    pub const HEADER_SCRATCH_CAPACITY: usize = 8192;

    /// Default read window used when relaying command output
    pub const READ_WINDOW: usize = 4096;
}

/// A cloud-to-device message as delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub header: Option<Bytes>,
    pub body: Bytes,
}

impl InboundMessage {
    /// Create a new inbound message
    pub fn new(header: Option<Bytes>, body: impl Into<Bytes>) -> Self {
        Self {
            header,
            body: body.into(),
        }
    }

    /// Length of the header, zero when absent
    pub fn header_len(&self) -> usize {
        self.header.as_ref().map_or(0, |h| h.len())
    }

    /// Combined header and body length, as checked against the message limit
    pub fn total_len(&self) -> usize {
        self.header_len() + self.body.len()
    }

    /// Check the message against a maximum length (exclusive bound)
    pub fn fits_within(&self, max_length: usize) -> bool {
        self.total_len() < max_length
    }
}
