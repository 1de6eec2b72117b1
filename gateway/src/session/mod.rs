//! Session handling for the connected exec device
//!
//! This module handles:
//! - Decoding frames from the device connection
//! - Sending command messages to the device
//! - Reassembling streamed replies

mod connection;
mod reply;

pub use connection::{DeviceSession, SessionHandle};
pub use reply::{CompletedReply, ReplyAssembler};
