//! Reassembly of streamed `cmdresp` replies

use bytes::{Bytes, BytesMut};
use iotexec_shared::{codec::Frame, header::CORRELATION_ID, HeaderBlock};
use tracing::warn;

/// A fully received reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedReply {
    pub headers: String,
    pub correlation_id: Option<String>,
    pub payload: Bytes,
}

struct InProgress {
    headers: String,
    payload: BytesMut,
}

/// Collects stream frames into complete replies
#[derive(Default)]
pub struct ReplyAssembler {
    current: Option<InProgress>,
}

impl ReplyAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame, returning a reply when its end marker arrives
    pub fn on_frame(&mut self, frame: Frame) -> Option<CompletedReply> {
        match frame {
            Frame::StreamStart { headers } => {
                if self.current.is_some() {
                    warn!("Reply started before previous reply ended, discarding it");
                }
                self.current = Some(InProgress {
                    headers,
                    payload: BytesMut::new(),
                });
                None
            }
            Frame::StreamChunk(data) => {
                match &mut self.current {
                    Some(reply) => reply.payload.extend_from_slice(&data),
                    None => warn!("Dropping {} bytes outside of a reply", data.len()),
                }
                None
            }
            Frame::StreamEnd => {
                let reply = self.current.take()?;
                let correlation_id = HeaderBlock::parse(reply.headers.as_bytes())
                    .get(CORRELATION_ID)
                    .map(str::to_string);
                Some(CompletedReply {
                    headers: reply.headers,
                    correlation_id,
                    payload: reply.payload.freeze(),
                })
            }
            Frame::Subscribe { .. } | Frame::Message(_) => None,
        }
    }
}
