//! Length-prefixed codec for TCP framing
//!
//! All frames are laid out as:
//! ```text
//! [ 4 bytes: length (u32, big-endian) ][ 1 byte: kind ][ N bytes: payload ]
//! ```
//!
//! The length counts the kind byte plus the payload. Payload layouts:
//!
//! | kind          | payload                                                    |
//! |---------------|------------------------------------------------------------|
//! | `Subscribe`   | `u16` max pending, `u32` max message bytes, topic (UTF-8)  |
//! | `Message`     | `u32` header length, header bytes, body bytes              |
//! | `StreamStart` | reply header text (UTF-8)                                  |
//! | `StreamChunk` | raw output bytes                                           |
//! | `StreamEnd`   | empty                                                      |
//!
//! A `Message` with a zero header length carries no header.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::InboundMessage;

/// Maximum frame size (64 KiB) to prevent memory exhaustion
pub const MAX_FRAME_SIZE: u32 = 64 * 1024;

const LENGTH_PREFIX: usize = 4;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("Invalid frame length prefix: {0}")]
    InvalidLength(u32),

    #[error("Unknown frame kind: {0:#04x}")]
    UnknownKind(u8),

    #[error("Malformed {kind:?} frame: {reason}")]
    Malformed { kind: FrameKind, reason: &'static str },

    #[error("Frame text is not valid UTF-8")]
    InvalidText(#[from] std::str::Utf8Error),
}

/// Frame discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Subscribe = 0x01,
    Message = 0x02,
    StreamStart = 0x03,
    StreamChunk = 0x04,
    StreamEnd = 0x05,
}

impl TryFrom<u8> for FrameKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameKind::Subscribe),
            0x02 => Ok(FrameKind::Message),
            0x03 => Ok(FrameKind::StreamStart),
            0x04 => Ok(FrameKind::StreamChunk),
            0x05 => Ok(FrameKind::StreamEnd),
            other => Err(CodecError::UnknownKind(other)),
        }
    }
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Register interest in a topic
    Subscribe {
        topic: String,
        max_pending: u16,
        max_message_bytes: u32,
    },
    /// A cloud-to-device message
    Message(InboundMessage),
    /// Start of a device-to-cloud reply
    StreamStart { headers: String },
    /// A piece of reply payload
    StreamChunk(Bytes),
    /// End of the current reply
    StreamEnd,
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Subscribe { .. } => FrameKind::Subscribe,
            Frame::Message(_) => FrameKind::Message,
            Frame::StreamStart { .. } => FrameKind::StreamStart,
            Frame::StreamChunk(_) => FrameKind::StreamChunk,
            Frame::StreamEnd => FrameKind::StreamEnd,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Frame::Subscribe { topic, .. } => 2 + 4 + topic.len(),
            Frame::Message(msg) => 4 + msg.header_len() + msg.body.len(),
            Frame::StreamStart { headers } => headers.len(),
            Frame::StreamChunk(data) => data.len(),
            Frame::StreamEnd => 0,
        }
    }
}

/// Encode a frame into a length-prefixed byte buffer
pub fn encode(frame: &Frame) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame directly into a provided buffer
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), CodecError> {
    let frame_len = 1 + frame.payload_len();

    if frame_len > MAX_FRAME_SIZE as usize {
        return Err(CodecError::FrameTooLarge(frame_len));
    }

    buf.reserve(LENGTH_PREFIX + frame_len);
    buf.put_u32(frame_len as u32);
    buf.put_u8(frame.kind() as u8);

    match frame {
        Frame::Subscribe {
            topic,
            max_pending,
            max_message_bytes,
        } => {
            buf.put_u16(*max_pending);
            buf.put_u32(*max_message_bytes);
            buf.put_slice(topic.as_bytes());
        }
        Frame::Message(msg) => {
            buf.put_u32(msg.header_len() as u32);
            if let Some(header) = &msg.header {
                buf.put_slice(header);
            }
            buf.put_slice(&msg.body);
        }
        Frame::StreamStart { headers } => buf.put_slice(headers.as_bytes()),
        Frame::StreamChunk(data) => buf.put_slice(data),
        Frame::StreamEnd => {}
    }

    Ok(())
}

/// Try to decode a length-prefixed frame from a buffer
///
/// Returns:
/// - `Ok(Some(frame))` if a complete frame was decoded
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the data is invalid
pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
    if buf.len() < LENGTH_PREFIX {
        return Ok(None);
    }

    // Peek at the length prefix without consuming
    let frame_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);

    if frame_len == 0 || frame_len > MAX_FRAME_SIZE {
        return Err(CodecError::InvalidLength(frame_len));
    }

    let total_len = LENGTH_PREFIX + frame_len as usize;
    if buf.len() < total_len {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX);
    let mut frame = buf.split_to(frame_len as usize).freeze();
    let kind = FrameKind::try_from(frame.get_u8())?;

    decode_payload(kind, frame).map(Some)
}

fn decode_payload(kind: FrameKind, mut payload: Bytes) -> Result<Frame, CodecError> {
    match kind {
        FrameKind::Subscribe => {
            if payload.len() < 6 {
                return Err(CodecError::Malformed {
                    kind,
                    reason: "missing limits",
                });
            }
            let max_pending = payload.get_u16();
            let max_message_bytes = payload.get_u32();
            let topic = std::str::from_utf8(&payload)?.to_string();
            Ok(Frame::Subscribe {
                topic,
                max_pending,
                max_message_bytes,
            })
        }
        FrameKind::Message => {
            if payload.len() < 4 {
                return Err(CodecError::Malformed {
                    kind,
                    reason: "missing header length",
                });
            }
            let header_len = payload.get_u32() as usize;
            if header_len > payload.len() {
                return Err(CodecError::Malformed {
                    kind,
                    reason: "header length exceeds frame",
                });
            }
            let header = (header_len > 0).then(|| payload.split_to(header_len));
            Ok(Frame::Message(InboundMessage {
                header,
                body: payload,
            }))
        }
        FrameKind::StreamStart => Ok(Frame::StreamStart {
            headers: std::str::from_utf8(&payload)?.to_string(),
        }),
        FrameKind::StreamChunk => Ok(Frame::StreamChunk(payload)),
        FrameKind::StreamEnd => Ok(Frame::StreamEnd),
    }
}

/// Decoder state machine for streaming decoding
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Partial frame data being accumulated
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete frames
    pub fn decode_next(&mut self) -> Result<Option<Frame>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Encoder for building frames
#[derive(Debug, Default)]
pub struct FrameEncoder {
    /// Output buffer
    buffer: BytesMut,
}

impl FrameEncoder {
    /// Create a new frame encoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Encode a frame and add to the output buffer
    pub fn encode(&mut self, frame: &Frame) -> Result<(), CodecError> {
        encode_into(frame, &mut self.buffer)
    }

    /// Take the encoded bytes, leaving an empty buffer
    pub fn take(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    /// Check if the encoder has any pending data
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_message() -> Frame {
        Frame::Message(InboundMessage::new(
            Some(Bytes::from_static(b"messageId:abc123")),
            "echo hello",
        ))
    }

    #[test]
    fn test_message_frame_layout() {
        let encoded = encode(&create_test_message()).expect("encode failed");

        // Verify length prefix covers kind byte and payload
        let len_prefix = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(len_prefix as usize, encoded.len() - 4);
        assert_eq!(encoded[4], FrameKind::Message as u8);

        let mut buf = BytesMut::from(&encoded[..]);
        let decoded = decode(&mut buf).expect("decode failed").expect("no frame");
        match decoded {
            Frame::Message(msg) => {
                assert_eq!(msg.header.as_deref(), Some(&b"messageId:abc123"[..]));
                assert_eq!(&msg.body[..], b"echo hello");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
        assert!(buf.is_empty(), "buffer should be empty after decode");
    }

    #[test]
    fn test_message_without_header() {
        let frame = Frame::Message(InboundMessage::new(None, "date"));
        let mut buf = BytesMut::from(&encode(&frame).expect("encode failed")[..]);
        let decoded = decode(&mut buf).expect("decode failed").expect("no frame");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_partial_decode() {
        let encoded = encode(&create_test_message()).expect("encode failed");

        let mut buf = BytesMut::from(&encoded[..5]);
        let result = decode(&mut buf).expect("decode should not fail on partial data");
        assert!(result.is_none(), "should return None for partial data");

        // Buffer should be unchanged (data not consumed)
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_frame_decoder_reply_sequence() {
        let mut encoder = FrameEncoder::new();
        encoder
            .encode(&Frame::StreamStart {
                headers: "source:exec\nmessagetype:cmdresp".into(),
            })
            .unwrap();
        encoder
            .encode(&Frame::StreamChunk(Bytes::from_static(b"hello\n")))
            .unwrap();
        encoder.encode(&Frame::StreamEnd).unwrap();
        let encoded = encoder.take();
        assert!(encoder.is_empty());

        let mut decoder = FrameDecoder::new();

        // Feed data in chunks
        decoder.extend(&encoded[..7]);
        assert!(decoder.decode_next().expect("decode error").is_none());

        decoder.extend(&encoded[7..]);
        assert!(matches!(
            decoder.decode_next().unwrap(),
            Some(Frame::StreamStart { .. })
        ));
        assert_eq!(
            decoder.decode_next().unwrap(),
            Some(Frame::StreamChunk(Bytes::from_static(b"hello\n")))
        );
        assert_eq!(decoder.decode_next().unwrap(), Some(Frame::StreamEnd));
        assert!(decoder.decode_next().unwrap().is_none());
        assert_eq!(decoder.buffer_len(), 0);
    }

    #[test]
    fn test_subscribe_frame() {
        let frame = Frame::Subscribe {
            topic: "exec".into(),
            max_pending: 10,
            max_message_bytes: 4096,
        };
        let mut buf = BytesMut::from(&encode(&frame).unwrap()[..]);
        assert_eq!(decode(&mut buf).unwrap(), Some(frame));
    }

    #[test]
    fn test_frame_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_FRAME_SIZE + 1);
        buf.put_bytes(0, 100);

        let result = decode(&mut buf);
        assert!(matches!(result, Err(CodecError::InvalidLength(_))));

        let chunk = Frame::StreamChunk(Bytes::from(vec![0u8; MAX_FRAME_SIZE as usize]));
        assert!(matches!(encode(&chunk), Err(CodecError::FrameTooLarge(_))));
    }

    #[test]
    fn test_unknown_kind() {
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_u8(0x7f);
        assert!(matches!(decode(&mut buf), Err(CodecError::UnknownKind(0x7f))));
    }

    #[test]
    fn test_malformed_message_header_length() {
        let mut buf = BytesMut::new();
        buf.put_u32(1 + 4 + 2);
        buf.put_u8(FrameKind::Message as u8);
        buf.put_u32(50);
        buf.put_slice(b"ls");
        assert!(matches!(decode(&mut buf), Err(CodecError::Malformed { .. })));
    }
}
