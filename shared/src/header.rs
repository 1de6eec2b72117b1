//! Message header codec
//!
//! Headers travel as newline-separated `key:value` lines:
//! ```text
//! source:exec
//! messagetype:cmdresp
//! correlationId:abc123
//! ```
//!
//! Inbound headers are parsed into an ordered list of properties so fields are
//! read through a typed accessor instead of substring scanning. Outbound reply
//! headers are composed by [`ResponseHeaders`].

use std::fmt;
use thiserror::Error;
use tracing::warn;

use crate::limits;

/// Name of the inbound property carrying the request identifier
pub const MESSAGE_ID: &str = "messageId";

/// Name of the outbound property echoing the request identifier
pub const CORRELATION_ID: &str = "correlationId";

/// Fixed reply header lines
pub const REPLY_SOURCE: &str = "source:exec";
pub const REPLY_MESSAGE_TYPE: &str = "messagetype:cmdresp";

/// Errors that can occur while extracting a header property
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Header property not found: {0}")]
    PropertyNotFound(String),

    #[error("Header property {name} too long: {len} bytes (capacity: {capacity})")]
    PropertyTooLong {
        name: String,
        len: usize,
        capacity: usize,
    },
}

/// A single `key:value` entry borrowed from a header blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderProperty<'a> {
    pub key: &'a str,
    pub value: &'a str,
}

/// Ordered view of the properties in a header blob
#[derive(Debug, Clone, Default)]
pub struct HeaderBlock<'a> {
    properties: Vec<HeaderProperty<'a>>,
}

impl<'a> HeaderBlock<'a> {
    /// Parse a raw header blob
    ///
    /// Lines without a `:` separator, empty lines and lines that are not valid
    /// UTF-8 are skipped. A trailing `\r` is ignored.
    pub fn parse(raw: &'a [u8]) -> Self {
        let properties = raw
            .split(|b| *b == b'\n')
            .filter_map(|line| {
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                let line = std::str::from_utf8(line).ok()?;
                let (key, value) = line.split_once(':')?;
                let key = key.trim();
                if key.is_empty() {
                    return None;
                }
                Some(HeaderProperty {
                    key,
                    value: value.trim(),
                })
            })
            .collect();

        Self { properties }
    }

    /// Get the value of the first property with the given name
    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.properties
            .iter()
            .find(|p| p.key == name)
            .map(|p| p.value)
    }

    /// Iterate properties in wire order
    pub fn iter(&self) -> impl Iterator<Item = &HeaderProperty<'a>> {
        self.properties.iter()
    }
}

/// Extract a named property from a header blob
///
/// `capacity` is the size of the caller's destination including room for a
/// terminator, so a value is accepted only when it is strictly shorter than
/// `capacity`. Longer values fail with [`HeaderError::PropertyTooLong`] rather
/// than being truncated.
pub fn get_property<'a>(
    header: &'a [u8],
    name: &str,
    capacity: usize,
) -> Result<&'a str, HeaderError> {
    let value = HeaderBlock::parse(header)
        .get(name)
        .ok_or_else(|| HeaderError::PropertyNotFound(name.to_string()))?;

    if value.len() >= capacity {
        return Err(HeaderError::PropertyTooLong {
            name: name.to_string(),
            len: value.len(),
            capacity,
        });
    }

    Ok(value)
}

/// Identifier copied from a request's `messageId` to its reply
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Derive a correlation id from an inbound header
    ///
    /// Returns `None` when the header carries no usable `messageId`.
    pub fn from_header(header: &[u8]) -> Option<Self> {
        match get_property(header, MESSAGE_ID, limits::CORRELATION_ID_CAPACITY) {
            // An empty messageId gets no correlationId line, not an empty one
            Ok("") => None,
            Ok(value) => Some(Self(value.to_string())),
            Err(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of composing reply headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderBuild {
    /// Headers composed as requested
    Complete(String),
    /// Correlation id dropped because the headers did not fit the scratch space
    Degraded(String),
}

impl HeaderBuild {
    pub fn into_inner(self) -> String {
        match self {
            HeaderBuild::Complete(h) | HeaderBuild::Degraded(h) => h,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, HeaderBuild::Degraded(_))
    }
}

/// Builder for `cmdresp` reply headers
pub struct ResponseHeaders;

impl ResponseHeaders {
    /// Headers sent on every reply
    pub fn base() -> String {
        format!("{REPLY_SOURCE}\n{REPLY_MESSAGE_TYPE}")
    }

    /// Compose reply headers, adding the correlation id when present
    pub fn build(correlation: Option<&str>) -> String {
        Self::build_with_capacity(correlation, limits::HEADER_SCRATCH_CAPACITY).into_inner()
    }

    /// Compose reply headers within a bounded scratch capacity
    ///
    /// Falls back to the base headers when the correlated form would not fit.
    pub fn build_with_capacity(correlation: Option<&str>, capacity: usize) -> HeaderBuild {
        let base = Self::base();
        let Some(id) = correlation else {
            return HeaderBuild::Complete(base);
        };

        let headers = format!("{base}\n{CORRELATION_ID}:{id}");
        if headers.len() < capacity {
            HeaderBuild::Complete(headers)
        } else {
            warn!(
                len = headers.len(),
                capacity, "Reply headers exceed scratch space, sending without correlation id"
            );
            HeaderBuild::Degraded(base)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_preserves_order() {
        let block = HeaderBlock::parse(b"source:cloud\nmessageId:42\r\nnoise\n\nuser: alice ");
        let keys: Vec<_> = block.iter().map(|p| p.key).collect();
        assert_eq!(keys, vec!["source", "messageId", "user"]);
        assert_eq!(block.get("messageId"), Some("42"));
        assert_eq!(block.get("user"), Some("alice"));
        assert_eq!(block.get("missing"), None);
    }

    #[test]
    fn test_first_match_wins() {
        let block = HeaderBlock::parse(b"messageId:first\nmessageId:second");
        assert_eq!(block.get("messageId"), Some("first"));
    }

    #[test]
    fn test_value_may_contain_colons() {
        let block = HeaderBlock::parse(b"messageId:urn:uuid:1234");
        assert_eq!(block.get("messageId"), Some("urn:uuid:1234"));
    }

    #[test]
    fn test_invalid_utf8_line_skipped() {
        let block = HeaderBlock::parse(b"bad:\xff\xfe\nmessageId:ok");
        assert_eq!(block.iter().count(), 1);
        assert_eq!(block.get("messageId"), Some("ok"));
    }

    #[test]
    fn test_get_property_not_found() {
        let result = get_property(b"source:cloud", MESSAGE_ID, 64);
        assert_eq!(result, Err(HeaderError::PropertyNotFound("messageId".into())));
    }

    #[test]
    fn test_get_property_too_long() {
        let header = format!("messageId:{}", "x".repeat(64));
        let result = get_property(header.as_bytes(), MESSAGE_ID, 64);
        assert!(matches!(
            result,
            Err(HeaderError::PropertyTooLong { len: 64, capacity: 64, .. })
        ));

        let header = format!("messageId:{}", "x".repeat(63));
        assert_eq!(get_property(header.as_bytes(), MESSAGE_ID, 64).unwrap().len(), 63);
    }

    #[test]
    fn test_correlation_id_from_header() {
        let id = CorrelationId::from_header(b"messageId:abc123").expect("should have id");
        assert_eq!(id.as_str(), "abc123");

        assert!(CorrelationId::from_header(b"source:cloud").is_none());
        assert!(CorrelationId::from_header(b"messageId:").is_none());

        let long = format!("messageId:{}", "a".repeat(64));
        assert!(CorrelationId::from_header(long.as_bytes()).is_none());
    }

    #[test]
    fn test_empty_message_id_reply_has_no_correlation_line() {
        let id = CorrelationId::from_header(b"messageId:\nsource:cloud");
        let headers = ResponseHeaders::build(id.as_ref().map(CorrelationId::as_str));
        assert_eq!(headers, "source:exec\nmessagetype:cmdresp");
        assert_eq!(HeaderBlock::parse(headers.as_bytes()).get(CORRELATION_ID), None);
    }

    #[test]
    fn test_response_headers_without_correlation() {
        assert_eq!(ResponseHeaders::build(None), "source:exec\nmessagetype:cmdresp");
    }

    #[test]
    fn test_response_headers_with_correlation() {
        let headers = ResponseHeaders::build(Some("abc123"));
        assert_eq!(headers, "source:exec\nmessagetype:cmdresp\ncorrelationId:abc123");

        let block = HeaderBlock::parse(headers.as_bytes());
        assert_eq!(block.iter().count(), 3);
        assert_eq!(block.get(CORRELATION_ID), Some("abc123"));
    }

    #[test]
    fn test_response_headers_degrade_when_scratch_too_small() {
        let result = ResponseHeaders::build_with_capacity(Some("abc123"), 40);
        assert!(result.is_degraded());
        assert_eq!(result.into_inner(), "source:exec\nmessagetype:cmdresp");

        let result = ResponseHeaders::build_with_capacity(Some("abc123"), 64);
        assert!(!result.is_degraded());
    }
}
