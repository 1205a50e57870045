//! Store-and-forward message envelope.
//!
//! One envelope, one codec, two transports: the same CRLF header block
//! plus length-prefixed body is written to a peer socket and to the
//! on-disk retry queue, so a single parser handles both paths.
//!
//! ```text
//! From: 1\r\n
//! To: 3\r\n
//! Metadata: {"verb":"PUT","path":"<user>/docs/a.txt","user":"<uuid>"}\r\n
//! Type: object.write\r\n
//! Success: false\r\n
//! ContentLength: 11\r\n
//! \r\n
//! <11 raw bytes>
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::topology::NodeId;

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("missing header terminator (blank line)")]
    MissingTerminator,
    #[error("malformed header line: {0}")]
    MalformedHeader(String),
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),
    #[error("invalid value for header {header}: {value}")]
    InvalidHeader { header: &'static str, value: String },
    #[error("body truncated: expected {expected} bytes, have {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("metadata is not valid JSON: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Descriptor of the request a message carries, serialized as JSON in
/// the `Metadata` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMeta {
    pub verb: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Uuid>,
}

/// The wire/disk envelope for inter-node store-and-forward delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub from: NodeId,
    pub to: NodeId,
    pub meta: MessageMeta,
    /// Message type/subject, e.g. `object.write`.
    pub subject: String,
    /// Set on responses only; requests carry `false`.
    pub success: bool,
    pub body: Bytes,
}

const CRLF: &str = "\r\n";

impl Message {
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        let metadata = serde_json::to_string(&self.meta)?;
        let mut out = Vec::with_capacity(128 + self.body.len());
        out.extend_from_slice(format!("From: {}{CRLF}", self.from).as_bytes());
        out.extend_from_slice(format!("To: {}{CRLF}", self.to).as_bytes());
        out.extend_from_slice(format!("Metadata: {metadata}{CRLF}").as_bytes());
        out.extend_from_slice(format!("Type: {}{CRLF}", self.subject).as_bytes());
        out.extend_from_slice(format!("Success: {}{CRLF}", self.success).as_bytes());
        out.extend_from_slice(format!("ContentLength: {}{CRLF}", self.body.len()).as_bytes());
        out.extend_from_slice(CRLF.as_bytes());
        out.extend_from_slice(&self.body);
        Ok(out)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, MessageError> {
        let terminator = find_terminator(raw).ok_or(MessageError::MissingTerminator)?;
        let header_block =
            std::str::from_utf8(&raw[..terminator]).map_err(|_| MessageError::MissingTerminator)?;

        let mut from = None;
        let mut to = None;
        let mut metadata = None;
        let mut subject = None;
        let mut success = false;
        let mut content_length = None;

        for line in header_block.split(CRLF).filter(|l| !l.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| MessageError::MalformedHeader(line.to_string()))?;
            let value = value.trim();
            match name {
                "From" => from = Some(parse_header::<NodeId>("From", value)?),
                "To" => to = Some(parse_header::<NodeId>("To", value)?),
                "Metadata" => metadata = Some(serde_json::from_str::<MessageMeta>(value)?),
                "Type" => subject = Some(value.to_string()),
                "Success" => success = parse_header::<bool>("Success", value)?,
                "ContentLength" => {
                    content_length = Some(parse_header::<usize>("ContentLength", value)?)
                }
                // unknown headers are skipped for forward compatibility
                _ => {}
            }
        }

        let expected = content_length.ok_or(MessageError::MissingHeader("ContentLength"))?;
        let body_start = terminator + CRLF.len() * 2;
        let available = raw.len() - body_start;
        if available < expected {
            return Err(MessageError::Truncated {
                expected,
                actual: available,
            });
        }
        let body = Bytes::copy_from_slice(&raw[body_start..body_start + expected]);

        Ok(Self {
            from: from.ok_or(MessageError::MissingHeader("From"))?,
            to: to.ok_or(MessageError::MissingHeader("To"))?,
            meta: metadata.ok_or(MessageError::MissingHeader("Metadata"))?,
            subject: subject.ok_or(MessageError::MissingHeader("Type"))?,
            success,
            body,
        })
    }
}

/// Offset of the blank line separating headers from the body.
fn find_terminator(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_header<T: std::str::FromStr>(
    header: &'static str,
    value: &str,
) -> Result<T, MessageError> {
    value.parse().map_err(|_| MessageError::InvalidHeader {
        header,
        value: value.to_string(),
    })
}
