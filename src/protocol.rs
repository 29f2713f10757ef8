//! Protocol Module
//!
//! Defines the IPC protocol for the CA service: request/response types and the
//! length-prefixed framing. Every message is a little-endian `u32` byte count
//! followed by that many bytes of UTF-8 JSON, tagged by a `"type"` field.

use crate::revocation::RevocationEntry;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Largest accepted message body
pub const MAX_MESSAGE_SIZE: u32 = 1024 * 1024;

/// Request types from external applications
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum Request {
    GetCACertificate,
    IssueCertificate {
        public_key_pem: String,
        email: String,
        name: String,
    },
    VerifyCertificate {
        certificate: String,
    },
    RevokeCertificate {
        serial_number: String,
        #[serde(default)]
        reason: Option<String>,
    },
    ListRevocations,
    SocketTest,
}

/// Response types sent back to clients
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum Response {
    GetCACertificateResponse {
        message: String,
        certificate: String,
    },
    IssueCertificateResponse {
        message: String,
        certificate: String,
        serial_number: String,
        expires_at: DateTime<Utc>,
    },
    VerifyCertificateResponse {
        message: String,
        is_valid: bool,
        is_revoked: bool,
        revoked_at: Option<DateTime<Utc>>,
        reason: Option<String>,
    },
    RevokeCertificateResponse {
        message: String,
        serial_number: String,
        revoked: bool,
    },
    ListRevocationsResponse {
        message: String,
        revocations: Vec<RevocationEntry>,
        count: usize,
    },
    SocketTestResponse {
        message: String,
    },
    Error {
        message: String,
    },
}

fn frame(json: String) -> Result<(u32, Vec<u8>)> {
    let json_bytes = json.as_bytes();
    let length = u32::try_from(json_bytes.len()).context("Message too large to frame")?;
    if length > MAX_MESSAGE_SIZE {
        anyhow::bail!(
            "Message of {} bytes exceeds the {} byte limit",
            length,
            MAX_MESSAGE_SIZE
        );
    }

    let mut buffer = Vec::with_capacity(4 + json_bytes.len());
    buffer.extend_from_slice(&length.to_le_bytes());
    buffer.extend_from_slice(json_bytes);

    Ok((length, buffer))
}

/// Serialize a Request to length-prefixed byte array
///
/// # Returns
/// * `Result<(u32, Vec<u8>)>` - Tuple of (length, bytes) where bytes includes 4-byte length prefix
///
/// # Example
/// ```no_run
/// use secure_mail_ca::protocol::{Request, serialize_request};
///
/// let request = Request::SocketTest;
/// let (size, bytes) = serialize_request(&request)?;
/// // bytes = [4-byte length] + [JSON data]
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn serialize_request(request: &Request) -> Result<(u32, Vec<u8>)> {
    let json = serde_json::to_string(request).context("Failed to serialize request to JSON")?;
    frame(json)
}

/// Deserialize a byte array (without length prefix) to Request
///
/// # Example
/// ```no_run
/// use secure_mail_ca::protocol::deserialize_request;
///
/// let request_bytes = b"{\"type\":\"SocketTest\"}";
/// let request = deserialize_request(request_bytes)?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn deserialize_request(bytes: &[u8]) -> Result<Request> {
    let json_str = std::str::from_utf8(bytes).context("Failed to decode request bytes as UTF-8")?;

    let request: Request =
        serde_json::from_str(json_str).context("Failed to deserialize JSON to Request")?;

    Ok(request)
}

/// Serialize a Response to length-prefixed byte array
pub fn serialize_response(response: &Response) -> Result<(u32, Vec<u8>)> {
    let json = serde_json::to_string(response).context("Failed to serialize response to JSON")?;
    frame(json)
}

/// Deserialize a byte array (without length prefix) to Response
pub fn deserialize_response(bytes: &[u8]) -> Result<Response> {
    let json_str =
        std::str::from_utf8(bytes).context("Failed to decode response bytes as UTF-8")?;

    let response: Response =
        serde_json::from_str(json_str).context("Failed to deserialize JSON to Response")?;

    Ok(response)
}

/// Read one framed message body from `reader`
///
/// The length is checked against [`MAX_MESSAGE_SIZE`] before any body bytes are read.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .context("Failed to read message length")?;
    let length = u32::from_le_bytes(len_buf);
    if length > MAX_MESSAGE_SIZE {
        anyhow::bail!(
            "Message of {} bytes exceeds the {} byte limit",
            length,
            MAX_MESSAGE_SIZE
        );
    }
    let mut buf = vec![0u8; length as usize];
    reader
        .read_exact(&mut buf)
        .context("Failed to read message body")?;
    Ok(buf)
}

/// Write an already framed message and flush
pub fn write_frame<W: Write>(writer: &mut W, framed: &[u8]) -> Result<()> {
    writer
        .write_all(framed)
        .context("Failed to write message")?;
    writer.flush().context("Failed to flush message")?;
    Ok(())
}
