//! Wire format for the bootstrap handshake.
//!
//! The target sends exactly one JSON object terminated by `\n`. The initiator
//! answers with the ASCII line `TRANSFER_COMPLETE`. Agent metadata is opaque
//! binary, so it travels base64-encoded inside the JSON.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Acknowledgment sent by the initiator once its side is done.
pub const COMPLETION_TOKEN: &str = "TRANSFER_COMPLETE";

/// Every frame on the bootstrap socket ends with this byte.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Metadata the target hands to the initiator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeMessage {
    /// Base64 of the target agent's metadata blob.
    pub agent_metadata: String,
    /// Size in bytes of the target's registered buffer.
    pub buffer_size: u64,
    /// Stringified memory descriptor. Never parsed by the initiator.
    pub mem_desc: String,
}

impl HandshakeMessage {
    /// Build a message from raw agent metadata.
    pub fn new(metadata: &[u8], buffer_size: u64, mem_desc: impl Into<String>) -> Self {
        Self {
            agent_metadata: encode_metadata(metadata),
            buffer_size,
            mem_desc: mem_desc.into(),
        }
    }

    /// Decode the embedded agent metadata back to bytes.
    pub fn metadata_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        decode_metadata(&self.agent_metadata)
    }
}

/// Base64-encode an agent metadata blob.
pub fn encode_metadata(metadata: &[u8]) -> String {
    STANDARD.encode(metadata)
}

/// Decode a base64 agent metadata blob.
pub fn decode_metadata(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(encoded)
}

/// Encode a handshake message as one JSON line.
pub fn encode_frame(msg: &HandshakeMessage) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(msg)?;
    bytes.push(FRAME_DELIMITER);
    Ok(bytes)
}

/// Parse a handshake line. A trailing `\n` or `\r\n` is ignored.
pub fn decode_frame(line: &[u8]) -> Result<HandshakeMessage, serde_json::Error> {
    serde_json::from_slice(trim_delimiter(line))
}

/// The acknowledgment line, delimiter included.
pub fn completion_frame() -> Vec<u8> {
    let mut bytes = COMPLETION_TOKEN.as_bytes().to_vec();
    bytes.push(FRAME_DELIMITER);
    bytes
}

/// Whether a received line is the completion token.
pub fn is_completion(line: &[u8]) -> bool {
    trim_delimiter(line) == COMPLETION_TOKEN.as_bytes()
}

fn trim_delimiter(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(&[FRAME_DELIMITER]).unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
