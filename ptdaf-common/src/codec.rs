//! Wire codec for envelopes
//!
//! JSON via serde_json. The broker encodes every message on send and decodes
//! on receive, so nothing is ever shared in memory between the dispatcher and
//! the workers.

use crate::messages::Envelope;
use crate::Result;

/// Encode an envelope for transport
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Decode an envelope received from a queue
///
/// Malformed payloads surface as `Error::Codec`, which callers log and discard.
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    Ok(serde_json::from_slice(bytes)?)
}
