//! JSON wire codec for envelopes

use serde::Deserialize;
use thiserror::Error;

use super::{Envelope, Metadata};

/// Envelope codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode envelope: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Serialize an envelope to its wire form
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(envelope).map_err(CodecError::Encode)
}

/// Parse an envelope from its wire form
///
/// Fails when the bytes are not a JSON document or `metadata` is absent.
/// Missing payload fields are tolerated.
pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    serde_json::from_slice(bytes).map_err(CodecError::Decode)
}

/// Parse only the metadata sub-document, skipping the payload
pub fn decode_metadata(bytes: &[u8]) -> Result<Metadata, CodecError> {
    #[derive(Deserialize)]
    struct MetadataOnly {
        metadata: Metadata,
    }

    serde_json::from_slice::<MetadataOnly>(bytes)
        .map(|doc| doc.metadata)
        .map_err(CodecError::Decode)
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        decode(bytes)
    }
}
