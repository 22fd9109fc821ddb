//! Export blob construction
//!
//! The engine only ever decodes blobs; the encoder exists for mocks and
//! tests that need to fabricate key-store output.

use keygate_core::export_blob::LENGTH_PREFIX_LEN;

/// Build `u32 LE length || json || signature`
pub fn encode_export_blob(json: &str, signature: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LENGTH_PREFIX_LEN + json.len() + signature.len());
    out.extend_from_slice(&(json.len() as u32).to_le_bytes());
    out.extend_from_slice(json.as_bytes());
    out.extend_from_slice(signature);
    out
}
