//! Export blob codec
//!
//! The key store reveals public key material and finalized signatures in one
//! binary layout:
//!
//! ```text
//! +----------------+----------------------+---------------------------+
//! | u32 LE: N      | N bytes UTF-8 JSON   | remaining bytes: signature |
//! +----------------+----------------------+---------------------------+
//! ```
//!
//! Both segments are capped at [`MAX_SEGMENT_LEN`]. The declared length is
//! validated against the cap and the buffer before anything is copied, so a
//! hostile prefix never drives an allocation.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::errors::{ErrorCode, KeygateError};

/// Size of the little-endian length prefix
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Upper bound for the JSON segment and the signature segment (1 MiB)
pub const MAX_SEGMENT_LEN: usize = 1024 * 1024;

/// Export blob decoding failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExportBlobError {
    #[error("declared json length {declared} exceeds {} bytes", MAX_SEGMENT_LEN)]
    Oversize { declared: u32 },

    #[error("buffer holds {available} bytes, need {needed}")]
    Truncated { needed: usize, available: usize },

    #[error("json segment is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("signature segment of {len} bytes exceeds {} bytes", MAX_SEGMENT_LEN)]
    SignatureOversize { len: usize },

    #[error("json segment is malformed: {0}")]
    MalformedJson(String),
}

impl From<ExportBlobError> for KeygateError {
    fn from(err: ExportBlobError) -> Self {
        let code = match err {
            ExportBlobError::Oversize { .. } | ExportBlobError::SignatureOversize { .. } => {
                ErrorCode::ExportBlobOversize
            }
            ExportBlobError::Truncated { .. } => ErrorCode::ExportBlobTruncated,
            ExportBlobError::InvalidUtf8(_) | ExportBlobError::MalformedJson(_) => {
                ErrorCode::ExportBlobMalformed
            }
        };
        KeygateError::new(code, err.to_string())
    }
}

/// A decoded export blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedKeyBlob {
    /// Declared JSON length
    pub length_prefix: u32,
    /// JSON segment
    pub json: String,
    /// Raw signature segment (may be empty)
    pub signature: Vec<u8>,
}

impl ExportedKeyBlob {
    /// Signature segment in standard base64, as handed to uploaders
    pub fn signature_base64(&self) -> String {
        BASE64.encode(&self.signature)
    }

    /// Whether the blob carries a signature at all
    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }
}

/// Decode an export blob.
pub fn decode(buf: &[u8]) -> Result<ExportedKeyBlob, ExportBlobError> {
    let Some(prefix) = buf.get(..LENGTH_PREFIX_LEN) else {
        return Err(ExportBlobError::Truncated {
            needed: LENGTH_PREFIX_LEN,
            available: buf.len(),
        });
    };
    let mut len_bytes = [0u8; LENGTH_PREFIX_LEN];
    len_bytes.copy_from_slice(prefix);
    let declared = u32::from_le_bytes(len_bytes);

    let json_len = declared as usize;
    if json_len > MAX_SEGMENT_LEN {
        return Err(ExportBlobError::Oversize { declared });
    }

    let json_end = LENGTH_PREFIX_LEN + json_len;
    if buf.len() < json_end {
        return Err(ExportBlobError::Truncated {
            needed: json_end,
            available: buf.len(),
        });
    }

    let json = std::str::from_utf8(&buf[LENGTH_PREFIX_LEN..json_end])
        .map_err(|e| ExportBlobError::InvalidUtf8(e.to_string()))?;

    let signature = &buf[json_end..];
    if signature.len() > MAX_SEGMENT_LEN {
        return Err(ExportBlobError::SignatureOversize {
            len: signature.len(),
        });
    }

    Ok(ExportedKeyBlob {
        length_prefix: declared,
        json: json.to_owned(),
        signature: signature.to_vec(),
    })
}
