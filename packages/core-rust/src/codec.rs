//! Binary document file format.
//!
//! A document file is the 4-byte magic [`MAGIC`] followed by the `MsgPack`
//! encoding of [`DocumentContent`] with named fields (`rmp_serde::to_vec_named`),
//! so files stay readable when fields are added.

use crate::types::{DocumentContent, RIGHT_ANGLES};

/// Leading bytes of every document file.
pub const MAGIC: &[u8; 4] = b"DPD1";

/// Conventional file extension for encoded documents.
pub const FILE_EXTENSION: &str = "dpdoc";

/// Errors from encoding or decoding a document file.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("not a document file (bad magic bytes)")]
    BadMagic,
    #[error("failed to encode document: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode document: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("page {page} has unsupported rotation {rotation}")]
    InvalidRotation { page: usize, rotation: u16 },
}

/// Encodes content into the on-disk format.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode(content: &DocumentContent) -> Result<Vec<u8>, CodecError> {
    let body = rmp_serde::to_vec_named(content)?;
    let mut bytes = Vec::with_capacity(MAGIC.len() + body.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

/// Decodes a document file.
///
/// # Errors
///
/// Returns [`CodecError::BadMagic`] if the header is missing,
/// [`CodecError::Decode`] if the body is malformed, or
/// [`CodecError::InvalidRotation`] if a page is not at a right angle.
pub fn decode(bytes: &[u8]) -> Result<DocumentContent, CodecError> {
    let body = bytes.strip_prefix(MAGIC.as_slice()).ok_or(CodecError::BadMagic)?;
    let content: DocumentContent = rmp_serde::from_slice(body)?;
    if let Some((page, p)) = content
        .pages
        .iter()
        .enumerate()
        .find(|(_, p)| !RIGHT_ANGLES.contains(&p.rotation))
    {
        return Err(CodecError::InvalidRotation {
            page,
            rotation: p.rotation,
        });
    }
    Ok(content)
}

/// BLAKE3 digest (hex) of the encoded content.
///
/// Two documents with equal content always have equal fingerprints, which
/// makes this usable for determinism checks across runs.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn fingerprint(content: &DocumentContent) -> Result<String, CodecError> {
    let bytes = encode(content)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}
