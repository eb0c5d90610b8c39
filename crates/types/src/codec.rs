//! Centralized serialization for persisted records.
//!
//! Every record the engine writes goes through this module, so the on-disk
//! encoding is decided in exactly one place. Uses postcard: compact, no
//! self-description, deterministic for the ordered maps we store.

use serde::{de::DeserializeOwned, Serialize};
use snafu::Snafu;

/// Error type for codec operations.
#[derive(Debug, Snafu)]
pub enum CodecError {
    /// Encoding failed.
    #[snafu(display("encoding failed: {source}"))]
    Encode {
        /// The underlying postcard error.
        source: postcard::Error,
    },

    /// Decoding failed. The engine treats this as data corruption.
    #[snafu(display("decoding failed: {source}"))]
    Decode {
        /// The underlying postcard error.
        source: postcard::Error,
    },
}

/// Encodes a record to a fresh byte vector.
///
/// # Errors
///
/// Returns `CodecError::Encode` if serialization fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(value).map_err(|source| CodecError::Encode { source })
}

/// Encodes a record into a caller-supplied scratch buffer, returning the
/// written prefix.
///
/// Lets hot save paths reuse one buffer across a whole batch of updates
/// instead of allocating per record.
///
/// # Errors
///
/// Returns `CodecError::Encode` if serialization fails, including when the
/// buffer is too small for the encoded record.
pub fn encode_into<'a, T: Serialize>(
    value: &T,
    buf: &'a mut [u8],
) -> Result<&'a [u8], CodecError> {
    let used = postcard::to_slice(value, buf).map_err(|source| CodecError::Encode { source })?;
    Ok(used)
}

/// Decodes a record from bytes.
///
/// # Errors
///
/// Returns `CodecError::Decode` if the bytes do not describe a valid record.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    postcard::from_bytes(bytes).map_err(|source| CodecError::Decode { source })
}
