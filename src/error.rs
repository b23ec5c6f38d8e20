//! Error types.
//!
//! `Error` is what public operations return. Decoding problems are grouped
//! under `CodecError` so callers can tell a malformed update apart from a
//! misuse of the store.

use thiserror::Error;

use crate::crdt::id::{Clock, Id};

// =============================================================================
// Errors
// =============================================================================

/// Errors surfaced by document and update operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The binary input was malformed. Nothing was applied.
    #[error("malformed update: {0}")]
    Codec(#[from] CodecError),

    /// A struct was appended whose clock does not continue its client's
    /// history. This is a caller bug, not a network condition.
    #[error("struct {id} appended out of order, expected clock {expected}")]
    OutOfOrder { id: Id, expected: Clock },

    /// No known struct covers this id.
    #[error("no struct covers {0}")]
    NotFound(Id),

    /// A positional edit addressed an index past the end of its container.
    #[error("index {index} out of bounds for length {len}")]
    OutOfBounds { index: u32, len: u32 },

    /// An insert carried a payload of length zero.
    #[error("cannot insert empty content")]
    EmptyContent,
}

// =============================================================================
// Decoding errors
// =============================================================================

/// Reasons a byte stream could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("variable-length integer does not fit in {0} bits")]
    VarIntOverflow(u32),

    #[error("unknown struct tag {0}")]
    UnknownTag(u8),

    #[error("unknown content tag {0}")]
    UnknownContent(u8),

    #[error("unknown type reference {0}")]
    UnknownTypeRef(u8),

    #[error("string is not valid utf-8")]
    InvalidUtf8,

    #[error("invalid json value: {0}")]
    InvalidJson(String),

    #[error("struct at {0} has zero length")]
    ZeroLength(Id),

    #[error("clock range starting at {0} overflows")]
    ClockOverflow(Id),

    #[error("struct at {found} does not continue clock {expected}")]
    NonContiguous { found: Id, expected: Clock },

    #[error("struct at {id} declares length {declared} but its content has length {actual}")]
    LengthMismatch { id: Id, declared: u32, actual: u32 },

    #[error("key reference {0} is not in the key table")]
    UnknownKey(u64),

    #[error("relative id reaches before clock 0")]
    InvalidIdDelta,

    #[error("{0} bytes left over after the end of the input")]
    TrailingBytes(usize),
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        return CodecError::InvalidJson(err.to_string());
    }
}

/// Result type for document and update operations.
pub type Result<T> = std::result::Result<T, Error>;
