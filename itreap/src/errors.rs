use std::io;
use thiserror::Error;

/// Error type for itreap operations.
#[derive(Error, Debug)]
pub enum TreapError {
    /// An interval was constructed with its end before its start.
    #[error("Invalid interval range: end {end} is before start {start}")]
    RangeOrder { start: i64, end: i64 },

    /// An encoded tree was written with a different format version.
    #[error("Interval tree encoding version mismatch: expected {expected}, found {found}")]
    EncodingMismatch { expected: u8, found: u8 },

    /// Stream does not start with the interval tree magic number.
    #[error("Stream doesn't appear to be an encoded interval tree")]
    InvalidMagic,

    /// Encoded tree is structurally invalid.
    #[error("Corrupted interval tree encoding: {0}")]
    CorruptEncoding(String),

    /// Decoding would overwrite the tree of a key that is already indexed.
    #[error("An interval tree for key {0} already exists in the index")]
    KeyOccupied(String),

    /// Payload could not be serialized or deserialized.
    #[error("Payload serialization error: {0}")]
    Payload(#[from] bincode::Error),

    /// IO error occurred while encoding or decoding.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for itreap operations.
pub type Result<T> = std::result::Result<T, TreapError>;
