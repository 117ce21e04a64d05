//! Core identifiers, the value payload, and the crate error type.

use std::fmt;

use thiserror::Error;

/// Lookup key. Keys compare as plain unsigned integers.
pub type Key = u64;

/// Number of bytes in a stored value.
pub const VALUE_LEN: usize = 16;

/// Fixed-width opaque value payload.
///
/// Values are copied in and out whole; the tree never interprets the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value(pub [u8; VALUE_LEN]);

impl Value {
    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; VALUE_LEN] {
        &self.0
    }
}

impl From<[u8; VALUE_LEN]> for Value {
    fn from(bytes: [u8; VALUE_LEN]) -> Self {
        Value(bytes)
    }
}

/// Byte position of a page record in the backing file.
///
/// Offset zero holds the file header, so no page ever lives there; zero is
/// the on-disk encoding of "no page" and decodes to `Option::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageOffset(pub u64);

impl fmt::Display for PageOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors surfaced by the tree and its page store.
#[derive(Error, Debug)]
pub enum BrambleError {
    /// Underlying file I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The backing file holds bytes that fail validation.
    #[error("corruption detected: {0}")]
    Corruption(&'static str),
    /// The caller passed an argument the API cannot act on.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BrambleError>;
