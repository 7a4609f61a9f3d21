//! Error taxonomy for the format codecs.
//!
//! Signature mismatches and header-size mismatches are format errors;
//! reading past the end of a buffer is a distinct read error. Unknown
//! record types are not errors at all; the decoders skip them.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Wrong magic bytes for the named format region.
    #[error("not a valid {0} file: bad signature")]
    BadSignature(&'static str),

    /// A read ran past the end of the input buffer.
    #[error("truncated input: wanted {wanted} bytes at offset {offset:#x}")]
    Truncated { offset: usize, wanted: usize },

    /// The PE optional header size was not the PE32 value (0xE0).
    #[error("unexpected optional header size {0:#x}, expected 0xe0")]
    OptionalHeaderSize(u16),
}

pub type Result<T> = std::result::Result<T, Error>;
