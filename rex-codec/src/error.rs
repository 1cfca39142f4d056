//! Definitions of the errors that can occur while encoding or decoding.
//!
//! Decode errors always carry the byte offset where the problem was
//! detected; there is no partial-result recovery. A failing decode on a
//! given buffer is deterministic and repeatable.

use thiserror::Error;

pub type Result<T, E = DecodeError> = std::result::Result<T, E>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("character outside the digit alphabet at byte {offset}")]
    InvalidDigit { offset: usize },

    #[error("unknown tag {tag:?} at byte {offset}")]
    UnknownTag { tag: char, offset: usize },

    #[error("buffer ends before the value at byte {offset} is complete")]
    TruncatedBuffer { offset: usize },

    #[error("pointer at byte {offset} resolves outside the buffer")]
    NonForwardPointer { offset: usize },

    #[error("pointer target at byte {offset} is itself a pointer")]
    PointerChain { offset: usize },

    #[error("container at byte {offset} expected {expected} children, found {found}")]
    ArityMismatch {
        offset: usize,
        expected: &'static str,
        found: usize,
    },

    #[error("no matching closer for the container opened at byte {offset}")]
    UnterminatedContainer { offset: usize },

    #[error("sorted object index at byte {offset} holds duplicate keys")]
    DuplicateIndexKey { offset: usize },

    #[error("digit run at byte {offset} overflows the integer range")]
    IntegerOverflow { offset: usize },

    #[error("decimal significand at byte {offset} did not decode to an integer")]
    ExpectedInteger { offset: usize },

    #[error("raw string at byte {offset} is not valid utf-8")]
    InvalidUtf8 { offset: usize },

    #[error("trailing bytes after the top-level value at byte {offset}")]
    TrailingBytes { offset: usize },

    #[error("path step {step} matched nothing")]
    KeyNotFound { step: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("bare string {0:?} contains characters outside the digit alphabet")]
    InvalidBareString(String),

    #[error("variable name {0:?} contains characters outside the digit alphabet")]
    InvalidVariable(String),

    #[error("alt/all requires at least one expression")]
    EmptyAlternatives,
}
