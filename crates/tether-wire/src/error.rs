//! Wire-level error types.

use thiserror::Error;

/// Errors produced while encoding or decoding wire data.
///
/// Apart from [`WireError::Io`] on the encode side, every variant is a
/// framing violation: the byte stream can no longer be trusted and the
/// connection must be torn down.
#[derive(Error, Debug)]
pub enum WireError {
    /// Underlying reader/writer failure (includes truncated input).
    #[error("wire I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An opcode outside the known set.
    #[error("unknown opcode: {0:#010x}")]
    UnknownOpcode(u32),

    /// A packed value with an unknown type-code word.
    #[error("unknown packed value type code: {0}")]
    UnknownTypeCode(u32),

    /// A remote-object value with an unknown object tag.
    #[error("unknown remote object tag: {0:#010x}")]
    UnknownObjectTag(u32),

    /// A tensor descriptor with a negative dimension count.
    #[error("tensor descriptor has negative ndim: {0}")]
    NegativeNdim(i32),

    /// A declared length that does not match the bytes that followed.
    #[error("truncated {what}: expected {expected} bytes, got {got}")]
    Truncated {
        what: &'static str,
        expected: u64,
        got: u64,
    },

    /// String payload was not valid UTF-8.
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A packed value of the wrong kind was supplied where another was
    /// required.
    #[error("packed value type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },
}

/// Result type for wire operations.
pub type WireResult<T> = Result<T, WireError>;
