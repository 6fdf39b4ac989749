//! # Error Types
//!
//! Codec errors for scanning, decoding and report building.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Codec Errors                                    │
//! │                                                                         │
//! │  Scanner        MalformedJson, ParseOverflow                            │
//! │  Shape          InvalidTopLevel, OddKeyValueCount, UnexpectedToken      │
//! │  Keys/values    BadKeyOrValueLength, InvalidBitIndex, InvalidPulseKey   │
//! │  Reports        BufferTooSmall                                          │
//! │                                                                         │
//! │  All of these are local: the offending message is dropped and the       │
//! │  sync loop keeps polling.                                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::token::TokenKind;

/// Result type alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Failures raised while scanning or decoding a payload, or building a report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Input is not well-formed JSON.
    #[error("Malformed JSON at byte {offset}")]
    MalformedJson { offset: usize },

    /// More tokens are needed than the token table holds.
    #[error("Token table overflow (capacity {capacity})")]
    ParseOverflow { capacity: usize },

    /// The first token is not an object or an array.
    #[error("Top-level JSON element must be an array or an object")]
    InvalidTopLevel,

    /// The container's child count does not match the tokens that follow it.
    #[error("Container reports {children} children but {tokens} tokens were scanned")]
    OddKeyValueCount { children: usize, tokens: usize },

    /// A token has a kind other than the one its position requires.
    #[error("Expected a {expected} token, found {found}")]
    UnexpectedToken { expected: TokenKind, found: TokenKind },

    /// Keys must be exactly two characters and values exactly one.
    #[error("Key must be 2 chars and value 1 char (got key {key_len}, value {value_len})")]
    BadKeyOrValueLength { key_len: usize, value_len: usize },

    /// The bit selector is not an ASCII digit in `0..=7`.
    #[error("Bit index '{0}' is outside 0-7")]
    InvalidBitIndex(char),

    /// A pulse element does not start with `p`.
    #[error("Pulse key must start with 'p', found '{0}'")]
    InvalidPulseKey(char),

    /// The formatted report plus its terminator does not fit the destination.
    #[error("Report needs {needed} bytes but buffer holds {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },
}

impl CodecError {
    /// Returns true if the payload itself was rejected (as opposed to a
    /// local resource limit such as the token table or report buffer).
    pub fn is_payload_error(&self) -> bool {
        !matches!(
            self,
            CodecError::ParseOverflow { .. } | CodecError::BufferTooSmall { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CodecError::BadKeyOrValueLength {
            key_len: 3,
            value_len: 1,
        };
        assert!(err.to_string().contains("key 3"));

        let err = CodecError::UnexpectedToken {
            expected: TokenKind::String,
            found: TokenKind::Primitive,
        };
        assert_eq!(err.to_string(), "Expected a string token, found primitive");
    }

    #[test]
    fn test_payload_error_classification() {
        assert!(CodecError::InvalidTopLevel.is_payload_error());
        assert!(CodecError::MalformedJson { offset: 3 }.is_payload_error());
        assert!(!CodecError::ParseOverflow { capacity: 9 }.is_payload_error());
        assert!(!CodecError::BufferTooSmall {
            needed: 40,
            capacity: 8
        }
        .is_payload_error());
    }
}
