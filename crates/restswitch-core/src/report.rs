//! # Report Builder
//!
//! Wraps a received delta into the report document echoed back to the
//! shadow service:
//!
//! ```text
//! {"state":{"reported":<delta bytes, verbatim>},"clientToken":"<token>"}
//! ```
//!
//! The delta is embedded as received, never re-serialized. It is not
//! validated here either; the echo fires even when register translation of
//! the same bytes fails.
//!
//! Documents are written into a caller-owned fixed buffer. One byte is
//! reserved for a terminating NUL so the buffer can be handed to C-side
//! transports unchanged.

use crate::error::{CodecError, CodecResult};

const PREFIX: &[u8] = br#"{"state":{"reported":"#;
const MIDDLE: &[u8] = br#"},"clientToken":""#;
const SUFFIX: &[u8] = br#""}"#;

// =============================================================================
// Client Tokens
// =============================================================================

/// Generates `<thing>-<seq>` correlation tokens, one per report.
#[derive(Debug, Clone)]
pub struct ClientTokenSequence {
    prefix: String,
    next: u32,
}

impl ClientTokenSequence {
    pub fn new(thing_name: &str) -> Self {
        ClientTokenSequence {
            prefix: thing_name.to_string(),
            next: 0,
        }
    }

    pub fn next_token(&mut self) -> String {
        let token = format!("{}-{}", self.prefix, self.next);
        self.next = self.next.wrapping_add(1);
        token
    }
}

// =============================================================================
// Builder
// =============================================================================

/// A report written into a destination buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltReport {
    /// Document length, excluding the terminator.
    pub len: usize,
    pub client_token: String,
}

#[derive(Debug, Clone)]
pub struct ReportBuilder {
    tokens: ClientTokenSequence,
}

impl ReportBuilder {
    pub fn new(thing_name: &str) -> Self {
        ReportBuilder {
            tokens: ClientTokenSequence::new(thing_name),
        }
    }

    /// Formats a report for `delta` into `dest` with a fresh client token.
    ///
    /// Fails with [`CodecError::BufferTooSmall`] before touching `dest` if
    /// the document and its terminator do not fit.
    pub fn build(&mut self, delta: &[u8], dest: &mut [u8]) -> CodecResult<BuiltReport> {
        let client_token = self.tokens.next_token();
        let len = render(delta, &client_token, dest)?;
        Ok(BuiltReport { len, client_token })
    }
}

/// Writes the report document into `dest`, returning its length.
pub fn render(delta: &[u8], client_token: &str, dest: &mut [u8]) -> CodecResult<usize> {
    let parts: [&[u8]; 5] = [PREFIX, delta, MIDDLE, client_token.as_bytes(), SUFFIX];
    let len: usize = parts.iter().map(|p| p.len()).sum();

    if len + 1 > dest.len() {
        return Err(CodecError::BufferTooSmall {
            needed: len + 1,
            capacity: dest.len(),
        });
    }

    let mut at = 0;
    for part in parts {
        dest[at..at + part.len()].copy_from_slice(part);
        at += part.len();
    }
    dest[len] = 0;

    Ok(len)
}
