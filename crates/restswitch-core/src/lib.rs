//! # restswitch-core: Shadow Payload Codecs
//!
//! This crate holds the pure translation logic between shadow documents and
//! the relay board's registers. It performs no I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        REST Switch Data Flow                            │
//! │                                                                         │
//! │  transport ──► token scanner ──┬──► delta decoder ──► RegisterMask x2   │
//! │                                └──► pulse decoder ──► PulseRequest      │
//! │                                                                         │
//! │  raw delta bytes ──► report builder ──► {"state":{"reported":...}}      │
//! │                                                                         │
//! │  NO I/O • NO NETWORK • NO HARDWARE • PURE FUNCTIONS                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`token`] - Bounded, non-allocating JSON token scanner
//! - [`delta`] - `{"o1":1,"i0":0}` style delta decoding
//! - [`pulse`] - `{"p1","p3"}` style pulse decoding
//! - [`report`] - Echo report documents and client tokens
//! - [`register`] - Register masks, pulse requests, register ids
//! - [`error`] - Codec error taxonomy
//!
//! ## Example Usage
//!
//! ```rust
//! use restswitch_core::{DeltaDecoder, RegisterMask};
//!
//! let mut decoder = DeltaDecoder::new();
//! let delta = decoder.decode(br#"{"o1":1,"o2":1,"o3":1}"#).unwrap();
//!
//! assert_eq!(delta.outputs, RegisterMask::new(0b0000_1110, 0b0000_1110));
//! assert!(delta.inputs.is_empty());
//! ```

pub mod delta;
pub mod error;
pub mod pulse;
pub mod register;
pub mod report;
pub mod token;

pub use delta::{DeltaDecoder, RegisterGroup, ShadowDelta};
pub use error::{CodecError, CodecResult};
pub use pulse::PulseDecoder;
pub use register::{PulseRequest, RegisterId, RegisterMask, REGISTER_BITS};
pub use report::{BuiltReport, ClientTokenSequence, ReportBuilder};
pub use token::{Token, TokenKind, TokenTable};

/// Parses the bit-selector character of a two-character key (`'0'..='7'`).
pub(crate) fn bit_index(c: u8) -> CodecResult<u8> {
    match c {
        b'0'..=b'7' => Ok(c - b'0'),
        other => Err(CodecError::InvalidBitIndex(other as char)),
    }
}
