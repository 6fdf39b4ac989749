//! # Delta Decoder
//!
//! Decodes a shadow delta into bitmasks for the input and output banks.
//!
//! ## Payload Grammar
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  {"o1":1,"o3":0,"i0":1}                                                 │
//! │    ││ │                                                                 │
//! │    ││ └── value: exactly 1 char, '0' = off, anything else = on          │
//! │    │└──── bit:   '0'..'7'                                               │
//! │    └───── bank:  'i' = inputs, 'o' = outputs, other = skipped           │
//! │                                                                         │
//! │  Decoded: outputs { value: 0b0000_0010, mask: 0b0000_1010 }             │
//! │           inputs  { value: 0b0000_0001, mask: 0b0000_0001 }             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Unknown bank prefixes are logged and skipped so newer key namespaces do
//! not break older agents. A key repeated within one delta keeps its last
//! value; the cloud side has never been observed to send duplicates.

use tracing::{debug, warn};

use crate::bit_index;
use crate::error::{CodecError, CodecResult};
use crate::register::RegisterMask;
use crate::token::{TokenKind, TokenTable};

/// Bank selected by the first character of a delta key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterGroup {
    Input,
    Output,
}

impl RegisterGroup {
    /// Key prefix character for this bank.
    pub const fn prefix(&self) -> char {
        match self {
            RegisterGroup::Input => 'i',
            RegisterGroup::Output => 'o',
        }
    }

    fn from_prefix(c: u8) -> Option<Self> {
        match c {
            b'i' => Some(RegisterGroup::Input),
            b'o' => Some(RegisterGroup::Output),
            _ => None,
        }
    }
}

/// Both banks' masks decoded from a single delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShadowDelta {
    pub inputs: RegisterMask,
    pub outputs: RegisterMask,
}

impl ShadowDelta {
    pub fn group(&self, group: RegisterGroup) -> &RegisterMask {
        match group {
            RegisterGroup::Input => &self.inputs,
            RegisterGroup::Output => &self.outputs,
        }
    }

    pub fn group_mut(&mut self, group: RegisterGroup) -> &mut RegisterMask {
        match group {
            RegisterGroup::Input => &mut self.inputs,
            RegisterGroup::Output => &mut self.outputs,
        }
    }

    /// Renders the addressed bits back into delta form, inputs first.
    pub fn to_json(&self) -> String {
        let mut out = String::from("{");
        for group in [RegisterGroup::Input, RegisterGroup::Output] {
            for (bit, on) in self.group(group).bits() {
                if out.len() > 1 {
                    out.push(',');
                }
                out.push_str(&format!("\"{}{}\":{}", group.prefix(), bit, u8::from(on)));
            }
        }
        out.push('}');
        out
    }
}

// =============================================================================
// Decoder
// =============================================================================

/// Reusable delta decoder. Holds only a scratch token table, so decoding
/// the same payload twice gives the same result.
#[derive(Debug, Clone)]
pub struct DeltaDecoder {
    table: TokenTable,
}

impl Default for DeltaDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl DeltaDecoder {
    /// Token budget: 8 inputs + 8 outputs as key/value pairs leaves ample room.
    pub const DEFAULT_TOKEN_CAPACITY: usize = 120;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_TOKEN_CAPACITY)
    }

    pub fn with_capacity(tokens: usize) -> Self {
        DeltaDecoder {
            table: TokenTable::with_capacity(tokens),
        }
    }

    /// Decodes a flat `{"xN":v,...}` document.
    ///
    /// ## Checks (in order)
    /// 1. The first token is an object or an array
    /// 2. Remaining tokens are exactly `2 × children` (key/value pairs)
    /// 3. Keys are strings of 2 chars, values primitives of 1 char
    /// 4. Bit selectors are `'0'..'7'` for recognised banks
    ///
    /// On any failure nothing is returned, so callers never see a
    /// half-applied mask.
    pub fn decode(&mut self, json: &[u8]) -> CodecResult<ShadowDelta> {
        let tokens = self.table.scan(json)?;
        let (root, body) = tokens
            .split_first()
            .ok_or(CodecError::MalformedJson { offset: json.len() })?;

        if !root.kind().is_container() {
            return Err(CodecError::InvalidTopLevel);
        }

        debug!(tokens = tokens.len(), "decoding delta");

        if body.len() != root.size() * 2 {
            return Err(CodecError::OddKeyValueCount {
                children: root.size(),
                tokens: tokens.len(),
            });
        }

        let mut delta = ShadowDelta::default();
        for pair in body.chunks_exact(2) {
            let (key, value) = (&pair[0], &pair[1]);
            expect_kind(key.kind(), TokenKind::String)?;
            expect_kind(value.kind(), TokenKind::Primitive)?;

            let key_text = key.text(json);
            let value_text = value.text(json);
            if key_text.len() != 2 || value_text.len() != 1 {
                return Err(CodecError::BadKeyOrValueLength {
                    key_len: key_text.len(),
                    value_len: value_text.len(),
                });
            }

            let Some(group) = RegisterGroup::from_prefix(key_text[0]) else {
                warn!(key = %String::from_utf8_lossy(key_text), "skipping key");
                continue;
            };
            let bit = bit_index(key_text[1])?;
            let on = value_text[0] != b'0';
            debug!(?group, bit, on, "found register bit");

            delta.group_mut(group).set(bit, on);
        }

        Ok(delta)
    }
}

fn expect_kind(found: TokenKind, expected: TokenKind) -> CodecResult<()> {
    if found == expected {
        Ok(())
    } else {
        Err(CodecError::UnexpectedToken { expected, found })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode(json: &str) -> CodecResult<ShadowDelta> {
        DeltaDecoder::new().decode(json.as_bytes())
    }

    #[test]
    fn test_outputs_scenario() {
        let delta = decode(r#"{"o1":1,"o2":1,"o3":1}"#).unwrap();
        assert_eq!(delta.outputs, RegisterMask::new(0b0000_1110, 0b0000_1110));
        assert_eq!(delta.inputs, RegisterMask::EMPTY);
    }

    #[test]
    fn test_inputs_scenario() {
        let delta = decode(r#"{"i0":1}"#).unwrap();
        assert_eq!(delta.inputs, RegisterMask::new(0b0000_0001, 0b0000_0001));
        assert!(delta.outputs.is_empty());
    }

    /// Every (value, mask) one bank can take: each line off, on or absent.
    fn bank_states() -> impl Iterator<Item = RegisterMask> {
        (0..=u8::MAX).flat_map(|mask| {
            let mut next = Some(mask);
            std::iter::from_fn(move || {
                let value = next?;
                next = value.checked_sub(1).map(|v| v & mask);
                Some(RegisterMask::new(value, mask))
            })
        })
    }

    fn members(delta: &ShadowDelta) -> Vec<String> {
        [RegisterGroup::Input, RegisterGroup::Output]
            .into_iter()
            .flat_map(move |group| {
                delta.group(group).bits().map(move |(bit, on)| {
                    format!("\"{}{}\":{}", group.prefix(), bit, u8::from(on))
                })
            })
            .collect()
    }

    #[test]
    fn test_every_bank_state_round_trips() {
        let mut decoder = DeltaDecoder::new();
        let mut states = 0;

        for state in bank_states() {
            let other = RegisterMask::new(!state.value, !state.mask);
            for delta in [
                ShadowDelta {
                    inputs: state,
                    outputs: RegisterMask::EMPTY,
                },
                ShadowDelta {
                    inputs: RegisterMask::EMPTY,
                    outputs: state,
                },
                ShadowDelta {
                    inputs: other,
                    outputs: state,
                },
            ] {
                let json = delta.to_json();
                let first = decoder.decode(json.as_bytes());
                assert_eq!(first, Ok(delta), "{json}");
                assert_eq!(decoder.decode(json.as_bytes()), first, "{json}");
            }
            states += 1;
        }

        assert_eq!(states, 3usize.pow(8));
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let mut decoder = DeltaDecoder::new();

        for state in bank_states() {
            let delta = ShadowDelta {
                inputs: RegisterMask::new(!state.value, !state.mask),
                outputs: state,
            };
            let mut keys = members(&delta);
            assert_eq!(keys.len(), 8);

            keys.reverse();
            let reversed = format!("{{{}}}", keys.join(","));
            assert_eq!(decoder.decode(reversed.as_bytes()), Ok(delta), "{reversed}");

            let len = keys.len();
            keys.rotate_left(usize::from(state.value) % len);
            let rotated = format!("{{{}}}", keys.join(","));
            assert_eq!(decoder.decode(rotated.as_bytes()), Ok(delta), "{rotated}");
        }
    }

    #[test]
    fn test_to_json_decodes_back() {
        let mut delta = ShadowDelta::default();
        delta.inputs.set(2, true);
        delta.outputs.set(0, false);
        delta.outputs.set(5, true);

        let json = delta.to_json();
        assert_eq!(json, r#"{"i2":1,"o0":0,"o5":1}"#);
        assert_eq!(decode(&json).unwrap(), delta);
    }

    #[test]
    fn test_any_non_zero_value_is_on() {
        let delta = decode(r#"{"o4":2,"o5":0}"#).unwrap();
        assert_eq!(delta.outputs, RegisterMask::new(0b0001_0000, 0b0011_0000));
    }

    #[test]
    fn test_repeated_key_last_wins() {
        let delta = decode(r#"{"o1":1,"o1":0}"#).unwrap();
        assert_eq!(delta.outputs, RegisterMask::new(0, 0b10));
    }

    #[test]
    fn test_unknown_prefix_is_skipped() {
        let delta = decode(r#"{"x9":1,"o2":1}"#).unwrap();
        assert_eq!(delta.outputs, RegisterMask::new(0b100, 0b100));
        assert!(delta.inputs.is_empty());
    }

    #[test]
    fn test_bad_lengths() {
        assert_eq!(
            decode(r#"{"o12":1}"#),
            Err(CodecError::BadKeyOrValueLength {
                key_len: 3,
                value_len: 1
            })
        );
        assert_eq!(
            decode(r#"{"o1":10}"#),
            Err(CodecError::BadKeyOrValueLength {
                key_len: 2,
                value_len: 2
            })
        );
    }

    #[test]
    fn test_malformed_payload() {
        assert_eq!(
            decode(r#"{"o1":}"#),
            Err(CodecError::MalformedJson { offset: 6 })
        );
        assert_eq!(
            decode(r#"{,"o1":1}"#),
            Err(CodecError::MalformedJson { offset: 1 })
        );
    }

    #[test]
    fn test_top_level_must_be_container() {
        assert_eq!(decode("1"), Err(CodecError::InvalidTopLevel));
        assert_eq!(decode(r#""o1""#), Err(CodecError::InvalidTopLevel));
    }

    #[test]
    fn test_pairs_must_be_flat() {
        assert_eq!(
            decode(r#"{"o1":[1]}"#),
            Err(CodecError::OddKeyValueCount {
                children: 1,
                tokens: 4
            })
        );
    }

    #[test]
    fn test_value_must_be_primitive() {
        assert_eq!(
            decode(r#"{"o1":"1"}"#),
            Err(CodecError::UnexpectedToken {
                expected: TokenKind::Primitive,
                found: TokenKind::String
            })
        );
    }

    #[test]
    fn test_bit_out_of_range() {
        assert_eq!(decode(r#"{"o8":1}"#), Err(CodecError::InvalidBitIndex('8')));
    }

    #[test]
    fn test_token_budget() {
        let mut decoder = DeltaDecoder::with_capacity(4);
        assert_eq!(
            decoder.decode(br#"{"o1":1,"o2":1}"#),
            Err(CodecError::ParseOverflow { capacity: 4 })
        );
    }
}
