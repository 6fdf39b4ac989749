//! # Pulse Decoder
//!
//! Decodes pulse commands of the form `{"p1","p3"}` (or `["p1","p3"]`): a
//! flat container of bare two-character keys, one per output line to pulse.
//!
//! Unlike deltas there is no other legitimate key namespace on the pulse
//! topic, so any key not starting with `p` rejects the whole message.

use tracing::debug;

use crate::bit_index;
use crate::error::{CodecError, CodecResult};
use crate::register::{PulseRequest, REGISTER_BITS};
use crate::token::{TokenKind, TokenTable};

/// Reusable pulse decoder with its own scratch token table.
#[derive(Debug, Clone)]
pub struct PulseDecoder {
    table: TokenTable,
}

impl Default for PulseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PulseDecoder {
    /// At most 8 keys plus the surrounding container.
    pub const DEFAULT_TOKEN_CAPACITY: usize = REGISTER_BITS as usize + 1;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_TOKEN_CAPACITY)
    }

    pub fn with_capacity(tokens: usize) -> Self {
        PulseDecoder {
            table: TokenTable::with_capacity(tokens),
        }
    }

    pub fn decode(&mut self, json: &[u8]) -> CodecResult<PulseRequest> {
        let tokens = self.table.scan(json)?;
        let (root, body) = tokens
            .split_first()
            .ok_or(CodecError::MalformedJson { offset: json.len() })?;

        if !root.kind().is_container() {
            return Err(CodecError::InvalidTopLevel);
        }
        if body.len() != root.size() {
            return Err(CodecError::OddKeyValueCount {
                children: root.size(),
                tokens: tokens.len(),
            });
        }

        let mut request = PulseRequest::default();
        for element in body {
            if element.kind() != TokenKind::String {
                return Err(CodecError::UnexpectedToken {
                    expected: TokenKind::String,
                    found: element.kind(),
                });
            }

            let key = element.text(json);
            if key.len() != 2 {
                return Err(CodecError::BadKeyOrValueLength {
                    key_len: key.len(),
                    value_len: 0,
                });
            }
            if key[0] != b'p' {
                return Err(CodecError::InvalidPulseKey(key[0] as char));
            }
            request.insert(bit_index(key[1])?);
        }

        debug!(bits = format_args!("{:#010b}", request.bits()), "decoded pulse request");
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> CodecResult<PulseRequest> {
        PulseDecoder::new().decode(json.as_bytes())
    }

    #[test]
    fn test_pulse_scenario() {
        assert_eq!(decode(r#"{"p1","p3"}"#).unwrap().bits(), 0b0000_1010);
    }

    #[test]
    fn test_array_form() {
        assert_eq!(decode(r#"["p0", "p7"]"#).unwrap().bits(), 0b1000_0001);
    }

    #[test]
    fn test_all_lines_fit_default_budget() {
        let json = r#"{"p0","p1","p2","p3","p4","p5","p6","p7"}"#;
        assert_eq!(decode(json).unwrap().bits(), 0xff);
    }

    #[test]
    fn test_empty_container() {
        assert!(decode("[]").unwrap().is_empty());
    }

    #[test]
    fn test_foreign_key_is_rejected() {
        assert_eq!(
            decode(r#"{"p1","o3"}"#),
            Err(CodecError::InvalidPulseKey('o'))
        );
    }

    #[test]
    fn test_key_with_value_is_rejected() {
        assert_eq!(
            decode(r#"{"p1":1}"#),
            Err(CodecError::OddKeyValueCount {
                children: 1,
                tokens: 3
            })
        );
    }

    #[test]
    fn test_element_must_be_string() {
        assert_eq!(
            decode("[1]"),
            Err(CodecError::UnexpectedToken {
                expected: TokenKind::String,
                found: TokenKind::Primitive
            })
        );
    }

    #[test]
    fn test_bad_key_length() {
        assert_eq!(
            decode(r#"["p12"]"#),
            Err(CodecError::BadKeyOrValueLength {
                key_len: 3,
                value_len: 0
            })
        );
    }

    #[test]
    fn test_more_than_eight_keys_overflows() {
        let json = r#"{"p0","p1","p2","p3","p4","p5","p6","p7","p0"}"#;
        assert_eq!(
            decode(json),
            Err(CodecError::ParseOverflow { capacity: 9 })
        );
    }
}
