//! # Token Scanner
//!
//! A bounded JSON tokenizer that writes flat typed spans into a caller-owned
//! token table. It never allocates and never recurses: parent tracking walks
//! back over the table instead of using a stack.
//!
//! ## Token Layout
//! ```text
//! json doc: {"o1":0,"o3":1}
//!
//!  #  kind       span      size
//!  0  Object     0..15     2      ← size counts keys for objects
//!  1  String     2..4      1      ← a key's size is its value count
//!  2  Primitive  6..7      0
//!  3  String     9..11     1
//!  4  Primitive  13..14    0
//! ```
//!
//! Object members without values (`{"p1","p3"}`) are accepted: pulse
//! commands use that shape. A `:` that is never followed by a value is not.

use crate::error::{CodecError, CodecResult};

/// Sentinel end offset of a container that has not been closed yet.
const OPEN: usize = usize::MAX;

// =============================================================================
// Token Types
// =============================================================================

/// Kind of a scanned span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Object,
    Array,
    String,
    /// Numbers, `true`, `false` and `null`.
    Primitive,
}

impl TokenKind {
    #[inline]
    pub const fn is_container(&self) -> bool {
        matches!(self, TokenKind::Object | TokenKind::Array)
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Object => write!(f, "object"),
            TokenKind::Array => write!(f, "array"),
            TokenKind::String => write!(f, "string"),
            TokenKind::Primitive => write!(f, "primitive"),
        }
    }
}

/// One typed span of the input. String spans exclude the quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
    size: usize,
}

impl Token {
    /// Placeholder used to fill fresh tables.
    pub const EMPTY: Token = Token {
        kind: TokenKind::Primitive,
        start: 0,
        end: 0,
        size: 0,
    };

    #[inline]
    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.end
    }

    /// Span length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Direct child count: keys for objects, elements for arrays, 1 for a key
    /// that received a value.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// The span's bytes within the scanned input.
    #[inline]
    pub fn text<'a>(&self, json: &'a [u8]) -> &'a [u8] {
        &json[self.start..self.end]
    }

    #[inline]
    fn is_open(&self) -> bool {
        self.end == OPEN
    }
}

// =============================================================================
// Token Table
// =============================================================================

/// Fixed-capacity token storage, allocated once and reused for every scan.
#[derive(Debug, Clone)]
pub struct TokenTable {
    tokens: Box<[Token]>,
}

impl TokenTable {
    pub fn with_capacity(capacity: usize) -> Self {
        TokenTable {
            tokens: vec![Token::EMPTY; capacity].into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.tokens.len()
    }

    /// Scans `json` and returns the tokens it produced.
    pub fn scan(&mut self, json: &[u8]) -> CodecResult<&[Token]> {
        let count = scan(json, &mut self.tokens)?;
        Ok(&self.tokens[..count])
    }
}

// =============================================================================
// Scanner
// =============================================================================

/// Scans `json` into `tokens`, returning the number of tokens written.
///
/// Fails with [`CodecError::ParseOverflow`] when `tokens` is too small and
/// with [`CodecError::MalformedJson`] on syntax errors or unterminated input.
pub fn scan(json: &[u8], tokens: &mut [Token]) -> CodecResult<usize> {
    Scanner {
        tokens,
        next: 0,
        parent: None,
        expect: Expect::FirstMember,
    }
    .run(json)
}

/// What the scanner accepts next, besides whitespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    /// Start of input, or just inside `{`/`[`: a member or the close.
    FirstMember,
    /// After `,`: a member.
    Member,
    /// After `:`: a value.
    Value,
    /// After a member or value: `,`, `:` or the close.
    Separator,
    /// The root value is complete.
    End,
}

impl Expect {
    #[inline]
    fn starts_value(self) -> bool {
        matches!(self, Expect::FirstMember | Expect::Member | Expect::Value)
    }
}

struct Scanner<'t> {
    tokens: &'t mut [Token],
    next: usize,
    /// Token that the next value attaches to: a container, or a key after `:`.
    parent: Option<usize>,
    expect: Expect,
}

impl Scanner<'_> {
    fn run(mut self, json: &[u8]) -> CodecResult<usize> {
        let mut pos = 0;

        while pos < json.len() {
            let malformed = CodecError::MalformedJson { offset: pos };
            match json[pos] {
                b' ' | b'\t' | b'\r' | b'\n' => {}

                _ if self.expect == Expect::End => return Err(malformed),

                c @ (b'{' | b'[') => {
                    if !self.expect.starts_value() {
                        return Err(malformed);
                    }
                    let kind = if c == b'{' {
                        TokenKind::Object
                    } else {
                        TokenKind::Array
                    };
                    self.attach_value(pos)?;
                    let idx = self.alloc(kind, pos, OPEN)?;
                    self.parent = Some(idx);
                    self.expect = Expect::FirstMember;
                }

                c @ (b'}' | b']') => {
                    if !matches!(self.expect, Expect::FirstMember | Expect::Separator) {
                        return Err(malformed);
                    }
                    let kind = if c == b'}' {
                        TokenKind::Object
                    } else {
                        TokenKind::Array
                    };
                    let closed = self.innermost_open(self.next).ok_or(malformed.clone())?;
                    if self.tokens[closed].kind != kind {
                        return Err(malformed);
                    }
                    self.tokens[closed].end = pos + 1;
                    self.parent = self.innermost_open(closed);
                    self.value_done();
                }

                b'"' => {
                    if !self.expect.starts_value() {
                        return Err(malformed);
                    }
                    let end = string_end(json, pos)?;
                    self.attach_string();
                    self.alloc(TokenKind::String, pos + 1, end)?;
                    self.value_done();
                    pos = end;
                }

                b':' => {
                    let key = self.next.checked_sub(1).ok_or(malformed.clone())?;
                    let in_object = matches!(
                        self.parent.map(|p| self.tokens[p].kind),
                        Some(TokenKind::Object)
                    );
                    if self.expect != Expect::Separator
                        || !in_object
                        || self.tokens[key].kind != TokenKind::String
                    {
                        return Err(malformed);
                    }
                    self.parent = Some(key);
                    self.expect = Expect::Value;
                }

                b',' => {
                    if self.expect != Expect::Separator {
                        return Err(malformed);
                    }
                    if let Some(p) = self.parent {
                        if !self.tokens[p].kind.is_container() {
                            self.parent = self.innermost_open(self.next);
                        }
                    }
                    self.expect = Expect::Member;
                }

                b'-' | b'0'..=b'9' | b't' | b'f' | b'n' => {
                    if !self.expect.starts_value() {
                        return Err(malformed);
                    }
                    let end = primitive_end(json, pos)?;
                    self.attach_value(pos)?;
                    self.alloc(TokenKind::Primitive, pos, end)?;
                    self.value_done();
                    pos = end - 1;
                }

                _ => return Err(malformed),
            }
            pos += 1;
        }

        if self.expect == Expect::Value || self.innermost_open(self.next).is_some() {
            return Err(CodecError::MalformedJson { offset: json.len() });
        }

        Ok(self.next)
    }

    fn alloc(&mut self, kind: TokenKind, start: usize, end: usize) -> CodecResult<usize> {
        let idx = self.next;
        let capacity = self.tokens.len();
        let slot = self
            .tokens
            .get_mut(idx)
            .ok_or(CodecError::ParseOverflow { capacity })?;
        *slot = Token {
            kind,
            start,
            end,
            size: 0,
        };
        self.next += 1;
        Ok(idx)
    }

    /// Counts a non-string value against its parent. Objects only take
    /// string keys, so a bare container or primitive there is malformed.
    fn attach_value(&mut self, pos: usize) -> CodecResult<()> {
        if let Some(p) = self.parent {
            if self.tokens[p].kind == TokenKind::Object {
                return Err(CodecError::MalformedJson { offset: pos });
            }
            self.tokens[p].size += 1;
        }
        Ok(())
    }

    /// Strings are valid both as keys and as values.
    fn attach_string(&mut self) {
        if let Some(p) = self.parent {
            self.tokens[p].size += 1;
        }
    }

    /// A complete value either ends the document or waits for a separator.
    fn value_done(&mut self) {
        self.expect = if self.parent.is_none() {
            Expect::End
        } else {
            Expect::Separator
        };
    }

    /// Last still-open container before index `before`.
    fn innermost_open(&self, before: usize) -> Option<usize> {
        (0..before).rev().find(|&i| self.tokens[i].is_open())
    }
}

/// Returns the offset of the closing quote of the string opening at `open`.
fn string_end(json: &[u8], open: usize) -> CodecResult<usize> {
    let mut pos = open + 1;
    while pos < json.len() {
        match json[pos] {
            b'"' => return Ok(pos),
            b'\\' => {
                pos += 1;
                match json.get(pos) {
                    Some(b'"' | b'\\' | b'/' | b'b' | b'f' | b'r' | b'n' | b't') => {}
                    Some(b'u') => {
                        let hex = json
                            .get(pos + 1..pos + 5)
                            .ok_or(CodecError::MalformedJson { offset: pos })?;
                        if !hex.iter().all(u8::is_ascii_hexdigit) {
                            return Err(CodecError::MalformedJson { offset: pos });
                        }
                        pos += 4;
                    }
                    _ => return Err(CodecError::MalformedJson { offset: pos }),
                }
            }
            c if c < 0x20 => return Err(CodecError::MalformedJson { offset: pos }),
            _ => {}
        }
        pos += 1;
    }
    Err(CodecError::MalformedJson { offset: json.len() })
}

/// Returns the offset one past the primitive starting at `start`.
fn primitive_end(json: &[u8], start: usize) -> CodecResult<usize> {
    let mut pos = start;
    while pos < json.len() {
        match json[pos] {
            b' ' | b'\t' | b'\r' | b'\n' | b',' | b']' | b'}' | b':' => break,
            c if !(0x20..0x7f).contains(&c) => {
                return Err(CodecError::MalformedJson { offset: pos })
            }
            _ => {}
        }
        pos += 1;
    }
    Ok(pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn shape(table: &mut TokenTable, json: &str) -> Vec<(TokenKind, String, usize)> {
        let bytes = json.as_bytes();
        table
            .scan(bytes)
            .unwrap()
            .iter()
            .map(|t| {
                (
                    t.kind(),
                    String::from_utf8_lossy(t.text(bytes)).into_owned(),
                    t.size(),
                )
            })
            .collect()
    }

    #[test]
    fn test_scan_flat_object() {
        let mut table = TokenTable::with_capacity(16);
        assert_eq!(
            shape(&mut table, r#"{"o1":0, "o3":0, "o5":1}"#),
            vec![
                (TokenKind::Object, r#"{"o1":0, "o3":0, "o5":1}"#.to_string(), 3),
                (TokenKind::String, "o1".to_string(), 1),
                (TokenKind::Primitive, "0".to_string(), 0),
                (TokenKind::String, "o3".to_string(), 1),
                (TokenKind::Primitive, "0".to_string(), 0),
                (TokenKind::String, "o5".to_string(), 1),
                (TokenKind::Primitive, "1".to_string(), 0),
            ]
        );
    }

    #[test]
    fn test_scan_bare_keys() {
        let mut table = TokenTable::with_capacity(9);
        assert_eq!(
            shape(&mut table, r#"{"p1","p3"}"#),
            vec![
                (TokenKind::Object, r#"{"p1","p3"}"#.to_string(), 2),
                (TokenKind::String, "p1".to_string(), 0),
                (TokenKind::String, "p3".to_string(), 0),
            ]
        );
    }

    #[test]
    fn test_scan_nested_restores_parent() {
        let mut table = TokenTable::with_capacity(16);
        let tokens = shape(&mut table, r#"{"a":[1,2],"b":true}"#);
        assert_eq!(tokens[0].2, 2);
        assert_eq!(tokens[2], (TokenKind::Array, "[1,2]".to_string(), 2));
        assert_eq!(tokens[5], (TokenKind::String, "b".to_string(), 1));
    }

    #[test]
    fn test_scan_overflow() {
        let mut table = TokenTable::with_capacity(2);
        assert_eq!(
            table.scan(br#"{"p1","p3"}"#),
            Err(CodecError::ParseOverflow { capacity: 2 })
        );
    }

    #[test]
    fn test_scan_missing_value() {
        let mut table = TokenTable::with_capacity(8);
        assert_eq!(
            table.scan(br#"{"o1":}"#),
            Err(CodecError::MalformedJson { offset: 6 })
        );
    }

    #[test]
    fn test_scan_rejects_malformed_input() {
        let mut table = TokenTable::with_capacity(8);
        for bad in [
            r#"{"o1":1"#,
            r#"{"o1":1]"#,
            r#"{"o1:1}"#,
            r#"{1:1}"#,
            r#"["a":1]"#,
            r#"{"a":1:2}"#,
            r#"{"o1":x}"#,
            r#"{"bad\q":1}"#,
            "}",
            r#"{"o1":1,}"#,
            r#"{"o1":1,,"o2":1}"#,
            r#"{,"o1":1}"#,
            r#"[1 2]"#,
            r#"{"o1":1 "o2"}"#,
            r#"{"o1":1}{"o2":1}"#,
            r#"{"o1":1} x"#,
            r#"[,]"#,
        ] {
            assert!(
                matches!(table.scan(bad.as_bytes()), Err(CodecError::MalformedJson { .. })),
                "accepted {bad}"
            );
        }
    }

    #[test]
    fn test_scan_string_escapes() {
        let mut table = TokenTable::with_capacity(4);
        let json = br#"["a\"b\u00e9"]"#;
        let tokens = table.scan(json).unwrap();
        assert_eq!(tokens[1].text(json), br#"a\"b\u00e9"#);
    }

    #[test]
    fn test_scan_empty_input() {
        let mut table = TokenTable::with_capacity(4);
        assert_eq!(table.scan(b"  ").unwrap().len(), 0);
    }
}
