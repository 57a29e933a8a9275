//! Byte-level SIP grammar (RFC 3261 §25)
//!
//! Character classes are compile-time 256-entry tables indexed by byte, so
//! every test is a single load. The module also carries the small helpers the
//! header parsers share: quoting, `%HEX` escaping, a cursor-style [`Scanner`]
//! and [`split_list`] for comma-separated header values.

use crate::error::{Error, Result};

pub const CR: u8 = b'\r';
pub const LF: u8 = b'\n';
pub const SPACE: u8 = b' ';
pub const TAB: u8 = b'\t';
pub const COLON: u8 = b':';
pub const CRLF: &[u8] = b"\r\n";

/// Branch prefix marking RFC 3261 transaction identifiers
pub const MAGIC_COOKIE: &str = "z9hG4bK";

const DIGIT: &str = "0123456789";

const fn table(chars: &[u8]) -> [bool; 256] {
    let mut t = [false; 256];
    let mut i = 0;
    while i < chars.len() {
        t[chars[i] as usize] = true;
        i += 1;
    }
    t
}

/// A set of bytes backed by a static lookup table
#[derive(Clone, Copy)]
pub struct Charset(&'static [bool; 256]);

impl Charset {
    /// Whether `b` belongs to the set
    #[inline]
    pub fn contains(&self, b: u8) -> bool {
        self.0[b as usize]
    }

    /// Whether every byte of `s` belongs to the set
    pub fn contains_all(&self, s: &str) -> bool {
        s.bytes().all(|b| self.contains(b))
    }
}

static DIGIT_TABLE: [bool; 256] = table(DIGIT.as_bytes());
static TOKEN_TABLE: [bool; 256] = table(
    concat!(
        "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ",
        "0123456789",
        "-.!%*_+`'~"
    )
    .as_bytes(),
);
static UNRESERVED_TABLE: [bool; 256] = table(
    concat!(
        "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ",
        "0123456789",
        "-_.!~*'()"
    )
    .as_bytes(),
);
static PARAM_TABLE: [bool; 256] = table(
    concat!(
        "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ",
        "0123456789",
        "-_.!~*'()",
        "[]/:&+$"
    )
    .as_bytes(),
);
static USER_TABLE: [bool; 256] = table(
    concat!(
        "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ",
        "0123456789",
        "-_.!~*'()",
        "&=+$,;?/"
    )
    .as_bytes(),
);
static LWS_TABLE: [bool; 256] = table(b" \t\r\n");

pub const DIGITS: Charset = Charset(&DIGIT_TABLE);
pub const TOKEN: Charset = Charset(&TOKEN_TABLE);
pub const UNRESERVED: Charset = Charset(&UNRESERVED_TABLE);
pub const PARAM_UNRESERVED: Charset = Charset(&PARAM_TABLE);
pub const USER_UNRESERVED: Charset = Charset(&USER_TABLE);
pub const LWS: Charset = Charset(&LWS_TABLE);

/// `token` per RFC 3261: non-empty and made only of token characters
pub fn is_token(s: &str) -> bool {
    !s.is_empty() && TOKEN.contains_all(s)
}

/// Byte-slice variant of [`is_token`]
pub fn is_token_bytes(b: &[u8]) -> bool {
    !b.is_empty() && b.iter().all(|c| TOKEN.contains(*c))
}

#[inline]
pub fn is_lws(b: u8) -> bool {
    LWS.contains(b)
}

/// Wrap `s` in double quotes, escaping `"` and `\`
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Strip surrounding quotes and resolve `\` escapes; unquoted input is returned as-is
pub fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() < 2 || !s.starts_with('"') || !s.ends_with('"') {
        return s.to_string();
    }
    let inner = &s[1..s.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut escaped = false;
    for c in inner.chars() {
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else {
            out.push(c);
        }
    }
    out
}

/// Percent-encode every byte of `s` that is outside `allowed`
pub fn escape(s: &str, allowed: Charset) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if allowed.contains(b) {
            out.push(b as char);
        } else {
            out.push('%');
            out.push_str(&format!("{:02X}", b));
        }
    }
    out
}

/// Decode `%HEX` escapes
pub fn unescape(s: &str) -> Result<String> {
    if !s.contains('%') {
        return Ok(s.to_string());
    }
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len() {
                return Err(Error::Parse(format!("Truncated escape in {}", s)));
            }
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                .map_err(|_| Error::Parse(format!("Bad escape in {}", s)))?;
            let value = u8::from_str_radix(hex, 16)
                .map_err(|_| Error::Parse(format!("Bad escape in {}", s)))?;
            out.push(value);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| Error::Parse(format!("Escape is not UTF-8 in {}", s)))
}

/// Split a header value on top-level commas.
///
/// Commas inside quoted strings and inside `<...>` are not separators.
/// Empty elements are dropped and every element is trimmed.
pub fn split_list(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quoted = false;
    let mut escaped = false;
    let mut angle = 0usize;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            '<' if !quoted => angle += 1,
            '>' if !quoted => angle = angle.saturating_sub(1),
            ',' if !quoted && angle == 0 => {
                let part = value[start..i].trim();
                if !part.is_empty() {
                    parts.push(part);
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = value[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts
}

/// Cursor over a header value
///
/// ```rust
/// use siplet_sip_core::grammar::Scanner;
///
/// let mut s = Scanner::new("SIP / 2.0 /UDP host");
/// assert_eq!(s.read_token(), "SIP");
/// s.skip_ws();
/// assert!(s.eat('/'));
/// ```
#[derive(Debug, Clone)]
pub struct Scanner<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(input: &'a str) -> Self {
        Scanner { input, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    pub fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    /// Remaining, unscanned input
    pub fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    pub fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c == ' ' || c == '\t' || c == '\r' || c == '\n' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    /// Consume `c` if it is next
    pub fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    /// Consume `c` or fail
    pub fn expect(&mut self, c: char) -> Result<()> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(Error::Parse(format!(
                "Expected '{}' at {} in {}",
                c, self.pos, self.input
            )))
        }
    }

    /// Consume while `pred` holds and return the consumed slice
    pub fn read_while<F: Fn(char) -> bool>(&mut self, pred: F) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.input[start..self.pos]
    }

    /// Consume a run of token characters
    pub fn read_token(&mut self) -> &'a str {
        self.read_while(|c| c.is_ascii() && TOKEN.contains(c as u8))
    }
}
