//! MIME encoding and decoding utilities.
//!
//! Supports Base64, Quoted-Printable, RFC 2047 header encoding and RFC 2231
//! parameter encoding.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt::Write as _;

/// Maximum line length for encoded bodies (RFC 2045).
const MAX_LINE_LENGTH: usize = 76;

/// Maximum length of a single RFC 2047 encoded-word.
const MAX_ENCODED_WORD: usize = 75;

/// Longest run without spaces left as plain text. Folding only happens at
/// spaces, so a longer run could not be kept under the 998-octet line limit
/// (RFC 5322 section 2.1.1) once the header name is prepended.
const MAX_PLAIN_RUN: usize = 900;

/// Encodes data as Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Encodes data as Base64 broken into CRLF-separated lines of 76 characters.
#[must_use]
pub fn encode_base64_wrapped(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut result = String::with_capacity(encoded.len() + encoded.len() / MAX_LINE_LENGTH * 2);

    // Base64 output is pure ASCII, so byte chunks are valid char boundaries
    for (i, chunk) in encoded.as_bytes().chunks(MAX_LINE_LENGTH).enumerate() {
        if i > 0 {
            result.push_str("\r\n");
        }
        result.extend(chunk.iter().map(|&b| b as char));
    }

    result
}

/// Decodes Base64 data, ignoring embedded whitespace and line breaks.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(cleaned).map_err(Into::into)
}

/// Encodes text using Quoted-Printable encoding (RFC 2045).
///
/// Line breaks in the input become hard CRLF line breaks in the output;
/// long lines are wrapped with soft line breaks.
#[must_use]
pub fn encode_quoted_printable(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            result.push_str("\r\n");
        }
        let line = line.strip_suffix('\r').unwrap_or(line);
        encode_qp_line(line.as_bytes(), &mut result);
    }

    result
}

fn encode_qp_line(bytes: &[u8], result: &mut String) {
    let mut line_length = 0;

    for (i, &byte) in bytes.iter().enumerate() {
        let at_end = i + 1 == bytes.len();
        // Whitespace at the end of a line must be encoded or it gets stripped in transit
        let literal = matches!(byte, b'!'..=b'<' | b'>'..=b'~')
            || (matches!(byte, b' ' | b'\t') && !at_end);
        let width = if literal { 1 } else { 3 };

        // Reserve one column for the soft break marker
        if line_length + width > MAX_LINE_LENGTH - 1 {
            result.push_str("=\r\n");
            line_length = 0;
        }

        if literal {
            result.push(byte as char);
        } else {
            let _ = write!(result, "={byte:02X}");
        }
        line_length += width;
    }
}

/// Decodes Quoted-Printable text (RFC 2045).
///
/// # Errors
///
/// Returns an error if the input contains invalid escape sequences.
pub fn decode_quoted_printable(text: &str) -> Result<Vec<u8>> {
    let bytes = text.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'=' {
            result.push(bytes[i]);
            i += 1;
            continue;
        }

        // Soft line break
        match bytes.get(i + 1..) {
            Some([b'\r', b'\n', ..]) => {
                i += 3;
                continue;
            }
            Some([b'\n', ..]) => {
                i += 2;
                continue;
            }
            _ => {}
        }

        // Hex encoded byte
        let hex = bytes
            .get(i + 1..i + 3)
            .ok_or_else(|| Error::InvalidEncoding("Incomplete escape sequence".to_string()))?;
        let hex = std::str::from_utf8(hex)
            .map_err(|_| Error::InvalidEncoding("Invalid hex escape".to_string()))?;
        let byte = u8::from_str_radix(hex, 16)
            .map_err(|e| Error::InvalidEncoding(format!("Invalid hex: {e}")))?;
        result.push(byte);
        i += 3;
    }

    Ok(result)
}

/// Returns true if a header value can be written without encoding.
fn is_plain_header_text(text: &str) -> bool {
    text.chars().all(|c| c == ' ' || c.is_ascii_graphic())
        && !text.contains("=?")
        && text.split(' ').all(|run| run.len() <= MAX_PLAIN_RUN)
}

/// Encodes a header value using RFC 2047 encoding.
///
/// Format: `=?charset?B?encoded-text?=`. Values that are plain printable ASCII
/// are returned unchanged unless a run without spaces is too long to fold. Longer values are split into several encoded-words
/// separated by a space, each at most 75 characters long, never splitting a
/// UTF-8 sequence.
#[must_use]
pub fn encode_rfc2047(text: &str, charset: &str) -> String {
    if is_plain_header_text(text) {
        return text.to_string();
    }

    let overhead = "=?".len() + charset.len() + "?B?".len() + "?=".len();
    // Four base64 characters carry three bytes
    let max_bytes = (MAX_ENCODED_WORD.saturating_sub(overhead) / 4 * 3).max(3);

    let mut words = Vec::new();
    let mut chunk = String::new();
    for ch in text.chars() {
        if chunk.len() + ch.len_utf8() > max_bytes && !chunk.is_empty() {
            words.push(format!("=?{charset}?B?{}?=", encode_base64(chunk.as_bytes())));
            chunk.clear();
        }
        chunk.push(ch);
    }
    if !chunk.is_empty() {
        words.push(format!("=?{charset}?B?{}?=", encode_base64(chunk.as_bytes())));
    }

    words.join(" ")
}

/// Decodes RFC 2047 encoded-words in a header value.
///
/// Plain text between encoded-words is kept; whitespace separating two
/// adjacent encoded-words is dropped.
///
/// # Errors
///
/// Returns an error if an encoded-word carries invalid data.
pub fn decode_rfc2047(text: &str) -> Result<String> {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    let mut previous_was_word = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);

        match split_encoded_word(candidate) {
            Some((charset_and_text, consumed)) => {
                if !(previous_was_word && before.trim().is_empty()) {
                    result.push_str(before);
                }
                result.push_str(&decode_encoded_word(charset_and_text)?);
                rest = &candidate[consumed..];
                previous_was_word = true;
            }
            None => {
                result.push_str(before);
                result.push_str("=?");
                rest = &candidate[2..];
                previous_was_word = false;
            }
        }
    }

    result.push_str(rest);
    Ok(result)
}

/// Splits `=?charset?E?text?=` off the front of `s`, returning the inner
/// `(charset, encoding, text)` and the number of bytes consumed.
fn split_encoded_word(s: &str) -> Option<((&str, &str, &str), usize)> {
    let inner = s.strip_prefix("=?")?;
    let (charset, rest) = inner.split_once('?')?;
    let (encoding, rest) = rest.split_once('?')?;
    let end = rest.find("?=")?;
    let encoded_text = &rest[..end];

    if charset.is_empty() || encoding.len() != 1 || encoded_text.contains(char::is_whitespace) {
        return None;
    }

    let consumed = 2 + charset.len() + 1 + encoding.len() + 1 + end + 2;
    Some(((charset, encoding, encoded_text), consumed))
}

fn decode_encoded_word((_charset, encoding, encoded_text): (&str, &str, &str)) -> Result<String> {
    let bytes = match encoding.to_ascii_uppercase().as_str() {
        "B" => decode_base64(encoded_text)?,
        // Quoted-Printable with underscore for space
        "Q" => decode_quoted_printable(&encoded_text.replace('_', " "))?,
        other => {
            return Err(Error::InvalidEncoding(format!("Unknown encoding: {other}")));
        }
    };

    String::from_utf8(bytes).map_err(Into::into)
}

/// Returns true for RFC 2231 `attribute-char`s that need no escaping.
const fn is_attribute_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(
            byte,
            b'!' | b'#' | b'$' | b'&' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~'
        )
}

/// Encodes a parameter value using RFC 2231 extended notation.
///
/// Returns `utf-8''percent-encoded-value`; the caller writes it after `name*=`.
#[must_use]
pub fn encode_rfc2231(value: &str) -> String {
    let mut result = String::from("utf-8''");
    for &byte in value.as_bytes() {
        if is_attribute_char(byte) {
            result.push(byte as char);
        } else {
            let _ = write!(result, "%{byte:02X}");
        }
    }
    result
}

/// Decodes an RFC 2231 extended parameter value (`charset'language'value`).
///
/// # Errors
///
/// Returns an error if the value is not in extended notation or contains
/// invalid percent escapes.
pub fn decode_rfc2231(value: &str) -> Result<String> {
    let mut sections = value.splitn(3, '\'');
    let (Some(_charset), Some(_language), Some(encoded)) =
        (sections.next(), sections.next(), sections.next())
    else {
        return Err(Error::InvalidEncoding(format!(
            "Not an RFC 2231 value: {value}"
        )));
    };

    let bytes = encoded.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .ok_or_else(|| Error::InvalidEncoding("Incomplete percent escape".into()))?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|e| Error::InvalidEncoding(format!("Invalid hex: {e}")))?;
            decoded.push(byte);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(decoded).map_err(Into::into)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_encode_decode() {
        let data = b"Hello, World!";
        let encoded = encode_base64(data);
        assert_eq!(encoded, "SGVsbG8sIFdvcmxkIQ==");

        let decoded = decode_base64(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_base64_wrapped_line_length() {
        let data = vec![0xABu8; 300];
        let encoded = encode_base64_wrapped(&data);

        let lines: Vec<&str> = encoded.split("\r\n").collect();
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| l.len() <= 76));
        assert_eq!(decode_base64(&encoded).unwrap(), data);
    }

    #[test]
    fn test_base64_wrapped_empty() {
        assert_eq!(encode_base64_wrapped(b""), "");
    }

    #[test]
    fn test_quoted_printable_encode() {
        let text = "Hello, World!";
        let encoded = encode_quoted_printable(text);
        assert_eq!(encoded, "Hello, World!");

        let text = "Héllo, Wørld!";
        let encoded = encode_quoted_printable(text);
        assert!(encoded.contains("=C3"));
    }

    #[test]
    fn test_quoted_printable_equals_sign() {
        assert_eq!(encode_quoted_printable("a=b"), "a=3Db");
    }

    #[test]
    fn test_quoted_printable_keeps_line_breaks() {
        let encoded = encode_quoted_printable("<p>one</p>\n<p>two</p>\r\n");
        assert_eq!(encoded, "<p>one</p>\r\n<p>two</p>\r\n");
    }

    #[test]
    fn test_quoted_printable_trailing_space() {
        assert_eq!(encode_quoted_printable("end \nnext"), "end=20\r\nnext");
    }

    #[test]
    fn test_quoted_printable_soft_breaks() {
        let text = "x".repeat(200);
        let encoded = encode_quoted_printable(&text);
        assert!(encoded.split("\r\n").all(|l| l.len() <= 76));
        assert_eq!(decode_quoted_printable(&encoded).unwrap(), text.as_bytes());
    }

    #[test]
    fn test_quoted_printable_decode() {
        let encoded = "Hello, World!";
        let decoded = decode_quoted_printable(encoded).unwrap();
        assert_eq!(decoded, b"Hello, World!");

        let encoded = "H=C3=A9llo";
        let decoded = decode_quoted_printable(encoded).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "Héllo");
    }

    #[test]
    fn test_quoted_printable_soft_line_break() {
        let encoded = "Hello=\r\nWorld";
        let decoded = decode_quoted_printable(encoded).unwrap();
        assert_eq!(decoded, b"HelloWorld");
    }

    #[test]
    fn test_quoted_printable_bad_escape() {
        assert!(decode_quoted_printable("abc=Z").is_err());
        assert!(decode_quoted_printable("abc=ZZ").is_err());
    }

    #[test]
    fn test_rfc2047_encode() {
        let text = "Hello";
        let encoded = encode_rfc2047(text, "utf-8");
        assert_eq!(encoded, "Hello"); // No encoding needed

        let text = "Héllo";
        let encoded = encode_rfc2047(text, "utf-8");
        assert!(encoded.starts_with("=?utf-8?B?"));
        assert!(encoded.ends_with("?="));
    }

    #[test]
    fn test_rfc2047_encodes_unfoldable_ascii() {
        let text = "x".repeat(1500);
        let encoded = encode_rfc2047(&text, "utf-8");

        assert!(encoded.starts_with("=?utf-8?B?"));
        assert!(encoded.split(' ').all(|w| w.len() <= 75));
        assert_eq!(decode_rfc2047(&encoded).unwrap(), text);

        let foldable = "word ".repeat(300);
        assert_eq!(encode_rfc2047(&foldable, "utf-8"), foldable);
    }

    #[test]
    fn test_rfc2047_long_value_split() {
        let text = "Grüße aus München ".repeat(10);
        let encoded = encode_rfc2047(&text, "utf-8");

        let words: Vec<&str> = encoded.split(' ').collect();
        assert!(words.len() > 1);
        assert!(words.iter().all(|w| w.len() <= 75));
        assert_eq!(decode_rfc2047(&encoded).unwrap(), text);
    }

    #[test]
    fn test_rfc2047_decode() {
        let encoded = "Hello";
        let decoded = decode_rfc2047(encoded).unwrap();
        assert_eq!(decoded, "Hello");

        let encoded = "=?utf-8?B?SMOpbGxv?=";
        let decoded = decode_rfc2047(encoded).unwrap();
        assert_eq!(decoded, "Héllo");
    }

    #[test]
    fn test_rfc2047_quoted_printable() {
        let encoded = "=?utf-8?Q?H=C3=A9llo_there?=";
        let decoded = decode_rfc2047(encoded).unwrap();
        assert_eq!(decoded, "Héllo there");
    }

    #[test]
    fn test_rfc2047_mixed_text() {
        let decoded = decode_rfc2047("Re: =?utf-8?B?SMOpbGxv?= again").unwrap();
        assert_eq!(decoded, "Re: Héllo again");
    }

    #[test]
    fn test_rfc2047_not_a_word() {
        assert_eq!(decode_rfc2047("a =? b").unwrap(), "a =? b");
    }

    #[test]
    fn test_rfc2231_roundtrip_non_ascii() {
        let encoded = encode_rfc2231("résumé 2024.pdf");
        assert_eq!(encoded, "utf-8''r%C3%A9sum%C3%A9%202024.pdf");
        assert_eq!(decode_rfc2231(&encoded).unwrap(), "résumé 2024.pdf");
    }

    #[test]
    fn test_rfc2231_rejects_plain_value() {
        assert!(decode_rfc2231("report.pdf").is_err());
    }
}
