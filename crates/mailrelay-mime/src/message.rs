//! MIME message structure, rendering and parsing.

use crate::content_type::{ContentDisposition, ContentType};
use crate::encoding::{decode_base64, decode_quoted_printable};
use crate::error::{Error, Result};
use crate::header::Headers;
use std::fmt;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit, // Default (includes "7bit")
        }
    }

    /// Decodes an encoded body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid for this encoding.
    pub fn decode(self, body: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Base64 => decode_base64(&String::from_utf8_lossy(body)),
            Self::QuotedPrintable => decode_quoted_printable(&String::from_utf8_lossy(body)),
            Self::SevenBit | Self::EightBit | Self::Binary => Ok(body.to_vec()),
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::EightBit => write!(f, "8bit"),
            Self::Base64 => write!(f, "base64"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// MIME message part.
#[derive(Debug, Clone)]
pub struct Part {
    /// Part headers.
    pub headers: Headers,
    /// Part body (encoded bytes, as on the wire).
    pub body: Vec<u8>,
}

impl Part {
    /// Creates a new part.
    #[must_use]
    pub const fn new(headers: Headers, body: Vec<u8>) -> Self {
        Self { headers, body }
    }

    /// Gets the content type.
    ///
    /// # Errors
    ///
    /// Returns an error if content type header is invalid.
    pub fn content_type(&self) -> Result<ContentType> {
        self.headers
            .get("content-type")
            .map_or_else(|| Ok(ContentType::text_plain()), ContentType::parse)
    }

    /// Gets the content disposition, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is present but malformed.
    pub fn disposition(&self) -> Result<Option<ContentDisposition>> {
        self.headers
            .get("content-disposition")
            .map(ContentDisposition::parse)
            .transpose()
    }

    /// Returns true if the part is marked as an attachment.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        matches!(self.disposition(), Ok(Some(d)) if d.is_attachment())
    }

    /// Returns the attachment filename, if the part carries one.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        self.disposition().ok().flatten().and_then(|d| d.filename())
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Decodes the body according to the transfer encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode_body(&self) -> Result<Vec<u8>> {
        self.transfer_encoding().decode(&self.body)
    }

    /// Gets the decoded body as a string.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding or UTF-8 conversion fails.
    pub fn body_text(&self) -> Result<String> {
        let decoded = self.decode_body()?;
        String::from_utf8(decoded).map_err(Into::into)
    }
}

/// MIME message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Message headers.
    pub headers: Headers,
    /// Message parts (empty for single-part messages).
    pub parts: Vec<Part>,
    /// Encoded body for single-part messages.
    pub body: Option<Vec<u8>>,
}

impl Message {
    /// Creates a single-part message.
    #[must_use]
    pub const fn single_part(headers: Headers, body: Vec<u8>) -> Self {
        Self {
            headers,
            parts: Vec::new(),
            body: Some(body),
        }
    }

    /// Creates a multipart/mixed message, setting its Content-Type header.
    #[must_use]
    pub fn multipart(mut headers: Headers, boundary: &str, parts: Vec<Part>) -> Self {
        headers.set(
            "Content-Type",
            ContentType::multipart_mixed(boundary).to_string(),
        );
        Self {
            headers,
            parts,
            body: None,
        }
    }

    /// Parses a message.
    ///
    /// Multipart bodies are split one level deep; nested multiparts are kept
    /// as encoded parts.
    ///
    /// # Errors
    ///
    /// Returns an error if headers are malformed or a multipart body has no
    /// boundary or no closing delimiter.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| Error::Parse(format!("Message is not valid UTF-8: {e}")))?;
        let (head, body) = split_head_body(text);
        let headers = Headers::parse(head)?;

        let content_type = headers
            .get("content-type")
            .map(ContentType::parse)
            .transpose()?;

        match content_type {
            Some(ct) if ct.is_multipart() => {
                let boundary = ct.boundary().ok_or(Error::MissingBoundary)?;
                let parts = split_multipart(body, boundary)?
                    .into_iter()
                    .map(|raw_part| {
                        let (part_head, part_body) = split_head_body(raw_part);
                        Ok(Part::new(
                            Headers::parse(part_head)?,
                            part_body.as_bytes().to_vec(),
                        ))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self {
                    headers,
                    parts,
                    body: None,
                })
            }
            _ => Ok(Self::single_part(headers, body.as_bytes().to_vec())),
        }
    }

    /// Gets the content type.
    ///
    /// # Errors
    ///
    /// Returns an error if content type header is invalid.
    pub fn content_type(&self) -> Result<ContentType> {
        self.headers
            .get("content-type")
            .map_or_else(|| Ok(ContentType::text_plain()), ContentType::parse)
    }

    /// Checks if this is a multipart message.
    ///
    /// # Errors
    ///
    /// Returns an error if content type cannot be determined.
    pub fn is_multipart(&self) -> Result<bool> {
        Ok(self.content_type()?.is_multipart())
    }

    /// Gets the From header.
    #[must_use]
    pub fn from(&self) -> Option<&str> {
        self.headers.get("from")
    }

    /// Gets the To header.
    #[must_use]
    pub fn to(&self) -> Option<&str> {
        self.headers.get("to")
    }

    /// Gets the Cc header.
    #[must_use]
    pub fn cc(&self) -> Option<&str> {
        self.headers.get("cc")
    }

    /// Gets the raw (possibly encoded) Subject header.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.headers.get("subject")
    }

    /// Gets the Message-ID header.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.headers.get("message-id")
    }

    /// Gets the body as text for single-part messages.
    ///
    /// # Errors
    ///
    /// Returns an error if this is a multipart message or decoding fails.
    pub fn body_text(&self) -> Result<String> {
        if !self.parts.is_empty() {
            return Err(Error::InvalidMultipart(
                "Use parts for multipart messages".to_string(),
            ));
        }

        let body = self
            .body
            .as_ref()
            .ok_or_else(|| Error::Parse("No body".to_string()))?;

        let transfer_encoding = self
            .headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse);

        String::from_utf8(transfer_encoding.decode(body)?).map_err(Into::into)
    }

    /// Returns the HTML body, from the single body or the first text/html part.
    ///
    /// # Errors
    ///
    /// Returns an error if no HTML body is found or decoding fails.
    pub fn html_body(&self) -> Result<String> {
        if self.parts.is_empty() {
            if self.content_type()?.is("text", "html") {
                return self.body_text();
            }
        } else {
            for part in &self.parts {
                if part.content_type()?.is("text", "html") && !part.is_attachment() {
                    return part.body_text();
                }
            }
        }

        Err(Error::Parse("No text/html body found".to_string()))
    }

    /// Returns the attachment parts in message order.
    pub fn attachments(&self) -> impl Iterator<Item = &Part> {
        self.parts.iter().filter(|p| p.is_attachment())
    }

    /// Renders the message to RFC 5322 bytes with CRLF line endings.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.headers.to_string().as_bytes());
        out.extend_from_slice(b"\r\n");

        if let Some(body) = &self.body {
            out.extend_from_slice(body);
            out.extend_from_slice(b"\r\n");
            return out;
        }

        let boundary = self
            .content_type()
            .ok()
            .and_then(|ct| ct.boundary().map(str::to_string))
            .unwrap_or_default();

        for part in &self.parts {
            out.extend_from_slice(format!("--{boundary}\r\n{}\r\n", part.headers).as_bytes());
            out.extend_from_slice(&part.body);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

        out
    }
}

/// Splits raw text at the first empty line.
fn split_head_body(text: &str) -> (&str, &str) {
    if let Some(body) = text.strip_prefix("\r\n") {
        ("", body)
    } else if let Some(index) = text.find("\r\n\r\n") {
        (&text[..index + 2], &text[index + 4..])
    } else if let Some(index) = text.find("\n\n") {
        (&text[..index + 1], &text[index + 2..])
    } else {
        (text, "")
    }
}

/// Splits a multipart body into raw parts (headers + body, without delimiters).
fn split_multipart<'a>(body: &'a str, boundary: &str) -> Result<Vec<&'a str>> {
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    let mut current_start: Option<usize> = None;
    let mut offset = 0;

    for line in body.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\r', '\n']);

        if let Some(rest) = trimmed.strip_prefix(delimiter.as_str()) {
            let closing = rest.starts_with("--");
            if rest.trim().is_empty() || closing {
                if let Some(start) = current_start.take() {
                    // The CRLF before a delimiter belongs to the delimiter
                    let end = strip_trailing_newline(body, start, offset);
                    parts.push(&body[start..end]);
                }
                if closing {
                    return Ok(parts);
                }
                current_start = Some(offset + line.len());
            }
        }

        offset += line.len();
    }

    Err(Error::InvalidMultipart(format!(
        "Missing closing delimiter for boundary {boundary}"
    )))
}

fn strip_trailing_newline(body: &str, start: usize, end: usize) -> usize {
    let slice = &body[start..end];
    if slice.ends_with("\r\n") {
        end - 2
    } else if slice.ends_with('\n') {
        end - 1
    } else {
        end
    }
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
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse("base64"), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("quoted-printable"),
            TransferEncoding::QuotedPrintable
        );
    }

    #[test]
    fn test_part_body_text() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain; charset=utf-8");
        let part = Part::new(headers, b"Hello, World!".to_vec());

        assert_eq!(part.body_text().unwrap(), "Hello, World!");
        assert!(!part.is_attachment());
        assert!(part.filename().is_none());
    }

    #[test]
    fn test_part_attachment_filename() {
        let mut headers = Headers::new();
        headers.add("Content-Disposition", "attachment; filename=\"a b.txt\"");
        headers.add("Content-Transfer-Encoding", "base64");
        let part = Part::new(headers, b"aGk=".to_vec());

        assert!(part.is_attachment());
        assert_eq!(part.filename().as_deref(), Some("a b.txt"));
        assert_eq!(part.decode_body().unwrap(), b"hi");
    }

    #[test]
    fn test_message_single_part() {
        let mut headers = Headers::new();
        headers.add("From", "sender@example.com");
        headers.add("To", "recipient@example.com");
        headers.add("Subject", "Test");

        let message = Message::single_part(headers, b"Hello, World!".to_vec());

        assert_eq!(message.from(), Some("sender@example.com"));
        assert_eq!(message.to(), Some("recipient@example.com"));
        assert_eq!(message.subject(), Some("Test"));
        assert_eq!(message.body_text().unwrap(), "Hello, World!");
    }

    #[test]
    fn test_message_render_and_parse_multipart() {
        let mut headers = Headers::new();
        headers.add("Subject", "Parts");

        let mut part1_headers = Headers::new();
        part1_headers.add("Content-Type", "text/html; charset=utf-8");
        let part1 = Part::new(part1_headers, b"<p>Part 1</p>".to_vec());

        let mut part2_headers = Headers::new();
        part2_headers.add("Content-Type", "text/plain");
        let part2 = Part::new(part2_headers, b"Part 2\r\nsecond line".to_vec());

        let message = Message::multipart(headers, "abc123", vec![part1, part2]);
        let rendered = message.to_bytes();

        let parsed = Message::parse(&rendered).unwrap();
        assert!(parsed.is_multipart().unwrap());
        assert_eq!(parsed.parts.len(), 2);
        assert_eq!(parsed.html_body().unwrap(), "<p>Part 1</p>");
        assert_eq!(parsed.parts[1].body, b"Part 2\r\nsecond line");
    }

    #[test]
    fn test_parse_single_part() {
        let raw = b"Subject: Hi\r\nContent-Type: text/html\r\n\r\n<p>hi</p>\r\n";
        let message = Message::parse(raw).unwrap();

        assert_eq!(message.subject(), Some("Hi"));
        assert_eq!(message.html_body().unwrap(), "<p>hi</p>\r\n");
    }

    #[test]
    fn test_parse_multipart_without_boundary() {
        let raw = b"Content-Type: multipart/mixed\r\n\r\n--x\r\n\r\nbody\r\n--x--\r\n";
        assert!(matches!(Message::parse(raw), Err(Error::MissingBoundary)));
    }

    #[test]
    fn test_parse_multipart_without_closing_delimiter() {
        let raw = b"Content-Type: multipart/mixed; boundary=x\r\n\r\n--x\r\n\r\nbody\r\n";
        assert!(Message::parse(raw).is_err());
    }
}
