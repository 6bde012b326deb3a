//! MIME content type and content disposition handling.

use crate::encoding::{decode_rfc2231, encode_rfc2231};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;

/// MIME content type with parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type (e.g., "text", "application", "multipart").
    pub main_type: String,
    /// Subtype (e.g., "html", "octet-stream", "mixed").
    pub sub_type: String,
    /// Parameters (e.g., charset=utf-8, boundary=xxx).
    pub parameters: BTreeMap<String, String>,
}

impl ContentType {
    /// Creates a new content type.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into(),
            sub_type: sub_type.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Creates a text/plain content type.
    #[must_use]
    pub fn text_plain() -> Self {
        Self::new("text", "plain").with_parameter("charset", "utf-8")
    }

    /// Creates a text/html content type.
    #[must_use]
    pub fn text_html() -> Self {
        Self::new("text", "html").with_parameter("charset", "utf-8")
    }

    /// Creates an application/octet-stream content type.
    #[must_use]
    pub fn octet_stream() -> Self {
        Self::new("application", "octet-stream")
    }

    /// Creates a multipart/mixed content type with boundary.
    #[must_use]
    pub fn multipart_mixed(boundary: impl Into<String>) -> Self {
        Self::new("multipart", "mixed").with_parameter("boundary", boundary)
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Returns the charset parameter if present.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.parameters.get("charset").map(String::as_str)
    }

    /// Returns the boundary parameter if present.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameters.get("boundary").map(String::as_str)
    }

    /// Checks if this is a multipart content type.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type.eq_ignore_ascii_case("multipart")
    }

    /// Checks the type/subtype pair, ignoring case.
    #[must_use]
    pub fn is(&self, main_type: &str, sub_type: &str) -> bool {
        self.main_type.eq_ignore_ascii_case(main_type) && self.sub_type.eq_ignore_ascii_case(sub_type)
    }

    /// Parses a content type string.
    ///
    /// Format: `type/subtype; param1=value1; param2="value 2"`
    ///
    /// # Errors
    ///
    /// Returns an error if the format is invalid.
    pub fn parse(s: &str) -> Result<Self> {
        let (type_str, params) = s.split_once(';').unwrap_or((s, ""));
        let type_str = type_str.trim();
        if type_str.is_empty() {
            return Err(Error::InvalidContentType("Empty content type".to_string()));
        }

        let (main_type, sub_type) = type_str
            .split_once('/')
            .ok_or_else(|| Error::InvalidContentType(format!("Missing subtype: {type_str}")))?;

        let main_type = main_type.trim().to_lowercase();
        let sub_type = sub_type.trim().to_lowercase();
        if main_type.is_empty() || sub_type.is_empty() {
            return Err(Error::InvalidContentType(format!(
                "Malformed type: {type_str}"
            )));
        }

        Ok(Self {
            main_type,
            sub_type,
            parameters: parse_parameters(params),
        })
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let main = &self.main_type;
        let sub = &self.sub_type;
        write!(f, "{main}/{sub}")?;
        write_parameters(f, &self.parameters)
    }
}

/// Content-Disposition header value (RFC 2183).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDisposition {
    /// Disposition type ("inline" or "attachment").
    pub kind: String,
    /// Parameters (e.g., filename).
    pub parameters: BTreeMap<String, String>,
}

impl ContentDisposition {
    /// Creates an attachment disposition with the given filename.
    #[must_use]
    pub fn attachment(filename: &str) -> Self {
        let mut parameters = BTreeMap::new();
        insert_name_parameter(&mut parameters, "filename", filename);
        Self {
            kind: "attachment".to_string(),
            parameters,
        }
    }

    /// Returns true for `attachment` dispositions.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.kind.eq_ignore_ascii_case("attachment")
    }

    /// Returns the decoded filename, preferring the RFC 2231 `filename*` form.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        resolve_name_parameter(&self.parameters, "filename")
    }

    /// Parses a Content-Disposition value.
    ///
    /// # Errors
    ///
    /// Returns an error if the disposition type is missing.
    pub fn parse(s: &str) -> Result<Self> {
        let (kind, params) = s.split_once(';').unwrap_or((s, ""));
        let kind = kind.trim().to_lowercase();
        if kind.is_empty() {
            return Err(Error::Parse("Empty content disposition".to_string()));
        }

        Ok(Self {
            kind,
            parameters: parse_parameters(params),
        })
    }
}

impl fmt::Display for ContentDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        write_parameters(f, &self.parameters)
    }
}

/// Stores a name-like parameter, switching to RFC 2231 form for non-ASCII values.
pub(crate) fn insert_name_parameter(params: &mut BTreeMap<String, String>, key: &str, value: &str) {
    if value.chars().all(|c| c == ' ' || c.is_ascii_graphic()) {
        params.insert(key.to_string(), value.to_string());
    } else {
        params.insert(format!("{key}*"), encode_rfc2231(value));
    }
}

fn resolve_name_parameter(params: &BTreeMap<String, String>, key: &str) -> Option<String> {
    params
        .get(&format!("{key}*"))
        .and_then(|v| decode_rfc2231(v).ok())
        .or_else(|| params.get(key).cloned())
}

/// Parses `; key=value; key="quoted value"` parameter lists.
///
/// Quoted values may contain `;` and backslash escapes.
fn parse_parameters(s: &str) -> BTreeMap<String, String> {
    let mut parameters = BTreeMap::new();
    let mut chars = s.chars().peekable();

    loop {
        // Skip separators
        while chars.peek().is_some_and(|c| *c == ';' || c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && *c != ';') {
            key.push(c);
        }
        let key = key.trim().to_lowercase();

        // Bare tokens without a value are ignored
        if chars.next_if_eq(&'=').is_none() {
            continue;
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => value.push(c),
                }
            }
            // Discard anything up to the next separator
            while chars.peek().is_some_and(|c| *c != ';') {
                chars.next();
            }
        } else {
            while let Some(c) = chars.next_if(|c| *c != ';') {
                value.push(c);
            }
            value = value.trim().to_string();
        }

        if !key.is_empty() {
            parameters.insert(key, value);
        }
    }

    parameters
}

fn write_parameters(f: &mut fmt::Formatter<'_>, parameters: &BTreeMap<String, String>) -> fmt::Result {
    for (key, value) in parameters {
        // Extended values are already escaped
        if key.ends_with('*') {
            write!(f, "; {key}={value}")?;
        } else if value.is_empty()
            || value.contains(|c: char| c.is_whitespace() || "()<>@,;:\\\"/[]?=".contains(c))
        {
            let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
            write!(f, "; {key}=\"{escaped}\"")?;
        } else {
            write!(f, "; {key}={value}")?;
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_new() {
        let ct = ContentType::new("text", "plain");
        assert_eq!(ct.main_type, "text");
        assert_eq!(ct.sub_type, "plain");
        assert!(ct.parameters.is_empty());
    }

    #[test]
    fn test_text_html() {
        let ct = ContentType::text_html();
        assert!(ct.is("text", "html"));
        assert_eq!(ct.charset(), Some("utf-8"));
    }

    #[test]
    fn test_multipart_mixed() {
        let ct = ContentType::multipart_mixed("boundary123");
        assert_eq!(ct.main_type, "multipart");
        assert_eq!(ct.sub_type, "mixed");
        assert_eq!(ct.boundary(), Some("boundary123"));
        assert!(ct.is_multipart());
    }

    #[test]
    fn test_content_type_parse() {
        let ct = ContentType::parse("text/plain; charset=utf-8").unwrap();
        assert_eq!(ct.main_type, "text");
        assert_eq!(ct.sub_type, "plain");
        assert_eq!(ct.charset(), Some("utf-8"));
    }

    #[test]
    fn test_content_type_parse_quoted() {
        let ct = ContentType::parse("multipart/mixed; boundary=\"----=_Part_123\"").unwrap();
        assert_eq!(ct.main_type, "multipart");
        assert_eq!(ct.sub_type, "mixed");
        assert_eq!(ct.boundary(), Some("----=_Part_123"));
    }

    #[test]
    fn test_content_type_parse_rejects_missing_subtype() {
        assert!(ContentType::parse("text").is_err());
        assert!(ContentType::parse("").is_err());
    }

    #[test]
    fn test_content_type_display_quotes_specials() {
        let ct = ContentType::multipart_mixed("=_abc");
        assert_eq!(ct.to_string(), "multipart/mixed; boundary=\"=_abc\"");
    }

    #[test]
    fn test_disposition_ascii_filename() {
        let cd = ContentDisposition::attachment("report 2024.pdf");
        assert_eq!(cd.to_string(), "attachment; filename=\"report 2024.pdf\"");

        let parsed = ContentDisposition::parse(&cd.to_string()).unwrap();
        assert!(parsed.is_attachment());
        assert_eq!(parsed.filename().as_deref(), Some("report 2024.pdf"));
    }

    #[test]
    fn test_disposition_filename_with_semicolon_and_quote() {
        let cd = ContentDisposition::attachment("a;b \"c\".txt");
        let parsed = ContentDisposition::parse(&cd.to_string()).unwrap();
        assert_eq!(parsed.filename().as_deref(), Some("a;b \"c\".txt"));
    }

    #[test]
    fn test_disposition_non_ascii_filename() {
        let cd = ContentDisposition::attachment("Übersicht.xlsx");
        let rendered = cd.to_string();
        assert!(rendered.contains("filename*=utf-8''%C3%9Cbersicht.xlsx"));

        let parsed = ContentDisposition::parse(&rendered).unwrap();
        assert_eq!(parsed.filename().as_deref(), Some("Übersicht.xlsx"));
    }
}
