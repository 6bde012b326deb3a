//! Mailbox parsing and formatting (RFC 5322 `mailbox`).

use crate::encoding::{decode_rfc2047, encode_rfc2047};
use crate::error::{Error, Result};
use std::fmt;

/// Characters that force a display name into a quoted string.
const SPECIALS: &str = "()<>[]:;@\\,.\"";

/// A mailbox: optional display name plus an `addr-spec`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Display name (optional).
    pub name: Option<String>,
    address: String,
}

impl Mailbox {
    /// Creates a mailbox from a bare address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn new(address: impl Into<String>) -> Result<Self> {
        let address = address.into();
        validate_addr_spec(&address)?;
        Ok(Self {
            name: None,
            address,
        })
    }

    /// Creates a mailbox with a display name.
    ///
    /// An empty or whitespace-only name is treated as no name.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn with_name(name: impl Into<String>, address: impl Into<String>) -> Result<Self> {
        let mut mailbox = Self::new(address)?;
        let name = name.into();
        if !name.trim().is_empty() {
            mailbox.name = Some(name);
        }
        Ok(mailbox)
    }

    /// Parses a single mailbox.
    ///
    /// Accepts `local@domain`, `<local@domain>` and
    /// `Display Name <local@domain>` (display name may be quoted or RFC 2047
    /// encoded). Lists of several mailboxes are rejected.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly one valid mailbox.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::InvalidAddress("Address cannot be empty".into()));
        }

        let Some(open) = find_unquoted(input, '<') else {
            return Self::new(input);
        };

        let Some(inner) = input[open + 1..].strip_suffix('>') else {
            return Err(Error::InvalidAddress(format!(
                "Unterminated angle address: {input}"
            )));
        };

        let name = parse_display_name(input[..open].trim())?;
        let mut mailbox = Self::new(inner.trim())?;
        mailbox.name = name;
        Ok(mailbox)
    }

    /// Returns the address (`local@domain`).
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the domain part of the address.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.address
            .rsplit_once('@')
            .map_or(self.address.as_str(), |(_, domain)| domain)
    }
}

impl fmt::Display for Mailbox {
    /// Formats the mailbox for use in a header, encoding the display name
    /// when needed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(name) = self.name.as_deref() else {
            return write!(f, "{}", self.address);
        };

        if !name.is_ascii() || name.contains(|c: char| c.is_ascii_control()) {
            write!(f, "{} <{}>", encode_rfc2047(name, "utf-8"), self.address)
        } else if name.contains(|c| SPECIALS.contains(c)) {
            let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
            write!(f, "\"{escaped}\" <{}>", self.address)
        } else {
            write!(f, "{name} <{}>", self.address)
        }
    }
}

/// Finds `needle` outside of double-quoted sections.
fn find_unquoted(s: &str, needle: char) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == needle && !in_quotes => return Some(i),
            _ => {}
        }
    }

    None
}

fn parse_display_name(raw: &str) -> Result<Option<String>> {
    if raw.is_empty() {
        return Ok(None);
    }

    let name = if let Some(quoted) = raw.strip_prefix('"') {
        let quoted = quoted
            .strip_suffix('"')
            .ok_or_else(|| Error::InvalidAddress(format!("Unterminated quoted name: {raw}")))?;

        let mut unescaped = String::with_capacity(quoted.len());
        let mut chars = quoted.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                unescaped.extend(chars.next());
            } else {
                unescaped.push(c);
            }
        }
        unescaped
    } else {
        if raw.contains(['@', ',', ';', '<', '>']) {
            return Err(Error::InvalidAddress(format!(
                "Invalid display name: {raw}"
            )));
        }
        decode_rfc2047(raw)?
    };

    Ok((!name.trim().is_empty()).then_some(name))
}

/// Validates an `addr-spec` (`local-part@domain`).
fn validate_addr_spec(addr: &str) -> Result<()> {
    if addr.is_empty() {
        return Err(Error::InvalidAddress("Address cannot be empty".into()));
    }

    if addr.chars().any(|c| c.is_whitespace() || c.is_control()) && !addr.starts_with('"') {
        return Err(Error::InvalidAddress(format!(
            "Address contains whitespace: {addr}"
        )));
    }

    let (local, domain) = addr
        .rsplit_once('@')
        .ok_or_else(|| Error::InvalidAddress(format!("Address must contain @: {addr}")))?;

    if local.is_empty() || domain.is_empty() {
        return Err(Error::InvalidAddress(
            "Local and domain parts cannot be empty".into(),
        ));
    }

    validate_local_part(local)?;
    validate_domain(domain)
}

fn validate_local_part(local: &str) -> Result<()> {
    if let Some(quoted) = local.strip_prefix('"') {
        let body = quoted
            .strip_suffix('"')
            .ok_or_else(|| Error::InvalidAddress(format!("Unterminated quoted local part: {local}")))?;
        if body.chars().any(char::is_control) {
            return Err(Error::InvalidAddress(format!("Invalid local part: {local}")));
        }
        return Ok(());
    }

    let invalid_char = local
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || "()<>[]:;@\\,\"".contains(c));
    if invalid_char || local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return Err(Error::InvalidAddress(format!("Invalid local part: {local}")));
    }

    Ok(())
}

fn validate_domain(domain: &str) -> Result<()> {
    // Address literal, e.g. [192.0.2.1]
    if let Some(literal) = domain.strip_prefix('[') {
        return match literal.strip_suffix(']') {
            Some(inner) if !inner.is_empty() && !inner.contains(['[', ']', '\\']) => Ok(()),
            _ => Err(Error::InvalidAddress(format!("Invalid domain literal: {domain}"))),
        };
    }

    for label in domain.split('.') {
        let valid = !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_alphanumeric() || c == '-');
        if !valid {
            return Err(Error::InvalidAddress(format!("Invalid domain: {domain}")));
        }
    }

    Ok(())
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
    fn test_parse_bare_address() {
        let mailbox = Mailbox::parse("user@example.com").unwrap();
        assert_eq!(mailbox.address(), "user@example.com");
        assert!(mailbox.name.is_none());
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let mailbox = Mailbox::parse("  user@example.com \t").unwrap();
        assert_eq!(mailbox.address(), "user@example.com");
    }

    #[test]
    fn test_parse_name_addr() {
        let mailbox = Mailbox::parse("John Doe <john@example.com>").unwrap();
        assert_eq!(mailbox.name.as_deref(), Some("John Doe"));
        assert_eq!(mailbox.address(), "john@example.com");
    }

    #[test]
    fn test_parse_quoted_name() {
        let mailbox = Mailbox::parse("\"Doe, John <Sales>\" <john@example.com>").unwrap();
        assert_eq!(mailbox.name.as_deref(), Some("Doe, John <Sales>"));
        assert_eq!(mailbox.address(), "john@example.com");
    }

    #[test]
    fn test_parse_angle_only() {
        let mailbox = Mailbox::parse("<john@example.com>").unwrap();
        assert!(mailbox.name.is_none());
    }

    #[test]
    fn test_parse_encoded_name() {
        let mailbox = Mailbox::parse("=?utf-8?B?SMOpbGxv?= <h@example.com>").unwrap();
        assert_eq!(mailbox.name.as_deref(), Some("Héllo"));
    }

    #[test]
    fn test_parse_rejects_invalid() {
        for input in [
            "",
            "   ",
            "userexample.com",
            "@example.com",
            "user@",
            "user@@example.com",
            "us er@example.com",
            "a@example.com, b@example.com",
            "John <john@example.com",
            "user@exa mple.com",
            "user@example..com",
            "user@-example.com",
            ".user@example.com",
            "us..er@example.com",
        ] {
            assert!(Mailbox::parse(input).is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn test_parse_accepts_edge_cases() {
        for input in [
            "user+tag@example.com",
            "user@localhost",
            "user@[192.0.2.1]",
            "\"john doe\"@example.com",
            "jörg@bücher.example",
        ] {
            assert!(Mailbox::parse(input).is_ok(), "rejected {input:?}");
        }
    }

    #[test]
    fn test_with_name_blank_is_none() {
        let mailbox = Mailbox::with_name("  ", "a@example.com").unwrap();
        assert!(mailbox.name.is_none());
    }

    #[test]
    fn test_domain() {
        let mailbox = Mailbox::new("user@mail.example.com").unwrap();
        assert_eq!(mailbox.domain(), "mail.example.com");
    }

    #[test]
    fn test_display() {
        let plain = Mailbox::new("a@example.com").unwrap();
        assert_eq!(plain.to_string(), "a@example.com");

        let named = Mailbox::with_name("Alice", "a@example.com").unwrap();
        assert_eq!(named.to_string(), "Alice <a@example.com>");

        let quoted = Mailbox::with_name("Smith, Alice", "a@example.com").unwrap();
        assert_eq!(quoted.to_string(), "\"Smith, Alice\" <a@example.com>");

        let encoded = Mailbox::with_name("Zoë", "z@example.com").unwrap();
        assert!(encoded.to_string().starts_with("=?utf-8?B?"));
        assert_eq!(Mailbox::parse(&encoded.to_string()).unwrap(), encoded);
    }
}
