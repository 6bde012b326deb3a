//! Envelope addresses.

use crate::error::{Error, Result};

/// Address used in `MAIL FROM` and `RCPT TO`.
///
/// Only the `local@domain` form is accepted. Characters that would break the
/// command line (whitespace, control characters, angle brackets) are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new envelope address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is empty, has no single `@` separating
    /// non-empty parts, or contains characters not allowed on a command line.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();

        if addr.chars().any(|c| c.is_whitespace() || c.is_control() || c == '<' || c == '>') {
            return Err(Error::InvalidAddress(format!(
                "Address contains forbidden characters: {addr:?}"
            )));
        }

        match addr.rsplit_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
                Ok(Self(addr))
            }
            _ => Err(Error::InvalidAddress(format!("Not an addr-spec: {addr:?}"))),
        }
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
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
    fn test_valid_address() {
        let addr = Address::new("user@example.com").unwrap();
        assert_eq!(addr.as_str(), "user@example.com");
        assert_eq!(addr.to_string(), "user@example.com");
    }

    #[test]
    fn test_quoted_local_part_with_at() {
        assert!(Address::new("\"a@b\"@example.com").is_ok());
    }

    #[test]
    fn test_rejects_malformed() {
        for input in ["", "userexample.com", "@example.com", "user@", "a@b@"] {
            assert!(Address::new(input).is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn test_rejects_command_injection() {
        assert!(Address::new("a@example.com>\r\nRCPT TO:<b@example.com").is_err());
        assert!(Address::new("a b@example.com").is_err());
    }
}
