//! SMTP connection management with type-state pattern.

mod client;
mod stream;

pub use client::{
    Authenticated, Client, Connected, Data, MailTransaction, RecipientAdded, SmtpConnection,
};
pub use stream::{SmtpStream, connect, connect_tls};

use crate::types::{AuthMechanism, Extension};
use std::collections::HashSet;

/// Server capabilities from EHLO response.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Server hostname from greeting.
    pub hostname: String,
    /// Supported extensions.
    pub extensions: HashSet<Extension>,
}

impl ServerInfo {
    /// Checks if the server supports an extension.
    #[must_use]
    pub fn supports(&self, ext: &Extension) -> bool {
        self.extensions.contains(ext)
    }

    /// Checks if STARTTLS is supported.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.supports(&Extension::StartTls)
    }

    /// Returns the maximum message size, if a non-zero limit is advertised.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::Size(Some(limit)) if *limit > 0 => Some(*limit),
            _ => None,
        })
    }

    /// Returns advertised authentication mechanisms this client supports.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<AuthMechanism> {
        self.extensions
            .iter()
            .find_map(|ext| match ext {
                Extension::Auth(mechanisms) => Some(mechanisms.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_info_queries() {
        let info = ServerInfo {
            hostname: "smtp.example.com".to_string(),
            extensions: [
                Extension::StartTls,
                Extension::Size(Some(1024)),
                Extension::Auth(vec![AuthMechanism::Login]),
            ]
            .into_iter()
            .collect(),
        };

        assert!(info.supports_starttls());
        assert_eq!(info.max_message_size(), Some(1024));
        assert_eq!(info.auth_mechanisms(), vec![AuthMechanism::Login]);
    }

    #[test]
    fn test_server_info_defaults() {
        let info = ServerInfo::default();
        assert!(!info.supports_starttls());
        assert_eq!(info.max_message_size(), None);
        assert!(info.auth_mechanisms().is_empty());
    }
}
