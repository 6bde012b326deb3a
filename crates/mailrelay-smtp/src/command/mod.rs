//! SMTP command serialization.

use crate::types::{Address, AuthMechanism};

/// SMTP command.
#[derive(Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO - Basic greeting, used when EHLO is rejected
    Helo {
        /// Client hostname
        hostname: String,
    },
    /// EHLO - Extended greeting
    Ehlo {
        /// Client hostname
        hostname: String,
    },
    /// STARTTLS - Upgrade to TLS
    StartTls,
    /// AUTH - Begin authentication
    Auth {
        /// Authentication mechanism
        mechanism: AuthMechanism,
        /// Initial response (optional, for SASL-IR)
        initial_response: Option<String>,
    },
    /// Bare base64 line answering a 334 challenge
    AuthResponse(String),
    /// MAIL FROM - Start mail transaction
    MailFrom {
        /// Sender address
        from: Address,
        /// SIZE parameter
        size: Option<usize>,
    },
    /// RCPT TO - Add recipient
    RcptTo {
        /// Recipient address
        to: Address,
    },
    /// DATA - Begin message data
    Data,
    /// QUIT - Close connection
    Quit,
}

impl Command {
    /// Serializes the command to bytes, including the trailing CRLF.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let line = match self {
            Self::Helo { hostname } => format!("HELO {hostname}"),
            Self::Ehlo { hostname } => format!("EHLO {hostname}"),
            Self::StartTls => "STARTTLS".to_string(),
            Self::Auth {
                mechanism,
                initial_response: Some(response),
            } => format!("AUTH {} {response}", mechanism.as_str()),
            Self::Auth {
                mechanism,
                initial_response: None,
            } => format!("AUTH {}", mechanism.as_str()),
            Self::AuthResponse(response) => response.clone(),
            Self::MailFrom { from, size: None } => format!("MAIL FROM:<{from}>"),
            Self::MailFrom {
                from,
                size: Some(size),
            } => format!("MAIL FROM:<{from}> SIZE={size}"),
            Self::RcptTo { to } => format!("RCPT TO:<{to}>"),
            Self::Data => "DATA".to_string(),
            Self::Quit => "QUIT".to_string(),
        };

        let mut buf = line.into_bytes();
        buf.extend_from_slice(b"\r\n");
        buf
    }

    /// Returns the verb, for logging without credentials.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Helo { .. } => "HELO",
            Self::Ehlo { .. } => "EHLO",
            Self::StartTls => "STARTTLS",
            Self::Auth { .. } => "AUTH",
            Self::AuthResponse(_) => "AUTH (response)",
            Self::MailFrom { .. } => "MAIL FROM",
            Self::RcptTo { .. } => "RCPT TO",
            Self::Data => "DATA",
            Self::Quit => "QUIT",
        }
    }
}

// Credentials travel in AUTH commands; keep them out of debug output.
impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth { mechanism, .. } => write!(f, "Auth({})", mechanism.as_str()),
            Self::AuthResponse(_) => f.write_str("AuthResponse(<redacted>)"),
            Self::MailFrom { from, size } => write!(f, "MailFrom({from}, {size:?})"),
            Self::RcptTo { to } => write!(f, "RcptTo({to})"),
            Self::Helo { hostname } | Self::Ehlo { hostname } => {
                write!(f, "{}({hostname})", self.verb())
            }
            Self::StartTls | Self::Data | Self::Quit => f.write_str(self.verb()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_commands() {
        let ehlo = Command::Ehlo {
            hostname: "relay.example.com".to_string(),
        };
        assert_eq!(ehlo.serialize(), b"EHLO relay.example.com\r\n");

        let helo = Command::Helo {
            hostname: "relay.example.com".to_string(),
        };
        assert_eq!(helo.serialize(), b"HELO relay.example.com\r\n");
    }

    #[test]
    fn test_auth_commands() {
        let plain = Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some("AHVzZXIAcGFzcw==".to_string()),
        };
        assert_eq!(plain.serialize(), b"AUTH PLAIN AHVzZXIAcGFzcw==\r\n");

        let login = Command::Auth {
            mechanism: AuthMechanism::Login,
            initial_response: None,
        };
        assert_eq!(login.serialize(), b"AUTH LOGIN\r\n");

        let response = Command::AuthResponse("dXNlcg==".to_string());
        assert_eq!(response.serialize(), b"dXNlcg==\r\n");
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let plain = Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some("secret".to_string()),
        };
        assert!(!format!("{plain:?}").contains("secret"));
        assert!(!format!("{:?}", Command::AuthResponse("secret".into())).contains("secret"));
    }

    #[test]
    fn test_envelope_commands() {
        let from = Address::new("sender@example.com").unwrap();
        assert_eq!(
            Command::MailFrom {
                from: from.clone(),
                size: None
            }
            .serialize(),
            b"MAIL FROM:<sender@example.com>\r\n"
        );
        assert_eq!(
            Command::MailFrom {
                from,
                size: Some(12345)
            }
            .serialize(),
            b"MAIL FROM:<sender@example.com> SIZE=12345\r\n"
        );
        assert_eq!(
            Command::RcptTo {
                to: Address::new("rcpt@example.com").unwrap()
            }
            .serialize(),
            b"RCPT TO:<rcpt@example.com>\r\n"
        );
        assert_eq!(Command::Data.serialize(), b"DATA\r\n");
        assert_eq!(Command::Quit.serialize(), b"QUIT\r\n");
    }
}
