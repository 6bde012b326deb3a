//! Error types for SMTP operations.

use std::io;

use crate::types::{ReplyClass, ReplyCode};

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error other than certificate rejection.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// The server certificate was rejected during the handshake.
    #[error("Server certificate rejected: {0}")]
    CertificateRejected(rustls::CertificateError),

    /// TLS configuration could not be built (bad root store, unreadable PEM).
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// Server returned error response.
    #[error("SMTP error {code}: {message}")]
    SmtpError {
        /// Reply code (e.g., 550).
        code: u16,
        /// Error message from server.
        message: String,
    },

    /// Protocol error (unexpected response).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Message larger than the server's advertised SIZE.
    #[error("Message of {size} bytes exceeds server limit of {limit} bytes")]
    MessageTooLarge {
        /// Message size in bytes.
        size: usize,
        /// Advertised limit.
        limit: usize,
    },

    /// Feature not supported by server.
    #[error("Server does not support {0}")]
    NotSupported(String),
}

impl Error {
    /// Creates an SMTP error from a reply code and message.
    #[must_use]
    pub fn smtp_error(code: u16, message: impl Into<String>) -> Self {
        Self::SmtpError {
            code,
            message: message.into(),
        }
    }

    /// Returns the server reply code, if this error came from a reply.
    #[must_use]
    pub const fn reply_code(&self) -> Option<u16> {
        match self {
            Self::SmtpError { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if the server refused with a permanent (5xx) reply.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        self.reply_code()
            .is_some_and(|code| ReplyCode::new(code).class() == ReplyClass::Permanent)
    }

    /// Classifies a handshake failure surfaced by `tokio-rustls` as an I/O error.
    pub(crate) fn from_handshake(err: io::Error) -> Self {
        let Some(inner) = err.get_ref().and_then(|e| e.downcast_ref::<rustls::Error>()) else {
            return Self::Io(err);
        };

        match inner {
            rustls::Error::InvalidCertificate(cert_err) => {
                Self::CertificateRejected(cert_err.clone())
            }
            other => Self::Tls(other.clone()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_code() {
        let err = Error::smtp_error(535, "5.7.8 Authentication failed");
        assert_eq!(err.reply_code(), Some(535));
        assert!(err.is_permanent());
        assert_eq!(Error::Protocol("x".into()).reply_code(), None);
    }

    #[test]
    fn test_handshake_certificate_error_is_classified() {
        let io_err = io::Error::new(
            io::ErrorKind::InvalidData,
            rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer),
        );
        assert!(matches!(
            Error::from_handshake(io_err),
            Error::CertificateRejected(rustls::CertificateError::UnknownIssuer)
        ));
    }

    #[test]
    fn test_handshake_plain_io_error_passes_through() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(Error::from_handshake(io_err), Error::Io(_)));
    }
}
