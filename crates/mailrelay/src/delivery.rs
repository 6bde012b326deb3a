//! Delivery of composed messages to the upstream SMTP server.

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use mailrelay_smtp::connection::{connect, connect_tls};
use mailrelay_smtp::{Address, Client};
use secrecy::ExposeSecret;
use tokio_rustls::TlsConnector;

use crate::compose::ComposedMessage;
use crate::config::{SmtpSettings, TlsMode};

/// Why a delivery attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The server could not be reached or refused the session.
    #[error("Connection failed during {stage}")]
    ConnectionFailure {
        /// Phase that failed.
        stage: &'static str,
        /// Underlying client error.
        #[source]
        source: mailrelay_smtp::Error,
    },

    /// The TLS handshake failed or the certificate was rejected.
    #[error("TLS verification failed during {stage}")]
    TlsVerificationFailure {
        /// Phase that failed.
        stage: &'static str,
        /// Underlying client error.
        #[source]
        source: mailrelay_smtp::Error,
    },

    /// The server rejected the configured credentials.
    #[error("SMTP authentication failed")]
    AuthenticationFailure(#[source] mailrelay_smtp::Error),

    /// The envelope or message was refused.
    #[error("Send failed during {stage}")]
    SendFailure {
        /// Phase that failed.
        stage: &'static str,
        /// Underlying client error.
        #[source]
        source: mailrelay_smtp::Error,
    },

    /// A phase exceeded its time limit.
    #[error("Timed out after {limit:?} during {stage}")]
    Timeout {
        /// Phase that timed out.
        stage: &'static str,
        /// Limit that was exceeded.
        limit: Duration,
    },
}

impl DeliveryError {
    /// Short label used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionFailure { .. } => "connection",
            Self::TlsVerificationFailure { .. } => "tls",
            Self::AuthenticationFailure(_) => "authentication",
            Self::SendFailure { .. } => "send",
            Self::Timeout { .. } => "timeout",
        }
    }

    /// The error and all of its causes, joined with `: `.
    #[must_use]
    pub fn report(&self) -> String {
        let mut report = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            report.push_str(": ");
            report.push_str(&cause.to_string());
            source = cause.source();
        }
        report
    }

    fn connection(stage: &'static str) -> impl FnOnce(mailrelay_smtp::Error) -> Self {
        move |source| match source {
            mailrelay_smtp::Error::Tls(_) | mailrelay_smtp::Error::CertificateRejected(_) => {
                Self::TlsVerificationFailure { stage, source }
            }
            source => Self::ConnectionFailure { stage, source },
        }
    }

    fn send(stage: &'static str) -> impl FnOnce(mailrelay_smtp::Error) -> Self {
        move |source| Self::SendFailure { stage, source }
    }
}

/// Something that can deliver a composed message.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Delivers the message to all of its envelope recipients.
    ///
    /// # Errors
    ///
    /// Returns the first failure; nothing is retried.
    async fn deliver(&self, message: &ComposedMessage) -> Result<(), DeliveryError>;
}

/// Delivers over a fresh SMTP connection per message.
#[derive(Clone)]
pub struct SmtpMailer {
    settings: SmtpSettings,
    connector: TlsConnector,
}

impl SmtpMailer {
    /// Creates a mailer, loading the trusted roots for TLS.
    ///
    /// # Errors
    ///
    /// Returns an error if the extra root certificates cannot be loaded.
    pub fn new(settings: SmtpSettings) -> mailrelay_smtp::Result<Self> {
        let connector = mailrelay_smtp::tls::connector(settings.extra_roots.as_deref())?;
        Ok(Self {
            settings,
            connector,
        })
    }

    async fn send(&self, message: &ComposedMessage) -> Result<(), DeliveryError> {
        let settings = &self.settings;
        let timeouts = settings.timeouts;
        let host = settings.host.as_str();
        let port = settings.effective_port();

        let stream = if settings.tls == TlsMode::Implicit {
            bounded(
                "connect",
                timeouts.connect(),
                connect_tls(&self.connector, host, port),
                DeliveryError::connection("connect"),
            )
            .await?
        } else {
            bounded(
                "connect",
                timeouts.connect(),
                connect(host, port),
                DeliveryError::connection("connect"),
            )
            .await?
        };

        let client = bounded(
            "greeting",
            timeouts.command(),
            Client::from_stream(stream),
            DeliveryError::connection("greeting"),
        )
        .await?;
        let mut client = bounded(
            "ehlo",
            timeouts.command(),
            client.ehlo(&settings.client_name),
            DeliveryError::connection("ehlo"),
        )
        .await?;

        if settings.tls == TlsMode::StartTls {
            client = bounded(
                "starttls",
                timeouts.connect(),
                client.starttls(&self.connector, host),
                DeliveryError::connection("starttls"),
            )
            .await?;
        }

        let sender = Address::new(message.sender.address()).map_err(DeliveryError::send("mail"))?;
        let data = message.to_bytes();

        let client = if settings.username.is_empty() {
            bounded(
                "mail",
                timeouts.command(),
                client.mail_from(sender, data.len()),
                DeliveryError::send("mail"),
            )
            .await?
        } else {
            let client = bounded(
                "auth",
                timeouts.command(),
                client.authenticate(&settings.username, settings.password.expose_secret()),
                DeliveryError::AuthenticationFailure,
            )
            .await?;
            bounded(
                "mail",
                timeouts.command(),
                client.mail_from(sender, data.len()),
                DeliveryError::send("mail"),
            )
            .await?
        };

        let mut recipients = message
            .recipients()
            .map(|mailbox| Address::new(mailbox.address()))
            .collect::<mailrelay_smtp::Result<Vec<_>>>()
            .map_err(DeliveryError::send("rcpt"))?
            .into_iter();

        let first = recipients.next().ok_or_else(|| DeliveryError::SendFailure {
            stage: "rcpt",
            source: mailrelay_smtp::Error::Protocol("No recipients".into()),
        })?;
        let mut client = bounded(
            "rcpt",
            timeouts.command(),
            client.rcpt_to(first),
            DeliveryError::send("rcpt"),
        )
        .await?;
        for recipient in recipients {
            client = bounded(
                "rcpt",
                timeouts.command(),
                client.rcpt_to(recipient),
                DeliveryError::send("rcpt"),
            )
            .await?;
        }

        let client = bounded(
            "data",
            timeouts.command(),
            client.data(),
            DeliveryError::send("data"),
        )
        .await?;
        let client = bounded(
            "message",
            timeouts.data(),
            client.send_message(&data),
            DeliveryError::send("message"),
        )
        .await?;

        // The server has accepted the message; a failed QUIT changes nothing
        match tokio::time::timeout(timeouts.command(), client.quit()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "QUIT failed after message was accepted"),
            Err(_) => tracing::warn!("QUIT timed out after message was accepted"),
        }

        Ok(())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn deliver(&self, message: &ComposedMessage) -> Result<(), DeliveryError> {
        let result = self.send(message).await;

        match &result {
            Ok(()) => tracing::info!(
                host = %self.settings.host,
                message_id = message.message.message_id().unwrap_or_default(),
                recipients = message.recipients().count(),
                "Message delivered"
            ),
            Err(e) => tracing::error!(
                host = %self.settings.host,
                kind = e.kind(),
                error = %e.report(),
                "Delivery failed"
            ),
        }

        result
    }
}

impl fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpMailer")
            .field("host", &self.settings.host)
            .field("port", &self.settings.effective_port())
            .field("tls", &self.settings.tls)
            .finish_non_exhaustive()
    }
}

/// Runs one phase under a time limit, classifying its error.
async fn bounded<T, F, M>(
    stage: &'static str,
    limit: Duration,
    phase: F,
    classify: M,
) -> Result<T, DeliveryError>
where
    F: Future<Output = mailrelay_smtp::Result<T>>,
    M: FnOnce(mailrelay_smtp::Error) -> DeliveryError,
{
    match tokio::time::timeout(limit, phase).await {
        Ok(result) => result.map_err(classify),
        Err(_) => Err(DeliveryError::Timeout { stage, limit }),
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
    fn test_handshake_errors_are_tls_failures() {
        let err = DeliveryError::connection("connect")(mailrelay_smtp::Error::CertificateRejected(
            rustls::CertificateError::Expired,
        ));
        assert_eq!(err.kind(), "tls");

        let err = DeliveryError::connection("connect")(mailrelay_smtp::Error::Protocol(
            "bad".into(),
        ));
        assert_eq!(err.kind(), "connection");
    }

    #[test]
    fn test_report_includes_causes() {
        let err = DeliveryError::AuthenticationFailure(mailrelay_smtp::Error::smtp_error(
            535,
            "5.7.8 Authentication credentials invalid",
        ));
        let report = err.report();
        assert!(report.starts_with("SMTP authentication failed: "));
        assert!(report.contains("535"));
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<(), _> = bounded(
            "greeting",
            Duration::from_millis(10),
            std::future::pending::<mailrelay_smtp::Result<()>>(),
            DeliveryError::connection("greeting"),
        )
        .await;

        assert!(matches!(
            result,
            Err(DeliveryError::Timeout {
                stage: "greeting",
                ..
            })
        ));
    }
}
