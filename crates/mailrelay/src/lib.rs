//! # mailrelay
//!
//! HTTP to SMTP relay. Callers post an email over HTTP with Basic
//! authentication; the service composes a MIME message and hands it to the
//! configured SMTP server over implicit TLS or STARTTLS.
//!
//! ## Pipeline
//!
//! ```text
//! request ─→ auth::CredentialSet::authorize ─→ compose::compose ─→ Mailer::deliver
//!              (401 on failure)                  (400 on failure)    (500 on failure)
//! ```
//!
//! Configuration is loaded once at start-up ([`config::AppConfig::load`]) and
//! shared read-only through [`api::AppState`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod api;
pub mod auth;
pub mod compose;
pub mod config;
pub mod delivery;

pub use api::{AppState, ResponseEnvelope, router};
pub use auth::{AuthError, CredentialSet, Principal};
pub use compose::{ComposedMessage, CompositionError, MailRequest, SenderDefaults, compose};
pub use config::{AppConfig, ConfigError, TlsMode};
pub use delivery::{DeliveryError, Mailer, SmtpMailer};
