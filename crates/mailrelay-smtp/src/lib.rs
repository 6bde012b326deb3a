//! # mailrelay-smtp
//!
//! SMTP client used by the mailrelay service to hand messages to an
//! upstream submission server.
//!
//! ## Features
//!
//! - **Type-state connection management**: Compile-time enforcement of valid
//!   SMTP state transitions
//! - **Protocol**: EHLO (with HELO fallback), STARTTLS, AUTH PLAIN/LOGIN,
//!   MAIL FROM with SIZE, RCPT TO, DATA with dot-stuffing, QUIT
//! - **TLS**: Implicit TLS (port 465) and STARTTLS, both validated by
//!   [`tls::DiagnosticVerifier`]
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailrelay_smtp::{Address, Client, tls};
//! use mailrelay_smtp::connection::connect;
//!
//! #[tokio::main]
//! async fn main() -> mailrelay_smtp::Result<()> {
//!     let connector = tls::connector(None)?;
//!     let stream = connect("smtp.example.com", 587).await?;
//!
//!     let client = Client::from_stream(stream).await?
//!         .ehlo("relay.example.com").await?
//!         .starttls(&connector, "smtp.example.com").await?
//!         .authenticate("user@example.com", "password").await?;
//!
//!     let message = b"Subject: Test\r\n\r\nHello, World!\r\n";
//!     let client = client
//!         .mail_from(Address::new("sender@example.com")?, message.len()).await?
//!         .rcpt_to(Address::new("recipient@example.com")?).await?
//!         .data().await?
//!         .send_message(message).await?;
//!
//!     client.quit().await
//! }
//! ```
//!
//! ## Connection States
//!
//! ```text
//! ┌──────────────┐
//! │  Connected   │ ─── authenticate() ───→ Authenticated
//! └──────────────┘                               │
//!        │                                       │
//!        └─── mail_from() ───→ MailTransaction ←─┘
//!                                   │
//!                rcpt_to() ───→ RecipientAdded ─── data() ───→ Data
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod tls;
pub mod types;

pub use connection::{
    Authenticated, Client, Connected, Data, MailTransaction, RecipientAdded, ServerInfo,
    SmtpConnection,
};
pub use error::{Error, Result};
pub use types::{Address, AuthMechanism, Extension, Reply, ReplyClass, ReplyCode};
