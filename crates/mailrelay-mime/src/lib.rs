//! # mailrelay-mime
//!
//! MIME message generation and inspection for the mailrelay service.
//!
//! ## Features
//!
//! - **Mailboxes**: RFC 5322 mailbox parsing with display names
//! - **Message generation**: HTML messages with binary attachments
//! - **Message parsing**: Enough structure to inspect what was generated
//! - **Encoding/Decoding**: Base64, Quoted-Printable, RFC 2047 and RFC 2231
//!
//! ## Quick Start
//!
//! ### Building Messages
//!
//! ```ignore
//! use mailrelay_mime::{Attachment, Mailbox, MessageBuilder};
//!
//! let message = MessageBuilder::new()
//!     .from(Mailbox::with_name("Relay", "noreply@example.com")?)
//!     .to(Mailbox::parse("alice@example.org")?)
//!     .subject("Quarterly report")
//!     .html_body("<p>See attached.</p>")
//!     .attach(Attachment::new("report.pdf", pdf_bytes))
//!     .build()?; // Creates multipart/mixed
//!
//! let wire = message.to_bytes();
//! ```
//!
//! ### Inspecting Messages
//!
//! ```ignore
//! use mailrelay_mime::Message;
//!
//! let message = Message::parse(&wire)?;
//! println!("Subject: {}", message.subject().unwrap_or("(no subject)"));
//! for attachment in message.attachments() {
//!     println!("{:?}: {} bytes", attachment.filename(), attachment.decode_body()?.len());
//! }
//! ```
//!
//! ### Encoding/Decoding
//!
//! ```ignore
//! use mailrelay_mime::encoding::{encode_base64, decode_base64, encode_rfc2047};
//!
//! let encoded = encode_base64(b"Hello, World!");
//! let decoded = decode_base64(&encoded)?;
//!
//! let subject = encode_rfc2047("Héllo", "utf-8");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod address;
mod attachment;
mod builder;
mod content_type;
mod error;
mod header;
mod message;

pub mod encoding;

pub use address::Mailbox;
pub use attachment::Attachment;
pub use builder::MessageBuilder;
pub use content_type::{ContentDisposition, ContentType};
pub use error::{Error, Result};
pub use header::Headers;
pub use message::{Message, Part, TransferEncoding};
