//! Outgoing message construction.

use crate::address::Mailbox;
use crate::attachment::Attachment;
use crate::content_type::ContentType;
use crate::encoding::encode_quoted_printable;
use crate::error::{Error, Result};
use crate::header::Headers;
use crate::message::{Message, Part, TransferEncoding};
use chrono::{DateTime, FixedOffset, Local};
use uuid::Uuid;

/// Builder for outgoing HTML messages with optional attachments.
///
/// The built message is `multipart/mixed` (HTML part first, then each
/// attachment in insertion order) when attachments are present, or a single
/// `text/html` part otherwise. Bcc recipients never appear in the headers.
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<Mailbox>,
    to: Vec<Mailbox>,
    cc: Vec<Mailbox>,
    subject: String,
    html_body: String,
    attachments: Vec<Attachment>,
    date: Option<DateTime<FixedOffset>>,
    message_id: Option<String>,
}

impl MessageBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sender.
    #[must_use]
    pub fn from(mut self, mailbox: Mailbox) -> Self {
        self.from = Some(mailbox);
        self
    }

    /// Adds a primary recipient.
    #[must_use]
    pub fn to(mut self, mailbox: Mailbox) -> Self {
        self.to.push(mailbox);
        self
    }

    /// Adds a carbon-copy recipient.
    #[must_use]
    pub fn cc(mut self, mailbox: Mailbox) -> Self {
        self.cc.push(mailbox);
        self
    }

    /// Sets the subject (stored verbatim, encoded on output when needed).
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Sets the HTML body.
    #[must_use]
    pub fn html_body(mut self, html: impl Into<String>) -> Self {
        self.html_body = html.into();
        self
    }

    /// Appends an attachment.
    #[must_use]
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Overrides the Date header (defaults to the current local time).
    #[must_use]
    pub const fn date(mut self, date: DateTime<FixedOffset>) -> Self {
        self.date = Some(date);
        self
    }

    /// Overrides the Message-ID (without angle brackets).
    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Builds the message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingHeader`] if no sender or no recipient was set.
    pub fn build(self) -> Result<Message> {
        let from = self
            .from
            .ok_or_else(|| Error::MissingHeader("From".to_string()))?;
        if self.to.is_empty() {
            return Err(Error::MissingHeader("To".to_string()));
        }

        let date = self
            .date
            .unwrap_or_else(|| Local::now().fixed_offset());
        let message_id = self
            .message_id
            .unwrap_or_else(|| format!("{}@{}", Uuid::new_v4().simple(), from.domain()));

        let mut headers = Headers::new();
        headers.add("Date", date.to_rfc2822());
        headers.add("Message-ID", format!("<{message_id}>"));
        headers.add("From", from.to_string());
        headers.add("To", join_mailboxes(&self.to));
        if !self.cc.is_empty() {
            headers.add("Cc", join_mailboxes(&self.cc));
        }
        headers.add("Subject", Headers::encode_value(&self.subject));
        headers.add("MIME-Version", "1.0");

        let html_headers = html_part_headers();
        let html_body = encode_quoted_printable(&self.html_body).into_bytes();

        if self.attachments.is_empty() {
            for (name, value) in html_headers.iter() {
                headers.add(name, value);
            }
            return Ok(Message::single_part(headers, html_body));
        }

        let mut parts = Vec::with_capacity(self.attachments.len() + 1);
        parts.push(Part::new(html_headers, html_body));
        parts.extend(self.attachments.iter().map(Attachment::to_part));

        let boundary = format!("=_mailrelay_{}", Uuid::new_v4().simple());
        Ok(Message::multipart(headers, &boundary, parts))
    }
}

fn html_part_headers() -> Headers {
    let mut headers = Headers::new();
    headers.add("Content-Type", ContentType::text_html().to_string());
    headers.add(
        "Content-Transfer-Encoding",
        TransferEncoding::QuotedPrintable.to_string(),
    );
    headers
}

fn join_mailboxes(mailboxes: &[Mailbox]) -> String {
    mailboxes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
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

    fn base() -> MessageBuilder {
        MessageBuilder::new()
            .from(Mailbox::with_name("Relay", "noreply@example.com").unwrap())
            .to(Mailbox::new("alice@example.org").unwrap())
            .subject("Hello")
            .html_body("<p>Hi Alice</p>")
    }

    #[test]
    fn test_build_requires_from_and_to() {
        let missing_from = MessageBuilder::new().to(Mailbox::new("a@example.com").unwrap());
        assert!(matches!(missing_from.build(), Err(Error::MissingHeader(h)) if h == "From"));

        let missing_to = MessageBuilder::new().from(Mailbox::new("a@example.com").unwrap());
        assert!(matches!(missing_to.build(), Err(Error::MissingHeader(h)) if h == "To"));
    }

    #[test]
    fn test_single_part_html() {
        let message = base().build().unwrap();
        let parsed = Message::parse(&message.to_bytes()).unwrap();

        assert!(!parsed.is_multipart().unwrap());
        assert_eq!(parsed.from(), Some("Relay <noreply@example.com>"));
        assert_eq!(parsed.to(), Some("alice@example.org"));
        assert_eq!(parsed.subject(), Some("Hello"));
        assert_eq!(parsed.headers.get("MIME-Version"), Some("1.0"));
        assert!(parsed.html_body().unwrap().starts_with("<p>Hi Alice</p>"));
        assert_eq!(parsed.attachments().count(), 0);
    }

    #[test]
    fn test_message_id_uses_sender_domain() {
        let message = base().build().unwrap();
        let id = message.message_id().unwrap();
        assert!(id.starts_with('<'));
        assert!(id.ends_with("@example.com>"));
    }

    #[test]
    fn test_fixed_date_and_message_id() {
        let date = DateTime::parse_from_rfc2822("Tue, 15 Jul 2025 10:00:00 +0000").unwrap();
        let message = base().date(date).message_id("abc@example.com").build().unwrap();

        assert_eq!(message.headers.get("Date"), Some("Tue, 15 Jul 2025 10:00:00 +0000"));
        assert_eq!(message.message_id(), Some("<abc@example.com>"));
    }

    #[test]
    fn test_cc_rendered_in_order() {
        let message = base()
            .cc(Mailbox::new("bob@example.org").unwrap())
            .cc(Mailbox::new("carol@example.org").unwrap())
            .build()
            .unwrap();

        assert_eq!(message.cc(), Some("bob@example.org, carol@example.org"));
    }

    #[test]
    fn test_attachments_in_order() {
        let message = base()
            .attach(Attachment::new("a.txt", b"first".to_vec()))
            .attach(Attachment::new("b.bin", vec![0u8, 255]))
            .build()
            .unwrap();

        let parsed = Message::parse(&message.to_bytes()).unwrap();
        assert!(parsed.is_multipart().unwrap());
        assert!(parsed.parts[0].content_type().unwrap().is("text", "html"));

        let attachments: Vec<_> = parsed.attachments().collect();
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].filename().as_deref(), Some("a.txt"));
        assert_eq!(attachments[0].decode_body().unwrap(), b"first");
        assert_eq!(attachments[1].filename().as_deref(), Some("b.bin"));
        assert_eq!(attachments[1].decode_body().unwrap(), vec![0u8, 255]);
    }

    #[test]
    fn test_non_ascii_subject_and_body() {
        let message = base()
            .subject("Grüße aus Köln")
            .html_body("<p>Ünïcödé ✓</p>")
            .build()
            .unwrap();

        let parsed = Message::parse(&message.to_bytes()).unwrap();
        let subject = Headers::decode_value(parsed.subject().unwrap()).unwrap();
        assert_eq!(subject, "Grüße aus Köln");
        assert!(parsed.html_body().unwrap().starts_with("<p>Ünïcödé ✓</p>"));
    }

    #[test]
    fn test_long_subject_without_spaces_keeps_lines_short() {
        let subject = "x".repeat(1500);
        let message = base().subject(subject.clone()).build().unwrap();
        let wire = message.to_bytes();

        let longest = wire.split(|&b| b == b'\n').map(<[u8]>::len).max().unwrap();
        assert!(longest <= 1000, "longest line is {longest} bytes");

        let parsed = Message::parse(&wire).unwrap();
        let decoded = Headers::decode_value(parsed.subject().unwrap()).unwrap();
        assert_eq!(decoded, subject);
    }

    #[test]
    fn test_empty_subject_and_body_allowed() {
        let message = base().subject("").html_body("").build().unwrap();
        assert_eq!(message.subject(), Some(""));
    }
}
