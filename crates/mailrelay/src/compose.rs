//! Turns an API request into a message ready for delivery.

use mailrelay_mime::{Attachment, Mailbox, Message, MessageBuilder};
use serde::Deserialize;

use crate::config::SmtpSettings;

/// Errors raised while composing a message.
#[derive(Debug, thiserror::Error)]
pub enum CompositionError {
    /// An address field does not hold exactly one valid mailbox.
    #[error("invalid {field} address '{value}'")]
    InvalidAddress {
        /// Request field name.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// A required field was absent.
    #[error("missing required field '{0}'")]
    MissingRequiredField(&'static str),

    /// The message could not be generated.
    #[error("failed to build message: {0}")]
    Build(#[from] mailrelay_mime::Error),
}

/// An email as submitted to the API.
///
/// The JSON form uses camelCase names; PascalCase names (as sent by form
/// posts) and `htmlBody` are accepted as aliases.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailRequest {
    /// Sender address overriding the configured default.
    #[serde(default, alias = "From")]
    pub from: Option<String>,
    /// Sender display name overriding the configured default.
    #[serde(default, alias = "DisplayName")]
    pub display_name: Option<String>,
    /// Primary recipient.
    #[serde(default, alias = "To")]
    pub to: Option<String>,
    /// Carbon-copy recipient.
    #[serde(default, alias = "Cc")]
    pub cc: Option<String>,
    /// Blind carbon-copy recipient.
    #[serde(default, alias = "Bcc")]
    pub bcc: Option<String>,
    /// Subject line.
    #[serde(default, alias = "Subject")]
    pub subject: Option<String>,
    /// HTML body.
    #[serde(
        default,
        rename = "mailMessage",
        alias = "MailMessage",
        alias = "htmlBody",
        alias = "HtmlBody"
    )]
    pub html_body: Option<String>,
    /// Files to attach, in order.
    #[serde(skip)]
    pub attachments: Vec<Attachment>,
}

/// Sender used when a request does not name one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderDefaults {
    /// Sender address.
    pub from: String,
    /// Sender display name.
    pub display_name: String,
}

impl From<&SmtpSettings> for SenderDefaults {
    fn from(settings: &SmtpSettings) -> Self {
        Self {
            from: settings.from.trim().to_string(),
            display_name: settings.display_name.clone(),
        }
    }
}

/// A rendered message and its SMTP envelope.
#[derive(Debug, Clone)]
pub struct ComposedMessage {
    /// Envelope sender (also the `From` header).
    pub sender: Mailbox,
    /// Primary recipients.
    pub to: Vec<Mailbox>,
    /// Carbon-copy recipients.
    pub cc: Vec<Mailbox>,
    /// Blind carbon-copy recipients (envelope only).
    pub bcc: Vec<Mailbox>,
    /// The generated message.
    pub message: Message,
}

impl ComposedMessage {
    /// All envelope recipients: to, then cc, then bcc.
    pub fn recipients(&self) -> impl Iterator<Item = &Mailbox> {
        self.to.iter().chain(&self.cc).chain(&self.bcc)
    }

    /// The message as RFC 5322 bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.message.to_bytes()
    }
}

/// Builds a message from a request, filling in the sender defaults.
///
/// Blank `cc` and `bcc` mean no such recipient. Subject and body are used
/// verbatim and may be empty.
///
/// # Errors
///
/// Fails if `to`, `subject` or the body is absent, or if any address does
/// not parse. Nothing is partially built on failure.
pub fn compose(
    request: MailRequest,
    defaults: &SenderDefaults,
) -> Result<ComposedMessage, CompositionError> {
    let from = non_blank(request.from.as_deref()).unwrap_or(&defaults.from);
    let display_name =
        non_blank(request.display_name.as_deref()).unwrap_or(&defaults.display_name);
    let sender = Mailbox::with_name(display_name, from.trim()).map_err(|_| {
        CompositionError::InvalidAddress {
            field: "from",
            value: from.to_string(),
        }
    })?;

    let to = request
        .to
        .as_deref()
        .ok_or(CompositionError::MissingRequiredField("to"))?;
    let to = parse_mailbox("to", to)?;
    let cc = non_blank(request.cc.as_deref())
        .map(|cc| parse_mailbox("cc", cc))
        .transpose()?;
    let bcc = non_blank(request.bcc.as_deref())
        .map(|bcc| parse_mailbox("bcc", bcc))
        .transpose()?;

    let subject = request
        .subject
        .ok_or(CompositionError::MissingRequiredField("subject"))?;
    let html_body = request
        .html_body
        .ok_or(CompositionError::MissingRequiredField("mailMessage"))?;

    let mut builder = MessageBuilder::new()
        .from(sender.clone())
        .to(to.clone())
        .subject(subject)
        .html_body(html_body);
    if let Some(cc) = &cc {
        builder = builder.cc(cc.clone());
    }
    for attachment in request.attachments {
        builder = builder.attach(attachment);
    }

    Ok(ComposedMessage {
        sender,
        to: vec![to],
        cc: cc.into_iter().collect(),
        bcc: bcc.into_iter().collect(),
        message: builder.build()?,
    })
}

fn parse_mailbox(field: &'static str, value: &str) -> Result<Mailbox, CompositionError> {
    Mailbox::parse(value).map_err(|_| CompositionError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
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

    fn defaults() -> SenderDefaults {
        SenderDefaults {
            from: "noreply@example.com".to_string(),
            display_name: "Example".to_string(),
        }
    }

    fn request(to: &str) -> MailRequest {
        MailRequest {
            to: Some(to.to_string()),
            subject: Some("Hi".to_string()),
            html_body: Some("<p>hi</p>".to_string()),
            ..MailRequest::default()
        }
    }

    fn rendered(composed: &ComposedMessage) -> Message {
        Message::parse(&composed.to_bytes()).unwrap()
    }

    #[test]
    fn test_uses_defaults() {
        let composed = compose(request("a@example.com"), &defaults()).unwrap();

        assert_eq!(composed.sender.address(), "noreply@example.com");
        assert_eq!(composed.sender.name.as_deref(), Some("Example"));
        assert_eq!(composed.recipients().count(), 1);

        let message = rendered(&composed);
        assert_eq!(message.from(), Some("Example <noreply@example.com>"));
        assert_eq!(message.to(), Some("a@example.com"));
        assert_eq!(message.subject(), Some("Hi"));
        assert_eq!(message.html_body().unwrap(), "<p>hi</p>");
        assert_eq!(message.attachments().count(), 0);
    }

    #[test]
    fn test_request_overrides_sender() {
        let mut req = request("a@example.com");
        req.from = Some("alerts@example.org".to_string());
        req.display_name = Some("Alerts".to_string());

        let composed = compose(req, &defaults()).unwrap();
        assert_eq!(composed.sender.address(), "alerts@example.org");
        assert_eq!(composed.sender.name.as_deref(), Some("Alerts"));
    }

    #[test]
    fn test_blank_overrides_fall_back() {
        let mut req = request("a@example.com");
        req.from = Some("   ".to_string());
        req.display_name = Some(String::new());

        let composed = compose(req, &defaults()).unwrap();
        assert_eq!(composed.sender.address(), "noreply@example.com");
        assert_eq!(composed.sender.name.as_deref(), Some("Example"));
    }

    #[test]
    fn test_invalid_to() {
        for to in ["", "   ", "not-an-address", "a@b@c", "a@example.com, b@example.com"] {
            let err = compose(request(to), &defaults()).unwrap_err();
            assert!(
                matches!(err, CompositionError::InvalidAddress { field: "to", .. }),
                "to: {to:?}"
            );
        }
    }

    #[test]
    fn test_missing_fields() {
        let mut req = request("a@example.com");
        req.to = None;
        assert!(matches!(
            compose(req, &defaults()),
            Err(CompositionError::MissingRequiredField("to"))
        ));

        let mut req = request("a@example.com");
        req.subject = None;
        assert!(matches!(
            compose(req, &defaults()),
            Err(CompositionError::MissingRequiredField("subject"))
        ));

        let mut req = request("a@example.com");
        req.html_body = None;
        assert!(matches!(
            compose(req, &defaults()),
            Err(CompositionError::MissingRequiredField("mailMessage"))
        ));
    }

    #[test]
    fn test_empty_subject_and_body_allowed() {
        let mut req = request("a@example.com");
        req.subject = Some(String::new());
        req.html_body = Some(String::new());
        assert!(compose(req, &defaults()).is_ok());
    }

    #[test]
    fn test_long_subject_stays_within_line_limit() {
        let mut req = request("a@example.com");
        req.subject = Some("x".repeat(1500));

        let composed = compose(req, &defaults()).unwrap();
        let wire = composed.to_bytes();
        let longest = wire.split(|&b| b == b'\n').map(<[u8]>::len).max().unwrap();
        assert!(longest <= 1000, "longest line is {longest} bytes");
    }

    #[test]
    fn test_cc_and_bcc() {
        let mut req = request("a@example.com");
        req.cc = Some("Carol <carol@example.com>".to_string());
        req.bcc = Some("bob@example.com".to_string());

        let composed = compose(req, &defaults()).unwrap();
        let recipients: Vec<_> = composed.recipients().map(Mailbox::address).collect();
        assert_eq!(
            recipients,
            vec!["a@example.com", "carol@example.com", "bob@example.com"]
        );

        let message = rendered(&composed);
        assert_eq!(message.cc(), Some("Carol <carol@example.com>"));
        let raw = String::from_utf8(composed.to_bytes()).unwrap();
        assert!(!raw.contains("bob@example.com"));
    }

    #[test]
    fn test_blank_cc_and_bcc_are_ignored() {
        let mut req = request("a@example.com");
        req.cc = Some(" ".to_string());
        req.bcc = Some(String::new());

        let composed = compose(req, &defaults()).unwrap();
        assert!(composed.cc.is_empty());
        assert!(composed.bcc.is_empty());
        assert_eq!(rendered(&composed).cc(), None);
    }

    #[test]
    fn test_malformed_cc_fails_whole_request() {
        let mut req = request("a@example.com");
        req.cc = Some("nope".to_string());
        assert!(matches!(
            compose(req, &defaults()),
            Err(CompositionError::InvalidAddress { field: "cc", .. })
        ));

        let mut req = request("a@example.com");
        req.bcc = Some("nope@".to_string());
        assert!(matches!(
            compose(req, &defaults()),
            Err(CompositionError::InvalidAddress { field: "bcc", .. })
        ));
    }

    #[test]
    fn test_attachments_in_order() {
        let mut req = request("a@example.com");
        req.attachments = vec![
            Attachment::new("report.pdf", vec![1u8, 2, 3]),
            Attachment::new("notes.txt", b"hello".to_vec()),
        ];

        let composed = compose(req, &defaults()).unwrap();
        let message = rendered(&composed);
        let attachments: Vec<_> = message.attachments().collect();

        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].filename().as_deref(), Some("report.pdf"));
        assert_eq!(attachments[0].decode_body().unwrap(), vec![1u8, 2, 3]);
        assert_eq!(attachments[1].filename().as_deref(), Some("notes.txt"));
        assert_eq!(attachments[1].decode_body().unwrap(), b"hello");
        assert_eq!(message.html_body().unwrap(), "<p>hi</p>");
    }

    #[test]
    fn test_json_field_names() {
        let camel: MailRequest = serde_json::from_str(
            r#"{"to":"a@example.com","displayName":"D","subject":"S","mailMessage":"<b>x</b>"}"#,
        )
        .unwrap();
        assert_eq!(camel.display_name.as_deref(), Some("D"));
        assert_eq!(camel.html_body.as_deref(), Some("<b>x</b>"));

        let pascal: MailRequest = serde_json::from_str(
            r#"{"To":"a@example.com","DisplayName":"D","Subject":"S","htmlBody":"<b>y</b>"}"#,
        )
        .unwrap();
        assert_eq!(pascal.to.as_deref(), Some("a@example.com"));
        assert_eq!(pascal.html_body.as_deref(), Some("<b>y</b>"));
    }
}
