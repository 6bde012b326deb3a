//! File attachments.

use crate::content_type::{ContentDisposition, ContentType, insert_name_parameter};
use crate::encoding::encode_base64_wrapped;
use crate::header::Headers;
use crate::message::{Part, TransferEncoding};
use bytes::Bytes;

/// An attachment: a named binary payload.
///
/// Attachments are always sent as `application/octet-stream` with base64
/// transfer encoding; the payload is never inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    filename: String,
    data: Bytes,
}

impl Attachment {
    /// Creates a new attachment.
    #[must_use]
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }

    /// Returns the filename as supplied by the client.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Returns the raw payload.
    #[must_use]
    pub const fn data(&self) -> &Bytes {
        &self.data
    }

    /// Returns the payload size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true for a zero-byte payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Converts the attachment into an encoded MIME part.
    #[must_use]
    pub fn to_part(&self) -> Part {
        let mut content_type = ContentType::octet_stream();
        insert_name_parameter(&mut content_type.parameters, "name", &self.filename);

        let mut headers = Headers::new();
        headers.add("Content-Type", content_type.to_string());
        headers.add(
            "Content-Disposition",
            ContentDisposition::attachment(&self.filename).to_string(),
        );
        headers.add(
            "Content-Transfer-Encoding",
            TransferEncoding::Base64.to_string(),
        );

        Part::new(headers, encode_base64_wrapped(&self.data).into_bytes())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_to_part_headers() {
        let attachment = Attachment::new("report.pdf", vec![1u8, 2, 3]);
        let part = attachment.to_part();

        let ct = part.content_type().unwrap();
        assert!(ct.is("application", "octet-stream"));
        assert_eq!(ct.parameters.get("name").map(String::as_str), Some("report.pdf"));
        assert_eq!(part.transfer_encoding(), TransferEncoding::Base64);
        assert!(part.is_attachment());
        assert_eq!(part.filename().as_deref(), Some("report.pdf"));
        assert_eq!(part.decode_body().unwrap(), vec![1u8, 2, 3]);
    }

    #[test]
    fn test_empty_payload() {
        let attachment = Attachment::new("empty.bin", Vec::new());
        assert!(attachment.is_empty());

        let part = attachment.to_part();
        assert!(part.decode_body().unwrap().is_empty());
    }

    #[test]
    fn test_large_payload_is_wrapped() {
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let part = Attachment::new("blob.bin", data.clone()).to_part();

        let body = String::from_utf8(part.body.clone()).unwrap();
        assert!(body.split("\r\n").all(|line| line.len() <= 76));
        assert_eq!(part.decode_body().unwrap(), data);
    }

    #[test]
    fn test_non_ascii_filename() {
        let part = Attachment::new("résumé.pdf", b"x".to_vec()).to_part();
        assert_eq!(part.filename().as_deref(), Some("résumé.pdf"));
        assert!(part.headers.get("Content-Type").unwrap().contains("name*=utf-8''"));
    }
}
