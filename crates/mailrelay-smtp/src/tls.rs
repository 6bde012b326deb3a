//! Server certificate verification with per-element diagnostics.
//!
//! The TLS handshake is validated by webpki against the Mozilla root store
//! (plus optional extra roots). [`DiagnosticVerifier`] wraps that validation,
//! turns its outcome into a [`CertificateReport`] and asks [`evaluate`] for a
//! [`Verdict`]. The verdict is never more permissive than webpki: anything
//! other than a clean platform result is rejected, with the reason logged.

use crate::error::{Error, Result};
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fmt;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsConnector;

/// Why platform validation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyError {
    /// The server presented no certificate.
    CertificateNotAvailable,
    /// The leaf certificate does not cover the requested host name.
    NameMismatch,
    /// The chain could not be built or one of its elements is invalid.
    ChainErrors,
}

/// Validation status of one certificate in the presented chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    /// Past its `notAfter`.
    Expired,
    /// Before its `notBefore`.
    NotYetValid,
    /// Issuer not found in the root store.
    UnknownIssuer,
    /// Listed as revoked.
    Revoked,
    /// Signature does not verify.
    BadSignature,
    /// Not valid for server authentication.
    InvalidPurpose,
    /// DER could not be parsed.
    Malformed,
    /// Any other validation failure.
    Other(String),
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expired => f.write_str("Expired"),
            Self::NotYetValid => f.write_str("NotYetValid"),
            Self::UnknownIssuer => f.write_str("UnknownIssuer"),
            Self::Revoked => f.write_str("Revoked"),
            Self::BadSignature => f.write_str("BadSignature"),
            Self::InvalidPurpose => f.write_str("InvalidPurpose"),
            Self::Malformed => f.write_str("Malformed"),
            Self::Other(detail) => write!(f, "Other({detail})"),
        }
    }
}

/// One certificate of the presented chain, leaf first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainElement {
    /// Subject distinguished name.
    pub subject: String,
    /// Subject common name, if any.
    pub common_name: Option<String>,
    /// Validity window as Unix seconds (`notBefore`, `notAfter`).
    pub validity: Option<(i64, i64)>,
    /// Problems found for this element; empty when it looks fine.
    pub status: Vec<ChainStatus>,
}

impl ChainElement {
    /// Parses a DER certificate and checks its validity window against `now`.
    #[must_use]
    pub fn from_der(der: &[u8], now: i64) -> Self {
        let Ok((_, cert)) = x509_parser::parse_x509_certificate(der) else {
            return Self {
                subject: "<unparseable certificate>".to_string(),
                common_name: None,
                validity: None,
                status: vec![ChainStatus::Malformed],
            };
        };

        let not_before = cert.validity().not_before.timestamp();
        let not_after = cert.validity().not_after.timestamp();
        let mut status = Vec::new();
        if now > not_after {
            status.push(ChainStatus::Expired);
        } else if now < not_before {
            status.push(ChainStatus::NotYetValid);
        }

        Self {
            subject: cert.subject().to_string(),
            common_name: cert
                .subject()
                .iter_common_name()
                .next()
                .and_then(|cn| cn.as_str().ok())
                .map(str::to_string),
            validity: Some((not_before, not_after)),
            status,
        }
    }
}

/// Everything known about a server certificate at decision time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateReport {
    /// Platform validation failure, `None` when webpki accepted the chain.
    pub policy_error: Option<PolicyError>,
    /// Presented chain, leaf first. Empty when nothing was presented.
    pub chain: Vec<ChainElement>,
}

impl CertificateReport {
    /// Returns the leaf certificate, if one was presented.
    #[must_use]
    pub fn leaf(&self) -> Option<&ChainElement> {
        self.chain.first()
    }

    /// Builds a report from the handshake inputs and the webpki result.
    ///
    /// Per-element status combines each certificate's own validity window
    /// with the webpki error: an unknown issuer is attributed to the top of
    /// the presented chain, other failures to the leaf unless an element
    /// already carries a matching status.
    #[must_use]
    pub fn from_platform(
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        platform: std::result::Result<(), &rustls::Error>,
        now: UnixTime,
    ) -> Self {
        let now = i64::try_from(now.as_secs()).unwrap_or(i64::MAX);
        let mut chain: Vec<ChainElement> = std::iter::once(end_entity)
            .chain(intermediates)
            .map(|der| ChainElement::from_der(der, now))
            .collect();

        let Err(error) = platform else {
            return Self {
                policy_error: None,
                chain,
            };
        };

        let policy_error = match error {
            rustls::Error::NoCertificatesPresented => PolicyError::CertificateNotAvailable,
            rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
            ) => PolicyError::NameMismatch,
            other => {
                let status = chain_status(other);
                let already_flagged = chain.iter().any(|e| e.status.contains(&status));
                let target = if status == ChainStatus::UnknownIssuer {
                    chain.last_mut()
                } else {
                    chain.first_mut()
                };
                if let Some(element) = target.filter(|_| !already_flagged) {
                    element.status.push(status);
                }
                PolicyError::ChainErrors
            }
        };

        Self {
            policy_error: Some(policy_error),
            chain,
        }
    }
}

/// Maps a webpki/rustls error to a chain status.
fn chain_status(error: &rustls::Error) -> ChainStatus {
    let rustls::Error::InvalidCertificate(cert_error) = error else {
        return ChainStatus::Other(error.to_string());
    };

    match cert_error {
        CertificateError::Expired | CertificateError::ExpiredContext { .. } => ChainStatus::Expired,
        CertificateError::NotValidYet | CertificateError::NotValidYetContext { .. } => {
            ChainStatus::NotYetValid
        }
        CertificateError::UnknownIssuer => ChainStatus::UnknownIssuer,
        CertificateError::Revoked => ChainStatus::Revoked,
        CertificateError::BadSignature => ChainStatus::BadSignature,
        CertificateError::InvalidPurpose | CertificateError::InvalidPurposeContext { .. } => {
            ChainStatus::InvalidPurpose
        }
        CertificateError::BadEncoding => ChainStatus::Malformed,
        other => ChainStatus::Other(format!("{other:?}")),
    }
}

/// Reason a certificate was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// No leaf certificate was presented.
    MissingCertificate,
    /// The leaf does not match the host we connected to.
    NameMismatch {
        /// Host name we expected.
        expected: String,
        /// Common name of the presented leaf.
        actual: Option<String>,
    },
    /// The chain failed validation.
    ChainErrors,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCertificate => f.write_str("no server certificate"),
            Self::NameMismatch { expected, actual } => write!(
                f,
                "certificate name mismatch (expected {expected}, got {})",
                actual.as_deref().unwrap_or("<no common name>")
            ),
            Self::ChainErrors => f.write_str("certificate chain errors"),
        }
    }
}

/// Outcome of [`evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Proceed with the handshake.
    Accept,
    /// Abort the handshake.
    Reject(Rejection),
}

impl Verdict {
    /// Returns true for [`Verdict::Accept`].
    #[must_use]
    pub const fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Decides whether to trust a server certificate.
///
/// Accepts only when platform validation reported no error. A name mismatch
/// is rejected even if the chain itself is trusted; chain errors are
/// rejected after logging every element's subject and status.
#[must_use]
pub fn evaluate(report: &CertificateReport, host: &str) -> Verdict {
    let Some(policy_error) = report.policy_error else {
        return Verdict::Accept;
    };

    let Some(leaf) = report.leaf() else {
        tracing::warn!(host, "Server presented no certificate");
        return Verdict::Reject(Rejection::MissingCertificate);
    };

    match policy_error {
        PolicyError::CertificateNotAvailable => {
            tracing::warn!(host, "Server presented no certificate");
            Verdict::Reject(Rejection::MissingCertificate)
        }
        PolicyError::NameMismatch => {
            tracing::warn!(
                expected = host,
                actual = leaf.common_name.as_deref().unwrap_or("<no common name>"),
                subject = %leaf.subject,
                "Certificate name mismatch"
            );
            Verdict::Reject(Rejection::NameMismatch {
                expected: host.to_string(),
                actual: leaf.common_name.clone(),
            })
        }
        PolicyError::ChainErrors => {
            for (depth, element) in report.chain.iter().enumerate() {
                let status = if element.status.is_empty() {
                    "NoError".to_string()
                } else {
                    element
                        .status
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                tracing::warn!(host, depth, subject = %element.subject, %status, "Certificate chain element");
            }
            Verdict::Reject(Rejection::ChainErrors)
        }
    }
}

/// rustls verifier that runs webpki validation, then applies [`evaluate`].
#[derive(Debug)]
pub struct DiagnosticVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl DiagnosticVerifier {
    /// Creates a verifier over the given roots.
    ///
    /// # Errors
    ///
    /// Returns an error if the root store is empty or unusable.
    pub fn new(roots: RootCertStore, provider: Arc<CryptoProvider>) -> Result<Self> {
        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|e| Error::TlsConfig(e.to_string()))?;
        Ok(Self { inner })
    }
}

impl ServerCertVerifier for DiagnosticVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let platform =
            self.inner
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now);

        let report = CertificateReport::from_platform(
            end_entity,
            intermediates,
            platform.as_ref().map(|_| ()),
            now,
        );

        match evaluate(&report, &server_name.to_str()) {
            Verdict::Accept => platform,
            Verdict::Reject(rejection) => Err(platform
                .err()
                .unwrap_or_else(|| rustls::Error::General(rejection.to_string()))),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Loads the Mozilla roots plus any PEM certificates from `extra_roots`.
///
/// # Errors
///
/// Returns an error if the PEM file cannot be read, holds no certificates,
/// or holds a certificate webpki cannot use as a trust anchor.
pub fn root_store(extra_roots: Option<&Path>) -> Result<RootCertStore> {
    let mut roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    if let Some(path) = extra_roots {
        let file = std::fs::File::open(path)
            .map_err(|e| Error::TlsConfig(format!("{}: {e}", path.display())))?;

        let mut added = 0usize;
        for cert in rustls_pemfile::certs(&mut BufReader::new(file)) {
            let cert = cert.map_err(|e| Error::TlsConfig(format!("{}: {e}", path.display())))?;
            roots
                .add(cert)
                .map_err(|e| Error::TlsConfig(format!("{}: {e}", path.display())))?;
            added += 1;
        }

        if added == 0 {
            return Err(Error::TlsConfig(format!(
                "{}: no certificates found",
                path.display()
            )));
        }
        tracing::debug!(path = %path.display(), added, "Loaded extra root certificates");
    }

    Ok(roots)
}

/// Builds a TLS connector that validates servers with [`DiagnosticVerifier`].
///
/// # Errors
///
/// Returns an error if the root store or client configuration cannot be built.
pub fn connector(extra_roots: Option<&Path>) -> Result<TlsConnector> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let verifier = DiagnosticVerifier::new(root_store(extra_roots)?, Arc::clone(&provider))?;

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
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
    use std::io::Write as _;

    fn element(cn: &str, status: Vec<ChainStatus>) -> ChainElement {
        ChainElement {
            subject: format!("CN={cn}"),
            common_name: Some(cn.to_string()),
            validity: Some((0, i64::MAX)),
            status,
        }
    }

    fn report(policy_error: Option<PolicyError>, chain: Vec<ChainElement>) -> CertificateReport {
        CertificateReport {
            policy_error,
            chain,
        }
    }

    #[test]
    fn accepts_when_platform_is_clean() {
        let report = report(None, vec![element("smtp.example.com", vec![])]);
        assert_eq!(evaluate(&report, "smtp.example.com"), Verdict::Accept);
    }

    #[test]
    fn rejects_missing_leaf() {
        let report = report(Some(PolicyError::ChainErrors), vec![]);
        assert_eq!(
            evaluate(&report, "smtp.example.com"),
            Verdict::Reject(Rejection::MissingCertificate)
        );
    }

    #[test]
    fn rejects_name_mismatch_even_with_trusted_chain() {
        let report = report(
            Some(PolicyError::NameMismatch),
            vec![element("other.example.net", vec![]), element("Root CA", vec![])],
        );
        assert_eq!(
            evaluate(&report, "smtp.example.com"),
            Verdict::Reject(Rejection::NameMismatch {
                expected: "smtp.example.com".to_string(),
                actual: Some("other.example.net".to_string()),
            })
        );
    }

    #[test]
    fn rejects_chain_errors() {
        let report = report(
            Some(PolicyError::ChainErrors),
            vec![
                element("smtp.example.com", vec![ChainStatus::Expired]),
                element("Intermediate", vec![]),
            ],
        );
        assert_eq!(
            evaluate(&report, "smtp.example.com"),
            Verdict::Reject(Rejection::ChainErrors)
        );
    }

    #[test]
    fn never_accepts_any_platform_error() {
        for policy_error in [
            PolicyError::CertificateNotAvailable,
            PolicyError::NameMismatch,
            PolicyError::ChainErrors,
        ] {
            let report = report(Some(policy_error), vec![element("smtp.example.com", vec![])]);
            assert!(!evaluate(&report, "smtp.example.com").is_accept());
        }
    }

    #[test]
    fn report_from_garbage_der_is_malformed() {
        let der = CertificateDer::from(vec![1u8, 2, 3]);
        let error = rustls::Error::InvalidCertificate(CertificateError::BadEncoding);
        let report = CertificateReport::from_platform(&der, &[], Err(&error), UnixTime::now());

        assert_eq!(report.policy_error, Some(PolicyError::ChainErrors));
        assert_eq!(report.chain.len(), 1);
        // Malformed already flagged by parsing, not duplicated
        assert_eq!(report.chain[0].status, vec![ChainStatus::Malformed]);
    }

    #[test]
    fn report_attributes_unknown_issuer_to_top_of_chain() {
        let leaf = CertificateDer::from(vec![1u8]);
        let intermediate = CertificateDer::from(vec![2u8]);
        let error = rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer);
        let report = CertificateReport::from_platform(
            &leaf,
            &[intermediate],
            Err(&error),
            UnixTime::now(),
        );

        assert!(!report.chain[0].status.contains(&ChainStatus::UnknownIssuer));
        assert!(report.chain[1].status.contains(&ChainStatus::UnknownIssuer));
    }

    #[test]
    fn report_maps_name_errors() {
        let der = CertificateDer::from(vec![1u8]);
        let error = rustls::Error::InvalidCertificate(CertificateError::NotValidForName);
        let report = CertificateReport::from_platform(&der, &[], Err(&error), UnixTime::now());
        assert_eq!(report.policy_error, Some(PolicyError::NameMismatch));
    }

    #[test]
    fn report_without_error_has_no_policy_error() {
        let der = CertificateDer::from(vec![1u8]);
        let report = CertificateReport::from_platform(&der, &[], Ok(()), UnixTime::now());
        assert_eq!(report.policy_error, None);
        assert!(evaluate(&report, "smtp.example.com").is_accept());
    }

    #[test]
    fn verifier_rejects_what_webpki_rejects() {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let verifier = DiagnosticVerifier::new(root_store(None).unwrap(), provider).unwrap();
        let server_name = ServerName::try_from("smtp.example.com").unwrap();

        let result = verifier.verify_server_cert(
            &CertificateDer::from(vec![0x30, 0x03, 0x02, 0x01, 0x01]),
            &[],
            &server_name,
            &[],
            UnixTime::now(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn root_store_includes_mozilla_roots() {
        assert!(!root_store(None).unwrap().is_empty());
    }

    #[test]
    fn root_store_rejects_missing_or_empty_pem() {
        assert!(root_store(Some(Path::new("/nonexistent/roots.pem"))).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not a certificate\n").unwrap();
        assert!(matches!(root_store(Some(file.path())), Err(Error::TlsConfig(_))));
    }

    #[test]
    fn connector_builds_with_default_roots() {
        assert!(connector(None).is_ok());
    }
}
