//! HTTP Basic authentication against the configured credential set.

use std::collections::HashSet;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Reasons a request fails authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No `Authorization` header was sent.
    #[error("Missing Authorization Header")]
    MissingCredentials,

    /// The header is not `Basic <base64(user:password)>`.
    #[error("Invalid Authorization Header")]
    MalformedCredentials,

    /// The pair is well-formed but not configured.
    #[error("Invalid Username or Password")]
    InvalidCredentials,
}

impl AuthError {
    /// Short label used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "missing",
            Self::MalformedCredentials => "malformed",
            Self::InvalidCredentials => "invalid",
        }
    }
}

/// An authenticated API caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Username from the accepted credentials.
    pub username: String,
}

/// Allowed `user:password` pairs.
///
/// Matching is exact and case-sensitive.
#[derive(Clone, Default)]
pub struct CredentialSet {
    pairs: HashSet<String>,
}

impl CredentialSet {
    /// Creates a set from `user:password` entries.
    pub fn new<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pairs: pairs.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of configured pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns true if no pairs are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Returns true if `username:password` is configured verbatim.
    #[must_use]
    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        self.pairs.contains(&format!("{username}:{password}"))
    }

    /// Validates the value of an `Authorization` header.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] describing why the header was refused.
    pub fn authorize(&self, header: Option<&str>) -> Result<Principal, AuthError> {
        let header = header.ok_or(AuthError::MissingCredentials)?;
        let (username, password) = decode_basic(header)?;

        if self.authenticate(&username, &password) {
            Ok(Principal { username })
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("pairs", &self.pairs.len())
            .finish()
    }
}

/// Splits `Basic <token>` into username and password.
fn decode_basic(header: &str) -> Result<(String, String), AuthError> {
    let (scheme, token) = header
        .trim()
        .split_once(' ')
        .ok_or(AuthError::MalformedCredentials)?;

    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(AuthError::MalformedCredentials);
    }

    let decoded = STANDARD
        .decode(token.trim())
        .map_err(|_| AuthError::MalformedCredentials)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthError::MalformedCredentials)?;

    // Passwords may contain colons, usernames may not
    let (username, password) = decoded
        .split_once(':')
        .ok_or(AuthError::MalformedCredentials)?;

    Ok((username.to_string(), password.to_string()))
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

    fn credentials() -> CredentialSet {
        CredentialSet::new(["service-a:pa55", "service-b:s3:cret"])
    }

    fn basic(pair: &str) -> String {
        format!("Basic {}", STANDARD.encode(pair))
    }

    #[test]
    fn test_authenticate_exact_match() {
        let set = credentials();
        assert!(set.authenticate("service-a", "pa55"));
        assert!(set.authenticate("service-b", "s3:cret"));
    }

    #[test]
    fn test_authenticate_rejects_near_matches() {
        let set = credentials();
        assert!(!set.authenticate("Service-a", "pa55"));
        assert!(!set.authenticate("service-a", "PA55"));
        assert!(!set.authenticate("service-a", "pa5"));
        assert!(!set.authenticate("service-a", "pa555"));
        assert!(!set.authenticate("service", "a:pa55x"));
        assert!(!set.authenticate("", ""));
    }

    #[test]
    fn test_authorize_success() {
        let principal = credentials()
            .authorize(Some(&basic("service-b:s3:cret")))
            .unwrap();
        assert_eq!(principal.username, "service-b");
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        let header = format!("bAsIc {}", STANDARD.encode("service-a:pa55"));
        assert!(credentials().authorize(Some(&header)).is_ok());
    }

    #[test]
    fn test_missing_header() {
        let err = credentials().authorize(None).unwrap_err();
        assert_eq!(err, AuthError::MissingCredentials);
        assert_eq!(err.to_string(), "Missing Authorization Header");
    }

    #[test]
    fn test_malformed_headers() {
        let set = credentials();
        let no_colon = basic("no-colon");
        let not_utf8 = format!("Basic {}", STANDARD.encode([0xff, 0xfe, b':', b'x']));
        for header in [
            "Bearer abc",
            "Basic",
            "Basic !!!not-base64!!!",
            no_colon.as_str(),
            not_utf8.as_str(),
        ] {
            let err = set.authorize(Some(header)).unwrap_err();
            assert_eq!(err, AuthError::MalformedCredentials, "header: {header}");
            assert_eq!(err.to_string(), "Invalid Authorization Header");
        }
    }

    #[test]
    fn test_unknown_credentials() {
        let err = credentials()
            .authorize(Some(&basic("service-a:wrong")))
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
        assert_eq!(err.to_string(), "Invalid Username or Password");
    }

    #[test]
    fn test_debug_hides_pairs() {
        let debug = format!("{:?}", credentials());
        assert!(!debug.contains("pa55"));
        assert!(debug.contains('2'));
    }
}
