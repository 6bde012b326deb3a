//! Service configuration.
//!
//! Settings come from a TOML file layered with `MAILRELAY__`-prefixed
//! environment variables (`MAILRELAY__SMTP__HOST` sets `smtp.host`). The
//! result is validated once at start-up and never mutated afterwards.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat, Map, Source};
use mailrelay_mime::Mailbox;
use secrecy::SecretString;
use serde::Deserialize;

/// Configuration file read when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "mailrelay.toml";

/// Default request body limit (25 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file or environment could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A setting has an unusable value.
    #[error("Invalid setting `{field}`: {reason}")]
    Invalid {
        /// Dotted key of the offending setting.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub http: HttpSettings,
    /// Upstream SMTP server.
    pub smtp: SmtpSettings,
    /// API credentials.
    #[serde(default)]
    pub auth: AuthSettings,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    /// Address to listen on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Largest accepted request body.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Transport security towards the SMTP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// No encryption (not recommended).
    None,
    /// Implicit TLS (connect directly with TLS).
    #[default]
    Implicit,
    /// STARTTLS upgrade after plaintext connect.
    StartTls,
}

impl TlsMode {
    /// Conventional port for the mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::None => 25,
            Self::StartTls => 587,
            Self::Implicit => 465,
        }
    }
}

/// Upstream SMTP server and sender defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpSettings {
    /// Server hostname.
    pub host: String,
    /// Server port (0 means the conventional port for `tls`).
    #[serde(default)]
    pub port: u16,
    /// Username for AUTH. Empty skips authentication.
    #[serde(default)]
    pub username: String,
    /// Password for AUTH.
    #[serde(default = "empty_secret")]
    pub password: SecretString,
    /// Security mode.
    #[serde(default)]
    pub tls: TlsMode,
    /// Sender address used when a request gives none.
    pub from: String,
    /// Sender display name used when a request gives none.
    #[serde(default)]
    pub display_name: String,
    /// Name announced in EHLO/HELO.
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Per-phase time limits.
    #[serde(default)]
    pub timeouts: Timeouts,
    /// PEM file with additional trusted root certificates.
    #[serde(default)]
    pub extra_roots: Option<PathBuf>,
}

impl SmtpSettings {
    /// Port to connect to.
    #[must_use]
    pub const fn effective_port(&self) -> u16 {
        if self.port == 0 {
            self.tls.default_port()
        } else {
            self.port
        }
    }
}

/// Time limits for each SMTP phase, in seconds.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// TCP connect and TLS handshake.
    pub connect_secs: u64,
    /// Each command/reply exchange.
    pub command_secs: u64,
    /// Transmission of the message content.
    pub data_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            command_secs: 30,
            data_secs: 120,
        }
    }
}

impl Timeouts {
    /// Connect and handshake limit.
    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    /// Command limit.
    #[must_use]
    pub const fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    /// Message transfer limit.
    #[must_use]
    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }
}

/// API credentials.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthSettings {
    /// Allowed `user:password` pairs for HTTP Basic authentication.
    #[serde(default)]
    pub basic: Vec<String>,
}

impl AppConfig {
    /// Loads configuration from `path` (or [`DEFAULT_CONFIG_FILE`] if it
    /// exists) and the process environment.
    ///
    /// An explicit path must exist; the default file is optional.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or the result is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
        };
        Self::from_sources(file, environment(None))
    }

    /// Parses configuration from a TOML document, ignoring the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be parsed or is invalid.
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        Self::from_sources(
            File::from_str(toml, FileFormat::Toml),
            environment(Some(Map::new())),
        )
    }

    fn from_sources<S>(file: S, env: Environment) -> Result<Self, ConfigError>
    where
        S: Source + Send + Sync + 'static,
    {
        let config: Self = Config::builder()
            .add_source(file)
            .add_source(env)
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Checks the settings that deserialization cannot.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.max_body_bytes == 0 {
            return Err(ConfigError::invalid(
                "http.max_body_bytes",
                "must be greater than zero",
            ));
        }

        if self.smtp.host.trim().is_empty() {
            return Err(ConfigError::invalid("smtp.host", "SMTP server is required"));
        }

        Mailbox::with_name(self.smtp.display_name.as_str(), self.smtp.from.trim())
            .map_err(|e| ConfigError::invalid("smtp.from", e.to_string()))?;

        if self.smtp.client_name.trim().is_empty() {
            return Err(ConfigError::invalid("smtp.client_name", "must not be empty"));
        }

        let timeouts = &self.smtp.timeouts;
        if timeouts.connect_secs == 0 || timeouts.command_secs == 0 || timeouts.data_secs == 0 {
            return Err(ConfigError::invalid(
                "smtp.timeouts",
                "timeouts must be greater than zero",
            ));
        }

        if let Some(entry) = self.auth.basic.iter().find(|entry| !entry.contains(':')) {
            // Truncated, the entry may be a bare secret
            let user = entry.chars().take(16).collect::<String>();
            return Err(ConfigError::invalid(
                "auth.basic",
                format!("entry starting with '{user}' is not of the form user:password"),
            ));
        }

        Ok(())
    }
}

/// `MAILRELAY__` environment source; `vars` replaces the process
/// environment when given.
fn environment(vars: Option<Map<String, String>>) -> Environment {
    Environment::with_prefix("MAILRELAY")
        .prefix_separator("__")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("auth.basic")
        .try_parsing(true)
        .source(vars)
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

const fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

fn default_client_name() -> String {
    "localhost".to_string()
}

fn empty_secret() -> SecretString {
    SecretString::new(String::new())
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
    use secrecy::ExposeSecret;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [smtp]
        host = "smtp.example.com"
        from = "noreply@example.com"
    "#;

    const FULL: &str = r#"
        [http]
        listen = "127.0.0.1:9000"
        max_body_bytes = 1024

        [smtp]
        host = "smtp.example.com"
        port = 2525
        username = "relay@example.com"
        password = "s3cret"
        tls = "starttls"
        from = "noreply@example.com"
        display_name = "Example"
        client_name = "relay.example.com"
        extra_roots = "/etc/mailrelay/ca.pem"

        [smtp.timeouts]
        connect_secs = 5
        command_secs = 15
        data_secs = 60

        [auth]
        basic = ["service-a:pa55", "service-b:s3:cret"]
    "#;

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_toml(MINIMAL).unwrap();

        assert_eq!(config.http.listen, default_listen());
        assert_eq!(config.http.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
        assert_eq!(config.smtp.tls, TlsMode::Implicit);
        assert_eq!(config.smtp.effective_port(), 465);
        assert_eq!(config.smtp.client_name, "localhost");
        assert!(config.smtp.username.is_empty());
        assert!(config.smtp.password.expose_secret().is_empty());
        assert_eq!(config.smtp.timeouts.command(), Duration::from_secs(30));
        assert!(config.auth.basic.is_empty());
    }

    #[test]
    fn test_full_document() {
        let config = AppConfig::from_toml(FULL).unwrap();

        assert_eq!(config.http.listen.port(), 9000);
        assert_eq!(config.http.max_body_bytes, 1024);
        assert_eq!(config.smtp.tls, TlsMode::StartTls);
        assert_eq!(config.smtp.effective_port(), 2525);
        assert_eq!(config.smtp.password.expose_secret(), "s3cret");
        assert_eq!(config.smtp.display_name, "Example");
        assert_eq!(config.smtp.timeouts.data(), Duration::from_secs(60));
        assert_eq!(
            config.smtp.extra_roots.as_deref(),
            Some(Path::new("/etc/mailrelay/ca.pem"))
        );
        assert_eq!(config.auth.basic, vec!["service-a:pa55", "service-b:s3:cret"]);
    }

    #[test]
    fn test_password_not_in_debug_output() {
        let config = AppConfig::from_toml(FULL).unwrap();
        assert!(!format!("{config:?}").contains("s3cret"));
    }

    #[test]
    fn test_environment_overrides_file() {
        let vars: Map<String, String> = [
            ("MAILRELAY__SMTP__HOST", "mx.internal"),
            ("MAILRELAY__SMTP__PORT", "25"),
            ("MAILRELAY__SMTP__TLS", "none"),
            ("MAILRELAY__AUTH__BASIC", "a:1,b:2"),
            ("UNRELATED", "ignored"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = AppConfig::from_sources(
            File::from_str(MINIMAL, FileFormat::Toml),
            environment(Some(vars)),
        )
        .unwrap();

        assert_eq!(config.smtp.host, "mx.internal");
        assert_eq!(config.smtp.port, 25);
        assert_eq!(config.smtp.tls, TlsMode::None);
        assert_eq!(config.auth.basic, vec!["a:1", "b:2"]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();

        let config = AppConfig::from_sources(
            File::from(file.path()).required(true),
            environment(Some(Map::new())),
        )
        .unwrap();
        assert_eq!(config.smtp.host, "smtp.example.com");
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/mailrelay.toml")));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_missing_smtp_section() {
        let result = AppConfig::from_toml("[http]\nmax_body_bytes = 10\n");
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_unknown_tls_mode() {
        let toml = format!("{MINIMAL}\ntls = \"ssl\"\n");
        assert!(AppConfig::from_toml(&toml).is_err());
    }

    #[test]
    fn test_validation() {
        let cases = [
            ("[smtp]\nhost = \" \"\nfrom = \"a@b.c\"\n", "smtp.host"),
            ("[smtp]\nhost = \"h\"\nfrom = \"not-an-address\"\n", "smtp.from"),
            (
                "[smtp]\nhost = \"h\"\nfrom = \"a@b.c\"\n[auth]\nbasic = [\"nocolon\"]\n",
                "auth.basic",
            ),
            (
                "[smtp]\nhost = \"h\"\nfrom = \"a@b.c\"\n[smtp.timeouts]\ncommand_secs = 0\n",
                "smtp.timeouts",
            ),
            (
                "[http]\nmax_body_bytes = 0\n[smtp]\nhost = \"h\"\nfrom = \"a@b.c\"\n",
                "http.max_body_bytes",
            ),
        ];

        for (toml, expected) in cases {
            match AppConfig::from_toml(toml) {
                Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected invalid {expected}, got {other:?}"),
            }
        }
    }
}
