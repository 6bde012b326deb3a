//! Type-state SMTP client.

use super::{ServerInfo, SmtpStream};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::{Address, AuthMechanism, Extension, Reply, ReplyCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::HashSet;
use std::marker::PhantomData;
use tokio_rustls::TlsConnector;

/// Upper bound on lines in one reply, guarding against a server that never ends one.
const MAX_REPLY_LINES: usize = 256;

/// Type-state marker for connected state.
#[derive(Debug)]
pub struct Connected;

/// Type-state marker for authenticated state.
#[derive(Debug)]
pub struct Authenticated;

/// Type-state marker for mail transaction started.
#[derive(Debug)]
pub struct MailTransaction;

/// Type-state marker for recipient added.
#[derive(Debug)]
pub struct RecipientAdded;

/// Type-state marker for data mode.
#[derive(Debug)]
pub struct Data;

/// SMTP client with type-state pattern.
///
/// Every transition consumes the client; on error the stream is dropped,
/// which closes the connection.
#[derive(Debug)]
pub struct Client<State> {
    stream: SmtpStream,
    server_info: ServerInfo,
    client_name: String,
    _state: PhantomData<State>,
}

/// Connection trait for all states.
pub trait SmtpConnection {
    /// Returns the server information.
    fn server_info(&self) -> &ServerInfo;
}

impl<S> SmtpConnection for Client<S> {
    fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }
}

impl Client<Connected> {
    /// Creates a client from a stream and reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the greeting fails or if the server returns an error.
    pub async fn from_stream(mut stream: SmtpStream) -> Result<Self> {
        let greeting = Self::read_reply(&mut stream).await?;
        if greeting.code != ReplyCode::SERVICE_READY {
            return Err(Error::smtp_error(
                greeting.code.as_u16(),
                greeting.message_text(),
            ));
        }

        // First word of the greeting is the server's host name
        let hostname = greeting
            .message
            .first()
            .and_then(|msg| msg.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();
        tracing::debug!(server = %hostname, "Greeting received");

        Ok(Self {
            stream,
            server_info: ServerInfo {
                hostname,
                extensions: HashSet::new(),
            },
            client_name: String::new(),
            _state: PhantomData,
        })
    }

    /// Sends EHLO and discovers server capabilities.
    ///
    /// Falls back to HELO (no extensions) when the server does not recognize
    /// EHLO.
    ///
    /// # Errors
    ///
    /// Returns an error if both greetings are rejected.
    pub async fn ehlo(mut self, client_name: &str) -> Result<Self> {
        self.client_name = client_name.to_string();

        let reply = self
            .send_command(Command::Ehlo {
                hostname: client_name.to_string(),
            })
            .await?;

        if reply.is_success() {
            self.server_info.extensions = parse_extensions(&reply);
            return Ok(self);
        }

        if reply.code != ReplyCode::SYNTAX_ERROR && reply.code != ReplyCode::NOT_IMPLEMENTED {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        tracing::debug!(code = reply.code.as_u16(), "EHLO rejected, falling back to HELO");
        let reply = self
            .send_command(Command::Helo {
                hostname: client_name.to_string(),
            })
            .await?;
        ensure_success(&reply)?;

        self.server_info.extensions = HashSet::new();
        Ok(self)
    }

    /// Upgrades the connection to TLS using STARTTLS, then repeats EHLO.
    ///
    /// # Errors
    ///
    /// Returns an error if STARTTLS is not advertised, the server refuses it,
    /// or the handshake fails (including certificate rejection).
    pub async fn starttls(mut self, connector: &TlsConnector, hostname: &str) -> Result<Self> {
        if !self.server_info.supports_starttls() {
            return Err(Error::NotSupported("STARTTLS".into()));
        }

        let reply = self.send_command(Command::StartTls).await?;
        if reply.code != ReplyCode::SERVICE_READY {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        self.stream = self.stream.upgrade_to_tls(connector, hostname).await?;

        // Capabilities learned in plaintext must be discarded (RFC 3207)
        let client_name = std::mem::take(&mut self.client_name);
        self.server_info.extensions.clear();
        self.ehlo(&client_name).await
    }

    /// Authenticates with the best supported mechanism.
    ///
    /// Uses PLAIN unless the server advertises LOGIN but not PLAIN.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the credentials.
    pub async fn authenticate(self, username: &str, password: &str) -> Result<Client<Authenticated>> {
        let mechanisms = self.server_info.auth_mechanisms();
        if mechanisms.contains(&AuthMechanism::Login) && !mechanisms.contains(&AuthMechanism::Plain) {
            self.auth_login(username, password).await
        } else {
            self.auth_plain(username, password).await
        }
    }

    /// Authenticates using PLAIN mechanism.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication fails.
    pub async fn auth_plain(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<Authenticated>> {
        // PLAIN response: \0username\0password
        let credentials = format!("\0{username}\0{password}");

        let reply = self
            .send_command(Command::Auth {
                mechanism: AuthMechanism::Plain,
                initial_response: Some(STANDARD.encode(credentials.as_bytes())),
            })
            .await?;
        ensure_success(&reply)?;

        Ok(self.transition())
    }

    /// Authenticates using LOGIN mechanism (username and password prompts).
    ///
    /// # Errors
    ///
    /// Returns an error if the server does not prompt as expected or rejects
    /// the credentials.
    pub async fn auth_login(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<Authenticated>> {
        let reply = self
            .send_command(Command::Auth {
                mechanism: AuthMechanism::Login,
                initial_response: None,
            })
            .await?;
        ensure_code(&reply, ReplyCode::AUTH_CONTINUE)?;

        let reply = self
            .send_command(Command::AuthResponse(STANDARD.encode(username.as_bytes())))
            .await?;
        ensure_code(&reply, ReplyCode::AUTH_CONTINUE)?;

        let reply = self
            .send_command(Command::AuthResponse(STANDARD.encode(password.as_bytes())))
            .await?;
        ensure_success(&reply)?;

        Ok(self.transition())
    }

    /// Starts a mail transaction without authentication (if server allows).
    ///
    /// # Errors
    ///
    /// Returns an error if the message exceeds the advertised SIZE or the
    /// MAIL FROM command fails.
    pub async fn mail_from(self, from: Address, size: usize) -> Result<Client<MailTransaction>> {
        self.start_mail(from, size).await
    }
}

impl Client<Authenticated> {
    /// Starts a mail transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the message exceeds the advertised SIZE or the
    /// MAIL FROM command fails.
    pub async fn mail_from(self, from: Address, size: usize) -> Result<Client<MailTransaction>> {
        self.start_mail(from, size).await
    }
}

impl Client<MailTransaction> {
    /// Adds the first recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Client<RecipientAdded>> {
        let reply = self.send_command(Command::RcptTo { to }).await?;
        ensure_success(&reply)?;

        Ok(self.transition())
    }
}

impl Client<RecipientAdded> {
    /// Adds another recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Self> {
        let reply = self.send_command(Command::RcptTo { to }).await?;
        ensure_success(&reply)?;

        Ok(self)
    }

    /// Begins sending message data.
    ///
    /// # Errors
    ///
    /// Returns an error if the DATA command fails.
    pub async fn data(mut self) -> Result<Client<Data>> {
        let reply = self.send_command(Command::Data).await?;
        ensure_code(&reply, ReplyCode::START_DATA)?;

        Ok(self.transition())
    }
}

impl Client<Data> {
    /// Sends the message content and completes the transaction.
    ///
    /// Message should be RFC 5322 formatted. Line endings are normalized to
    /// CRLF, lines starting with `.` are dot-stuffed, and the terminating
    /// `.` line is added automatically.
    ///
    /// # Errors
    ///
    /// Returns an error if sending the message fails or server rejects it.
    pub async fn send_message(mut self, message: &[u8]) -> Result<Client<Connected>> {
        self.stream.write_all(&encode_data(message)).await?;

        let reply = Self::read_reply(&mut self.stream).await?;
        ensure_success(&reply)?;
        tracing::debug!(response = %reply.message_text(), "Message accepted");

        Ok(self.transition())
    }
}

// Common implementation for all states
impl<S> Client<S> {
    fn transition<T>(self) -> Client<T> {
        Client {
            stream: self.stream,
            server_info: self.server_info,
            client_name: self.client_name,
            _state: PhantomData,
        }
    }

    async fn start_mail(mut self, from: Address, size: usize) -> Result<Client<MailTransaction>> {
        let advertises_size = self
            .server_info
            .extensions
            .iter()
            .any(|ext| matches!(ext, Extension::Size(_)));

        if let Some(limit) = self.server_info.max_message_size()
            && size > limit
        {
            return Err(Error::MessageTooLarge { size, limit });
        }

        let reply = self
            .send_command(Command::MailFrom {
                from,
                size: advertises_size.then_some(size),
            })
            .await?;
        ensure_success(&reply)?;

        Ok(self.transition())
    }

    async fn send_command(&mut self, cmd: Command) -> Result<Reply> {
        tracing::trace!(command = cmd.verb(), "C:");
        self.stream.write_all(&cmd.serialize()).await?;
        let reply = Self::read_reply(&mut self.stream).await?;
        tracing::trace!(code = reply.code.as_u16(), "S:");
        Ok(reply)
    }

    async fn read_reply(stream: &mut SmtpStream) -> Result<Reply> {
        let mut lines = Vec::new();
        loop {
            let line = stream.read_line().await?;
            let is_last = is_last_reply_line(&line);
            lines.push(line);

            if is_last {
                break;
            }
            if lines.len() >= MAX_REPLY_LINES {
                return Err(Error::Protocol("Reply has too many lines".into()));
            }
        }

        parse_reply(&lines)
    }

    /// Returns true if the underlying stream is encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.stream.is_tls()
    }

    /// Sends QUIT and closes the connection (available in any state).
    ///
    /// # Errors
    ///
    /// Returns an error if the QUIT command fails.
    pub async fn quit(mut self) -> Result<()> {
        let reply = self.send_command(Command::Quit).await?;
        ensure_success(&reply)
    }
}

fn parse_extensions(reply: &Reply) -> HashSet<Extension> {
    // First line is the server's greeting, not an extension
    reply
        .message
        .iter()
        .skip(1)
        .map(|line| Extension::parse(line))
        .collect()
}

fn ensure_success(reply: &Reply) -> Result<()> {
    if reply.is_success() {
        Ok(())
    } else {
        Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()))
    }
}

fn ensure_code(reply: &Reply, expected: ReplyCode) -> Result<()> {
    if reply.code == expected {
        Ok(())
    } else {
        Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()))
    }
}

/// Prepares message bytes for the DATA phase.
fn encode_data(message: &[u8]) -> Vec<u8> {
    let body = message
        .strip_suffix(b"\r\n")
        .or_else(|| message.strip_suffix(b"\n"))
        .unwrap_or(message);

    let mut buf = Vec::with_capacity(body.len() + body.len() / 64 + 8);
    for line in body.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.first() == Some(&b'.') {
            buf.push(b'.');
        }
        buf.extend_from_slice(line);
        buf.extend_from_slice(b"\r\n");
    }
    buf.extend_from_slice(b".\r\n");
    buf
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_data_normalizes_and_terminates() {
        assert_eq!(encode_data(b"a\nb\r\nc\r\n"), b"a\r\nb\r\nc\r\n.\r\n");
        assert_eq!(encode_data(b"no newline"), b"no newline\r\n.\r\n");
    }

    #[test]
    fn test_encode_data_dot_stuffing() {
        assert_eq!(
            encode_data(b".hidden\r\n..two\r\n.\r\nend"),
            b"..hidden\r\n...two\r\n..\r\nend\r\n.\r\n"
        );
    }

    #[test]
    fn test_parse_extensions_skips_greeting() {
        let reply = Reply::new(
            ReplyCode::OK,
            vec![
                "smtp.example.com Hello".to_string(),
                "AUTH LOGIN".to_string(),
                "SIZE 1000".to_string(),
            ],
        );
        let extensions = parse_extensions(&reply);
        assert_eq!(extensions.len(), 2);
        assert!(extensions.contains(&Extension::Size(Some(1000))));
    }
}
