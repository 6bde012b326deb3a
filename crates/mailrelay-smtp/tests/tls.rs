//! TLS handshakes against an in-process server.
//!
//! The server presents a freshly generated self-signed certificate for
//! `localhost`. Trusting it through an extra root file must let both implicit
//! TLS and STARTTLS complete a transaction; without it the handshake must be
//! refused by the certificate verifier.

#![allow(clippy::unwrap_used)]

use std::io::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use rustls::CertificateError;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_test::{assert_err, assert_ok};

use mailrelay_smtp::connection::{connect, connect_tls};
use mailrelay_smtp::{Address, Client, Error, tls};

const HOST: &str = "localhost";
const MESSAGE: &[u8] = b"Subject: Hi\r\n\r\n<p>hi</p>\r\n";

/// Server side of a self-signed identity.
struct Identity {
    acceptor: TlsAcceptor,
    pem: String,
}

fn identity() -> Identity {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec![HOST.to_string()]).unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert.der().clone()], key)
        .unwrap();

    Identity {
        acceptor: TlsAcceptor::from(Arc::new(config)),
        pem: cert.pem(),
    }
}

fn roots_file(pem: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(pem.as_bytes()).unwrap();
    file
}

async fn reply<S: AsyncWrite + Unpin>(stream: &mut S, text: &str) {
    stream.write_all(text.as_bytes()).await.unwrap();
    stream.flush().await.unwrap();
}

/// Answers a plain transaction (EHLO, MAIL, RCPT, DATA, QUIT) and returns
/// the commands it received.
async fn transaction<S>(stream: S, greet: bool) -> Vec<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    if greet {
        reply(stream.get_mut(), "220 fake.example.com ESMTP\r\n").await;
    }

    let mut commands = Vec::new();
    loop {
        let mut line = String::new();
        if stream.read_line(&mut line).await.unwrap() == 0 {
            break;
        }
        let command = line.trim_end().to_string();
        let verb = command
            .split(' ')
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        commands.push(command);

        match verb.as_str() {
            "EHLO" => reply(stream.get_mut(), "250-fake.example.com\r\n250 SIZE 1000000\r\n").await,
            "DATA" => {
                reply(stream.get_mut(), "354 go ahead\r\n").await;
                loop {
                    let mut data = String::new();
                    if stream.read_line(&mut data).await.unwrap() == 0 || data == ".\r\n" {
                        break;
                    }
                }
                reply(stream.get_mut(), "250 queued\r\n").await;
            }
            "QUIT" => {
                reply(stream.get_mut(), "221 bye\r\n").await;
                break;
            }
            _ => reply(stream.get_mut(), "250 ok\r\n").await,
        }
    }

    commands
}

/// Implicit TLS server: handshake first, then the transaction.
async fn implicit_server(acceptor: TlsAcceptor) -> (SocketAddr, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        match acceptor.accept(socket).await {
            Ok(stream) => transaction(stream, true).await,
            Err(_) => Vec::new(),
        }
    });

    (addr, handle)
}

/// STARTTLS server: plaintext greeting and EHLO, upgrade, then the
/// transaction. Returns the commands seen after the upgrade.
async fn starttls_server(acceptor: TlsAcceptor) -> (SocketAddr, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut plain = BufReader::new(socket);
        reply(plain.get_mut(), "220 fake.example.com ESMTP\r\n").await;

        let mut line = String::new();
        plain.read_line(&mut line).await.unwrap();
        assert!(line.starts_with("EHLO "));
        reply(plain.get_mut(), "250-fake.example.com\r\n250 STARTTLS\r\n").await;

        line.clear();
        plain.read_line(&mut line).await.unwrap();
        assert_eq!(line, "STARTTLS\r\n");
        reply(plain.get_mut(), "220 Ready to start TLS\r\n").await;

        match acceptor.accept(plain.into_inner()).await {
            Ok(stream) => transaction(stream, false).await,
            Err(_) => Vec::new(),
        }
    });

    (addr, handle)
}

async fn complete_transaction(client: Client<mailrelay_smtp::Connected>) {
    let client = assert_ok!(
        client
            .mail_from(Address::new("sender@example.com").unwrap(), MESSAGE.len())
            .await
    );
    let client = assert_ok!(client.rcpt_to(Address::new("rcpt@example.org").unwrap()).await);
    let client = assert_ok!(client.data().await);
    let client = assert_ok!(client.send_message(MESSAGE).await);
    assert_ok!(client.quit().await);
}

#[tokio::test]
async fn implicit_tls_with_trusted_root() {
    let identity = identity();
    let roots = roots_file(&identity.pem);
    let (addr, server) = implicit_server(identity.acceptor).await;

    let connector = assert_ok!(tls::connector(Some(roots.path())));
    let stream = assert_ok!(connect_tls(&connector, HOST, addr.port()).await);
    assert!(stream.is_tls());

    let client = assert_ok!(Client::from_stream(stream).await);
    let client = assert_ok!(client.ehlo("relay.test").await);
    assert!(client.is_tls());
    complete_transaction(client).await;

    let commands = server.await.unwrap();
    assert_eq!(commands.first().map(String::as_str), Some("EHLO relay.test"));
    assert_eq!(commands.last().map(String::as_str), Some("QUIT"));
}

#[tokio::test]
async fn implicit_tls_rejects_untrusted_certificate() {
    let identity = identity();
    let (addr, server) = implicit_server(identity.acceptor).await;

    let connector = assert_ok!(tls::connector(None));
    let err = assert_err!(connect_tls(&connector, HOST, addr.port()).await);
    assert!(
        matches!(err, Error::CertificateRejected(CertificateError::UnknownIssuer)),
        "{err:?}"
    );

    assert!(server.await.unwrap().is_empty());
}

#[tokio::test]
async fn implicit_tls_rejects_name_mismatch() {
    let identity = identity();
    let roots = roots_file(&identity.pem);
    let (addr, server) = implicit_server(identity.acceptor).await;

    // Trusted certificate, but issued for localhost rather than the IP
    let connector = assert_ok!(tls::connector(Some(roots.path())));
    let err = assert_err!(connect_tls(&connector, "127.0.0.1", addr.port()).await);
    assert!(
        matches!(
            err,
            Error::CertificateRejected(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
            )
        ),
        "{err:?}"
    );

    assert!(server.await.unwrap().is_empty());
}

#[tokio::test]
async fn starttls_upgrades_and_repeats_ehlo() {
    let identity = identity();
    let roots = roots_file(&identity.pem);
    let (addr, server) = starttls_server(identity.acceptor).await;

    let connector = assert_ok!(tls::connector(Some(roots.path())));
    let stream = assert_ok!(connect(HOST, addr.port()).await);
    let client = assert_ok!(Client::from_stream(stream).await);
    let client = assert_ok!(client.ehlo("relay.test").await);
    assert!(!client.is_tls());

    let client = assert_ok!(client.starttls(&connector, HOST).await);
    assert!(client.is_tls());
    // Capabilities come from the encrypted EHLO, which does not offer STARTTLS
    assert!(!mailrelay_smtp::SmtpConnection::server_info(&client).supports_starttls());
    complete_transaction(client).await;

    let commands = server.await.unwrap();
    assert_eq!(commands.first().map(String::as_str), Some("EHLO relay.test"));
    assert!(commands.iter().any(|c| c.starts_with("MAIL FROM:<sender@example.com>")));
    assert_eq!(commands.last().map(String::as_str), Some("QUIT"));
}

#[tokio::test]
async fn starttls_rejects_untrusted_certificate() {
    let identity = identity();
    let (addr, server) = starttls_server(identity.acceptor).await;

    let connector = assert_ok!(tls::connector(None));
    let stream = assert_ok!(connect(HOST, addr.port()).await);
    let client = assert_ok!(Client::from_stream(stream).await);
    let client = assert_ok!(client.ehlo("relay.test").await);

    let err = assert_err!(client.starttls(&connector, HOST).await);
    assert!(
        matches!(err, Error::CertificateRejected(CertificateError::UnknownIssuer)),
        "{err:?}"
    );

    assert!(server.await.unwrap().is_empty());
}
