//! Integration tests for the SMTP client.
//!
//! These tests run the client against a scripted in-process server on
//! `127.0.0.1` so the full command sequence can be checked without a real
//! mail server.

#![allow(clippy::unwrap_used)]

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_test::{assert_err, assert_ok};

use mailrelay_smtp::connection::connect;
use mailrelay_smtp::{Address, Client, Error, SmtpConnection};

/// One exchange the fake server expects.
enum Step {
    /// Expect a command starting with the prefix and answer with the reply.
    Command(&'static str, &'static str),
    /// Read message data up to the terminating dot and answer with the reply.
    Message(&'static str),
}

/// What the fake server saw.
#[derive(Debug, Default)]
struct Transcript {
    commands: Vec<String>,
    data: String,
}

async fn fake_server(script: Vec<Step>) -> (SocketAddr, JoinHandle<Transcript>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut reader = BufReader::new(read);
        let mut transcript = Transcript::default();

        write.write_all(b"220 fake.example.com ESMTP\r\n").await.unwrap();

        for step in script {
            let reply = match step {
                Step::Command(prefix, reply) => {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap() == 0 {
                        break;
                    }
                    let line = line.trim_end().to_string();
                    let matched = line.starts_with(prefix);
                    transcript.commands.push(line);
                    if matched { reply } else { "500 unexpected command" }
                }
                Step::Message(reply) => {
                    loop {
                        let mut line = String::new();
                        if reader.read_line(&mut line).await.unwrap() == 0 || line == ".\r\n" {
                            break;
                        }
                        transcript.data.push_str(&line);
                    }
                    reply
                }
            };
            write.write_all(format!("{reply}\r\n").as_bytes()).await.unwrap();
        }

        transcript
    });

    (addr, handle)
}

async fn connected(addr: SocketAddr) -> Client<mailrelay_smtp::Connected> {
    let stream = assert_ok!(connect("127.0.0.1", addr.port()).await);
    assert_ok!(Client::from_stream(stream).await)
}

const EHLO_PLAIN: &str = "250-fake.example.com\r\n250-AUTH PLAIN LOGIN\r\n250 SIZE 100000";

#[tokio::test]
async fn test_full_transaction_with_plain_auth() {
    let (addr, server) = fake_server(vec![
        Step::Command("EHLO relay.test", EHLO_PLAIN),
        Step::Command("AUTH PLAIN ", "235 2.7.0 Authentication successful"),
        Step::Command("MAIL FROM:<sender@example.com> SIZE=", "250 OK"),
        Step::Command("RCPT TO:<to@example.org>", "250 OK"),
        Step::Command("RCPT TO:<bcc@example.org>", "250 OK"),
        Step::Command("DATA", "354 End data with <CR><LF>.<CR><LF>"),
        Step::Message("250 2.0.0 queued"),
        Step::Command("QUIT", "221 bye"),
    ])
    .await;

    let message = b"Subject: hi\r\n\r\n.leading dot\r\nbody\r\n";
    let client = connected(addr).await;
    assert_eq!(client.server_info().hostname, "fake.example.com");

    let client = assert_ok!(client.ehlo("relay.test").await);
    assert_eq!(client.server_info().max_message_size(), Some(100_000));

    let client = assert_ok!(client.authenticate("user", "pa:ss").await);
    let client = assert_ok!(
        client
            .mail_from(Address::new("sender@example.com").unwrap(), message.len())
            .await
    );
    let client = assert_ok!(client.rcpt_to(Address::new("to@example.org").unwrap()).await);
    let client = assert_ok!(client.rcpt_to(Address::new("bcc@example.org").unwrap()).await);
    let client = assert_ok!(client.data().await);
    let client = assert_ok!(client.send_message(message).await);
    assert_ok!(client.quit().await);

    let transcript = server.await.unwrap();
    // \0user\0pa:ss
    assert_eq!(transcript.commands[1], "AUTH PLAIN AHVzZXIAcGE6c3M=");
    assert_eq!(
        transcript.commands[2],
        format!("MAIL FROM:<sender@example.com> SIZE={}", message.len())
    );
    assert_eq!(transcript.data, "Subject: hi\r\n\r\n..leading dot\r\nbody\r\n");
    assert_eq!(transcript.commands.last().map(String::as_str), Some("QUIT"));
}

#[tokio::test]
async fn test_login_used_when_plain_not_advertised() {
    let (addr, server) = fake_server(vec![
        Step::Command("EHLO", "250-fake.example.com\r\n250 AUTH LOGIN"),
        Step::Command("AUTH LOGIN", "334 VXNlcm5hbWU6"),
        Step::Command("dXNlcg==", "334 UGFzc3dvcmQ6"),
        Step::Command("c2VjcmV0", "235 OK"),
        Step::Command("QUIT", "221 bye"),
    ])
    .await;

    let client = assert_ok!(connected(addr).await.ehlo("relay.test").await);
    let client = assert_ok!(client.authenticate("user", "secret").await);
    assert_ok!(client.quit().await);

    let transcript = server.await.unwrap();
    assert_eq!(
        transcript.commands,
        vec!["EHLO relay.test", "AUTH LOGIN", "dXNlcg==", "c2VjcmV0", "QUIT"]
    );
}

#[tokio::test]
async fn test_helo_fallback_when_ehlo_rejected() {
    let (addr, server) = fake_server(vec![
        Step::Command("EHLO", "502 Command not implemented"),
        Step::Command("HELO relay.test", "250 fake.example.com"),
        Step::Command("MAIL FROM:<sender@example.com>", "250 OK"),
        Step::Command("QUIT", "221 bye"),
    ])
    .await;

    let client = assert_ok!(connected(addr).await.ehlo("relay.test").await);
    assert!(client.server_info().extensions.is_empty());

    let client = assert_ok!(
        client
            .mail_from(Address::new("sender@example.com").unwrap(), 10)
            .await
    );
    assert_ok!(client.quit().await);

    let transcript = server.await.unwrap();
    // No SIZE parameter without the SIZE extension
    assert_eq!(transcript.commands[2], "MAIL FROM:<sender@example.com>");
}

#[tokio::test]
async fn test_size_limit_enforced_before_mail_from() {
    let (addr, server) = fake_server(vec![Step::Command(
        "EHLO",
        "250-fake.example.com\r\n250 SIZE 10",
    )])
    .await;

    let client = assert_ok!(connected(addr).await.ehlo("relay.test").await);
    let result = client
        .mail_from(Address::new("sender@example.com").unwrap(), 11)
        .await;
    assert!(matches!(
        result,
        Err(Error::MessageTooLarge {
            size: 11,
            limit: 10
        })
    ));

    let transcript = server.await.unwrap();
    assert_eq!(transcript.commands, vec!["EHLO relay.test"]);
}

#[tokio::test]
async fn test_rejected_credentials() {
    let (addr, _server) = fake_server(vec![
        Step::Command("EHLO", EHLO_PLAIN),
        Step::Command("AUTH PLAIN", "535 5.7.8 Authentication credentials invalid"),
    ])
    .await;

    let client = assert_ok!(connected(addr).await.ehlo("relay.test").await);
    let err = assert_err!(client.authenticate("user", "wrong").await);
    assert_eq!(err.reply_code(), Some(535));
}

#[tokio::test]
async fn test_starttls_requires_advertisement() {
    let (addr, _server) = fake_server(vec![Step::Command("EHLO", EHLO_PLAIN)]).await;

    let connector = assert_ok!(mailrelay_smtp::tls::connector(None));
    let client = assert_ok!(connected(addr).await.ehlo("relay.test").await);
    let err = assert_err!(client.starttls(&connector, "127.0.0.1").await);
    assert!(matches!(err, Error::NotSupported(_)));
}

#[tokio::test]
async fn test_rejected_recipient() {
    let (addr, _server) = fake_server(vec![
        Step::Command("EHLO", EHLO_PLAIN),
        Step::Command("MAIL FROM", "250 OK"),
        Step::Command("RCPT TO", "550 5.1.1 No such user"),
    ])
    .await;

    let client = assert_ok!(connected(addr).await.ehlo("relay.test").await);
    let client = assert_ok!(
        client
            .mail_from(Address::new("sender@example.com").unwrap(), 10)
            .await
    );
    let err = assert_err!(client.rcpt_to(Address::new("nobody@example.org").unwrap()).await);
    assert!(err.is_permanent());
}

#[tokio::test]
async fn test_server_hangup_is_an_error() {
    // Script ends after the greeting, so the server closes the socket
    let (addr, _server) = fake_server(vec![]).await;

    let client = connected(addr).await;
    assert_err!(client.ehlo("relay.test").await);
}

#[tokio::test]
async fn test_bad_greeting() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket.write_all(b"554 no service\r\n").await.unwrap();
    });

    let stream = assert_ok!(connect("127.0.0.1", addr.port()).await);
    let err = assert_err!(Client::from_stream(stream).await);
    assert_eq!(err.reply_code(), Some(554));
}
