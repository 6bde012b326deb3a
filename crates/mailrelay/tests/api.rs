//! End-to-end tests for the HTTP API.
//!
//! The service runs on `127.0.0.1:0` and is driven with `reqwest`. Most tests
//! use a recording mailer; the SMTP tests point the real mailer at a scripted
//! in-process server.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_test::{assert_err, assert_ok};

use mailrelay::api::{EMAIL_PATH, EMAIL_WITHOUT_ATTACHMENT_PATH};
use mailrelay::{
    AppConfig, AppState, ComposedMessage, DeliveryError, MailRequest, Mailer, ResponseEnvelope,
    SenderDefaults, SmtpMailer, compose, router,
};
use mailrelay_mime::Message;

const USER: &str = "client";
const PASSWORD: &str = "s3:cret";

/// Mailer that records messages instead of sending them.
#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<ComposedMessage>>,
    calls: AtomicUsize,
}

impl RecordingMailer {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn sent(&self) -> Vec<ComposedMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn deliver(&self, message: &ComposedMessage) -> Result<(), DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Mailer whose delivery panics, standing in for any unexpected bug.
struct PanickingMailer;

#[async_trait]
impl Mailer for PanickingMailer {
    async fn deliver(&self, _message: &ComposedMessage) -> Result<(), DeliveryError> {
        panic!("mailer exploded");
    }
}

fn config(smtp_port: u16, smtp_username: &str) -> AppConfig {
    AppConfig::from_toml(&format!(
        r#"
        [http]
        max_body_bytes = 65536

        [smtp]
        host = "127.0.0.1"
        port = {smtp_port}
        username = "{smtp_username}"
        password = "upstream-password"
        tls = "none"
        from = "noreply@example.com"
        display_name = "Relay"
        client_name = "relay.test"

        [smtp.timeouts]
        connect_secs = 5
        command_secs = 5
        data_secs = 5

        [auth]
        basic = ["{USER}:{PASSWORD}"]
        "#
    ))
    .unwrap()
}

async fn spawn_service(config: &AppConfig, mailer: Arc<dyn Mailer>) -> String {
    let state = Arc::new(AppState::new(config, mailer));
    let app = router(state, config.http.max_body_bytes);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    format!("http://{addr}")
}

async fn recording_service() -> (String, Arc<RecordingMailer>) {
    let mailer = Arc::new(RecordingMailer::default());
    let base = spawn_service(&config(25, ""), mailer.clone()).await;
    (base, mailer)
}

async fn post_json(
    base: &str,
    auth: Option<(&str, &str)>,
    body: serde_json::Value,
) -> (StatusCode, ResponseEnvelope) {
    let mut request = reqwest::Client::new()
        .post(format!("{base}{EMAIL_WITHOUT_ATTACHMENT_PATH}"))
        .json(&body);
    if let Some((user, password)) = auth {
        request = request.basic_auth(user, Some(password));
    }

    let response = assert_ok!(request.send().await);
    let status = response.status();
    (status, assert_ok!(response.json().await))
}

fn simple_email() -> serde_json::Value {
    serde_json::json!({
        "to": "a@example.com",
        "subject": "Hi",
        "mailMessage": "<p>hi</p>",
    })
}

#[tokio::test]
async fn test_authorized_json_request_is_delivered() {
    let (base, mailer) = recording_service().await;

    let (status, envelope) = post_json(&base, Some((USER, PASSWORD)), simple_email()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(envelope, ResponseEnvelope::sent());

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipients().count(), 1);
    assert_eq!(sent[0].sender.address(), "noreply@example.com");

    let message = Message::parse(&sent[0].to_bytes()).unwrap();
    assert_eq!(message.to(), Some("a@example.com"));
    assert_eq!(message.subject(), Some("Hi"));
    assert_eq!(message.html_body().unwrap(), "<p>hi</p>");
    assert_eq!(message.attachments().count(), 0);
}

#[tokio::test]
async fn test_missing_authorization() {
    let (base, mailer) = recording_service().await;

    let (status, envelope) = post_json(&base, None, simple_email()).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(!envelope.succeeded);
    assert_eq!(envelope.code, 401);
    assert_eq!(envelope.message, "Missing Authorization Header");
    assert_eq!(mailer.calls(), 0);
}

#[tokio::test]
async fn test_wrong_password() {
    let (base, mailer) = recording_service().await;

    let (status, envelope) = post_json(&base, Some((USER, "s3:CRET")), simple_email()).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(envelope.message, "Invalid Username or Password");
    assert_eq!(mailer.calls(), 0);
}

#[tokio::test]
async fn test_malformed_authorization() {
    let (base, mailer) = recording_service().await;

    let response = reqwest::Client::new()
        .post(format!("{base}{EMAIL_WITHOUT_ATTACHMENT_PATH}"))
        .header("Authorization", "Bearer abc")
        .json(&simple_email())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let envelope: ResponseEnvelope = response.json().await.unwrap();
    assert_eq!(envelope.message, "Invalid Authorization Header");
    assert_eq!(mailer.calls(), 0);
}

#[tokio::test]
async fn test_authentication_checked_before_body() {
    let (base, _mailer) = recording_service().await;

    let response = reqwest::Client::new()
        .post(format!("{base}{EMAIL_WITHOUT_ATTACHMENT_PATH}"))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_empty_recipient_is_rejected() {
    let (base, mailer) = recording_service().await;

    let (status, envelope) = post_json(
        &base,
        Some((USER, PASSWORD)),
        serde_json::json!({ "to": "", "subject": "Hi", "mailMessage": "<p>hi</p>" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!envelope.succeeded);
    assert!(
        envelope
            .message
            .starts_with("Invalid request: invalid to address")
    );
    assert_eq!(mailer.calls(), 0);
}

#[tokio::test]
async fn test_malformed_cc_is_rejected() {
    let (base, mailer) = recording_service().await;

    let mut body = simple_email();
    body["cc"] = serde_json::json!("not-an-address");
    let (status, envelope) = post_json(&base, Some((USER, PASSWORD)), body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(envelope.message.contains("invalid cc address"));
    assert_eq!(mailer.calls(), 0);
}

#[tokio::test]
async fn test_invalid_json_body() {
    let (base, mailer) = recording_service().await;

    let response = reqwest::Client::new()
        .post(format!("{base}{EMAIL_WITHOUT_ATTACHMENT_PATH}"))
        .basic_auth(USER, Some(PASSWORD))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let envelope: ResponseEnvelope = response.json().await.unwrap();
    assert!(envelope.message.starts_with("Invalid request: "));
    assert_eq!(mailer.calls(), 0);
}

#[tokio::test]
async fn test_body_limit() {
    let (base, mailer) = recording_service().await;

    let mut body = simple_email();
    body["mailMessage"] = serde_json::json!("x".repeat(100_000));
    let (status, envelope) = post_json(&base, Some((USER, PASSWORD)), body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!envelope.succeeded);
    assert_eq!(mailer.calls(), 0);
}

#[tokio::test]
async fn test_multipart_with_attachments() {
    let (base, mailer) = recording_service().await;

    let form = Form::new()
        .text("to", "a@example.com")
        .text("DisplayName", "Reports")
        .text("SUBJECT", "Monthly report")
        .text("MailMessage", "<p>see attached</p>")
        .text("Bcc", "audit@example.com")
        .part(
            "Attachments",
            Part::bytes(b"%PDF-1.4".to_vec()).file_name("report.pdf"),
        )
        .part(
            "Attachments",
            Part::bytes(vec![0u8, 1, 2, 255]).file_name("data.bin"),
        );

    let response = reqwest::Client::new()
        .post(format!("{base}{EMAIL_PATH}"))
        .basic_auth(USER, Some(PASSWORD))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let envelope: ResponseEnvelope = response.json().await.unwrap();
    assert!(envelope.succeeded);

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].sender.name.as_deref(), Some("Reports"));
    assert_eq!(sent[0].bcc.len(), 1);

    let message = Message::parse(&sent[0].to_bytes()).unwrap();
    let attachments: Vec<_> = message.attachments().collect();
    assert_eq!(attachments.len(), 2);
    assert_eq!(attachments[0].filename().as_deref(), Some("report.pdf"));
    assert_eq!(attachments[0].decode_body().unwrap(), b"%PDF-1.4");
    assert_eq!(attachments[1].filename().as_deref(), Some("data.bin"));
    assert_eq!(attachments[1].decode_body().unwrap(), vec![0u8, 1, 2, 255]);
}

#[tokio::test]
async fn test_multipart_requires_authorization() {
    let (base, mailer) = recording_service().await;

    let form = Form::new().text("To", "a@example.com");
    let response = reqwest::Client::new()
        .post(format!("{base}{EMAIL_PATH}"))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(mailer.calls(), 0);
}

#[tokio::test]
async fn test_multipart_missing_subject() {
    let (base, mailer) = recording_service().await;

    let form = Form::new()
        .text("To", "a@example.com")
        .text("MailMessage", "<p>x</p>");
    let response = reqwest::Client::new()
        .post(format!("{base}{EMAIL_PATH}"))
        .basic_auth(USER, Some(PASSWORD))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let envelope: ResponseEnvelope = response.json().await.unwrap();
    assert_eq!(
        envelope.message,
        "Invalid request: missing required field 'subject'"
    );
    assert_eq!(mailer.calls(), 0);
}

#[tokio::test]
async fn test_unknown_route() {
    let (base, _mailer) = recording_service().await;

    let response = reqwest::Client::new()
        .get(format!("{base}/api/v2/email"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let envelope: ResponseEnvelope = response.json().await.unwrap();
    assert!(!envelope.succeeded);
}

/// Scripted SMTP peer. Answers by verb; AUTH gets `auth_reply`.
async fn fake_smtp(auth_reply: &'static str) -> (u16, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut reader = BufReader::new(read);
        let mut commands = Vec::new();

        write.write_all(b"220 fake.example.com ESMTP\r\n").await.unwrap();

        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            let line = line.trim_end().to_string();
            let verb = line
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_ascii_uppercase();
            commands.push(line);

            let reply = match verb.as_str() {
                "EHLO" => "250-fake.example.com\r\n250-AUTH PLAIN LOGIN\r\n250 SIZE 1000000",
                "AUTH" => auth_reply,
                "DATA" => {
                    write.write_all(b"354 go ahead\r\n").await.unwrap();
                    loop {
                        let mut data = String::new();
                        if reader.read_line(&mut data).await.unwrap() == 0 || data == ".\r\n" {
                            break;
                        }
                    }
                    "250 queued"
                }
                "QUIT" => {
                    write.write_all(b"221 bye\r\n").await.unwrap();
                    break;
                }
                _ => "250 OK",
            };
            write
                .write_all(format!("{reply}\r\n").as_bytes())
                .await
                .unwrap();
        }

        commands
    });

    (port, handle)
}

#[tokio::test]
async fn test_smtp_authentication_failure_is_internal_error() {
    let (port, server) = fake_smtp("535 5.7.8 Authentication credentials invalid").await;
    let config = config(port, "relay@example.com");
    let mailer = assert_ok!(SmtpMailer::new(config.smtp.clone()));
    let base = spawn_service(&config, Arc::new(mailer)).await;

    let (status, envelope) = post_json(&base, Some((USER, PASSWORD)), simple_email()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!envelope.succeeded);
    assert_eq!(envelope.code, 500);
    assert_eq!(envelope.message, "Internal server error.");
    assert_eq!(envelope.errors, Some(Vec::new()));
    assert_eq!(envelope.data, None);

    let commands = server.await.unwrap();
    assert!(commands.iter().any(|c| c.starts_with("AUTH PLAIN")));
    assert!(!commands.iter().any(|c| c.starts_with("MAIL FROM")));
}

#[tokio::test]
async fn test_smtp_delivery_over_plaintext() {
    let (port, server) = fake_smtp("235 OK").await;
    let config = config(port, "relay@example.com");
    let mailer = assert_ok!(SmtpMailer::new(config.smtp.clone()));
    let base = spawn_service(&config, Arc::new(mailer)).await;

    let mut body = simple_email();
    body["cc"] = serde_json::json!("c@example.com");
    body["bcc"] = serde_json::json!("b@example.com");
    let (status, envelope) = post_json(&base, Some((USER, PASSWORD)), body).await;

    assert_eq!(status, StatusCode::OK);
    assert!(envelope.succeeded);

    let commands = server.await.unwrap();
    let envelope_commands: Vec<_> = commands
        .iter()
        .filter(|c| c.starts_with("MAIL") || c.starts_with("RCPT"))
        .map(String::as_str)
        .collect();
    assert_eq!(envelope_commands.len(), 4);
    assert!(envelope_commands[0].starts_with("MAIL FROM:<noreply@example.com> SIZE="));
    assert_eq!(
        &envelope_commands[1..],
        &[
            "RCPT TO:<a@example.com>",
            "RCPT TO:<c@example.com>",
            "RCPT TO:<b@example.com>"
        ]
    );
    assert_eq!(commands.first().map(String::as_str), Some("EHLO relay.test"));
    assert_eq!(commands.last().map(String::as_str), Some("QUIT"));
}

#[tokio::test]
async fn test_unreachable_smtp_server() {
    // Bind then drop to get a port nobody listens on
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = config(port, "");
    let mailer = Arc::new(assert_ok!(SmtpMailer::new(config.smtp.clone())));
    let base = spawn_service(&config, mailer.clone()).await;

    let (status, envelope) = post_json(&base, Some((USER, PASSWORD)), simple_email()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(envelope.message, "Internal server error.");

    let request: MailRequest = assert_ok!(serde_json::from_value(simple_email()));
    let message = assert_ok!(compose(request, &SenderDefaults::from(&config.smtp)));
    let err = assert_err!(mailer.deliver(&message).await);
    assert_eq!(err.kind(), "connection");
}

#[tokio::test]
async fn test_handler_panic_becomes_internal_error() {
    let base = spawn_service(&config(25, ""), Arc::new(PanickingMailer)).await;

    let (status, envelope) = post_json(&base, Some((USER, PASSWORD)), simple_email()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        envelope,
        ResponseEnvelope::failure(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error."
        )
    );

    // The service keeps serving after a panic
    let (status, _) = post_json(&base, None, simple_email()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
