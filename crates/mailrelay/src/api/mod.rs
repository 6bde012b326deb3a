//! HTTP API.
//!
//! Two endpoints accept an email, authenticate the caller with HTTP Basic,
//! compose the message and relay it:
//!
//! - `POST /api/v1/email` takes `multipart/form-data` with file fields named
//!   `Attachments`.
//! - `POST /api/v1/email/without_attachment` takes a JSON body.
//!
//! Every response is a [`ResponseEnvelope`], including the 500 returned when
//! a handler panics.

mod handlers;
mod response;

use std::any::Any;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use tower_http::catch_panic::CatchPanicLayer;

pub use response::{ApiError, INTERNAL_ERROR_MESSAGE, ResponseEnvelope, SENT_MESSAGE};

use crate::auth::CredentialSet;
use crate::compose::SenderDefaults;
use crate::config::AppConfig;
use crate::delivery::Mailer;

/// Route accepting multipart requests with attachments.
pub const EMAIL_PATH: &str = "/api/v1/email";

/// Route accepting JSON requests.
pub const EMAIL_WITHOUT_ATTACHMENT_PATH: &str = "/api/v1/email/without_attachment";

/// Shared, read-only state of the service.
pub struct AppState {
    /// Accepted API credentials.
    pub credentials: CredentialSet,
    /// Sender used when a request names none.
    pub defaults: SenderDefaults,
    /// Delivery backend.
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    /// Builds the state from configuration and a mailer.
    #[must_use]
    pub fn new(config: &AppConfig, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            credentials: CredentialSet::new(config.auth.basic.iter().cloned()),
            defaults: SenderDefaults::from(&config.smtp),
            mailer,
        }
    }
}

/// Builds the router.
pub fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route(EMAIL_PATH, post(handlers::send_email))
        .route(
            EMAIL_WITHOUT_ATTACHMENT_PATH,
            post(handlers::send_email_without_attachment),
        )
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CatchPanicLayer::custom(panic_response))
        .with_state(state)
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("<non-string panic payload>");
    tracing::error!(panic = detail, "Request handler panicked");

    ResponseEnvelope::failure(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
        .into_response()
}
