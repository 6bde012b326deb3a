//! Response envelope and the error-to-response boundary.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::auth::AuthError;
use crate::compose::CompositionError;
use crate::delivery::DeliveryError;

/// Message returned for a delivered email.
pub const SENT_MESSAGE: &str = "Successfully sent email";

/// Message returned for any delivery or unexpected failure.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error.";

/// JSON body of every API response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Whether the request succeeded.
    pub succeeded: bool,
    /// HTTP status code, repeated.
    pub code: u16,
    /// Human-readable outcome.
    pub message: String,
    /// Error details (`[]` on failure, `null` on success).
    pub errors: Option<Vec<String>>,
    /// Payload (`null` on failure).
    pub data: Option<String>,
}

impl ResponseEnvelope {
    /// Envelope for a delivered email.
    #[must_use]
    pub fn sent() -> Self {
        Self {
            succeeded: true,
            code: StatusCode::OK.as_u16(),
            message: SENT_MESSAGE.to_string(),
            errors: None,
            data: Some(SENT_MESSAGE.to_string()),
        }
    }

    /// Envelope for a failed request.
    #[must_use]
    pub fn failure(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            code: status.as_u16(),
            message: message.into(),
            errors: Some(Vec::new()),
            data: None,
        }
    }
}

impl IntoResponse for ResponseEnvelope {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Any failure a request can end in.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Authentication failed.
    #[error(transparent)]
    Unauthorized(#[from] AuthError),

    /// The body could not be decoded.
    #[error("{0}")]
    BadRequest(String),

    /// The request does not describe a valid email.
    #[error(transparent)]
    Composition(#[from] CompositionError),

    /// The SMTP server did not take the message.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// No such route.
    #[error("Not found")]
    NotFound,
}

impl ApiError {
    /// HTTP status for the error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) | Self::Composition(_) => StatusCode::BAD_REQUEST,
            Self::Delivery(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound => StatusCode::NOT_FOUND,
        }
    }

    /// Message shown to the caller. Delivery details stay in the logs.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Unauthorized(e) => e.to_string(),
            Self::BadRequest(detail) => format!("Invalid request: {detail}"),
            Self::Composition(e) => format!("Invalid request: {e}"),
            Self::Delivery(_) => INTERNAL_ERROR_MESSAGE.to_string(),
            Self::NotFound => "Not found.".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        ResponseEnvelope::failure(self.status(), self.public_message()).into_response()
    }
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
    use std::time::Duration;

    #[test]
    fn test_sent_envelope_json() {
        let json = serde_json::to_value(ResponseEnvelope::sent()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "succeeded": true,
                "code": 200,
                "message": "Successfully sent email",
                "errors": null,
                "data": "Successfully sent email",
            })
        );
    }

    #[test]
    fn test_failure_envelope_json() {
        let json = serde_json::to_value(ResponseEnvelope::failure(
            StatusCode::UNAUTHORIZED,
            "Missing Authorization Header",
        ))
        .unwrap();
        assert_eq!(json["succeeded"], false);
        assert_eq!(json["code"], 401);
        assert_eq!(json["errors"], serde_json::json!([]));
        assert_eq!(json["data"], serde_json::Value::Null);
    }

    #[test]
    fn test_error_mapping() {
        let err = ApiError::from(AuthError::InvalidCredentials);
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.public_message(), "Invalid Username or Password");

        let err = ApiError::from(CompositionError::InvalidAddress {
            field: "to",
            value: String::new(),
        });
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.public_message(), "Invalid request: invalid to address ''");

        let err = ApiError::from(DeliveryError::Timeout {
            stage: "ehlo",
            limit: Duration::from_secs(30),
        });
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Internal server error.");
    }
}
