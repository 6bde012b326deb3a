//! Request handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use mailrelay_mime::Attachment;
use tracing::Instrument;

use super::response::{ApiError, ResponseEnvelope};
use super::{AppState, EMAIL_PATH, EMAIL_WITHOUT_ATTACHMENT_PATH};
use crate::auth::{AuthError, Principal};
use crate::compose::{MailRequest, compose};

/// File name used for an attachment part that carries none.
const UNNAMED_ATTACHMENT: &str = "attachment";

/// `POST /api/v1/email` with a `multipart/form-data` body.
///
/// The body is only extracted once the caller is authorized.
pub async fn send_email(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<ResponseEnvelope, ApiError> {
    async move {
        authorize(&state, request.headers())?;
        let mut multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|r| bad_request(r.body_text()))?;
        let mail = read_form(&mut multipart).await?;
        relay(&state, mail).await
    }
    .instrument(request_span(EMAIL_PATH))
    .await
}

/// `POST /api/v1/email/without_attachment` with a JSON body.
pub async fn send_email_without_attachment(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<ResponseEnvelope, ApiError> {
    async move {
        authorize(&state, request.headers())?;
        let Json(mail) = Json::<MailRequest>::from_request(request, &state)
            .await
            .map_err(|r| bad_request(r.body_text()))?;
        relay(&state, mail).await
    }
    .instrument(request_span(EMAIL_WITHOUT_ATTACHMENT_PATH))
    .await
}

/// Unknown routes.
pub async fn not_found() -> ApiError {
    ApiError::NotFound
}

fn request_span(path: &'static str) -> tracing::Span {
    tracing::info_span!("request", method = "POST", path, principal = tracing::field::Empty)
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let result = headers
        .get(AUTHORIZATION)
        .map(|value| value.to_str().map_err(|_| AuthError::MalformedCredentials))
        .transpose()
        .and_then(|header| state.credentials.authorize(header));

    match result {
        Ok(principal) => {
            tracing::Span::current().record("principal", principal.username.as_str());
            Ok(principal)
        }
        Err(e) => {
            tracing::warn!(kind = e.kind(), "Authentication failed");
            Err(e.into())
        }
    }
}

async fn relay(state: &AppState, request: MailRequest) -> Result<ResponseEnvelope, ApiError> {
    let message = compose(request, &state.defaults).inspect_err(|e| {
        tracing::warn!(error = %e, "Rejected email request");
    })?;

    state.mailer.deliver(&message).await?;
    Ok(ResponseEnvelope::sent())
}

/// Collects the form fields into a request. Field names are matched
/// case-insensitively; unknown fields are ignored.
async fn read_form(multipart: &mut Multipart) -> Result<MailRequest, ApiError> {
    let mut request = MailRequest::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_ascii_lowercase();

        if name == "attachments" {
            let filename = field
                .file_name()
                .filter(|f| !f.is_empty())
                .unwrap_or(UNNAMED_ATTACHMENT)
                .to_string();
            let data = field.bytes().await.map_err(|e| bad_request(e.body_text()))?;
            tracing::debug!(%filename, size = data.len(), "Received attachment");
            request.attachments.push(Attachment::new(filename, data));
            continue;
        }

        let slot = match name.as_str() {
            "from" => &mut request.from,
            "displayname" => &mut request.display_name,
            "to" => &mut request.to,
            "cc" => &mut request.cc,
            "bcc" => &mut request.bcc,
            "subject" => &mut request.subject,
            "mailmessage" | "htmlbody" => &mut request.html_body,
            _ => {
                tracing::debug!(field = %name, "Ignoring unknown form field");
                continue;
            }
        };
        *slot = Some(field.text().await.map_err(|e| bad_request(e.body_text()))?);
    }

    Ok(request)
}

fn bad_request(detail: String) -> ApiError {
    ApiError::BadRequest(detail)
}
