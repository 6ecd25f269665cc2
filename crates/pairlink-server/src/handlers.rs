//! HTTP handlers.
//!
//! Handlers only read the connection state. Anything that needs the
//! messaging capability goes through the request gate first and is turned
//! away with 503 while the account is not connected.

use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::{FromRequest, Query, Request, State};
use axum::extract::rejection::QueryRejection;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use pairlink_capability::{MediaAttachment, MessagePayload, MessageReceipt};
use pairlink_core::{ConnectionState, Destination};
use pairlink_session::{Artifact, ArtifactFormat};

use crate::error::ApiError;
use crate::page::pairing_page;
use crate::AppState;

const DEFAULT_MIME: &str = "application/octet-stream";

/// Text message fields, accepted under their historical names as well.
#[derive(Debug, Default, Deserialize)]
pub struct TextParams {
    #[serde(default, alias = "number", alias = "numero")]
    pub to: Option<String>,
    #[serde(default, alias = "mensaje")]
    pub text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ImageParams {
    /// `html` (default) or `png`
    #[serde(default)]
    pub format: Option<String>,
}

/// Fields collected from a multipart upload.
#[derive(Debug, Default)]
struct MediaForm {
    to: Option<String>,
    text: Option<String>,
    caption: Option<String>,
    file: Option<MediaAttachment>,
}

/// `GET /health`
pub async fn health() -> &'static str {
    "OK"
}

/// `GET /status`
///
/// Connected accounts get a JSON status; otherwise the latest pairing code
/// is shown, or 404 while there is none.
pub async fn status(State(state): State<AppState>) -> Result<Response, ApiError> {
    let current = state.handle.current();
    if current.is_connected() {
        return Ok(Json(json!({
            "status": "connected",
            "state": current,
            "message": "Messaging account is connected",
        }))
        .into_response());
    }

    match render(&state, ArtifactFormat::DataUrl)? {
        Some(Artifact::DataUrl(url)) => Ok(pairing_page("Scan to connect", &url).into_response()),
        _ => Err(ApiError::NotFound(format!(
            "no pairing code available yet (state: {}), please wait for one to be issued",
            current
        ))),
    }
}

/// `GET /pairing-image`
pub async fn pairing_image(
    State(state): State<AppState>,
    params: Result<Query<ImageParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::input(e.body_text()))?;

    let format = match params.format.as_deref() {
        None | Some("html") => ArtifactFormat::DataUrl,
        Some("png") => ArtifactFormat::Png,
        Some(other) => return Err(ApiError::input(format!("unknown format '{}'", other))),
    };

    match render(&state, format)? {
        Some(Artifact::DataUrl(url)) => Ok(pairing_page("Pairing code", &url).into_response()),
        Some(Artifact::Png(bytes)) => {
            Ok(([(header::CONTENT_TYPE, "image/png")], bytes).into_response())
        }
        _ => Err(ApiError::NotFound("no pairing code available".to_string())),
    }
}

/// `GET /send-text?to=..&text=..`
pub async fn send_text_query(
    State(state): State<AppState>,
    params: Result<Query<TextParams>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::input(e.body_text()))?;
    send_text(&state, params).await
}

/// `POST /send-text` with a form or JSON body.
pub async fn send_text_body(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<Value>, ApiError> {
    let params = read_text_params(request).await?;
    send_text(&state, params).await
}

/// `POST /send-media` (multipart: `to`, `caption`, `file`)
pub async fn send_media(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ApiError> {
    let multipart = multipart.map_err(|e| ApiError::input(e.body_text()))?;
    let form = read_media_form(multipart).await?;

    let to = destination(&state, form.to.as_deref())?;
    let attachment = form
        .file
        .ok_or_else(|| ApiError::input("missing field: file"))?;
    let caption = form.caption.or(form.text).filter(|c| !c.trim().is_empty());

    deliver(
        &state,
        &to,
        MessagePayload::Media {
            attachment,
            caption,
        },
    )
    .await
}

/// `POST /enviar`: text, or an attachment captioned with the text.
///
/// Takes multipart (optional `pdf`/`file` upload), a form or JSON.
pub async fn send_combined(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<Value>, ApiError> {
    let form = if is_multipart(request.headers()) {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| ApiError::input(e.body_text()))?;
        read_media_form(multipart).await?
    } else {
        let params = read_text_params(request).await?;
        MediaForm {
            to: params.to,
            text: params.text,
            ..MediaForm::default()
        }
    };

    let to = destination(&state, form.to.as_deref())?;
    let text = form
        .text
        .or(form.caption)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::input("missing field: text"))?;

    let payload = match form.file {
        Some(attachment) => MessagePayload::Media {
            attachment,
            caption: Some(text),
        },
        None => MessagePayload::Text(text),
    };
    deliver(&state, &to, payload).await
}

/// `GET /regenerate-pairing`
///
/// Logs the account out when it is connected so that the capability
/// issues a fresh pairing code. Never fabricates a code otherwise.
pub async fn regenerate_pairing(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let current = state.handle.current();
    if current != ConnectionState::Connected {
        debug!(state = %current, "Regenerate requested while not connected");
        return Ok(Json(json!({
            "message": "Not connected, a pairing code is available or being generated",
            "state": current,
        })));
    }

    info!("Logging out to regenerate the pairing code");
    state.capability.logout().await?;
    let after = state
        .handle
        .request_logout()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(json!({
        "message": "Logged out, a new pairing code will be issued",
        "state": after,
    })))
}

async fn send_text(state: &AppState, params: TextParams) -> Result<Json<Value>, ApiError> {
    let to = destination(state, params.to.as_deref())?;
    let text = params
        .text
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::input("missing field: text"))?;

    deliver(state, &to, MessagePayload::Text(text)).await
}

/// Gate the request, then hand the payload to the capability.
async fn deliver(
    state: &AppState,
    to: &Destination,
    payload: MessagePayload,
) -> Result<Json<Value>, ApiError> {
    state
        .gate
        .admit_live(state.capability.as_ref())
        .await
        .into_result()?;

    let kind = payload.kind();
    let MessageReceipt { id } = state.capability.send_message(to, payload).await?;
    info!(to = %to, kind = kind, "Message sent");

    Ok(Json(json!({
        "success": true,
        "message": "Message sent",
        "id": id,
    })))
}

fn destination(state: &AppState, raw: Option<&str>) -> Result<Destination, ApiError> {
    raw.and_then(|raw| Destination::parse(raw, &state.address_suffix))
        .ok_or_else(|| ApiError::input("missing field: to"))
}

fn render(state: &AppState, format: ArtifactFormat) -> Result<Option<Artifact>, ApiError> {
    match state.broker.render(format) {
        Some(Ok(artifact)) => Ok(Some(artifact)),
        Some(Err(e)) => Err(e.into()),
        None => Ok(None),
    }
}

fn content_type(headers: &HeaderMap) -> &str {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

fn is_multipart(headers: &HeaderMap) -> bool {
    content_type(headers).starts_with("multipart/form-data")
}

async fn read_text_params(request: Request) -> Result<TextParams, ApiError> {
    if content_type(request.headers()).starts_with("application/json") {
        let Json(params) = Json::<TextParams>::from_request(request, &())
            .await
            .map_err(|e| ApiError::unreadable_body(e.status(), e.body_text()))?;
        Ok(params)
    } else {
        let Form(params) = Form::<TextParams>::from_request(request, &())
            .await
            .map_err(|e| ApiError::unreadable_body(e.status(), e.body_text()))?;
        Ok(params)
    }
}

async fn read_media_form(mut multipart: Multipart) -> Result<MediaForm, ApiError> {
    let mut form = MediaForm::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" | "pdf" => {
                let mime_type = field.content_type().unwrap_or(DEFAULT_MIME).to_string();
                let filename = field.file_name().map(str::to_string);
                let data = field.bytes().await?;
                form.file = Some(MediaAttachment {
                    mime_type,
                    data: data.to_vec(),
                    filename,
                });
            }
            "to" | "number" | "numero" => form.to = Some(text_field(field).await?),
            "text" | "mensaje" => form.text = Some(text_field(field).await?),
            "caption" => form.caption = Some(text_field(field).await?),
            other => debug!(field = other, "Ignoring unknown form field"),
        }
    }

    Ok(form)
}

async fn text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    Ok(field.text().await?)
}
