use std::time::Duration;

use axum::{
    extract::{Multipart, State},
    http::{HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::upload::{read_upload, UploadKind};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::facts::models::{ExtractionInput, ExtractionOutcome, Fact};
use crate::jobs::{self, Job};
use crate::models::message::{MessageRole, NewMessage};
use crate::models::session::{SessionStatus, SourceMaterial, VideoSession};
use crate::narration::handlers::generate_for_session;
use crate::narration::models::Narration;
use crate::sessions::store::{self, StudentProfile};
use crate::state::AppState;
use crate::storage::keys;
use crate::workflow::{Workflow, WorkflowStep};

pub const SESSION_ID_HEADER: &str = "x-session-id";
/// Lifetime of the presigned link the extractor uses to read an uploaded PDF.
const SOURCE_LINK_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub pdf_url: Option<String>,
    #[serde(default)]
    pub website_url: Option<String>,
    #[serde(default)]
    pub child_age: Option<i32>,
    #[serde(default)]
    pub child_interest: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub success: bool,
    pub session_id: Uuid,
    pub facts: Vec<Fact>,
    pub message: String,
    pub topic: Option<String>,
    pub learning_objective: Option<String>,
    pub workflow_step: WorkflowStep,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
    pub key: String,
    pub asset_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct SessionNarrationRequest {
    pub session_id: Uuid,
    #[serde(default)]
    pub target_duration: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SessionNarrationResponse {
    pub success: bool,
    pub message: String,
    pub narration: Option<Narration>,
    pub workflow_step: WorkflowStep,
}

fn with_session_header<T: Serialize>(session_id: Uuid, body: T) -> Result<Response, AppError> {
    let mut response = Json(body).into_response();
    let value = HeaderValue::from_str(&session_id.to_string()).map_err(anyhow::Error::from)?;
    response
        .headers_mut()
        .insert(HeaderName::from_static(SESSION_ID_HEADER), value);
    Ok(response)
}

/// The most recent uploaded PDF, for chat turns that don't name one.
fn latest_uploaded_pdf(session: &VideoSession) -> Option<String> {
    session
        .parsed_source_materials()
        .into_iter()
        .rev()
        .find(|m| m.kind == UploadKind::Pdf.label())
        .and_then(|m| m.storage_key)
}

async fn extraction_input(
    state: &AppState,
    session: &VideoSession,
    request: &ChatRequest,
) -> Result<ExtractionInput, AppError> {
    let mut pdf_url = request.pdf_url.clone().filter(|u| !u.trim().is_empty());
    if pdf_url.is_none() && request.website_url.is_none() {
        if let Some(key) = latest_uploaded_pdf(session) {
            pdf_url = Some(state.storage.presign_get(&key, SOURCE_LINK_TTL).await?);
        }
    }
    Ok(ExtractionInput {
        content: Some(request.message.clone()).filter(|m| !m.trim().is_empty()),
        pdf_url,
        website_url: request.website_url.clone().filter(|u| !u.trim().is_empty()),
    })
}

/// POST /api/agent-create/chat
///
/// One chat turn: extract facts from whatever the user shared. Extraction
/// problems come back as `success: false` with HTTP 200.
pub async fn handle_chat(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<ChatRequest>,
) -> Result<Response, AppError> {
    let profile = StudentProfile {
        child_age: request.child_age,
        child_interest: request.child_interest.clone(),
    };
    let session =
        store::load_or_create_session(&state.db, &user.user_id, request.session_id, &profile)
            .await?;

    jobs::dispatch(
        &state,
        Job::PersistMessage {
            message: NewMessage::new(session.id, MessageRole::User, request.message.clone())
                .with_metadata(json!({
                    "pdf_url": request.pdf_url,
                    "website_url": request.website_url,
                })),
        },
    )
    .await;

    let outcome = if session.status() == Some(SessionStatus::VideoGenerating) {
        ExtractionOutcome::failure(
            "Your video is still rendering. Start a new session to work on another topic.",
        )
    } else {
        let input = extraction_input(&state, &session, &request).await?;
        state
            .extractor
            .extract(&input, session.student_context().as_deref())
            .await
    };

    let workflow_step = if outcome.success {
        let workflow = Workflow::resume(&session)
            .reset()
            .facts_extracted(outcome.facts.clone())?;
        store::save_extraction(
            &state.db,
            session.id,
            &outcome.facts,
            outcome.topic.as_deref(),
            outcome.learning_objective.as_deref(),
        )
        .await?;
        info!(
            "Session {}: {} facts ready for selection",
            session.id,
            outcome.facts.len()
        );
        workflow.step()
    } else {
        warn!("Session {}: extraction failed: {}", session.id, outcome.message);
        Workflow::resume(&session).step()
    };

    jobs::dispatch(
        &state,
        Job::PersistMessage {
            message: NewMessage::new(session.id, MessageRole::Assistant, outcome.message.clone())
                .with_parts(json!([{ "type": "facts", "facts": outcome.facts }]))
                .with_metadata(json!({
                    "success": outcome.success,
                    "topic": outcome.topic,
                    "learning_objective": outcome.learning_objective,
                })),
        },
    )
    .await;

    with_session_header(
        session.id,
        ChatResponse {
            success: outcome.success,
            session_id: session.id,
            facts: outcome.facts,
            message: outcome.message,
            topic: outcome.topic,
            learning_objective: outcome.learning_objective,
            workflow_step,
        },
    )
}

async fn store_upload(
    state: &AppState,
    user: &AuthUser,
    multipart: Multipart,
    kind: UploadKind,
) -> Result<Response, AppError> {
    let upload = read_upload(multipart, kind, state.config.max_upload_bytes).await?;
    let session = store::get_owned_session(&state.db, &user.user_id, upload.session_id).await?;

    let key = keys::session_key(session.id, kind.folder(), &upload.filename);
    let size = upload.bytes.len() as u64;
    state
        .storage
        .put_bytes(&key, upload.bytes, upload.content_type)
        .await?;
    let url = state.storage.object_url(&key);

    let asset = store::record_asset(
        &state.db,
        session.id,
        kind.asset_type(),
        Some(&url),
        Some(&key),
        json!({
            "filename": upload.filename,
            "content_type": upload.content_type,
            "size_bytes": size,
        }),
    )
    .await?;
    store::append_source_material(
        &state.db,
        session.id,
        &SourceMaterial {
            kind: kind.label().to_string(),
            name: upload.filename,
            url: Some(url.clone()),
            storage_key: Some(key.clone()),
            size_bytes: Some(size),
        },
    )
    .await?;

    info!("Stored {} upload {key} ({size} bytes)", kind.label());
    with_session_header(
        session.id,
        UploadResponse {
            url,
            key,
            asset_id: asset.id,
        },
    )
}

/// POST /api/agent-create/upload-pdf
pub async fn handle_upload_pdf(
    State(state): State<AppState>,
    user: AuthUser,
    multipart: Multipart,
) -> Result<Response, AppError> {
    store_upload(&state, &user, multipart, UploadKind::Pdf).await
}

/// POST /api/agent-create/upload-image
pub async fn handle_upload_image(
    State(state): State<AppState>,
    user: AuthUser,
    multipart: Multipart,
) -> Result<Response, AppError> {
    store_upload(&state, &user, multipart, UploadKind::Image).await
}

/// POST /api/agent-create/session-narration
///
/// Narrates the session's saved selection. Model failures come back as
/// `success: false` with HTTP 200.
pub async fn handle_session_narration(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<SessionNarrationRequest>,
) -> Result<Response, AppError> {
    let session = store::get_owned_session(&state.db, &user.user_id, request.session_id).await?;
    if session.status() == Some(SessionStatus::VideoGenerating) {
        return Err(AppError::Conflict(
            "A video is being rendered from the current narration".to_string(),
        ));
    }
    let workflow = Workflow::resume(&session).reopen_selection()?;

    let body = match generate_for_session(&state, &session, workflow, request.target_duration).await
    {
        Ok(script) => SessionNarrationResponse {
            success: true,
            message: "Here is your narration. Review it, edit anything you like, then verify it."
                .to_string(),
            workflow_step: script.session.workflow_step,
            narration: Some(script.narration),
        },
        Err(AppError::Llm(message)) => {
            warn!("Session {}: narration failed: {message}", session.id);
            SessionNarrationResponse {
                success: false,
                message: "I couldn't write the narration this time. Please try again.".to_string(),
                narration: None,
                workflow_step: WorkflowStep::Selection,
            }
        }
        Err(e) => return Err(e),
    };

    jobs::dispatch(
        &state,
        Job::PersistMessage {
            message: NewMessage::new(session.id, MessageRole::Assistant, body.message.clone())
                .with_parts(json!([{ "type": "narration", "narration": body.narration }])),
        },
    )
    .await;

    with_session_header(session.id, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_uploaded_pdf_prefers_newest() {
        let mut session = VideoSession::new_for_tests("user-1");
        session.source_materials = json!([
            {"kind": "pdf", "name": "a.pdf", "url": null, "storage_key": "sessions/x/pdfs/a.pdf", "size_bytes": 1},
            {"kind": "image", "name": "b.png", "url": null, "storage_key": "sessions/x/images/b.png", "size_bytes": 1},
            {"kind": "pdf", "name": "c.pdf", "url": null, "storage_key": "sessions/x/pdfs/c.pdf", "size_bytes": 1}
        ]);
        assert_eq!(
            latest_uploaded_pdf(&session).as_deref(),
            Some("sessions/x/pdfs/c.pdf")
        );
    }

    #[test]
    fn test_session_without_uploads_has_no_pdf() {
        assert!(latest_uploaded_pdf(&VideoSession::new_for_tests("user-1")).is_none());
    }

    #[test]
    fn test_session_header_is_set() {
        let id = Uuid::new_v4();
        let response = with_session_header(id, json!({"ok": true})).unwrap();
        assert_eq!(
            response.headers().get(SESSION_ID_HEADER).unwrap(),
            id.to_string().as_str()
        );
    }

    #[test]
    fn test_chat_request_defaults() {
        let request: ChatRequest = serde_json::from_str(r#"{"message": "Teach photosynthesis"}"#).unwrap();
        assert!(request.session_id.is_none());
        assert!(request.pdf_url.is_none());
    }
}
