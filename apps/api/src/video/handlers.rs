//! Final-video routes: start, poll, and cancel rendering, list finished videos, and
//! the processing service's webhook.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::session::{SessionStatus, VideoSession};
use crate::narration::models::Narration;
use crate::sessions::store;
use crate::state::AppState;
use crate::video::{apply_job_status, JobStatus, StatusUpdate};

pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

#[derive(Debug, Serialize)]
pub struct VideoJobResponse {
    pub session_id: Uuid,
    pub status: String,
    pub job_id: Option<String>,
    pub video_url: Option<String>,
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

impl VideoJobResponse {
    fn from_session(session: &VideoSession, progress: Option<f64>) -> Self {
        Self {
            session_id: session.id,
            status: session.status.clone(),
            job_id: session.processing_job_id.clone(),
            video_url: session.final_video_url.clone(),
            error_message: session.error_message.clone(),
            progress,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CompletedVideo {
    pub session_id: Uuid,
    pub topic: Option<String>,
    pub video_url: String,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
}

/// The narration to render, if the session is in a state that allows rendering.
pub fn renderable_narration(session: &VideoSession) -> Result<Narration, AppError> {
    let status = session
        .status()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("unknown status '{}'", session.status)))?;
    if !status.can_start_video() {
        return Err(AppError::Conflict(format!(
            "Narration must be verified before rendering (session is {status})"
        )));
    }
    session
        .parsed_narration()
        .ok_or_else(|| AppError::Validation("Session has no narration to render".to_string()))
}

fn active_job_id(session: &VideoSession) -> Result<String, AppError> {
    if session.status() != Some(SessionStatus::VideoGenerating) {
        return Err(AppError::Conflict(format!(
            "No video is being generated for session {}",
            session.id
        )));
    }
    session
        .processing_job_id
        .clone()
        .ok_or_else(|| AppError::Conflict("Session has no processing job".to_string()))
}

/// POST /api/v1/sessions/:id/video/start
pub async fn handle_start_video(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
) -> Result<Json<VideoJobResponse>, AppError> {
    let session = store::get_owned_session(&state.db, &user.user_id, session_id).await?;
    let narration = renderable_narration(&session)?;

    let job_id = match state.video.start(&session, &narration).await {
        Ok(job_id) => job_id,
        Err(e) => {
            store::mark_video_failed(&state.db, session.id, &e.to_string()).await?;
            return Err(e.into());
        }
    };

    store::mark_video_generating(&state.db, session.id, &job_id).await?;
    let session = store::get_owned_session(&state.db, &user.user_id, session_id).await?;
    Ok(Json(VideoJobResponse::from_session(&session, Some(0.0))))
}

/// POST /api/v1/sessions/:id/video/check
///
/// Polls the processing service and applies the result. Sessions that are not
/// generating are returned as they are.
pub async fn handle_check_video(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
) -> Result<Json<VideoJobResponse>, AppError> {
    let session = store::get_owned_session(&state.db, &user.user_id, session_id).await?;
    let Ok(job_id) = active_job_id(&session) else {
        return Ok(Json(VideoJobResponse::from_session(&session, None)));
    };

    let status = match state.video.check(&job_id).await {
        Ok(status) => status,
        Err(e) => {
            store::mark_video_failed(&state.db, session.id, &e.to_string()).await?;
            return Err(e.into());
        }
    };

    let update = apply_job_status(&state.db, state.storage.as_ref(), &session, &status).await?;
    let session = if update == StatusUpdate::Unchanged {
        session
    } else {
        store::get_owned_session(&state.db, &user.user_id, session_id).await?
    };
    Ok(Json(VideoJobResponse::from_session(&session, status.progress)))
}

/// POST /api/v1/sessions/:id/video/cancel
pub async fn handle_cancel_video(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
) -> Result<Json<VideoJobResponse>, AppError> {
    let session = store::get_owned_session(&state.db, &user.user_id, session_id).await?;
    let job_id = active_job_id(&session)?;

    if let Err(e) = state.video.cancel(&job_id).await {
        store::mark_video_failed(&state.db, session.id, &e.to_string()).await?;
        return Err(e.into());
    }

    store::mark_video_failed(&state.db, session.id, "cancelled").await?;
    let session = store::get_owned_session(&state.db, &user.user_id, session_id).await?;
    Ok(Json(VideoJobResponse::from_session(&session, None)))
}

/// GET /api/v1/videos
pub async fn handle_list_videos(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<CompletedVideo>>, AppError> {
    let sessions = store::list_completed_videos(&state.db, &user.user_id).await?;
    Ok(Json(
        sessions
            .into_iter()
            .filter_map(|s| {
                Some(CompletedVideo {
                    session_id: s.id,
                    topic: s.topic,
                    video_url: s.final_video_url?,
                    completed_at: s.updated_at,
                })
            })
            .collect(),
    ))
}

/// Checks the shared secret when one is configured.
pub fn verify_webhook_secret(expected: Option<&str>, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let provided = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if provided != expected {
        warn!("Invalid video webhook secret received");
        return Err(AppError::Unauthorized("invalid webhook secret".to_string()));
    }
    Ok(())
}

/// POST /api/webhooks/video
///
/// Completion callback from the processing service. Unknown jobs and sessions no
/// longer generating are acknowledged and ignored.
pub async fn handle_video_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<JobStatus>,
) -> Result<Json<WebhookAck>, AppError> {
    verify_webhook_secret(state.config.video_api_key.as_deref(), &headers)?;
    debug!("Video webhook for job {}: {:?}", payload.job_id, payload.status);

    let Some(session) = store::find_session_by_job(&state.db, &payload.job_id).await? else {
        warn!("Video webhook for unknown job {}", payload.job_id);
        return Ok(Json(WebhookAck { status: "ignored" }));
    };
    if session.status() != Some(SessionStatus::VideoGenerating) {
        return Ok(Json(WebhookAck { status: "ignored" }));
    }

    apply_job_status(&state.db, state.storage.as_ref(), &session, &payload).await?;
    Ok(Json(WebhookAck { status: "ok" }))
}

/// POST /api/webhooks/video/test
pub async fn handle_webhook_test(
    State(state): State<AppState>,
    _user: AuthUser,
    Json(payload): Json<Value>,
) -> Json<Value> {
    let callback_url = state
        .config
        .public_base_url
        .as_ref()
        .map(|base| format!("{base}/api/webhooks/video"));
    Json(json!({
        "received": payload,
        "callback_url": callback_url,
        "secret_required": state.config.video_api_key.is_some(),
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;
    use crate::narration::builder::fixtures::PHOTOSYNTHESIS_NARRATION;

    fn session_with(status: SessionStatus, narration: bool) -> VideoSession {
        let mut session = VideoSession::new_for_tests("user-1");
        session.status = status.as_str().to_string();
        if narration {
            session.generated_script = Some(serde_json::from_str(PHOTOSYNTHESIS_NARRATION).unwrap());
        }
        session
    }

    #[test]
    fn test_rendering_requires_verified_narration() {
        let err = renderable_narration(&session_with(SessionStatus::ScriptGenerated, true))
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let narration =
            renderable_narration(&session_with(SessionStatus::NarrationVerified, true)).unwrap();
        assert_eq!(narration.segments.len(), 4);
    }

    #[test]
    fn test_failed_video_can_be_restarted() {
        assert!(renderable_narration(&session_with(SessionStatus::VideoFailed, true)).is_ok());
    }

    #[test]
    fn test_verified_session_without_script_is_invalid() {
        let err =
            renderable_narration(&session_with(SessionStatus::NarrationVerified, false)).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_cancel_needs_a_running_job() {
        let mut session = session_with(SessionStatus::VideoGenerating, true);
        assert!(active_job_id(&session).is_err());
        session.processing_job_id = Some("job-9".to_string());
        assert_eq!(active_job_id(&session).unwrap(), "job-9");
    }

    #[test]
    fn test_webhook_secret() {
        let mut headers = HeaderMap::new();
        assert!(verify_webhook_secret(None, &headers).is_ok());
        assert!(verify_webhook_secret(Some("s3cret"), &headers).is_err());

        headers.insert(WEBHOOK_SECRET_HEADER, HeaderValue::from_static("s3cret"));
        assert!(verify_webhook_secret(Some("s3cret"), &headers).is_ok());
        assert!(verify_webhook_secret(Some("other"), &headers).is_err());
    }
}
