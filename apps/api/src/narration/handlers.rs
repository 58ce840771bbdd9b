//! Script routes: generate a narration from chosen facts, edit it, verify it.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::jobs::{self, Job};
use crate::models::asset::AssetType;
use crate::models::session::{SessionStatus, VideoSession};
use crate::narration::builder::NarrationRequest;
use crate::narration::models::{normalize_narration, Narration};
use crate::sessions::handlers::SessionView;
use crate::sessions::store;
use crate::state::AppState;
use crate::workflow::Workflow;

#[derive(Debug, Deserialize)]
pub struct GenerateScriptRequest {
    pub fact_indices: Vec<usize>,
    #[serde(default)]
    pub target_duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateScriptRequest {
    pub narration: Narration,
}

#[derive(Debug, Serialize)]
pub struct ScriptResponse {
    pub session: SessionView,
    pub narration: Narration,
}

/// Locks the workflow's selection, builds the narration, and persists it with a
/// `script` asset. A failed build leaves the selection as it was.
pub async fn generate_for_session(
    state: &AppState,
    session: &VideoSession,
    mut workflow: Workflow,
    target_duration: Option<f64>,
) -> Result<ScriptResponse, AppError> {
    let confirmed = workflow.lock_selection()?;
    let request = NarrationRequest {
        topic: session
            .topic
            .clone()
            .unwrap_or_else(|| "the selected facts".to_string()),
        facts: confirmed.clone(),
        target_duration,
        child_age: session.child_age.and_then(|age| u32::try_from(age).ok()),
        child_interest: session.child_interest.clone(),
    };

    let narration = match state.narrator.build(&request).await {
        Ok(narration) => narration,
        Err(e) => {
            workflow.narration_failed();
            warn!("Narration failed for session {}: {e}", session.id);
            return Err(e.into());
        }
    };
    workflow.narration_generated(narration.clone())?;

    let updated = store::save_script(&state.db, session.id, &confirmed, &narration).await?;
    store::record_asset(
        &state.db,
        session.id,
        AssetType::Script,
        None,
        None,
        json!({
            "total_duration": narration.total_duration,
            "reading_level": narration.reading_level,
            "fact_count": confirmed.len(),
        }),
    )
    .await?;

    Ok(ScriptResponse {
        session: updated.into(),
        narration,
    })
}

/// POST /api/v1/sessions/:id/script/generate
///
/// Replaces the selection with `fact_indices` and (re)generates the narration.
pub async fn handle_generate_script(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
    Json(request): Json<GenerateScriptRequest>,
) -> Result<Json<ScriptResponse>, AppError> {
    let session = store::get_owned_session(&state.db, &user.user_id, session_id).await?;
    if session.status() == Some(SessionStatus::VideoGenerating) {
        return Err(AppError::Conflict(
            "A video is being rendered from the current narration".to_string(),
        ));
    }

    let mut workflow = Workflow::resume(&session).reopen_selection()?;
    workflow.select_exactly(&request.fact_indices)?;
    store::save_selection(&state.db, session.id, &workflow.selected_indices()).await?;

    let response = generate_for_session(&state, &session, workflow, request.target_duration).await?;
    Ok(Json(response))
}

/// PUT /api/v1/sessions/:id/script
///
/// Saves an edited narration. It is normalized again and needs re-verification.
pub async fn handle_update_script(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
    Json(request): Json<UpdateScriptRequest>,
) -> Result<Json<ScriptResponse>, AppError> {
    let session = store::get_owned_session(&state.db, &user.user_id, session_id).await?;
    if session.status() == Some(SessionStatus::VideoGenerating) {
        return Err(AppError::Conflict(
            "A video is being rendered from the current narration".to_string(),
        ));
    }

    let narration = normalize_narration(request.narration, None)
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let mut workflow = Workflow::resume(&session);
    workflow.narration_edited(narration.clone())?;

    let updated = store::update_script(&state.db, session.id, &narration).await?;
    Ok(Json(ScriptResponse {
        session: updated.into(),
        narration,
    }))
}

/// POST /api/v1/sessions/:id/script/verify
///
/// Approves the narration for rendering and queues diagram selection.
pub async fn handle_verify_script(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let session = store::get_owned_session(&state.db, &user.user_id, session_id).await?;
    if Workflow::resume(&session).narration().is_none() {
        return Err(AppError::Validation(
            "Generate a narration before verifying it".to_string(),
        ));
    }

    match session.status() {
        Some(SessionStatus::ScriptGenerated) => {
            store::set_status(&state.db, session.id, SessionStatus::NarrationVerified).await?;
            jobs::dispatch(&state, Job::SelectDiagrams { session_id: session.id }).await;
        }
        Some(SessionStatus::NarrationVerified) => {}
        Some(other) => {
            return Err(AppError::Conflict(format!(
                "Narration cannot be verified while the session is {other}"
            )));
        }
        None => {
            return Err(AppError::Internal(anyhow::anyhow!(
                "unknown status '{}'",
                session.status
            )));
        }
    }

    let session = store::get_owned_session(&state.db, &user.user_id, session_id).await?;
    Ok(Json(session.into()))
}
