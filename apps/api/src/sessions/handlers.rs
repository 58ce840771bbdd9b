//! Axum route handlers for the Session API.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::message::ConversationMessage;
use crate::models::session::VideoSession;
use crate::sessions::store::{self, CleanupReport, StudentProfile};
use crate::state::AppState;
use crate::workflow::{Workflow, WorkflowStep};

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub child_age: Option<i32>,
    pub child_interest: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: VideoSession,
    pub workflow_step: WorkflowStep,
}

impl From<VideoSession> for SessionView {
    fn from(session: VideoSession) -> Self {
        let workflow_step = Workflow::resume(&session).step();
        Self {
            session,
            workflow_step,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResumeResponse {
    pub session: SessionView,
    pub messages: Vec<ConversationMessage>,
    pub selected_fact_indices: Vec<usize>,
}

#[derive(Debug, Serialize)]
pub struct SelectionResponse {
    pub selected_fact_indices: Vec<usize>,
}

/// POST /api/v1/sessions
pub async fn handle_create_session(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<SessionView>, AppError> {
    let profile = StudentProfile {
        child_age: request.child_age,
        child_interest: request.child_interest,
    };
    let session = store::create_session(&state.db, &user.user_id, &profile).await?;
    Ok(Json(session.into()))
}

/// GET /api/v1/sessions
pub async fn handle_list_sessions(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<SessionView>>, AppError> {
    let sessions = store::list_sessions(&state.db, &user.user_id).await?;
    Ok(Json(sessions.into_iter().map(SessionView::from).collect()))
}

/// GET /api/v1/sessions/:id
///
/// Returns everything the chat needs to pick up where the user left off.
pub async fn handle_resume_session(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ResumeResponse>, AppError> {
    let session = store::get_owned_session(&state.db, &user.user_id, session_id).await?;
    let messages = store::list_messages(&state.db, session.id).await?;
    let selected_fact_indices = Workflow::resume(&session).selected_indices();

    Ok(Json(ResumeResponse {
        session: session.into(),
        messages,
        selected_fact_indices,
    }))
}

/// POST /api/v1/sessions/:id/facts/:index/toggle
pub async fn handle_toggle_fact(
    State(state): State<AppState>,
    user: AuthUser,
    Path((session_id, index)): Path<(Uuid, usize)>,
) -> Result<Json<SelectionResponse>, AppError> {
    let session = store::get_owned_session(&state.db, &user.user_id, session_id).await?;
    let mut workflow = Workflow::resume(&session);
    workflow.toggle_fact(index)?;

    let selected = workflow.selected_indices();
    store::save_selection(&state.db, session.id, &selected).await?;
    Ok(Json(SelectionResponse {
        selected_fact_indices: selected,
    }))
}

/// POST /api/v1/sessions/:id/reset
///
/// Starts new content in the same session.
pub async fn handle_reset_session(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    let session = store::get_owned_session(&state.db, &user.user_id, session_id).await?;
    let session = store::reset_session(&state.db, session.id).await?;
    Ok(Json(session.into()))
}

/// DELETE /api/v1/sessions/:id
pub async fn handle_delete_session(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
) -> Result<Json<CleanupReport>, AppError> {
    let report =
        store::delete_session(&state.db, state.storage.as_ref(), &user.user_id, session_id).await?;
    Ok(Json(report))
}
