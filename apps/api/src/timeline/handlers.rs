use std::time::Instant;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::session::VideoSession;
use crate::sessions::store;
use crate::state::AppState;
use crate::timeline::{Timeline, TimelineEdit};

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    #[serde(flatten)]
    pub edit: TimelineEdit,
    /// Set while a drag is in progress. Interim edits are paced to the frame rate;
    /// the final edit of a gesture is always applied.
    #[serde(default)]
    pub interim: bool,
}

#[derive(Debug, Serialize)]
pub struct EditResponse {
    pub timeline: Timeline,
    pub duration: f64,
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll_offset_px: Option<f64>,
}

/// The saved timeline, or a starting layout built from the narration.
pub fn current_timeline(session: &VideoSession) -> Result<Timeline, AppError> {
    if let Some(saved) = &session.editor_timeline {
        return serde_json::from_value(saved.clone())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("stored timeline is unreadable: {e}")));
    }
    Ok(session
        .parsed_narration()
        .map(|n| Timeline::from_narration(&n, session.final_video_url.as_deref()))
        .unwrap_or_default())
}

async fn persist(state: &AppState, session_id: Uuid, timeline: &Timeline) -> Result<(), AppError> {
    let value = serde_json::to_value(timeline).map_err(anyhow::Error::from)?;
    store::save_timeline(&state.db, session_id, &value).await
}

/// GET /api/v1/sessions/:id/timeline
pub async fn handle_get_timeline(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Timeline>, AppError> {
    let session = store::get_owned_session(&state.db, &user.user_id, session_id).await?;
    Ok(Json(current_timeline(&session)?))
}

/// PUT /api/v1/sessions/:id/timeline
pub async fn handle_put_timeline(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
    Json(mut timeline): Json<Timeline>,
) -> Result<Json<Timeline>, AppError> {
    let session = store::get_owned_session(&state.db, &user.user_id, session_id).await?;
    timeline.validate()?;
    for track in &mut timeline.tracks {
        track.sort_clips();
    }
    timeline.prune_selection();
    persist(&state, session.id, &timeline).await?;
    Ok(Json(timeline))
}

/// POST /api/v1/sessions/:id/timeline/edit
pub async fn handle_edit_timeline(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
    Json(request): Json<EditRequest>,
) -> Result<Json<EditResponse>, AppError> {
    let session = store::get_owned_session(&state.db, &user.user_id, session_id).await?;
    let mut timeline = current_timeline(&session)?;

    if request.interim && !state.timeline_throttles.ready(session.id, Instant::now()).await {
        return Ok(Json(EditResponse {
            duration: timeline.duration(),
            timeline,
            applied: false,
            scroll_offset_px: None,
        }));
    }

    let scroll_offset_px = timeline.apply(&request.edit)?;
    persist(&state, session.id, &timeline).await?;
    Ok(Json(EditResponse {
        duration: timeline.duration(),
        timeline,
        applied: true,
        scroll_offset_px,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narration::builder::fixtures::PHOTOSYNTHESIS_NARRATION;

    #[test]
    fn test_unsaved_session_without_narration_is_empty() {
        let session = VideoSession::new_for_tests("user-1");
        assert!(current_timeline(&session).unwrap().tracks.is_empty());
    }

    #[test]
    fn test_saved_timeline_wins_over_narration_layout() {
        let mut session = VideoSession::new_for_tests("user-1");
        session.generated_script = Some(serde_json::from_str(PHOTOSYNTHESIS_NARRATION).unwrap());
        session.editor_timeline = Some(serde_json::json!({"tracks": [], "pixels_per_second": 80}));

        let timeline = current_timeline(&session).unwrap();
        assert!(timeline.tracks.is_empty());
        assert_eq!(timeline.pixels_per_second, 80.0);
    }

    #[test]
    fn test_narration_layout_includes_the_rendered_video() {
        let mut session = VideoSession::new_for_tests("user-1");
        session.generated_script = Some(serde_json::from_str(PHOTOSYNTHESIS_NARRATION).unwrap());
        session.final_video_url = Some("https://cdn/v.mp4".to_string());

        let timeline = current_timeline(&session).unwrap();
        assert_eq!(timeline.tracks.len(), 2);
        assert_eq!(timeline.tracks[0].clips[0].src.as_deref(), Some("https://cdn/v.mp4"));
    }

    #[test]
    fn test_edit_request_carries_the_interim_flag() {
        let request: EditRequest = serde_json::from_str(
            r#"{"op": "move", "clip_id": "caption-hook", "position_start": 2.5, "interim": true}"#,
        )
        .unwrap();
        assert!(request.interim);
        assert_eq!(
            request.edit,
            TimelineEdit::Move {
                clip_id: "caption-hook".to_string(),
                position_start: 2.5
            }
        );

        let request: EditRequest = serde_json::from_str(r#"{"op": "clear_selection"}"#).unwrap();
        assert!(!request.interim);
        assert_eq!(request.edit, TimelineEdit::ClearSelection);
    }
}
