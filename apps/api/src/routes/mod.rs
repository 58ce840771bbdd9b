pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};

use crate::state::AppState;
use crate::{agent, narration, sessions, storage, timeline, video};

/// Multipart framing on top of the largest accepted file.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let upload_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route("/health", get(health::health_handler))
        // Agent (chat) API
        .route("/api/agent-create/chat", post(agent::handlers::handle_chat))
        .route(
            "/api/agent-create/upload-pdf",
            post(agent::handlers::handle_upload_pdf).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/agent-create/upload-image",
            post(agent::handlers::handle_upload_image).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/agent-create/session-narration",
            post(agent::handlers::handle_session_narration),
        )
        // Session API
        .route(
            "/api/v1/sessions",
            get(sessions::handlers::handle_list_sessions)
                .post(sessions::handlers::handle_create_session),
        )
        .route(
            "/api/v1/sessions/:id",
            get(sessions::handlers::handle_resume_session)
                .delete(sessions::handlers::handle_delete_session),
        )
        .route(
            "/api/v1/sessions/:id/facts/:index/toggle",
            post(sessions::handlers::handle_toggle_fact),
        )
        .route(
            "/api/v1/sessions/:id/reset",
            post(sessions::handlers::handle_reset_session),
        )
        // Script API
        .route(
            "/api/v1/sessions/:id/script",
            put(narration::handlers::handle_update_script),
        )
        .route(
            "/api/v1/sessions/:id/script/generate",
            post(narration::handlers::handle_generate_script),
        )
        .route(
            "/api/v1/sessions/:id/script/verify",
            post(narration::handlers::handle_verify_script),
        )
        // Storage API
        .route(
            "/api/v1/sessions/:id/files",
            get(storage::handlers::handle_list_files).delete(storage::handlers::handle_delete_file),
        )
        .route(
            "/api/v1/sessions/:id/files/download-url",
            get(storage::handlers::handle_download_url),
        )
        .route(
            "/api/v1/sessions/:id/files/upload-url",
            post(storage::handlers::handle_upload_url),
        )
        // Final video API
        .route(
            "/api/v1/sessions/:id/video/start",
            post(video::handlers::handle_start_video),
        )
        .route(
            "/api/v1/sessions/:id/video/check",
            post(video::handlers::handle_check_video),
        )
        .route(
            "/api/v1/sessions/:id/video/cancel",
            post(video::handlers::handle_cancel_video),
        )
        .route("/api/v1/videos", get(video::handlers::handle_list_videos))
        .route(
            "/api/webhooks/video",
            post(video::handlers::handle_video_webhook),
        )
        .route(
            "/api/webhooks/video/test",
            post(video::handlers::handle_webhook_test),
        )
        // Timeline API
        .route(
            "/api/v1/sessions/:id/timeline",
            get(timeline::handlers::handle_get_timeline).put(timeline::handlers::handle_put_timeline),
        )
        .route(
            "/api/v1/sessions/:id/timeline/edit",
            post(timeline::handlers::handle_edit_timeline),
        )
        .with_state(state)
}
