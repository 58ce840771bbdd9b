//! Storage routes: list a session's files, issue presigned URLs, delete files.

use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::sessions::store;
use crate::state::AppState;
use crate::storage::{keys, ObjectInfo};

#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadUrlRequest {
    pub folder: String,
    pub filename: String,
    pub content_type: String,
}

#[derive(Debug, Serialize)]
pub struct SessionFile {
    #[serde(flatten)]
    pub object: ObjectInfo,
    pub folder: Option<String>,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct PresignedUrl {
    pub key: String,
    pub url: String,
    pub expires_in_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct DeleteFileResponse {
    pub key: String,
    pub assets_removed: u64,
}

const UPLOAD_FOLDERS: [&str; 2] = [keys::PDFS, keys::IMAGES];

/// The folder a key sits in below the session prefix.
fn folder_of(session_id: Uuid, key: &str) -> Option<String> {
    key.strip_prefix(&keys::session_prefix(session_id))?
        .split_once('/')
        .map(|(folder, _)| folder.to_string())
}

fn owned_key(session_id: Uuid, key: &str) -> Result<(), AppError> {
    if keys::belongs_to_session(session_id, key) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "'{key}' is not a file of session {session_id}"
        )))
    }
}

/// GET /api/v1/sessions/:id/files
pub async fn handle_list_files(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Vec<SessionFile>>, AppError> {
    let session = store::get_owned_session(&state.db, &user.user_id, session_id).await?;
    let objects = state
        .storage
        .list_prefix(&keys::session_prefix(session.id))
        .await?;

    Ok(Json(
        objects
            .into_iter()
            .map(|object| SessionFile {
                folder: folder_of(session.id, &object.key),
                url: state.storage.object_url(&object.key),
                object,
            })
            .collect(),
    ))
}

/// GET /api/v1/sessions/:id/files/download-url?key=...
pub async fn handle_download_url(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
    Query(query): Query<KeyQuery>,
) -> Result<Json<PresignedUrl>, AppError> {
    let session = store::get_owned_session(&state.db, &user.user_id, session_id).await?;
    owned_key(session.id, &query.key)?;

    let ttl = state.config.presign_ttl_secs;
    let url = state
        .storage
        .presign_get(&query.key, Duration::from_secs(ttl))
        .await?;
    Ok(Json(PresignedUrl {
        key: query.key,
        url,
        expires_in_secs: ttl,
    }))
}

/// POST /api/v1/sessions/:id/files/upload-url
///
/// Lets the browser upload directly. The file is not recorded as an asset.
pub async fn handle_upload_url(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
    Json(request): Json<UploadUrlRequest>,
) -> Result<Json<PresignedUrl>, AppError> {
    let session = store::get_owned_session(&state.db, &user.user_id, session_id).await?;
    if !UPLOAD_FOLDERS.contains(&request.folder.as_str()) {
        return Err(AppError::Validation(format!(
            "uploads go to one of {UPLOAD_FOLDERS:?}"
        )));
    }

    let key = keys::session_key(session.id, &request.folder, &request.filename);
    let ttl = state.config.presign_ttl_secs;
    let url = state
        .storage
        .presign_put(&key, &request.content_type, Duration::from_secs(ttl))
        .await?;
    Ok(Json(PresignedUrl {
        key,
        url,
        expires_in_secs: ttl,
    }))
}

/// DELETE /api/v1/sessions/:id/files?key=...
pub async fn handle_delete_file(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<Uuid>,
    Query(query): Query<KeyQuery>,
) -> Result<Json<DeleteFileResponse>, AppError> {
    let session = store::get_owned_session(&state.db, &user.user_id, session_id).await?;
    owned_key(session.id, &query.key)?;

    state.storage.delete_object(&query.key).await?;
    let assets_removed = store::delete_assets_by_key(&state.db, session.id, &query.key).await?;

    info!(
        "Deleted {} from session {} ({assets_removed} asset rows)",
        query.key, session.id
    );
    Ok(Json(DeleteFileResponse {
        key: query.key,
        assets_removed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_of_key() {
        let id = Uuid::new_v4();
        assert_eq!(
            folder_of(id, &format!("sessions/{id}/images/ab12-leaf.png")).as_deref(),
            Some("images")
        );
        assert_eq!(folder_of(id, "sessions/other/images/x.png"), None);
    }

    #[test]
    fn test_keys_outside_the_session_are_rejected() {
        let id = Uuid::new_v4();
        assert!(owned_key(id, &format!("sessions/{id}/pdfs/a.pdf")).is_ok());
        assert!(owned_key(id, &format!("sessions/{}/pdfs/a.pdf", Uuid::new_v4())).is_err());
        assert!(owned_key(id, &format!("sessions/{id}/../other/a.pdf")).is_err());
    }
}
