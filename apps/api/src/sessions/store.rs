//! Session persistence: `video_session`, `video_conversation_message`, `video_asset`.
//!
//! Every stage of the pipeline writes through here. Reads always check that the
//! session belongs to the caller.

use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::facts::models::Fact;
use crate::models::asset::{AssetType, VideoAsset};
use crate::models::message::{ConversationMessage, NewMessage};
use crate::models::session::{SessionStatus, SourceMaterial, VideoSession};
use crate::narration::models::Narration;
use crate::storage::{keys, ObjectStore};

/// Personalization captured when a session is created or first messaged.
#[derive(Debug, Clone, Default)]
pub struct StudentProfile {
    pub child_age: Option<i32>,
    pub child_interest: Option<String>,
}

pub async fn create_session(
    pool: &PgPool,
    user_id: &str,
    profile: &StudentProfile,
) -> Result<VideoSession, AppError> {
    let session = sqlx::query_as::<_, VideoSession>(
        r#"
        INSERT INTO video_session (id, user_id, status, child_age, child_interest)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(SessionStatus::Created.as_str())
    .bind(profile.child_age)
    .bind(profile.child_interest.as_deref())
    .fetch_one(pool)
    .await?;

    info!("Created session {} for user {}", session.id, user_id);
    Ok(session)
}

/// Loads a session owned by `user_id`. Someone else's session reads as not found.
pub async fn get_owned_session(
    pool: &PgPool,
    user_id: &str,
    session_id: Uuid,
) -> Result<VideoSession, AppError> {
    sqlx::query_as::<_, VideoSession>("SELECT * FROM video_session WHERE id = $1 AND user_id = $2")
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Session {session_id} not found")))
}

/// Resumes the requested session or starts a new one. Profile fields fill in
/// whatever the session does not know yet.
pub async fn load_or_create_session(
    pool: &PgPool,
    user_id: &str,
    requested: Option<Uuid>,
    profile: &StudentProfile,
) -> Result<VideoSession, AppError> {
    let Some(session_id) = requested else {
        return create_session(pool, user_id, profile).await;
    };

    let session = get_owned_session(pool, user_id, session_id).await?;
    if profile.child_age.is_none() && profile.child_interest.is_none() {
        return Ok(session);
    }

    Ok(sqlx::query_as::<_, VideoSession>(
        r#"
        UPDATE video_session
        SET child_age = COALESCE($2, child_age),
            child_interest = COALESCE($3, child_interest),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(session.id)
    .bind(profile.child_age)
    .bind(profile.child_interest.as_deref())
    .fetch_one(pool)
    .await?)
}

pub async fn list_sessions(pool: &PgPool, user_id: &str) -> Result<Vec<VideoSession>, AppError> {
    Ok(sqlx::query_as::<_, VideoSession>(
        "SELECT * FROM video_session WHERE user_id = $1 ORDER BY updated_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?)
}

pub async fn find_session_by_job(
    pool: &PgPool,
    job_id: &str,
) -> Result<Option<VideoSession>, AppError> {
    Ok(
        sqlx::query_as::<_, VideoSession>("SELECT * FROM video_session WHERE processing_job_id = $1")
            .bind(job_id)
            .fetch_optional(pool)
            .await?,
    )
}

pub async fn list_completed_videos(
    pool: &PgPool,
    user_id: &str,
) -> Result<Vec<VideoSession>, AppError> {
    Ok(sqlx::query_as::<_, VideoSession>(
        r#"
        SELECT * FROM video_session
        WHERE user_id = $1 AND status = $2 AND final_video_url IS NOT NULL
        ORDER BY updated_at DESC
        "#,
    )
    .bind(user_id)
    .bind(SessionStatus::VideoComplete.as_str())
    .fetch_all(pool)
    .await?)
}

const SAVE_EXTRACTION_SQL: &str = r#"
    UPDATE video_session
    SET status = $2,
        extracted_facts = $3,
        topic = COALESCE($4, topic),
        learning_objective = COALESCE($5, learning_objective),
        selected_fact_indices = '{}',
        confirmed_facts = NULL,
        generated_script = NULL,
        editor_timeline = NULL,
        updated_at = NOW()
    WHERE id = $1
    RETURNING *
"#;

/// Stores a fresh extraction. Anything derived from the previous fact list is
/// discarded, the edited timeline included.
pub async fn save_extraction(
    pool: &PgPool,
    session_id: Uuid,
    facts: &[Fact],
    topic: Option<&str>,
    learning_objective: Option<&str>,
) -> Result<VideoSession, AppError> {
    Ok(sqlx::query_as::<_, VideoSession>(SAVE_EXTRACTION_SQL)
        .bind(session_id)
        .bind(SessionStatus::FactsExtracted.as_str())
        .bind(serde_json::to_value(facts).map_err(anyhow::Error::from)?)
        .bind(topic)
        .bind(learning_objective)
        .fetch_one(pool)
        .await?)
}

pub async fn save_selection(
    pool: &PgPool,
    session_id: Uuid,
    indices: &[usize],
) -> Result<(), AppError> {
    let indices: Vec<i32> = indices.iter().map(|&i| i as i32).collect();
    sqlx::query(
        "UPDATE video_session SET selected_fact_indices = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(session_id)
    .bind(&indices)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn save_script(
    pool: &PgPool,
    session_id: Uuid,
    confirmed: &[Fact],
    narration: &Narration,
) -> Result<VideoSession, AppError> {
    Ok(sqlx::query_as::<_, VideoSession>(
        r#"
        UPDATE video_session
        SET status = $2,
            confirmed_facts = $3,
            generated_script = $4,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(session_id)
    .bind(SessionStatus::ScriptGenerated.as_str())
    .bind(serde_json::to_value(confirmed).map_err(anyhow::Error::from)?)
    .bind(serde_json::to_value(narration).map_err(anyhow::Error::from)?)
    .fetch_one(pool)
    .await?)
}

/// Manual edits put the session back to `script_generated` until re-verified.
pub async fn update_script(
    pool: &PgPool,
    session_id: Uuid,
    narration: &Narration,
) -> Result<VideoSession, AppError> {
    Ok(sqlx::query_as::<_, VideoSession>(
        r#"
        UPDATE video_session
        SET status = $2, generated_script = $3, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(session_id)
    .bind(SessionStatus::ScriptGenerated.as_str())
    .bind(serde_json::to_value(narration).map_err(anyhow::Error::from)?)
    .fetch_one(pool)
    .await?)
}

pub async fn set_status(
    pool: &PgPool,
    session_id: Uuid,
    status: SessionStatus,
) -> Result<(), AppError> {
    sqlx::query("UPDATE video_session SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(session_id)
        .bind(status.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_video_generating(
    pool: &PgPool,
    session_id: Uuid,
    job_id: &str,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE video_session
        SET status = $2, processing_job_id = $3, error_message = NULL, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(session_id)
    .bind(SessionStatus::VideoGenerating.as_str())
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_video_complete(
    pool: &PgPool,
    session_id: Uuid,
    video_url: &str,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE video_session
        SET status = $2, final_video_url = $3, error_message = NULL, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(session_id)
    .bind(SessionStatus::VideoComplete.as_str())
    .bind(video_url)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_video_failed(
    pool: &PgPool,
    session_id: Uuid,
    message: &str,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE video_session SET status = $2, error_message = $3, updated_at = NOW() WHERE id = $1",
    )
    .bind(session_id)
    .bind(SessionStatus::VideoFailed.as_str())
    .bind(message)
    .execute(pool)
    .await?;
    Ok(())
}

const RESET_SESSION_SQL: &str = r#"
    UPDATE video_session
    SET status = $2,
        topic = NULL,
        learning_objective = NULL,
        extracted_facts = '[]'::jsonb,
        selected_fact_indices = '{}',
        confirmed_facts = NULL,
        generated_script = NULL,
        editor_timeline = NULL,
        final_video_url = NULL,
        processing_job_id = NULL,
        error_message = NULL,
        updated_at = NOW()
    WHERE id = $1
    RETURNING *
"#;

/// Back to `created` with no facts and no render state. Personalization and
/// uploads are kept.
pub async fn reset_session(pool: &PgPool, session_id: Uuid) -> Result<VideoSession, AppError> {
    Ok(sqlx::query_as::<_, VideoSession>(RESET_SESSION_SQL)
        .bind(session_id)
        .bind(SessionStatus::Created.as_str())
        .fetch_one(pool)
        .await?)
}

pub async fn append_source_material(
    pool: &PgPool,
    session_id: Uuid,
    material: &SourceMaterial,
) -> Result<(), AppError> {
    let entry = serde_json::to_value([material]).map_err(anyhow::Error::from)?;
    sqlx::query(
        r#"
        UPDATE video_session
        SET source_materials = source_materials || $2::jsonb, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(session_id)
    .bind(entry)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn save_timeline(
    pool: &PgPool,
    session_id: Uuid,
    timeline: &Value,
) -> Result<(), AppError> {
    sqlx::query("UPDATE video_session SET editor_timeline = $2, updated_at = NOW() WHERE id = $1")
        .bind(session_id)
        .bind(timeline)
        .execute(pool)
        .await?;
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Messages
// ────────────────────────────────────────────────────────────────────────────

/// Append-only: messages are never updated. Inserting a message id that already
/// exists is a no-op, so redelivered jobs are harmless. Returns whether a row was
/// written.
pub async fn append_message(pool: &PgPool, message: &NewMessage) -> Result<bool, AppError> {
    let result = sqlx::query(
        r#"
        INSERT INTO video_conversation_message
            (id, session_id, role, content, parts, metadata, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(message.id)
    .bind(message.session_id)
    .bind(message.role.as_str())
    .bind(&message.content)
    .bind(&message.parts)
    .bind(&message.metadata)
    .bind(message.created_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn list_messages(
    pool: &PgPool,
    session_id: Uuid,
) -> Result<Vec<ConversationMessage>, AppError> {
    Ok(sqlx::query_as::<_, ConversationMessage>(
        "SELECT * FROM video_conversation_message WHERE session_id = $1 ORDER BY created_at, id",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?)
}

// ────────────────────────────────────────────────────────────────────────────
// Assets
// ────────────────────────────────────────────────────────────────────────────

pub async fn record_asset(
    pool: &PgPool,
    session_id: Uuid,
    asset_type: AssetType,
    url: Option<&str>,
    storage_key: Option<&str>,
    metadata: Value,
) -> Result<VideoAsset, AppError> {
    Ok(sqlx::query_as::<_, VideoAsset>(
        r#"
        INSERT INTO video_asset (id, session_id, asset_type, url, storage_key, metadata)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(session_id)
    .bind(asset_type.as_str())
    .bind(url)
    .bind(storage_key)
    .bind(metadata)
    .fetch_one(pool)
    .await?)
}

pub async fn list_assets(
    pool: &PgPool,
    session_id: Uuid,
    asset_type: Option<AssetType>,
) -> Result<Vec<VideoAsset>, AppError> {
    Ok(sqlx::query_as::<_, VideoAsset>(
        r#"
        SELECT * FROM video_asset
        WHERE session_id = $1 AND ($2::text IS NULL OR asset_type = $2)
        ORDER BY created_at, id
        "#,
    )
    .bind(session_id)
    .bind(asset_type.map(|t| t.as_str()))
    .fetch_all(pool)
    .await?)
}

/// Deletes asset rows pointing at `storage_key`. Returns how many were removed.
pub async fn delete_assets_by_key(
    pool: &PgPool,
    session_id: Uuid,
    storage_key: &str,
) -> Result<u64, AppError> {
    let result = sqlx::query("DELETE FROM video_asset WHERE session_id = $1 AND storage_key = $2")
        .bind(session_id)
        .bind(storage_key)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete_assets_of_type(
    pool: &PgPool,
    session_id: Uuid,
    asset_type: AssetType,
) -> Result<u64, AppError> {
    let result = sqlx::query("DELETE FROM video_asset WHERE session_id = $1 AND asset_type = $2")
        .bind(session_id)
        .bind(asset_type.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// ────────────────────────────────────────────────────────────────────────────
// Deletion
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    pub attempted: usize,
    pub deleted: usize,
    pub failed: Vec<String>,
    pub skipped_external: Vec<String>,
}

/// Removes the stored objects behind a session's assets. Storage failures are
/// logged and recorded, never returned, so the database delete always proceeds.
pub async fn cleanup_asset_objects(storage: &dyn ObjectStore, assets: &[VideoAsset]) -> CleanupReport {
    let mut report = CleanupReport::default();

    for asset in assets {
        let key = asset
            .storage_key
            .clone()
            .or_else(|| asset.url.as_deref().and_then(|u| storage.key_from_url(u)));

        let Some(key) = key else {
            if let Some(url) = &asset.url {
                report.skipped_external.push(url.clone());
            }
            continue;
        };

        report.attempted += 1;
        match storage.delete_object(&key).await {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                warn!("Failed to delete object {key} for asset {}: {e}", asset.id);
                report.failed.push(key);
            }
        }
    }

    report
}

/// Removes everything stored for a session: first the objects behind its assets,
/// then anything else left under the session prefix (such as files uploaded
/// through presigned URLs, which have no asset row). Failures are logged and
/// recorded, never returned.
pub async fn cleanup_session_objects(
    storage: &dyn ObjectStore,
    session_id: Uuid,
    assets: &[VideoAsset],
) -> CleanupReport {
    let mut report = cleanup_asset_objects(storage, assets).await;

    let prefix = keys::session_prefix(session_id);
    let leftovers = match storage.list_prefix(&prefix).await {
        Ok(objects) => objects,
        Err(e) => {
            warn!("Failed to list {prefix} for cleanup: {e}");
            report.failed.push(prefix);
            return report;
        }
    };

    for object in leftovers {
        if report.failed.contains(&object.key) {
            continue;
        }
        report.attempted += 1;
        match storage.delete_object(&object.key).await {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                warn!("Failed to delete leftover object {}: {e}", object.key);
                report.failed.push(object.key);
            }
        }
    }
    report
}

/// Deletes a session, its messages and assets (FK cascade), and their stored
/// objects. Storage cleanup is best-effort.
pub async fn delete_session(
    pool: &PgPool,
    storage: &dyn ObjectStore,
    user_id: &str,
    session_id: Uuid,
) -> Result<CleanupReport, AppError> {
    let session = get_owned_session(pool, user_id, session_id).await?;
    let assets = list_assets(pool, session.id, None).await?;

    let report = cleanup_session_objects(storage, session.id, &assets).await;

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM video_asset WHERE session_id = $1")
        .bind(session.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM video_conversation_message WHERE session_id = $1")
        .bind(session.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM video_session WHERE id = $1")
        .bind(session.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(
        "Deleted session {} ({} assets, {} storage failures)",
        session.id,
        assets.len(),
        report.failed.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::Utc;

    use super::*;
    use crate::storage::testing::MemoryStore;

    fn clears(sql: &str, column: &str) -> bool {
        sql.lines()
            .any(|line| line.trim().trim_end_matches(',') == format!("{column} = NULL"))
    }

    #[test]
    fn test_new_extraction_clears_everything_built_on_old_facts() {
        for column in ["confirmed_facts", "generated_script", "editor_timeline"] {
            assert!(clears(SAVE_EXTRACTION_SQL, column), "{column} survives re-extraction");
        }
        assert!(!clears(SAVE_EXTRACTION_SQL, "final_video_url"));
    }

    #[test]
    fn test_reset_clears_render_state() {
        for column in [
            "topic",
            "confirmed_facts",
            "generated_script",
            "editor_timeline",
            "final_video_url",
            "processing_job_id",
            "error_message",
        ] {
            assert!(clears(RESET_SESSION_SQL, column), "{column} survives reset");
        }
    }

    fn asset(url: Option<&str>, key: Option<&str>) -> VideoAsset {
        VideoAsset {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            asset_type: AssetType::Image.as_str().to_string(),
            url: url.map(String::from),
            storage_key: key.map(String::from),
            metadata: Value::Null,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_cleanup_attempts_every_asset_with_a_url() {
        let store = MemoryStore::with_objects(&["sessions/a/images/1.png", "sessions/a/pdfs/2.pdf"]);
        let assets = vec![
            asset(Some("memory://bucket/sessions/a/images/1.png"), None),
            asset(None, Some("sessions/a/pdfs/2.pdf")),
            asset(None, None),
        ];

        let report = cleanup_asset_objects(&store, &assets).await;

        assert_eq!(report.attempted, 2);
        assert_eq!(report.deleted, 2);
        assert!(!store.contains("sessions/a/images/1.png"));
        assert!(!store.contains("sessions/a/pdfs/2.pdf"));
    }

    #[tokio::test]
    async fn test_cleanup_continues_past_storage_failures() {
        let mut store = MemoryStore::with_objects(&["k/1", "k/2", "k/3"]);
        store.fail_deletes = HashSet::from(["k/2".to_string()]);
        let assets = vec![
            asset(None, Some("k/1")),
            asset(None, Some("k/2")),
            asset(None, Some("k/3")),
        ];

        let report = cleanup_asset_objects(&store, &assets).await;

        assert_eq!(report.attempted, 3);
        assert_eq!(report.deleted, 2);
        assert_eq!(report.failed, vec!["k/2".to_string()]);
        assert_eq!(store.delete_attempts.lock().unwrap().len(), 3);
        assert!(!store.contains("k/3"));
    }

    #[tokio::test]
    async fn test_session_cleanup_removes_files_without_asset_rows() {
        let session_id = Uuid::new_v4();
        let tracked = format!("sessions/{session_id}/images/1.png");
        let presigned = format!("sessions/{session_id}/pdfs/ab12cd34-notes.pdf");
        let other_session = format!("sessions/{}/pdfs/keep.pdf", Uuid::new_v4());
        let store = MemoryStore::with_objects(&[tracked.as_str(), presigned.as_str(), other_session.as_str()]);
        let assets = vec![asset(None, Some(tracked.as_str()))];

        let report = cleanup_session_objects(&store, session_id, &assets).await;

        assert_eq!(report.deleted, 2);
        assert!(!store.contains(&tracked));
        assert!(!store.contains(&presigned));
        assert!(store.contains(&other_session));
    }

    #[tokio::test]
    async fn test_session_cleanup_does_not_retry_failed_asset_deletes() {
        let session_id = Uuid::new_v4();
        let stuck = format!("sessions/{session_id}/images/stuck.png");
        let loose = format!("sessions/{session_id}/images/loose.png");
        let mut store = MemoryStore::with_objects(&[stuck.as_str(), loose.as_str()]);
        store.fail_deletes = HashSet::from([stuck.clone()]);

        let report = cleanup_session_objects(&store, session_id, &[asset(None, Some(stuck.as_str()))]).await;

        assert_eq!(report.failed, vec![stuck.clone()]);
        assert_eq!(report.deleted, 1);
        assert_eq!(store.delete_attempts.lock().unwrap().len(), 2);
        assert!(!store.contains(&loose));
    }

    #[tokio::test]
    async fn test_cleanup_skips_urls_outside_the_bucket() {
        let store = MemoryStore::default();
        let assets = vec![asset(Some("https://cdn.render.example/v/123.mp4"), None)];

        let report = cleanup_asset_objects(&store, &assets).await;

        assert_eq!(report.attempted, 0);
        assert_eq!(report.skipped_external.len(), 1);
    }
}
