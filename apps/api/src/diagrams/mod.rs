//! Diagram selection: scores a session's uploaded images against its narration with
//! one vision call per image, then promotes the best ones into the session's
//! `diagrams/` folder.
//!
//! Runs as a background job after the narration is verified. Failures are logged
//! only.

pub mod prompts;

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::diagrams::prompts::{DIAGRAM_SCORING_PROMPT, DIAGRAM_SCORING_SYSTEM};
use crate::errors::AppError;
use crate::facts::models::Fact;
use crate::llm_client::prompts::json_system;
use crate::llm_client::{complete_json, ContentPart, LanguageModel, LlmError, LlmRequest};
use crate::models::asset::{AssetType, VideoAsset};
use crate::narration::models::Narration;
use crate::sessions::store;
use crate::state::AppState;
use crate::storage::{keys, ObjectStore, StorageError};

/// At most this many diagrams are promoted per session.
pub const MAX_DIAGRAMS: usize = 2;
/// Images scoring below this are never promoted.
pub const MIN_SCORE: f64 = 6.0;
const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
struct RawScore {
    score: f64,
    #[serde(default)]
    reason: String,
}

/// A candidate image with its relevance score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredImage {
    pub storage_key: String,
    pub score: f64,
    pub reason: String,
}

/// A diagram copied into the session's diagrams folder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotedDiagram {
    pub source_key: String,
    pub diagram_key: String,
    pub score: f64,
    pub reason: String,
}

/// What the narration is about, for the scoring prompt.
pub struct ScoringContext<'a> {
    pub topic: &'a str,
    pub facts: &'a [Fact],
    pub narration: &'a Narration,
}

#[derive(Clone)]
pub struct DiagramSelector {
    llm: Arc<dyn LanguageModel>,
    storage: Arc<dyn ObjectStore>,
}

impl DiagramSelector {
    pub fn new(llm: Arc<dyn LanguageModel>, storage: Arc<dyn ObjectStore>) -> Self {
        Self { llm, storage }
    }

    /// Scores every candidate key, then copies the winners. Candidates that cannot
    /// be read or scored are skipped.
    pub async fn select(
        &self,
        session_id: Uuid,
        candidate_keys: &[String],
        context: &ScoringContext<'_>,
    ) -> Vec<PromotedDiagram> {
        let prompt = build_scoring_prompt(context);
        let mut scored = Vec::new();

        for key in candidate_keys {
            match self.score_image(key, &prompt).await {
                Ok(Some(image)) => scored.push(image),
                Ok(None) => {}
                Err(e) => warn!("Skipping diagram candidate {key}: {e}"),
            }
        }

        let mut promoted = Vec::new();
        for winner in select_top(scored) {
            let diagram_key = keys::diagram_key(session_id, &winner.storage_key);
            match self
                .storage
                .copy_object(&winner.storage_key, &diagram_key)
                .await
            {
                Ok(()) => promoted.push(PromotedDiagram {
                    source_key: winner.storage_key,
                    diagram_key,
                    score: winner.score,
                    reason: winner.reason,
                }),
                Err(e) => warn!("Failed to promote diagram {}: {e}", winner.storage_key),
            }
        }
        promoted
    }

    /// `Ok(None)` for files that are not supported images.
    async fn score_image(&self, key: &str, prompt: &str) -> Result<Option<ScoredImage>, ScoreError> {
        let Some(media_type) = image_media_type(key) else {
            return Ok(None);
        };
        let bytes = self.storage.get_bytes(key).await?;
        if bytes.len() > MAX_IMAGE_BYTES {
            return Ok(None);
        }

        let request = LlmRequest::text(json_system(DIAGRAM_SCORING_SYSTEM), prompt)
            .with_part(ContentPart::Image {
                media_type: media_type.to_string(),
                data: BASE64.encode(&bytes),
            })
            .max_tokens(256);
        let raw: RawScore = complete_json(self.llm.as_ref(), request).await?;

        let score = if raw.score.is_finite() {
            raw.score.clamp(0.0, 10.0)
        } else {
            0.0
        };
        Ok(Some(ScoredImage {
            storage_key: key.to_string(),
            score,
            reason: raw.reason,
        }))
    }
}

#[derive(Debug, thiserror::Error)]
enum ScoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Top `MAX_DIAGRAMS` images scoring at least `MIN_SCORE`, best first. Ties keep
/// upload order.
pub fn select_top(mut scored: Vec<ScoredImage>) -> Vec<ScoredImage> {
    scored.retain(|s| s.score >= MIN_SCORE);
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(MAX_DIAGRAMS);
    scored
}

pub fn image_media_type(key: &str) -> Option<&'static str> {
    let ext = key.rsplit('.').next()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

fn build_scoring_prompt(context: &ScoringContext<'_>) -> String {
    let facts = context
        .facts
        .iter()
        .map(|f| format!("- {}: {}", f.concept, f.details))
        .collect::<Vec<_>>()
        .join("\n");
    let narration = context
        .narration
        .segments
        .iter()
        .map(|s| format!("[{}] {}", s.segment_type.as_str(), s.narration))
        .collect::<Vec<_>>()
        .join("\n");

    DIAGRAM_SCORING_PROMPT
        .replace("{topic}", context.topic)
        .replace("{facts}", &facts)
        .replace("{narration}", &narration)
}

/// Background job body: loads the session, scores its uploaded images, and records
/// a `diagram` asset per promoted image.
pub async fn select_for_session(
    state: &AppState,
    session_id: Uuid,
) -> Result<Vec<PromotedDiagram>, AppError> {
    let session: crate::models::session::VideoSession =
        sqlx::query_as("SELECT * FROM video_session WHERE id = $1")
            .bind(session_id)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Session {session_id} not found")))?;

    let Some(narration) = session.parsed_narration() else {
        info!("Session {session_id} has no narration, skipping diagram selection");
        return Ok(Vec::new());
    };
    let facts = session.parsed_confirmed_facts().unwrap_or_default();

    let candidates: Vec<String> = store::list_assets(&state.db, session_id, Some(AssetType::Image))
        .await?
        .iter()
        .filter_map(|a: &VideoAsset| a.storage_key.clone())
        .collect();
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let context = ScoringContext {
        topic: session.topic.as_deref().unwrap_or("this lesson"),
        facts: &facts,
        narration: &narration,
    };
    let promoted = state
        .diagrams
        .select(session_id, &candidates, &context)
        .await;

    // A rerun replaces the previous winners. Objects a new winner overwrites stay.
    let previous = store::list_assets(&state.db, session_id, Some(AssetType::Diagram)).await?;
    for key in stale_diagram_keys(&previous, &promoted) {
        if let Err(e) = state.storage.delete_object(&key).await {
            warn!("Could not delete replaced diagram {key}: {e}");
        }
    }
    let replaced = store::delete_assets_of_type(&state.db, session_id, AssetType::Diagram).await?;
    if replaced > 0 {
        info!("Replaced {replaced} earlier diagram(s) for session {session_id}");
    }

    for diagram in &promoted {
        store::record_asset(
            &state.db,
            session_id,
            AssetType::Diagram,
            Some(&state.storage.object_url(&diagram.diagram_key)),
            Some(&diagram.diagram_key),
            json!({
                "source_key": diagram.source_key,
                "score": diagram.score,
                "reason": diagram.reason,
            }),
        )
        .await?;
    }

    info!(
        "Diagram selection for session {}: {} of {} candidates promoted",
        session_id,
        promoted.len(),
        candidates.len()
    );
    Ok(promoted)
}

/// Storage keys of earlier diagram assets that no new winner reuses.
fn stale_diagram_keys(previous: &[VideoAsset], promoted: &[PromotedDiagram]) -> Vec<String> {
    previous
        .iter()
        .filter(|a| a.is(AssetType::Diagram))
        .filter_map(|a| a.storage_key.clone())
        .filter(|key| !promoted.iter().any(|d| &d.diagram_key == key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::testing::ScriptedModel;
    use crate::narration::builder::fixtures::PHOTOSYNTHESIS_NARRATION;
    use crate::storage::testing::MemoryStore;

    fn scored(key: &str, score: f64) -> ScoredImage {
        ScoredImage {
            storage_key: key.to_string(),
            score,
            reason: String::new(),
        }
    }

    #[test]
    fn test_select_top_keeps_two_best_above_threshold() {
        let winners = select_top(vec![
            scored("a", 7.0),
            scored("b", 5.9),
            scored("c", 9.0),
            scored("d", 8.0),
        ]);
        let keys: Vec<_> = winners.iter().map(|w| w.storage_key.as_str()).collect();
        assert_eq!(keys, vec!["c", "d"]);
    }

    #[test]
    fn test_select_top_ties_keep_upload_order() {
        let winners = select_top(vec![scored("first", 6.0), scored("second", 6.0)]);
        assert_eq!(winners[0].storage_key, "first");
    }

    #[test]
    fn test_select_top_can_be_empty() {
        assert!(select_top(vec![scored("logo", 1.0), scored("footer", 0.0)]).is_empty());
    }

    #[test]
    fn test_image_media_type() {
        assert_eq!(image_media_type("x/leaf.PNG"), Some("image/png"));
        assert_eq!(image_media_type("x/leaf.jpeg"), Some("image/jpeg"));
        assert_eq!(image_media_type("x/notes.pdf"), None);
    }

    fn diagram_asset(asset_type: AssetType, key: &str) -> VideoAsset {
        VideoAsset {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            asset_type: asset_type.as_str().to_string(),
            url: None,
            storage_key: Some(key.to_string()),
            metadata: json!({}),
            created_at: chrono::Utc::now(),
        }
    }

    fn promoted(diagram_key: &str) -> PromotedDiagram {
        PromotedDiagram {
            source_key: String::new(),
            diagram_key: diagram_key.to_string(),
            score: 9.0,
            reason: String::new(),
        }
    }

    #[test]
    fn test_rerun_drops_diagrams_that_lost() {
        let previous = vec![
            diagram_asset(AssetType::Diagram, "s/diagrams/leaf.png"),
            diagram_asset(AssetType::Diagram, "s/diagrams/cycle.jpg"),
            diagram_asset(AssetType::Image, "s/images/header.png"),
        ];
        let stale = stale_diagram_keys(&previous, &[promoted("s/diagrams/cycle.jpg")]);
        assert_eq!(stale, vec!["s/diagrams/leaf.png".to_string()]);
    }

    #[test]
    fn test_rerun_with_no_winners_drops_every_diagram() {
        let previous = vec![
            diagram_asset(AssetType::Diagram, "s/diagrams/leaf.png"),
            diagram_asset(AssetType::Diagram, "s/diagrams/cycle.jpg"),
        ];
        assert_eq!(stale_diagram_keys(&previous, &[]).len(), 2);
    }

    #[tokio::test]
    async fn test_select_scores_each_image_and_copies_winners() {
        let session_id = Uuid::new_v4();
        let prefix = format!("sessions/{session_id}/images");
        let candidates = vec![
            format!("{prefix}/leaf.png"),
            format!("{prefix}/header.png"),
            format!("{prefix}/cycle.jpg"),
            format!("{prefix}/notes.pdf"),
        ];
        let existing: Vec<&str> = candidates.iter().map(String::as_str).collect();
        let storage = Arc::new(MemoryStore::with_objects(&existing));
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(r#"{"score": 8, "reason": "labelled leaf diagram"}"#),
            Ok(r#"{"score": 1, "reason": "page header"}"#),
            Ok(r#"{"score": 14, "reason": "exact process"}"#),
        ]));
        let selector = DiagramSelector::new(model.clone(), storage.clone());

        let narration: Narration = serde_json::from_str(PHOTOSYNTHESIS_NARRATION).unwrap();
        let context = ScoringContext {
            topic: "Photosynthesis",
            facts: &[],
            narration: &narration,
        };
        let promoted = selector.select(session_id, &candidates, &context).await;

        assert_eq!(model.request_count(), 3);
        assert_eq!(promoted.len(), 2);
        assert_eq!(promoted[0].score, 10.0);
        assert!(promoted[0].diagram_key.ends_with("/diagrams/cycle.jpg"));
        assert!(storage.contains(&format!("sessions/{session_id}/diagrams/leaf.png")));
        assert!(!storage.contains(&format!("sessions/{session_id}/diagrams/header.png")));
    }

    #[tokio::test]
    async fn test_select_skips_images_the_model_cannot_score() {
        let session_id = Uuid::new_v4();
        let key = format!("sessions/{session_id}/images/leaf.png");
        let storage = Arc::new(MemoryStore::with_objects(&[key.as_str()]));
        let model = Arc::new(ScriptedModel::new(vec![Err("vision unavailable")]));
        let selector = DiagramSelector::new(model, storage);

        let narration: Narration = serde_json::from_str(PHOTOSYNTHESIS_NARRATION).unwrap();
        let context = ScoringContext {
            topic: "Photosynthesis",
            facts: &[],
            narration: &narration,
        };
        assert!(selector.select(session_id, &[key], &context).await.is_empty());
    }
}
