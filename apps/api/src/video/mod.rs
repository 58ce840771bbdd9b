//! Client for the external video-processing service, plus the mapping from its job
//! states onto session status.

pub mod handlers;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::AppError;
use crate::models::asset::AssetType;
use crate::models::session::VideoSession;
use crate::narration::models::Narration;
use crate::sessions::store;
use crate::storage::ObjectStore;

#[derive(Debug, Error)]
pub enum VideoApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service returned {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

/// Job state as reported by the processing service. Unknown states read as
/// `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "queued" | "pending" => JobState::Queued,
            "completed" | "complete" | "done" | "succeeded" => JobState::Completed,
            "failed" | "error" => JobState::Failed,
            "cancelled" | "canceled" => JobState::Cancelled,
            _ => JobState::Processing,
        }
    }
}

impl<'de> Deserialize<'de> for JobState {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Ok(JobState::parse(&raw))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(alias = "jobId")]
    pub job_id: String,
    pub status: JobState,
    #[serde(default, alias = "videoUrl")]
    pub video_url: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    #[serde(alias = "jobId")]
    job_id: Option<String>,
}

/// What a job status means for the session it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Complete { video_url: String },
    Failed { message: String },
    Unchanged,
}

impl StatusUpdate {
    pub fn from_job(status: &JobStatus) -> Self {
        match status.status {
            JobState::Completed => match status.video_url.as_deref().map(str::trim) {
                Some(url) if !url.is_empty() => StatusUpdate::Complete {
                    video_url: url.to_string(),
                },
                _ => StatusUpdate::Failed {
                    message: "Processing finished without a video URL".to_string(),
                },
            },
            JobState::Failed => StatusUpdate::Failed {
                message: status
                    .error
                    .clone()
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| "Video processing failed".to_string()),
            },
            JobState::Cancelled => StatusUpdate::Failed {
                message: "cancelled".to_string(),
            },
            JobState::Queued | JobState::Processing => StatusUpdate::Unchanged,
        }
    }
}

#[async_trait]
pub trait VideoProcessor: Send + Sync {
    /// Submits a narration for rendering. Returns the external job id.
    async fn start(
        &self,
        session: &VideoSession,
        narration: &Narration,
    ) -> Result<String, VideoApiError>;

    async fn check(&self, job_id: &str) -> Result<JobStatus, VideoApiError>;

    async fn cancel(&self, job_id: &str) -> Result<(), VideoApiError>;
}

pub struct HttpVideoProcessor {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    callback_url: Option<String>,
}

impl HttpVideoProcessor {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: config.video_api_url.clone(),
            api_key: config.video_api_key.clone(),
            callback_url: config
                .public_base_url
                .as_ref()
                .map(|base| format!("{base}/api/webhooks/video")),
        })
    }

    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, VideoApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {url}");

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!("Video API {path} returned {status}: {message}");
            return Err(VideoApiError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl VideoProcessor for HttpVideoProcessor {
    async fn start(
        &self,
        session: &VideoSession,
        narration: &Narration,
    ) -> Result<String, VideoApiError> {
        let body = json!({
            "session_id": session.id,
            "topic": session.topic,
            "learning_objective": session.learning_objective,
            "child_age": session.child_age,
            "child_interest": session.child_interest,
            "script": narration,
            "webhook_url": self.callback_url,
        });
        let response: StartResponse = self.post("/api/startprocessing", body).await?.json().await?;

        let job_id = response
            .job_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| VideoApiError::InvalidResponse("missing job_id".to_string()))?;
        info!("Started video job {job_id} for session {}", session.id);
        Ok(job_id)
    }

    async fn check(&self, job_id: &str) -> Result<JobStatus, VideoApiError> {
        let status: JobStatus = self
            .post("/api/checkprocessing", json!({ "job_id": job_id }))
            .await?
            .json()
            .await?;
        Ok(status)
    }

    async fn cancel(&self, job_id: &str) -> Result<(), VideoApiError> {
        self.post("/api/cancelprocessing", json!({ "job_id": job_id }))
            .await?;
        info!("Cancelled video job {job_id}");
        Ok(())
    }
}

/// Applies a job status to its session: a completed job records the video and its
/// asset, a failed job records the error. Other states leave the session alone.
pub async fn apply_job_status(
    pool: &PgPool,
    storage: &dyn ObjectStore,
    session: &VideoSession,
    status: &JobStatus,
) -> Result<StatusUpdate, AppError> {
    let update = StatusUpdate::from_job(status);
    match &update {
        StatusUpdate::Complete { video_url } => {
            store::mark_video_complete(pool, session.id, video_url).await?;
            store::record_asset(
                pool,
                session.id,
                AssetType::Video,
                Some(video_url),
                storage.key_from_url(video_url).as_deref(),
                json!({ "job_id": status.job_id }),
            )
            .await?;
            info!("Session {} video complete", session.id);
        }
        StatusUpdate::Failed { message } => {
            store::mark_video_failed(pool, session.id, message).await?;
            warn!("Session {} video failed: {message}", session.id);
        }
        StatusUpdate::Unchanged => {}
    }
    Ok(update)
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    /// In-memory processor that records calls and replays a fixed status.
    pub struct FakeProcessor {
        pub fail_start: bool,
        pub status: Mutex<Option<JobStatus>>,
        pub cancelled: Mutex<Vec<String>>,
    }

    impl FakeProcessor {
        pub fn new() -> Self {
            Self {
                fail_start: false,
                status: Mutex::new(None),
                cancelled: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl VideoProcessor for FakeProcessor {
        async fn start(
            &self,
            session: &VideoSession,
            _narration: &Narration,
        ) -> Result<String, VideoApiError> {
            if self.fail_start {
                return Err(VideoApiError::Rejected {
                    status: 503,
                    message: "renderer busy".to_string(),
                });
            }
            Ok(format!("job-{}", session.id))
        }

        async fn check(&self, job_id: &str) -> Result<JobStatus, VideoApiError> {
            self.status
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| VideoApiError::InvalidResponse(format!("no status for {job_id}")))
        }

        async fn cancel(&self, job_id: &str) -> Result<(), VideoApiError> {
            self.cancelled.lock().unwrap().push(job_id.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeProcessor;
    use super::*;

    fn job(status: &str, url: Option<&str>, error: Option<&str>) -> JobStatus {
        serde_json::from_value(json!({
            "job_id": "job-1",
            "status": status,
            "video_url": url,
            "error": error,
        }))
        .unwrap()
    }

    #[test]
    fn test_job_state_parsing_is_lenient() {
        assert_eq!(JobState::parse("COMPLETED"), JobState::Completed);
        assert_eq!(JobState::parse("canceled"), JobState::Cancelled);
        assert_eq!(JobState::parse("rendering_audio"), JobState::Processing);
    }

    #[test]
    fn test_completed_with_url_completes_the_session() {
        let update = StatusUpdate::from_job(&job("completed", Some("https://cdn/v.mp4"), None));
        assert_eq!(
            update,
            StatusUpdate::Complete {
                video_url: "https://cdn/v.mp4".to_string()
            }
        );
    }

    #[test]
    fn test_completed_without_url_is_a_failure() {
        let update = StatusUpdate::from_job(&job("completed", Some("  "), None));
        assert!(matches!(update, StatusUpdate::Failed { .. }));
    }

    #[test]
    fn test_failed_carries_the_service_error() {
        let update = StatusUpdate::from_job(&job("failed", None, Some("tts quota")));
        assert_eq!(
            update,
            StatusUpdate::Failed {
                message: "tts quota".to_string()
            }
        );
    }

    #[test]
    fn test_in_flight_states_leave_the_session_unchanged() {
        assert_eq!(
            StatusUpdate::from_job(&job("processing", None, None)),
            StatusUpdate::Unchanged
        );
        assert_eq!(
            StatusUpdate::from_job(&job("queued", None, None)),
            StatusUpdate::Unchanged
        );
    }

    #[test]
    fn test_job_status_accepts_camel_case_fields() {
        let status: JobStatus = serde_json::from_value(json!({
            "jobId": "abc",
            "status": "done",
            "videoUrl": "https://cdn/x.mp4",
        }))
        .unwrap();
        assert_eq!(status.job_id, "abc");
        assert_eq!(status.video_url.as_deref(), Some("https://cdn/x.mp4"));
    }

    #[tokio::test]
    async fn test_fake_processor_start_failure_is_rejected() {
        let mut processor = FakeProcessor::new();
        processor.fail_start = true;
        let session = VideoSession::new_for_tests("user-1");
        let narration: Narration =
            serde_json::from_str(crate::narration::builder::fixtures::PHOTOSYNTHESIS_NARRATION)
                .unwrap();
        let err = processor.start(&session, &narration).await.unwrap_err();
        assert!(matches!(err, VideoApiError::Rejected { status: 503, .. }));
    }
}
