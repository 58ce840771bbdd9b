use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::diagrams::DiagramSelector;
use crate::facts::extractor::FactExtractor;
use crate::jobs::JobQueue;
use crate::narration::builder::NarrativeBuilder;
use crate::storage::ObjectStore;
use crate::timeline::EditThrottles;
use crate::video::VideoProcessor;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// Redis-backed queue for persistence and diagram jobs.
    pub jobs: JobQueue,
    pub storage: Arc<dyn ObjectStore>,
    pub extractor: FactExtractor,
    pub narrator: NarrativeBuilder,
    pub diagrams: DiagramSelector,
    pub video: Arc<dyn VideoProcessor>,
    pub timeline_throttles: EditThrottles,
    pub config: Config,
}
