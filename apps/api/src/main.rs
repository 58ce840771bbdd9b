mod agent;
mod auth;
mod config;
mod db;
mod diagrams;
mod errors;
mod facts;
mod jobs;
mod llm_client;
mod models;
mod narration;
mod routes;
mod sessions;
mod state;
mod storage;
mod timeline;
mod video;
mod workflow;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::diagrams::DiagramSelector;
use crate::facts::extractor::FactExtractor;
use crate::facts::source::HttpFetcher;
use crate::jobs::JobQueue;
use crate::llm_client::{LanguageModel, LlmClient};
use crate::narration::builder::NarrativeBuilder;
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::{ObjectStore, S3Storage};
use crate::timeline::EditThrottles;
use crate::video::{HttpVideoProcessor, VideoProcessor};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Explainer API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL (runs migrations)
    let db = create_pool(&config.database_url).await?;

    // Initialize Redis job queue
    let redis = redis::Client::open(config.redis_url.clone())?;
    let job_queue = JobQueue::connect(redis).await?;
    info!("Redis job queue initialized");

    // Initialize S3 / MinIO
    let storage: Arc<dyn ObjectStore> = Arc::new(S3Storage::new(&config));
    info!("S3 storage initialized (bucket: {})", config.s3_bucket);

    // Initialize LLM client and the agents built on it
    let llm: Arc<dyn LanguageModel> = Arc::new(LlmClient::new(config.anthropic_api_key.clone())?);
    info!("LLM client initialized (model: {})", llm_client::MODEL);
    let extractor = FactExtractor::new(llm.clone(), Arc::new(HttpFetcher::new()?));
    let narrator = NarrativeBuilder::new(llm.clone());
    let diagram_selector = DiagramSelector::new(llm, storage.clone());

    // Initialize the external video-processing client
    let video: Arc<dyn VideoProcessor> = Arc::new(HttpVideoProcessor::new(&config)?);
    info!("Video processing API: {}", config.video_api_url);

    let state = AppState {
        db,
        jobs: job_queue,
        storage,
        extractor,
        narrator,
        diagrams: diagram_selector,
        video,
        timeline_throttles: EditThrottles::default(),
        config: config.clone(),
    };

    tokio::spawn(jobs::run_worker(state.clone()));
    info!("Background job worker started");

    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
