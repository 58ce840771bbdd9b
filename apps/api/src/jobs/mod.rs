//! Background jobs: work that must not hold up the HTTP response.
//!
//! Jobs are appended to a Redis Stream and executed by a worker task. A failed job is
//! appended again with its attempt count raised until `MAX_JOB_ATTEMPTS`, then dropped
//! with an error log. Nothing here is ever surfaced to the user.

pub mod queue;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::diagrams;
use crate::models::message::NewMessage;
use crate::sessions::store;
use crate::state::AppState;

pub use queue::{Consumer, Delivery, JobQueue};

pub const MAX_JOB_ATTEMPTS: u32 = 3;
const WORKER_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    PersistMessage { message: NewMessage },
    SelectDiagrams { session_id: Uuid },
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::PersistMessage { .. } => "persist_message",
            Job::SelectDiagrams { .. } => "select_diagrams",
        }
    }
}

/// A job plus its delivery bookkeeping, as stored in Redis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub attempts: u32,
    pub job: Job,
}

impl Envelope {
    pub fn new(job: Job) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempts: 0,
            job,
        }
    }

    /// The envelope to re-enqueue after a failure, or `None` when out of attempts.
    pub fn retry(self) -> Option<Self> {
        let attempts = self.attempts + 1;
        (attempts < MAX_JOB_ATTEMPTS).then_some(Self { attempts, ..self })
    }
}

/// Hands a job to the queue. If Redis is unavailable the job runs on a detached
/// task instead, with failures logged.
pub async fn dispatch(state: &AppState, job: Job) {
    if let Err(e) = state.jobs.enqueue(Envelope::new(job.clone())).await {
        warn!("Could not enqueue {} job, running inline: {e}", job.name());
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = run_job(&state, &job).await {
                error!("Inline {} job failed: {e:#}", job.name());
            }
        });
    }
}

pub async fn run_job(state: &AppState, job: &Job) -> anyhow::Result<()> {
    match job {
        Job::PersistMessage { message } => {
            if !store::append_message(&state.db, message).await? {
                debug!("Message {} was already stored", message.id);
            }
        }
        Job::SelectDiagrams { session_id } => {
            diagrams::select_for_session(state, *session_id).await?;
        }
    }
    Ok(())
}

/// Worker loop. Runs for the life of the process.
///
/// Stale entries left by dead workers are taken first, then new ones. An entry is
/// acknowledged only after its job succeeded, was re-enqueued, or ran out of
/// attempts, so a crash mid-job leaves it pending for another worker.
pub async fn run_worker(state: AppState) {
    let mut consumer = loop {
        match state.jobs.consumer().await {
            Ok(consumer) => break consumer,
            Err(e) => {
                warn!("Job worker could not connect: {e}");
                tokio::time::sleep(WORKER_BACKOFF).await;
            }
        }
    };
    info!("Job worker {} consuming", consumer.name());

    loop {
        let deliveries = match consumer.claim_stale().await {
            Ok(stale) if !stale.is_empty() => Ok(stale),
            Ok(_) => consumer.read().await,
            Err(e) => Err(e),
        };

        match deliveries {
            Ok(deliveries) => {
                for delivery in deliveries {
                    process(&state, &mut consumer, delivery).await;
                }
            }
            Err(e) => {
                warn!("Job queue unavailable: {e}");
                tokio::time::sleep(WORKER_BACKOFF).await;
            }
        }
    }
}

async fn process(state: &AppState, consumer: &mut Consumer, delivery: Delivery) {
    let Delivery { entry_id, envelope } = delivery;
    let job_name = envelope.job.name();
    let job_id = envelope.id;

    if let Err(e) = run_job(state, &envelope.job).await {
        match envelope.retry() {
            Some(retry) => {
                warn!(
                    "Job {job_id} ({job_name}) failed on attempt {}: {e:#}",
                    retry.attempts
                );
                if let Err(qe) = state.jobs.enqueue(retry).await {
                    // Left unacknowledged, so it is claimed again after the idle timeout.
                    error!("Could not re-enqueue job {job_id} ({job_name}): {qe}");
                    return;
                }
            }
            None => error!(
                "Dropping job {job_id} ({job_name}) after {MAX_JOB_ATTEMPTS} attempts: {e:#}"
            ),
        }
    }

    if let Err(e) = consumer.ack(&entry_id).await {
        warn!("Could not acknowledge job {job_id} ({job_name}): {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::MessageRole;

    #[test]
    fn test_retry_stops_at_max_attempts() {
        let mut envelope = Envelope::new(Job::SelectDiagrams {
            session_id: Uuid::nil(),
        });
        let mut deliveries = 1;
        while let Some(next) = envelope.clone().retry() {
            envelope = next;
            deliveries += 1;
        }
        assert_eq!(deliveries, MAX_JOB_ATTEMPTS);
    }

    #[test]
    fn test_envelope_wire_format_is_tagged() {
        let envelope = Envelope::new(Job::PersistMessage {
            message: NewMessage::new(Uuid::nil(), MessageRole::User, "Teach gravity"),
        });
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["attempts"], 0);
        assert_eq!(json["job"]["kind"], "persist_message");
        assert_eq!(json["job"]["message"]["role"], "user");

        let back: Envelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }
}
