// Narration: the narrative-builder agent and the Narration model.
// All LLM calls go through llm_client.

pub mod builder;
pub mod handlers;
pub mod models;
pub mod prompts;

use thiserror::Error;

use crate::errors::AppError;
use crate::llm_client::LlmError;

#[derive(Debug, Error)]
pub enum NarrationError {
    #[error("select at least one fact before generating a narration")]
    EmptyFacts,

    #[error("target duration {0}s is outside the supported 15-300s range")]
    InvalidTargetDuration(f64),

    #[error("narration model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("model returned an invalid narration: {0}")]
    Invalid(String),
}

impl From<NarrationError> for AppError {
    fn from(e: NarrationError) -> Self {
        match e {
            NarrationError::EmptyFacts | NarrationError::InvalidTargetDuration(_) => {
                AppError::Validation(e.to_string())
            }
            NarrationError::Llm(_) | NarrationError::Invalid(_) => AppError::Llm(e.to_string()),
        }
    }
}
