//! Narrative builder agent: confirmed facts in, one four-segment narration out.

use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::facts::models::Fact;
use crate::llm_client::prompts::{json_system, GROUNDING_INSTRUCTION};
use crate::llm_client::{complete_json, LanguageModel, LlmRequest};
use crate::narration::models::{normalize_narration, Narration};
use crate::narration::prompts::{reading_level_for_age, NARRATION_PROMPT, NARRATION_SYSTEM};
use crate::narration::NarrationError;

pub const DEFAULT_TARGET_DURATION: f64 = 60.0;
const MIN_TARGET_DURATION: f64 = 15.0;
const MAX_TARGET_DURATION: f64 = 300.0;

#[derive(Debug, Clone, Deserialize)]
pub struct NarrationRequest {
    pub topic: String,
    pub facts: Vec<Fact>,
    #[serde(default)]
    pub target_duration: Option<f64>,
    #[serde(default)]
    pub child_age: Option<u32>,
    #[serde(default)]
    pub child_interest: Option<String>,
}

impl NarrationRequest {
    pub fn target(&self) -> f64 {
        self.target_duration.unwrap_or(DEFAULT_TARGET_DURATION)
    }
}

#[derive(Clone)]
pub struct NarrativeBuilder {
    llm: Arc<dyn LanguageModel>,
}

impl NarrativeBuilder {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    /// Builds and normalizes a narration. The model's reading level is overwritten with
    /// the age band we asked for.
    pub async fn build(&self, request: &NarrationRequest) -> Result<Narration, NarrationError> {
        if request.facts.is_empty() {
            return Err(NarrationError::EmptyFacts);
        }
        let target = request.target();
        if !(MIN_TARGET_DURATION..=MAX_TARGET_DURATION).contains(&target) {
            return Err(NarrationError::InvalidTargetDuration(target));
        }

        let (reading_level, _) = reading_level_for_age(request.child_age);
        let llm_request = LlmRequest::text(
            json_system(&format!("{NARRATION_SYSTEM}\n{GROUNDING_INSTRUCTION}")),
            build_narration_prompt(request),
        )
        .max_tokens(8192);

        let raw: Narration = complete_json(self.llm.as_ref(), llm_request).await?;
        let mut narration = normalize_narration(raw, Some(target))?;
        narration.reading_level = reading_level.to_string();

        info!(
            "Narration built: topic='{}' segments={} total_duration={}s",
            request.topic,
            narration.segments.len(),
            narration.total_duration
        );
        Ok(narration)
    }
}

pub fn build_narration_prompt(request: &NarrationRequest) -> String {
    let (reading_level, guidance) = reading_level_for_age(request.child_age);

    let mut personalization = String::new();
    if let Some(age) = request.child_age {
        personalization.push_str(&format!("STUDENT AGE: {age}\n"));
    }
    if let Some(interest) = request
        .child_interest
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        personalization.push_str(&format!(
            "STUDENT INTEREST: {interest} (weave one analogy to this interest into the hook or conclusion)\n"
        ));
    }

    let facts = request
        .facts
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{}. {}: {}", i + 1, f.concept, f.details))
        .collect::<Vec<_>>()
        .join("\n");

    NARRATION_PROMPT
        .replace("{target_duration}", &format!("{}", request.target()))
        .replace("{topic}", &request.topic)
        .replace("{reading_level}", reading_level)
        .replace("{reading_guidance}", guidance)
        .replace("{personalization}", &personalization)
        .replace("{facts}", &facts)
}

#[cfg(test)]
pub mod fixtures {
    /// A well-formed model response whose durations sum to 60 seconds.
    pub const PHOTOSYNTHESIS_NARRATION: &str = r#"{
        "total_duration": 60,
        "reading_level": "whatever the model felt like",
        "key_terms_count": 99,
        "segments": [
            {"id": "segment_1", "type": "hook", "start_time": 0, "duration": 9,
             "narration": "Have you ever wondered how a tree eats?",
             "visual_guidance": "Tree in sunlight", "key_concepts": ["plants"],
             "educational_purpose": "Spark curiosity"},
            {"id": "segment_2", "type": "concept_introduction", "start_time": 9, "duration": 18,
             "narration": "Plants make their own food with photosynthesis.",
             "visual_guidance": "Leaf close-up", "key_concepts": ["photosynthesis", "chlorophyll"],
             "educational_purpose": "Define the concept"},
            {"id": "segment_3", "type": "process_explanation", "start_time": 27, "duration": 21,
             "narration": "Leaves catch sunlight and turn water and air into sugar.",
             "visual_guidance": "Animated arrows", "key_concepts": ["sunlight", "glucose"],
             "educational_purpose": "Explain the process"},
            {"id": "segment_4", "type": "conclusion", "start_time": 48, "duration": 12,
             "narration": "So every leaf is a tiny kitchen powered by the sun.",
             "visual_guidance": "Sun over a garden", "key_concepts": ["photosynthesis"],
             "educational_purpose": "Recap"}
        ]
    }"#;
}
