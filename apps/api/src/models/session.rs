use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::facts::models::Fact;
use crate::narration::models::Narration;

/// Pipeline status of a session, stored as snake_case text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    FactsExtracted,
    ScriptGenerated,
    NarrationVerified,
    VideoGenerating,
    VideoComplete,
    VideoFailed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::FactsExtracted => "facts_extracted",
            SessionStatus::ScriptGenerated => "script_generated",
            SessionStatus::NarrationVerified => "narration_verified",
            SessionStatus::VideoGenerating => "video_generating",
            SessionStatus::VideoComplete => "video_complete",
            SessionStatus::VideoFailed => "video_failed",
        }
    }

    /// A verified narration can be (re)submitted for rendering from these states.
    pub fn can_start_video(&self) -> bool {
        matches!(
            self,
            SessionStatus::NarrationVerified | SessionStatus::VideoFailed
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "created" => SessionStatus::Created,
            "facts_extracted" => SessionStatus::FactsExtracted,
            "script_generated" => SessionStatus::ScriptGenerated,
            "narration_verified" => SessionStatus::NarrationVerified,
            "video_generating" => SessionStatus::VideoGenerating,
            "video_complete" => SessionStatus::VideoComplete,
            "video_failed" => SessionStatus::VideoFailed,
            other => return Err(format!("unknown session status '{other}'")),
        })
    }
}

/// Metadata for one piece of uploaded or linked source material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMaterial {
    pub kind: String,
    pub name: String,
    pub url: Option<String>,
    pub storage_key: Option<String>,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct VideoSession {
    pub id: Uuid,
    pub user_id: String,
    pub status: String,
    pub topic: Option<String>,
    pub child_age: Option<i32>,
    pub child_interest: Option<String>,
    pub learning_objective: Option<String>,
    pub extracted_facts: Value,
    pub selected_fact_indices: Vec<i32>,
    pub confirmed_facts: Option<Value>,
    pub generated_script: Option<Value>,
    pub source_materials: Value,
    pub processing_job_id: Option<String>,
    pub final_video_url: Option<String>,
    pub error_message: Option<String>,
    pub editor_timeline: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoSession {
    pub fn status(&self) -> Option<SessionStatus> {
        self.status.parse().ok()
    }

    /// Extracted facts; malformed JSON reads as no facts.
    pub fn parsed_facts(&self) -> Vec<Fact> {
        serde_json::from_value(self.extracted_facts.clone()).unwrap_or_default()
    }

    pub fn parsed_confirmed_facts(&self) -> Option<Vec<Fact>> {
        self.confirmed_facts
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn parsed_narration(&self) -> Option<Narration> {
        self.generated_script
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn parsed_source_materials(&self) -> Vec<SourceMaterial> {
        serde_json::from_value(self.source_materials.clone()).unwrap_or_default()
    }

    /// "8 year old who loves soccer" style audience description for prompts.
    pub fn student_context(&self) -> Option<String> {
        let interest = self
            .child_interest
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        match (self.child_age, interest) {
            (Some(age), Some(interest)) => Some(format!("{age} year old who loves {interest}")),
            (Some(age), None) => Some(format!("{age} year old student")),
            (None, Some(interest)) => Some(format!("student who loves {interest}")),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
impl VideoSession {
    pub fn new_for_tests(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            status: SessionStatus::Created.as_str().to_string(),
            topic: None,
            child_age: None,
            child_interest: None,
            learning_objective: None,
            extracted_facts: Value::Array(vec![]),
            selected_fact_indices: vec![],
            confirmed_facts: None,
            generated_script: None,
            source_materials: Value::Array(vec![]),
            processing_job_id: None,
            final_video_url: None,
            error_message: None,
            editor_timeline: None,
            created_at: now,
            updated_at: now,
        }
    }
}
