use serde::{Deserialize, Serialize};

/// A concept/detail/confidence triple pulled out of user-supplied material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub concept: String,
    pub details: String,
    /// Always within [0, 1] once it has passed `RawExtraction::into_outcome`.
    pub confidence: f64,
}

/// What the user handed us. At least one field must be present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractionInput {
    pub content: Option<String>,
    pub pdf_url: Option<String>,
    pub website_url: Option<String>,
}

impl ExtractionInput {
    #[cfg(test)]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
        blank(&self.content) && blank(&self.pdf_url) && blank(&self.website_url)
    }
}

/// The chat-facing result of one extraction attempt.
///
/// Failures are values, not errors: `success == false` always carries a
/// non-empty `message` the UI can render as an assistant bubble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub success: bool,
    pub facts: Vec<Fact>,
    pub message: String,
    pub topic: Option<String>,
    pub learning_objective: Option<String>,
}

impl ExtractionOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            facts: Vec::new(),
            message: if message.trim().is_empty() {
                "Fact extraction failed. Please try again.".to_string()
            } else {
                message
            },
            topic: None,
            learning_objective: None,
        }
    }
}

/// Untrusted model output. Every field is optional so a sloppy response still parses
/// and gets cleaned up in one place.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawExtraction {
    #[serde(default)]
    pub facts: Vec<RawFact>,
    pub topic: Option<String>,
    pub learning_objective: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFact {
    pub concept: Option<String>,
    pub details: Option<String>,
    pub confidence: Option<f64>,
}

const DEFAULT_CONFIDENCE: f64 = 0.5;

impl RawExtraction {
    /// Drops facts without a concept, clamps confidence into [0, 1], and turns an
    /// empty fact list into a failed outcome.
    pub fn into_outcome(self) -> ExtractionOutcome {
        let facts: Vec<Fact> = self
            .facts
            .into_iter()
            .filter_map(|raw| {
                let concept = raw.concept?.trim().to_string();
                if concept.is_empty() {
                    return None;
                }
                let confidence = match raw.confidence {
                    Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
                    _ => DEFAULT_CONFIDENCE,
                };
                Some(Fact {
                    concept,
                    details: raw.details.unwrap_or_default().trim().to_string(),
                    confidence,
                })
            })
            .collect();

        if facts.is_empty() {
            return ExtractionOutcome::failure(
                "I couldn't find any teachable facts in that material. \
                 Try pasting more detailed text or a different document.",
            );
        }

        let non_blank =
            |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        let message = non_blank(self.message).unwrap_or_else(|| {
            format!(
                "I found {} facts. Select the ones you want in the video.",
                facts.len()
            )
        });

        ExtractionOutcome {
            success: true,
            facts,
            message,
            topic: non_blank(self.topic),
            learning_objective: non_blank(self.learning_objective),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_outcome_clamps_confidence() {
        let raw: RawExtraction = serde_json::from_str(
            r#"{"facts": [
                {"concept": "Chlorophyll", "details": "Green pigment", "confidence": 1.7},
                {"concept": "Stomata", "details": "Leaf pores", "confidence": -0.2}
            ]}"#,
        )
        .unwrap();
        let outcome = raw.into_outcome();
        assert!(outcome.success);
        assert_eq!(outcome.facts[0].confidence, 1.0);
        assert_eq!(outcome.facts[1].confidence, 0.0);
    }

    #[test]
    fn test_into_outcome_drops_blank_concepts_and_defaults_confidence() {
        let raw: RawExtraction = serde_json::from_str(
            r#"{"facts": [
                {"concept": "  ", "details": "nothing"},
                {"details": "no concept at all"},
                {"concept": "Glucose", "details": "Sugar made by plants"}
            ], "topic": " Photosynthesis ", "learning_objective": ""}"#,
        )
        .unwrap();
        let outcome = raw.into_outcome();
        assert_eq!(outcome.facts.len(), 1);
        assert_eq!(outcome.facts[0].concept, "Glucose");
        assert_eq!(outcome.facts[0].confidence, DEFAULT_CONFIDENCE);
        assert_eq!(outcome.topic.as_deref(), Some("Photosynthesis"));
        assert!(outcome.learning_objective.is_none());
        assert!(outcome.message.contains("1 facts"));
    }

    #[test]
    fn test_no_usable_facts_is_a_failure() {
        let raw: RawExtraction = serde_json::from_str(r#"{"facts": [], "topic": "Rocks"}"#).unwrap();
        let outcome = raw.into_outcome();
        assert!(!outcome.success);
        assert!(!outcome.message.is_empty());
    }

    #[test]
    fn test_extraction_input_is_empty_ignores_whitespace() {
        let input = ExtractionInput {
            content: Some("   ".to_string()),
            pdf_url: None,
            website_url: Some(String::new()),
        };
        assert!(input.is_empty());
        assert!(!ExtractionInput::text("Plants need light").is_empty());
    }

    #[test]
    fn test_failure_message_is_never_empty() {
        let outcome = ExtractionOutcome::failure("");
        assert!(!outcome.success);
        assert!(!outcome.message.is_empty());
    }
}
