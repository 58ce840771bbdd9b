//! Fact extraction agent: one structured-output LLM call per invocation.
//!
//! Never returns an error. Anything that goes wrong becomes an
//! `ExtractionOutcome { success: false, message }` the chat can render.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;
use tracing::{info, warn};

use crate::facts::models::{ExtractionInput, ExtractionOutcome, RawExtraction};
use crate::facts::prompts::{build_extraction_prompt, ATTACHED_DOCUMENT_MATERIAL, EXTRACTION_SYSTEM};
use crate::facts::source::{
    extract_pdf_text, html_to_text, truncate_chars, DocumentFetcher, SourceError, MAX_SOURCE_CHARS,
};
use crate::llm_client::prompts::{json_system, GROUNDING_INSTRUCTION};
use crate::llm_client::{complete_json, ContentPart, LanguageModel, LlmError, LlmRequest};

#[derive(Debug, Error)]
enum ExtractionError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("the AI model could not process the material: {0}")]
    Llm(#[from] LlmError),
}

#[derive(Clone)]
pub struct FactExtractor {
    llm: Arc<dyn LanguageModel>,
    fetcher: Arc<dyn DocumentFetcher>,
}

impl FactExtractor {
    pub fn new(llm: Arc<dyn LanguageModel>, fetcher: Arc<dyn DocumentFetcher>) -> Self {
        Self { llm, fetcher }
    }

    /// Extracts facts from the given material. `student_context` is a short
    /// description of the audience ("8 year old who loves dinosaurs").
    pub async fn extract(
        &self,
        input: &ExtractionInput,
        student_context: Option<&str>,
    ) -> ExtractionOutcome {
        if input.is_empty() {
            return ExtractionOutcome::failure(
                "Please share some text, a PDF, or a website link so I can find facts to teach.",
            );
        }

        match self.try_extract(input, student_context).await {
            Ok(raw) => {
                let outcome = raw.into_outcome();
                info!(
                    "Fact extraction finished: success={} facts={}",
                    outcome.success,
                    outcome.facts.len()
                );
                outcome
            }
            Err(e) => {
                warn!("Fact extraction failed: {e}");
                ExtractionOutcome::failure(format!(
                    "Sorry, I couldn't extract facts from that material ({e}). Please try again."
                ))
            }
        }
    }

    async fn try_extract(
        &self,
        input: &ExtractionInput,
        student_context: Option<&str>,
    ) -> Result<RawExtraction, ExtractionError> {
        let mut text_material = Vec::new();
        if let Some(content) = non_blank(&input.content) {
            text_material.push(content.to_string());
        }
        if let Some(url) = non_blank(&input.website_url) {
            let html = self.fetcher.fetch(url).await?;
            let page = html_to_text(&String::from_utf8_lossy(&html));
            text_material.push(format!("WEBSITE ({url}):\n{page}"));
        }

        let Some(pdf_url) = non_blank(&input.pdf_url) else {
            let material = truncate_chars(&text_material.join("\n\n"), MAX_SOURCE_CHARS);
            return self.call_text(&material, student_context).await;
        };

        let pdf = self.fetcher.fetch(pdf_url).await?;

        // The model reads the PDF directly, layout and figures included.
        let attempt = self
            .call_with_document(&pdf, &text_material, student_context)
            .await;
        match attempt {
            Ok(raw) => Ok(raw),
            Err(e) => {
                warn!("Document-mode extraction failed, falling back to local text: {e}");
                text_material.push(format!("PDF:\n{}", extract_pdf_text(pdf).await?));
                let material = truncate_chars(&text_material.join("\n\n"), MAX_SOURCE_CHARS);
                self.call_text(&material, student_context).await
            }
        }
    }

    async fn call_text(
        &self,
        material: &str,
        student_context: Option<&str>,
    ) -> Result<RawExtraction, ExtractionError> {
        let request = LlmRequest::text(
            system_prompt(),
            build_extraction_prompt(material, student_context),
        );
        Ok(complete_json(self.llm.as_ref(), request).await?)
    }

    async fn call_with_document(
        &self,
        pdf: &[u8],
        text_material: &[String],
        student_context: Option<&str>,
    ) -> Result<RawExtraction, ExtractionError> {
        let mut material = ATTACHED_DOCUMENT_MATERIAL.to_string();
        if !text_material.is_empty() {
            material.push_str("\n\nADDITIONAL NOTES FROM THE TEACHER:\n");
            material.push_str(&truncate_chars(&text_material.join("\n\n"), MAX_SOURCE_CHARS));
        }
        let request = LlmRequest::text(
            system_prompt(),
            build_extraction_prompt(&material, student_context),
        )
        .with_part(ContentPart::Document {
            data: BASE64.encode(pdf),
        });
        Ok(complete_json(self.llm.as_ref(), request).await?)
    }
}

fn system_prompt() -> String {
    json_system(&format!("{EXTRACTION_SYSTEM} {GROUNDING_INSTRUCTION}"))
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}


#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::fixtures::PHOTOSYNTHESIS_RESPONSE;
    use super::*;
    use crate::facts::source::testing::StaticFetcher;
    use crate::llm_client::testing::ScriptedModel;

    fn extractor(model: Arc<ScriptedModel>, fetcher: StaticFetcher) -> FactExtractor {
        FactExtractor::new(model, Arc::new(fetcher))
    }

    #[tokio::test]
    async fn test_photosynthesis_text_yields_facts() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(PHOTOSYNTHESIS_RESPONSE)]));
        let outcome = extractor(model.clone(), StaticFetcher::default())
            .extract(
                &ExtractionInput::text("Photosynthesis converts sunlight into energy"),
                None,
            )
            .await;

        assert!(outcome.success);
        assert!(outcome
            .facts
            .iter()
            .any(|f| f.concept.to_lowercase().contains("photosynthesis")));
        assert!(outcome
            .facts
            .iter()
            .all(|f| (0.0..=1.0).contains(&f.confidence)));
        assert_eq!(outcome.topic.as_deref(), Some("Photosynthesis"));
        assert_eq!(model.request_count(), 1);
    }

    #[tokio::test]
    async fn test_llm_failure_becomes_unsuccessful_outcome() {
        let model = Arc::new(ScriptedModel::new(vec![Err("overloaded")]));
        let outcome = extractor(model, StaticFetcher::default())
            .extract(&ExtractionInput::text("Volcanoes erupt magma"), None)
            .await;

        assert!(!outcome.success);
        assert!(!outcome.message.is_empty());
        assert!(outcome.facts.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json_becomes_unsuccessful_outcome() {
        let model = Arc::new(ScriptedModel::new(vec![Ok("Here are your facts: none")]));
        let outcome = extractor(model, StaticFetcher::default())
            .extract(&ExtractionInput::text("Magnets attract iron"), None)
            .await;

        assert!(!outcome.success);
        assert!(!outcome.message.is_empty());
    }

    #[tokio::test]
    async fn test_empty_input_skips_llm() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let outcome = extractor(model.clone(), StaticFetcher::default())
            .extract(&ExtractionInput::default(), None)
            .await;

        assert!(!outcome.success);
        assert_eq!(model.request_count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_pdf_is_reported_not_thrown() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(PHOTOSYNTHESIS_RESPONSE)]));
        let input = ExtractionInput {
            pdf_url: Some("https://files.example.com/missing.pdf".to_string()),
            ..ExtractionInput::default()
        };
        let outcome = extractor(model.clone(), StaticFetcher::default())
            .extract(&input, None)
            .await;

        assert!(!outcome.success);
        assert!(outcome.message.contains("missing.pdf"));
        assert_eq!(model.request_count(), 0);
    }

    #[tokio::test]
    async fn test_pdf_is_sent_as_document_attachment() {
        let url = "https://files.example.com/leaf.pdf";
        let fetcher = StaticFetcher {
            bodies: HashMap::from([(url.to_string(), b"%PDF-1.4 fake".to_vec())]),
        };
        let model = Arc::new(ScriptedModel::new(vec![Ok(PHOTOSYNTHESIS_RESPONSE)]));
        let input = ExtractionInput {
            pdf_url: Some(url.to_string()),
            ..ExtractionInput::default()
        };
        let outcome = extractor(model.clone(), fetcher).extract(&input, None).await;

        assert!(outcome.success);
        let requests = model.requests.lock().unwrap();
        assert!(matches!(requests[0].parts[0], ContentPart::Document { .. }));
    }

    #[tokio::test]
    async fn test_unreadable_pdf_fallback_is_reported_not_thrown() {
        let url = "https://files.example.com/broken.pdf";
        let fetcher = StaticFetcher {
            bodies: HashMap::from([(url.to_string(), b"%PDF-1.4 truncated".to_vec())]),
        };
        let model = Arc::new(ScriptedModel::new(vec![Err("document too large")]));
        let input = ExtractionInput {
            pdf_url: Some(url.to_string()),
            ..ExtractionInput::default()
        };
        let outcome = extractor(model.clone(), fetcher).extract(&input, None).await;

        assert!(!outcome.success);
        assert!(outcome.message.contains("PDF"));
        assert_eq!(model.request_count(), 1);
    }

    #[tokio::test]
    async fn test_website_text_is_included_in_prompt() {
        let url = "https://science.example.com/water-cycle";
        let fetcher = StaticFetcher {
            bodies: HashMap::from([(
                url.to_string(),
                b"<h1>Water cycle</h1><p>Evaporation lifts water.</p>".to_vec(),
            )]),
        };
        let model = Arc::new(ScriptedModel::new(vec![Ok(PHOTOSYNTHESIS_RESPONSE)]));
        let input = ExtractionInput {
            website_url: Some(url.to_string()),
            ..ExtractionInput::default()
        };
        extractor(model.clone(), fetcher)
            .extract(&input, Some("age 9"))
            .await;

        let requests = model.requests.lock().unwrap();
        let ContentPart::Text(prompt) = &requests[0].parts[0] else {
            panic!("expected a text prompt");
        };
        assert!(prompt.contains("Evaporation lifts water."));
        assert!(prompt.contains("STUDENT CONTEXT: age 9"));
    }
}
