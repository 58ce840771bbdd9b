// Fact extraction: source loading, the extraction agent, and the Fact model.
// All LLM calls go through llm_client.

pub mod extractor;
pub mod models;
pub mod prompts;
pub mod source;
