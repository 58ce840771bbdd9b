// Fact extraction LLM prompt templates.

pub const EXTRACTION_SYSTEM: &str = "\
You are an instructional designer helping a teacher build a short educational video. \
Read the supplied material and pull out the distinct, teachable facts it contains. \
Each fact is one concept with a short explanation in plain language. \
Rate your confidence that each fact is stated or directly supported by the material \
from 0.0 (guess) to 1.0 (stated verbatim).";

pub const EXTRACTION_PROMPT: &str = r#"Extract the key educational facts from the material below.

{student_context}
MATERIAL:
{material}

OUTPUT SCHEMA (return exactly this structure):
{
  "topic": "string: the overall subject, 2-6 words",
  "learning_objective": "string: one sentence starting with 'Students will'",
  "facts": [
    {"concept": "string", "details": "string, 1-2 sentences", "confidence": 0.0-1.0}
  ],
  "message": "string: a short friendly note to the teacher summarizing what you found"
}

RULES:
1. Return between 3 and 12 facts, most important first.
2. One concept per fact. Do not merge unrelated ideas.
3. Skip page headers, footers, citations, and copyright notices.
4. Return ONLY the JSON object."#;

/// Used in place of `{material}` when the PDF travels as a document attachment.
pub const ATTACHED_DOCUMENT_MATERIAL: &str = "(see the attached PDF document)";

pub fn build_extraction_prompt(material: &str, student_context: Option<&str>) -> String {
    let context = student_context
        .map(|c| format!("STUDENT CONTEXT: {c}\n"))
        .unwrap_or_default();
    EXTRACTION_PROMPT
        .replace("{student_context}", &context)
        .replace("{material}", material)
}
