// Narrative builder LLM prompt templates.

pub const NARRATION_SYSTEM: &str = "\
You are a children's educational scriptwriter. You turn confirmed facts into a short \
narrated video script with exactly four segments, always in this order:
1. hook: a surprising question or scenario that grabs attention (about 15% of the time)
2. concept_introduction: names and defines the core idea (about 30%)
3. process_explanation: walks through how it works, step by step (about 35%)
4. conclusion: recaps the key idea and connects it to the student's life (about 20%)
Narration is spoken aloud: short sentences, no lists, no parenthetical asides. \
Speak at roughly 2.5 words per second so the text fits each segment's duration.";

pub const NARRATION_PROMPT: &str = r#"Write the narration for a {target_duration}-second educational video.

TOPIC: {topic}
READING LEVEL: {reading_level} ({reading_guidance})
{personalization}
CONFIRMED FACTS:
{facts}

OUTPUT SCHEMA (return exactly this structure):
{
  "total_duration": number,
  "reading_level": "string",
  "key_terms_count": number,
  "segments": [
    {
      "id": "segment_1",
      "type": "hook" | "concept_introduction" | "process_explanation" | "conclusion",
      "start_time": number,
      "duration": number,
      "narration": "string: the exact words to be spoken",
      "visual_guidance": "string: what should be on screen",
      "key_concepts": ["string"],
      "educational_purpose": "string"
    }
  ]
}

RULES:
1. Exactly four segments, one of each type, in the order listed above.
2. Segments start at 0 and follow each other with no gaps; durations sum to {target_duration}.
3. Use only the confirmed facts. Do not add new claims.
4. Return ONLY the JSON object."#;

/// Reading level and vocabulary guidance for a student age.
pub fn reading_level_for_age(age: Option<u32>) -> (&'static str, &'static str) {
    match age {
        Some(0..=7) => (
            "early elementary",
            "sentences under 10 words, everyday words, one idea per sentence",
        ),
        Some(8..=10) | None => (
            "upper elementary",
            "sentences under 15 words, define every science word the first time it appears",
        ),
        Some(11..=13) => (
            "middle school",
            "sentences under 20 words, subject vocabulary allowed with a short definition",
        ),
        Some(_) => (
            "high school",
            "precise subject vocabulary, compound sentences allowed",
        ),
    }
}
