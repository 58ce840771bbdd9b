// Diagram relevance scoring prompt templates.

pub const DIAGRAM_SCORING_SYSTEM: &str = "\
You are a strict visual editor choosing diagrams for a short children's science video. \
You score one image at a time for how well it helps explain the narration.";

pub const DIAGRAM_SCORING_PROMPT: &str = r#"Score the attached image from 0 to 10 for use as an on-screen diagram in this video.

TOPIC: {topic}
KEY FACTS:
{facts}
NARRATION:
{narration}

RUBRIC:
- 9-10: a clear diagram or labelled illustration of exactly the process or concept narrated
- 6-8: a relevant figure a viewer would understand without extra explanation
- 3-5: loosely related, cluttered, or mostly text
- 0-2: page headers, footers, logos, icons, decorative borders, photos of people, blank or
  near-blank images, tables of numbers, anything unrelated to the topic

Be harsh. When in doubt, score lower.

Return exactly: {"score": number, "reason": "one short sentence"}"#;
