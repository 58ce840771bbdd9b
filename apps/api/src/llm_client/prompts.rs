// Shared prompt fragments.
// Each agent that needs LLM calls defines its own prompts.rs alongside it.
// This file contains the cross-cutting pieces.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Appended to every agent prompt that works from user-supplied material.
pub const GROUNDING_INSTRUCTION: &str = "\
    CRITICAL: Only use information present in the supplied material. \
    Do NOT invent facts, statistics, names, or dates. \
    If the material does not support a statement, leave it out.";

/// Joins an agent's own system prompt with the JSON-only fragment.
pub fn json_system(agent_system: &str) -> String {
    format!("{agent_system}\n\n{JSON_ONLY_SYSTEM}")
}
