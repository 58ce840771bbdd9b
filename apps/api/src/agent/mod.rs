//! Chat-facing endpoints under `/api/agent-create/*`: the extraction chat, file
//! uploads, and narration for the current selection.

pub mod handlers;
pub mod upload;
