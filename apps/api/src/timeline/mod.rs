//! Editor data model for post-render editing: tracks of clips, plus the interaction
//! logic (select, move, resize, zoom) the editor drives.
//!
//! The editor posts edits here and the server persists the resulting timeline on
//! the session, so the same rules hold on both sides.

pub mod handlers;
pub mod interaction;
pub mod model;

use thiserror::Error;

pub use interaction::{EditThrottles, Selection, TimelineEdit};
pub use model::Timeline;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimelineError {
    #[error("unknown clip '{0}'")]
    UnknownClip(String),

    #[error("clip id '{0}' is used more than once")]
    DuplicateClip(String),

    #[error("clip '{clip_id}' is invalid: {reason}")]
    InvalidClip { clip_id: String, reason: String },

    #[error("invalid edit: {0}")]
    InvalidEdit(String),
}
