//! Direct-manipulation edits: selection, drag-to-move, edge resize, zoom, and the
//! frame throttle that paces interim drag updates.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::timeline::model::{Timeline, MIN_CLIP_LENGTH};
use crate::timeline::TimelineError;

pub const MIN_PIXELS_PER_SECOND: f64 = 10.0;
pub const MAX_PIXELS_PER_SECOND: f64 = 500.0;
/// About 60 updates per second.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edge {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
}

/// Selected clip ids. Saved with the timeline so a reload keeps the selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selection {
    ids: BTreeSet<String>,
}

impl Selection {
    /// A plain click selects only `clip_id`; with shift or ctrl it toggles it.
    pub fn click(&mut self, clip_id: &str, modifiers: Modifiers) {
        if modifiers.shift || modifiers.ctrl {
            if !self.ids.remove(clip_id) {
                self.ids.insert(clip_id.to_string());
            }
        } else {
            self.ids.clear();
            self.ids.insert(clip_id.to_string());
        }
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn contains(&self, clip_id: &str) -> bool {
        self.ids.contains(clip_id)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.ids.retain(|id| keep(id));
    }
}

/// A persisted edit, as posted by the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TimelineEdit {
    Move { clip_id: String, position_start: f64 },
    Resize { clip_id: String, edge: Edge, time: f64 },
    SetSpeed { clip_id: String, speed: f64 },
    SetText { clip_id: String, text: String },
    Remove { clip_id: String },
    Select {
        clip_id: String,
        #[serde(default)]
        shift: bool,
        #[serde(default)]
        ctrl: bool,
    },
    ClearSelection,
    /// Shifts every selected clip by `delta` seconds.
    MoveSelection { delta: f64 },
    Zoom {
        cursor_px: f64,
        scroll_offset_px: f64,
        factor: f64,
    },
}

impl Timeline {
    /// Moves a clip so it starts at `new_start` (clamped at zero), keeping its length.
    pub fn move_clip(&mut self, clip_id: &str, new_start: f64) -> Result<(), TimelineError> {
        if !new_start.is_finite() {
            return Err(TimelineError::InvalidEdit("start must be finite".to_string()));
        }
        let track = self.track_with_clip_mut(clip_id)?;
        if let Some(clip) = track.clips.iter_mut().find(|c| c.id == clip_id) {
            let length = clip.length();
            clip.position_start = new_start.max(0.0);
            clip.position_end = clip.position_start + length;
        }
        track.sort_clips();
        Ok(())
    }

    /// Moves the selected clips together. The shift is limited so the earliest of
    /// them stops at zero, which keeps their spacing intact.
    pub fn move_selection(&mut self, delta: f64) -> Result<(), TimelineError> {
        if !delta.is_finite() {
            return Err(TimelineError::InvalidEdit("delta must be finite".to_string()));
        }
        if self.selection.is_empty() {
            return Err(TimelineError::InvalidEdit("nothing is selected".to_string()));
        }

        let earliest = self
            .tracks
            .iter()
            .flat_map(|t| t.clips.iter())
            .filter(|c| self.selection.contains(&c.id))
            .map(|c| c.position_start)
            .fold(f64::INFINITY, f64::min);
        let delta = delta.max(-earliest);

        for track in &mut self.tracks {
            let mut moved = false;
            for clip in track.clips.iter_mut() {
                if self.selection.contains(&clip.id) {
                    clip.position_start += delta;
                    clip.position_end += delta;
                    moved = true;
                }
            }
            if moved {
                track.sort_clips();
            }
        }
        Ok(())
    }

    /// Drags one edge of a clip to `new_time`. The clip never gets shorter than
    /// `MIN_CLIP_LENGTH`, and on media tracks the source trim follows the edge at
    /// the clip's speed without going below zero.
    pub fn resize_clip(&mut self, clip_id: &str, edge: Edge, new_time: f64) -> Result<(), TimelineError> {
        if !new_time.is_finite() {
            return Err(TimelineError::InvalidEdit("time must be finite".to_string()));
        }
        let track = self.track_with_clip_mut(clip_id)?;
        let is_media = track.kind.is_media();
        let Some(clip) = track.clips.iter_mut().find(|c| c.id == clip_id) else {
            return Err(TimelineError::UnknownClip(clip_id.to_string()));
        };

        match edge {
            Edge::Left => {
                let mut lower = 0.0_f64;
                if is_media {
                    if let Some(start_time) = clip.start_time {
                        lower = lower.max(clip.position_start - start_time / clip.speed);
                    }
                }
                let upper = clip.position_end - MIN_CLIP_LENGTH;
                let new_start = new_time.max(lower).min(upper);
                let delta = new_start - clip.position_start;

                clip.position_start = new_start;
                if is_media {
                    if let Some(start_time) = clip.start_time.as_mut() {
                        *start_time = (*start_time + delta * clip.speed).max(0.0);
                    }
                }
            }
            Edge::Right => {
                let new_end = new_time.max(clip.position_start + MIN_CLIP_LENGTH);
                let delta = new_end - clip.position_end;

                clip.position_end = new_end;
                if is_media {
                    if let Some(end_time) = clip.end_time.as_mut() {
                        *end_time = (*end_time + delta * clip.speed).max(0.0);
                    }
                }
            }
        }
        track.sort_clips();
        Ok(())
    }

    /// Applies an edit and checks the result. The timeline is left untouched when
    /// the edit is rejected. Zoom edits return the scroll offset that keeps the
    /// point under the cursor in place.
    pub fn apply(&mut self, edit: &TimelineEdit) -> Result<Option<f64>, TimelineError> {
        let mut next = self.clone();
        let mut scroll_offset_px = None;
        match edit {
            TimelineEdit::Move {
                clip_id,
                position_start,
            } => next.move_clip(clip_id, *position_start)?,
            TimelineEdit::Resize {
                clip_id,
                edge,
                time,
            } => next.resize_clip(clip_id, *edge, *time)?,
            TimelineEdit::SetSpeed { clip_id, speed } => {
                if !(speed.is_finite() && *speed > 0.0) {
                    return Err(TimelineError::InvalidEdit("speed must be positive".to_string()));
                }
                let track = next.track_with_clip_mut(clip_id)?;
                if !track.kind.is_media() {
                    return Err(TimelineError::InvalidEdit(
                        "only media clips have a speed".to_string(),
                    ));
                }
                if let Some(clip) = track.clips.iter_mut().find(|c| c.id == *clip_id) {
                    clip.speed = *speed;
                }
            }
            TimelineEdit::SetText { clip_id, text } => {
                let track = next.track_with_clip_mut(clip_id)?;
                if let Some(clip) = track.clips.iter_mut().find(|c| c.id == *clip_id) {
                    clip.text = Some(text.clone());
                }
            }
            TimelineEdit::Remove { clip_id } => {
                let track = next.track_with_clip_mut(clip_id)?;
                track.clips.retain(|c| c.id != *clip_id);
                next.selection.retain(|id| id != clip_id.as_str());
            }
            TimelineEdit::Select {
                clip_id,
                shift,
                ctrl,
            } => {
                if next.find_clip(clip_id).is_none() {
                    return Err(TimelineError::UnknownClip(clip_id.clone()));
                }
                next.selection.click(
                    clip_id,
                    Modifiers {
                        shift: *shift,
                        ctrl: *ctrl,
                    },
                );
            }
            TimelineEdit::ClearSelection => next.selection.clear(),
            TimelineEdit::MoveSelection { delta } => next.move_selection(*delta)?,
            TimelineEdit::Zoom {
                cursor_px,
                scroll_offset_px: scroll,
                factor,
            } => {
                if !(cursor_px.is_finite() && scroll.is_finite()) {
                    return Err(TimelineError::InvalidEdit(
                        "cursor and scroll must be finite".to_string(),
                    ));
                }
                if !(factor.is_finite() && *factor > 0.0) {
                    return Err(TimelineError::InvalidEdit(
                        "zoom factor must be positive".to_string(),
                    ));
                }
                let mut zoom = Zoom::new(next.pixels_per_second);
                scroll_offset_px = Some(zoom.zoom_at(*cursor_px, *scroll, *factor));
                next.pixels_per_second = zoom.pixels_per_second;
            }
        }
        next.validate()?;
        *self = next;
        Ok(scroll_offset_px)
    }
}

/// Horizontal scale of the editor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Zoom {
    pub pixels_per_second: f64,
}

impl Zoom {
    pub fn new(pixels_per_second: f64) -> Self {
        Self {
            pixels_per_second: pixels_per_second.clamp(MIN_PIXELS_PER_SECOND, MAX_PIXELS_PER_SECOND),
        }
    }

    pub fn px_to_time(&self, px: f64) -> f64 {
        px / self.pixels_per_second
    }

    pub fn time_to_px(&self, seconds: f64) -> f64 {
        seconds * self.pixels_per_second
    }

    /// Scales by `factor` around the cursor. `cursor_px` is relative to the
    /// viewport. Returns the scroll offset that keeps the timeline time under the
    /// cursor where it was, floored at zero.
    pub fn zoom_at(&mut self, cursor_px: f64, scroll_offset_px: f64, factor: f64) -> f64 {
        if !(factor.is_finite() && factor > 0.0) {
            return scroll_offset_px;
        }
        let time_at_cursor = self.px_to_time(scroll_offset_px + cursor_px);
        self.pixels_per_second =
            (self.pixels_per_second * factor).clamp(MIN_PIXELS_PER_SECOND, MAX_PIXELS_PER_SECOND);
        (self.time_to_px(time_at_cursor) - cursor_px).max(0.0)
    }
}

/// Lets through at most one update per interval on a caller-supplied clock.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(FRAME_INTERVAL)
    }
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    fn idle_for(&self, now: Instant) -> Option<Duration> {
        self.last.map(|last| now.saturating_duration_since(last))
    }
}

/// Throttles dropped after this long without an update.
const THROTTLE_IDLE: Duration = Duration::from_secs(60);

/// One frame throttle per session, shared by all handlers. Interim drag updates
/// beyond one per frame are skipped instead of written.
#[derive(Debug, Clone, Default)]
pub struct EditThrottles {
    sessions: Arc<Mutex<HashMap<Uuid, Throttle>>>,
}

impl EditThrottles {
    pub async fn ready(&self, session_id: Uuid, now: Instant) -> bool {
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, t| t.idle_for(now).map_or(true, |idle| idle < THROTTLE_IDLE));
        sessions.entry(session_id).or_default().ready(now)
    }
}
