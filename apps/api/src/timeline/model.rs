use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::narration::models::Narration;
use crate::timeline::{Selection, TimelineError};

/// Shortest clip the editor allows, in seconds.
pub const MIN_CLIP_LENGTH: f64 = 0.1;
pub const DEFAULT_PIXELS_PER_SECOND: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Video,
    Audio,
    Text,
}

impl TrackKind {
    /// Media tracks carry a source trim and playback speed.
    pub fn is_media(&self) -> bool {
        matches!(self, TrackKind::Video | TrackKind::Audio)
    }
}

/// A clip on a track. `position_*` are timeline seconds; `start_time`/`end_time`
/// are the trimmed range of the source media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: String,
    pub position_start: f64,
    pub position_end: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    #[serde(default = "default_speed")]
    pub speed: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

fn default_speed() -> f64 {
    1.0
}

impl Clip {
    pub fn length(&self) -> f64 {
        self.position_end - self.position_start
    }

    fn check(&self, kind: TrackKind) -> Result<(), TimelineError> {
        let invalid = |reason: &str| TimelineError::InvalidClip {
            clip_id: self.id.clone(),
            reason: reason.to_string(),
        };

        if !self.position_start.is_finite() || !self.position_end.is_finite() {
            return Err(invalid("positions must be finite"));
        }
        if self.position_start < 0.0 {
            return Err(invalid("starts before zero"));
        }
        if self.position_end <= self.position_start {
            return Err(invalid("ends before it starts"));
        }
        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(invalid("speed must be positive"));
        }
        if kind.is_media() {
            if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
                if start < 0.0 || end <= start {
                    return Err(invalid("source trim is out of order"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub kind: TrackKind,
    #[serde(default)]
    pub clips: Vec<Clip>,
}

impl Track {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            clips: Vec::new(),
        }
    }

    /// Keeps clips ordered by where they start.
    pub fn sort_clips(&mut self) {
        self.clips
            .sort_by(|a, b| a.position_start.total_cmp(&b.position_start));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(default = "default_pixels_per_second")]
    pub pixels_per_second: f64,
    #[serde(default, skip_serializing_if = "Selection::is_empty")]
    pub selection: Selection,
}

fn default_pixels_per_second() -> f64 {
    DEFAULT_PIXELS_PER_SECOND
}

impl Default for Timeline {
    fn default() -> Self {
        Self {
            tracks: Vec::new(),
            pixels_per_second: DEFAULT_PIXELS_PER_SECOND,
            selection: Selection::default(),
        }
    }
}

impl Timeline {
    /// Starting layout for a rendered video: the video on one track and each
    /// narration segment as a caption on a text track.
    pub fn from_narration(narration: &Narration, video_url: Option<&str>) -> Self {
        let mut timeline = Timeline::default();

        if let Some(url) = video_url {
            let mut video = Track::new("video-1", TrackKind::Video);
            video.clips.push(Clip {
                id: "video-clip-1".to_string(),
                position_start: 0.0,
                position_end: narration.total_duration,
                start_time: Some(0.0),
                end_time: Some(narration.total_duration),
                speed: 1.0,
                src: Some(url.to_string()),
                text: None,
            });
            timeline.tracks.push(video);
        }

        let mut captions = Track::new("text-1", TrackKind::Text);
        for segment in &narration.segments {
            captions.clips.push(Clip {
                id: format!("caption-{}", segment.id),
                position_start: segment.start_time,
                position_end: segment.start_time + segment.duration,
                start_time: None,
                end_time: None,
                speed: 1.0,
                src: None,
                text: Some(segment.narration.clone()),
            });
        }
        timeline.tracks.push(captions);
        timeline
    }

    pub fn duration(&self) -> f64 {
        self.tracks
            .iter()
            .flat_map(|t| t.clips.iter())
            .map(|c| c.position_end)
            .fold(0.0, f64::max)
    }

    pub fn validate(&self) -> Result<(), TimelineError> {
        let mut seen = HashSet::new();
        for track in &self.tracks {
            for clip in &track.clips {
                if !seen.insert(clip.id.as_str()) {
                    return Err(TimelineError::DuplicateClip(clip.id.clone()));
                }
                clip.check(track.kind)?;
            }
        }
        Ok(())
    }

    /// Drops selected ids that no longer name a clip.
    pub fn prune_selection(&mut self) {
        let known: HashSet<&str> = self
            .tracks
            .iter()
            .flat_map(|t| t.clips.iter())
            .map(|c| c.id.as_str())
            .collect();
        self.selection.retain(|id| known.contains(id));
    }

    pub fn find_clip(&self, clip_id: &str) -> Option<(TrackKind, &Clip)> {
        self.tracks.iter().find_map(|t| {
            t.clips
                .iter()
                .find(|c| c.id == clip_id)
                .map(|c| (t.kind, c))
        })
    }

    pub(crate) fn track_with_clip_mut(&mut self, clip_id: &str) -> Result<&mut Track, TimelineError> {
        self.tracks
            .iter_mut()
            .find(|t| t.clips.iter().any(|c| c.id == clip_id))
            .ok_or_else(|| TimelineError::UnknownClip(clip_id.to_string()))
    }
}
