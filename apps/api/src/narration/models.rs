use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::narration::NarrationError;

/// The four segment roles, in the only order a narration may use them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentType {
    Hook,
    ConceptIntroduction,
    ProcessExplanation,
    Conclusion,
}

impl SegmentType {
    pub const ORDER: [SegmentType; 4] = [
        SegmentType::Hook,
        SegmentType::ConceptIntroduction,
        SegmentType::ProcessExplanation,
        SegmentType::Conclusion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentType::Hook => "hook",
            SegmentType::ConceptIntroduction => "concept_introduction",
            SegmentType::ProcessExplanation => "process_explanation",
            SegmentType::Conclusion => "conclusion",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrationSegment {
    pub id: String,
    #[serde(rename = "type")]
    pub segment_type: SegmentType,
    pub start_time: f64,
    pub duration: f64,
    pub narration: String,
    #[serde(default)]
    pub visual_guidance: String,
    #[serde(default)]
    pub key_concepts: Vec<String>,
    #[serde(default)]
    pub educational_purpose: String,
}

/// A generated four-segment video script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Narration {
    pub total_duration: f64,
    pub reading_level: String,
    pub key_terms_count: u32,
    pub segments: Vec<NarrationSegment>,
}

/// If the model's durations miss the target by more than this fraction, they are
/// rescaled to the target.
const DURATION_TOLERANCE: f64 = 0.10;

#[cfg(test)]
impl Narration {
    pub fn duration_sum(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }

    pub fn segment_types(&self) -> Vec<SegmentType> {
        self.segments.iter().map(|s| s.segment_type).collect()
    }
}

/// Brings a narration into its canonical shape or rejects it.
///
/// - exactly one segment of each type, reordered into `SegmentType::ORDER`
/// - every duration finite and positive, every narration text non-blank
/// - durations rescaled to `target_duration` when they drift past the tolerance
/// - start times re-tiled so segments abut from zero
/// - `total_duration` and `key_terms_count` recomputed
pub fn normalize_narration(
    mut narration: Narration,
    target_duration: Option<f64>,
) -> Result<Narration, NarrationError> {
    if narration.segments.len() != SegmentType::ORDER.len() {
        return Err(NarrationError::Invalid(format!(
            "expected {} segments, got {}",
            SegmentType::ORDER.len(),
            narration.segments.len()
        )));
    }

    let mut ordered = Vec::with_capacity(SegmentType::ORDER.len());
    for segment_type in SegmentType::ORDER {
        let position = narration
            .segments
            .iter()
            .position(|s| s.segment_type == segment_type)
            .ok_or_else(|| {
                NarrationError::Invalid(format!("missing {} segment", segment_type.as_str()))
            })?;
        ordered.push(narration.segments.swap_remove(position));
    }

    for segment in &ordered {
        if !segment.duration.is_finite() || segment.duration <= 0.0 {
            return Err(NarrationError::Invalid(format!(
                "segment {} has non-positive duration {}",
                segment.id, segment.duration
            )));
        }
        if segment.narration.trim().is_empty() {
            return Err(NarrationError::Invalid(format!(
                "segment {} has no narration text",
                segment.id
            )));
        }
    }

    if let Some(target) = target_duration.filter(|t| t.is_finite() && *t > 0.0) {
        let sum: f64 = ordered.iter().map(|s| s.duration).sum();
        if ((sum - target) / target).abs() > DURATION_TOLERANCE {
            rescale_durations(&mut ordered, target);
        }
    }

    // Tiling runs in whole tenths so each start is exactly the sum of the
    // durations before it.
    let mut cursor: i64 = 0;
    for segment in &mut ordered {
        let tenths = to_tenths(segment.duration).max(1);
        segment.duration = tenths as f64 / 10.0;
        segment.start_time = cursor as f64 / 10.0;
        cursor += tenths;
    }

    let distinct_terms: HashSet<String> = ordered
        .iter()
        .flat_map(|s| s.key_concepts.iter())
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect();

    narration.segments = ordered;
    narration.total_duration = cursor as f64 / 10.0;
    narration.key_terms_count = distinct_terms.len() as u32;
    Ok(narration)
}

/// Scales durations proportionally so they sum to `target`. The last segment absorbs
/// rounding so the sum is exact to a tenth of a second.
fn rescale_durations(segments: &mut [NarrationSegment], target: f64) {
    let sum: f64 = segments.iter().map(|s| s.duration).sum();
    let factor = target / sum;
    let last = segments.len() - 1;
    let mut assigned = 0.0;
    for segment in segments[..last].iter_mut() {
        segment.duration = round_tenth(segment.duration * factor).max(0.1);
        assigned += segment.duration;
    }
    segments[last].duration = round_tenth((target - assigned).max(0.1));
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn to_tenths(value: f64) -> i64 {
    (value * 10.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(id: &str, segment_type: SegmentType, start: f64, duration: f64) -> NarrationSegment {
        NarrationSegment {
            id: id.to_string(),
            segment_type,
            start_time: start,
            duration,
            narration: format!("{id} narration"),
            visual_guidance: String::new(),
            key_concepts: vec![format!("{id} concept"), "sunlight".to_string()],
            educational_purpose: String::new(),
        }
    }

    fn narration(segments: Vec<NarrationSegment>) -> Narration {
        Narration {
            total_duration: 0.0,
            reading_level: "upper elementary".to_string(),
            key_terms_count: 0,
            segments,
        }
    }

    #[test]
    fn test_reorders_segments_and_retiles_start_times() {
        let raw = narration(vec![
            segment("c", SegmentType::Conclusion, 50.0, 10.0),
            segment("h", SegmentType::Hook, 0.0, 10.0),
            segment("p", SegmentType::ProcessExplanation, 99.0, 20.0),
            segment("i", SegmentType::ConceptIntroduction, 3.0, 20.0),
        ]);
        let n = normalize_narration(raw, Some(60.0)).unwrap();

        assert_eq!(n.segment_types(), SegmentType::ORDER.to_vec());
        let starts: Vec<f64> = n.segments.iter().map(|s| s.start_time).collect();
        assert_eq!(starts, vec![0.0, 10.0, 30.0, 50.0]);
        assert_eq!(n.total_duration, 60.0);
        // four "<id> concept" terms plus the shared "sunlight"
        assert_eq!(n.key_terms_count, 5);
    }

    #[test]
    fn test_rescales_durations_that_miss_the_target() {
        let raw = narration(vec![
            segment("h", SegmentType::Hook, 0.0, 10.0),
            segment("i", SegmentType::ConceptIntroduction, 10.0, 30.0),
            segment("p", SegmentType::ProcessExplanation, 40.0, 40.0),
            segment("c", SegmentType::Conclusion, 80.0, 20.0),
        ]);
        let n = normalize_narration(raw, Some(60.0)).unwrap();

        assert!((n.duration_sum() - 60.0).abs() < 1e-9);
        assert_eq!(n.total_duration, 60.0);
        assert_eq!(n.segments[0].duration, 6.0);
        assert_eq!(n.segments[3].start_time, 48.0);
    }

    #[test]
    fn test_keeps_durations_within_tolerance() {
        let raw = narration(vec![
            segment("h", SegmentType::Hook, 0.0, 8.0),
            segment("i", SegmentType::ConceptIntroduction, 8.0, 17.0),
            segment("p", SegmentType::ProcessExplanation, 25.0, 22.0),
            segment("c", SegmentType::Conclusion, 47.0, 9.0),
        ]);
        let n = normalize_narration(raw, Some(60.0)).unwrap();
        assert_eq!(n.total_duration, 56.0);
        assert_eq!(n.segments[0].duration, 8.0);
    }

    fn assert_tiled(n: &Narration) {
        let mut expected_start = 0.0;
        for segment in &n.segments {
            assert!(
                (segment.start_time - expected_start).abs() < 1e-9,
                "segment {} starts at {}, previous ends at {}",
                segment.id,
                segment.start_time,
                expected_start
            );
            expected_start = segment.start_time + segment.duration;
        }
        assert!((n.total_duration - n.duration_sum()).abs() < 1e-9);
    }

    #[test]
    fn test_uneven_durations_still_abut() {
        let raw = narration(vec![
            segment("h", SegmentType::Hook, 0.0, 14.04),
            segment("i", SegmentType::ConceptIntroduction, 14.04, 14.04),
            segment("p", SegmentType::ProcessExplanation, 28.08, 14.04),
            segment("c", SegmentType::Conclusion, 42.12, 14.04),
        ]);
        let n = normalize_narration(raw, Some(60.0)).unwrap();

        assert_tiled(&n);
        assert_eq!(n.segments[0].duration, 14.0);
        assert_eq!(n.total_duration, 56.0);
    }

    #[test]
    fn test_manual_edit_durations_are_snapped_to_tenths() {
        let raw = narration(vec![
            segment("h", SegmentType::Hook, 0.0, 7.26),
            segment("i", SegmentType::ConceptIntroduction, 0.0, 0.03),
            segment("p", SegmentType::ProcessExplanation, 0.0, 19.97),
            segment("c", SegmentType::Conclusion, 0.0, 11.11),
        ]);
        let n = normalize_narration(raw, None).unwrap();

        assert_tiled(&n);
        assert_eq!(n.segments[1].duration, 0.1);
        assert_eq!(n.segments[2].start_time, 7.4);
        assert_eq!(n.total_duration, 38.5);
    }

    #[test]
    fn test_rejects_wrong_segment_count() {
        let raw = narration(vec![
            segment("h", SegmentType::Hook, 0.0, 10.0),
            segment("c", SegmentType::Conclusion, 10.0, 10.0),
        ]);
        assert!(matches!(
            normalize_narration(raw, None),
            Err(NarrationError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_segment_type() {
        let raw = narration(vec![
            segment("h", SegmentType::Hook, 0.0, 10.0),
            segment("h2", SegmentType::Hook, 10.0, 10.0),
            segment("p", SegmentType::ProcessExplanation, 20.0, 10.0),
            segment("c", SegmentType::Conclusion, 30.0, 10.0),
        ]);
        let err = normalize_narration(raw, None).unwrap_err();
        assert!(err.to_string().contains("concept_introduction"));
    }

    #[test]
    fn test_rejects_non_positive_duration() {
        let raw = narration(vec![
            segment("h", SegmentType::Hook, 0.0, 0.0),
            segment("i", SegmentType::ConceptIntroduction, 0.0, 10.0),
            segment("p", SegmentType::ProcessExplanation, 10.0, 10.0),
            segment("c", SegmentType::Conclusion, 20.0, 10.0),
        ]);
        assert!(normalize_narration(raw, None).is_err());
    }

    #[test]
    fn test_segment_type_serializes_snake_case() {
        let json = serde_json::to_string(&SegmentType::ConceptIntroduction).unwrap();
        assert_eq!(json, r#""concept_introduction""#);
    }
}
