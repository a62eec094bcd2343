//! Exchange with the annotation helper
//!
//! Detected segments go out as an [`AnnotationBatch`]; human labels come
//! back as [`LabelAssignment`]s and are merged into a [`SegmentCorpus`] for
//! training.

use crate::buffer::Session;
use crate::features::FeatureSchema;
use crate::labels::{JumpLabels, JumpType, LandingOutcome};
use crate::segmenter::JumpSegment;
use crate::types::{SensorId, SessionId};
use chrono::{DateTime, Utc};
use jumpsense_common::time::format_mm_ss;
use jumpsense_common::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Segment sent out for labeling, with display helpers for the operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationItem {
    pub segment: JumpSegment,
    /// Seconds from session start
    pub start_s: f64,
    /// `mm:ss` start time for matching against video
    pub video_time: String,
}

/// Segments awaiting human labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationBatch {
    pub created_at: DateTime<Utc>,
    pub feature_schema: FeatureSchema,
    pub items: Vec<AnnotationItem>,
}

impl AnnotationBatch {
    /// Batch of a session's segments (features should already be attached)
    pub fn from_segments(session: &Session, segments: &[JumpSegment]) -> Self {
        let origin = session.start_timestamp();
        let items = segments
            .iter()
            .map(|segment| {
                let start_s = match (origin, session.stream(segment.sensor_id)) {
                    (Some(origin), Some(stream)) => stream
                        .samples()
                        .get(segment.start_index)
                        .map_or(0.0, |s| s.timestamp.seconds_since(origin)),
                    _ => 0.0,
                };
                AnnotationItem {
                    segment: segment.clone(),
                    start_s,
                    video_time: format_mm_ss(start_s),
                }
            })
            .collect();

        Self {
            created_at: Utc::now(),
            feature_schema: FeatureSchema::current(),
            items,
        }
    }

    pub fn segments(&self) -> impl Iterator<Item = &JumpSegment> + '_ {
        self.items.iter().map(|item| &item.segment)
    }

    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(self, path)
    }
}

/// Labels assigned by a human to one segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelAssignment {
    pub session_id: SessionId,
    pub sensor_id: SensorId,
    pub start_index: usize,
    #[serde(default)]
    pub jump_type: Option<JumpType>,
    #[serde(default)]
    pub success: Option<LandingOutcome>,
}

/// Result of merging label assignments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelReport {
    pub applied: usize,
    /// Assignments that matched no segment
    pub unmatched: Vec<LabelAssignment>,
}

/// Attach assignments to segments keyed by (session, sensor, start index)
///
/// Only the labels present in an assignment overwrite existing ones.
/// Assignments without a matching segment are returned, not treated as
/// errors.
pub fn apply_labels(segments: &mut [JumpSegment], assignments: &[LabelAssignment]) -> LabelReport {
    let index: HashMap<(SessionId, SensorId, usize), usize> = segments
        .iter()
        .enumerate()
        .map(|(i, s)| ((s.session_id, s.sensor_id, s.start_index), i))
        .collect();

    let mut report = LabelReport::default();
    for assignment in assignments {
        let key = (assignment.session_id, assignment.sensor_id, assignment.start_index);
        let Some(&i) = index.get(&key) else {
            report.unmatched.push(assignment.clone());
            continue;
        };
        let labels = &mut segments[i].labels;
        if assignment.jump_type.is_some() {
            labels.jump_type = assignment.jump_type;
        }
        if assignment.success.is_some() {
            labels.success = assignment.success;
        }
        report.applied += 1;
    }

    if !report.unmatched.is_empty() {
        tracing::warn!(
            applied = report.applied,
            unmatched = report.unmatched.len(),
            "Some label assignments matched no segment"
        );
    }
    report
}

/// Labeled segments used as training input
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentCorpus {
    pub segments: Vec<JumpSegment>,
}

impl SegmentCorpus {
    pub fn new(segments: Vec<JumpSegment>) -> Self {
        Self { segments }
    }

    /// Segments carrying at least one label
    pub fn labeled(&self) -> impl Iterator<Item = &JumpSegment> + '_ {
        self.segments.iter().filter(|s| !s.labels.is_empty())
    }

    /// Add segments, replacing any with the same span
    pub fn merge(&mut self, segments: impl IntoIterator<Item = JumpSegment>) {
        for segment in segments {
            match self.segments.iter_mut().find(|s| s.same_span(&segment)) {
                Some(existing) => *existing = segment,
                None => self.segments.push(segment),
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(self, path)
    }
}

/// Human labels, for callers that only need the pair
impl From<&LabelAssignment> for JumpLabels {
    fn from(a: &LabelAssignment) -> Self {
        JumpLabels::new(a.jump_type, a.success)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}
