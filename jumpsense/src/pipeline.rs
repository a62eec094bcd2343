//! End-to-end processing of closed sessions
//!
//! Segment, extract, classify, then decide whether a human should look at
//! the result. Every stage is pure, so independent sessions are processed
//! in parallel with rayon.

use crate::buffer::Session;
use crate::classifier::{Classifier, ClassifierError, JumpTypeClassifier, SuccessClassifier};
use crate::features::{FeatureExtractor, FeatureVector};
use crate::labels::{JumpType, LandingOutcome};
use crate::segmenter::{JumpSegment, JumpSegmenter, SegmentFlags};
use crate::types::{SensorId, SessionId};
use jumpsense_common::time::format_mm_ss;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("Classification failed for {sensor_id} segment at sample {start_index}: {source}")]
    Classification {
        session_id: SessionId,
        sensor_id: SensorId,
        start_index: usize,
        #[source]
        source: ClassifierError,
    },
}

/// A label with its calibrated confidence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredLabel<L> {
    pub label: L,
    pub confidence: f64,
}

/// Why a record should be shown to an operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ReviewReason {
    SuspectSegment,
    TruncatedSegment,
    LowTypeConfidence { confidence: f64 },
    LowSuccessConfidence { confidence: f64 },
    UnknownRotation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewOutcome {
    Accept,
    NeedsReview(Vec<ReviewReason>),
}

impl ReviewOutcome {
    pub fn needs_review(&self) -> bool {
        matches!(self, ReviewOutcome::NeedsReview(_))
    }
}

/// Labeled jump event handed to storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JumpRecord {
    pub session_id: SessionId,
    pub sensor_id: SensorId,
    pub start_index: usize,
    pub end_index: usize,
    /// Seconds from session start
    pub start_s: f64,
    pub end_s: f64,
    /// Start time as `mm:ss`, for matching against training videos
    pub video_time: String,
    pub air_time_s: f64,
    pub features: Option<FeatureVector>,
    pub jump_type: Option<ScoredLabel<JumpType>>,
    pub success: Option<ScoredLabel<LandingOutcome>>,
    pub measured_revolutions: Option<f64>,
    pub declared_revolutions: Option<f64>,
    pub flags: SegmentFlags,
    pub combination: bool,
    pub review: ReviewOutcome,
}

/// Thresholds deciding when a prediction is surfaced for manual review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewPolicy {
    pub min_type_confidence: f64,
    pub min_success_confidence: f64,
    pub review_suspect: bool,
    pub review_truncated: bool,
    pub review_unknown_rotation: bool,
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            min_type_confidence: 0.6,
            min_success_confidence: 0.6,
            review_suspect: true,
            review_truncated: true,
            review_unknown_rotation: true,
        }
    }
}

impl ReviewPolicy {
    pub fn assess(&self, record: &JumpRecord) -> ReviewOutcome {
        let mut reasons = Vec::new();
        if self.review_suspect && record.flags.contains(SegmentFlags::SUSPECT) {
            reasons.push(ReviewReason::SuspectSegment);
        }
        if self.review_truncated && record.flags.contains(SegmentFlags::TRUNCATED) {
            reasons.push(ReviewReason::TruncatedSegment);
        }
        if let Some(p) = &record.jump_type {
            if p.confidence < self.min_type_confidence {
                reasons.push(ReviewReason::LowTypeConfidence {
                    confidence: p.confidence,
                });
            }
        }
        if let Some(p) = &record.success {
            if p.confidence < self.min_success_confidence {
                reasons.push(ReviewReason::LowSuccessConfidence {
                    confidence: p.confidence,
                });
            }
        }
        if self.review_unknown_rotation && record.jump_type.is_some() && record.declared_revolutions.is_none() {
            reasons.push(ReviewReason::UnknownRotation);
        }

        if reasons.is_empty() {
            ReviewOutcome::Accept
        } else {
            ReviewOutcome::NeedsReview(reasons)
        }
    }
}

/// Everything derived from one session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutput {
    pub session_id: SessionId,
    /// Segments with features attached (labels untouched)
    pub segments: Vec<JumpSegment>,
    pub records: Vec<JumpRecord>,
}

/// Segmenter, extractor and optional classifiers wired together
#[derive(Debug, Clone, Default)]
pub struct JumpPipeline {
    segmenter: JumpSegmenter,
    extractor: FeatureExtractor,
    type_classifier: Option<JumpTypeClassifier>,
    success_classifier: Option<SuccessClassifier>,
    review: ReviewPolicy,
}

impl JumpPipeline {
    pub fn new(segmenter: JumpSegmenter, extractor: FeatureExtractor, review: ReviewPolicy) -> Self {
        Self {
            segmenter,
            extractor,
            type_classifier: None,
            success_classifier: None,
            review,
        }
    }

    pub fn with_type_classifier(mut self, classifier: JumpTypeClassifier) -> Self {
        self.type_classifier = Some(classifier);
        self
    }

    pub fn with_success_classifier(mut self, classifier: SuccessClassifier) -> Self {
        self.success_classifier = Some(classifier);
        self
    }

    pub fn segmenter(&self) -> &JumpSegmenter {
        &self.segmenter
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    /// Segments with features attached, ready for annotation or training
    pub fn detect(&self, session: &Session) -> Vec<JumpSegment> {
        let mut segments = self.segmenter.segment(session);
        self.extractor.enrich(session, &mut segments);
        segments
    }

    /// Detect, classify and assess every jump in a session
    pub fn process_session(&self, session: &Session) -> Result<SessionOutput, PipelineError> {
        let segments = self.detect(session);
        let origin = session.start_timestamp();

        let mut records = Vec::with_capacity(segments.len());
        for segment in &segments {
            let Some(stream) = session.stream(segment.sensor_id) else {
                continue;
            };
            let samples = stream.samples();
            let offset = |index: usize| match origin {
                Some(origin) => samples[index].timestamp.seconds_since(origin),
                None => 0.0,
            };

            let (jump_type, success) = match &segment.features {
                Some(features) => self.classify(segment, features)?,
                None => (None, None),
            };
            let measured = segment
                .features
                .as_ref()
                .and_then(|f| f.get("net_rotation_revs"));
            let declared = match (jump_type, measured) {
                (Some(p), Some(revs)) => p.label.declared_revolutions(revs),
                _ => None,
            };

            let start_s = offset(segment.start_index);
            let mut record = JumpRecord {
                session_id: segment.session_id,
                sensor_id: segment.sensor_id,
                start_index: segment.start_index,
                end_index: segment.end_index,
                start_s,
                end_s: offset(segment.end_index),
                video_time: format_mm_ss(start_s),
                air_time_s: segment.air_time_s(samples).unwrap_or(0.0),
                features: segment.features.clone(),
                jump_type,
                success,
                measured_revolutions: measured,
                declared_revolutions: declared,
                flags: segment.flags,
                combination: segment.combination,
                review: ReviewOutcome::Accept,
            };
            record.review = self.review.assess(&record);
            records.push(record);
        }

        let needs_review = records.iter().filter(|r| r.review.needs_review()).count();
        tracing::info!(
            session_id = %session.id(),
            jumps = records.len(),
            needs_review,
            classified = self.type_classifier.is_some() || self.success_classifier.is_some(),
            "Session processed"
        );

        Ok(SessionOutput {
            session_id: session.id(),
            segments,
            records,
        })
    }

    /// Process independent sessions in parallel, preserving input order
    pub fn process_sessions(&self, sessions: &[Session]) -> Vec<Result<SessionOutput, PipelineError>> {
        sessions.par_iter().map(|s| self.process_session(s)).collect()
    }

    #[allow(clippy::type_complexity)]
    fn classify(
        &self,
        segment: &JumpSegment,
        features: &FeatureVector,
    ) -> Result<(Option<ScoredLabel<JumpType>>, Option<ScoredLabel<LandingOutcome>>), PipelineError> {
        let wrap = |source| PipelineError::Classification {
            session_id: segment.session_id,
            sensor_id: segment.sensor_id,
            start_index: segment.start_index,
            source,
        };

        let jump_type = match &self.type_classifier {
            Some(c) => {
                let p = c.predict(features).map_err(wrap)?;
                Some(ScoredLabel {
                    label: p.label,
                    confidence: p.confidence,
                })
            }
            None => None,
        };
        let success = match &self.success_classifier {
            Some(c) => {
                let p = c.predict(features).map_err(wrap)?;
                Some(ScoredLabel {
                    label: p.label,
                    confidence: p.confidence,
                })
            }
            None => None,
        };
        Ok((jump_type, success))
    }
}
