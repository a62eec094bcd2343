//! Jump segmentation
//!
//! A per-sensor state machine over acceleration magnitude:
//!
//! ```text
//! Grounded --(sustained free-fall)--> Airborne --(impact)--> Landed --(settled)--> Grounded
//!                                        ^                      |
//!                                        +--(free-fall again)---+
//! ```
//!
//! A skater in the air is in free-fall, so the accelerometer reads close to
//! zero. Takeoff is a sustained run of low-magnitude readings, landing is the
//! impact spike, and the jump ends once readings settle back around gravity.
//! Each sample is looked at once; segmentation is O(n) per stream and keeps
//! O(1) state.

use crate::buffer::{SensorStream, Session};
use crate::features::FeatureVector;
use crate::labels::JumpLabels;
use crate::types::{Sample, SensorId, SessionId, STANDARD_GRAVITY};
use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};
use thiserror::Error;

/// Invalid segmenter configuration
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{name} must be a finite value in {range}, got {value}")]
    OutOfRange {
        name: &'static str,
        range: &'static str,
        value: f64,
    },

    #[error("freefall_fraction ({freefall}) must be below impact_fraction ({impact})")]
    ThresholdOrder { freefall: f64, impact: f64 },

    #[error("min_air_time_s ({min}) must be below max_air_time_s ({max})")]
    AirTimeOrder { min: f64, max: f64 },

    #[error("{0} must be at least 1")]
    ZeroCount(&'static str),
}

/// Calibratable segmentation thresholds
///
/// Fractions are relative to standard gravity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Free-fall when magnitude < freefall_fraction * g
    pub freefall_fraction: f64,
    /// Impact when magnitude > impact_fraction * g
    pub impact_fraction: f64,
    /// Settled when |magnitude - g| <= settle_tolerance_fraction * g
    pub settle_tolerance_fraction: f64,
    /// Consecutive free-fall samples required for takeoff
    pub min_airborne_samples: usize,
    /// Impacts earlier than this after takeoff are noise (seconds)
    pub min_air_time_s: f64,
    /// Longer airborne phases are flagged suspect (seconds)
    pub max_air_time_s: f64,
    /// Consecutive settled samples that end a jump
    pub settle_samples: usize,
    /// Max gap between jumps of a combination (seconds)
    pub combination_window_s: f64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            freefall_fraction: 0.3,
            impact_fraction: 0.9,
            settle_tolerance_fraction: 0.25,
            min_airborne_samples: 3,
            min_air_time_s: 0.15,
            max_air_time_s: 3.0,
            settle_samples: 10,
            combination_window_s: 1.0,
        }
    }
}

fn check_range(name: &'static str, range: &'static str, value: f64, ok: bool) -> Result<(), ConfigError> {
    if value.is_finite() && ok {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { name, range, value })
    }
}

impl SegmenterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "freefall_fraction",
            "(0, 1)",
            self.freefall_fraction,
            self.freefall_fraction > 0.0 && self.freefall_fraction < 1.0,
        )?;
        check_range(
            "impact_fraction",
            "(0, 10]",
            self.impact_fraction,
            self.impact_fraction > 0.0 && self.impact_fraction <= 10.0,
        )?;
        if self.freefall_fraction >= self.impact_fraction {
            return Err(ConfigError::ThresholdOrder {
                freefall: self.freefall_fraction,
                impact: self.impact_fraction,
            });
        }
        check_range(
            "settle_tolerance_fraction",
            "(0, 1]",
            self.settle_tolerance_fraction,
            self.settle_tolerance_fraction > 0.0 && self.settle_tolerance_fraction <= 1.0,
        )?;
        check_range("min_air_time_s", "[0, inf)", self.min_air_time_s, self.min_air_time_s >= 0.0)?;
        check_range("max_air_time_s", "(0, inf)", self.max_air_time_s, self.max_air_time_s > 0.0)?;
        if self.min_air_time_s >= self.max_air_time_s {
            return Err(ConfigError::AirTimeOrder {
                min: self.min_air_time_s,
                max: self.max_air_time_s,
            });
        }
        check_range(
            "combination_window_s",
            "[0, inf)",
            self.combination_window_s,
            self.combination_window_s >= 0.0,
        )?;
        if self.min_airborne_samples == 0 {
            return Err(ConfigError::ZeroCount("min_airborne_samples"));
        }
        if self.settle_samples == 0 {
            return Err(ConfigError::ZeroCount("settle_samples"));
        }
        Ok(())
    }
}

/// Outcome flags attached to a segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentFlags(u8);

impl SegmentFlags {
    pub const NONE: SegmentFlags = SegmentFlags(0);
    /// Free-fall phases total more than `max_air_time_s`
    ///
    /// Ground contact between the phases of a multi-phase segment does not count.
    pub const SUSPECT: SegmentFlags = SegmentFlags(1);
    /// Stream ended before the jump settled
    pub const TRUNCATED: SegmentFlags = SegmentFlags(1 << 1);

    pub fn contains(self, other: SegmentFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: SegmentFlags) {
        self.0 |= other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Flag names, for display
    pub fn names(self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.contains(Self::SUSPECT) {
            names.push("suspect");
        }
        if self.contains(Self::TRUNCATED) {
            names.push("truncated");
        }
        names
    }
}

impl BitOr for SegmentFlags {
    type Output = SegmentFlags;

    fn bitor(self, rhs: SegmentFlags) -> SegmentFlags {
        SegmentFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for SegmentFlags {
    fn bitor_assign(&mut self, rhs: SegmentFlags) {
        self.insert(rhs);
    }
}

/// One detected jump attempt
///
/// Indices point into the owning sensor stream of the session:
/// `start_index` is the first free-fall sample, `landing_index` the impact
/// sample and `end_index` the sample where the skater had settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JumpSegment {
    pub session_id: SessionId,
    pub sensor_id: SensorId,
    pub start_index: usize,
    pub landing_index: usize,
    pub end_index: usize,
    #[serde(default)]
    pub flags: SegmentFlags,
    /// Free-fall phases merged into this segment (1 for a clean jump)
    pub airborne_phases: u32,
    /// Started shortly after the previous jump ended
    #[serde(default)]
    pub combination: bool,
    #[serde(default)]
    pub features: Option<FeatureVector>,
    #[serde(default)]
    pub labels: JumpLabels,
}

impl JumpSegment {
    pub fn is_suspect(&self) -> bool {
        self.flags.contains(SegmentFlags::SUSPECT)
    }

    pub fn is_truncated(&self) -> bool {
        self.flags.contains(SegmentFlags::TRUNCATED)
    }

    /// Number of samples covered, inclusive of both ends
    pub fn sample_count(&self) -> usize {
        self.end_index - self.start_index + 1
    }

    /// Samples of the segment within its stream, if the indices are valid
    pub fn samples<'a>(&self, stream: &'a [Sample]) -> Option<&'a [Sample]> {
        stream.get(self.start_index..=self.end_index)
    }

    /// Seconds between takeoff and landing
    pub fn air_time_s(&self, stream: &[Sample]) -> Option<f64> {
        let start = stream.get(self.start_index)?;
        let landing = stream.get(self.landing_index)?;
        Some(landing.timestamp.seconds_since(start.timestamp))
    }

    /// True when both segments cover the same sample range of the same sensor
    pub fn same_span(&self, other: &JumpSegment) -> bool {
        self.session_id == other.session_id
            && self.sensor_id == other.sensor_id
            && self.start_index == other.start_index
            && self.end_index == other.end_index
    }
}

/// Index range found by the state machine, before session metadata is attached
#[derive(Debug, Clone, Copy, PartialEq)]
struct Span {
    start: usize,
    landing: usize,
    end: usize,
    phases: u32,
    flags: SegmentFlags,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Grounded {
        run: usize,
        run_start: usize,
    },
    Airborne {
        start: usize,
        phase_start: usize,
        phases: u32,
        /// Free-fall seconds of the completed phases
        airborne_s: f64,
    },
    Landed {
        start: usize,
        landing: usize,
        phases: u32,
        airborne_s: f64,
        settled: usize,
        run: usize,
        run_start: usize,
    },
}

/// Streaming state machine over one sensor's samples
struct Tracker<'a> {
    config: &'a SegmenterConfig,
    freefall_threshold: f64,
    impact_threshold: f64,
    settle_tolerance: f64,
    state: State,
}

impl<'a> Tracker<'a> {
    fn new(config: &'a SegmenterConfig) -> Self {
        Self {
            config,
            freefall_threshold: config.freefall_fraction * STANDARD_GRAVITY,
            impact_threshold: config.impact_fraction * STANDARD_GRAVITY,
            settle_tolerance: config.settle_tolerance_fraction * STANDARD_GRAVITY,
            state: State::Grounded { run: 0, run_start: 0 },
        }
    }

    fn flags_for(&self, airborne_s: f64) -> SegmentFlags {
        if airborne_s > self.config.max_air_time_s {
            SegmentFlags::SUSPECT
        } else {
            SegmentFlags::NONE
        }
    }

    /// Advance by the sample at `i`; returns a span when a jump completes
    fn step(&mut self, samples: &[Sample], i: usize) -> Option<Span> {
        let m = samples[i].accel_magnitude();
        let free_fall = m < self.freefall_threshold;

        match self.state {
            State::Grounded { run, run_start } => {
                if !free_fall {
                    self.state = State::Grounded { run: 0, run_start: i };
                    return None;
                }
                let run_start = if run == 0 { i } else { run_start };
                let run = run + 1;
                self.state = if run >= self.config.min_airborne_samples {
                    State::Airborne {
                        start: run_start,
                        phase_start: run_start,
                        phases: 1,
                        airborne_s: 0.0,
                    }
                } else {
                    State::Grounded { run, run_start }
                };
                None
            }

            State::Airborne {
                start,
                phase_start,
                phases,
                airborne_s,
            } => {
                if m <= self.impact_threshold {
                    return None;
                }
                let elapsed = samples[i].timestamp.seconds_since(samples[phase_start].timestamp);
                if elapsed < self.config.min_air_time_s && phases == 1 {
                    tracing::trace!(start, impact = i, elapsed, "Early impact, takeoff abandoned");
                    self.state = State::Grounded { run: 0, run_start: i };
                } else {
                    self.state = State::Landed {
                        start,
                        landing: i,
                        phases,
                        airborne_s: airborne_s + elapsed,
                        settled: 0,
                        run: 0,
                        run_start: i,
                    };
                }
                None
            }

            State::Landed {
                start,
                landing,
                phases,
                airborne_s,
                settled,
                run,
                run_start,
            } => {
                if free_fall {
                    let run_start = if run == 0 { i } else { run_start };
                    let run = run + 1;
                    self.state = if run >= self.config.min_airborne_samples {
                        State::Airborne {
                            start,
                            phase_start: run_start,
                            phases: phases + 1,
                            airborne_s,
                        }
                    } else {
                        State::Landed {
                            start,
                            landing,
                            phases,
                            airborne_s,
                            settled: 0,
                            run,
                            run_start,
                        }
                    };
                    return None;
                }

                let settled = if (m - STANDARD_GRAVITY).abs() <= self.settle_tolerance {
                    settled + 1
                } else {
                    0
                };
                if settled >= self.config.settle_samples {
                    self.state = State::Grounded { run: 0, run_start: i };
                    return Some(Span {
                        start,
                        landing,
                        end: i,
                        phases,
                        flags: self.flags_for(airborne_s),
                    });
                }
                self.state = State::Landed {
                    start,
                    landing,
                    phases,
                    airborne_s,
                    settled,
                    run: 0,
                    run_start: i,
                };
                None
            }
        }
    }

    /// Close an in-progress jump at the end of the stream
    fn finish(&self, samples: &[Sample]) -> Option<Span> {
        let last = samples.len().checked_sub(1)?;
        let (start, landing, phases, airborne_s) = match self.state {
            State::Grounded { .. } => return None,
            State::Airborne {
                start,
                phase_start,
                phases,
                airborne_s,
            } => {
                let open = samples[last].timestamp.seconds_since(samples[phase_start].timestamp);
                (start, last, phases, airborne_s + open)
            }
            State::Landed {
                start,
                landing,
                phases,
                airborne_s,
                ..
            } => (start, landing, phases, airborne_s),
        };
        if last <= start {
            return None;
        }
        Some(Span {
            start,
            landing,
            end: last,
            phases,
            flags: self.flags_for(airborne_s) | SegmentFlags::TRUNCATED,
        })
    }
}

/// Detects jump segments in closed sessions
#[derive(Debug, Clone, Default)]
pub struct JumpSegmenter {
    config: SegmenterConfig,
}

impl JumpSegmenter {
    pub fn new(config: SegmenterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Segments of one sensor stream, time-ordered and non-overlapping
    pub fn segment_stream(&self, session_id: SessionId, stream: &SensorStream) -> Vec<JumpSegment> {
        let samples = stream.samples();
        let mut tracker = Tracker::new(&self.config);
        let mut spans = Vec::new();

        for i in 0..samples.len() {
            if let Some(span) = tracker.step(samples, i) {
                spans.push(span);
            }
        }
        if let Some(span) = tracker.finish(samples) {
            spans.push(span);
        }

        let mut segments = Vec::with_capacity(spans.len());
        let mut previous_end: Option<usize> = None;
        for span in spans {
            let combination = previous_end.is_some_and(|end| {
                samples[span.start].timestamp.seconds_since(samples[end].timestamp)
                    <= self.config.combination_window_s
            });
            previous_end = Some(span.end);

            let segment = JumpSegment {
                session_id,
                sensor_id: stream.sensor_id(),
                start_index: span.start,
                landing_index: span.landing,
                end_index: span.end,
                flags: span.flags,
                airborne_phases: span.phases,
                combination,
                features: None,
                labels: JumpLabels::default(),
            };
            tracing::debug!(
                %session_id,
                sensor_id = %segment.sensor_id,
                start = segment.start_index,
                landing = segment.landing_index,
                end = segment.end_index,
                air_time_s = segment.air_time_s(samples).unwrap_or(0.0),
                phases = segment.airborne_phases,
                flags = ?segment.flags.names(),
                combination,
                "Jump segment detected"
            );
            segments.push(segment);
        }
        segments
    }

    /// Segments of every sensor in the session, grouped by sensor id
    pub fn segment(&self, session: &Session) -> Vec<JumpSegment> {
        let segments: Vec<JumpSegment> = session
            .streams()
            .flat_map(|stream| self.segment_stream(session.id(), stream))
            .collect();

        let suspect = segments.iter().filter(|s| s.is_suspect()).count();
        tracing::info!(
            session_id = %session.id(),
            sensors = session.sensor_count(),
            segments = segments.len(),
            suspect,
            "Session segmented"
        );
        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Quaternion;
    use jumpsense_common::Timestamp;

    const PERIOD_US: u64 = 10_000; // 100 Hz

    /// Build a stream from (magnitude, sample count) phases
    fn stream(phases: &[(f64, usize)]) -> Session {
        let mut samples = Vec::new();
        let mut i = 0u64;
        for &(magnitude, count) in phases {
            for _ in 0..count {
                samples.push(Sample::new(
                    Timestamp::from_micros(i * PERIOD_US),
                    SensorId(0),
                    [0.0, 0.0, magnitude],
                    [0.0, 0.0, 0.0],
                    Quaternion::IDENTITY,
                ));
                i += 1;
            }
        }
        Session::from_samples(SessionId::new(), samples)
    }

    const G: f64 = STANDARD_GRAVITY;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SegmenterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = SegmenterConfig {
            freefall_fraction: 0.95,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ThresholdOrder { .. })));

        let config = SegmenterConfig {
            settle_samples: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroCount("settle_samples")));

        let config = SegmenterConfig {
            min_air_time_s: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { .. })));

        assert!(JumpSegmenter::new(SegmenterConfig {
            max_air_time_s: 0.1,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_single_clean_jump() {
        let session = stream(&[(G, 50), (0.5, 40), (3.0 * G, 3), (G, 30)]);
        let segments = JumpSegmenter::default().segment(&session);

        assert_eq!(segments.len(), 1);
        let seg = &segments[0];
        assert_eq!(seg.start_index, 50);
        assert_eq!(seg.landing_index, 90);
        assert_eq!(seg.end_index, 90 + 3 + 9);
        assert_eq!(seg.airborne_phases, 1);
        assert!(seg.flags.is_empty());
        assert!(!seg.combination);

        let samples = session.stream(SensorId(0)).unwrap().samples();
        assert!((seg.air_time_s(samples).unwrap() - 0.40).abs() < 1e-9);
    }

    #[test]
    fn test_short_dip_is_not_a_takeoff() {
        // Two free-fall samples are below min_airborne_samples
        let session = stream(&[(G, 20), (0.5, 2), (G, 20)]);
        assert!(JumpSegmenter::default().segment(&session).is_empty());
    }

    #[test]
    fn test_early_impact_abandons_candidate() {
        // 0.05 s of free-fall is below min_air_time_s
        let session = stream(&[(G, 20), (0.5, 5), (2.0 * G, 2), (G, 30)]);
        assert!(JumpSegmenter::default().segment(&session).is_empty());
    }

    #[test]
    fn test_long_air_time_flagged_suspect() {
        let session = stream(&[(G, 20), (0.5, 350), (2.0 * G, 2), (G, 30)]);
        let segments = JumpSegmenter::default().segment(&session);
        assert_eq!(segments.len(), 1);
        assert!(segments[0].is_suspect());
        assert!(!segments[0].is_truncated());
    }

    #[test]
    fn test_refall_while_landed_extends_segment() {
        let session = stream(&[(G, 20), (0.5, 30), (2.0 * G, 3), (0.5, 20), (2.0 * G, 2), (G, 30)]);
        let segments = JumpSegmenter::default().segment(&session);

        assert_eq!(segments.len(), 1);
        let seg = &segments[0];
        assert_eq!(seg.start_index, 20);
        assert_eq!(seg.landing_index, 20 + 30 + 3 + 20);
        assert_eq!(seg.airborne_phases, 2);
    }

    #[test]
    fn test_suspect_counts_only_free_fall_phases() {
        // 1.4 s + 1.4 s in the air, 3.3 s from takeoff to final landing
        let session = stream(&[(G, 20), (0.5, 140), (2.0 * G, 50), (0.5, 140), (2.0 * G, 2), (G, 30)]);
        let segments = JumpSegmenter::default().segment(&session);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].airborne_phases, 2);
        let samples = session.stream(SensorId(0)).unwrap().samples();
        assert!(segments[0].air_time_s(samples).unwrap() > 3.0);
        assert!(!segments[0].is_suspect());

        // 1.6 s + 1.6 s
        let session = stream(&[(G, 20), (0.5, 160), (2.0 * G, 10), (0.5, 160), (2.0 * G, 2), (G, 30)]);
        let segments = JumpSegmenter::default().segment(&session);
        assert_eq!(segments.len(), 1);
        assert!(segments[0].is_suspect());
    }

    #[test]
    fn test_stream_ending_in_air_is_truncated() {
        let session = stream(&[(G, 20), (0.5, 30)]);
        let segments = JumpSegmenter::default().segment(&session);
        assert_eq!(segments.len(), 1);
        assert!(segments[0].is_truncated());
        assert_eq!(segments[0].end_index, 49);
        assert_eq!(segments[0].landing_index, 49);
    }

    #[test]
    fn test_combination_flag() {
        let session = stream(&[
            (G, 20),
            (0.5, 40),
            (2.0 * G, 2),
            (G, 20),
            (0.5, 40),
            (2.0 * G, 2),
            (G, 300),
            (0.5, 40),
            (2.0 * G, 2),
            (G, 20),
        ]);
        let segments = JumpSegmenter::default().segment(&session);
        assert_eq!(segments.len(), 3);
        assert!(!segments[0].combination);
        assert!(segments[1].combination);
        assert!(!segments[2].combination);
    }

    #[test]
    fn test_segmentation_is_deterministic() {
        let session = stream(&[(G, 20), (0.5, 40), (2.0 * G, 2), (G, 20), (0.5, 60), (2.0 * G, 2), (G, 15)]);
        let segmenter = JumpSegmenter::default();
        assert_eq!(segmenter.segment(&session), segmenter.segment(&session));
    }

    #[test]
    fn test_flags_bit_operations() {
        let mut flags = SegmentFlags::NONE;
        assert!(flags.is_empty());
        flags |= SegmentFlags::TRUNCATED;
        assert!(flags.contains(SegmentFlags::TRUNCATED));
        assert!(!flags.contains(SegmentFlags::SUSPECT));
        assert_eq!((flags | SegmentFlags::SUSPECT).names(), vec!["suspect", "truncated"]);
    }
}
