//! Per-segment feature extraction
//!
//! The same extractor feeds training and inference, so the schema lives in
//! exactly one place: [`FeatureSchema::current`]. Extraction only reads the
//! segment itself plus a fixed margin of samples on either side; nothing
//! from later jumps leaks into a vector.

use crate::buffer::Session;
use crate::segmenter::JumpSegment;
use crate::types::{dot, norm, Sample, Vec3, STANDARD_GRAVITY};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version of the feature layout produced by [`FeatureExtractor`]
pub const FEATURE_SCHEMA_VERSION: u32 = 1;

/// Feature names in vector order
pub const FEATURE_NAMES: [&str; 14] = [
    "air_time_s",
    "segment_duration_s",
    "peak_angular_velocity_dps",
    "mean_angular_velocity_dps",
    "net_rotation_revs",
    "peak_rotation_speed_rps",
    "peak_impact_accel_g",
    "takeoff_accel_mean_g",
    "landing_accel_mean_g",
    "accel_asymmetry",
    "landing_accel_std_g",
    "post_landing_rotation_dps",
    "airborne_phases",
    "combination",
];

/// Gyro readings above this (deg/s) are sensor glitches
const GYRO_GLITCH_LIMIT: f64 = 1e6;

/// Feature extraction errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureError {
    #[error("Segment end index {end_index} outside stream of {len} samples")]
    OutOfBounds { end_index: usize, len: usize },

    #[error("Segment indices not ordered: start {start}, landing {landing}, end {end}")]
    InvalidSegment {
        start: usize,
        landing: usize,
        end: usize,
    },

    #[error("No stream for {0} in session")]
    MissingStream(crate::types::SensorId),
}

/// Named, ordered feature layout
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub names: Vec<String>,
}

impl FeatureSchema {
    /// Layout produced by this build's extractor
    pub fn current() -> Self {
        Self {
            version: FEATURE_SCHEMA_VERSION,
            names: FEATURE_NAMES.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// Feature values tagged with the schema they were computed under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub schema: FeatureSchema,
    pub values: Vec<f64>,
}

impl FeatureVector {
    pub fn new(schema: FeatureSchema, values: Vec<f64>) -> Self {
        Self { schema, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of a named feature
    pub fn get(&self, name: &str) -> Option<f64> {
        self.schema.index_of(name).and_then(|i| self.values.get(i).copied())
    }
}

/// Extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Samples of context read before takeoff and after the segment end
    pub context_margin: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self { context_margin: 30 }
    }
}

#[derive(Debug, Default)]
struct Stats {
    count: usize,
    sum: f64,
    sum_sq: f64,
    max: f64,
}

impl Stats {
    fn of(values: impl Iterator<Item = f64>) -> Self {
        let mut stats = Stats::default();
        for v in values {
            stats.count += 1;
            stats.sum += v;
            stats.sum_sq += v * v;
            if stats.count == 1 || v > stats.max {
                stats.max = v;
            }
        }
        stats
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    fn std(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mean = self.mean();
        (self.sum_sq / self.count as f64 - mean * mean).max(0.0).sqrt()
    }
}

fn valid_gyro(v: &Vec3) -> bool {
    v.iter().all(|c| c.is_finite() && c.abs() <= GYRO_GLITCH_LIMIT)
}

/// Computes [`FeatureVector`]s from segments
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn schema(&self) -> FeatureSchema {
        FeatureSchema::current()
    }

    /// Features of one segment
    ///
    /// `samples` is the sensor stream the segment indices refer to. Only
    /// `[start - margin, end + margin]` is read.
    pub fn extract(&self, segment: &JumpSegment, samples: &[Sample]) -> Result<FeatureVector, FeatureError> {
        let (s, l, e) = (segment.start_index, segment.landing_index, segment.end_index);
        if !(s <= l && l <= e && s < e) {
            return Err(FeatureError::InvalidSegment {
                start: s,
                landing: l,
                end: e,
            });
        }
        if e >= samples.len() {
            return Err(FeatureError::OutOfBounds {
                end_index: e,
                len: samples.len(),
            });
        }

        let margin = self.config.context_margin;
        let before = &samples[s.saturating_sub(margin)..s];
        let airborne = &samples[s..=l];
        let impact = &samples[l..=e];
        let after = &samples[l + 1..=(e + margin).min(samples.len() - 1)];

        let air_time = samples[l].timestamp.seconds_since(samples[s].timestamp);
        let duration = samples[e].timestamp.seconds_since(samples[s].timestamp);

        let gyro = Stats::of(
            airborne
                .iter()
                .filter(|x| valid_gyro(&x.angular_velocity))
                .map(Sample::gyro_magnitude),
        );
        let net_rotation = net_rotation_revs(airborne);

        let to_g = |x: &Sample| x.accel_magnitude() / STANDARD_GRAVITY;
        let peak_impact = Stats::of(impact.iter().map(to_g)).max;
        let takeoff = Stats::of(before.iter().map(to_g));
        let landing = Stats::of(after.iter().map(to_g));
        let asymmetry = {
            let (t, l) = (takeoff.mean(), landing.mean());
            if t + l == 0.0 {
                0.0
            } else {
                (l - t) / (l + t)
            }
        };
        let post_rotation = Stats::of(
            after
                .iter()
                .filter(|x| valid_gyro(&x.angular_velocity))
                .map(Sample::gyro_magnitude),
        );

        let values = vec![
            air_time,
            duration,
            gyro.max,
            gyro.mean(),
            net_rotation,
            gyro.max / 360.0,
            peak_impact,
            takeoff.mean(),
            landing.mean(),
            asymmetry,
            landing.std(),
            post_rotation.mean(),
            segment.airborne_phases as f64,
            if segment.combination { 1.0 } else { 0.0 },
        ];
        debug_assert_eq!(values.len(), FEATURE_NAMES.len());

        Ok(FeatureVector::new(FeatureSchema::current(), values))
    }

    /// Attach features to every segment of a session
    ///
    /// Segments that cannot be extracted keep `features: None` and are
    /// counted in the returned total of failures.
    pub fn enrich(&self, session: &Session, segments: &mut [JumpSegment]) -> usize {
        let mut failures = 0;
        for segment in segments.iter_mut() {
            let result = session
                .stream(segment.sensor_id)
                .ok_or(FeatureError::MissingStream(segment.sensor_id))
                .and_then(|stream| self.extract(segment, stream.samples()));
            match result {
                Ok(features) => segment.features = Some(features),
                Err(e) => {
                    tracing::warn!(
                        session_id = %segment.session_id,
                        sensor_id = %segment.sensor_id,
                        start = segment.start_index,
                        error = %e,
                        "Feature extraction failed"
                    );
                    failures += 1;
                }
            }
        }
        failures
    }
}

/// Revolutions about the dominant rotation axis of the airborne phase
///
/// Rectangle rule: each valid reading holds until the next valid one.
fn net_rotation_revs(airborne: &[Sample]) -> f64 {
    let valid: Vec<&Sample> = airborne.iter().filter(|x| valid_gyro(&x.angular_velocity)).collect();
    if valid.len() < 2 {
        return 0.0;
    }

    let mut mean = [0.0; 3];
    for x in &valid {
        for (m, w) in mean.iter_mut().zip(x.angular_velocity) {
            *m += w;
        }
    }
    let n = norm(&mean);
    if n == 0.0 {
        return 0.0;
    }
    let axis = [mean[0] / n, mean[1] / n, mean[2] / n];

    let degrees: f64 = valid
        .windows(2)
        .map(|w| dot(&w[0].angular_velocity, &axis) * w[1].timestamp.seconds_since(w[0].timestamp))
        .sum();
    (degrees / 360.0).abs()
}
