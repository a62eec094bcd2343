//! Cross-sensor views: time-ordered merge and nearest-timestamp alignment

use crate::types::{Sample, SensorId};
use jumpsense_common::Timestamp;
use std::time::Duration;

/// Nominal sample period for a sample rate (default alignment tolerance)
pub fn nominal_period(sample_rate_hz: f64) -> Duration {
    if sample_rate_hz > 0.0 && sample_rate_hz.is_finite() {
        Duration::from_secs_f64(1.0 / sample_rate_hz)
    } else {
        Duration::ZERO
    }
}

/// Lazy k-way merge of sensor streams ordered by (timestamp, sensor id)
#[derive(Debug, Clone)]
pub struct MergedView<'a> {
    streams: Vec<&'a [Sample]>,
    cursors: Vec<usize>,
    remaining: usize,
}

impl<'a> MergedView<'a> {
    pub(crate) fn new(streams: Vec<&'a [Sample]>) -> Self {
        let remaining = streams.iter().map(|s| s.len()).sum();
        let cursors = vec![0; streams.len()];
        Self {
            streams,
            cursors,
            remaining,
        }
    }
}

impl<'a> Iterator for MergedView<'a> {
    type Item = &'a Sample;

    fn next(&mut self) -> Option<Self::Item> {
        let mut best: Option<(usize, (Timestamp, SensorId))> = None;
        for (i, stream) in self.streams.iter().enumerate() {
            if let Some(sample) = stream.get(self.cursors[i]) {
                let key = (sample.timestamp, sample.sensor_id);
                if best.map_or(true, |(_, best_key)| key < best_key) {
                    best = Some((i, key));
                }
            }
        }

        let (i, _) = best?;
        let sample = &self.streams[i][self.cursors[i]];
        self.cursors[i] += 1;
        self.remaining -= 1;
        Some(sample)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for MergedView<'_> {}

/// Samples of different sensors observed at (nearly) the same instant
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedFrame<'a> {
    /// Timestamp of the anchoring sample
    pub timestamp: Timestamp,
    /// One sample per participating sensor, ordered by sensor id
    pub samples: Vec<&'a Sample>,
}

impl AlignedFrame<'_> {
    /// True when only one sensor contributed
    pub fn is_unaligned(&self) -> bool {
        self.samples.len() < 2
    }
}

fn distance(a: Timestamp, b: Timestamp) -> u64 {
    a.as_micros().abs_diff(b.as_micros())
}

/// Nearest-timestamp matching of every stream against the first one
pub(crate) fn align_streams<'a>(streams: &[&'a [Sample]], tolerance: Duration) -> Vec<AlignedFrame<'a>> {
    let Some((reference, others)) = streams.split_first() else {
        return Vec::new();
    };
    let tolerance_us = tolerance.as_micros().min(u64::MAX as u128) as u64;

    let mut frames: Vec<AlignedFrame<'a>> = reference
        .iter()
        .map(|s| AlignedFrame {
            timestamp: s.timestamp,
            samples: vec![s],
        })
        .collect();
    let mut unaligned = Vec::new();

    for other in others {
        let mut used = vec![false; other.len()];
        let mut j = 0;

        if !other.is_empty() {
            for (i, anchor) in reference.iter().enumerate() {
                // Nearest index is non-decreasing because both streams are sorted
                while j + 1 < other.len()
                    && distance(other[j + 1].timestamp, anchor.timestamp)
                        <= distance(other[j].timestamp, anchor.timestamp)
                {
                    j += 1;
                }
                if !used[j] && distance(other[j].timestamp, anchor.timestamp) <= tolerance_us {
                    used[j] = true;
                    frames[i].samples.push(&other[j]);
                }
            }
        }

        unaligned.extend(
            other
                .iter()
                .zip(&used)
                .filter(|(_, &matched)| !matched)
                .map(|(s, _)| AlignedFrame {
                    timestamp: s.timestamp,
                    samples: vec![s],
                }),
        );
    }

    frames.extend(unaligned);
    frames.sort_by_key(|f| (f.timestamp, f.samples.first().map(|s| s.sensor_id)));
    frames
}

#[cfg(test)]
mod tests {
    use crate::buffer::Session;
    use crate::types::{Quaternion, Sample, SensorId, SessionId};
    use jumpsense_common::Timestamp;
    use std::time::Duration;

    fn sample(sensor: u32, micros: u64) -> Sample {
        Sample::new(
            Timestamp::from_micros(micros),
            SensorId(sensor),
            [0.0, 0.0, 9.81],
            [0.0; 3],
            Quaternion::IDENTITY,
        )
    }

    fn two_sensor_session() -> Session {
        Session::from_samples(
            SessionId::new(),
            vec![
                sample(0, 0),
                sample(0, 16_667),
                sample(0, 33_333),
                sample(1, 2_000),
                sample(1, 18_000),
                sample(1, 90_000),
            ],
        )
    }

    #[test]
    fn test_merged_view_is_time_ordered_and_restartable() {
        let session = two_sensor_session();

        let first: Vec<u64> = session.merged_view().map(|s| s.timestamp.as_micros()).collect();
        assert_eq!(first, vec![0, 2_000, 16_667, 18_000, 33_333, 90_000]);

        let second: Vec<u64> = session.merged_view().map(|s| s.timestamp.as_micros()).collect();
        assert_eq!(first, second);
        assert_eq!(session.merged_view().len(), 6);
    }

    #[test]
    fn test_merged_view_breaks_ties_by_sensor() {
        let session = Session::from_samples(SessionId::new(), vec![sample(2, 10), sample(1, 10)]);
        let sensors: Vec<SensorId> = session.merged_view().map(|s| s.sensor_id).collect();
        assert_eq!(sensors, vec![SensorId(1), SensorId(2)]);
    }

    #[test]
    fn test_align_within_tolerance() {
        let session = two_sensor_session();
        let frames = session.align(Duration::from_micros(16_667));

        // Two reference samples find partners, the third stays alone, and
        // the far-away sensor-1 sample becomes its own frame.
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].samples.len(), 2);
        assert_eq!(frames[1].samples.len(), 2);
        assert!(frames[2].is_unaligned());
        assert!(frames[3].is_unaligned());
        assert_eq!(frames[3].timestamp.as_micros(), 90_000);

        let total: usize = frames.iter().map(|f| f.samples.len()).sum();
        assert_eq!(total, session.total_samples());
    }

    #[test]
    fn test_align_zero_tolerance_leaves_everything_unaligned() {
        let session = two_sensor_session();
        let frames = session.align(Duration::ZERO);
        assert_eq!(frames.len(), 6);
        assert!(frames.iter().all(|f| f.is_unaligned()));
    }

    #[test]
    fn test_nominal_period() {
        assert_eq!(super::nominal_period(100.0), Duration::from_millis(10));
        assert_eq!(super::nominal_period(0.0), Duration::ZERO);
    }
}
