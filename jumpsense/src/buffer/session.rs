//! Closed recording sessions

use super::merge::{align_streams, AlignedFrame, MergedView};
use super::SampleBuffer;
use crate::types::{Sample, SensorId, SessionId};
use jumpsense_common::Timestamp;
use std::collections::BTreeMap;
use std::time::Duration;

/// Ordered samples of one sensor within a session
#[derive(Debug, Clone, PartialEq)]
pub struct SensorStream {
    sensor_id: SensorId,
    samples: Vec<Sample>,
    dropped: u64,
}

impl SensorStream {
    pub(crate) fn new(sensor_id: SensorId, samples: Vec<Sample>, dropped: u64) -> Self {
        Self {
            sensor_id,
            samples,
            dropped,
        }
    }

    pub fn sensor_id(&self) -> SensorId {
        self.sensor_id
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples rejected during ingestion
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn first_timestamp(&self) -> Option<Timestamp> {
        self.samples.first().map(|s| s.timestamp)
    }

    /// Seconds between first and last sample
    pub fn duration_seconds(&self) -> f64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => last.timestamp.seconds_since(first.timestamp),
            _ => 0.0,
        }
    }
}

/// A closed, read-only recording of one or more sensors
///
/// Owns its samples exclusively. Segments refer back into its streams by
/// index.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    id: SessionId,
    streams: BTreeMap<SensorId, SensorStream>,
}

impl Session {
    pub(crate) fn from_streams(id: SessionId, streams: BTreeMap<SensorId, SensorStream>) -> Self {
        Self { id, streams }
    }

    /// Build a session by ingesting samples in the given order
    ///
    /// Out-of-order and non-finite samples are dropped and counted.
    pub fn from_samples<I>(id: SessionId, samples: I) -> Self
    where
        I: IntoIterator<Item = Sample>,
    {
        let buffer = SampleBuffer::new(id);
        buffer.ingest_all(samples);
        buffer.finish()
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn sensor_ids(&self) -> impl Iterator<Item = SensorId> + '_ {
        self.streams.keys().copied()
    }

    pub fn sensor_count(&self) -> usize {
        self.streams.len()
    }

    /// Streams ordered by sensor id
    pub fn streams(&self) -> impl Iterator<Item = &SensorStream> + '_ {
        self.streams.values()
    }

    pub fn stream(&self, sensor_id: SensorId) -> Option<&SensorStream> {
        self.streams.get(&sensor_id)
    }

    pub fn total_samples(&self) -> usize {
        self.streams.values().map(SensorStream::len).sum()
    }

    pub fn total_dropped(&self) -> u64 {
        self.streams.values().map(SensorStream::dropped).sum()
    }

    /// Earliest timestamp across all sensors (session time origin)
    pub fn start_timestamp(&self) -> Option<Timestamp> {
        self.streams.values().filter_map(SensorStream::first_timestamp).min()
    }

    /// Time-ordered view over every sensor's samples
    ///
    /// Lazy and finite; calling again restarts from the beginning.
    pub fn merged_view(&self) -> MergedView<'_> {
        MergedView::new(self.streams.values().map(SensorStream::samples).collect())
    }

    /// Group samples of different sensors by nearest timestamp
    ///
    /// The lowest sensor id is the reference clock. Samples without a
    /// partner within `tolerance` come back as single-sensor frames.
    pub fn align(&self, tolerance: Duration) -> Vec<AlignedFrame<'_>> {
        let streams: Vec<&[Sample]> = self.streams.values().map(SensorStream::samples).collect();
        align_streams(&streams, tolerance)
    }
}
