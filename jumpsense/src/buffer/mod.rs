//! Sample buffer: per-sensor ingestion into an open recording session
//!
//! Each sensor stream sits behind its own lock, so ingestion from one sensor
//! never waits on another. Appending is a single push of a complete `Sample`
//! under the stream's write lock; readers therefore see either the whole
//! sample or none of it.
//!
//! Out-of-order and non-finite samples are rejected with an [`IngestError`]
//! and counted as dropped. They never poison the stream: the next in-order
//! sample is accepted normally.

mod merge;
mod session;

pub use merge::{nominal_period, AlignedFrame, MergedView};
pub use session::{SensorStream, Session};

use crate::types::{Sample, SensorId, SessionId};
use jumpsense_common::Timestamp;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Ingestion errors (recoverable: the sample is dropped and counted)
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    /// Timestamp not strictly after the sensor's previous sample
    #[error("Out-of-order sample from {sensor_id}: {timestamp} <= last {last_timestamp}")]
    OutOfOrderSample {
        sensor_id: SensorId,
        timestamp: Timestamp,
        last_timestamp: Timestamp,
    },

    /// NaN or infinite reading
    #[error("Non-finite sample from {sensor_id} at {timestamp}")]
    NonFiniteSample {
        sensor_id: SensorId,
        timestamp: Timestamp,
    },
}

/// Outcome counts of a bulk ingestion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub accepted: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct StreamSlot {
    samples: RwLock<Vec<Sample>>,
    dropped: AtomicU64,
}

/// Open recording: accepts samples until [`SampleBuffer::finish`]
#[derive(Debug)]
pub struct SampleBuffer {
    session_id: SessionId,
    streams: RwLock<BTreeMap<SensorId, Arc<StreamSlot>>>,
}

// Push is the only mutation under these locks, so a poisoned lock still
// guards consistent data.
fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl SampleBuffer {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            streams: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    fn slot(&self, sensor_id: SensorId) -> Arc<StreamSlot> {
        if let Some(slot) = read_lock(&self.streams).get(&sensor_id) {
            return Arc::clone(slot);
        }
        let mut streams = write_lock(&self.streams);
        Arc::clone(streams.entry(sensor_id).or_insert_with(|| {
            tracing::debug!(session_id = %self.session_id, %sensor_id, "Registered sensor stream");
            Arc::new(StreamSlot::default())
        }))
    }

    /// Append a sample to its sensor's stream
    pub fn ingest(&self, sample: Sample) -> Result<(), IngestError> {
        let slot = self.slot(sample.sensor_id);

        if !sample.is_finite() {
            slot.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(IngestError::NonFiniteSample {
                sensor_id: sample.sensor_id,
                timestamp: sample.timestamp,
            });
        }

        let mut samples = write_lock(&slot.samples);
        if let Some(last) = samples.last() {
            if sample.timestamp <= last.timestamp {
                slot.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(IngestError::OutOfOrderSample {
                    sensor_id: sample.sensor_id,
                    timestamp: sample.timestamp,
                    last_timestamp: last.timestamp,
                });
            }
        }
        samples.push(sample);
        Ok(())
    }

    /// Ingest a sequence, logging and counting rejected samples
    pub fn ingest_all<I>(&self, samples: I) -> IngestSummary
    where
        I: IntoIterator<Item = Sample>,
    {
        let mut summary = IngestSummary::default();
        for sample in samples {
            match self.ingest(sample) {
                Ok(()) => summary.accepted += 1,
                Err(e) => {
                    tracing::trace!(session_id = %self.session_id, error = %e, "Dropped sample");
                    summary.dropped += 1;
                }
            }
        }
        if summary.dropped > 0 {
            tracing::debug!(
                session_id = %self.session_id,
                accepted = summary.accepted,
                dropped = summary.dropped,
                "Bulk ingestion dropped samples"
            );
        }
        summary
    }

    /// Sensors that have produced at least one sample (accepted or dropped)
    pub fn sensor_ids(&self) -> Vec<SensorId> {
        read_lock(&self.streams).keys().copied().collect()
    }

    /// Number of accepted samples for a sensor
    pub fn len(&self, sensor_id: SensorId) -> usize {
        read_lock(&self.streams)
            .get(&sensor_id)
            .map(|slot| read_lock(&slot.samples).len())
            .unwrap_or(0)
    }

    /// Number of dropped samples for a sensor
    pub fn dropped(&self, sensor_id: SensorId) -> u64 {
        read_lock(&self.streams)
            .get(&sensor_id)
            .map(|slot| slot.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Copy of everything published so far, as a read-only session
    pub fn snapshot(&self) -> Session {
        let streams = read_lock(&self.streams)
            .iter()
            .map(|(&sensor_id, slot)| {
                let samples = read_lock(&slot.samples).clone();
                let dropped = slot.dropped.load(Ordering::Relaxed);
                (sensor_id, SensorStream::new(sensor_id, samples, dropped))
            })
            .collect();
        Session::from_streams(self.session_id, streams)
    }

    /// Close the recording and hand the samples over to a session
    pub fn finish(self) -> Session {
        let session_id = self.session_id;
        let streams = self
            .streams
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .map(|(sensor_id, slot)| {
                let stream = match Arc::try_unwrap(slot) {
                    Ok(slot) => SensorStream::new(
                        sensor_id,
                        slot.samples.into_inner().unwrap_or_else(PoisonError::into_inner),
                        slot.dropped.into_inner(),
                    ),
                    // Only reachable if a clone escaped; fall back to copying
                    Err(shared) => SensorStream::new(
                        sensor_id,
                        read_lock(&shared.samples).clone(),
                        shared.dropped.load(Ordering::Relaxed),
                    ),
                };
                (sensor_id, stream)
            })
            .collect();

        let session = Session::from_streams(session_id, streams);
        tracing::info!(
            session_id = %session_id,
            sensors = session.sensor_count(),
            samples = session.total_samples(),
            dropped = session.total_dropped(),
            "Recording closed"
        );
        session
    }
}
