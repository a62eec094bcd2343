//! Recording readers
//!
//! Turns exported sensor recordings into closed [`Session`]s. Two formats:
//!
//! - Movella DOT CSV exports (`SampleTimeFine`, `Acc_*`, `Gyr_*`, optional
//!   `Quat_*` and `SensorId` columns). The 32-bit `SampleTimeFine` counter is
//!   unwrapped per sensor.
//! - JSON lines, one serialized [`Sample`] per line.
//!
//! Rows that fail to parse are skipped and counted; only an unreadable file
//! or a missing required column fails the whole recording.

use crate::buffer::{SampleBuffer, Session};
use crate::types::{Quaternion, Sample, SensorId, SessionId};
use jumpsense_common::time::TimestampUnwrapper;
use jumpsense_common::Timestamp;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

const REQUIRED_COLUMNS: [&str; 7] = ["SampleTimeFine", "Acc_X", "Acc_Y", "Acc_Z", "Gyr_X", "Gyr_Y", "Gyr_Z"];
const QUATERNION_COLUMNS: [&str; 4] = ["Quat_W", "Quat_X", "Quat_Y", "Quat_Z"];
const SENSOR_ID_COLUMN: &str = "SensorId";

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("Cannot read recording {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Recording is missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("Unrecognised recording format: {}", .0.display())]
    UnknownFormat(PathBuf),
}

/// Input encodings understood by [`RecordingReader`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingFormat {
    Csv,
    JsonLines,
}

impl RecordingFormat {
    /// Guess from the file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "csv" => Some(RecordingFormat::Csv),
            "jsonl" | "ndjson" => Some(RecordingFormat::JsonLines),
            _ => None,
        }
    }
}

/// Per-recording read options
#[derive(Debug, Clone, Default)]
pub struct RecordingOptions {
    /// Id for the resulting session (random when `None`)
    pub session_id: Option<SessionId>,
    /// Sensor id for rows without a `SensorId` column
    pub sensor_id: SensorId,
    /// Rows stamped before this raw sensor time are discarded
    pub sync_timestamp: Option<u64>,
    /// Overrides the extension-based format guess
    pub format: Option<RecordingFormat>,
}

/// What happened while reading a recording
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordingReport {
    pub rows_read: u64,
    pub rows_malformed: u64,
    /// Rows recorded before the synchronisation timestamp
    pub rows_before_sync: u64,
    pub counter_wraps: u64,
    /// Samples rejected by the buffer, per sensor
    pub samples_dropped: BTreeMap<SensorId, u64>,
}

#[derive(Default)]
struct SensorClock {
    unwrapper: TimestampUnwrapper,
    synced: bool,
}

/// Column positions of a CSV header
struct CsvColumns {
    required: [usize; 7],
    quaternion: Option<[usize; 4]>,
    sensor_id: Option<usize>,
}

impl CsvColumns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, RecordingError> {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);

        let mut required = [0; 7];
        for (slot, name) in required.iter_mut().zip(REQUIRED_COLUMNS) {
            *slot = find(name).ok_or(RecordingError::MissingColumn(name))?;
        }
        let quaternion = match QUATERNION_COLUMNS.map(find) {
            [Some(w), Some(x), Some(y), Some(z)] => Some([w, x, y, z]),
            _ => None,
        };
        Ok(Self {
            required,
            quaternion,
            sensor_id: find(SENSOR_ID_COLUMN),
        })
    }
}

/// A parsed CSV row before timestamp unwrapping
struct CsvRow {
    raw_time: u32,
    sensor_id: SensorId,
    acc: [f64; 3],
    gyr: [f64; 3],
    quat: Quaternion,
}

fn field<T: std::str::FromStr>(record: &csv::StringRecord, index: usize) -> Option<T> {
    record.get(index)?.trim().parse().ok()
}

impl CsvColumns {
    fn parse(&self, record: &csv::StringRecord, default_sensor: SensorId) -> Option<CsvRow> {
        let [t, ax, ay, az, gx, gy, gz] = self.required;
        // Some exports write the counter as a float
        let raw_time = field::<u32>(record, t).or_else(|| {
            field::<f64>(record, t)
                .filter(|v| *v >= 0.0 && *v <= u32::MAX as f64)
                .map(|v| v as u32)
        })?;
        let quat = match self.quaternion {
            Some([w, x, y, z]) => Quaternion::new(field(record, w)?, field(record, x)?, field(record, y)?, field(record, z)?),
            None => Quaternion::IDENTITY,
        };
        let sensor_id = match self.sensor_id {
            Some(i) => SensorId(field(record, i)?),
            None => default_sensor,
        };
        Some(CsvRow {
            raw_time,
            sensor_id,
            acc: [field(record, ax)?, field(record, ay)?, field(record, az)?],
            gyr: [field(record, gx)?, field(record, gy)?, field(record, gz)?],
            quat,
        })
    }
}

/// Reads recordings into sessions
#[derive(Debug, Clone, Default)]
pub struct RecordingReader {
    options: RecordingOptions,
}

impl RecordingReader {
    pub fn new(options: RecordingOptions) -> Self {
        Self { options }
    }

    /// Read a recording file, choosing the format from options or extension
    pub fn read_path(&self, path: &Path) -> Result<(Session, RecordingReport), RecordingError> {
        let format = self
            .options
            .format
            .or_else(|| RecordingFormat::from_path(path))
            .ok_or_else(|| RecordingError::UnknownFormat(path.to_path_buf()))?;
        let file = File::open(path).map_err(|source| RecordingError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::info!(path = %path.display(), ?format, "Reading recording");
        let result = match format {
            RecordingFormat::Csv => self.read_csv(file),
            RecordingFormat::JsonLines => self.read_json_lines(BufReader::new(file)),
        };
        if let Err(RecordingError::Csv(e)) = &result {
            if let Some(pos) = e.position() {
                tracing::error!(path = %path.display(), line = pos.line(), error = %e, "Recording unreadable");
            }
        }
        result
    }

    fn new_buffer(&self) -> SampleBuffer {
        SampleBuffer::new(self.options.session_id.unwrap_or_default())
    }

    /// Read a Movella DOT style CSV export
    pub fn read_csv<R: Read>(&self, reader: R) -> Result<(Session, RecordingReport), RecordingError> {
        let mut csv = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let columns = CsvColumns::from_headers(csv.headers()?)?;

        let buffer = self.new_buffer();
        let mut report = RecordingReport::default();
        let mut clocks: BTreeMap<SensorId, SensorClock> = BTreeMap::new();

        for result in csv.records() {
            report.rows_read += 1;
            let row = match result.ok().and_then(|r| columns.parse(&r, self.options.sensor_id)) {
                Some(row) => row,
                None => {
                    report.rows_malformed += 1;
                    tracing::trace!(row = report.rows_read, "Malformed CSV row skipped");
                    continue;
                }
            };

            let clock = clocks.entry(row.sensor_id).or_default();
            if !clock.synced {
                if self.options.sync_timestamp.is_some_and(|sync| (row.raw_time as u64) < sync) {
                    report.rows_before_sync += 1;
                    continue;
                }
                clock.synced = true;
            }

            let timestamp = clock.unwrapper.unwrap_next(row.raw_time);
            // Rejections are counted by the buffer
            let _ = buffer.ingest(Sample::new(timestamp, row.sensor_id, row.acc, row.gyr, row.quat));
        }

        report.counter_wraps = clocks.values().map(|c| c.unwrapper.wraps()).sum();
        Ok(self.close(buffer, report))
    }

    /// Read JSON lines of [`Sample`] records (timestamps already unwrapped)
    pub fn read_json_lines<R: BufRead>(&self, reader: R) -> Result<(Session, RecordingReport), RecordingError> {
        let buffer = self.new_buffer();
        let mut report = RecordingReport::default();

        for line in reader.lines() {
            let line = line.map_err(|source| RecordingError::Io {
                path: PathBuf::from("<input>"),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            report.rows_read += 1;
            let sample: Sample = match serde_json::from_str(&line) {
                Ok(sample) => sample,
                Err(e) => {
                    report.rows_malformed += 1;
                    tracing::trace!(row = report.rows_read, error = %e, "Malformed sample line skipped");
                    continue;
                }
            };
            if self
                .options
                .sync_timestamp
                .is_some_and(|sync| sample.timestamp < Timestamp::from_micros(sync))
            {
                report.rows_before_sync += 1;
                continue;
            }
            let _ = buffer.ingest(sample);
        }

        Ok(self.close(buffer, report))
    }

    fn close(&self, buffer: SampleBuffer, mut report: RecordingReport) -> (Session, RecordingReport) {
        let session = buffer.finish();
        report.samples_dropped = session
            .streams()
            .filter(|s| s.dropped() > 0)
            .map(|s| (s.sensor_id(), s.dropped()))
            .collect();

        if report.rows_malformed > 0 || !report.samples_dropped.is_empty() {
            tracing::warn!(
                session_id = %session.id(),
                rows = report.rows_read,
                malformed = report.rows_malformed,
                dropped = session.total_dropped(),
                "Recording contained unusable rows"
            );
        }
        (session, report)
    }
}
