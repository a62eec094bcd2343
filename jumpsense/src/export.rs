//! Output sinks for labeled jump records
//!
//! Storage is somebody else's concern; the pipeline only needs something it
//! can hand [`JumpRecord`]s to.

use crate::pipeline::JumpRecord;
use jumpsense_common::Result;
use std::io::Write;

/// Destination for processed jump records
pub trait JumpSink {
    fn write(&mut self, record: &JumpRecord) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    /// Write every record, then flush
    fn write_all(&mut self, records: &[JumpRecord]) -> Result<()> {
        for record in records {
            self.write(record)?;
        }
        self.flush()
    }
}

/// One JSON object per line
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    writer: W,
    written: usize,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Records written so far
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> JumpSink for JsonLinesSink<W> {
    fn write(&mut self, record: &JumpRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        tracing::debug!(records = self.written, "Jump records flushed");
        Ok(())
    }
}

/// Keeps records in memory
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Vec<JumpRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[JumpRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<JumpRecord> {
        self.records
    }
}

impl JumpSink for MemorySink {
    fn write(&mut self, record: &JumpRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ReviewOutcome, ReviewReason};
    use crate::segmenter::SegmentFlags;
    use crate::types::{SensorId, SessionId};

    fn record(start: usize) -> JumpRecord {
        JumpRecord {
            session_id: SessionId::new(),
            sensor_id: SensorId(2),
            start_index: start,
            end_index: start + 30,
            start_s: 1.5,
            end_s: 2.0,
            video_time: "00:02".to_string(),
            air_time_s: 0.4,
            features: None,
            jump_type: None,
            success: None,
            measured_revolutions: None,
            declared_revolutions: None,
            flags: SegmentFlags::TRUNCATED,
            combination: true,
            review: ReviewOutcome::NeedsReview(vec![ReviewReason::TruncatedSegment]),
        }
    }

    #[test]
    fn test_json_lines_one_record_per_line() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.write_all(&[record(0), record(100)]).unwrap();
        assert_eq!(sink.written(), 2);

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: JumpRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.start_index, 100);
        assert!(parsed.review.needs_review());
    }

    #[test]
    fn test_memory_sink_collects() {
        let mut sink = MemorySink::new();
        sink.write(&record(5)).unwrap();
        assert_eq!(sink.records().len(), 1);
        assert_eq!(sink.into_records()[0].start_index, 5);
    }
}
