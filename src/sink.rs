//! Append-only CSV log of EEG readings.
//!
//! Each reading becomes one line: the wall-clock time at which it was
//! written (ISO-8601, UTC, millisecond precision) followed by its samples.
//! The file has no header row and is never rotated.
//!
//! ```text
//! 2026-10-18T09:41:07.512Z,-12.6953125,3.41796875,...
//! ```

use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info};

use crate::comm::EegReading;
use crate::error::{Error, Result};

/// Default log file, relative to the working directory.
pub const DEFAULT_OUTPUT: &str = "eeg_data.csv";

/// Formats one log record. An empty sample list still yields the separator
/// after the timestamp (`"<timestamp>,\n"`).
pub fn format_record(timestamp: DateTime<Utc>, samples: &[f64]) -> String {
    let mut line = timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
    line.push(',');
    let joined = samples
        .iter()
        .map(f64::to_string)
        .collect::<Vec<_>>()
        .join(",");
    line.push_str(&joined);
    line.push('\n');
    line
}

/// Owns the output handle; the file is flushed and closed when the sink is
/// dropped.
pub struct CsvSink<W: Write> {
    writer: W,
    records: u64,
}

impl CsvSink<LineWriter<File>> {
    /// Opens `path` for appending, creating it if needed. Every record
    /// reaches the OS as soon as its newline is written.
    pub fn append(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| Error::Open {
                path: path.to_path_buf(),
                source,
            })?;
        info!(path = %path.display(), "appending readings");
        Ok(Self::new(LineWriter::new(file)))
    }
}

impl<W: Write> CsvSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, records: 0 }
    }

    /// Appends one record for `reading`, stamped with the current time.
    pub fn write_reading(&mut self, reading: &EegReading) -> Result<()> {
        self.write_samples(Utc::now(), &reading.samples)
    }

    pub fn write_samples(&mut self, timestamp: DateTime<Utc>, samples: &[f64]) -> Result<()> {
        let record = format_record(timestamp, samples);
        self.writer
            .write_all(record.as_bytes())
            .map_err(Error::Write)?;
        self.records += 1;
        Ok(())
    }

    /// Number of records written through this sink.
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn flush(&mut self) -> Result<()> {
        debug!(records = self.records, "flushing sink");
        self.writer.flush().map_err(Error::Write)
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
