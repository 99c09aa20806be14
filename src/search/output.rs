#![forbid(unsafe_code)]

//! Destinations for matched records.

use std::io::Write;

use serde::Serialize;

use crate::error::Result;

/// One matched record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MatchedRecord {
    /// Archive the record came from.
    pub archive_id: String,
    /// Archive-wide record ordinal.
    pub log_event_index: u64,
    /// Authoritative timestamp in epoch milliseconds, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Original record text, or the projected JSON object.
    pub message: String,
}

/// Push-only receiver of search results.
pub trait OutputSink {
    /// Accepts one matched record.
    fn emit(&mut self, record: MatchedRecord) -> Result<()>;

    /// Called once after the scan of an archive completes.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Keeps every result in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    records: Vec<MatchedRecord>,
}

impl CollectingSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records collected so far.
    pub fn records(&self) -> &[MatchedRecord] {
        &self.records
    }

    /// Record ordinals in emission order.
    pub fn indices(&self) -> Vec<u64> {
        self.records.iter().map(|r| r.log_event_index).collect()
    }

    /// Consumes the sink, returning its records.
    pub fn into_records(self) -> Vec<MatchedRecord> {
        self.records
    }
}

impl OutputSink for CollectingSink {
    fn emit(&mut self, record: MatchedRecord) -> Result<()> {
        self.records.push(record);
        Ok(())
    }
}

/// Line format written by [`NdjsonSink`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// The message alone.
    #[default]
    Text,
    /// The whole [`MatchedRecord`] as one JSON object.
    Json,
}

/// Writes one line per result.
pub struct NdjsonSink<W: Write> {
    writer: W,
    format: OutputFormat,
}

impl<W: Write> NdjsonSink<W> {
    /// Sink writing `format` lines to `writer`.
    pub fn new(writer: W, format: OutputFormat) -> Self {
        Self { writer, format }
    }

    /// Returns the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> OutputSink for NdjsonSink<W> {
    fn emit(&mut self, record: MatchedRecord) -> Result<()> {
        match self.format {
            OutputFormat::Text => self.writer.write_all(record.message.as_bytes())?,
            OutputFormat::Json => serde_json::to_writer(&mut self.writer, &record)?,
        }
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
