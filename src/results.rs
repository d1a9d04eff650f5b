//! Append-only result streams.
//!
//! Records are line-delimited JSON objects carrying `schema`, `ts` (UTC),
//! `test`, `step`, and the payload fields merged at the top level. Records
//! are never mutated after write; consumers must tolerate unknown fields.
//!
//! Two channels exist per run: the **log** channel receives one record per
//! executed call/measure/transform/calibration action (the full audit
//! trail), while the **curated** channel receives only records the sequence
//! emits explicitly via `results_update` and is the stream downstream
//! tooling consumes.

use chrono::Utc;
use serde_json::{Map, Value};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::error;

use crate::error::Result;

/// Result record schema version.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Current UTC time as `%Y-%m-%dT%H:%M:%SZ`.
pub fn utc_stamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Structured record sink for one run.
///
/// `write_result` defaults to the log channel so single-stream writers need
/// only implement `write_point`. `snapshot`/`reset` are an optional
/// capability used by the `plot_reset` action; the defaults make it a
/// no-op.
pub trait ResultWriter {
    /// Append one record to the log channel.
    fn write_point(&mut self, test: &str, step: &str, payload: Map<String, Value>) -> Result<()>;

    /// Append one record to the curated channel.
    fn write_result(&mut self, test: &str, step: &str, payload: Map<String, Value>) -> Result<()> {
        self.write_point(test, step, payload)
    }

    /// Capture a snapshot artifact named by `suffix`, if supported.
    fn snapshot(&mut self, _suffix: &str) -> Result<()> {
        Ok(())
    }

    /// Reset any accumulated presentation state, if supported.
    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    /// Flush and finalize the stream(s).
    fn close(&mut self) -> Result<()>;
}

/// Assemble a full record from the envelope fields and payload.
///
/// Payload keys land at the top level and may shadow the envelope.
fn record(test: &str, step: &str, payload: Map<String, Value>) -> Map<String, Value> {
    let mut rec = Map::new();
    rec.insert("schema".to_string(), Value::String(SCHEMA_VERSION.to_string()));
    rec.insert("ts".to_string(), Value::String(utc_stamp()));
    rec.insert("test".to_string(), Value::String(test.to_string()));
    rec.insert("step".to_string(), Value::String(step.to_string()));
    rec.extend(payload);
    rec
}

/// Line-delimited JSON writer over a single append-only file.
#[derive(Debug)]
pub struct JsonlWriter {
    path: PathBuf,
    file: BufWriter<File>,
}

impl JsonlWriter {
    /// Open `path` for appending, creating it (and parent directories) as
    /// needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: BufWriter::new(file),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultWriter for JsonlWriter {
    fn write_point(&mut self, test: &str, step: &str, payload: Map<String, Value>) -> Result<()> {
        let rec = record(test, step, payload);
        serde_json::to_writer(&mut self.file, &Value::Object(rec))?;
        self.file.write_all(b"\n")?;
        // Flush per record: a crashed run keeps everything written so far.
        self.file.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

/// Fans records out to a log stream and a curated results stream.
#[derive(Debug)]
pub struct CompositeWriter {
    log: JsonlWriter,
    curated: JsonlWriter,
}

impl CompositeWriter {
    /// Open both channels inside `out_dir` (`log.jsonl`, `results.jsonl`).
    pub fn open(out_dir: &Path) -> Result<Self> {
        Ok(Self {
            log: JsonlWriter::open(out_dir.join("log.jsonl"))?,
            curated: JsonlWriter::open(out_dir.join("results.jsonl"))?,
        })
    }
}

impl ResultWriter for CompositeWriter {
    fn write_point(&mut self, test: &str, step: &str, payload: Map<String, Value>) -> Result<()> {
        self.log.write_point(test, step, payload)
    }

    fn write_result(&mut self, test: &str, step: &str, payload: Map<String, Value>) -> Result<()> {
        self.curated.write_point(test, step, payload)
    }

    /// Close the curated channel first so any terminal snapshot capability
    /// gets its chance, then the log channel. Close-time errors are logged,
    /// not propagated.
    fn close(&mut self) -> Result<()> {
        if let Err(err) = self.curated.close() {
            error!(path = %self.curated.path().display(), %err, "failed to close curated stream");
        }
        if let Err(err) = self.log.close() {
            error!(path = %self.log.path().display(), %err, "failed to close log stream");
        }
        Ok(())
    }
}
