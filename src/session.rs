//! Bench configuration and per-run session plumbing.
//!
//! A bench is a named equipment configuration described by a TOML file: the
//! bench name selects the calibration namespace, and the `[instruments]`
//! table declares every instrument handle the sequencer may drive. The
//! session ties one run together: output directory, the two result
//! streams, the calibration store, and the run manifest.

use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::calibration::CalibrationStore;
use crate::error::{Error, Result};
use crate::results::{utc_stamp, CompositeWriter, ResultWriter, SCHEMA_VERSION};

/// Per-instrument entry in the bench `[instruments]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentConfig {
    /// Driver selector (e.g. `"sim"`)
    pub kind: String,
    /// Driver-specific settings, passed through untouched
    #[serde(flatten)]
    pub settings: BTreeMap<String, toml::Value>,
}

/// A named equipment configuration.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub name: String,
    pub instruments: BTreeMap<String, InstrumentConfig>,
    /// Per-instrument I/O timeouts in seconds, for drivers that want them
    pub timeouts: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct BenchDoc {
    #[serde(default)]
    bench: BenchSection,
    #[serde(default)]
    instruments: BTreeMap<String, InstrumentConfig>,
    #[serde(default)]
    timeouts: BTreeMap<String, f64>,
}

#[derive(Debug, Default, Deserialize)]
struct BenchSection {
    name: Option<String>,
}

impl BenchConfig {
    /// Load a bench description from TOML.
    pub fn from_toml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|err| Error::config(format!("cannot read {}: {err}", path.display())))?;
        let doc: BenchDoc = toml::from_str(&raw)
            .map_err(|err| Error::config(format!("invalid bench config {}: {err}", path.display())))?;
        Ok(Self {
            name: doc.bench.name.unwrap_or_else(|| "bench_default".to_string()),
            instruments: doc.instruments,
            timeouts: doc.timeouts,
        })
    }
}

/// One run's durable surroundings: output streams, calibration store, and
/// metadata for the manifest.
#[derive(Debug)]
pub struct Session {
    pub bench: BenchConfig,
    pub out_dir: PathBuf,
    pub writer: CompositeWriter,
    pub cal_store: CalibrationStore,
    meta: Map<String, Value>,
}

impl Session {
    /// Create the output directory, open both result streams, and open the
    /// calibration store at `<cal_dir>/<bench>.json`.
    pub fn new(bench: BenchConfig, out_dir: &Path, cal_dir: &Path) -> Result<Self> {
        fs::create_dir_all(out_dir)?;
        let writer = CompositeWriter::open(out_dir)?;
        let cal_path = cal_dir.join(format!("{}.json", bench.name));
        let cal_store = CalibrationStore::open(cal_path, Some(&bench.name))?;

        let mut meta = Map::new();
        meta.insert("schema".to_string(), Value::String(SCHEMA_VERSION.to_string()));
        meta.insert("bench".to_string(), Value::String(bench.name.clone()));
        meta.insert("ts".to_string(), Value::String(utc_stamp()));

        Ok(Self {
            bench,
            out_dir: out_dir.to_path_buf(),
            writer,
            cal_store,
            meta,
        })
    }

    /// Write `manifest.json`: session metadata plus `extra`, stamped with a
    /// truncated SHA-256 of the (key-sorted) content.
    pub fn record_manifest(&self, extra: Map<String, Value>) -> Result<()> {
        let mut manifest = self.meta.clone();
        manifest.extend(extra);

        let canonical = serde_json::to_string(&manifest)?;
        let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
        manifest.insert("hash".to_string(), Value::String(digest[..12].to_string()));

        let payload = format!("{}\n", serde_json::to_string_pretty(&manifest)?);
        fs::write(self.out_dir.join("manifest.json"), payload)?;
        Ok(())
    }

    /// Finalize both result streams.
    pub fn close(&mut self) -> Result<()> {
        self.writer.close()
    }
}
