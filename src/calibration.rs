//! Durable calibration constants.
//!
//! One JSON document on disk holds the calibration constants for every
//! bench, bucketed by bench name, plus an append-only history of prior
//! values under a reserved top-level key. Overwriting a constant always
//! archives the old value first; history is only ever dropped by the
//! size-budget trimming in [`CalibrationStore::save`], oldest entries
//! first.
//!
//! Saves are atomic: the document is written to a sibling `.tmp` path and
//! renamed over the target.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::results::utc_stamp;

/// Reserved top-level key holding per-bench value history.
const HISTORY_KEY: &str = "__history__";
/// History bucket used when the store has no bench name.
const GLOBAL_BUCKET: &str = "__global__";
/// Default cap on the serialized document size.
const DEFAULT_SIZE_BUDGET: usize = 1024 * 1024;

/// One archived calibration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// ISO-8601 UTC timestamp of when the value was replaced
    pub ts: String,
    /// The replaced value
    pub value: Value,
}

/// Persistence for calibration constants, namespaced per bench.
#[derive(Debug)]
pub struct CalibrationStore {
    path: PathBuf,
    bench: Option<String>,
    autosave: bool,
    size_budget: usize,
    data: Map<String, Value>,
}

impl CalibrationStore {
    /// Open (or create) the store at `path`, scoped to `bench`.
    ///
    /// An absent or empty file yields an empty store. Malformed content is
    /// rejected loudly rather than silently reset.
    pub fn open(path: impl Into<PathBuf>, bench: Option<&str>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut store = Self {
            path,
            bench: bench.map(str::to_string),
            autosave: false,
            size_budget: DEFAULT_SIZE_BUDGET,
            data: Map::new(),
        };
        store.load()?;
        Ok(store)
    }

    /// Flush to disk on every `set`/`delete` when enabled.
    pub fn set_autosave(&mut self, on: bool) {
        self.autosave = on;
    }

    /// Override the serialized-size cap (mainly for tests).
    pub fn set_size_budget(&mut self, bytes: usize) {
        self.size_budget = bytes;
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&mut self) -> Result<()> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                self.data = Map::new();
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        if raw.trim().is_empty() {
            self.data = Map::new();
            return Ok(());
        }

        let parsed: Value = serde_json::from_str(&raw).map_err(|err| {
            Error::store(format!("{} is not valid JSON: {err}", self.path.display()))
        })?;
        let Value::Object(data) = parsed else {
            return Err(Error::store(format!(
                "{} must contain a JSON object",
                self.path.display()
            )));
        };

        if let Some(bench) = &self.bench
            && let Some(bucket) = data.get(bench)
            && !bucket.is_object()
        {
            return Err(Error::store(format!(
                "calibration bucket for bench '{bench}' must be a JSON object"
            )));
        }
        if let Some(history) = data.get(HISTORY_KEY)
            && !history.is_object()
        {
            return Err(Error::store("calibration history storage corrupted; expected an object"));
        }

        self.data = data;
        Ok(())
    }

    /// Persist to disk, trimming the oldest history entries (across all
    /// benches and names) until the serialized document fits the budget.
    pub fn save(&mut self) -> Result<()> {
        let payload = self.trimmed_payload()?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn trimmed_payload(&mut self) -> Result<String> {
        loop {
            let payload = format!("{}\n", serde_json::to_string_pretty(&self.data)?);
            if payload.len() <= self.size_budget || !self.drop_oldest_history_entry() {
                return Ok(payload);
            }
        }
    }

    /// Remove the single oldest history entry anywhere in the document.
    /// Returns false when no history remains. ISO-8601 UTC stamps compare
    /// correctly as strings. Entries within one list are chronological, so
    /// only list heads need comparing.
    fn drop_oldest_history_entry(&mut self) -> bool {
        let Some(root) = self.data.get_mut(HISTORY_KEY).and_then(Value::as_object_mut) else {
            return false;
        };

        let mut oldest: Option<(String, String, String)> = None;
        for (bucket_name, bucket) in root.iter() {
            let Some(bucket) = bucket.as_object() else { continue };
            for (name, entries) in bucket {
                let Some(head) = entries.as_array().and_then(|list| list.first()) else {
                    continue;
                };
                let ts = head.get("ts").and_then(Value::as_str).unwrap_or("");
                if oldest.as_ref().is_none_or(|(_, _, best)| ts < best.as_str()) {
                    oldest = Some((bucket_name.clone(), name.clone(), ts.to_string()));
                }
            }
        }

        let Some((bucket_name, name, ts)) = oldest else { return false };
        debug!(bench = %bucket_name, name = %name, ts = %ts, "trimming calibration history entry");

        let Some(bucket) = root.get_mut(&bucket_name).and_then(Value::as_object_mut) else {
            return false;
        };
        if let Some(list) = bucket.get_mut(&name).and_then(Value::as_array_mut) {
            if !list.is_empty() {
                list.remove(0);
            }
            if list.is_empty() {
                bucket.remove(&name);
            }
        }
        if bucket.is_empty() {
            root.remove(&bucket_name);
        }
        true
    }

    fn bucket(&self) -> Option<&Map<String, Value>> {
        match &self.bench {
            Some(bench) => self.data.get(bench).and_then(Value::as_object),
            None => Some(&self.data),
        }
    }

    fn bucket_mut(&mut self) -> Result<&mut Map<String, Value>> {
        match self.bench.clone() {
            Some(bench) => {
                let slot = self
                    .data
                    .entry(bench.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                slot.as_object_mut().ok_or_else(|| {
                    Error::store(format!(
                        "calibration bucket for bench '{bench}' must be a JSON object"
                    ))
                })
            }
            None => Ok(&mut self.data),
        }
    }

    fn history_bucket_mut(&mut self) -> Result<&mut Map<String, Value>> {
        let key = self.bench.clone().unwrap_or_else(|| GLOBAL_BUCKET.to_string());
        let root = self
            .data
            .entry(HISTORY_KEY.to_string())
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| Error::store("calibration history storage corrupted; expected an object"))?;
        root.entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| Error::store(format!("calibration history bucket '{key}' corrupted")))
    }

    fn append_history(&mut self, name: &str, old_value: Value) -> Result<()> {
        let entry = serde_json::to_value(HistoryEntry {
            ts: utc_stamp(),
            value: old_value,
        })?;
        let bucket = self.history_bucket_mut()?;
        let list = bucket
            .entry(name.to_string())
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .ok_or_else(|| {
                Error::store(format!("calibration history for '{name}' is corrupted; expected a list"))
            })?;
        list.push(entry);
        Ok(())
    }

    /// Fetch a stored constant for the active bench.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.bucket().and_then(|b| b.get(name)).cloned()
    }

    /// Save or update a constant, archiving any previous value first.
    pub fn set(&mut self, name: &str, value: Value) -> Result<()> {
        if let Some(old) = self.bucket().and_then(|b| b.get(name)).cloned() {
            self.append_history(name, old)?;
        }
        self.bucket_mut()?.insert(name.to_string(), value);
        if self.autosave {
            self.save()?;
        }
        Ok(())
    }

    /// Remove a constant if it exists, archiving its value.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let Some(old) = self.bucket().and_then(|b| b.get(name)).cloned() else {
            return Ok(());
        };
        self.append_history(name, old)?;
        self.bucket_mut()?.remove(name);
        if self.autosave {
            self.save()?;
        }
        Ok(())
    }

    /// Prior values for `name`, oldest first.
    pub fn history(&self, name: &str) -> Vec<HistoryEntry> {
        let key = self.bench.as_deref().unwrap_or(GLOBAL_BUCKET);
        self.data
            .get(HISTORY_KEY)
            .and_then(Value::as_object)
            .and_then(|root| root.get(key))
            .and_then(Value::as_object)
            .and_then(|bucket| bucket.get(name))
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Calibration names for the active bench, sorted.
    pub fn names(&self) -> Vec<String> {
        self.bucket()
            .map(|b| b.keys().filter(|k| k.as_str() != HISTORY_KEY).cloned().collect())
            .unwrap_or_default()
    }

    /// Shallow copy of the active bench's constants, for cache seeding.
    pub fn as_dict(&self) -> Map<String, Value> {
        self.bucket()
            .map(|b| {
                b.iter()
                    .filter(|(k, _)| k.as_str() != HISTORY_KEY)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_bench(dir: &TempDir) -> CalibrationStore {
        CalibrationStore::open(dir.path().join("cal.json"), Some("bench_a")).unwrap()
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = open_bench(&dir);
        assert!(store.names().is_empty());
        assert_eq!(store.get("offset"), None);
    }

    #[test]
    fn test_empty_file_is_empty_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cal.json");
        fs::write(&path, "  \n").unwrap();
        let store = CalibrationStore::open(&path, Some("bench_a")).unwrap();
        assert!(store.names().is_empty());
    }

    #[test]
    fn test_non_object_top_level_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cal.json");
        fs::write(&path, "[1, 2, 3]").unwrap();
        let err = CalibrationStore::open(&path, None).unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[test]
    fn test_malformed_bench_bucket_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cal.json");
        fs::write(&path, r#"{"bench_a": 42}"#).unwrap();
        let err = CalibrationStore::open(&path, Some("bench_a")).unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[test]
    fn test_set_archives_previous_value() {
        let dir = TempDir::new().unwrap();
        let mut store = open_bench(&dir);

        store.set("offset", json!(10.0)).unwrap();
        assert!(store.history("offset").is_empty());

        store.set("offset", json!(20.0)).unwrap();
        assert_eq!(store.get("offset"), Some(json!(20.0)));
        let history = store.history("offset");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].value, json!(10.0));
    }

    #[test]
    fn test_delete_archives_value() {
        let dir = TempDir::new().unwrap();
        let mut store = open_bench(&dir);
        store.set("offset", json!(1.0)).unwrap();
        store.delete("offset").unwrap();
        assert_eq!(store.get("offset"), None);
        assert_eq!(store.history("offset").len(), 1);
        // Deleting an absent name is a no-op.
        store.delete("ghost").unwrap();
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cal.json");
        {
            let mut store = CalibrationStore::open(&path, Some("bench_a")).unwrap();
            store.set("offset", json!(10.0)).unwrap();
            store.set("offset", json!({"lo": 1, "hi": 2})).unwrap();
            store.set("gamma", json!([0.1, 0.2])).unwrap();
            store.save().unwrap();
        }
        let store = CalibrationStore::open(&path, Some("bench_a")).unwrap();
        assert_eq!(store.get("offset"), Some(json!({"lo": 1, "hi": 2})));
        assert_eq!(store.get("gamma"), Some(json!([0.1, 0.2])));
        assert_eq!(store.names(), vec!["gamma".to_string(), "offset".to_string()]);
        let history = store.history("offset");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].value, json!(10.0));
    }

    #[test]
    fn test_benches_are_isolated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cal.json");
        {
            let mut store = CalibrationStore::open(&path, Some("bench_a")).unwrap();
            store.set("offset", json!(1.0)).unwrap();
            store.save().unwrap();
        }
        let store_b = CalibrationStore::open(&path, Some("bench_b")).unwrap();
        assert_eq!(store_b.get("offset"), None);
    }

    #[test]
    fn test_size_budget_trims_oldest_history_first() {
        let dir = TempDir::new().unwrap();
        let mut store = open_bench(&dir);
        for i in 0..20 {
            store.set("offset", json!(format!("value-{i:04}"))).unwrap();
        }
        assert_eq!(store.history("offset").len(), 19);

        store.set_size_budget(600);
        store.save().unwrap();

        let history = store.history("offset");
        assert!(history.len() < 19, "history should have been trimmed");
        // Newest entries survive; the current value is untouched.
        assert_eq!(history.last().unwrap().value, json!("value-0018"));
        assert_eq!(store.get("offset"), Some(json!("value-0019")));
    }

    #[test]
    fn test_trim_never_drops_current_values() {
        let dir = TempDir::new().unwrap();
        let mut store = open_bench(&dir);
        store.set("a", json!("x".repeat(200))).unwrap();
        store.set("a", json!("y".repeat(200))).unwrap();
        store.set_size_budget(1);
        store.save().unwrap();
        // Budget is unreachable, but the value map must be intact.
        assert_eq!(store.get("a"), Some(json!("y".repeat(200))));
        assert!(store.history("a").is_empty());
    }

    #[test]
    fn test_autosave_flushes_on_set() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cal.json");
        let mut store = CalibrationStore::open(&path, Some("bench_a")).unwrap();
        store.set_autosave(true);
        store.set("offset", json!(5.0)).unwrap();

        let reopened = CalibrationStore::open(&path, Some("bench_a")).unwrap();
        assert_eq!(reopened.get("offset"), Some(json!(5.0)));
    }

    #[test]
    fn test_global_store_hides_history_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cal.json");
        let mut store = CalibrationStore::open(&path, None).unwrap();
        store.set("offset", json!(1.0)).unwrap();
        store.set("offset", json!(2.0)).unwrap();
        assert_eq!(store.names(), vec!["offset".to_string()]);
        assert!(!store.as_dict().contains_key(HISTORY_KEY));
        assert_eq!(store.history("offset").len(), 1);
    }
}
