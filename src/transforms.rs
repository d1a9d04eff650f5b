//! Registry of derived-value transforms.
//!
//! A transform is a named, pure function over `(payload, calibration cache)
//! -> payload`: no side effects, no instrument access, deterministic given
//! its two inputs. The interpreter dispatches `transform` actions through
//! this table; the domain formulas themselves (network-parameter algebra,
//! coupling corrections) live with the deployment, not in this crate.
//!
//! Dispatching an unregistered name passes the payload through unchanged
//! (with a warning). Sequences are written against benches whose transform
//! sets evolve independently, and a missing derivation should degrade the
//! data, not kill the run.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::Result;

/// Signature for a registered transform.
pub type TransformFn =
    Box<dyn Fn(&Map<String, Value>, &Map<String, Value>) -> Result<Map<String, Value>> + Send>;

/// Name -> function table for measurement post-processing.
#[derive(Default)]
pub struct TransformRegistry {
    table: BTreeMap<String, TransformFn>,
}

impl TransformRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `func` under `method`, replacing any previous registration.
    pub fn register(
        &mut self,
        method: impl Into<String>,
        func: impl Fn(&Map<String, Value>, &Map<String, Value>) -> Result<Map<String, Value>>
        + Send
        + 'static,
    ) {
        self.table.insert(method.into(), Box::new(func));
    }

    /// Whether `method` has a registration.
    pub fn contains(&self, method: &str) -> bool {
        self.table.contains_key(method)
    }

    /// Registered transform names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.table.keys().map(String::as_str).collect()
    }

    /// Apply `method` to `payload` with read access to the calibration
    /// cache. Unregistered names return the payload unchanged.
    pub fn apply(
        &self,
        method: &str,
        payload: Map<String, Value>,
        cal_cache: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        match self.table.get(method) {
            Some(func) => func(&payload, cal_cache),
            None => {
                warn!(method = %method, "transform not registered; passing payload through");
                Ok(payload)
            }
        }
    }
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;

    fn map(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_apply_registered_transform() {
        let mut registry = TransformRegistry::new();
        registry.register("double_power", |payload, _cal| {
            let p = payload.get("power").and_then(Value::as_f64).unwrap_or(0.0);
            Ok(map(&[("power", json!(p * 2.0))]))
        });

        let out = registry
            .apply("double_power", map(&[("power", json!(3.0))]), &Map::new())
            .unwrap();
        assert_eq!(out.get("power"), Some(&json!(6.0)));
    }

    #[test]
    fn test_unregistered_passes_payload_through() {
        let registry = TransformRegistry::new();
        let payload = map(&[("power", json!(-20.0)), ("tag", json!("raw"))]);
        let out = registry.apply("ghost", payload.clone(), &Map::new()).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn test_transform_sees_calibration_cache() {
        let mut registry = TransformRegistry::new();
        registry.register("apply_offset", |payload, cal| {
            let raw = payload.get("raw").and_then(Value::as_f64).unwrap_or(0.0);
            let offset = cal.get("offset").and_then(Value::as_f64).unwrap_or(0.0);
            Ok(map(&[("corrected", json!(raw + offset))]))
        });

        let cal = map(&[("offset", json!(1.5))]);
        let out = registry.apply("apply_offset", map(&[("raw", json!(2.0))]), &cal).unwrap();
        assert_eq!(out.get("corrected"), Some(&json!(3.5)));
    }

    #[test]
    fn test_transform_errors_propagate() {
        let mut registry = TransformRegistry::new();
        registry.register("always_fails", |_payload, _cal| {
            Err(Error::transform("payload missing 'sparams'"))
        });
        let err = registry.apply("always_fails", Map::new(), &Map::new()).unwrap_err();
        assert!(matches!(err, Error::Transform(_)));
    }
}
