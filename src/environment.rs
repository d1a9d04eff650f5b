//! Per-run variable store.
//!
//! The environment is a nested mapping addressed by dotted paths. It lives
//! for exactly one sequence execution and is mutated in place by actions;
//! it is never copied across the recursion, so a value written inside a
//! sweep body is visible to later iterations and to the actions that follow
//! the sweep.
//!
//! Reads are total: a path with any missing segment yields `Null` rather
//! than an error. This soft-fail behavior is intentional (see the module
//! docs on `resolve`) and must not be "fixed" into a hard lookup.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::sequence::Parameter;

/// Nested variable store for one sequence execution.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    root: Map<String, Value>,
}

impl Environment {
    /// Create an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an environment from the sequence's declared parameter defaults.
    pub fn from_parameters(parameters: &BTreeMap<String, Parameter>) -> Self {
        let mut env = Self::new();
        for (name, param) in parameters {
            env.set(name, param.default.clone());
        }
        env
    }

    /// Write `value` at a dotted path, creating intermediate mappings as
    /// needed. A non-mapping intermediate value is replaced by a mapping.
    pub fn set(&mut self, dotted: &str, value: Value) {
        let mut parts = dotted.split('.').peekable();
        let mut cursor = &mut self.root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                cursor.insert(part.to_string(), value);
                return;
            }
            let slot = cursor
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            cursor = slot
                .as_object_mut()
                .expect("slot was just ensured to be an object");
        }
    }

    /// Read the value at a dotted path. Returns `Null` when any segment is
    /// absent.
    pub fn get(&self, dotted: &str) -> Value {
        let mut current: &Value = &Value::Null;
        let mut first = true;
        for part in dotted.split('.') {
            let obj = if first {
                first = false;
                Some(&self.root)
            } else {
                current.as_object()
            };
            match obj.and_then(|m| m.get(part)) {
                Some(v) => current = v,
                None => return Value::Null,
            }
        }
        current.clone()
    }

    /// Borrow the top-level mapping.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }

    /// Flatten the nested tree into dotted keys. Mappings recurse; every
    /// other value (including arrays) is kept whole.
    pub fn flatten(&self) -> Map<String, Value> {
        let mut flat = Map::new();
        flatten_into("", &self.root, &mut flat);
        flat
    }
}

fn flatten_into(prefix: &str, map: &Map<String, Value>, out: &mut Map<String, Value>) {
    for (key, value) in map {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(inner) => flatten_into(&name, inner, out),
            other => {
                out.insert(name, other.clone());
            }
        }
    }
}
