//! Declarative sequence documents.
//!
//! A sequence is loaded once per run from a YAML file: a name, declared
//! parameters with defaults, and an ordered list of actions. Steps are
//! one-key mappings (`- sweep: {...}`, `- call: {...}`), which maps onto
//! an externally tagged enum; an unknown tag fails deserialization, so a
//! malformed document is rejected before any instrument I/O happens.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::{FailPolicy, InterruptPolicy};

/// A declared sequence parameter.
#[derive(Debug, Clone, Deserialize)]
pub struct Parameter {
    /// Initial value written into the environment at run start
    #[serde(default)]
    pub default: Value,
}

/// One declarative step.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Evenly-stepped iteration over one variable
    Sweep(SweepSpec),
    /// Drive an instrument method
    Call(CallSpec),
    /// Drive an instrument method and save its reading
    Measure(MeasureSpec),
    /// Compute derived values through the transform registry
    Transform(TransformSpec),
    /// Compute-once-and-persist calibration block
    Calibrate(CalibrateSpec),
    /// Emit a curated results record
    ResultsUpdate(ResultsUpdateSpec),
    /// Forward a snapshot/reset request to the writer
    PlotReset(PlotResetSpec),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepSpec {
    /// Environment variable receiving each point value
    pub var: String,
    pub from: Value,
    pub to: Value,
    pub step: Value,
    /// Actions re-executed per point
    #[serde(rename = "do", default)]
    pub body: Vec<Action>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallSpec {
    pub inst: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub save_as: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeasureSpec {
    pub inst: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
    /// Defaults to the method name when omitted
    #[serde(default)]
    pub save_as: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformSpec {
    pub method: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default)]
    pub save_as: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalibrateSpec {
    /// Calibration key in the store and the environment
    pub name: String,
    #[serde(rename = "do", default)]
    pub body: Vec<Action>,
    /// Expression evaluated after the body to obtain the persisted value
    #[serde(rename = "save")]
    pub save_expr: Value,
    /// Re-run the body even when a stored value exists
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResultsUpdateSpec {
    /// Step label override (default `results:update`)
    #[serde(default)]
    pub step: Option<String>,
    /// Literal fields merged over the flattened environment
    #[serde(default)]
    pub extra: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlotResetSpec {
    #[serde(default = "default_snapshot_suffix")]
    pub suffix: Value,
}

fn default_snapshot_suffix() -> Value {
    Value::String("snap".to_string())
}

/// A loaded test sequence. Immutable once loaded.
#[derive(Debug, Clone, Deserialize)]
pub struct Sequence {
    pub name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, Parameter>,
    #[serde(default)]
    pub steps: Vec<Action>,
    #[serde(default)]
    pub fail_policy: FailPolicy,
    #[serde(default)]
    pub interrupt_policy: InterruptPolicy,
    /// Explicit instrument shutdown order for cleanup paths
    #[serde(default)]
    pub shutdown_order: Vec<String>,
    /// Instrument names that must be present before the run starts
    #[serde(default)]
    pub requires: Vec<String>,
}

impl Sequence {
    /// Load and validate a sequence document.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            Error::sequence(format!("cannot read {}: {err}", path.display()))
        })?;
        let sequence: Sequence = serde_yaml::from_str(&raw)?;
        sequence.validate()?;
        Ok(sequence)
    }

    /// Structural checks beyond what deserialization enforces.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::sequence("sequence name must not be empty"));
        }
        validate_actions(&self.steps)
    }
}

fn validate_actions(actions: &[Action]) -> Result<()> {
    for action in actions {
        match action {
            Action::Sweep(spec) => {
                if spec.var.trim().is_empty() {
                    return Err(Error::sequence("sweep var must not be empty"));
                }
                // Literal zero steps are caught here; substituted ones at
                // run time.
                if spec.step.as_f64() == Some(0.0) || spec.step.as_i64() == Some(0) {
                    return Err(Error::sequence(format!(
                        "sweep over '{}' has a zero step",
                        spec.var
                    )));
                }
                validate_actions(&spec.body)?;
            }
            Action::Call(spec) => {
                if spec.inst.trim().is_empty() || spec.method.trim().is_empty() {
                    return Err(Error::sequence("call requires 'inst' and 'method'"));
                }
            }
            Action::Measure(spec) => {
                if spec.inst.trim().is_empty() || spec.method.trim().is_empty() {
                    return Err(Error::sequence("measure requires 'inst' and 'method'"));
                }
            }
            Action::Transform(spec) => {
                if spec.method.trim().is_empty() {
                    return Err(Error::sequence("transform requires 'method'"));
                }
            }
            Action::Calibrate(spec) => {
                if spec.name.trim().is_empty() {
                    return Err(Error::sequence("calibrate requires 'name'"));
                }
                validate_actions(&spec.body)?;
            }
            Action::ResultsUpdate(_) | Action::PlotReset(_) => {}
        }
    }
    Ok(())
}
