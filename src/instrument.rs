//! Instrument collaborator interface.
//!
//! The sequencer never reflects over arbitrary objects: each instrument
//! type implements [`Instrument`] with a fixed method table, and the
//! interpreter invokes methods through a checked lookup. Asking for a
//! method outside the table is a configuration error, caught the first
//! time the action runs rather than deep inside a driver.
//!
//! Real drivers (VNA, power meters, tuners, bias supplies) live outside
//! this crate and plug in through the same trait. The simulated instrument
//! here lets a sequence execute end-to-end with no hardware attached.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::resolve::as_number;
use crate::session::BenchConfig;

/// A named collaborator the interpreter may drive.
pub trait Instrument {
    /// Short driver identifier (e.g. `"sim"`).
    fn kind(&self) -> &'static str;

    /// The method names the sequencer is allowed to invoke.
    fn methods(&self) -> &'static [&'static str];

    /// Invoke `method` with resolved arguments.
    ///
    /// Implementations return [`Error::Config`] for names outside
    /// [`Instrument::methods`] and [`Error::Instrument`] for runtime
    /// failures of a known method.
    fn invoke(&mut self, method: &str, args: &[Value]) -> Result<Value>;

    /// Whether this instrument has a shutdown capability.
    fn supports_safe_off(&self) -> bool {
        false
    }

    /// Drive the instrument to a safe state. Best-effort; called during
    /// failure/interrupt cleanup.
    fn safe_off(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Fetch a required numeric argument for `method`.
pub fn numeric_arg(args: &[Value], index: usize, method: &str) -> Result<f64> {
    args.get(index)
        .and_then(as_number)
        .ok_or_else(|| Error::instrument(format!("{method}: argument {index} must be numeric")))
}

/// Deterministic stand-in instrument for hardware-free runs.
///
/// Tracks the last frequency/power it was driven to and reports readings
/// derived from a configurable base value, so sweeps produce stable,
/// inspectable output.
#[derive(Debug)]
pub struct SimInstrument {
    base_value: f64,
    frequency_hz: Option<f64>,
    power_dbm: Option<f64>,
    output_on: bool,
}

impl SimInstrument {
    const METHODS: &'static [&'static str] =
        &["preset", "set_freq", "set_power", "read_value", "capture_point"];

    /// Build from the instrument's bench-config table. Recognized key:
    /// `value` (base reading, default 0.0).
    pub fn from_settings(settings: &BTreeMap<String, toml::Value>) -> Self {
        let base_value = settings
            .get("value")
            .and_then(toml::Value::as_float)
            .or_else(|| settings.get("value").and_then(toml::Value::as_integer).map(|i| i as f64))
            .unwrap_or(0.0);
        Self {
            base_value,
            frequency_hz: None,
            power_dbm: None,
            output_on: false,
        }
    }
}

impl Instrument for SimInstrument {
    fn kind(&self) -> &'static str {
        "sim"
    }

    fn methods(&self) -> &'static [&'static str] {
        Self::METHODS
    }

    fn invoke(&mut self, method: &str, args: &[Value]) -> Result<Value> {
        match method {
            "preset" => {
                self.frequency_hz = None;
                self.power_dbm = None;
                self.output_on = true;
                Ok(json!("OK"))
            }
            "set_freq" => {
                self.frequency_hz = Some(numeric_arg(args, 0, method)?);
                Ok(json!("OK"))
            }
            "set_power" => {
                self.power_dbm = Some(numeric_arg(args, 0, method)?);
                self.output_on = true;
                Ok(json!("OK"))
            }
            "read_value" => Ok(json!(self.base_value + self.power_dbm.unwrap_or(0.0))),
            "capture_point" => {
                let mut point = Map::new();
                point.insert("frequency_hz".to_string(), json!(self.frequency_hz));
                point.insert("power_dbm".to_string(), json!(self.power_dbm));
                point.insert("value".to_string(), json!(self.base_value));
                Ok(Value::Object(point))
            }
            other => Err(Error::config(format!(
                "sim instrument has no method '{other}' (available: {})",
                Self::METHODS.join(", ")
            ))),
        }
    }

    fn supports_safe_off(&self) -> bool {
        true
    }

    fn safe_off(&mut self) -> Result<()> {
        self.output_on = false;
        self.power_dbm = None;
        Ok(())
    }
}

/// Construct every instrument named in the bench config.
///
/// The `kind` key selects the driver. Unknown kinds fail the run before
/// any instrument is touched.
pub fn build_instruments(bench: &BenchConfig) -> Result<BTreeMap<String, Box<dyn Instrument>>> {
    let mut handles: BTreeMap<String, Box<dyn Instrument>> = BTreeMap::new();
    for (name, cfg) in &bench.instruments {
        let handle: Box<dyn Instrument> = match cfg.kind.as_str() {
            "sim" => Box::new(SimInstrument::from_settings(&cfg.settings)),
            other => {
                return Err(Error::config(format!(
                    "instrument '{name}' has unknown kind '{other}' (known: sim)"
                )));
            }
        };
        handles.insert(name.clone(), handle);
    }
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim() -> SimInstrument {
        SimInstrument::from_settings(&BTreeMap::new())
    }

    #[test]
    fn test_method_table_is_checked() {
        let mut inst = sim();
        let err = inst.invoke("self_destruct", &[]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(inst.methods().contains(&"set_power"));
    }

    #[test]
    fn test_set_power_then_read() {
        let mut inst = sim();
        inst.invoke("set_power", &[json!(-20.0)]).unwrap();
        let reading = inst.invoke("read_value", &[]).unwrap();
        assert_eq!(reading, json!(-20.0));
    }

    #[test]
    fn test_capture_point_reports_state() {
        let mut inst = sim();
        inst.invoke("set_freq", &[json!(2.4e9)]).unwrap();
        inst.invoke("set_power", &[json!(-10.0)]).unwrap();
        let point = inst.invoke("capture_point", &[]).unwrap();
        assert_eq!(point["frequency_hz"], json!(2.4e9));
        assert_eq!(point["power_dbm"], json!(-10.0));
    }

    #[test]
    fn test_non_numeric_argument_rejected() {
        let mut inst = sim();
        let err = inst.invoke("set_power", &[json!("loud")]).unwrap_err();
        assert!(matches!(err, Error::Instrument(_)));
        // Missing argument is the same failure.
        assert!(inst.invoke("set_freq", &[]).is_err());
    }

    #[test]
    fn test_safe_off_disables_output() {
        let mut inst = sim();
        inst.invoke("set_power", &[json!(-5.0)]).unwrap();
        assert!(inst.supports_safe_off());
        inst.safe_off().unwrap();
        let point = inst.invoke("capture_point", &[]).unwrap();
        assert_eq!(point["power_dbm"], Value::Null);
    }
}
