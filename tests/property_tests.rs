//! Property-Based Tests for benchflow
//!
//! Uses proptest for invariants that matter across the whole input space:
//! sweep point counts, dotted-path round-trips, and policy enum parsing.

use proptest::prelude::*;
use serde_json::json;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use strum::IntoEnumIterator;

use benchflow::engine::{self, Context};
use benchflow::{
    CalibrationStore, Environment, FailPolicy, Instrument, InterruptPolicy, ResultWriter,
    Sequence, TransformRegistry,
};

// =============================================================================
// Sweep point-count invariant
// =============================================================================

/// Records every numeric argument it is driven with; every method succeeds.
struct CountingInstrument {
    values: Rc<RefCell<Vec<f64>>>,
}

impl Instrument for CountingInstrument {
    fn kind(&self) -> &'static str {
        "counting"
    }

    fn methods(&self) -> &'static [&'static str] {
        &["set_power"]
    }

    fn invoke(&mut self, _method: &str, args: &[serde_json::Value]) -> benchflow::Result<serde_json::Value> {
        if let Some(v) = args.first().and_then(serde_json::Value::as_f64) {
            self.values.borrow_mut().push(v);
        }
        Ok(json!("OK"))
    }
}

struct NullWriter;

impl ResultWriter for NullWriter {
    fn write_point(
        &mut self,
        _test: &str,
        _step: &str,
        _payload: serde_json::Map<String, serde_json::Value>,
    ) -> benchflow::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> benchflow::Result<()> {
        Ok(())
    }
}

fn run_sweep(from: f64, step: f64, points: usize, dir: &std::path::Path) -> Vec<f64> {
    // Place `to` strictly inside the last interval so the expected count is
    // robust to rounding.
    let to = from + step * (points as f64 - 1.0) + step * 0.25;
    let doc = format!(
        "name: prop\nsteps:\n  - sweep:\n      var: p\n      from: {from}\n      to: {to}\n      step: {step}\n      do:\n        - call: {{inst: A, method: set_power, args: ['${{p}}']}}\n"
    );
    let sequence: Sequence = serde_yaml::from_str(&doc).unwrap();

    let mut writer = NullWriter;
    let mut store = CalibrationStore::open(dir.join("cal.json"), None).unwrap();
    let transforms = TransformRegistry::new();
    let values = Rc::new(RefCell::new(Vec::new()));
    let mut instruments: BTreeMap<String, Box<dyn Instrument>> = BTreeMap::new();
    instruments.insert("A".to_string(), Box::new(CountingInstrument { values: values.clone() }));

    let mut ctx = Context {
        instruments,
        writer: &mut writer,
        cal_store: &mut store,
        cal_cache: serde_json::Map::new(),
        transforms: &transforms,
        fail_policy: FailPolicy::Halt,
        interrupt_policy: InterruptPolicy::Continue,
        shutdown_order: Vec::new(),
        interrupt: Arc::new(AtomicBool::new(false)),
    };
    engine::run(&sequence, &mut ctx).unwrap();

    let recorded = values.borrow().clone();
    recorded
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Point count equals floor((to-from)/step) + 1 and values follow
    /// from + i*step exactly, for both sweep directions.
    #[test]
    fn sweep_emits_expected_points(
        from in -100.0f64..100.0,
        magnitude in 0.5f64..10.0,
        ascending in any::<bool>(),
        points in 1usize..30,
    ) {
        let dir = tempfile::TempDir::new().unwrap();
        let step = if ascending { magnitude } else { -magnitude };
        let values = run_sweep(from, step, points, dir.path());
        prop_assert_eq!(values.len(), points);
        for (i, v) in values.iter().enumerate() {
            prop_assert!((v - (from + i as f64 * step)).abs() < 1e-9);
        }
        // Strictly monotonic in the direction of the step.
        for pair in values.windows(2) {
            if ascending {
                prop_assert!(pair[1] > pair[0]);
            } else {
                prop_assert!(pair[1] < pair[0]);
            }
        }
    }
}

// =============================================================================
// Dotted-path round-trip
// =============================================================================

fn segment_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,7}"
}

proptest! {
    /// set(path, v) followed by get(path) is identity, and the flattened
    /// form contains the dotted key.
    #[test]
    fn dotted_path_roundtrip(
        segments in prop::collection::vec(segment_strategy(), 1..5),
        value in -1_000_000i64..1_000_000,
    ) {
        let path = segments.join(".");
        let mut env = Environment::new();
        env.set(&path, json!(value));
        prop_assert_eq!(env.get(&path), json!(value));
        let flattened = env.flatten();
        prop_assert_eq!(flattened.get(&path), Some(&json!(value)));
    }
}

// =============================================================================
// Policy enum round-trips
// =============================================================================

proptest! {
    #[test]
    fn fail_policy_roundtrip(index in 0usize..3) {
        let policy = FailPolicy::iter().nth(index).unwrap();
        let s = policy.to_string();
        let parsed: FailPolicy = s.parse().expect("Should parse");
        prop_assert_eq!(policy, parsed);
    }

    #[test]
    fn interrupt_policy_roundtrip(index in 0usize..3) {
        let policy = InterruptPolicy::iter().nth(index).unwrap();
        let s = policy.to_string();
        let parsed: InterruptPolicy = s.parse().expect("Should parse");
        prop_assert_eq!(policy, parsed);
    }
}
