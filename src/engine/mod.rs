//! Sequence interpreter.
//!
//! `run` seeds the environment from the sequence's declared parameters and
//! walks the step list, recursing into sweep and calibration bodies. The
//! environment and context are shared by reference through the whole
//! recursion; nothing is copied, so a value written deep inside a sweep is
//! visible to every later action. Execution is single-threaded and
//! synchronous: each action fully completes (including blocking instrument
//! I/O) before the next is considered.
//!
//! Every action is wrapped individually by the failure policy, so a
//! `continue` policy skips exactly the failing action and nothing else.
//! Configuration errors bypass the policy and always abort. Operator
//! interrupts are consumed at action boundaries.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::io::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::calibration::CalibrationStore;
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::instrument::Instrument;
use crate::resolve::{as_number, resolve};
use crate::results::ResultWriter;
use crate::sequence::{
    Action, CalibrateSpec, CallSpec, MeasureSpec, PlotResetSpec, ResultsUpdateSpec, Sequence,
    SweepSpec, TransformSpec,
};
use crate::transforms::TransformRegistry;
use crate::types::{FailPolicy, InterruptPolicy};

/// Everything one run executes against. Built once per run and threaded by
/// reference through the recursion.
pub struct Context<'a> {
    /// Instrument handles by name
    pub instruments: BTreeMap<String, Box<dyn Instrument>>,
    /// Result sink for both channels
    pub writer: &'a mut dyn ResultWriter,
    /// Durable calibration store
    pub cal_store: &'a mut CalibrationStore,
    /// In-memory calibration cache, seeded from the store
    pub cal_cache: Map<String, Value>,
    /// Derived-value dispatch table
    pub transforms: &'a TransformRegistry,
    pub fail_policy: FailPolicy,
    pub interrupt_policy: InterruptPolicy,
    /// Explicit shutdown order; instruments not listed follow in name order
    pub shutdown_order: Vec<String>,
    /// Set by the SIGINT handler, consumed at action boundaries
    pub interrupt: Arc<AtomicBool>,
}

/// What the current nesting level does after an interrupt is handled.
enum InterruptFlow {
    /// Keep executing this level
    Proceed,
    /// Abandon the remaining actions at this level only
    AbortLevel,
}

/// Execute `sequence` against `ctx`.
///
/// Fails before any instrument I/O if a `requires` entry names an
/// instrument missing from the bench.
pub fn run(sequence: &Sequence, ctx: &mut Context) -> Result<()> {
    info!(
        test = %sequence.name,
        fail_policy = %ctx.fail_policy,
        interrupt_policy = %ctx.interrupt_policy,
        "starting sequence run"
    );
    for name in &sequence.requires {
        if !ctx.instruments.contains_key(name) {
            return Err(Error::config(format!(
                "sequence requires instrument '{name}' which is not on this bench"
            )));
        }
    }

    let mut env = Environment::from_parameters(&sequence.parameters);
    run_actions(&sequence.name, &sequence.steps, &mut env, ctx)
}

fn run_actions(
    test: &str,
    actions: &[Action],
    env: &mut Environment,
    ctx: &mut Context,
) -> Result<()> {
    for action in actions {
        if ctx.interrupt.swap(false, Ordering::SeqCst) {
            match handle_interrupt(ctx)? {
                InterruptFlow::Proceed => {}
                InterruptFlow::AbortLevel => break,
            }
        }

        match run_action(test, action, env, ctx) {
            Ok(()) => {}
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => match ctx.fail_policy {
                FailPolicy::Halt => return Err(err),
                FailPolicy::Continue => {
                    warn!(%err, "action failed; continuing per fail policy");
                }
                FailPolicy::Shutdown => {
                    shutdown_instruments(ctx);
                    return Err(err);
                }
            },
        }
    }
    Ok(())
}

fn run_action(test: &str, action: &Action, env: &mut Environment, ctx: &mut Context) -> Result<()> {
    match action {
        Action::Sweep(spec) => run_sweep(test, spec, env, ctx),
        Action::Call(spec) => run_call(test, spec, env, ctx),
        Action::Measure(spec) => run_measure(test, spec, env, ctx),
        Action::Transform(spec) => run_transform(test, spec, env, ctx),
        Action::Calibrate(spec) => run_calibrate(test, spec, env, ctx),
        Action::ResultsUpdate(spec) => run_results_update(test, spec, env, ctx),
        Action::PlotReset(spec) => run_plot_reset(spec, env, ctx),
    }
}

fn resolve_in(ctx: &mut Context, env: &Environment, value: &Value) -> Value {
    resolve(value, env, &mut ctx.cal_cache, ctx.cal_store)
}

fn require_number(value: Value, what: &str) -> Result<f64> {
    as_number(&value)
        .ok_or_else(|| Error::config(format!("{what} must resolve to a number, got {value}")))
}

/// Point count for a bounded sweep: `floor((to - from) / step) + 1`.
fn sweep_points(from: f64, to: f64, step: f64) -> Result<i64> {
    if step == 0.0 {
        return Err(Error::config("sweep step cannot be zero"));
    }
    Ok(((to - from) / step).floor() as i64 + 1)
}

fn run_sweep(test: &str, spec: &SweepSpec, env: &mut Environment, ctx: &mut Context) -> Result<()> {
    let from = require_number(resolve_in(ctx, env, &spec.from), "sweep 'from'")?;
    let to = require_number(resolve_in(ctx, env, &spec.to), "sweep 'to'")?;
    let step = require_number(resolve_in(ctx, env, &spec.step), "sweep 'step'")?;

    let points = sweep_points(from, to, step)?;
    debug!(var = %spec.var, from, to, step, points, "entering sweep");
    for i in 0..points.max(0) {
        env.set(&spec.var, json!(from + i as f64 * step));
        run_actions(test, &spec.body, env, ctx)?;
    }
    Ok(())
}

fn run_call(test: &str, spec: &CallSpec, env: &mut Environment, ctx: &mut Context) -> Result<()> {
    let args: Vec<Value> = spec.args.iter().map(|arg| resolve_in(ctx, env, arg)).collect();
    let result = invoke_instrument(ctx, &spec.inst, &spec.method, &args)?;

    if let Some(save_as) = &spec.save_as {
        env.set(save_as, result.clone());
    }

    let mut payload = Map::new();
    payload.insert("inst".to_string(), json!(spec.inst));
    payload.insert("method".to_string(), json!(spec.method));
    payload.insert("result".to_string(), result);
    payload.extend(env.flatten());
    ctx.writer.write_point(test, &format!("call:{}", spec.method), payload)
}

fn run_measure(
    test: &str,
    spec: &MeasureSpec,
    env: &mut Environment,
    ctx: &mut Context,
) -> Result<()> {
    let args: Vec<Value> = spec.args.iter().map(|arg| resolve_in(ctx, env, arg)).collect();
    let value = invoke_instrument(ctx, &spec.inst, &spec.method, &args)?;

    // A measurement is always saved; the method name is the fallback key.
    let save_key = spec.save_as.clone().unwrap_or_else(|| spec.method.clone());
    env.set(&save_key, value.clone());

    let mut payload = Map::new();
    payload.insert("inst".to_string(), json!(spec.inst));
    payload.insert("method".to_string(), json!(spec.method));
    payload.insert(save_key, value);
    payload.extend(env.flatten());
    ctx.writer.write_point(test, &format!("measure:{}", spec.method), payload)
}

fn invoke_instrument(
    ctx: &mut Context,
    inst: &str,
    method: &str,
    args: &[Value],
) -> Result<Value> {
    let handle = ctx
        .instruments
        .get_mut(inst)
        .ok_or_else(|| Error::config(format!("unknown instrument '{inst}'")))?;
    handle.invoke(method, args)
}

fn run_transform(
    test: &str,
    spec: &TransformSpec,
    env: &mut Environment,
    ctx: &mut Context,
) -> Result<()> {
    let mut resolved = Map::new();
    for (key, value) in &spec.args {
        let value = resolve_in(ctx, env, value);
        resolved.insert(key.clone(), value);
    }

    let payload = ctx.transforms.apply(&spec.method, resolved, &ctx.cal_cache)?;
    if let Some(save_as) = &spec.save_as {
        env.set(save_as, Value::Object(payload.clone()));
    }

    let mut out = Map::new();
    out.insert("method".to_string(), json!(spec.method));
    out.extend(payload);
    out.extend(env.flatten());
    ctx.writer.write_point(test, &format!("transform:{}", spec.method), out)
}

fn run_calibrate(
    test: &str,
    spec: &CalibrateSpec,
    env: &mut Environment,
    ctx: &mut Context,
) -> Result<()> {
    let name = spec.name.as_str();

    if !spec.force {
        let known = match ctx.cal_cache.get(name) {
            Some(value) => Some(value.clone()),
            None => ctx.cal_store.get(name),
        };
        if let Some(value) = known {
            ctx.cal_cache.insert(name.to_string(), value.clone());
            env.set(name, value.clone());
            info!(calibration = %name, "reusing stored calibration");
            let mut payload = Map::new();
            payload.insert("method".to_string(), json!("calibration"));
            payload.insert("status".to_string(), json!("reuse"));
            payload.insert("value".to_string(), value);
            return ctx.writer.write_point(test, &format!("calibration:{name}"), payload);
        }
    }

    run_actions(test, &spec.body, env, ctx)?;

    let value = resolve_in(ctx, env, &spec.save_expr);
    ctx.cal_cache.insert(name.to_string(), value.clone());
    ctx.cal_store.set(name, value.clone())?;
    ctx.cal_store.save()?;
    env.set(name, value.clone());
    info!(calibration = %name, "calibration updated and persisted");

    let mut payload = Map::new();
    payload.insert("method".to_string(), json!("calibration"));
    payload.insert("status".to_string(), json!("update"));
    payload.insert("value".to_string(), value);
    ctx.writer.write_point(test, &format!("calibration:{name}"), payload)
}

fn run_results_update(
    test: &str,
    spec: &ResultsUpdateSpec,
    env: &mut Environment,
    ctx: &mut Context,
) -> Result<()> {
    let step = spec.step.as_deref().unwrap_or("results:update");
    let mut payload = env.flatten();
    if let Some(extra) = &spec.extra {
        // Extras are literal fields, not substitution targets.
        for (key, value) in extra {
            payload.insert(key.clone(), value.clone());
        }
    }
    ctx.writer.write_result(test, step, payload)
}

fn run_plot_reset(spec: &PlotResetSpec, env: &mut Environment, ctx: &mut Context) -> Result<()> {
    let suffix = match resolve_in(ctx, env, &spec.suffix) {
        Value::String(s) => s,
        other => other.to_string(),
    };
    ctx.writer.snapshot(&suffix)?;
    ctx.writer.reset()
}

/// Best-effort safe-off of every instrument that supports it, honoring the
/// explicit shutdown order first and name order for the rest. Failures are
/// logged, never escalated.
fn shutdown_instruments(ctx: &mut Context) {
    let mut order: Vec<String> = ctx
        .shutdown_order
        .iter()
        .filter(|name| ctx.instruments.contains_key(*name))
        .cloned()
        .collect();
    for name in ctx.instruments.keys() {
        if !order.contains(name) {
            order.push(name.clone());
        }
    }

    for name in order {
        let Some(handle) = ctx.instruments.get_mut(&name) else {
            continue;
        };
        if !handle.supports_safe_off() {
            continue;
        }
        info!(instrument = %name, "driving instrument to safe state");
        if let Err(err) = handle.safe_off() {
            warn!(instrument = %name, %err, "safe-off failed; continuing shutdown");
        }
    }
}

fn handle_interrupt(ctx: &mut Context) -> Result<InterruptFlow> {
    warn!(policy = %ctx.interrupt_policy, "operator interrupt received");
    match ctx.interrupt_policy {
        InterruptPolicy::Continue => Ok(InterruptFlow::Proceed),
        InterruptPolicy::Pause => pause_prompt(ctx),
        InterruptPolicy::Shutdown => {
            shutdown_instruments(ctx);
            pause_prompt(ctx)
        }
    }
}

/// Synchronous operator confirmation. 'q' shuts everything down and aborts
/// the run; anything else abandons the remaining actions at the current
/// nesting level and resumes one level up.
fn pause_prompt(ctx: &mut Context) -> Result<InterruptFlow> {
    eprint!("Interrupted. Press Enter to skip the rest of this block, or type 'q' to quit: ");
    let _ = std::io::stderr().flush();
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    if answer.trim().eq_ignore_ascii_case("q") {
        shutdown_instruments(ctx);
        Err(Error::OperatorQuit)
    } else {
        Ok(InterruptFlow::AbortLevel)
    }
}
