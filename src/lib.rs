//! Benchflow Library
//!
//! Core engine for declarative hardware test campaigns: a sequence
//! interpreter, its substitution resolver, a durable calibration store,
//! the transform registry, and the result writer contract.

pub mod calibration;
pub mod cli;
pub mod engine;
pub mod environment;
pub mod error;
pub mod instrument;
pub mod resolve;
pub mod results;
pub mod sequence;
pub mod session;
pub mod transforms;
pub mod types;

// Re-export main types for convenience
pub use calibration::{CalibrationStore, HistoryEntry};
pub use engine::Context;
pub use environment::Environment;
pub use error::{Error, Result};
pub use instrument::{build_instruments, Instrument, SimInstrument};
pub use results::{CompositeWriter, JsonlWriter, ResultWriter, SCHEMA_VERSION};
pub use sequence::{Action, Parameter, Sequence};
pub use session::{BenchConfig, InstrumentConfig, Session};
pub use transforms::{TransformFn, TransformRegistry};
pub use types::{FailPolicy, InterruptPolicy};
