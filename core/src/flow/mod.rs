// core/src/flow/mod.rs

//! A small asynchronous step-flow engine.
//!
//! A [`Flow`] is an ordered list of named steps. Each step has `on` handlers and
//! optionally `after` handlers, all operating on a shared [`ContextData<T>`]. Handlers
//! return [`FlowControl::Continue`] or [`FlowControl::Stop`]; a step may be skipped by a
//! condition evaluated against the current state. The checkout and every
//! reconciliation trigger are expressed as flows.

pub mod context_data;
pub mod control;
pub mod definition;
pub mod execution;
pub mod hooks;
pub mod step;

pub use context_data::ContextData;
pub use control::{FlowControl, FlowOutcome};
pub use definition::{Flow, Handler};
pub use step::{skip_when, SkipCondition, StepDef};
