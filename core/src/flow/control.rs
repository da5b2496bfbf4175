// core/src/flow/control.rs

//! Signals for controlling flow execution and the outcome of a flow run.

/// Returned by every handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
  /// Keep going: remaining handlers of this step, then the next step.
  Continue,
  /// Halt the flow now. Nothing after this handler runs.
  Stop,
}

/// Outcome of a full flow execution that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
  /// Every non-skipped step ran.
  Completed,
  /// A handler of the named step returned [`FlowControl::Stop`].
  Stopped { step: String },
}

impl FlowOutcome {
  pub fn is_completed(&self) -> bool {
    matches!(self, FlowOutcome::Completed)
  }
}
