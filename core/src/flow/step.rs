// core/src/flow/step.rs

use std::sync::Arc;

/// Predicate evaluated against the flow state before a step runs; `true` skips the step.
pub type SkipCondition<T> = Arc<dyn Fn(&T) -> bool + Send + Sync + 'static>;

/// A named step of a flow.
#[derive(Clone)]
pub struct StepDef<T: 'static + Send + Sync> {
  pub name: String,
  /// Optional steps may have no handlers registered; required ones may not.
  pub optional: bool,
  pub skip_if: Option<SkipCondition<T>>,
}

impl<T: 'static + Send + Sync> std::fmt::Debug for StepDef<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StepDef")
      .field("name", &self.name)
      .field("optional", &self.optional)
      .field("skip_if_present", &self.skip_if.is_some())
      .finish()
  }
}

/// Convenience constructor for a skip condition.
pub fn skip_when<T, F>(f: F) -> Option<SkipCondition<T>>
where
  T: 'static + Send + Sync,
  F: Fn(&T) -> bool + Send + Sync + 'static,
{
  Some(Arc::new(f))
}
