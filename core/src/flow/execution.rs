// core/src/flow/execution.rs

//! `Flow::run()`: executes steps in order against a shared context.

use crate::error::FlowError;
use crate::flow::context_data::ContextData;
use crate::flow::control::{FlowControl, FlowOutcome};
use crate::flow::definition::{Flow, Handler};
use tracing::{event, span, Instrument, Level};

impl<TData, Err> Flow<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<FlowError> + Send + Sync + 'static,
{
  /// Runs every step in declaration order.
  ///
  /// A step whose `skip_if` holds is skipped. A required step without any handler
  /// fails with [`FlowError::HandlerMissing`]. The first handler error aborts the run
  /// and is returned as-is; the first `Stop` ends the run with [`FlowOutcome::Stopped`].
  pub async fn run(&self, ctx_data: ContextData<TData>) -> Result<FlowOutcome, Err> {
    event!(Level::DEBUG, flow = self.name, num_steps = self.steps.len(), "Flow execution starting.");

    for (step_idx, step_def) in self.steps.iter().enumerate() {
      let step_name = step_def.name.as_str();
      let step_span = span!(
        Level::INFO,
        "flow_step",
        flow = self.name,
        step_name = step_name,
        step_index = step_idx
      );

      if let Some(skip_cond) = &step_def.skip_if {
        let skip = {
          let guard = ctx_data.read();
          skip_cond(&guard)
        };
        if skip {
          event!(parent: &step_span, Level::DEBUG, "Step skipped by its skip condition.");
          continue;
        }
      }

      let on_handlers = self.on.get(step_name).filter(|v| !v.is_empty());
      let after_handlers = self.after.get(step_name).filter(|v| !v.is_empty());

      if on_handlers.is_none() && after_handlers.is_none() {
        if step_def.optional {
          event!(parent: &step_span, Level::DEBUG, "Optional step has no handlers, skipping.");
          continue;
        }
        event!(parent: &step_span, Level::ERROR, "Required step has no handlers.");
        return Err(Err::from(FlowError::HandlerMissing {
          flow: self.name,
          step_name: step_def.name.clone(),
        }));
      }

      for (phase, handlers) in [("on", on_handlers), ("after", after_handlers)] {
        let Some(handlers) = handlers else { continue };
        let control = run_phase(handlers, &ctx_data, phase).instrument(step_span.clone()).await?;
        if control == FlowControl::Stop {
          event!(parent: &step_span, Level::DEBUG, phase, "Flow stopped by a handler.");
          return Ok(FlowOutcome::Stopped {
            step: step_def.name.clone(),
          });
        }
      }
    }

    event!(Level::DEBUG, flow = self.name, "Flow execution completed.");
    Ok(FlowOutcome::Completed)
  }
}

async fn run_phase<TData, Err>(
  handlers: &[Handler<TData, Err>],
  ctx_data: &ContextData<TData>,
  phase: &'static str,
) -> Result<FlowControl, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + Send + Sync + 'static,
{
  for (handler_idx, handler_fn) in handlers.iter().enumerate() {
    let handler_span = span!(Level::DEBUG, "flow_handler", phase, handler_index = handler_idx);
    match handler_fn(ctx_data.clone()).instrument(handler_span).await {
      Ok(FlowControl::Continue) => {}
      Ok(FlowControl::Stop) => return Ok(FlowControl::Stop),
      Err(e) => {
        event!(Level::WARN, phase, error = %e, "Handler failed.");
        return Err(e);
      }
    }
  }
  Ok(FlowControl::Continue)
}
