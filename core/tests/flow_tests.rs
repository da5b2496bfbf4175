// tests/flow_tests.rs
mod common;

use checkout_core::flow::skip_when;
use checkout_core::{ContextData, Flow, FlowControl, FlowError, FlowOutcome};
use common::setup_tracing;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Trail {
  steps: Vec<String>,
  stop_at: Option<String>,
  skip_middle: bool,
}

#[derive(Debug, thiserror::Error)]
enum TrailError {
  #[error("flow: {0}")]
  Flow(#[from] FlowError),
  #[error("handler failed: {0}")]
  Handler(String),
}

type Ready = std::future::Ready<Result<FlowControl, TrailError>>;

fn step(name: &'static str) -> impl Fn(ContextData<Trail>) -> Ready + Send + Sync + 'static {
  move |ctx: ContextData<Trail>| {
    let mut guard = ctx.write();
    guard.steps.push(name.to_string());
    let control = if guard.stop_at.as_deref() == Some(name) {
      FlowControl::Stop
    } else {
      FlowControl::Continue
    };
    std::future::ready(Ok(control))
  }
}

fn three_step_flow() -> Flow<Trail, TrailError> {
  let mut flow = Flow::new(
    "trail",
    &[
      ("first", false, None),
      ("middle", false, skip_when(|t: &Trail| t.skip_middle)),
      ("last", false, None),
    ],
  );
  flow.on("first", step("first"));
  flow.on("middle", step("middle"));
  flow.on("last", step("last"));
  flow
}

#[tokio::test]
async fn runs_steps_in_declaration_order() {
  setup_tracing();
  let flow = three_step_flow();
  let ctx = ContextData::new(Trail::default());

  let outcome = flow.run(ctx.clone()).await.unwrap();

  assert_eq!(outcome, FlowOutcome::Completed);
  assert_eq!(ctx.read().steps, vec!["first", "middle", "last"]);
  assert_eq!(flow.step_names(), vec!["first", "middle", "last"]);
}

#[tokio::test]
async fn stop_ends_the_run_at_that_step() {
  setup_tracing();
  let flow = three_step_flow();
  let ctx = ContextData::new(Trail {
    stop_at: Some("middle".into()),
    ..Default::default()
  });

  let outcome = flow.run(ctx.clone()).await.unwrap();

  assert_eq!(outcome, FlowOutcome::Stopped { step: "middle".into() });
  assert!(!outcome.is_completed());
  assert_eq!(ctx.read().steps, vec!["first", "middle"]);
}

#[tokio::test]
async fn skip_condition_sees_current_state() {
  setup_tracing();
  let flow = three_step_flow();
  let ctx = ContextData::new(Trail {
    skip_middle: true,
    ..Default::default()
  });

  flow.run(ctx.clone()).await.unwrap();

  assert_eq!(ctx.read().steps, vec!["first", "last"]);
}

#[tokio::test]
async fn required_step_without_handler_fails() {
  setup_tracing();
  let flow = Flow::<Trail, TrailError>::new("bare", &[("lonely", false, None)]);

  let err = flow.run(ContextData::new(Trail::default())).await.unwrap_err();

  assert!(matches!(
    err,
    TrailError::Flow(FlowError::HandlerMissing { flow: "bare", ref step_name }) if step_name == "lonely"
  ));
}

#[tokio::test]
async fn optional_step_without_handler_is_skipped() {
  setup_tracing();
  let mut flow = Flow::<Trail, TrailError>::new("opt", &[("maybe", true, None), ("last", false, None)]);
  flow.on("last", step("last"));
  let ctx = ContextData::new(Trail::default());

  assert!(flow.run(ctx.clone()).await.unwrap().is_completed());
  assert_eq!(ctx.read().steps, vec!["last"]);
}

#[tokio::test]
async fn handler_error_aborts_and_after_hooks_do_not_run() {
  setup_tracing();
  let after_runs = Arc::new(AtomicUsize::new(0));
  let mut flow = Flow::<Trail, TrailError>::new("failing", &[("boom", false, None), ("never", false, None)]);
  flow.on("boom", |_ctx: ContextData<Trail>| async { Err::<FlowControl, _>(TrailError::Handler("kaput".into())) });
  let counter = after_runs.clone();
  flow.after("boom", move |_ctx: ContextData<Trail>| {
    counter.fetch_add(1, Ordering::SeqCst);
    async { Ok::<_, TrailError>(FlowControl::Continue) }
  });
  flow.on("never", step("never"));
  let ctx = ContextData::new(Trail::default());

  let err = flow.run(ctx.clone()).await.unwrap_err();

  assert!(matches!(err, TrailError::Handler(ref m) if m == "kaput"));
  assert_eq!(after_runs.load(Ordering::SeqCst), 0);
  assert!(ctx.read().steps.is_empty());
}

#[tokio::test]
async fn after_hooks_run_once_on_handlers_continue() {
  setup_tracing();
  let mut flow = three_step_flow();
  flow.after("first", |ctx: ContextData<Trail>| {
    ctx.write().steps.push("first:after".into());
    async { Ok::<_, TrailError>(FlowControl::Continue) }
  });
  let ctx = ContextData::new(Trail::default());

  flow.run(ctx.clone()).await.unwrap();

  assert_eq!(ctx.read().steps, vec!["first", "first:after", "middle", "last"]);
}

#[test]
#[should_panic(expected = "not declared")]
fn registering_on_unknown_step_panics() {
  let mut flow = Flow::<Trail, TrailError>::new("strict", &[("known", false, None)]);
  flow.on("unknown", step("unknown"));
}
