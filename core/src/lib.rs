// core/src/lib.rs

//! Checkout reconciliation core.
//!
//! Keeps a shopping cart, an order snapshot and one or more gateway payment attempts
//! consistent while checkout requests, gateway webhooks and client verify calls race
//! each other. The pieces:
//!  - [`cart`]: lock-on-checkout, convert and unlock transitions, item management.
//!  - [`ledger`]: payment rows, idempotent mark-paid, provider reference linking.
//!  - [`orders`]: immutable order snapshots and status changes.
//!  - [`reconcile`]: the engine that drives every trigger through a [`flow::Flow`].
//!  - [`gateway`]: the adapter contract and the provider registry.
//!  - [`audit`]: a best-effort side channel that never affects an outcome.
//!  - [`store`]: persistence ports and an in-memory implementation.

pub mod audit;
pub mod cart;
pub mod config;
pub mod error;
pub mod flow;
pub mod gateway;
pub mod ledger;
pub mod model;
pub mod orders;
pub mod reconcile;
pub mod store;

pub use crate::audit::{AuditLog, AuditSink};
pub use crate::cart::CartBook;
pub use crate::config::{EngineConfig, VerifyErrorPolicy};
pub use crate::error::{CheckoutError, ErrorKind, FlowError, GatewayError, Result, StoreError, StoreResult};
pub use crate::flow::{ContextData, Flow, FlowControl, FlowOutcome};
pub use crate::gateway::{CallbackPayload, GatewayAdapter, GatewayRegistry, InitiateRequest, InitiateResponse, Verdict, VerifyOutcome};
pub use crate::orders::{OrderDesk, OrderView};
pub use crate::reconcile::{CheckoutReceipt, CheckoutRequest, ReconcileOutcome, ReconcileReport, Reconciler};
pub use crate::store::{MemoryStore, Store, StoreTx};
