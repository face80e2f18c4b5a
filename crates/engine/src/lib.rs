// Engine crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Stripe Mirror Engine
//!
//! Ingests Stripe webhook events and keeps a local mirror of the Stripe
//! objects they carry.
//!
//! ## Pipeline
//!
//! - **Admission**: validate the payload shape, stamp the embedded object with
//!   the event time and record the event id exactly once
//! - **Dispatch**: route each event type to an upsert, a delete or a
//!   notification
//! - **Reconciliation**: optionally confirm the event with Stripe, then apply
//!   it only if it is at least as recent as what is stored
//! - **Webhooks**: signature checks, processing ledger and replay

pub mod admission;
pub mod client;
pub mod dispatch;
pub mod error;
pub mod hooks;
pub mod model;
pub mod reconcile;
pub mod store;
pub mod verify;
pub mod webhook;

#[cfg(test)]
mod test_support;

// Admission
pub use admission::{parse_event, AdmissionGate};

// Client
pub use client::{StripeClient, StripeConfig};

// Dispatch
pub use dispatch::{route, DispatchOutcome, Dispatcher, EventType, Route};

// Errors
pub use error::{SyncError, SyncResult};

// Hooks
pub use hooks::{EventHooks, HookContext, NoopHooks};

// Model
pub use model::{
    DomainRecord, Event, EventData, EventStamp, ObjectKind, ProcessingStatus, LAST_EVENT_FIELD,
};

// Reconciliation
pub use reconcile::{Reconciled, Reconciler, RecordChange};

// Storage
pub use store::{
    EventFilter, EventStore, MemoryStore, PgStore, RecordStore, StoreError, StoreResult,
};

// Verification
pub use verify::{RemoteVerifier, StripeVerifier, VerifyError};

// Webhooks
pub use webhook::{verify_signature, WebhookHandler, WebhookReceipt, SIGNATURE_TOLERANCE_SECS};
