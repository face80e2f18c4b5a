//! Post-reconciliation extension point
//!
//! Runs after a record has been created, updated or deleted (or after a
//! notification-only event) so applications can send emails, enqueue jobs and
//! so on. Hooks never influence whether the record is written.

use async_trait::async_trait;

use crate::dispatch::EventType;
use crate::error::SyncResult;
use crate::model::{DomainRecord, Event};
use crate::reconcile::RecordChange;

#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub event: &'a Event,
    pub event_type: &'a EventType,
    pub change: RecordChange,
    /// The record as persisted (or as removed, for deletes)
    pub record: Option<&'a DomainRecord>,
}

#[async_trait]
pub trait EventHooks: Send + Sync {
    /// Default is a no-op. An error marks the event failed and is reported to
    /// Stripe; recover it with a replay once the cause is fixed.
    async fn after_event(&self, _ctx: HookContext<'_>) -> SyncResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl EventHooks for NoopHooks {}
