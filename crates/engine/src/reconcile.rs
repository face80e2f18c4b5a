//! Reconciliation of a Stripe object into the local mirror
//!
//! verify -> load -> compare stamps -> create or replace. Only an event at
//! least as recent as the one already applied may overwrite a record.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::{SyncError, SyncResult};
use crate::model::{DomainRecord, ObjectKind};
use crate::store::{RecordStore, StoreError};
use crate::verify::{RemoteVerifier, VerifyError};

/// What happened to a record as a result of one event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordChange {
    Created,
    Updated,
    Deleted,
    /// Nothing persisted (notifications, deletes of absent records)
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub record: DomainRecord,
    pub change: RecordChange,
}

pub struct Reconciler {
    records: Arc<dyn RecordStore>,
    /// `None` when event validation is switched off
    verifier: Option<Arc<dyn RemoteVerifier>>,
}

impl Reconciler {
    pub fn new(
        records: Arc<dyn RecordStore>,
        verifier: Arc<dyn RemoteVerifier>,
        validate_events: bool,
    ) -> Self {
        Self {
            records,
            verifier: validate_events.then_some(verifier),
        }
    }

    pub fn without_verification(records: Arc<dyn RecordStore>) -> Self {
        Self {
            records,
            verifier: None,
        }
    }

    /// Apply `payload` (an admitted, stamped Stripe object) to the mirror.
    ///
    /// Fails with [`SyncError::StaleEvent`] carrying the stored record when a
    /// newer event has already been applied; nothing is written in that case.
    pub async fn reconcile(
        &self,
        kind: ObjectKind,
        event_id: &str,
        payload: &Value,
    ) -> SyncResult<Reconciled> {
        let incoming = DomainRecord::from_payload(kind, payload)?;

        self.verify(event_id).await?;

        match self.apply(&incoming).await {
            // Another delivery created the record between our find and insert.
            // Run the ordering check again against what it wrote.
            Err(SyncError::Store(StoreError::Conflict { .. })) => {
                tracing::warn!(
                    kind = %kind,
                    object_id = %incoming.id,
                    "Concurrent first insert detected, re-running ordering check"
                );
                self.apply(&incoming).await
            }
            result => result,
        }
    }

    /// Hard-delete a record for a `*.deleted` event.
    ///
    /// No ordering check: deletion is terminal on Stripe's side. Deleting an
    /// absent record succeeds with `None`.
    pub async fn remove(
        &self,
        kind: ObjectKind,
        event_id: &str,
        id: &str,
    ) -> SyncResult<Option<DomainRecord>> {
        self.verify(event_id).await?;

        let removed = self.records.destroy(kind, id).await?;
        match &removed {
            Some(_) => tracing::info!(kind = %kind, object_id = %id, "Deleted mirrored Stripe object"),
            None => tracing::info!(
                kind = %kind,
                object_id = %id,
                "Delete for unknown Stripe object - nothing to remove"
            ),
        }
        Ok(removed)
    }

    async fn verify(&self, event_id: &str) -> SyncResult<()> {
        let Some(verifier) = &self.verifier else {
            return Ok(());
        };

        match verifier.retrieve(event_id).await {
            Ok(()) => Ok(()),
            Err(VerifyError::NotFound(_)) => {
                tracing::warn!(event_id = %event_id, "Event could not be verified with Stripe");
                Err(SyncError::Verification(
                    "event not found on remote platform".to_string(),
                ))
            }
            Err(e) => Err(SyncError::StripeApi(e.to_string())),
        }
    }

    async fn apply(&self, incoming: &DomainRecord) -> SyncResult<Reconciled> {
        let existing = self.records.find(incoming.kind, &incoming.id).await?;

        match existing {
            None => {
                let record = self.records.create(incoming).await?;
                tracing::info!(
                    kind = %record.kind,
                    object_id = %record.id,
                    stamp = %record.last_event_timestamp,
                    "Created mirrored Stripe object"
                );
                Ok(Reconciled {
                    record,
                    change: RecordChange::Created,
                })
            }
            Some(existing) if existing.supersedes(incoming.last_event_timestamp) => {
                tracing::warn!(
                    kind = %existing.kind,
                    object_id = %existing.id,
                    stored_stamp = %existing.last_event_timestamp,
                    incoming_stamp = %incoming.last_event_timestamp,
                    "Discarding stale Stripe event - a newer one was already applied"
                );
                Err(SyncError::StaleEvent(Box::new(existing)))
            }
            Some(_) => {
                let record = self.records.update(incoming).await?;
                tracing::info!(
                    kind = %record.kind,
                    object_id = %record.id,
                    stamp = %record.last_event_timestamp,
                    "Updated mirrored Stripe object"
                );
                Ok(Reconciled {
                    record,
                    change: RecordChange::Updated,
                })
            }
        }
    }
}
