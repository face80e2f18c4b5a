//! Stripe webhook handling
//!
//! End-to-end pipeline for one delivery: optional signature check, admission
//! (validate, stamp, dedupe), dispatch, then the processing result is written
//! back to the event record for auditing and replay.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use time::OffsetDateTime;

use crate::admission::AdmissionGate;
use crate::client::StripeClient;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::error::{SyncError, SyncResult};
use crate::hooks::EventHooks;
use crate::model::{Event, ProcessingStatus};
use crate::reconcile::Reconciler;
use crate::store::{EventFilter, EventStore, RecordStore};
use crate::verify::StripeVerifier;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed delivery
pub const SIGNATURE_TOLERANCE_SECS: u64 = 300;

/// Response body for a handled delivery: the admitted event plus what was done
#[derive(Debug, Clone, Serialize)]
pub struct WebhookReceipt {
    #[serde(flatten)]
    pub event: Event,
    pub outcome: DispatchOutcome,
}

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    events: Arc<dyn EventStore>,
    admission: AdmissionGate,
    dispatcher: Dispatcher,
    webhook_secret: Option<String>,
}

impl WebhookHandler {
    pub fn new(events: Arc<dyn EventStore>, dispatcher: Dispatcher) -> Self {
        Self {
            admission: AdmissionGate::new(events.clone()),
            events,
            dispatcher,
            webhook_secret: None,
        }
    }

    /// Require a valid `Stripe-Signature` on every delivery
    pub fn with_webhook_secret(mut self, secret: Option<String>) -> Self {
        self.webhook_secret = secret;
        self
    }

    /// Wire a handler over one store holding both events and records,
    /// verifying events with Stripe when the client's config asks for it
    pub fn from_store<S>(store: Arc<S>, stripe: &StripeClient, hooks: Arc<dyn EventHooks>) -> Self
    where
        S: EventStore + RecordStore + 'static,
    {
        let config = stripe.config();
        let verifier = Arc::new(StripeVerifier::new(stripe.clone()));
        let reconciler = Reconciler::new(store.clone(), verifier, config.validate_events);

        Self::new(store, Dispatcher::new(reconciler, hooks))
            .with_webhook_secret(config.webhook_secret.clone())
    }

    /// Handle a raw request body
    pub async fn handle_payload(
        &self,
        body: &str,
        signature: Option<&str>,
    ) -> SyncResult<WebhookReceipt> {
        if let Some(secret) = &self.webhook_secret {
            let header = signature.ok_or_else(|| {
                tracing::warn!("Webhook delivery without Stripe-Signature header");
                SyncError::WebhookSignatureInvalid
            })?;
            verify_signature(body, header, secret, OffsetDateTime::now_utc().unix_timestamp())?;
        }

        let raw: Value = serde_json::from_str(body).map_err(|e| {
            SyncError::validation(format!("request body is not valid JSON: {}", e))
        })?;

        self.handle(raw).await
    }

    /// Admit and apply one event payload.
    ///
    /// Redeliveries are acknowledged with [`DispatchOutcome::Ignored`] and
    /// change nothing.
    pub async fn handle(&self, raw: Value) -> SyncResult<WebhookReceipt> {
        let mut event = self.admission.admit(raw).await?;

        if event.ignore {
            return Ok(WebhookReceipt {
                event,
                outcome: DispatchOutcome::Ignored,
            });
        }

        tracing::info!(
            event_type = %event.event_type,
            event_id = %event.id,
            object = ?event.object_type(),
            stamp = %event.stamp(),
            "Processing Stripe webhook event"
        );

        let result = self.dispatcher.dispatch(&event).await;
        self.record_result(&mut event, &result).await;

        result.map(|outcome| WebhookReceipt { event, outcome })
    }

    /// Admitted events, most recent first
    pub async fn list_events(&self, filter: &EventFilter) -> SyncResult<Vec<Event>> {
        Ok(self.events.list_events(filter).await?)
    }

    /// Re-dispatch a stored event from its admitted payload.
    ///
    /// Used to recover events that failed (storage outage, hook error) since
    /// Stripe's own redeliveries are absorbed by deduplication. Safe to run
    /// on already processed events: the ordering check discards anything
    /// older than what is stored.
    pub async fn replay_event(&self, event_id: &str) -> SyncResult<WebhookReceipt> {
        let mut event = self
            .events
            .find_event(event_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("webhook event {}", event_id)))?;

        let previous_status = event.processing;
        event.ignore = false;

        let result = self.dispatcher.dispatch(&event).await;
        self.record_result(&mut event, &result).await;

        tracing::info!(
            event_id = %event_id,
            previous_status = %previous_status,
            new_status = %event.processing,
            success = result.is_ok(),
            "Webhook replay completed"
        );

        result.map(|outcome| WebhookReceipt { event, outcome })
    }

    async fn record_result(&self, event: &mut Event, result: &SyncResult<DispatchOutcome>) {
        let (status, error_message) = match result {
            Ok(DispatchOutcome::Stale { .. }) => (ProcessingStatus::Stale, None),
            Ok(_) => (ProcessingStatus::Processed, None),
            Err(e) => (ProcessingStatus::Failed, Some(e.to_string())),
        };
        event.processing = status;
        event.error_message = error_message;

        // Retry once - the audit record is what operators replay from
        if let Err(e) = self.events.update_event(event).await {
            tracing::warn!(
                event_id = %event.id,
                error = %e,
                "First attempt to update webhook event failed, retrying..."
            );

            if let Err(retry_err) = self.events.update_event(event).await {
                tracing::error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    processing_result = %event.processing,
                    error_message = ?event.error_message,
                    first_error = %e,
                    retry_error = %retry_err,
                    "CRITICAL: Failed to update webhook audit record after retry. \
                     Event may appear stuck in 'pending' state."
                );
            }
        }
    }
}

/// Check a `Stripe-Signature` header (`t=...,v1=...[,v1=...]`) against the
/// raw body. `now` is the current Unix time in seconds.
pub fn verify_signature(payload: &str, header: &str, secret: &str, now: i64) -> SyncResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        if let Some((key, value)) = part.trim().split_once('=') {
            match key {
                "t" => timestamp = value.parse().ok(),
                "v1" => signatures.push(value),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::error!("Missing timestamp in signature header");
        SyncError::WebhookSignatureInvalid
    })?;

    if signatures.is_empty() {
        tracing::error!("Missing v1 signature in signature header");
        return Err(SyncError::WebhookSignatureInvalid);
    }

    let diff = now.abs_diff(timestamp);
    if diff > SIGNATURE_TOLERANCE_SECS {
        tracing::error!(
            timestamp = timestamp,
            now = now,
            diff = diff,
            "Webhook timestamp outside tolerance"
        );
        return Err(SyncError::WebhookSignatureInvalid);
    }

    let signed_payload = format!("{}.{}", timestamp, payload);
    let matched = signatures.iter().any(|candidate| {
        let Ok(expected) = hex::decode(candidate) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(signed_payload.as_bytes());
        mac.verify_slice(&expected).is_ok()
    });

    if !matched {
        tracing::error!("Webhook signature mismatch");
        return Err(SyncError::WebhookSignatureInvalid);
    }

    Ok(())
}
