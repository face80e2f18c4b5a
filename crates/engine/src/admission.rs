//! Admission of inbound webhook payloads
//!
//! Validates the payload shape, stamps the embedded Stripe object with the
//! event's own creation time and deduplicates by event id. Ordering decisions
//! downstream compare these stamps, never the wall-clock receipt time.

use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;

use crate::error::{SyncError, SyncResult};
use crate::model::{Event, EventData, EventStamp, ProcessingStatus, LAST_EVENT_FIELD};
use crate::store::{EventStore, StoreError};

pub struct AdmissionGate {
    events: Arc<dyn EventStore>,
}

impl AdmissionGate {
    pub fn new(events: Arc<dyn EventStore>) -> Self {
        Self { events }
    }

    /// Turn a raw payload into a stored event.
    ///
    /// A redelivered event comes back with `ignore = true` and must not be
    /// reconciled again.
    pub async fn admit(&self, raw: Value) -> SyncResult<Event> {
        let event = parse_event(raw)?;

        if let Some(mut existing) = self.events.find_event(&event.id).await? {
            tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                processing = %existing.processing,
                "Duplicate webhook event - already admitted"
            );
            existing.ignore = true;
            return Ok(existing);
        }

        match self.events.insert_event(&event).await {
            Ok(mut stored) => {
                stored.ignore = false;
                tracing::info!(
                    event_id = %stored.id,
                    event_type = %stored.event_type,
                    "Admitted Stripe webhook event"
                );
                Ok(stored)
            }
            // Lost the race against a concurrent delivery of the same id
            Err(StoreError::Conflict { .. }) => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "Duplicate webhook event - concurrent delivery won the insert"
                );
                Ok(Event {
                    ignore: true,
                    ..event
                })
            }
            Err(e) => {
                tracing::error!(event_id = %event.id, error = %e, "Failed to store webhook event");
                Err(e.into())
            }
        }
    }
}

/// Validate and stamp a raw payload without touching storage
pub fn parse_event(mut raw: Value) -> SyncResult<Event> {
    if !raw.get("data").is_some_and(Value::is_object) {
        return Err(SyncError::validation("requires a data attribute as an object"));
    }
    if !raw.pointer("/data/object").is_some_and(Value::is_object) {
        return Err(SyncError::validation(
            "requires a data.object attribute as an object",
        ));
    }

    let created = raw
        .get("created")
        .and_then(Value::as_i64)
        .ok_or_else(|| SyncError::validation("requires a created attribute as a number"))?;
    let stamp = EventStamp::from_created(created)
        .ok_or_else(|| SyncError::validation("created attribute is out of range"))?;
    let created_at = OffsetDateTime::from_unix_timestamp(created)
        .map_err(|_| SyncError::validation("created attribute is out of range"))?;

    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| SyncError::validation("requires an id attribute as a string"))?;
    let event_type = raw
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SyncError::validation("requires a type attribute as a string"))?;

    if let Some(object) = raw.pointer_mut("/data/object").and_then(Value::as_object_mut) {
        object.insert(LAST_EVENT_FIELD.to_string(), Value::from(stamp.as_millis()));
    }

    let data: EventData = raw
        .get_mut("data")
        .map(Value::take)
        .map(serde_json::from_value::<EventData>)
        .transpose()
        .map_err(|e| SyncError::validation(format!("invalid data attribute: {}", e)))?
        .ok_or_else(|| SyncError::validation("requires a data attribute as an object"))?;

    Ok(Event {
        id,
        object: raw
            .get("object")
            .and_then(Value::as_str)
            .unwrap_or("event")
            .to_string(),
        event_type,
        created: created_at,
        livemode: raw.get("livemode").and_then(Value::as_bool).unwrap_or(false),
        api_version: raw
            .get("api_version")
            .and_then(Value::as_str)
            .map(str::to_string),
        pending_webhooks: raw.get("pending_webhooks").and_then(Value::as_i64),
        request: raw.get("request").filter(|v| !v.is_null()).cloned(),
        data,
        ignore: false,
        processing: ProcessingStatus::Pending,
        error_message: None,
    })
}
