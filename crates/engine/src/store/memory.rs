//! In-memory store
//!
//! Each operation takes the lock once, so individual point operations are
//! atomic just like single statements against a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{EventFilter, EventStore, RecordStore, StoreError, StoreResult, EVENT_COLLECTION};
use crate::model::{DomainRecord, Event, ObjectKind};

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    /// event id -> (arrival sequence, event)
    events: Arc<RwLock<HashMap<String, (u64, Event)>>>,
    records: Arc<RwLock<HashMap<(ObjectKind, String), DomainRecord>>>,
    sequence: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn record_count(&self, kind: ObjectKind) -> usize {
        self.records
            .read()
            .await
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn find_event(&self, id: &str) -> StoreResult<Option<Event>> {
        Ok(self.events.read().await.get(id).map(|(_, e)| e.clone()))
    }

    async fn insert_event(&self, event: &Event) -> StoreResult<Event> {
        let mut events = self.events.write().await;
        if events.contains_key(&event.id) {
            return Err(StoreError::conflict(EVENT_COLLECTION, &event.id));
        }
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        events.insert(event.id.clone(), (seq, event.clone()));
        Ok(event.clone())
    }

    async fn update_event(&self, event: &Event) -> StoreResult<Event> {
        let mut events = self.events.write().await;
        let (_, stored) = events
            .get_mut(&event.id)
            .ok_or_else(|| StoreError::not_found(EVENT_COLLECTION, &event.id))?;
        stored.processing = event.processing;
        stored.error_message = event.error_message.clone();
        Ok(stored.clone())
    }

    async fn list_events(&self, filter: &EventFilter) -> StoreResult<Vec<Event>> {
        let events = self.events.read().await;
        let mut matching: Vec<&(u64, Event)> = events
            .values()
            .filter(|(_, e)| filter.status.map_or(true, |s| e.processing == s))
            .collect();
        matching.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .map(|(_, e)| e.clone())
            .collect())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find(&self, kind: ObjectKind, id: &str) -> StoreResult<Option<DomainRecord>> {
        Ok(self
            .records
            .read()
            .await
            .get(&(kind, id.to_string()))
            .cloned())
    }

    async fn create(&self, record: &DomainRecord) -> StoreResult<DomainRecord> {
        let mut records = self.records.write().await;
        let key = (record.kind, record.id.clone());
        if records.contains_key(&key) {
            return Err(StoreError::conflict(record.kind.as_str(), &record.id));
        }
        records.insert(key, record.clone());
        Ok(record.clone())
    }

    async fn update(&self, record: &DomainRecord) -> StoreResult<DomainRecord> {
        let mut records = self.records.write().await;
        let stored = records
            .get_mut(&(record.kind, record.id.clone()))
            .ok_or_else(|| StoreError::not_found(record.kind.as_str(), &record.id))?;
        *stored = record.clone();
        Ok(record.clone())
    }

    async fn destroy(&self, kind: ObjectKind, id: &str) -> StoreResult<Option<DomainRecord>> {
        Ok(self.records.write().await.remove(&(kind, id.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventData, EventStamp, ProcessingStatus};
    use serde_json::json;
    use time::OffsetDateTime;

    fn event(id: &str) -> Event {
        Event {
            id: id.to_string(),
            object: "event".to_string(),
            event_type: "charge.succeeded".to_string(),
            created: OffsetDateTime::UNIX_EPOCH,
            livemode: false,
            api_version: None,
            pending_webhooks: None,
            request: None,
            data: EventData {
                object: json!({"id": "ch_1"}),
                previous_attributes: None,
            },
            ignore: false,
            processing: ProcessingStatus::Pending,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_event_insert_conflicts() {
        let store = MemoryStore::new();
        store.insert_event(&event("evt_1")).await.unwrap();
        let err = store.insert_event(&event("evt_1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn test_update_event_only_touches_ledger() {
        let store = MemoryStore::new();
        store.insert_event(&event("evt_1")).await.unwrap();

        let mut changed = event("evt_1");
        changed.event_type = "charge.failed".to_string();
        changed.processing = ProcessingStatus::Failed;
        changed.error_message = Some("boom".to_string());
        let stored = store.update_event(&changed).await.unwrap();

        assert_eq!(stored.event_type, "charge.succeeded");
        assert_eq!(stored.processing, ProcessingStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_list_events_newest_first_with_filter() {
        let store = MemoryStore::new();
        for id in ["evt_1", "evt_2", "evt_3"] {
            store.insert_event(&event(id)).await.unwrap();
        }
        let mut failed = event("evt_2");
        failed.processing = ProcessingStatus::Failed;
        store.update_event(&failed).await.unwrap();

        let all = store.list_events(&EventFilter::default()).await.unwrap();
        let ids: Vec<_> = all.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["evt_3", "evt_2", "evt_1"]);

        let only_failed = store
            .list_events(&EventFilter {
                status: Some(ProcessingStatus::Failed),
                ..EventFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(only_failed.len(), 1);
        assert_eq!(only_failed[0].id, "evt_2");

        let paged = store
            .list_events(&EventFilter {
                status: None,
                limit: 1,
                offset: 1,
            })
            .await
            .unwrap();
        assert_eq!(paged[0].id, "evt_2");
    }

    #[tokio::test]
    async fn test_records_are_keyed_by_kind_and_id() {
        let store = MemoryStore::new();
        let card = DomainRecord::new(
            ObjectKind::Card,
            "x_1",
            EventStamp::from_millis(1),
            json!({"id": "x_1"}),
        );
        let charge = DomainRecord::new(
            ObjectKind::Charge,
            "x_1",
            EventStamp::from_millis(1),
            json!({"id": "x_1"}),
        );
        store.create(&card).await.unwrap();
        store.create(&charge).await.unwrap();

        assert_eq!(store.record_count(ObjectKind::Card).await, 1);
        assert_eq!(store.record_count(ObjectKind::Charge).await, 1);
        assert!(matches!(
            store.create(&card).await.unwrap_err(),
            StoreError::Conflict { .. }
        ));
    }

    #[tokio::test]
    async fn test_update_missing_record_is_not_found() {
        let store = MemoryStore::new();
        let record = DomainRecord::new(
            ObjectKind::Plan,
            "gold",
            EventStamp::from_millis(1),
            json!({"id": "gold"}),
        );
        let err = store.update(&record).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_destroy_absent_returns_none() {
        let store = MemoryStore::new();
        assert!(store
            .destroy(ObjectKind::Coupon, "missing")
            .await
            .unwrap()
            .is_none());
    }
}
