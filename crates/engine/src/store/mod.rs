//! Record store interfaces
//!
//! The engine only performs point reads and writes keyed by id. Two back ends
//! are provided: an in-memory store for development and tests, and Postgres.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{DomainRecord, Event, ObjectKind, ProcessingStatus};

/// Errors surfaced by store back ends
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique key already present. Admission and first-insert races rely on this
    /// being distinguishable from other failures.
    #[error("{collection} {id} already exists")]
    Conflict { collection: String, id: String },

    #[error("{collection} {id} not found")]
    NotFound { collection: String, id: String },

    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    pub fn conflict(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Conflict {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Collection name used for admitted events
pub const EVENT_COLLECTION: &str = "event";

/// Listing filter for the event audit trail
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub status: Option<ProcessingStatus>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            status: None,
            limit: 100,
            offset: 0,
        }
    }
}

/// One record per received Stripe event id
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn find_event(&self, id: &str) -> StoreResult<Option<Event>>;

    /// Insert a new event. Fails with [`StoreError::Conflict`] if the id exists.
    async fn insert_event(&self, event: &Event) -> StoreResult<Event>;

    /// Persist the processing ledger (status and error message) of an event.
    /// The Stripe payload itself is immutable once admitted.
    async fn update_event(&self, event: &Event) -> StoreResult<Event>;

    /// Most recently received first
    async fn list_events(&self, filter: &EventFilter) -> StoreResult<Vec<Event>>;
}

/// One record per mirrored Stripe object, keyed by (kind, id)
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find(&self, kind: ObjectKind, id: &str) -> StoreResult<Option<DomainRecord>>;

    /// Insert a new record. Fails with [`StoreError::Conflict`] if the id exists.
    async fn create(&self, record: &DomainRecord) -> StoreResult<DomainRecord>;

    /// Replace the whole document of an existing record
    async fn update(&self, record: &DomainRecord) -> StoreResult<DomainRecord>;

    /// Remove a record, returning it if it existed
    async fn destroy(&self, kind: ObjectKind, id: &str) -> StoreResult<Option<DomainRecord>>;
}
