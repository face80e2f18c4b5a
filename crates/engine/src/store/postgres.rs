//! Postgres store
//!
//! Events live in `stripe_events`; every mirrored object lives in
//! `stripe_objects` keyed by (kind, id) with the Stripe payload as JSONB.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;
use time::OffsetDateTime;

use super::{EventFilter, EventStore, RecordStore, StoreError, StoreResult, EVENT_COLLECTION};
use crate::model::{DomainRecord, Event, EventData, EventStamp, ObjectKind, ProcessingStatus};

const EVENT_COLUMNS: &str = "id, event_type, created, livemode, api_version, pending_webhooks, \
     request, data, processing_result, error_message";

const RECORD_COLUMNS: &str = "kind, id, last_stripe_event, document";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to run stripe mirror migrations");
                StoreError::Backend(e.to_string())
            })
    }
}

/// Map a sqlx error, keeping unique violations distinguishable
fn map_sqlx_error(e: sqlx::Error, collection: &str, id: &str) -> StoreError {
    if let Some(db) = e.as_database_error() {
        if db.is_unique_violation() {
            return StoreError::conflict(collection, id);
        }
        tracing::error!(
            collection,
            id,
            code = ?db.code(),
            message = db.message(),
            constraint = ?db.constraint(),
            "Database query failed"
        );
    } else {
        tracing::error!(collection, id, error = ?e, "Non-database SQLx error");
    }
    StoreError::Backend(e.to_string())
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: String,
    event_type: String,
    created: OffsetDateTime,
    livemode: bool,
    api_version: Option<String>,
    pending_webhooks: Option<i64>,
    request: Option<Json<Value>>,
    data: Json<EventData>,
    processing_result: String,
    error_message: Option<String>,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let processing = row
            .processing_result
            .parse::<ProcessingStatus>()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Event {
            id: row.id,
            object: "event".to_string(),
            event_type: row.event_type,
            created: row.created,
            livemode: row.livemode,
            api_version: row.api_version,
            pending_webhooks: row.pending_webhooks,
            request: row.request.map(|Json(v)| v),
            data: row.data.0,
            ignore: false,
            processing,
            error_message: row.error_message,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    kind: String,
    id: String,
    last_stripe_event: i64,
    document: Json<Value>,
}

impl TryFrom<RecordRow> for DomainRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let kind = row
            .kind
            .parse::<ObjectKind>()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(DomainRecord {
            kind,
            id: row.id,
            last_event_timestamp: EventStamp::from_millis(row.last_stripe_event),
            document: row.document.0,
        })
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn find_event(&self, id: &str) -> StoreResult<Option<Event>> {
        let row: Option<EventRow> = sqlx::query_as(&format!(
            "SELECT {} FROM stripe_events WHERE id = $1",
            EVENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, EVENT_COLLECTION, id))?;

        row.map(Event::try_from).transpose()
    }

    async fn insert_event(&self, event: &Event) -> StoreResult<Event> {
        let row: EventRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO stripe_events
                (id, event_type, created, livemode, api_version, pending_webhooks,
                 request, data, processing_result, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(&event.id)
        .bind(&event.event_type)
        .bind(event.created)
        .bind(event.livemode)
        .bind(&event.api_version)
        .bind(event.pending_webhooks)
        .bind(event.request.as_ref().map(Json))
        .bind(Json(&event.data))
        .bind(event.processing.as_str())
        .bind(&event.error_message)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, EVENT_COLLECTION, &event.id))?;

        Event::try_from(row)
    }

    async fn update_event(&self, event: &Event) -> StoreResult<Event> {
        let row: Option<EventRow> = sqlx::query_as(&format!(
            r#"
            UPDATE stripe_events
            SET processing_result = $2, error_message = $3
            WHERE id = $1
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(&event.id)
        .bind(event.processing.as_str())
        .bind(&event.error_message)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, EVENT_COLLECTION, &event.id))?;

        row.ok_or_else(|| StoreError::not_found(EVENT_COLLECTION, &event.id))
            .and_then(Event::try_from)
    }

    async fn list_events(&self, filter: &EventFilter) -> StoreResult<Vec<Event>> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM stripe_events
            WHERE ($1::TEXT IS NULL OR processing_result = $1)
            ORDER BY received_at DESC
            LIMIT $2 OFFSET $3
            "#,
            EVENT_COLUMNS
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(i64::try_from(filter.limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(filter.offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, EVENT_COLLECTION, "*"))?;

        rows.into_iter().map(Event::try_from).collect()
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn find(&self, kind: ObjectKind, id: &str) -> StoreResult<Option<DomainRecord>> {
        let row: Option<RecordRow> = sqlx::query_as(&format!(
            "SELECT {} FROM stripe_objects WHERE kind = $1 AND id = $2",
            RECORD_COLUMNS
        ))
        .bind(kind.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, kind.as_str(), id))?;

        row.map(DomainRecord::try_from).transpose()
    }

    async fn create(&self, record: &DomainRecord) -> StoreResult<DomainRecord> {
        let row: RecordRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO stripe_objects (kind, id, last_stripe_event, document)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            RECORD_COLUMNS
        ))
        .bind(record.kind.as_str())
        .bind(&record.id)
        .bind(record.last_event_timestamp.as_millis())
        .bind(Json(&record.document))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, record.kind.as_str(), &record.id))?;

        DomainRecord::try_from(row)
    }

    async fn update(&self, record: &DomainRecord) -> StoreResult<DomainRecord> {
        let row: Option<RecordRow> = sqlx::query_as(&format!(
            r#"
            UPDATE stripe_objects
            SET last_stripe_event = $3, document = $4, updated_at = NOW()
            WHERE kind = $1 AND id = $2
            RETURNING {}
            "#,
            RECORD_COLUMNS
        ))
        .bind(record.kind.as_str())
        .bind(&record.id)
        .bind(record.last_event_timestamp.as_millis())
        .bind(Json(&record.document))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, record.kind.as_str(), &record.id))?;

        row.ok_or_else(|| StoreError::not_found(record.kind.as_str(), &record.id))
            .and_then(DomainRecord::try_from)
    }

    async fn destroy(&self, kind: ObjectKind, id: &str) -> StoreResult<Option<DomainRecord>> {
        let row: Option<RecordRow> = sqlx::query_as(&format!(
            "DELETE FROM stripe_objects WHERE kind = $1 AND id = $2 RETURNING {}",
            RECORD_COLUMNS
        ))
        .bind(kind.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(e, kind.as_str(), id))?;

        row.map(DomainRecord::try_from).transpose()
    }
}
