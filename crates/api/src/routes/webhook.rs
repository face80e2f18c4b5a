//! Stripe webhook routes

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use stripemirror_engine::{Event, EventFilter, ProcessingStatus, WebhookReceipt};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

const MAX_PAGE_SIZE: usize = 500;

/// POST {prefix}/webhook
///
/// The body is read raw so the signature can be checked against the exact
/// bytes Stripe signed.
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookReceipt>> {
    let body = std::str::from_utf8(&body)
        .map_err(|_| ApiError::Validation("request body is not valid UTF-8".to_string()))?;
    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok());

    let receipt = state.webhooks.handle_payload(body, signature).await?;
    Ok(Json(receipt))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListEventsQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// GET {prefix}/events?status=failed
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<ListEventsQuery>,
) -> ApiResult<Json<Vec<Event>>> {
    let mut filter = EventFilter::default();

    if let Some(status) = query.status.as_deref() {
        filter.status = Some(
            status
                .parse::<ProcessingStatus>()
                .map_err(|e| ApiError::Validation(e.to_string()))?,
        );
    }
    if let Some(limit) = query.limit {
        filter.limit = limit.clamp(1, MAX_PAGE_SIZE);
    }
    if let Some(offset) = query.offset {
        filter.offset = offset;
    }

    let events = state.webhooks.list_events(&filter).await?;
    Ok(Json(events))
}

/// POST {prefix}/events/{id}/replay
pub async fn replay_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<WebhookReceipt>> {
    tracing::info!(event_id = %id, "Replaying Stripe webhook event");
    let receipt = state.webhooks.replay_event(&id).await?;
    Ok(Json(receipt))
}
