//! HTTP routes

pub mod webhook;


use axum::{middleware, routing::get, routing::post, Json, Router};
use serde_json::{json, Value};

use crate::{auth::require_admin_token, state::AppState};

/// Build the application router. Stripe routes are mounted under the
/// configured prefix.
///
/// The event audit and replay routes expose stored Stripe payloads, so they
/// require the operator token and are left off entirely when none is set.
pub fn create_router(state: AppState) -> Router {
    let mut stripe_routes = Router::new().route("/webhook", post(webhook::handle_webhook));

    if state.config.admin_token.is_some() {
        let admin_routes = Router::new()
            .route("/events", get(webhook::list_events))
            .route("/events/{id}/replay", post(webhook::replay_event))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                require_admin_token,
            ));
        stripe_routes = stripe_routes.merge(admin_routes);
    } else {
        tracing::info!("STRIPE_ADMIN_TOKEN not set - event audit and replay routes disabled");
    }

    let router = Router::new().route("/health", get(health));
    let router = if state.config.stripe_prefix.is_empty() {
        router.merge(stripe_routes)
    } else {
        router.nest(&state.config.stripe_prefix, stripe_routes)
    };

    router.with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
