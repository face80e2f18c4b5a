//! Application state

use std::sync::Arc;

use stripemirror_engine::WebhookHandler;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub webhooks: Arc<WebhookHandler>,
}

impl AppState {
    pub fn new(config: Config, webhooks: WebhookHandler) -> Self {
        Self {
            config,
            webhooks: Arc::new(webhooks),
        }
    }
}
