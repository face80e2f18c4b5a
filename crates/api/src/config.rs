//! Server configuration

use stripemirror_engine::{StripeConfig, SyncError, SyncResult};

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";
const DEFAULT_STRIPE_PREFIX: &str = "/stripe";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    /// Postgres connection string. The in-memory store is used when unset.
    pub database_url: Option<String>,
    /// Path the Stripe routes are mounted under, e.g. `/stripe`.
    /// Empty means the routes live at the root.
    pub stripe_prefix: String,
    /// Bearer token for the event audit and replay routes.
    /// Those routes are not mounted when unset.
    pub admin_token: Option<String>,
    pub stripe: StripeConfig,
}

impl Config {
    pub fn from_env() -> SyncResult<Self> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string());

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|s| !s.is_empty());

        let stripe_prefix = normalize_prefix(
            &std::env::var("STRIPE_PREFIX").unwrap_or_else(|_| DEFAULT_STRIPE_PREFIX.to_string()),
        )?;

        let admin_token = std::env::var("STRIPE_ADMIN_TOKEN")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Ok(Self {
            bind_address,
            database_url,
            stripe_prefix,
            admin_token,
            stripe: StripeConfig::from_env()?,
        })
    }
}

/// `stripe/` -> `/stripe`, `/` -> ``
fn normalize_prefix(raw: &str) -> SyncResult<String> {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.contains(['{', '}', '*']) {
        return Err(SyncError::Config(format!(
            "STRIPE_PREFIX must be a plain path: {}",
            raw
        )));
    }
    if trimmed.is_empty() {
        Ok(String::new())
    } else {
        Ok(format!("/{}", trimmed))
    }
}
