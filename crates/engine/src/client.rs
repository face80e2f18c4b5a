//! Stripe client configuration

use std::time::Duration;

use crate::error::{SyncError, SyncResult};

const DEFAULT_VERIFY_TIMEOUT_SECS: u64 = 10;

/// Stripe settings consumed by the engine
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    /// `whsec_...` signing secret. Signature checks are skipped when unset.
    pub webhook_secret: Option<String>,
    /// Confirm each event with Stripe before applying it
    pub validate_events: bool,
    /// Upper bound on a single verification call
    pub verify_timeout: Duration,
}

impl StripeConfig {
    /// Load from `STRIPE_SECRET`, `STRIPE_WEBHOOK_SECRET`, `STRIPE_VALIDATE`
    /// and `STRIPE_VERIFY_TIMEOUT_SECS`
    pub fn from_env() -> SyncResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET")
            .map_err(|_| SyncError::Config("STRIPE_SECRET not set".to_string()))?;

        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty());

        let validate_events = std::env::var("STRIPE_VALIDATE")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);

        let verify_timeout = match std::env::var("STRIPE_VERIFY_TIMEOUT_SECS") {
            Ok(v) => v.parse::<u64>().map(Duration::from_secs).map_err(|_| {
                SyncError::Config(format!("STRIPE_VERIFY_TIMEOUT_SECS is not a number: {}", v))
            })?,
            Err(_) => Duration::from_secs(DEFAULT_VERIFY_TIMEOUT_SECS),
        };

        Ok(Self {
            secret_key,
            webhook_secret,
            validate_events,
            verify_timeout,
        })
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Explicitly constructed Stripe API handle, shared by cloning
#[derive(Clone)]
pub struct StripeClient {
    inner: stripe::Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let inner = stripe::Client::new(config.secret_key.clone());
        Self { inner, config }
    }

    pub fn from_env() -> SyncResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn inner(&self) -> &stripe::Client {
        &self.inner
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "STRIPE_SECRET",
            "STRIPE_WEBHOOK_SECRET",
            "STRIPE_VALIDATE",
            "STRIPE_VERIFY_TIMEOUT_SECS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag("TRUE"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }

    #[test]
    #[serial]
    fn test_from_env_requires_secret() {
        clear_env();
        assert!(matches!(StripeConfig::from_env(), Err(SyncError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        std::env::set_var("STRIPE_SECRET", "sk_test_123");

        let config = StripeConfig::from_env().unwrap();
        assert_eq!(config.secret_key, "sk_test_123");
        assert!(config.webhook_secret.is_none());
        assert!(!config.validate_events);
        assert_eq!(config.verify_timeout, Duration::from_secs(10));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var("STRIPE_SECRET", "sk_test_123");
        std::env::set_var("STRIPE_WEBHOOK_SECRET", "whsec_abc");
        std::env::set_var("STRIPE_VALIDATE", "true");
        std::env::set_var("STRIPE_VERIFY_TIMEOUT_SECS", "3");

        let config = StripeConfig::from_env().unwrap();
        assert_eq!(config.webhook_secret.as_deref(), Some("whsec_abc"));
        assert!(config.validate_events);
        assert_eq!(config.verify_timeout, Duration::from_secs(3));

        std::env::set_var("STRIPE_VERIFY_TIMEOUT_SECS", "soon");
        assert!(StripeConfig::from_env().is_err());
        clear_env();
    }
}
