//! Remote verification of events against Stripe

use std::time::Duration;

use async_trait::async_trait;
use stripe::{EventId, StripeError};
use thiserror::Error;

use crate::client::StripeClient;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("not found on Stripe: {0}")]
    NotFound(String),

    #[error("verification of {id} timed out after {timeout:?}")]
    Timeout { id: String, timeout: Duration },

    #[error("{0}")]
    Api(String),
}

/// Confirms that an id genuinely exists on the remote platform
#[async_trait]
pub trait RemoteVerifier: Send + Sync {
    async fn retrieve(&self, id: &str) -> Result<(), VerifyError>;
}

/// Verifier backed by `GET /v1/events/{id}`
#[derive(Clone)]
pub struct StripeVerifier {
    stripe: StripeClient,
    timeout: Duration,
}

impl StripeVerifier {
    pub fn new(stripe: StripeClient) -> Self {
        let timeout = stripe.config().verify_timeout;
        Self { stripe, timeout }
    }
}

#[async_trait]
impl RemoteVerifier for StripeVerifier {
    async fn retrieve(&self, id: &str) -> Result<(), VerifyError> {
        let event_id = id
            .parse::<EventId>()
            .map_err(|_| VerifyError::NotFound(id.to_string()))?;

        let fetch = stripe::Event::retrieve(self.stripe.inner(), &event_id, &[]);
        match tokio::time::timeout(self.timeout, fetch).await {
            Err(_) => {
                tracing::warn!(event_id = %id, timeout = ?self.timeout, "Stripe event verification timed out");
                Err(VerifyError::Timeout {
                    id: id.to_string(),
                    timeout: self.timeout,
                })
            }
            Ok(Ok(_)) => Ok(()),
            Ok(Err(StripeError::Stripe(request_error))) if request_error.http_status == 404 => {
                Err(VerifyError::NotFound(id.to_string()))
            }
            Ok(Err(e)) => {
                tracing::error!(event_id = %id, error = %e, "Stripe event verification failed");
                Err(VerifyError::Api(e.to_string()))
            }
        }
    }
}
