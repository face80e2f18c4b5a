//! Error types for the webhook ingestion engine

use thiserror::Error;

use crate::model::DomainRecord;
use crate::store::StoreError;

/// Errors produced while admitting, dispatching or reconciling Stripe events
#[derive(Debug, Error)]
pub enum SyncError {
    /// The inbound payload does not have the shape of a Stripe event
    #[error("{0}")]
    Validation(String),

    /// Stripe could not confirm the event
    #[error("{0}")]
    Verification(String),

    /// A newer event has already been applied to this record.
    /// Carries the stored record, which is left untouched.
    #[error("stale event for {} {}", .0.kind, .0.id)]
    StaleEvent(Box<DomainRecord>),

    /// `customer.source.*` style event with a source object we cannot route
    #[error("unknown source object: {0}")]
    UnknownSourceObject(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("Stripe API error: {0}")]
    StripeApi(String),

    /// Application hook rejected the event after the record was written
    #[error("post-event hook failed: {0}")]
    Hook(String),

    #[error("invalid webhook signature")]
    WebhookSignatureInvalid,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether the error was caused by the caller (4xx class) rather than by us
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Verification(_)
                | Self::WebhookSignatureInvalid
                | Self::NotFound(_)
        )
    }

    /// Stale events are expected under out-of-order delivery and are acknowledged
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleEvent(_))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventStamp, ObjectKind};

    #[test]
    fn test_client_error_classification() {
        assert!(SyncError::validation("requires a data attribute as an object").is_client_error());
        assert!(SyncError::Verification("event not found on remote platform".into())
            .is_client_error());
        assert!(SyncError::WebhookSignatureInvalid.is_client_error());
        assert!(!SyncError::UnknownSourceObject("ach_credit_transfer".into()).is_client_error());
        assert!(!SyncError::Store(StoreError::Backend("down".into())).is_client_error());
        assert!(!SyncError::StripeApi("timeout".into()).is_client_error());
    }

    #[test]
    fn test_validation_message_is_verbatim() {
        let err = SyncError::validation("requires a data.object attribute as an object");
        assert_eq!(err.to_string(), "requires a data.object attribute as an object");
    }

    #[test]
    fn test_stale_event_display() {
        let record = DomainRecord::new(
            ObjectKind::Charge,
            "ch_1",
            EventStamp::from_millis(5000),
            serde_json::json!({"id": "ch_1"}),
        );
        let err = SyncError::StaleEvent(Box::new(record));
        assert!(err.is_stale());
        assert_eq!(err.to_string(), "stale event for charge ch_1");
    }
}
