//! Stored shapes: admitted events and mirrored Stripe objects

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::{SyncError, SyncResult};

/// Field stamped onto every embedded Stripe object at admission.
/// Stripe itself never sends it.
pub const LAST_EVENT_FIELD: &str = "lastStripeEvent";

/// Creation time of the event that last touched a record, in milliseconds
/// since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventStamp(i64);

impl EventStamp {
    /// Convert Stripe's `created` (seconds) into a stamp.
    /// Returns `None` when the value does not fit in milliseconds.
    pub fn from_created(created_secs: i64) -> Option<Self> {
        created_secs.checked_mul(1000).map(Self)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EventStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Every Stripe object type mirrored locally.
/// The string form is the collection name in the record stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Account,
    AlipayAccount,
    ApplicationFee,
    ApplicationFeeRefund,
    BankAccount,
    BitcoinReceiver,
    Card,
    Charge,
    Coupon,
    Customer,
    Discount,
    Dispute,
    Invoice,
    InvoiceItem,
    Order,
    OrderReturn,
    Plan,
    Product,
    Recipient,
    Refund,
    Review,
    Sku,
    Source,
    Subscription,
    Transfer,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 25] = [
        ObjectKind::Account,
        ObjectKind::AlipayAccount,
        ObjectKind::ApplicationFee,
        ObjectKind::ApplicationFeeRefund,
        ObjectKind::BankAccount,
        ObjectKind::BitcoinReceiver,
        ObjectKind::Card,
        ObjectKind::Charge,
        ObjectKind::Coupon,
        ObjectKind::Customer,
        ObjectKind::Discount,
        ObjectKind::Dispute,
        ObjectKind::Invoice,
        ObjectKind::InvoiceItem,
        ObjectKind::Order,
        ObjectKind::OrderReturn,
        ObjectKind::Plan,
        ObjectKind::Product,
        ObjectKind::Recipient,
        ObjectKind::Refund,
        ObjectKind::Review,
        ObjectKind::Sku,
        ObjectKind::Source,
        ObjectKind::Subscription,
        ObjectKind::Transfer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Account => "account",
            ObjectKind::AlipayAccount => "alipay_account",
            ObjectKind::ApplicationFee => "application_fee",
            ObjectKind::ApplicationFeeRefund => "application_fee_refund",
            ObjectKind::BankAccount => "bank_account",
            ObjectKind::BitcoinReceiver => "bitcoin_receiver",
            ObjectKind::Card => "card",
            ObjectKind::Charge => "charge",
            ObjectKind::Coupon => "coupon",
            ObjectKind::Customer => "customer",
            ObjectKind::Discount => "discount",
            ObjectKind::Dispute => "dispute",
            ObjectKind::Invoice => "invoice",
            ObjectKind::InvoiceItem => "invoice_item",
            ObjectKind::Order => "order",
            ObjectKind::OrderReturn => "order_return",
            ObjectKind::Plan => "plan",
            ObjectKind::Product => "product",
            ObjectKind::Recipient => "recipient",
            ObjectKind::Refund => "refund",
            ObjectKind::Review => "review",
            ObjectKind::Sku => "sku",
            ObjectKind::Source => "source",
            ObjectKind::Subscription => "subscription",
            ObjectKind::Transfer => "transfer",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ObjectKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SyncError::validation(format!("unknown object kind: {}", s)))
    }
}

/// Where an admitted event is in its processing lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    Processed,
    /// Acknowledged but discarded because a newer event was already applied
    Stale,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processed => "processed",
            ProcessingStatus::Stale => "stale",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "processed" => Ok(ProcessingStatus::Processed),
            "stale" => Ok(ProcessingStatus::Stale),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(SyncError::validation(format!(
                "unknown processing status: {}",
                other
            ))),
        }
    }
}

/// `data` block of a Stripe event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub object: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_attributes: Option<Value>,
}

/// An admitted Stripe event.
///
/// Serializes back to Stripe's wire shape (`created` in Unix seconds) with the
/// local `ignore` flag and processing ledger alongside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub object: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(with = "time::serde::timestamp")]
    pub created: OffsetDateTime,
    #[serde(default)]
    pub livemode: bool,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub pending_webhooks: Option<i64>,
    #[serde(default)]
    pub request: Option<Value>,
    pub data: EventData,
    /// Set when this delivery duplicates an already admitted event
    #[serde(default)]
    pub ignore: bool,
    #[serde(default)]
    pub processing: ProcessingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Event {
    /// Stamp used for ordering updates caused by this event
    pub fn stamp(&self) -> EventStamp {
        EventStamp::from_millis(self.created.unix_timestamp().saturating_mul(1000))
    }

    /// `data.object.object`, Stripe's type discriminator for the embedded object
    pub fn object_type(&self) -> Option<&str> {
        self.data.object.get("object").and_then(Value::as_str)
    }

    /// `data.object.id`
    pub fn object_id(&self) -> Option<&str> {
        self.data.object.get("id").and_then(Value::as_str)
    }
}

/// Local mirror of one Stripe object.
///
/// `last_event_timestamp` is reconciliation metadata: the creation time of the
/// most recent event applied to this record. It never decreases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainRecord {
    pub kind: ObjectKind,
    pub id: String,
    pub last_event_timestamp: EventStamp,
    pub document: Value,
}

impl DomainRecord {
    /// Build a record, keeping the document's `lastStripeEvent` in step with
    /// the metadata field.
    pub fn new(kind: ObjectKind, id: impl Into<String>, stamp: EventStamp, mut document: Value) -> Self {
        if let Some(fields) = document.as_object_mut() {
            fields.insert(LAST_EVENT_FIELD.to_string(), Value::from(stamp.as_millis()));
        }
        Self {
            kind,
            id: id.into(),
            last_event_timestamp: stamp,
            document,
        }
    }

    /// Build a record from an admitted (stamped) Stripe object
    pub fn from_payload(kind: ObjectKind, payload: &Value) -> SyncResult<Self> {
        let id = payload
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SyncError::validation("requires a data.object.id attribute as a string"))?;

        let stamp = payload
            .get(LAST_EVENT_FIELD)
            .and_then(Value::as_i64)
            .map(EventStamp::from_millis)
            .ok_or_else(|| {
                SyncError::validation(format!("requires a {} attribute", LAST_EVENT_FIELD))
            })?;

        Ok(Self::new(kind, id, stamp, payload.clone()))
    }

    /// True when this record has already absorbed an event newer than `stamp`
    pub fn supersedes(&self, stamp: EventStamp) -> bool {
        self.last_event_timestamp > stamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stamp_from_created_seconds() {
        let stamp = EventStamp::from_created(1_467_152_498).unwrap();
        assert_eq!(stamp.as_millis(), 1_467_152_498_000);
    }

    #[test]
    fn test_stamp_overflow_rejected() {
        assert!(EventStamp::from_created(i64::MAX).is_none());
    }

    #[test]
    fn test_object_kind_string_roundtrip() {
        for kind in ObjectKind::ALL {
            assert_eq!(kind.as_str().parse::<ObjectKind>().unwrap(), kind);
            let serialized = serde_json::to_value(kind).unwrap();
            assert_eq!(serialized, json!(kind.as_str()));
        }
        assert!("widget".parse::<ObjectKind>().is_err());
    }

    #[test]
    fn test_record_from_payload() {
        let payload = json!({"id": "cus_1", "object": "customer", "lastStripeEvent": 4000});
        let record = DomainRecord::from_payload(ObjectKind::Customer, &payload).unwrap();
        assert_eq!(record.id, "cus_1");
        assert_eq!(record.last_event_timestamp, EventStamp::from_millis(4000));
        assert_eq!(record.document, payload);
    }

    #[test]
    fn test_record_from_payload_requires_id() {
        let missing = json!({"object": "customer", "lastStripeEvent": 4000});
        assert!(DomainRecord::from_payload(ObjectKind::Customer, &missing).is_err());

        let empty = json!({"id": "", "lastStripeEvent": 4000});
        assert!(DomainRecord::from_payload(ObjectKind::Customer, &empty).is_err());
    }

    #[test]
    fn test_record_from_payload_requires_stamp() {
        let payload = json!({"id": "cus_1"});
        assert!(DomainRecord::from_payload(ObjectKind::Customer, &payload).is_err());
    }

    #[test]
    fn test_new_keeps_document_stamp_in_step() {
        let record = DomainRecord::new(
            ObjectKind::Plan,
            "gold",
            EventStamp::from_millis(7000),
            json!({"id": "gold", "lastStripeEvent": 1}),
        );
        assert_eq!(record.document["lastStripeEvent"], json!(7000));
    }

    #[test]
    fn test_supersedes_is_strict() {
        let record = DomainRecord::new(
            ObjectKind::Charge,
            "ch_1",
            EventStamp::from_millis(5000),
            json!({"id": "ch_1"}),
        );
        assert!(record.supersedes(EventStamp::from_millis(4000)));
        assert!(!record.supersedes(EventStamp::from_millis(5000)));
        assert!(!record.supersedes(EventStamp::from_millis(6000)));
    }

    #[test]
    fn test_event_wire_shape() {
        let raw = json!({
            "id": "evt_1",
            "object": "event",
            "type": "charge.succeeded",
            "created": 1000,
            "livemode": false,
            "api_version": "2016-06-15",
            "pending_webhooks": 0,
            "request": "req_1",
            "data": {"object": {"id": "ch_1", "object": "charge"}}
        });
        let event: Event = serde_json::from_value(raw).unwrap();
        assert_eq!(event.stamp(), EventStamp::from_millis(1_000_000));
        assert_eq!(event.object_type(), Some("charge"));
        assert_eq!(event.object_id(), Some("ch_1"));
        assert!(!event.ignore);
        assert_eq!(event.processing, ProcessingStatus::Pending);

        let back = serde_json::to_value(&event).unwrap();
        assert_eq!(back["created"], json!(1000));
        assert_eq!(back["type"], json!("charge.succeeded"));
    }
}
