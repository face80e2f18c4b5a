//! Event type routing
//!
//! Routing is a pure function of `(event type, embedded object)`: [`route`]
//! decides what to do and [`Dispatcher`] does it. Unknown event types are
//! acknowledged rather than rejected so new Stripe event types never cause
//! redelivery storms.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::{SyncError, SyncResult};
use crate::hooks::{EventHooks, HookContext};
use crate::model::{DomainRecord, Event, ObjectKind};
use crate::reconcile::{RecordChange, Reconciler};

macro_rules! event_types {
    ($($variant:ident => $name:literal,)+) => {
        /// Stripe event types this engine knows how to route
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum EventType {
            $($variant,)+
            /// Anything else Stripe sends; acknowledged and ignored
            Unknown(String),
        }

        impl EventType {
            /// Every known event type
            pub const ALL: &'static [EventType] = &[$(EventType::$variant,)+];

            pub fn parse(s: &str) -> Self {
                match s {
                    $($name => EventType::$variant,)+
                    other => EventType::Unknown(other.to_string()),
                }
            }

            pub fn as_str(&self) -> &str {
                match self {
                    $(EventType::$variant => $name,)+
                    EventType::Unknown(other) => other,
                }
            }
        }
    };
}

event_types! {
    Ping => "ping",
    AccountUpdated => "account.updated",
    AccountApplicationDeauthorized => "account.application.deauthorized",
    AccountExternalAccountCreated => "account.external_account.created",
    AccountExternalAccountUpdated => "account.external_account.updated",
    AccountExternalAccountDeleted => "account.external_account.deleted",
    ApplicationFeeCreated => "application_fee.created",
    ApplicationFeeRefunded => "application_fee.refunded",
    ApplicationFeeRefundUpdated => "application_fee.refund.updated",
    BalanceAvailable => "balance.available",
    BitcoinReceiverCreated => "bitcoin.receiver.created",
    BitcoinReceiverFilled => "bitcoin.receiver.filled",
    BitcoinReceiverUpdated => "bitcoin.receiver.updated",
    BitcoinReceiverTransactionCreated => "bitcoin.receiver.transaction.created",
    ChargeCaptured => "charge.captured",
    ChargeFailed => "charge.failed",
    ChargePending => "charge.pending",
    ChargeRefunded => "charge.refunded",
    ChargeSucceeded => "charge.succeeded",
    ChargeUpdated => "charge.updated",
    ChargeDisputeClosed => "charge.dispute.closed",
    ChargeDisputeCreated => "charge.dispute.created",
    ChargeDisputeFundsReinstated => "charge.dispute.funds_reinstated",
    ChargeDisputeFundsWithdrawn => "charge.dispute.funds_withdrawn",
    ChargeDisputeUpdated => "charge.dispute.updated",
    ChargeRefundUpdated => "charge.refund.updated",
    CouponCreated => "coupon.created",
    CouponDeleted => "coupon.deleted",
    CouponUpdated => "coupon.updated",
    CustomerCreated => "customer.created",
    CustomerDeleted => "customer.deleted",
    CustomerUpdated => "customer.updated",
    CustomerBankAccountCreated => "customer.bank_account.created",
    CustomerBankAccountDeleted => "customer.bank_account.deleted",
    CustomerBankAccountUpdated => "customer.bank_account.updated",
    CustomerCardCreated => "customer.card.created",
    CustomerCardDeleted => "customer.card.deleted",
    CustomerCardUpdated => "customer.card.updated",
    CustomerDiscountCreated => "customer.discount.created",
    CustomerDiscountDeleted => "customer.discount.deleted",
    CustomerDiscountUpdated => "customer.discount.updated",
    CustomerSourceCreated => "customer.source.created",
    CustomerSourceDeleted => "customer.source.deleted",
    CustomerSourceUpdated => "customer.source.updated",
    CustomerSubscriptionCreated => "customer.subscription.created",
    CustomerSubscriptionDeleted => "customer.subscription.deleted",
    CustomerSubscriptionTrialWillEnd => "customer.subscription.trial_will_end",
    CustomerSubscriptionUpdated => "customer.subscription.updated",
    InvoiceCreated => "invoice.created",
    InvoicePaymentFailed => "invoice.payment_failed",
    InvoicePaymentSucceeded => "invoice.payment_succeeded",
    InvoiceSent => "invoice.sent",
    InvoiceUpcoming => "invoice.upcoming",
    InvoiceUpdated => "invoice.updated",
    InvoiceItemCreated => "invoiceitem.created",
    InvoiceItemDeleted => "invoiceitem.deleted",
    InvoiceItemUpdated => "invoiceitem.updated",
    OrderCreated => "order.created",
    OrderPaymentFailed => "order.payment_failed",
    OrderPaymentSucceeded => "order.payment_succeeded",
    OrderUpdated => "order.updated",
    OrderReturnCreated => "order_return.created",
    PlanCreated => "plan.created",
    PlanDeleted => "plan.deleted",
    PlanUpdated => "plan.updated",
    ProductCreated => "product.created",
    ProductDeleted => "product.deleted",
    ProductUpdated => "product.updated",
    RecipientCreated => "recipient.created",
    RecipientDeleted => "recipient.deleted",
    RecipientUpdated => "recipient.updated",
    ReviewClosed => "review.closed",
    ReviewOpened => "review.opened",
    SkuCreated => "sku.created",
    SkuDeleted => "sku.deleted",
    SkuUpdated => "sku.updated",
    SourceCanceled => "source.canceled",
    SourceChargeable => "source.chargeable",
    SourceFailed => "source.failed",
    TransferCreated => "transfer.created",
    TransferFailed => "transfer.failed",
    TransferPaid => "transfer.paid",
    TransferReversed => "transfer.reversed",
    TransferUpdated => "transfer.updated",
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Liveness check, answered without touching storage
    Ping,
    /// Unrecognized type; acknowledged, nothing persisted
    Unknown,
    /// Reconcile the embedded object into this collection
    Upsert(ObjectKind),
    /// Remove the embedded object's id from this collection
    Delete(ObjectKind),
    /// Nothing to persist; only the hook runs
    Notify,
}

/// Decide how to handle an event. `object` is the embedded `data.object`.
pub fn route(event_type: &EventType, object: &Value) -> SyncResult<Route> {
    use ObjectKind as K;

    let route = match event_type {
        EventType::Ping => Route::Ping,
        EventType::Unknown(_) => Route::Unknown,

        EventType::AccountApplicationDeauthorized
        | EventType::BalanceAvailable
        | EventType::InvoiceUpcoming => Route::Notify,

        EventType::AccountUpdated => Route::Upsert(K::Account),

        // Payment sources share one event family; the embedded object decides
        EventType::AccountExternalAccountCreated
        | EventType::AccountExternalAccountUpdated
        | EventType::CustomerSourceCreated
        | EventType::CustomerSourceUpdated => Route::Upsert(source_kind(object)?),
        EventType::AccountExternalAccountDeleted | EventType::CustomerSourceDeleted => {
            Route::Delete(source_kind(object)?)
        }

        EventType::ApplicationFeeCreated | EventType::ApplicationFeeRefunded => {
            Route::Upsert(K::ApplicationFee)
        }
        EventType::ApplicationFeeRefundUpdated => Route::Upsert(K::ApplicationFeeRefund),

        EventType::BitcoinReceiverCreated
        | EventType::BitcoinReceiverFilled
        | EventType::BitcoinReceiverUpdated
        | EventType::BitcoinReceiverTransactionCreated => Route::Upsert(K::BitcoinReceiver),

        EventType::ChargeCaptured
        | EventType::ChargeFailed
        | EventType::ChargePending
        | EventType::ChargeRefunded
        | EventType::ChargeSucceeded
        | EventType::ChargeUpdated => Route::Upsert(K::Charge),

        EventType::ChargeDisputeClosed
        | EventType::ChargeDisputeCreated
        | EventType::ChargeDisputeFundsReinstated
        | EventType::ChargeDisputeFundsWithdrawn
        | EventType::ChargeDisputeUpdated => Route::Upsert(K::Dispute),

        EventType::ChargeRefundUpdated => Route::Upsert(K::Refund),

        EventType::CouponCreated | EventType::CouponUpdated => Route::Upsert(K::Coupon),
        EventType::CouponDeleted => Route::Delete(K::Coupon),

        EventType::CustomerCreated | EventType::CustomerUpdated => Route::Upsert(K::Customer),
        EventType::CustomerDeleted => Route::Delete(K::Customer),

        EventType::CustomerBankAccountCreated | EventType::CustomerBankAccountUpdated => {
            Route::Upsert(K::BankAccount)
        }
        EventType::CustomerBankAccountDeleted => Route::Delete(K::BankAccount),

        EventType::CustomerCardCreated | EventType::CustomerCardUpdated => Route::Upsert(K::Card),
        EventType::CustomerCardDeleted => Route::Delete(K::Card),

        EventType::CustomerDiscountCreated | EventType::CustomerDiscountUpdated => {
            Route::Upsert(K::Discount)
        }
        EventType::CustomerDiscountDeleted => Route::Delete(K::Discount),

        EventType::CustomerSubscriptionCreated
        | EventType::CustomerSubscriptionTrialWillEnd
        | EventType::CustomerSubscriptionUpdated => Route::Upsert(K::Subscription),
        EventType::CustomerSubscriptionDeleted => Route::Delete(K::Subscription),

        EventType::InvoiceCreated
        | EventType::InvoicePaymentFailed
        | EventType::InvoicePaymentSucceeded
        | EventType::InvoiceSent
        | EventType::InvoiceUpdated => Route::Upsert(K::Invoice),

        EventType::InvoiceItemCreated | EventType::InvoiceItemUpdated => {
            Route::Upsert(K::InvoiceItem)
        }
        EventType::InvoiceItemDeleted => Route::Delete(K::InvoiceItem),

        EventType::OrderCreated
        | EventType::OrderPaymentFailed
        | EventType::OrderPaymentSucceeded
        | EventType::OrderUpdated => Route::Upsert(K::Order),
        EventType::OrderReturnCreated => Route::Upsert(K::OrderReturn),

        EventType::PlanCreated | EventType::PlanUpdated => Route::Upsert(K::Plan),
        EventType::PlanDeleted => Route::Delete(K::Plan),

        EventType::ProductCreated | EventType::ProductUpdated => Route::Upsert(K::Product),
        EventType::ProductDeleted => Route::Delete(K::Product),

        EventType::RecipientCreated | EventType::RecipientUpdated => Route::Upsert(K::Recipient),
        EventType::RecipientDeleted => Route::Delete(K::Recipient),

        EventType::ReviewClosed | EventType::ReviewOpened => Route::Upsert(K::Review),

        EventType::SkuCreated | EventType::SkuUpdated => Route::Upsert(K::Sku),
        EventType::SkuDeleted => Route::Delete(K::Sku),

        EventType::SourceCanceled | EventType::SourceChargeable | EventType::SourceFailed => {
            Route::Upsert(K::Source)
        }

        EventType::TransferCreated
        | EventType::TransferFailed
        | EventType::TransferPaid
        | EventType::TransferReversed
        | EventType::TransferUpdated => Route::Upsert(K::Transfer),
    };

    Ok(route)
}

/// Resolve the collection for a polymorphic payment source
fn source_kind(object: &Value) -> SyncResult<ObjectKind> {
    match object.get("object").and_then(Value::as_str) {
        Some("card") => Ok(ObjectKind::Card),
        Some("bank_account") => Ok(ObjectKind::BankAccount),
        Some("bitcoin_receiver") => Ok(ObjectKind::BitcoinReceiver),
        Some("alipay_account") => Ok(ObjectKind::AlipayAccount),
        Some(other) => Err(SyncError::UnknownSourceObject(other.to_string())),
        None => Err(SyncError::UnknownSourceObject("<missing>".to_string())),
    }
}

/// Result of dispatching one admitted event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Pong,
    /// Unknown event type, acknowledged without side effects
    Unknown { event_type: String },
    Notified { event_type: String },
    Upserted {
        change: RecordChange,
        record: DomainRecord,
    },
    /// A newer event had already been applied; `record` is the stored version
    Stale { record: DomainRecord },
    Deleted {
        kind: ObjectKind,
        id: String,
        /// `None` when the record was already absent
        record: Option<DomainRecord>,
    },
    /// Redelivery of an already admitted event
    Ignored,
}

pub struct Dispatcher {
    reconciler: Reconciler,
    hooks: Arc<dyn EventHooks>,
}

impl Dispatcher {
    pub fn new(reconciler: Reconciler, hooks: Arc<dyn EventHooks>) -> Self {
        Self { reconciler, hooks }
    }

    /// Route and apply an admitted event
    pub async fn dispatch(&self, event: &Event) -> SyncResult<DispatchOutcome> {
        let event_type = EventType::parse(&event.event_type);

        let route = route(&event_type, &event.data.object).map_err(|e| {
            tracing::error!(
                event_id = %event.id,
                event_type = %event_type,
                error = %e,
                "Failed to route Stripe event"
            );
            e
        })?;

        self.execute(event, &event_type, route).await
    }

    async fn execute(
        &self,
        event: &Event,
        event_type: &EventType,
        route: Route,
    ) -> SyncResult<DispatchOutcome> {
        match route {
            Route::Ping => {
                tracing::info!(event_id = %event.id, "Received Stripe ping");
                Ok(DispatchOutcome::Pong)
            }
            Route::Unknown => {
                tracing::info!(
                    event_type = %event_type,
                    event_id = %event.id,
                    "Received unhandled Stripe event type - no handler configured"
                );
                Ok(DispatchOutcome::Unknown {
                    event_type: event_type.to_string(),
                })
            }
            Route::Notify => {
                self.run_hooks(event, event_type, RecordChange::Unchanged, None)
                    .await?;
                Ok(DispatchOutcome::Notified {
                    event_type: event_type.to_string(),
                })
            }
            Route::Upsert(kind) => {
                match self
                    .reconciler
                    .reconcile(kind, &event.id, &event.data.object)
                    .await
                {
                    Ok(reconciled) => {
                        self.run_hooks(event, event_type, reconciled.change, Some(&reconciled.record))
                            .await?;
                        Ok(DispatchOutcome::Upserted {
                            change: reconciled.change,
                            record: reconciled.record,
                        })
                    }
                    Err(SyncError::StaleEvent(existing)) => Ok(DispatchOutcome::Stale {
                        record: *existing,
                    }),
                    Err(e) => Err(e),
                }
            }
            Route::Delete(kind) => {
                let id = event.object_id().filter(|id| !id.is_empty()).ok_or_else(|| {
                    SyncError::validation("requires a data.object.id attribute as a string")
                })?;

                let removed = self.reconciler.remove(kind, &event.id, id).await?;
                let change = if removed.is_some() {
                    RecordChange::Deleted
                } else {
                    RecordChange::Unchanged
                };
                self.run_hooks(event, event_type, change, removed.as_ref())
                    .await?;

                Ok(DispatchOutcome::Deleted {
                    kind,
                    id: id.to_string(),
                    record: removed,
                })
            }
        }
    }

    async fn run_hooks(
        &self,
        event: &Event,
        event_type: &EventType,
        change: RecordChange,
        record: Option<&DomainRecord>,
    ) -> SyncResult<()> {
        self.hooks
            .after_event(HookContext {
                event,
                event_type,
                change,
                record,
            })
            .await
            .map_err(|e| {
                tracing::error!(
                    event_id = %event.id,
                    event_type = %event_type,
                    error = %e,
                    "Post-event hook failed"
                );
                e
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_parse_roundtrip() {
        for event_type in EventType::ALL {
            assert_eq!(&EventType::parse(event_type.as_str()), event_type);
        }
        assert_eq!(
            EventType::parse("issuing_card.created"),
            EventType::Unknown("issuing_card.created".to_string())
        );
    }

    #[test]
    fn test_table_is_wide() {
        assert!(EventType::ALL.len() >= 80);
    }

    #[test]
    fn test_every_known_type_has_a_concrete_route() {
        let card = json!({"id": "card_1", "object": "card"});
        for event_type in EventType::ALL {
            let route = route(event_type, &card).unwrap();
            if *event_type == EventType::Ping {
                assert_eq!(route, Route::Ping);
            } else {
                assert_ne!(route, Route::Unknown, "{} fell through", event_type);
                assert_ne!(route, Route::Ping, "{} routed as ping", event_type);
            }
        }
    }

    #[test]
    fn test_unknown_type_routes_to_default() {
        let route = route(&EventType::parse("radar.early_fraud_warning.created"), &json!({}));
        assert_eq!(route.unwrap(), Route::Unknown);
    }

    #[test]
    fn test_delete_class_types() {
        let obj = json!({"id": "x"});
        let cases = [
            ("customer.card.deleted", ObjectKind::Card),
            ("coupon.deleted", ObjectKind::Coupon),
            ("customer.deleted", ObjectKind::Customer),
            ("customer.discount.deleted", ObjectKind::Discount),
            ("invoiceitem.deleted", ObjectKind::InvoiceItem),
            ("plan.deleted", ObjectKind::Plan),
            ("recipient.deleted", ObjectKind::Recipient),
            ("customer.subscription.deleted", ObjectKind::Subscription),
        ];
        for (name, kind) in cases {
            assert_eq!(
                route(&EventType::parse(name), &obj).unwrap(),
                Route::Delete(kind),
                "{}",
                name
            );
        }
    }

    #[test]
    fn test_notify_only_types() {
        for name in ["balance.available", "account.application.deauthorized", "invoice.upcoming"] {
            assert_eq!(
                route(&EventType::parse(name), &json!({})).unwrap(),
                Route::Notify
            );
        }
        assert_eq!(
            route(&EventType::AccountUpdated, &json!({"id": "acct_1"})).unwrap(),
            Route::Upsert(ObjectKind::Account)
        );
    }

    #[test]
    fn test_source_discriminator() {
        let created = EventType::CustomerSourceCreated;
        assert_eq!(
            route(&created, &json!({"object": "card"})).unwrap(),
            Route::Upsert(ObjectKind::Card)
        );
        assert_eq!(
            route(&created, &json!({"object": "bitcoin_receiver"})).unwrap(),
            Route::Upsert(ObjectKind::BitcoinReceiver)
        );
        assert_eq!(
            route(&created, &json!({"object": "bank_account"})).unwrap(),
            Route::Upsert(ObjectKind::BankAccount)
        );
        assert_eq!(
            route(&EventType::CustomerSourceDeleted, &json!({"object": "card"})).unwrap(),
            Route::Delete(ObjectKind::Card)
        );
    }

    #[test]
    fn test_unrecognized_source_is_an_error() {
        let err = route(
            &EventType::CustomerSourceCreated,
            &json!({"object": "ach_credit_transfer"}),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::UnknownSourceObject(ref o) if o == "ach_credit_transfer"));
        assert!(!err.is_client_error());

        assert!(route(&EventType::CustomerSourceUpdated, &json!({})).is_err());
    }

    #[test]
    fn test_routing_is_deterministic() {
        let obj = json!({"id": "ch_1", "object": "charge"});
        let a = route(&EventType::ChargeSucceeded, &obj).unwrap();
        let b = route(&EventType::ChargeSucceeded, &obj).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = DispatchOutcome::Unknown {
            event_type: "x.y".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"result": "unknown", "event_type": "x.y"})
        );
        assert_eq!(
            serde_json::to_value(DispatchOutcome::Pong).unwrap(),
            json!({"result": "pong"})
        );
    }
}
