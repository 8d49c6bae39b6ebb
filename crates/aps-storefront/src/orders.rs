//! Order state and callback reconciliation.
//!
//! The commerce platform's order machinery is external; this module
//! models the narrow slice the payment integration reads and writes
//! behind the [`OrderStore`] trait, with an in-memory implementation
//! for tests and standalone operation.
//!
//! Reconciliation never runs on unverified data: both entry points
//! take a [`VerifiedCallback`], so a forged notification cannot reach
//! any state mutation.

use std::sync::Arc;

use aps::{status, VerifiedCallback};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    NotPaid,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    Created,
    Placed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct OrderNote {
    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Order {
    pub order_no: String,
    /// Opaque token echoed on the confirmation redirect.
    pub order_token: String,
    pub amount: Decimal,
    pub currency: String,
    pub customer_email: String,
    pub language: String,
    pub state: OrderState,
    pub payment_status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub notes: Vec<OrderNote>,
}

impl Order {
    pub fn new(
        order_no: impl Into<String>,
        order_token: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
        customer_email: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Order {
            order_no: order_no.into(),
            order_token: order_token.into(),
            amount,
            currency: currency.into(),
            customer_email: customer_email.into(),
            language: language.into(),
            state: OrderState::Created,
            payment_status: PaymentStatus::NotPaid,
            transaction_id: None,
            notes: Vec::new(),
        }
    }

    /// Request-scoped view handed to the request builders.
    pub fn payment_order(&self) -> aps::PaymentOrder {
        aps::PaymentOrder {
            order_no: self.order_no.clone(),
            amount: self.amount,
            currency: self.currency.clone(),
            customer_email: self.customer_email.clone(),
            language: self.language.clone(),
        }
    }

    fn add_note(&mut self, subject: &str, body: String) {
        self.notes.push(OrderNote {
            subject: subject.to_string(),
            body,
            created_at: Utc::now(),
        });
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrderStoreError {
    #[error("order not found: {0}")]
    NotFound(String),
    /// A concurrent writer beat us to the order. Retried a bounded
    /// number of times by [`update_with_retry`].
    #[error("write conflict on order {0}")]
    Conflict(String),
}

/// The platform's order read-write surface, as far as payments care.
pub trait OrderStore: Send + Sync {
    fn get(&self, order_no: &str) -> Option<Order>;
    fn insert(&self, order: Order);
    fn update(
        &self,
        order_no: &str,
        apply: &mut dyn FnMut(&mut Order),
    ) -> Result<(), OrderStoreError>;
}

/// In-memory store. Updates through `DashMap` are atomic per order,
/// so this implementation never reports a conflict.
#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: DashMap<String, Order>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrderStore for InMemoryOrderStore {
    fn get(&self, order_no: &str) -> Option<Order> {
        self.orders.get(order_no).map(|entry| entry.clone())
    }

    fn insert(&self, order: Order) {
        self.orders.insert(order.order_no.clone(), order);
    }

    fn update(
        &self,
        order_no: &str,
        apply: &mut dyn FnMut(&mut Order),
    ) -> Result<(), OrderStoreError> {
        let mut entry = self
            .orders
            .get_mut(order_no)
            .ok_or_else(|| OrderStoreError::NotFound(order_no.to_string()))?;
        apply(&mut entry);
        Ok(())
    }
}

const MAX_UPDATE_ATTEMPTS: u32 = 10;

/// Apply an order update, retrying on write conflicts. Real platform
/// backends use optimistic locking; a conflict just means another
/// callback for the same order landed first.
pub fn update_with_retry(
    store: &dyn OrderStore,
    order_no: &str,
    apply: &mut dyn FnMut(&mut Order),
) -> Result<(), OrderStoreError> {
    let mut attempts = 0;
    loop {
        match store.update(order_no, apply) {
            Err(OrderStoreError::Conflict(_)) if attempts < MAX_UPDATE_ATTEMPTS => {
                attempts += 1;
                tracing::warn!(order_no, attempts, "retrying order update after conflict");
            }
            other => return other,
        }
    }
}

/// Where to send the shopper after a redirect callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectOutcome {
    /// Order may be confirmed; redirect to the confirmation page.
    Confirmed { order_no: String, order_token: String },
    /// Payment failed; back to the cart.
    Failed,
    /// Unknown order; back to the cart, nothing to mutate.
    Unknown,
}

/// Reconcile a verified redirect callback into order state.
///
/// A not-yet-paid, not-failed order is placed and marked paid on
/// purchase success, failed on a terminal failure status, and left
/// untouched while the payment is still in flight (a notification
/// will settle it).
pub fn reconcile_redirect(
    store: &dyn OrderStore,
    callback: &VerifiedCallback,
) -> RedirectOutcome {
    let Some(order) = store.get(&callback.merchant_reference) else {
        tracing::warn!(
            merchant_reference = %callback.merchant_reference,
            "redirect callback for unknown order"
        );
        return RedirectOutcome::Unknown;
    };

    if order.payment_status == PaymentStatus::NotPaid && order.state != OrderState::Failed {
        if callback.status == status::PURCHASE_SUCCESS {
            let transaction_id = callback.transaction_id.clone();
            let result = update_with_retry(store, &order.order_no, &mut |order| {
                order.state = OrderState::Placed;
                order.payment_status = PaymentStatus::Paid;
                order.transaction_id = transaction_id.clone();
            });
            if let Err(e) = result {
                tracing::error!(order_no = %order.order_no, error = %e, "failed to place order");
            } else {
                tracing::info!(order_no = %order.order_no, "order placed and marked paid");
            }
        } else if !status::is_in_flight(&callback.status) {
            let result = update_with_retry(store, &order.order_no, &mut |order| {
                order.state = OrderState::Failed;
            });
            if let Err(e) = result {
                tracing::error!(order_no = %order.order_no, error = %e, "failed to fail order");
            } else {
                tracing::info!(
                    order_no = %order.order_no,
                    status = %callback.status,
                    "order failed on terminal payment status"
                );
            }
        }
    }

    if status::is_order_complete(&callback.status) {
        RedirectOutcome::Confirmed {
            order_no: order.order_no,
            order_token: order.order_token,
        }
    } else {
        RedirectOutcome::Failed
    }
}

/// HTTP outcome of a webhook notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationOutcome {
    pub http_status: u16,
    pub error: Option<String>,
}

impl NotificationOutcome {
    fn ok() -> Self {
        NotificationOutcome {
            http_status: 204,
            error: None,
        }
    }

    fn failed(message: String) -> Self {
        NotificationOutcome {
            http_status: 500,
            error: Some(message),
        }
    }
}

/// Reconcile a verified direct notification into order state.
///
/// Purchase success marks the order paid and records a capture note;
/// a second notification for an already-paid order only appends the
/// note (webhook deliveries are at-least-once). Terminal failure
/// statuses fail the order; in-flight statuses change nothing.
pub fn reconcile_notification(
    store: &dyn OrderStore,
    callback: &VerifiedCallback,
) -> NotificationOutcome {
    let Some(order) = store.get(&callback.merchant_reference) else {
        tracing::warn!(
            merchant_reference = %callback.merchant_reference,
            "notification for unknown order"
        );
        return NotificationOutcome::failed(format!(
            "order not found: {}",
            callback.merchant_reference
        ));
    };

    if order.state == OrderState::Failed {
        return NotificationOutcome::ok();
    }

    if callback.status == status::PURCHASE_SUCCESS {
        let note_body = serde_json::to_string(&callback.params).unwrap_or_default();
        let transaction_id = callback.transaction_id.clone();
        let already_paid = order.payment_status == PaymentStatus::Paid;

        let result = update_with_retry(store, &order.order_no, &mut |order| {
            if !already_paid {
                order.transaction_id = transaction_id.clone();
                order.payment_status = PaymentStatus::Paid;
                order.state = OrderState::Placed;
            }
            order.add_note("aps_capture_success", note_body.clone());
        });

        match result {
            Ok(()) => NotificationOutcome::ok(),
            Err(e) => {
                tracing::error!(
                    order_no = %order.order_no,
                    error = %e,
                    "unable to update payment status from notification"
                );
                NotificationOutcome::failed(e.to_string())
            }
        }
    } else if !status::is_in_flight(&callback.status) {
        let result = update_with_retry(store, &order.order_no, &mut |order| {
            order.state = OrderState::Failed;
        });
        match result {
            Ok(()) => NotificationOutcome::ok(),
            Err(e) => NotificationOutcome::failed(e.to_string()),
        }
    } else {
        NotificationOutcome::ok()
    }
}

/// Fold a server-to-server purchase outcome (card or Apple Pay) into
/// order state, mirroring the callback rules. Only a not-yet-paid,
/// not-failed order is touched: a late gateway response must neither
/// resurrect a failed order nor rewrite an already-paid one.
pub fn apply_purchase_outcome(
    store: &dyn OrderStore,
    order_no: &str,
    outcome: &aps::PurchaseOutcome,
) {
    let Some(order) = store.get(order_no) else {
        tracing::warn!(order_no, "purchase outcome for unknown order");
        return;
    };
    if order.payment_status != PaymentStatus::NotPaid || order.state == OrderState::Failed {
        return;
    }

    if outcome.status == status::PURCHASE_SUCCESS {
        let transaction_id = outcome.transaction_id.clone();
        let result = update_with_retry(store, order_no, &mut |order| {
            order.state = OrderState::Placed;
            order.payment_status = PaymentStatus::Paid;
            order.transaction_id = transaction_id.clone();
        });
        if let Err(e) = result {
            tracing::error!(order_no, error = %e, "failed to record purchase success");
        }
    } else if !status::is_in_flight(&outcome.status) {
        let result = update_with_retry(store, order_no, &mut |order| {
            order.state = OrderState::Failed;
        });
        if let Err(e) = result {
            tracing::error!(order_no, error = %e, "failed to record purchase failure");
        }
    }
}

/// Shared handle used by the HTTP layer.
pub type SharedOrderStore = Arc<dyn OrderStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use aps::constants::SIGNATURE_FIELD;
    use aps::signature::{sign, DigestAlgorithm, SignatureParams};
    use aps::FlowCredentials;

    fn credentials() -> FlowCredentials {
        FlowCredentials {
            access_code: "A".to_string(),
            passphrases: aps::PassphraseSet {
                request: "req".to_string(),
                response: "resp".to_string(),
            },
            sha_type: "SHA-256".to_string(),
        }
    }

    fn verified(status: &str, order_no: &str) -> VerifiedCallback {
        let mut params = SignatureParams::from_iter([
            ("merchant_reference", order_no),
            ("status", status),
            ("fort_id", "169996200000"),
        ]);
        let signature = sign(&params, "resp", DigestAlgorithm::Sha256);
        params.push(SIGNATURE_FIELD, signature);
        aps::callback::verify_callback(params, &credentials()).unwrap()
    }

    fn store_with_order(order_no: &str) -> InMemoryOrderStore {
        let store = InMemoryOrderStore::new();
        store.insert(Order::new(
            order_no,
            "tok-1",
            Decimal::new(10000, 2),
            "AED",
            "shopper@example.test",
            "en",
        ));
        store
    }

    #[test]
    fn purchase_success_places_and_pays() {
        let store = store_with_order("0001");
        let outcome = reconcile_redirect(&store, &verified("14", "0001"));

        assert!(matches!(outcome, RedirectOutcome::Confirmed { .. }));
        let order = store.get("0001").unwrap();
        assert_eq!(order.state, OrderState::Placed);
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.transaction_id.as_deref(), Some("169996200000"));
    }

    #[test]
    fn terminal_failure_fails_the_order() {
        let store = store_with_order("0002");
        let outcome = reconcile_redirect(&store, &verified("13", "0002"));

        assert_eq!(outcome, RedirectOutcome::Failed);
        assert_eq!(store.get("0002").unwrap().state, OrderState::Failed);
    }

    #[test]
    fn in_flight_status_confirms_without_mutation() {
        let store = store_with_order("0003");
        let outcome = reconcile_redirect(&store, &verified("19", "0003"));

        assert!(matches!(outcome, RedirectOutcome::Confirmed { .. }));
        let order = store.get("0003").unwrap();
        assert_eq!(order.state, OrderState::Created);
        assert_eq!(order.payment_status, PaymentStatus::NotPaid);
    }

    #[test]
    fn unknown_order_is_reported() {
        let store = InMemoryOrderStore::new();
        assert_eq!(
            reconcile_redirect(&store, &verified("14", "nope")),
            RedirectOutcome::Unknown
        );
    }

    #[test]
    fn notification_success_marks_paid_and_notes() {
        let store = store_with_order("0004");
        let outcome = reconcile_notification(&store, &verified("14", "0004"));

        assert_eq!(outcome.http_status, 204);
        let order = store.get("0004").unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.notes.len(), 1);
        assert_eq!(order.notes[0].subject, "aps_capture_success");
    }

    #[test]
    fn duplicate_notification_only_appends_note() {
        let store = store_with_order("0005");
        reconcile_notification(&store, &verified("14", "0005"));
        let first = store.get("0005").unwrap();

        reconcile_notification(&store, &verified("14", "0005"));
        let second = store.get("0005").unwrap();

        assert_eq!(first.payment_status, PaymentStatus::Paid);
        assert_eq!(second.payment_status, PaymentStatus::Paid);
        assert_eq!(second.notes.len(), 2);
        assert_eq!(second.transaction_id, first.transaction_id);
    }

    #[test]
    fn notification_for_failed_order_is_acknowledged_without_mutation() {
        let store = store_with_order("0006");
        update_with_retry(&store, "0006", &mut |o| o.state = OrderState::Failed).unwrap();

        let outcome = reconcile_notification(&store, &verified("14", "0006"));
        assert_eq!(outcome.http_status, 204);
        assert_eq!(store.get("0006").unwrap().payment_status, PaymentStatus::NotPaid);
    }

    #[test]
    fn notification_for_unknown_order_is_a_server_error() {
        let store = InMemoryOrderStore::new();
        let outcome = reconcile_notification(&store, &verified("14", "missing"));
        assert_eq!(outcome.http_status, 500);
        assert!(outcome.error.is_some());
    }

    fn outcome(status: &str, transaction_id: &str) -> aps::PurchaseOutcome {
        aps::PurchaseOutcome {
            status: status.to_string(),
            transaction_id: Some(transaction_id.to_string()),
            response_message: None,
            three_ds_url: None,
            expiry_date: None,
        }
    }

    #[test]
    fn purchase_outcome_success_places_and_pays() {
        let store = store_with_order("0008");
        apply_purchase_outcome(&store, "0008", &outcome("14", "169996200001"));

        let order = store.get("0008").unwrap();
        assert_eq!(order.state, OrderState::Placed);
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.transaction_id.as_deref(), Some("169996200001"));
    }

    #[test]
    fn purchase_success_does_not_resurrect_failed_order() {
        let store = store_with_order("0009");
        update_with_retry(&store, "0009", &mut |o| o.state = OrderState::Failed).unwrap();

        apply_purchase_outcome(&store, "0009", &outcome("14", "169996200002"));

        let order = store.get("0009").unwrap();
        assert_eq!(order.state, OrderState::Failed);
        assert_eq!(order.payment_status, PaymentStatus::NotPaid);
        assert!(order.transaction_id.is_none());
    }

    #[test]
    fn duplicate_purchase_success_keeps_first_transaction_id() {
        let store = store_with_order("0010");
        apply_purchase_outcome(&store, "0010", &outcome("14", "first"));
        apply_purchase_outcome(&store, "0010", &outcome("14", "second"));

        let order = store.get("0010").unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.transaction_id.as_deref(), Some("first"));
    }

    #[test]
    fn terminal_failure_does_not_touch_paid_order() {
        let store = store_with_order("0011");
        apply_purchase_outcome(&store, "0011", &outcome("14", "first"));
        apply_purchase_outcome(&store, "0011", &outcome("13", "late"));

        let order = store.get("0011").unwrap();
        assert_eq!(order.state, OrderState::Placed);
        assert_eq!(order.payment_status, PaymentStatus::Paid);
    }

    #[test]
    fn retry_gives_up_after_bounded_conflicts() {
        struct AlwaysConflict;
        impl OrderStore for AlwaysConflict {
            fn get(&self, _: &str) -> Option<Order> {
                None
            }
            fn insert(&self, _: Order) {}
            fn update(
                &self,
                order_no: &str,
                _: &mut dyn FnMut(&mut Order),
            ) -> Result<(), OrderStoreError> {
                Err(OrderStoreError::Conflict(order_no.to_string()))
            }
        }

        let result = update_with_retry(&AlwaysConflict, "0007", &mut |_| {});
        assert!(matches!(result, Err(OrderStoreError::Conflict(_))));
    }
}
