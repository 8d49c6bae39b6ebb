//! Gateway transaction status codes.
//!
//! APS reports the outcome of every operation as a two-digit `status`
//! field. The storefront only distinguishes three classes: statuses
//! that complete an order, statuses that leave it in flight, and
//! everything else (which fails the order).

pub const AUTHORIZATION_SUCCESS: &str = "02";
pub const CAPTURE_SUCCESS: &str = "04";
pub const PURCHASE_SUCCESS: &str = "14";
pub const UNCERTAIN_TRANSACTION: &str = "15";
pub const TRANSACTION_PENDING: &str = "19";
/// 3-D Secure challenge pending; the response carries a `3ds_url`.
pub const ON_HOLD: &str = "20";

/// Statuses under which an order may be confirmed to the shopper.
pub fn is_order_complete(status: &str) -> bool {
    matches!(
        status,
        UNCERTAIN_TRANSACTION
            | PURCHASE_SUCCESS
            | ON_HOLD
            | TRANSACTION_PENDING
            | AUTHORIZATION_SUCCESS
            | CAPTURE_SUCCESS
    )
}

/// Statuses that leave the payment in flight: the order is neither
/// paid nor failed yet, and a later notification will settle it.
pub fn is_in_flight(status: &str) -> bool {
    matches!(
        status,
        ON_HOLD
            | TRANSACTION_PENDING
            | UNCERTAIN_TRANSACTION
            | AUTHORIZATION_SUCCESS
            | CAPTURE_SUCCESS
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purchase_success_is_complete_but_not_in_flight() {
        assert!(is_order_complete(PURCHASE_SUCCESS));
        assert!(!is_in_flight(PURCHASE_SUCCESS));
    }

    #[test]
    fn on_hold_is_complete_and_in_flight() {
        assert!(is_order_complete(ON_HOLD));
        assert!(is_in_flight(ON_HOLD));
    }

    #[test]
    fn failure_codes_are_neither() {
        for status in ["00", "03", "05", "13"] {
            assert!(!is_order_complete(status));
            assert!(!is_in_flight(status));
        }
    }
}
