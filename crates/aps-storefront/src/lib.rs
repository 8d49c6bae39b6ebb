//! Storefront payment service for the APS gateway.
//!
//! Exposes the payment endpoints a headless storefront calls during
//! checkout, plus the return and notification callbacks APS delivers:
//!
//! - [`routes`] — HTTP endpoints (signed form data, purchases, callbacks, metrics)
//! - [`orders`] — in-memory order store and payment-status reconciliation
//! - [`config`] — environment-driven service configuration
//! - [`state`] — shared [`AppState`](state::AppState)
//! - [`metrics`] — Prometheus metrics for callbacks and purchases

pub mod config;
pub mod metrics;
pub mod orders;
pub mod routes;
pub mod state;
