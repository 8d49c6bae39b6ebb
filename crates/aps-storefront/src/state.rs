use aps::{GatewayClient, GatewayConfig};

use crate::orders::SharedOrderStore;

/// Shared application state for the storefront payment service.
pub struct AppState {
    pub gateway: GatewayClient,
    pub orders: SharedOrderStore,
    /// Bearer token for the /metrics endpoint.
    pub metrics_token: Option<Vec<u8>>,
    /// Shopper destination when a payment fails or cannot be matched.
    pub cart_url: String,
    /// Shopper destination after a completed payment; `orderNo` and
    /// `token` query parameters are appended.
    pub confirmation_url: String,
}

impl AppState {
    pub fn config(&self) -> &GatewayConfig {
        self.gateway.config()
    }
}
