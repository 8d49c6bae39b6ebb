//! Environment-driven service configuration.
//!
//! Secrets are mandatory: the service refuses to start without the
//! merchant credentials and passphrases rather than running with a
//! signing configuration the gateway would reject.

use aps::{FlowCredentials, GatewayConfig, PassphraseSet};

/// Everything the storefront binary needs to start.
pub struct ServiceConfig {
    pub gateway: GatewayConfig,
    pub port: u16,
    pub rate_limit_rpm: u64,
    pub allowed_origins: Vec<String>,
    pub metrics_token: Option<Vec<u8>>,
    pub cart_url: String,
    pub confirmation_url: String,
}

fn required(name: &str) -> String {
    match std::env::var(name).ok().filter(|s| !s.is_empty()) {
        Some(value) => value,
        None => {
            tracing::error!("{name} is required — refusing to start without it");
            std::process::exit(1);
        }
    }
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

impl ServiceConfig {
    /// Read the full configuration from the environment. Apple Pay
    /// credentials fall back to the card credentials when the merchant
    /// uses a single credential set for both.
    pub fn from_env() -> Self {
        let card = FlowCredentials {
            access_code: required("APS_ACCESS_CODE"),
            passphrases: PassphraseSet {
                request: required("APS_SHA_REQUEST_PHRASE"),
                response: required("APS_SHA_RESPONSE_PHRASE"),
            },
            sha_type: optional("APS_SHA_TYPE").unwrap_or_else(|| "SHA-256".to_string()),
        };

        let apple_pay = FlowCredentials {
            access_code: optional("APS_APPLE_PAY_ACCESS_CODE")
                .unwrap_or_else(|| card.access_code.clone()),
            passphrases: PassphraseSet {
                request: optional("APS_APPLE_PAY_SHA_REQUEST_PHRASE")
                    .unwrap_or_else(|| card.passphrases.request.clone()),
                response: optional("APS_APPLE_PAY_SHA_RESPONSE_PHRASE")
                    .unwrap_or_else(|| card.passphrases.response.clone()),
            },
            sha_type: optional("APS_APPLE_PAY_SHA_TYPE")
                .unwrap_or_else(|| card.sha_type.clone()),
        };

        let gateway = GatewayConfig {
            merchant_identifier: required("APS_MERCHANT_IDENTIFIER"),
            gateway_url: required("APS_GATEWAY_URL"),
            command: optional("APS_PAYMENT_COMMAND").unwrap_or_else(|| "PURCHASE".to_string()),
            return_url: required("APS_RETURN_URL"),
            card,
            apple_pay,
            send_plugin_metadata: std::env::var("APS_SEND_PLUGIN_METADATA")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        };

        if let Err(e) = gateway.validate() {
            tracing::error!("invalid gateway configuration: {e}");
            std::process::exit(1);
        }

        let port: u16 = optional("PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(4080);

        let rate_limit_rpm: u64 = optional("RATE_LIMIT_RPM")
            .and_then(|r| r.parse().ok())
            .unwrap_or(120);

        let allowed_origins: Vec<String> = optional("ALLOWED_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let metrics_token = optional("METRICS_TOKEN").map(|s| s.into_bytes());
        if metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set — /metrics will refuse requests");
        }

        ServiceConfig {
            gateway,
            port,
            rate_limit_rpm,
            allowed_origins,
            metrics_token,
            cart_url: optional("CART_URL")
                .unwrap_or_else(|| "https://localhost/cart".to_string()),
            confirmation_url: optional("CONFIRMATION_URL")
                .unwrap_or_else(|| "https://localhost/order-confirmation".to_string()),
        }
    }
}
