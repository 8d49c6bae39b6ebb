//! Server-to-server purchase client for the APS gateway.
//!
//! Posts a signed parameter map as JSON and verifies the response
//! signature with the flow's *response* passphrase before any field of
//! the body is trusted.

use std::time::Duration;

use crate::callback::{self, VerifiedCallback};
use crate::config::{Flow, GatewayConfig};
use crate::error::ApsError;
use crate::signature::SignatureParams;
use crate::status;

/// Outcome of a purchase call, after response verification.
#[derive(Debug, Clone)]
pub struct PurchaseOutcome {
    pub status: String,
    /// Gateway transaction identifier (`fort_id`).
    pub transaction_id: Option<String>,
    pub response_message: Option<String>,
    /// Present when the gateway put the transaction on hold for a
    /// 3-D Secure challenge; the shopper must be redirected here.
    pub three_ds_url: Option<String>,
    /// Card expiry echoed for wallet storage, `YYMM`.
    pub expiry_date: Option<String>,
}

impl PurchaseOutcome {
    pub fn is_order_complete(&self) -> bool {
        status::is_order_complete(&self.status)
    }

    pub fn requires_3ds(&self) -> bool {
        self.status == status::ON_HOLD && self.three_ds_url.is_some()
    }

    fn from_callback(verified: VerifiedCallback) -> Self {
        PurchaseOutcome {
            status: verified.status.clone(),
            transaction_id: verified.transaction_id.clone(),
            response_message: verified.response_message.clone(),
            three_ds_url: verified.params.get_text("3ds_url").map(String::from),
            expiry_date: verified.params.get_text("expiry_date").map(String::from),
        }
    }
}

/// HTTP client for the gateway's payment API.
pub struct GatewayClient {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl GatewayClient {
    /// Build a client with the request timeout the gateway calls need.
    /// A client that cannot be built with the timeout is an error, not
    /// a client without one.
    pub fn new(config: GatewayConfig) -> Result<Self, ApsError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ApsError::Http(format!("failed to build gateway client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Send a signed purchase request and return the verified outcome.
    ///
    /// The request must already carry its `signature` field (built by
    /// `request::card_request` or `request::apple_pay_request`). The
    /// response body is parsed, its signature checked against the
    /// flow's response passphrase, and only then interpreted.
    pub async fn purchase(
        &self,
        request: &SignatureParams,
        flow: Flow,
    ) -> Result<PurchaseOutcome, ApsError> {
        let response = self
            .http
            .post(&self.config.gateway_url)
            .header("Content-Type", "application/json")
            .header("Accept", "*/*")
            .json(request)
            .send()
            .await
            .map_err(|e| ApsError::Http(format!("gateway request failed: {e}")))?;

        let http_status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApsError::Http(format!("gateway response read failed: {e}")))?;

        if body.is_empty() {
            return Err(ApsError::Http(format!(
                "empty gateway response (HTTP {http_status})"
            )));
        }

        let params = callback::params_from_json(&body)?;
        let verified = callback::verify_callback(params, self.config.credentials(flow))
            .inspect_err(|e| {
                tracing::warn!(
                    error = %e,
                    merchant_reference = request.get_text("merchant_reference").unwrap_or(""),
                    "gateway purchase response rejected"
                );
            })?;

        tracing::info!(
            merchant_reference = %verified.merchant_reference,
            status = %verified.status,
            fort_id = verified.transaction_id.as_deref().unwrap_or(""),
            "gateway purchase response verified"
        );

        Ok(PurchaseOutcome::from_callback(verified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::constants::SIGNATURE_FIELD;
    use crate::signature::{sign, DigestAlgorithm};

    fn outcome_from(status: &str, extra: &[(&str, &str)]) -> PurchaseOutcome {
        let mut params = SignatureParams::from_iter([
            ("merchant_reference", "00001234"),
            ("status", status),
        ]);
        for (k, v) in extra {
            params.push(*k, *v);
        }
        let signature = sign(&params, "card-resp", DigestAlgorithm::Sha256);
        params.push(SIGNATURE_FIELD, signature);

        let config = test_config();
        let verified = callback::verify_callback(params, &config.card).unwrap();
        PurchaseOutcome::from_callback(verified)
    }

    #[test]
    fn on_hold_with_url_requires_3ds() {
        let outcome = outcome_from("20", &[("3ds_url", "https://acs.example.test/3ds")]);
        assert!(outcome.requires_3ds());
        assert!(outcome.is_order_complete());
        assert_eq!(
            outcome.three_ds_url.as_deref(),
            Some("https://acs.example.test/3ds")
        );
    }

    #[test]
    fn purchase_success_is_complete_without_3ds() {
        let outcome = outcome_from("14", &[("fort_id", "169"), ("expiry_date", "2703")]);
        assert!(outcome.is_order_complete());
        assert!(!outcome.requires_3ds());
        assert_eq!(outcome.transaction_id.as_deref(), Some("169"));
        assert_eq!(outcome.expiry_date.as_deref(), Some("2703"));
    }

    #[test]
    fn declined_status_is_not_complete() {
        let outcome = outcome_from("13", &[]);
        assert!(!outcome.is_order_complete());
    }

    #[test]
    fn client_builds_from_valid_config() {
        let client = GatewayClient::new(test_config()).unwrap();
        assert_eq!(
            client.config().gateway_url,
            "https://gateway.example.test/FortAPI/paymentApi"
        );
    }
}
