//! Gateway credentials and per-flow signing material.

use crate::error::ApsError;
use crate::signature::DigestAlgorithm;

/// Which payment submission mode a request belongs to. All three share
/// the same signing protocol; Apple Pay uses its own access code,
/// passphrases and digest algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Hosted,
    Card,
    ApplePay,
}

/// Shared secrets for one flow. The request and response phrases are
/// distinct: requests are signed with one, callbacks verified with the
/// other.
#[derive(Clone)]
pub struct PassphraseSet {
    pub request: String,
    pub response: String,
}

// Keeps passphrases out of Debug output and logs.
impl std::fmt::Debug for PassphraseSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassphraseSet")
            .field("request", &"<redacted>")
            .field("response", &"<redacted>")
            .finish()
    }
}

/// Credentials for one flow family (card/hosted, or Apple Pay).
#[derive(Debug, Clone)]
pub struct FlowCredentials {
    pub access_code: String,
    pub passphrases: PassphraseSet,
    /// Configured digest algorithm name, e.g. `"SHA-256"`.
    pub sha_type: String,
}

impl FlowCredentials {
    pub fn algorithm(&self) -> Result<DigestAlgorithm, ApsError> {
        DigestAlgorithm::parse(&self.sha_type)
    }
}

/// Full gateway configuration. Configuration-supplied, never derived.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub merchant_identifier: String,
    /// Endpoint for server-to-server purchases and the hosted form.
    pub gateway_url: String,
    /// `PURCHASE` or `AUTHORIZATION`.
    pub command: String,
    /// Where APS redirects the shopper after the hosted/3-DS step.
    pub return_url: String,
    pub card: FlowCredentials,
    pub apple_pay: FlowCredentials,
    /// Attach plugin identification fields to purchase requests.
    pub send_plugin_metadata: bool,
}

impl GatewayConfig {
    /// Signing material for a flow. Hosted and card payments share the
    /// card credentials; Apple Pay has its own set.
    pub fn credentials(&self, flow: Flow) -> &FlowCredentials {
        match flow {
            Flow::Hosted | Flow::Card => &self.card,
            Flow::ApplePay => &self.apple_pay,
        }
    }

    pub fn validate(&self) -> Result<(), ApsError> {
        url::Url::parse(&self.gateway_url)
            .map_err(|e| ApsError::Config(format!("invalid gateway URL: {e}")))?;
        url::Url::parse(&self.return_url)
            .map_err(|e| ApsError::Config(format!("invalid return URL: {e}")))?;
        self.card.algorithm()?;
        self.apple_pay.algorithm()?;
        for (flow, creds) in [("card", &self.card), ("apple_pay", &self.apple_pay)] {
            if creds.access_code.is_empty() {
                return Err(ApsError::Config(format!("{flow} access code is empty")));
            }
            if creds.passphrases.request.is_empty() || creds.passphrases.response.is_empty() {
                return Err(ApsError::Config(format!("{flow} passphrase is empty")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> GatewayConfig {
    let card = FlowCredentials {
        access_code: "CARD_ACCESS".to_string(),
        passphrases: PassphraseSet {
            request: "card-req".to_string(),
            response: "card-resp".to_string(),
        },
        sha_type: "SHA-256".to_string(),
    };
    let apple_pay = FlowCredentials {
        access_code: "APPLE_ACCESS".to_string(),
        passphrases: PassphraseSet {
            request: "apple-req".to_string(),
            response: "apple-resp".to_string(),
        },
        sha_type: "SHA-256".to_string(),
    };
    GatewayConfig {
        merchant_identifier: "MERCHANT1".to_string(),
        gateway_url: "https://gateway.example.test/FortAPI/paymentApi".to_string(),
        command: crate::constants::PURCHASE_COMMAND.to_string(),
        return_url: "https://shop.example.test/payments/return".to_string(),
        card,
        apple_pay,
        send_plugin_metadata: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_test_config() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_algorithm() {
        let mut config = test_config();
        config.card.sha_type = "SHA-1".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_passphrase() {
        let mut config = test_config();
        config.apple_pay.passphrases.response = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_redacts_passphrases() {
        let rendered = format!("{:?}", test_config());
        assert!(!rendered.contains("card-req"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn apple_pay_uses_its_own_credentials() {
        let config = test_config();
        assert_eq!(config.credentials(Flow::Card).access_code, "CARD_ACCESS");
        assert_eq!(config.credentials(Flow::Hosted).access_code, "CARD_ACCESS");
        assert_eq!(
            config.credentials(Flow::ApplePay).access_code,
            "APPLE_ACCESS"
        );
    }
}
