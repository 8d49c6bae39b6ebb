//! Outbound request builders for the three payment flows.
//!
//! Every builder ends in `finalize`, which resolves the flow's digest
//! algorithm and appends the `signature` field. A configuration that
//! cannot be resolved to a real hash aborts construction — an unsigned
//! request never leaves this module.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use uuid::Uuid;

use crate::config::{Flow, FlowCredentials, GatewayConfig};
use crate::constants::{
    APPLE_PAY_WALLET, APP_FRAMEWORK, APP_PLUGIN, APP_PLUGIN_VERSION, APP_PROGRAMMING,
    SIGNATURE_FIELD, TOKENIZATION_COMMAND,
};
use crate::error::ApsError;
use crate::signature::{self, SignatureParams, Value};

/// Request-scoped order context for building a purchase request. All
/// fields come from the commerce platform's order; nothing is read
/// from ambient session state.
#[derive(Debug, Clone)]
pub struct PaymentOrder {
    pub order_no: String,
    pub amount: Decimal,
    /// ISO-4217 alphabetic code, e.g. `"AED"`.
    pub currency: String,
    pub customer_email: String,
    /// Two-letter locale language, e.g. `"en"`.
    pub language: String,
}

/// Decrypted-by-the-gateway Apple Pay token as delivered by the
/// browser's payment sheet.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplePayToken {
    pub payment_data: ApplePaymentData,
    pub payment_method: ApplePaymentMethod,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplePaymentData {
    pub data: String,
    pub signature: String,
    pub header: ApplePaymentHeader,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplePaymentHeader {
    pub ephemeral_public_key: String,
    pub public_key_hash: String,
    pub transaction_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplePaymentMethod {
    pub display_name: String,
    pub network: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// ISO-4217 minor-unit exponent for a currency code.
pub fn currency_fraction_digits(currency: &str) -> u32 {
    match currency {
        "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
        "CLP" | "ISK" | "JPY" | "KRW" | "VND" => 0,
        _ => 2,
    }
}

/// Convert a major-unit amount to the integer minor-unit string APS
/// expects: 500 AED becomes "50000", 100 JOD becomes "100000".
pub fn amount_minor_units(amount: Decimal, currency: &str) -> Result<String, ApsError> {
    if amount.is_sign_negative() {
        return Err(ApsError::InvalidAmount(format!(
            "negative amount: {amount}"
        )));
    }
    let scale = Decimal::from(10u64.pow(currency_fraction_digits(currency)));
    let scaled =
        (amount * scale).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    let units = scaled
        .to_u64()
        .ok_or_else(|| ApsError::InvalidAmount(format!("amount out of range: {amount}")))?;
    Ok(units.to_string())
}

/// Card expiry in the gateway's `YYMM` form.
pub fn format_expiry(year: u32, month: u32) -> String {
    format!("{:02}{:02}", year % 100, month)
}

/// Fresh merchant reference for a tokenization exchange, which happens
/// before any order exists.
pub fn tokenization_reference() -> String {
    format!("T-{}", Uuid::new_v4().simple())
}

fn finalize(
    mut params: SignatureParams,
    credentials: &FlowCredentials,
) -> Result<SignatureParams, ApsError> {
    let algorithm = credentials.algorithm()?;
    let signature = signature::sign(&params, &credentials.passphrases.request, algorithm);
    params.push(SIGNATURE_FIELD, signature);
    Ok(params)
}

fn base_request(
    config: &GatewayConfig,
    order: &PaymentOrder,
    flow: Flow,
) -> Result<SignatureParams, ApsError> {
    let mut params = SignatureParams::new();
    params.push("command", config.command.as_str());
    params.push("access_code", config.credentials(flow).access_code.as_str());
    params.push("merchant_identifier", config.merchant_identifier.as_str());
    params.push("merchant_reference", order.order_no.as_str());
    params.push(
        "amount",
        amount_minor_units(order.amount, &order.currency)?,
    );
    params.push("currency", order.currency.as_str());
    params.push("language", order.language.as_str());
    params.push("customer_email", order.customer_email.as_str());

    if config.send_plugin_metadata {
        params.push("app_programming", APP_PROGRAMMING);
        params.push("app_framework", APP_FRAMEWORK);
        params.push("app_plugin", APP_PLUGIN);
        params.push("app_plugin_version", APP_PLUGIN_VERSION);
    }

    Ok(params)
}

/// Signed field set for the hosted payment form. The storefront posts
/// these to the gateway URL as a browser form submission.
pub fn hosted_request(
    config: &GatewayConfig,
    order: &PaymentOrder,
) -> Result<SignatureParams, ApsError> {
    let mut params = base_request(config, order, Flow::Hosted)?;
    params.push("return_url", config.return_url.as_str());
    finalize(params, config.credentials(Flow::Hosted))
}

/// Signed field set for the card tokenization form.
pub fn tokenization_request(
    config: &GatewayConfig,
    language: &str,
) -> Result<SignatureParams, ApsError> {
    let credentials = config.credentials(Flow::Card);
    let mut params = SignatureParams::new();
    params.push("service_command", TOKENIZATION_COMMAND);
    params.push("access_code", credentials.access_code.as_str());
    params.push("merchant_identifier", config.merchant_identifier.as_str());
    params.push("merchant_reference", tokenization_reference());
    params.push("language", language);
    params.push("return_url", config.return_url.as_str());
    finalize(params, credentials)
}

/// Signed server-to-server purchase request for a tokenized card.
/// The security code is request-scoped: it arrives as an argument and
/// is dropped with the request, never stashed in shared state.
pub fn card_request(
    config: &GatewayConfig,
    order: &PaymentOrder,
    token_name: &str,
    card_security_code: Option<&str>,
) -> Result<SignatureParams, ApsError> {
    let mut params = base_request(config, order, Flow::Card)?;
    params.push("remember_me", "YES");
    if let Some(code) = card_security_code {
        params.push("card_security_code", code);
    }
    params.push("return_url", config.return_url.as_str());
    params.push("token_name", token_name);
    finalize(params, config.credentials(Flow::Card))
}

/// Signed Apple Pay purchase request. The token's header and payment
/// method become nested objects whose key order is preserved in the
/// canonical form.
pub fn apple_pay_request(
    config: &GatewayConfig,
    order: &PaymentOrder,
    token: &ApplePayToken,
) -> Result<SignatureParams, ApsError> {
    let mut params = base_request(config, order, Flow::ApplePay)?;
    params.push("digital_wallet", APPLE_PAY_WALLET);
    params.push("apple_data", token.payment_data.data.as_str());
    params.push("apple_signature", token.payment_data.signature.as_str());
    params.push(
        "apple_header",
        Value::Nested(vec![
            (
                "apple_ephemeralPublicKey".to_string(),
                token.payment_data.header.ephemeral_public_key.clone(),
            ),
            (
                "apple_publicKeyHash".to_string(),
                token.payment_data.header.public_key_hash.clone(),
            ),
            (
                "apple_transactionId".to_string(),
                token.payment_data.header.transaction_id.clone(),
            ),
        ]),
    );
    params.push(
        "apple_paymentMethod",
        Value::Nested(vec![
            (
                "apple_displayName".to_string(),
                token.payment_method.display_name.clone(),
            ),
            (
                "apple_network".to_string(),
                token.payment_method.network.clone(),
            ),
            ("apple_type".to_string(), token.payment_method.kind.clone()),
        ]),
    );
    finalize(params, config.credentials(Flow::ApplePay))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::signature::{verify, DigestAlgorithm};

    fn sample_order() -> PaymentOrder {
        PaymentOrder {
            order_no: "00001234".to_string(),
            amount: Decimal::new(50000, 2), // 500.00
            currency: "AED".to_string(),
            customer_email: "shopper@example.test".to_string(),
            language: "en".to_string(),
        }
    }

    fn sample_token() -> ApplePayToken {
        serde_json::from_value(serde_json::json!({
            "paymentData": {
                "data": "opaque-data",
                "signature": "opaque-sig",
                "header": {
                    "ephemeralPublicKey": "E",
                    "publicKeyHash": "H",
                    "transactionId": "T"
                }
            },
            "paymentMethod": {
                "displayName": "Visa 1234",
                "network": "Visa",
                "type": "debit"
            }
        }))
        .unwrap()
    }

    #[test]
    fn amount_conversion_uses_currency_minor_units() {
        assert_eq!(
            amount_minor_units(Decimal::new(500, 0), "AED").unwrap(),
            "50000"
        );
        assert_eq!(
            amount_minor_units(Decimal::new(100, 0), "JOD").unwrap(),
            "100000"
        );
        assert_eq!(
            amount_minor_units(Decimal::new(1200, 0), "JPY").unwrap(),
            "1200"
        );
        // Half-away-from-zero rounding on sub-minor-unit amounts.
        assert_eq!(
            amount_minor_units(Decimal::new(1005, 3), "USD").unwrap(),
            "101"
        );
    }

    #[test]
    fn negative_amount_is_rejected() {
        assert!(amount_minor_units(Decimal::new(-1, 0), "USD").is_err());
    }

    #[test]
    fn expiry_is_two_digit_year_then_month() {
        assert_eq!(format_expiry(2027, 3), "2703");
        assert_eq!(format_expiry(2030, 11), "3011");
    }

    #[test]
    fn tokenization_reference_has_prefix() {
        let reference = tokenization_reference();
        assert!(reference.starts_with("T-"));
        assert_eq!(reference.len(), 2 + 32);
    }

    #[test]
    fn hosted_request_is_signed_and_verifiable() {
        let config = test_config();
        let params = hosted_request(&config, &sample_order()).unwrap();

        assert_eq!(params.get_text("command"), Some("PURCHASE"));
        assert_eq!(params.get_text("access_code"), Some("CARD_ACCESS"));
        assert_eq!(params.get_text("amount"), Some("50000"));

        let signature = params.get_text("signature").unwrap().to_string();
        assert!(verify(
            &params,
            &signature,
            "card-req",
            DigestAlgorithm::Sha256
        ));
    }

    #[test]
    fn card_request_carries_explicit_security_code() {
        let config = test_config();
        let params =
            card_request(&config, &sample_order(), "tok_abc", Some("123")).unwrap();
        assert_eq!(params.get_text("card_security_code"), Some("123"));
        assert_eq!(params.get_text("token_name"), Some("tok_abc"));
        assert_eq!(params.get_text("remember_me"), Some("YES"));

        let without_code = card_request(&config, &sample_order(), "tok_abc", None).unwrap();
        assert!(without_code.get_text("card_security_code").is_none());
    }

    #[test]
    fn apple_pay_request_signs_with_apple_credentials() {
        let config = test_config();
        let params = apple_pay_request(&config, &sample_order(), &sample_token()).unwrap();

        assert_eq!(params.get_text("access_code"), Some("APPLE_ACCESS"));
        assert_eq!(params.get_text("digital_wallet"), Some("APPLE_PAY"));

        let signature = params.get_text("signature").unwrap().to_string();
        assert!(verify(
            &params,
            &signature,
            "apple-req",
            DigestAlgorithm::Sha256
        ));
        // Card passphrase must not validate an Apple Pay request.
        assert!(!verify(
            &params,
            &signature,
            "card-req",
            DigestAlgorithm::Sha256
        ));
    }

    #[test]
    fn apple_pay_nested_fields_serialize_as_objects() {
        let config = test_config();
        let params = apple_pay_request(&config, &sample_order(), &sample_token()).unwrap();
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["apple_header"]["apple_ephemeralPublicKey"], "E");
        assert_eq!(json["apple_paymentMethod"]["apple_type"], "debit");
    }

    #[test]
    fn tokenization_request_uses_service_command() {
        let config = test_config();
        let params = tokenization_request(&config, "en").unwrap();
        assert_eq!(params.get_text("service_command"), Some("TOKENIZATION"));
        assert!(params.get_text("command").is_none());
        assert!(params
            .get_text("merchant_reference")
            .unwrap()
            .starts_with("T-"));
    }

    #[test]
    fn bad_algorithm_aborts_request_construction() {
        let mut config = test_config();
        config.card.sha_type = "SHA-3".to_string();
        assert!(hosted_request(&config, &sample_order()).is_err());
    }

    #[test]
    fn plugin_metadata_is_included_when_enabled() {
        let mut config = test_config();
        config.send_plugin_metadata = true;
        let params = hosted_request(&config, &sample_order()).unwrap();
        assert_eq!(params.get_text("app_plugin"), Some("APS_RS"));
    }
}
