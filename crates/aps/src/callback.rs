//! Inbound callback parsing and authenticity checks.
//!
//! APS reports payment outcomes twice: a browser redirect back to the
//! storefront (form-encoded) and a direct server notification (JSON).
//! Both carry the same flat parameter map and `signature` field, and
//! both go through [`verify_callback`] before a single field is
//! trusted. A callback that fails verification is discarded without
//! touching any order state.

use std::collections::HashMap;

use crate::config::FlowCredentials;
use crate::constants::SIGNATURE_FIELD;
use crate::error::ApsError;
use crate::signature::{self, SignatureParams};

/// A callback whose signature has been checked. Only this type reaches
/// order reconciliation.
#[derive(Debug, Clone)]
pub struct VerifiedCallback {
    pub status: String,
    /// The order number the payment belongs to.
    pub merchant_reference: String,
    /// Gateway transaction identifier (`fort_id`).
    pub transaction_id: Option<String>,
    pub response_message: Option<String>,
    /// Every verified parameter, for order notes and diagnostics.
    pub params: SignatureParams,
}

/// Parameter set from a redirect POST body. Duplicate keys are not
/// expected from the gateway; the last occurrence wins.
pub fn params_from_form(form: &HashMap<String, String>) -> SignatureParams {
    form.iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Parameter set from a JSON webhook body.
pub fn params_from_json(body: &[u8]) -> Result<SignatureParams, ApsError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| ApsError::MalformedPayload(format!("callback body is not JSON: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| ApsError::MalformedPayload("callback body is not an object".to_string()))?;
    SignatureParams::from_json_object(object)
}

/// Check a callback's signature and extract the fields reconciliation
/// needs. The claimed signature is removed from the set before the
/// digest is recomputed over everything else.
pub fn verify_callback(
    mut params: SignatureParams,
    credentials: &FlowCredentials,
) -> Result<VerifiedCallback, ApsError> {
    let claimed = params
        .take_text(SIGNATURE_FIELD)
        .ok_or_else(|| ApsError::UnsafeCallback("signature field missing".to_string()))?;

    let algorithm = credentials.algorithm()?;
    if !signature::verify(
        &params,
        &claimed,
        &credentials.passphrases.response,
        algorithm,
    ) {
        return Err(ApsError::UnsafeCallback(
            "signature mismatch".to_string(),
        ));
    }

    let status = params
        .get_text("status")
        .ok_or_else(|| ApsError::MalformedPayload("status field missing".to_string()))?
        .to_string();
    let merchant_reference = params
        .get_text("merchant_reference")
        .ok_or_else(|| {
            ApsError::MalformedPayload("merchant_reference field missing".to_string())
        })?
        .to_string();

    Ok(VerifiedCallback {
        status,
        merchant_reference,
        transaction_id: params.get_text("fort_id").map(String::from),
        response_message: params.get_text("response_message").map(String::from),
        params,
    })
}
