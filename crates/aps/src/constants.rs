/// Field carrying the digest on every request and callback. Always
/// excluded from canonicalization.
pub const SIGNATURE_FIELD: &str = "signature";

/// `service_command` for the hosted tokenization form.
pub const TOKENIZATION_COMMAND: &str = "TOKENIZATION";

/// Payment commands accepted by the gateway.
pub const PURCHASE_COMMAND: &str = "PURCHASE";
pub const AUTHORIZATION_COMMAND: &str = "AUTHORIZATION";

/// `digital_wallet` value for Apple Pay purchases.
pub const APPLE_PAY_WALLET: &str = "APPLE_PAY";

// Plugin identification fields, sent when metadata is enabled.
pub const APP_PROGRAMMING: &str = "Rust";
pub const APP_FRAMEWORK: &str = "aps-storefront";
pub const APP_PLUGIN: &str = "APS_RS";
pub const APP_PLUGIN_VERSION: &str = "v1.0.0";
