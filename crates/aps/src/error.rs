use thiserror::Error;

/// Errors returned by APS protocol operations.
///
/// Signature errors are never absorbed into a success path: a
/// `SignatureComputation` aborts outbound request construction, and
/// `UnsafeCallback`/`MalformedPayload` cause the inbound callback to be
/// discarded before any order or payment state is touched.
#[derive(Debug, Error)]
pub enum ApsError {
    /// The digest could not be computed (e.g. unrecognized algorithm
    /// name in configuration). An unsigned request must never be sent.
    #[error("signature computation failed: {0}")]
    SignatureComputation(String),

    /// An inbound callback failed signature verification. A forged or
    /// corrupted payment notification is a security event, not a
    /// transient fault.
    #[error("unsafe callback: {0}")]
    UnsafeCallback(String),

    /// The callback body could not be parsed into a parameter set.
    /// Treated like an unsafe callback: discard, log, mutate nothing.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
