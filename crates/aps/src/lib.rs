//! APS payment gateway protocol library.
//!
//! Implements the symmetric request-signing scheme used for all APS
//! communication: outbound purchase/tokenization requests are signed
//! with a shared request passphrase, inbound redirect and webhook
//! callbacks are verified against a shared response passphrase, and
//! both directions go through the same canonicalization.
//!
//! # Parties
//!
//! - **Request builders** ([`request`]) — construct signed parameter
//!   sets for the hosted, card and Apple Pay flows
//! - **Gateway client** ([`gateway::GatewayClient`]) — server-to-server
//!   purchases with response verification
//! - **Callback verifier** ([`callback`]) — authenticates redirect and
//!   webhook payloads before order state is touched
//!
//! # Quick example (signing)
//!
//! ```
//! use aps::signature::{sign, verify, DigestAlgorithm, SignatureParams};
//!
//! let params = SignatureParams::from_iter([
//!     ("access_code", "A1"),
//!     ("merchant_identifier", "M1"),
//!     ("merchant_reference", "T-123"),
//! ]);
//! let sig = sign(&params, "secret", DigestAlgorithm::Sha256);
//! assert!(verify(&params, &sig, "secret", DigestAlgorithm::Sha256));
//! ```

pub mod callback;
pub mod config;
pub mod constants;
pub mod error;
pub mod gateway;
pub mod request;
pub mod security;
pub mod signature;
pub mod status;

pub use callback::VerifiedCallback;
pub use config::{Flow, FlowCredentials, GatewayConfig, PassphraseSet};
pub use error::ApsError;
pub use gateway::{GatewayClient, PurchaseOutcome};
pub use request::{ApplePayToken, PaymentOrder};
pub use signature::{DigestAlgorithm, SignatureParams, Value};
