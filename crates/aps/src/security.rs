//! Shared security utilities.
//!
//! Constant-time comparison used wherever a secret is matched against
//! attacker-supplied input (metrics bearer tokens, signature checks go
//! through [`crate::signature::verify`] instead).

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Constant-time byte comparison that does not leak input lengths or
/// content. Both inputs are hashed to fixed-length SHA-256 digests
/// before comparison, so timing reveals neither the content nor the
/// length of either input.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    ha.ct_eq(&hb).into()
}
