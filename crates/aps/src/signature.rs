//! Request signing and callback verification for the APS gateway.
//!
//! Every message exchanged with APS carries a `signature` field: a hex
//! digest over a canonical rendering of all other fields, wrapped in a
//! shared passphrase. The same codec signs outbound requests and checks
//! inbound redirect/webhook callbacks — there is exactly one
//! canonicalization in this crate, shared by both directions.
//!
//! Canonical form: every `key=value` entry (nested objects rendered as
//! `{k1=v1, k2=v2}` in their own insertion order) is sorted
//! lexicographically by the *whole* entry string, the passphrase is
//! placed before the first and after the last entry, and the list is
//! concatenated with no separator.

use serde::ser::{Serialize, SerializeMap, Serializer};
use subtle::ConstantTimeEq;

use crate::constants::SIGNATURE_FIELD;
use crate::error::ApsError;

/// A single parameter value. APS parameters are flat strings except for
/// the Apple Pay token sub-objects, which nest exactly one level deep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    /// One level of nesting. Pair order is the order the gateway saw
    /// (or will see) on the wire, and is preserved verbatim in the
    /// canonical form.
    Nested(Vec<(String, String)>),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }

    /// Canonical rendering. A nested value with no pairs falls back to
    /// the raw `{}` rendering — the flatten-or-raw rule, stated here
    /// instead of being an accident of error handling.
    fn canonical(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Nested(pairs) if !pairs.is_empty() => {
                let inner: Vec<String> =
                    pairs.iter().map(|(k, v)| format!("{k}={v}")).collect();
                format!("{{{}}}", inner.join(", "))
            }
            Value::Nested(_) => "{}".to_string(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// An insertion-ordered parameter set, ephemeral per request/response.
///
/// Insertion order is irrelevant to the signature (canonicalization
/// sorts) but is kept so outbound JSON bodies serialize in the order
/// the builders produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureParams {
    entries: Vec<(String, Value)>,
}

impl SignatureParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter. Keys are not deduplicated; builders never
    /// set the same key twice.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.push((key.into(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Text value of a parameter, if present and flat.
    pub fn get_text(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(Value::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Remove a parameter and return its flat text value.
    pub fn take_text(&mut self, key: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        match self.entries.remove(idx).1 {
            Value::Text(s) => Some(s),
            Value::Nested(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.entries.iter()
    }

    /// Build a parameter set from a flat JSON object, as received in a
    /// webhook body or a gateway purchase response. Scalars become
    /// text; one level of object nesting is accepted (Apple Pay echo
    /// fields); arrays, nulls and deeper nesting are malformed.
    pub fn from_json_object(
        object: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, ApsError> {
        let mut params = SignatureParams::new();
        for (key, value) in object {
            match value {
                serde_json::Value::String(s) => params.push(key.clone(), s.clone()),
                serde_json::Value::Number(n) => params.push(key.clone(), n.to_string()),
                serde_json::Value::Bool(b) => params.push(key.clone(), b.to_string()),
                serde_json::Value::Object(nested) => {
                    let mut pairs = Vec::with_capacity(nested.len());
                    for (nk, nv) in nested {
                        let rendered = match nv {
                            serde_json::Value::String(s) => s.clone(),
                            serde_json::Value::Number(n) => n.to_string(),
                            serde_json::Value::Bool(b) => b.to_string(),
                            other => {
                                return Err(ApsError::MalformedPayload(format!(
                                    "field '{key}.{nk}' is not a scalar: {other}"
                                )))
                            }
                        };
                        pairs.push((nk.clone(), rendered));
                    }
                    params.entries.push((key.clone(), Value::Nested(pairs)));
                }
                other => {
                    return Err(ApsError::MalformedPayload(format!(
                        "field '{key}' has unsupported type: {other}"
                    )))
                }
            }
        }
        Ok(params)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for SignatureParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

// Serializes as a JSON object in insertion order, which is what the
// gateway receives as the POST body.
impl Serialize for SignatureParams {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            match value {
                Value::Text(s) => map.serialize_entry(key, s)?,
                Value::Nested(pairs) => {
                    let mut nested = serde_json::Map::new();
                    for (k, v) in pairs {
                        nested.insert(k.clone(), serde_json::Value::String(v.clone()));
                    }
                    map.serialize_entry(key, &nested)?;
                }
            }
        }
        map.end()
    }
}

/// Hash function named by the gateway configuration (`apsSHAType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    /// Resolve a configured algorithm name. An unrecognized name is a
    /// hard signature-computation error — signing must never fall back
    /// to a different hash than the gateway expects.
    pub fn parse(name: &str) -> Result<Self, ApsError> {
        match name {
            "SHA-256" => Ok(DigestAlgorithm::Sha256),
            "SHA-512" => Ok(DigestAlgorithm::Sha512),
            other => Err(ApsError::SignatureComputation(format!(
                "unsupported digest algorithm: {other}"
            ))),
        }
    }

    fn digest(&self, input: &[u8]) -> Vec<u8> {
        use sha2::Digest;
        match self {
            DigestAlgorithm::Sha256 => sha2::Sha256::digest(input).to_vec(),
            DigestAlgorithm::Sha512 => sha2::Sha512::digest(input).to_vec(),
        }
    }
}

/// Canonicalize a parameter set with the passphrase wrapped around it.
/// The `signature` field itself is always excluded — it is an output of
/// signing, never an input.
pub fn canonicalize(params: &SignatureParams, passphrase: &str) -> String {
    let mut entries: Vec<String> = params
        .iter()
        .filter(|(key, _)| key != SIGNATURE_FIELD)
        .map(|(key, value)| format!("{key}={}", value.canonical()))
        .collect();
    entries.sort();
    entries.insert(0, passphrase.to_string());
    entries.push(passphrase.to_string());
    entries.concat()
}

/// Sign a parameter set. Returns the lowercase hex digest that goes on
/// the wire as the `signature` field.
pub fn sign(params: &SignatureParams, passphrase: &str, algorithm: DigestAlgorithm) -> String {
    let canonical = canonicalize(params, passphrase);
    hex::encode(algorithm.digest(canonical.as_bytes()))
}

/// Verify a claimed signature against a parameter set.
///
/// Uses constant-time comparison — this check is what stands between a
/// forged payment notification and a paid order. A claimed signature
/// that is not valid hex of the digest length is compared against
/// zeros so the hex decode does not become a timing side-channel.
pub fn verify(
    params: &SignatureParams,
    claimed: &str,
    passphrase: &str,
    algorithm: DigestAlgorithm,
) -> bool {
    let canonical = canonicalize(params, passphrase);
    let expected = algorithm.digest(canonical.as_bytes());

    let claimed_bytes = hex::decode(claimed)
        .ok()
        .filter(|b| b.len() == expected.len())
        .unwrap_or_else(|| vec![0u8; expected.len()]);

    expected.ct_eq(&claimed_bytes).into()
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().fold(String::new(), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{b:02x}");
            s
        })
    }

    // Lowercase digits only: the wire format is exactly what `encode`
    // produces, so "AB" or "+1" must not decode to the same bytes.
    pub fn decode(s: &str) -> Result<Vec<u8>, ()> {
        fn nibble(b: u8) -> Result<u8, ()> {
            match b {
                b'0'..=b'9' => Ok(b - b'0'),
                b'a'..=b'f' => Ok(b - b'a' + 10),
                _ => Err(()),
            }
        }

        if s.len() % 2 != 0 {
            return Err(());
        }
        s.as_bytes()
            .chunks(2)
            .map(|pair| Ok((nibble(pair[0])? << 4) | nibble(pair[1])?))
            .collect()
    }
}
