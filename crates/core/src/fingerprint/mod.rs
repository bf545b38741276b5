//! Request fingerprinting.
//!
//! A fingerprint is the SHA-256 digest of a request's canonical JSON form
//! (object keys sorted at every level, no insignificant whitespace). Two
//! requests with equal fingerprints are the same unit of work. The digest
//! must stay stable across restarts because both the response cache and
//! dangling-batch recovery key on it.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of a fingerprint in hex characters.
pub const FINGERPRINT_LEN: usize = 64;

/// Error produced when a request cannot be fingerprinted.
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("request cannot be serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid fingerprint: {0}")]
    Invalid(String),
}

/// Hex-encoded SHA-256 digest identifying a semantically unique request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl TryFrom<String> for Fingerprint {
    type Error = FingerprintError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}

impl Fingerprint {
    /// Parse a fingerprint from its hex form (e.g. a batch line's `custom_id`).
    pub fn parse(value: &str) -> Result<Self, FingerprintError> {
        let is_hex = value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if value.len() != FINGERPRINT_LEN || !is_hex {
            return Err(FingerprintError::Invalid(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Compute the fingerprint of any serializable request.
pub fn fingerprint<T: Serialize + ?Sized>(request: &T) -> Result<Fingerprint, FingerprintError> {
    let value = serde_json::to_value(request)?;
    let mut canonical = Vec::with_capacity(256);
    write_canonical(&value, &mut canonical)?;
    let digest = Sha256::digest(&canonical);
    Ok(Fingerprint(format!("{:x}", digest)))
}

/// Serialize `value` with object keys sorted, independent of how the
/// `serde_json` map type orders them.
fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<(), serde_json::Error> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_canonical(&map[key.as_str()], out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}
