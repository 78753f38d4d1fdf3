// crates/elspeth-core/src/core/hashing.rs
// ============================================================================
// Module: ELSPETH Canonical Hashing
// Description: RFC 8785 JSON canonicalization and content hashing utilities.
// Purpose: Provide deterministic hashes for rows, configs, calls, and artifacts.
// Dependencies: serde, serde_jcs, serde_json, sha2
// ============================================================================

//! ## Overview
//! Every "hash of X" in the audit trail is SHA-256 over RFC 8785 (JCS)
//! canonical JSON, so digests are stable across processes and languages.
//! Binary payloads (sink file contents) are hashed directly over raw bytes.
//!
//! Values are checked before canonicalization: non-finite floats and integers
//! outside the JavaScript-safe range are rejected so that a digest computed
//! here can be reproduced by any JCS implementation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Largest integer magnitude representable exactly as an IEEE 754 double.
const JS_SAFE_INTEGER_MAX: u64 = (1 << 53) - 1;

// ============================================================================
// SECTION: Hash Algorithm
// ============================================================================

/// Supported hash algorithms for ELSPETH audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-256 hashing (FIPS-friendly default).
    Sha256,
}

/// Default hash algorithm for ELSPETH.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

// ============================================================================
// SECTION: Hash Digest
// ============================================================================

/// Deterministic content hash representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashDigest {
    /// Hash algorithm identifier.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex-encoded digest bytes.
    pub value: String,
}

impl HashDigest {
    /// Creates a new digest from raw digest bytes.
    #[must_use]
    pub fn new(algorithm: HashAlgorithm, bytes: &[u8]) -> Self {
        Self {
            algorithm,
            value: hex_encode(bytes),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when computing canonical hashes.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
    /// Value contains a number JCS cannot represent deterministically.
    #[error("value is not canonically representable: {0}")]
    NotRepresentable(String),
}

// ============================================================================
// SECTION: Canonical Value Checks
// ============================================================================

/// Verifies that a JSON value is canonically representable.
///
/// Rejects non-finite floats and integers whose magnitude exceeds the
/// JavaScript-safe range, both of which break cross-language determinism.
///
/// # Errors
///
/// Returns [`HashError::NotRepresentable`] when the value contains a
/// non-canonical number.
pub fn check_canonical_value(value: &Value) -> Result<(), HashError> {
    match value {
        Value::Null | Value::Bool(_) | Value::String(_) => Ok(()),
        Value::Number(number) => {
            if let Some(float) = number.as_f64()
                && !float.is_finite()
            {
                return Err(HashError::NotRepresentable(format!("non-finite float: {number}")));
            }
            if let Some(unsigned) = number.as_u64()
                && unsigned > JS_SAFE_INTEGER_MAX
            {
                return Err(HashError::NotRepresentable(format!(
                    "integer above javascript-safe range: {number}"
                )));
            }
            if let Some(signed) = number.as_i64()
                && signed < -(JS_SAFE_INTEGER_MAX as i64)
            {
                return Err(HashError::NotRepresentable(format!(
                    "integer below javascript-safe range: {number}"
                )));
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                check_canonical_value(item)?;
            }
            Ok(())
        }
        Value::Object(entries) => {
            for entry in entries.values() {
                check_canonical_value(entry)?;
            }
            Ok(())
        }
    }
}

// ============================================================================
// SECTION: Hashing Helpers
// ============================================================================

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// # Errors
///
/// Returns [`HashError`] when serialization fails or the value is not
/// canonically representable.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    let json =
        serde_json::to_value(value).map_err(|err| HashError::Canonicalization(err.to_string()))?;
    check_canonical_value(&json)?;
    serde_jcs::to_vec(&json).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Hashes canonical JSON using the provided algorithm.
///
/// # Errors
///
/// Returns [`HashError`] when serialization fails or the value is not
/// canonically representable.
pub fn hash_canonical_json<T: Serialize + ?Sized>(
    algorithm: HashAlgorithm,
    value: &T,
) -> Result<HashDigest, HashError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(hash_bytes(algorithm, &bytes))
}

/// Hashes raw bytes using the provided algorithm.
#[must_use]
pub fn hash_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> HashDigest {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(bytes);
            let digest = hasher.finalize();
            HashDigest::new(HashAlgorithm::Sha256, &digest)
        }
    }
}

/// Decodes canonical JSON bytes back into a JSON value.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when the bytes are not valid JSON.
pub fn decode_canonical_json(bytes: &[u8]) -> Result<Value, HashError> {
    serde_json::from_slice(bytes).map_err(|err| HashError::Canonicalization(err.to_string()))
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}
