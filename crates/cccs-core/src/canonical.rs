// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical JSON serialization and hashing.
//!
//! For hashing and HMAC verification, JSON is serialized with sorted keys,
//! no superfluous whitespace, and UTF-8 encoding. `serde_json`'s map type is
//! `BTreeMap`-backed, so `to_string` already meets the sorted-key
//! requirement; two logically equal objects always produce the same bytes.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Serialize `value` to its canonical JSON form.
///
/// # Errors
///
/// Returns the underlying `serde_json` error if `value` cannot be
/// serialized (e.g. a non-finite float).
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

/// Hex-encoded SHA-256 digest of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// `sha256:`-prefixed hash of the canonical JSON form of `value`.
///
/// Used for policy snapshot hashes and config layer hashes.
///
/// # Errors
///
/// Returns the underlying `serde_json` error if `value` cannot be
/// serialized.
pub fn snapshot_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = canonical_json(value)?;
    Ok(format!("sha256:{}", sha256_hex(json.as_bytes())))
}
