//! Digest normalization and hashing, shared so the API and the enclave
//! always compute the same `digest_hash` for a given wire-format digest.

use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

/// Number of hex characters in a 32-byte digest.
const DIGEST_HEX_LEN: usize = 64;

/// Parse a wire-format digest string (64 lowercase hex chars, optional
/// `0x` prefix) into its normalized lowercase-no-prefix form and raw bytes.
pub fn normalize_digest(raw: &str) -> Result<(String, [u8; 32])> {
    let stripped = raw.strip_prefix("0x").unwrap_or(raw);
    if stripped.len() != DIGEST_HEX_LEN {
        return Err(CoreError::Validation(format!(
            "digest must be {DIGEST_HEX_LEN} hex characters, got {}",
            stripped.len()
        )));
    }
    if !stripped.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CoreError::Validation(
            "digest must be hex-encoded".to_string(),
        ));
    }
    let normalized = stripped.to_lowercase();
    let bytes = hex::decode(&normalized)
        .map_err(|e| CoreError::Validation(format!("invalid digest hex: {e}")))?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok((normalized, out))
}

/// `digest_hash(digest_hex) = sha256(hex_decode(digest_hex))`, hex-encoded.
pub fn digest_hash(digest_bytes: &[u8; 32]) -> String {
    let hash = Sha256::digest(digest_bytes);
    hex::encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_with_and_without_prefix() {
        let raw = "AA".repeat(32);
        let (norm, bytes) = normalize_digest(&raw).unwrap();
        assert_eq!(norm, "aa".repeat(32));
        assert_eq!(bytes, [0xaa; 32]);

        let prefixed = format!("0x{raw}");
        let (norm2, bytes2) = normalize_digest(&prefixed).unwrap();
        assert_eq!(norm2, norm);
        assert_eq!(bytes2, bytes);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(normalize_digest(&"aa".repeat(31)).is_err());
        assert!(normalize_digest(&"aa".repeat(33)).is_err());
    }

    #[test]
    fn rejects_non_hex() {
        let bad = format!("{}zz", "aa".repeat(31));
        assert!(normalize_digest(&bad).is_err());
    }

    #[test]
    fn digest_hash_is_deterministic() {
        let (_, bytes) = normalize_digest(&"ab".repeat(32)).unwrap();
        assert_eq!(digest_hash(&bytes), digest_hash(&bytes));
    }
}
