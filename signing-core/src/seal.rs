//! Seal backend abstraction: `Seal(bytes) -> opaque` / `Unseal(opaque) -> bytes`
//! (§4.4.1), selected from environment the way the teacher's
//! `TeeBackend`/`backend_from_env()` selects a TEE backend.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::config::EnclaveConfig;
use crate::error::{CoreError, Result};

/// Async trait for seal backend implementations. Each backend handles the
/// full round trip of sealing a private key for durable storage and
/// unsealing it back to raw bytes.
#[async_trait]
pub trait SealBackend: Send + Sync {
    async fn seal(&self, identity_id: &str, plaintext: &[u8]) -> Result<String>;
    async fn unseal(&self, identity_id: &str, sealed: &str) -> Result<Vec<u8>>;
}

/// Construct a `SealBackend` from environment configuration.
///
/// `KMS_KEY_ARN` (with `AWS_REGION`) selects the KMS backend; otherwise
/// `SEALING_KEY` selects the AES-256-GCM dev fallback; neither configured is
/// a startup validation failure.
pub fn seal_backend_from_env(config: &EnclaveConfig) -> Result<Box<dyn SealBackend>> {
    if let (Some(key_arn), Some(region)) = (&config.kms_key_arn, &config.aws_region) {
        return Ok(Box::new(KmsSealBackend::new(key_arn.clone(), region.clone())));
    }

    if let Some(sealing_key) = &config.sealing_key {
        return Ok(Box::new(AesSealBackend::new(sealing_key)?));
    }

    Err(CoreError::Validation(
        "SEALING_KEY or KMS_KEY_ARN/AWS_REGION must be configured".to_string(),
    ))
}

// ---------------------------------------------------------------------------
// AES-256-GCM dev fallback
// ---------------------------------------------------------------------------

/// Derives a 32-byte key from `SEALING_KEY` via HKDF-SHA256, matching the
/// teacher's use of `hkdf` for at-rest secret derivation.
pub struct AesSealBackend {
    cipher: Aes256Gcm,
}

impl AesSealBackend {
    pub fn new(sealing_key: &str) -> Result<Self> {
        let hk = Hkdf::<Sha256>::new(None, sealing_key.as_bytes());
        let mut key_bytes = [0u8; 32];
        hk.expand(b"signing-core-aes-seal", &mut key_bytes)
            .map_err(|e| CoreError::Internal(format!("key derivation failed: {e}")))?;
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }
}

#[async_trait]
impl SealBackend for AesSealBackend {
    async fn seal(&self, _identity_id: &str, plaintext: &[u8]) -> Result<String> {
        let mut iv_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut iv_bytes);
        let nonce = Nonce::from_slice(&iv_bytes);

        let ciphertext_and_tag = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CoreError::Internal(format!("seal failed: {e}")))?;
        // `aes_gcm` appends the 16-byte tag to the ciphertext.
        let tag_offset = ciphertext_and_tag.len() - 16;
        let (ciphertext, tag) = ciphertext_and_tag.split_at(tag_offset);

        Ok(format!(
            "{}:{}:{}",
            hex::encode(iv_bytes),
            hex::encode(ciphertext),
            hex::encode(tag)
        ))
    }

    async fn unseal(&self, _identity_id: &str, sealed: &str) -> Result<Vec<u8>> {
        let parts: Vec<&str> = sealed.split(':').collect();
        if parts.len() != 3 {
            return Err(CoreError::Internal(
                "malformed sealed key: expected iv:ciphertext:tag".to_string(),
            ));
        }
        let iv = hex::decode(parts[0])
            .map_err(|e| CoreError::Internal(format!("invalid iv hex: {e}")))?;
        let ciphertext = hex::decode(parts[1])
            .map_err(|e| CoreError::Internal(format!("invalid ciphertext hex: {e}")))?;
        let tag = hex::decode(parts[2])
            .map_err(|e| CoreError::Internal(format!("invalid tag hex: {e}")))?;

        let nonce = Nonce::from_slice(&iv);
        let mut combined = ciphertext;
        combined.extend_from_slice(&tag);

        self.cipher
            .decrypt(nonce, combined.as_slice())
            .map_err(|e| CoreError::Internal(format!("unseal failed: {e}")))
    }
}

// ---------------------------------------------------------------------------
// KMS backend
// ---------------------------------------------------------------------------

/// Production seal backend. The actual AWS KMS call is behind the
/// `KmsClient` seam so it can be swapped for a real SDK client without
/// touching call sites, the same way the teacher keeps cloud calls behind
/// `TeeBackend`.
#[async_trait]
pub trait KmsClient: Send + Sync {
    async fn encrypt(&self, key_arn: &str, plaintext: &[u8]) -> Result<Vec<u8>>;
    async fn decrypt(&self, key_arn: &str, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

pub struct KmsSealBackend {
    key_arn: String,
    #[allow(dead_code)]
    region: String,
    client: Box<dyn KmsClient>,
}

impl KmsSealBackend {
    pub fn new(key_arn: String, region: String) -> Self {
        Self {
            key_arn,
            region,
            client: Box::new(UnconfiguredKmsClient),
        }
    }

    pub fn with_client(key_arn: String, region: String, client: Box<dyn KmsClient>) -> Self {
        Self {
            key_arn,
            region,
            client,
        }
    }
}

#[async_trait]
impl SealBackend for KmsSealBackend {
    async fn seal(&self, _identity_id: &str, plaintext: &[u8]) -> Result<String> {
        let ciphertext = self.client.encrypt(&self.key_arn, plaintext).await?;
        Ok(format!("kms:{}", base64_encode(&ciphertext)))
    }

    async fn unseal(&self, _identity_id: &str, sealed: &str) -> Result<Vec<u8>> {
        let b64 = sealed
            .strip_prefix("kms:")
            .ok_or_else(|| CoreError::Internal("sealed key missing kms: prefix".to_string()))?;
        let ciphertext = base64_decode(b64)?;
        self.client.decrypt(&self.key_arn, &ciphertext).await
    }
}

/// Placeholder KMS client used until a real AWS SDK client is wired in at
/// the binary's composition root.
struct UnconfiguredKmsClient;

#[async_trait]
impl KmsClient for UnconfiguredKmsClient {
    async fn encrypt(&self, _key_arn: &str, _plaintext: &[u8]) -> Result<Vec<u8>> {
        Err(CoreError::Internal(
            "KMS client not configured for this process".to_string(),
        ))
    }

    async fn decrypt(&self, _key_arn: &str, _ciphertext: &[u8]) -> Result<Vec<u8>> {
        Err(CoreError::Internal(
            "KMS client not configured for this process".to_string(),
        ))
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn base64_decode(s: &str) -> Result<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| CoreError::Internal(format!("invalid base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn aes_seal_unseal_roundtrip() {
        let backend = AesSealBackend::new("dev-sealing-key").unwrap();
        let plaintext = [7u8; 32];
        let sealed = backend.seal("identity-1", &plaintext).await.unwrap();
        assert_eq!(sealed.split(':').count(), 3);
        let unsealed = backend.unseal("identity-1", &sealed).await.unwrap();
        assert_eq!(unsealed, plaintext);
    }

    #[tokio::test]
    async fn aes_unseal_rejects_tampered_ciphertext() {
        let backend = AesSealBackend::new("dev-sealing-key").unwrap();
        let sealed = backend.seal("identity-1", &[1u8; 32]).await.unwrap();
        let mut parts: Vec<String> = sealed.split(':').map(|s| s.to_string()).collect();
        parts[1] = "00".repeat(32);
        let tampered = parts.join(":");
        assert!(backend.unseal("identity-1", &tampered).await.is_err());
    }
}
