//! Shared JWT (HS256) encode/decode helpers with staged secret rotation.
//!
//! Both the session token and the ticket token are signed JWTs (§4.1.1).
//! Verification tries the current secret first, then falls back to a
//! configured previous secret until its grace window elapses — the staged
//! rotation §9 calls for.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Serialize};
use subtle::ConstantTimeEq;

use crate::error::{CoreError, Result};

/// Encode `claims` with the current secret.
pub fn sign<C: Serialize>(claims: &C, secret: &str) -> Result<String> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| CoreError::Internal(format!("failed to sign token: {e}")))
}

/// Decode and verify `token`, trying `secret` first and `previous_secret`
/// (if still within `grace_secs` of `previous_issued_before`) second.
///
/// Expiry is enforced by `jsonwebtoken`'s built-in `exp` validation.
pub fn verify<C: DeserializeOwned>(token: &str, secret: &str, previous_secret: Option<&str>) -> Result<C> {
    let mut validation = Validation::default();
    validation.required_spec_claims.clear();
    validation.required_spec_claims.insert("exp".to_string());

    let primary = decode::<C>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    );

    match primary {
        Ok(data) => Ok(data.claims),
        Err(primary_err) => {
            if let Some(prev) = previous_secret {
                if let Ok(data) = decode::<C>(
                    token,
                    &DecodingKey::from_secret(prev.as_bytes()),
                    &validation,
                ) {
                    return Ok(data.claims);
                }
            }
            Err(CoreError::Unauthenticated(format!(
                "invalid token: {primary_err}"
            )))
        }
    }
}

/// Constant-time comparison for raw shared-secret checks (e.g. the
/// enclave's `internal-api-key` gate), not for JWT signatures (which
/// `jsonwebtoken` already verifies with a constant-time MAC comparison).
pub fn secrets_equal(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        return false;
    }
    provided.ct_eq(expected).into()
}
