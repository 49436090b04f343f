//! Sign-intent ticket issuance and claim verification (§4.2).

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::digest::digest_hash;
use crate::error::{CoreError, Result};
use crate::jwt;
use crate::models::{default_sig_alg, now, Ticket};
use crate::repo;

pub const SCOPE_SIGN: &str = "sign";
pub const SIG_ALG_SCHNORR: &str = "schnorr";
pub const SIG_ALG_ECDSA: &str = "ecdsa";

#[derive(Debug, Serialize, Deserialize)]
pub struct TicketClaims {
    pub jti: Uuid,
    pub sub: Uuid,
    pub identity_id: Uuid,
    pub digest_hash: String,
    pub scope: String,
    #[serde(default = "default_sig_alg")]
    pub sig_alg: String,
    pub nonce: String,
    pub exp: u64,
}

pub struct SignIntentResult {
    pub ticket: Ticket,
    pub token: String,
}

fn random_nonce() -> String {
    let mut bytes = [0u8; 24];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// **sign-intent**: mint a fresh ticket for `identity_id`/`digest_bytes`,
/// owned by `user_id`.
pub fn create_sign_intent(
    config: &ApiConfig,
    user_id: Uuid,
    identity_id: Uuid,
    digest_bytes: &[u8; 32],
    scope: Option<&str>,
    sig_alg: Option<&str>,
) -> Result<SignIntentResult> {
    let scope = scope.unwrap_or(SCOPE_SIGN);
    if scope != SCOPE_SIGN {
        return Err(CoreError::Validation(format!("unsupported scope '{scope}'")));
    }
    let sig_alg = sig_alg.unwrap_or(SIG_ALG_SCHNORR);
    if sig_alg != SIG_ALG_SCHNORR && sig_alg != SIG_ALG_ECDSA {
        return Err(CoreError::Validation(format!(
            "unsupported sig_alg '{sig_alg}'"
        )));
    }

    let hash = digest_hash(digest_bytes);
    let jti = Uuid::new_v4();
    let nonce = random_nonce();
    let expires_at = now() + config.ticket_ttl.as_secs();

    let ticket = Ticket {
        id: jti,
        identity_id,
        digest_hash: hash.clone(),
        scope: scope.to_string(),
        sig_alg: sig_alg.to_string(),
        nonce: nonce.clone(),
        expires_at,
        used_at: None,
    };
    repo::create_ticket(ticket.clone())?;

    let claims = TicketClaims {
        jti,
        sub: user_id,
        identity_id,
        digest_hash: hash,
        scope: scope.to_string(),
        sig_alg: sig_alg.to_string(),
        nonce,
        exp: expires_at,
    };
    let token = jwt::sign(&claims, &config.ticket_signing_secret)?;

    Ok(SignIntentResult { ticket, token })
}

/// Verify a ticket token's signature/expiry, then check the caller-supplied
/// binding fields. Each mismatch is surfaced as a distinct `forbidden` error
/// (§4.2 step 3).
pub fn verify_ticket_claims(
    config: &ApiConfig,
    token: &str,
    session_user_id: Uuid,
    url_identity_id: Uuid,
    digest_bytes: &[u8; 32],
) -> Result<TicketClaims> {
    let claims: TicketClaims = jwt::verify(
        token,
        &config.ticket_signing_secret,
        config.ticket_signing_secret_previous.as_deref(),
    )?;

    if claims.sub != session_user_id {
        return Err(CoreError::Forbidden("ticket subject mismatch".to_string()));
    }
    if claims.identity_id != url_identity_id {
        return Err(CoreError::Forbidden(
            "ticket identity mismatch".to_string(),
        ));
    }
    if claims.scope != SCOPE_SIGN {
        return Err(CoreError::Forbidden("ticket scope mismatch".to_string()));
    }
    let hash = digest_hash(digest_bytes);
    if claims.digest_hash != hash {
        return Err(CoreError::Forbidden("ticket digest mismatch".to_string()));
    }

    Ok(claims)
}

/// Load the ticket row by `jti` and apply the state checks of §4.2 step 4.
pub fn load_consumable_ticket(jti: Uuid) -> Result<Ticket> {
    let ticket = repo::get_ticket(jti)?
        .ok_or_else(|| CoreError::NotFound(format!("ticket {jti} not found")))?;
    if ticket.used_at.is_some() {
        return Err(CoreError::Conflict("ticket already used".to_string()));
    }
    if ticket.is_expired() {
        return Err(CoreError::Gone("ticket expired".to_string()));
    }
    Ok(ticket)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ApiConfig {
        ApiConfig {
            api_port: 0,
            enclave_base_url: "http://localhost".into(),
            internal_api_key: "ik".into(),
            ticket_signing_secret: "ticket-secret".into(),
            ticket_signing_secret_previous: None,
            session_signing_secret: "session-secret".into(),
            session_signing_secret_previous: None,
            session_rotation_grace: std::time::Duration::from_secs(86400),
            ticket_ttl: std::time::Duration::from_secs(90),
            session_ttl: std::time::Duration::from_secs(3600),
            challenge_ttl: std::time::Duration::from_secs(300),
            rate_limit_window_ms: 60_000,
            rate_limit_per_user: 30,
            rate_limit_per_identity_sign: 10,
            cors_allowed_origins: vec![],
            bot_api_key: None,
        }
    }

    fn init_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = Box::leak(Box::new(dir)).path().to_path_buf();
        std::env::set_var("SIGNING_STATE_DIR", path);
    }

    #[test]
    fn sign_intent_then_verify_succeeds() {
        init_state_dir();
        let config = test_config();
        let user_id = Uuid::new_v4();
        let identity_id = Uuid::new_v4();
        let digest = [0xaa; 32];

        let result = create_sign_intent(&config, user_id, identity_id, &digest, None, None).unwrap();
        let claims =
            verify_ticket_claims(&config, &result.token, user_id, identity_id, &digest).unwrap();
        assert_eq!(claims.jti, result.ticket.id);
    }

    #[test]
    fn identity_mismatch_is_forbidden() {
        init_state_dir();
        let config = test_config();
        let user_id = Uuid::new_v4();
        let identity_id = Uuid::new_v4();
        let other_identity = Uuid::new_v4();
        let digest = [0xaa; 32];

        let result = create_sign_intent(&config, user_id, identity_id, &digest, None, None).unwrap();
        let err =
            verify_ticket_claims(&config, &result.token, user_id, other_identity, &digest)
                .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
    }

    #[test]
    fn digest_mismatch_is_forbidden() {
        init_state_dir();
        let config = test_config();
        let user_id = Uuid::new_v4();
        let identity_id = Uuid::new_v4();
        let digest = [0xaa; 32];
        let other_digest = [0xbb; 32];

        let result = create_sign_intent(&config, user_id, identity_id, &digest, None, None).unwrap();
        let err =
            verify_ticket_claims(&config, &result.token, user_id, identity_id, &other_digest)
                .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
    }

    #[test]
    fn already_used_ticket_is_conflict() {
        init_state_dir();
        let config = test_config();
        let user_id = Uuid::new_v4();
        let identity_id = Uuid::new_v4();
        let digest = [0xaa; 32];

        let result = create_sign_intent(&config, user_id, identity_id, &digest, None, None).unwrap();
        repo::mark_ticket_used(result.ticket.id).unwrap();
        let err = load_consumable_ticket(result.ticket.id).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }
}
