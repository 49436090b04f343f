//! Challenge / session state machine (§4.1).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::error::{CoreError, Result};
use crate::jwt;
use crate::models::{now, AuditAction};
use crate::repo;

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject: the user id.
    pub sub: Uuid,
    pub external_id: String,
    pub exp: u64,
}

pub struct CreateChallengeResult {
    pub challenge_id: Uuid,
    pub expires_at: u64,
    pub deep_link: Option<String>,
}

/// **create-challenge(external_id?)**.
///
/// If the bot is not configured (test mode, `config.bot_api_key.is_none()`)
/// and `external_id` is supplied, the challenge is atomically resolved at
/// creation; otherwise a deep link carrying `challenge_id` is returned.
pub fn create_challenge(
    config: &ApiConfig,
    external_id: Option<String>,
) -> Result<CreateChallengeResult> {
    let test_mode = config.bot_api_key.is_none();
    let auto_resolve = test_mode && external_id.is_some();

    let challenge = repo::create_challenge(
        if auto_resolve { external_id.clone() } else { None },
        config.challenge_ttl.as_secs(),
    )?;

    let deep_link = if auto_resolve {
        None
    } else {
        Some(format!("tg://resolve?start={}", challenge.id))
    };

    Ok(CreateChallengeResult {
        challenge_id: challenge.id,
        expires_at: challenge.expires_at,
        deep_link,
    })
}

pub struct VerifyResult {
    pub token: String,
    pub expires_in: u64,
    pub user_id: Uuid,
    pub external_id: String,
}

/// **verify(challenge_id)** → session token.
pub fn verify(config: &ApiConfig, challenge_id: Uuid) -> Result<VerifyResult> {
    let challenge = repo::get_live_challenge(challenge_id)?
        .ok_or_else(|| CoreError::NotFound(format!("challenge {challenge_id} not found")))?;

    let external_id = match &challenge.external_id {
        Some(id) => id.clone(),
        None => {
            return Err(CoreError::NotYetResolved(
                "challenge has not been resolved yet".to_string(),
            ))
        }
    };

    let (user, created) = repo::create_or_get_user_by_external_id(&external_id)?;
    if created {
        repo::append_audit(
            user.id,
            None,
            AuditAction::UserCreate,
            Default::default(),
        )?;
    }

    repo::delete_challenge(challenge_id)?;

    let expires_at = now() + config.session_ttl.as_secs();
    let claims = SessionClaims {
        sub: user.id,
        external_id: external_id.clone(),
        exp: expires_at,
    };
    let token = jwt::sign(&claims, &config.session_signing_secret)?;

    repo::append_audit(
        user.id,
        None,
        AuditAction::SessionCreate,
        Default::default(),
    )?;

    Ok(VerifyResult {
        token,
        expires_in: config.session_ttl.as_secs(),
        user_id: user.id,
        external_id,
    })
}

/// Validate a session bearer token. Verification is constant-time via
/// `jsonwebtoken`'s MAC comparison.
pub fn validate_session_token(config: &ApiConfig, token: &str) -> Result<SessionClaims> {
    jwt::verify(
        token,
        &config.session_signing_secret,
        config.session_signing_secret_previous.as_deref(),
    )
}

/// Extract a Bearer token from an `Authorization` header value.
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
        .map(|t| t.trim())
}

/// Background purge of expired challenge/session rows (§5.1). Sessions
/// themselves are stateless JWTs with nothing to purge; this sweeps the
/// challenge table, the only server-side session-adjacent state the API
/// stores.
pub fn gc_sessions() -> Result<()> {
    repo::purge_expired_challenges()
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
    fn extract_bearer() {
        assert_eq!(extract_bearer_token("Bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer_token("bearer xyz"), Some("xyz"));
        assert_eq!(extract_bearer_token("Basic abc"), None);
    }

    #[test]
    fn test_mode_auto_resolves_and_verify_issues_token() {
        init_state_dir();
        let config = test_config();
        let created = create_challenge(&config, Some("chat-user-1".to_string())).unwrap();
        assert!(created.deep_link.is_none());

        let verified = verify(&config, created.challenge_id).unwrap();
        assert_eq!(verified.external_id, "chat-user-1");

        let claims = validate_session_token(&config, &verified.token).unwrap();
        assert_eq!(claims.sub, verified.user_id);
    }

    #[test]
    fn verify_without_resolution_is_not_yet_resolved() {
        init_state_dir();
        let config = test_config();
        let created = create_challenge(&config, None).unwrap();
        assert!(created.deep_link.is_some());
        let err = verify(&config, created.challenge_id).unwrap_err();
        assert!(matches!(err, CoreError::NotYetResolved(_)));
    }

    #[test]
    fn verify_unknown_challenge_is_not_found() {
        init_state_dir();
        let config = test_config();
        let err = verify(&config, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
