//! `/v1/*` route handlers (§4, §6).

use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use signing_core::config::{api_config, clamp_limit};
use signing_core::digest::normalize_digest;
use signing_core::error::CoreError;
use signing_core::jwt;
use signing_core::rate_limit;
use signing_core::repo::{self, ResolveOutcome};
use signing_core::session;
use signing_core::ticket;

use crate::auth_extractor::SessionAuth;
use crate::identity_flow;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: String,
}

pub fn error_response(err: CoreError) -> axum::response::Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorBody {
        kind: err.kind().to_string(),
        error: err.to_string(),
    };
    (status, Json(body)).into_response()
}

fn rate_limited(key: &str, limit: u32, window_ms: u64) -> Result<(), CoreError> {
    if rate_limit::limiter().allow(key, limit, window_ms) {
        Ok(())
    } else {
        Err(CoreError::RateLimited(format!("rate limit exceeded for {key}")))
    }
}

// ---------------------------------------------------------------------------
// auth
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ChallengeRequest {
    #[serde(default)]
    external_id: Option<String>,
}

#[derive(Serialize)]
struct ChallengeResponse {
    challenge_id: Uuid,
    expires_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    deep_link: Option<String>,
}

pub async fn create_challenge(Json(req): Json<ChallengeRequest>) -> axum::response::Response {
    match session::create_challenge(api_config(), req.external_id) {
        Ok(result) => (
            StatusCode::CREATED,
            Json(ChallengeResponse {
                challenge_id: result.challenge_id,
                expires_at: result.expires_at,
                deep_link: result.deep_link,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    challenge_id: Uuid,
}

#[derive(Serialize)]
struct VerifyResponse {
    token: String,
    expires_in: u64,
    user_id: Uuid,
    external_id: String,
}

pub async fn verify_challenge(Json(req): Json<VerifyRequest>) -> axum::response::Response {
    match session::verify(api_config(), req.challenge_id) {
        Ok(result) => (
            StatusCode::OK,
            Json(VerifyResponse {
                token: result.token,
                expires_in: result.expires_in,
                user_id: result.user_id,
                external_id: result.external_id,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
pub struct ResolveRequest {
    challenge_id: Uuid,
    external_id: String,
}

#[derive(Serialize)]
struct ResolveResponse {
    ok: bool,
}

/// Bot-only route, gated by `x-bot-api-key` (§4.1). Returns `not-implemented`
/// when the service is running without a configured bot.
pub async fn resolve_challenge(
    headers: HeaderMap,
    Json(req): Json<ResolveRequest>,
) -> axum::response::Response {
    let config = api_config();
    let expected = match &config.bot_api_key {
        Some(key) => key,
        None => {
            return error_response(CoreError::NotImplemented(
                "bot resolution is not configured".to_string(),
            ))
        }
    };
    let provided = headers
        .get("x-bot-api-key")
        .and_then(|v| v.to_str().ok());
    match provided {
        Some(p) if jwt::secrets_equal(p, expected) => {}
        _ => return error_response(CoreError::Unauthenticated("invalid x-bot-api-key".to_string())),
    }

    match repo::resolve_challenge(req.challenge_id, &req.external_id) {
        Ok(ResolveOutcome::Resolved) => (StatusCode::OK, Json(ResolveResponse { ok: true })).into_response(),
        Ok(ResolveOutcome::AlreadyConsumed) => error_response(CoreError::Conflict(
            "challenge already resolved".to_string(),
        )),
        Ok(ResolveOutcome::NotFound) => error_response(CoreError::NotFound(format!(
            "challenge {} not found",
            req.challenge_id
        ))),
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// identities
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CreateIdentityRequest {
    #[serde(default = "default_alg")]
    alg: String,
}

fn default_alg() -> String {
    "secp256k1".to_string()
}

#[derive(Serialize)]
struct IdentityResponse {
    id: Uuid,
    public_key: String,
    alg: String,
    created_at: u64,
}

pub async fn create_identity(
    auth: SessionAuth,
    Json(req): Json<CreateIdentityRequest>,
) -> axum::response::Response {
    let config = api_config();
    if let Err(e) = rate_limited(
        &rate_limit::key_user_identity_create(&auth.user_id.to_string()),
        config.rate_limit_per_user,
        config.rate_limit_window_ms,
    ) {
        return error_response(e);
    }
    if req.alg != "secp256k1" {
        return error_response(CoreError::Validation(format!("unsupported alg '{}'", req.alg)));
    }

    match identity_flow::create_identity(config, auth.user_id, &req.alg).await {
        Ok(identity) => (
            StatusCode::CREATED,
            Json(IdentityResponse {
                id: identity.id,
                public_key: identity.public_key,
                alg: identity.alg,
                created_at: identity.created_at,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
pub struct SignIntentRequest {
    digest: String,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    sig_alg: Option<String>,
}

#[derive(Serialize)]
struct SignIntentResponse {
    id: Uuid,
    digest_hash: String,
    nonce: String,
    expires_at: u64,
    ticket: String,
}

pub async fn sign_intent(
    auth: SessionAuth,
    Path(identity_id): Path<Uuid>,
    Json(req): Json<SignIntentRequest>,
) -> axum::response::Response {
    let config = api_config();
    if let Err(e) = rate_limited(
        &rate_limit::key_user_sign_intent(&auth.user_id.to_string()),
        config.rate_limit_per_user,
        config.rate_limit_window_ms,
    ) {
        return error_response(e);
    }

    let (_, digest_bytes) = match normalize_digest(&req.digest) {
        Ok(v) => v,
        Err(e) => return error_response(e),
    };

    match repo::get_identity(identity_id) {
        Ok(identity) => {
            if let Err(e) = identity_flow::require_owned_active(&identity, auth.user_id) {
                return error_response(e);
            }
        }
        Err(e) => return error_response(e),
    }

    match ticket::create_sign_intent(
        config,
        auth.user_id,
        identity_id,
        &digest_bytes,
        req.scope.as_deref(),
        req.sig_alg.as_deref(),
    ) {
        Ok(result) => (
            StatusCode::CREATED,
            Json(SignIntentResponse {
                id: result.ticket.id,
                digest_hash: result.ticket.digest_hash,
                nonce: result.ticket.nonce,
                expires_at: result.ticket.expires_at,
                ticket: result.token,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
pub struct SignRequest {
    digest: String,
    ticket: String,
}

pub async fn sign(
    auth: SessionAuth,
    Path(identity_id): Path<Uuid>,
    Json(req): Json<SignRequest>,
) -> axum::response::Response {
    let config = api_config();
    if let Err(e) = rate_limited(
        &rate_limit::key_identity_sign(&identity_id.to_string()),
        config.rate_limit_per_identity_sign,
        config.rate_limit_window_ms,
    ) {
        return error_response(e);
    }

    let (_, digest_bytes) = match normalize_digest(&req.digest) {
        Ok(v) => v,
        Err(e) => return error_response(e),
    };

    match identity_flow::sign(config, auth.user_id, identity_id, &digest_bytes, &req.ticket).await {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
pub struct SignBatchItem {
    digest: String,
    ticket: String,
}

#[derive(Deserialize)]
pub struct SignBatchRequest {
    digests: Vec<SignBatchItem>,
}

/// All-or-nothing: the first failing item aborts the batch and is reported
/// alone, matching the single-sign error taxonomy (§6). Each item still
/// carries its own sign-intent ticket, since a digest alone carries no
/// authorization under this service's ticket model.
pub async fn sign_batch(
    auth: SessionAuth,
    Path(identity_id): Path<Uuid>,
    Json(req): Json<SignBatchRequest>,
) -> axum::response::Response {
    let config = api_config();
    if let Err(e) = rate_limited(
        &rate_limit::key_identity_sign(&identity_id.to_string()),
        config.rate_limit_per_identity_sign,
        config.rate_limit_window_ms,
    ) {
        return error_response(e);
    }

    let mut results = Vec::with_capacity(req.digests.len());
    for item in &req.digests {
        let (_, digest_bytes) = match normalize_digest(&item.digest) {
            Ok(v) => v,
            Err(e) => return error_response(e),
        };
        match identity_flow::sign(config, auth.user_id, identity_id, &digest_bytes, &item.ticket).await {
            Ok(value) => results.push(value),
            Err(e) => return error_response(e),
        }
    }

    (StatusCode::OK, Json(serde_json::json!({ "signatures": results }))).into_response()
}

pub async fn destroy_identity(auth: SessionAuth, Path(identity_id): Path<Uuid>) -> axum::response::Response {
    let config = api_config();
    if let Err(e) = rate_limited(
        &rate_limit::key_identity_destroy(&identity_id.to_string()),
        config.rate_limit_per_user,
        config.rate_limit_window_ms,
    ) {
        return error_response(e);
    }

    match identity_flow::destroy(config, auth.user_id, identity_id).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response(),
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// audit
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    offset: Option<u32>,
}

pub async fn list_audit(auth: SessionAuth, Query(query): Query<AuditQuery>) -> axum::response::Response {
    let limit = clamp_limit(query.limit.unwrap_or(50));
    let offset = query.offset.unwrap_or(0);
    match repo::list_audit_by_user(auth.user_id, limit, offset) {
        Ok((events, total)) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "items": events,
                "limit": limit,
                "offset": offset,
                "count": total,
            })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// health
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    service: &'static str,
}

pub async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: "api-service",
        }),
    )
}
