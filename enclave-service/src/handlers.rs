//! `/internal/*` route handlers (§4.3, §6).

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use signing_core::config::EnclaveConfig;
use signing_core::crypto;
use signing_core::digest::normalize_digest;
use signing_core::error::CoreError;
use signing_core::jwt;
use signing_core::models::{now, KeyRecord};
use signing_core::seal::SealBackend;

use crate::state::{key_store, nonce_ledger};

#[derive(Clone)]
pub struct AppState {
    pub config: EnclaveConfig,
    pub seal_backend: std::sync::Arc<dyn SealBackend>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: String,
}

fn error_response(err: CoreError) -> axum::response::Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorBody {
        kind: err.kind().to_string(),
        error: err.to_string(),
    };
    (status, Json(body)).into_response()
}

fn require_internal_key(headers: &HeaderMap, config: &EnclaveConfig) -> Result<(), CoreError> {
    let provided = headers
        .get("x-internal-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| CoreError::Unauthenticated("missing x-internal-api-key".to_string()))?;
    if !jwt::secrets_equal(provided, &config.internal_api_key) {
        return Err(CoreError::Unauthenticated("invalid internal api key".to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// generate
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct GenerateRequest {
    identity_id: Uuid,
    #[serde(default = "default_alg")]
    alg: String,
}

fn default_alg() -> String {
    "secp256k1".to_string()
}

#[derive(Serialize)]
struct GenerateResponse {
    public_key: String,
}

pub async fn generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<GenerateRequest>,
) -> axum::response::Response {
    if let Err(e) = require_internal_key(&headers, &state.config) {
        return error_response(e);
    }
    if req.alg != "secp256k1" {
        return error_response(CoreError::Validation(format!("unsupported alg '{}'", req.alg)));
    }
    if key_store().get(req.identity_id).is_some() {
        return error_response(CoreError::Conflict(format!(
            "identity {} already exists",
            req.identity_id
        )));
    }

    let generated = crypto::generate_keypair();
    let public_key_hex = hex::encode(generated.public_key_compressed);
    key_store().insert(KeyRecord {
        identity_id: req.identity_id,
        alg: req.alg,
        private_key: generated.private_key,
        public_key: public_key_hex.clone(),
        created_at: now(),
    });

    (StatusCode::OK, Json(GenerateResponse { public_key: public_key_hex })).into_response()
}

// ---------------------------------------------------------------------------
// sign
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SignRequest {
    identity_id: Uuid,
    digest: String,
    ticket: String,
}

#[derive(Serialize)]
struct SignResponse {
    signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    r: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    s: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    v: Option<i32>,
}

#[derive(Deserialize)]
struct EnclaveTicketClaims {
    identity_id: Uuid,
    digest_hash: String,
    scope: String,
    #[serde(default = "signing_core::models::default_sig_alg")]
    sig_alg: String,
    nonce: String,
    exp: u64,
}

pub async fn sign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SignRequest>,
) -> axum::response::Response {
    if let Err(e) = require_internal_key(&headers, &state.config) {
        return error_response(e);
    }

    let (_, digest_bytes) = match normalize_digest(&req.digest) {
        Ok(v) => v,
        Err(e) => return error_response(e),
    };
    let digest_hash = signing_core::digest::digest_hash(&digest_bytes);

    let record = match key_store().get(req.identity_id) {
        Some(r) => r,
        None => {
            return error_response(CoreError::NotFound(format!(
                "identity {} not found",
                req.identity_id
            )))
        }
    };

    let claims: EnclaveTicketClaims = match jwt::verify(
        &req.ticket,
        &state.config.ticket_signing_secret,
        state.config.ticket_signing_secret_previous.as_deref(),
    ) {
        Ok(c) => c,
        Err(e) => return error_response(e),
    };

    if claims.identity_id != req.identity_id {
        return error_response(CoreError::Forbidden("ticket identity mismatch".to_string()));
    }
    if claims.scope != "sign" {
        return error_response(CoreError::Forbidden("ticket scope mismatch".to_string()));
    }
    if claims.digest_hash != digest_hash {
        return error_response(CoreError::Forbidden("ticket digest mismatch".to_string()));
    }

    if !nonce_ledger().check_and_insert(&claims.nonce, claims.exp, now()) {
        return error_response(CoreError::Conflict("nonce already used".to_string()));
    }

    let response = match claims.sig_alg.as_str() {
        "ecdsa" => {
            let sig = match crypto::ecdsa_sign(&record.private_key, &digest_bytes) {
                Ok(s) => s,
                Err(e) => return error_response(e),
            };
            // 65-byte recoverable form (r || s || v), matching the wire
            // format's 130-hex ECDSA signature (§6).
            let mut recoverable = [0u8; 65];
            recoverable[0..32].copy_from_slice(&sig.r);
            recoverable[32..64].copy_from_slice(&sig.s);
            recoverable[64] = sig.recovery_id as u8;
            SignResponse {
                signature: hex::encode(recoverable),
                r: Some(hex::encode(sig.r)),
                s: Some(hex::encode(sig.s)),
                v: Some(sig.recovery_id),
            }
        }
        _ => {
            let sig = match crypto::schnorr_sign(&record.private_key, &digest_bytes) {
                Ok(s) => s,
                Err(e) => return error_response(e),
            };
            SignResponse {
                signature: hex::encode(sig),
                r: None,
                s: None,
                v: None,
            }
        }
    };

    (StatusCode::OK, Json(response)).into_response()
}

// ---------------------------------------------------------------------------
// destroy
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct DestroyRequest {
    identity_id: Uuid,
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

pub async fn destroy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DestroyRequest>,
) -> axum::response::Response {
    if let Err(e) = require_internal_key(&headers, &state.config) {
        return error_response(e);
    }
    match key_store().remove(req.identity_id) {
        Some(_) => (StatusCode::OK, Json(OkResponse { ok: true })).into_response(),
        None => error_response(CoreError::NotFound(format!(
            "identity {} not found",
            req.identity_id
        ))),
    }
}

// ---------------------------------------------------------------------------
// backup/export
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ExportRequest {
    identity_id: Uuid,
}

#[derive(Serialize)]
struct ExportResponse {
    alg: String,
    sealed_key: String,
}

pub async fn backup_export(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ExportRequest>,
) -> axum::response::Response {
    if let Err(e) = require_internal_key(&headers, &state.config) {
        return error_response(e);
    }
    let record = match key_store().get(req.identity_id) {
        Some(r) => r,
        None => {
            return error_response(CoreError::NotFound(format!(
                "identity {} not found",
                req.identity_id
            )))
        }
    };

    let sealed = match state
        .seal_backend
        .seal(&req.identity_id.to_string(), &record.private_key)
        .await
    {
        Ok(s) => s,
        Err(e) => return error_response(e),
    };

    (
        StatusCode::OK,
        Json(ExportResponse {
            alg: record.alg,
            sealed_key: sealed,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// backup/import
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ImportRequest {
    identity_id: Uuid,
    alg: String,
    sealed_key: String,
}

pub async fn backup_import(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ImportRequest>,
) -> axum::response::Response {
    if let Err(e) = require_internal_key(&headers, &state.config) {
        return error_response(e);
    }

    let plaintext = match state
        .seal_backend
        .unseal(&req.identity_id.to_string(), &req.sealed_key)
        .await
    {
        Ok(p) => p,
        Err(e) => return error_response(e),
    };
    if plaintext.len() != 32 {
        return error_response(CoreError::Validation(
            "unsealed key is not 32 bytes".to_string(),
        ));
    }
    let mut private_key = [0u8; 32];
    private_key.copy_from_slice(&plaintext);

    let public_key = match crypto::derive_public_key(&private_key) {
        Ok(pk) => pk,
        Err(e) => return error_response(e),
    };

    key_store().insert(KeyRecord {
        identity_id: req.identity_id,
        alg: req.alg,
        private_key,
        public_key: hex::encode(public_key),
        created_at: now(),
    });

    (StatusCode::OK, Json(OkResponse { ok: true })).into_response()
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
            service: "enclave-service",
        }),
    )
}
