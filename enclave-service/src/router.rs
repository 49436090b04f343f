use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::{self, AppState};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/internal/generate", post(handlers::generate))
        .route("/internal/sign", post(handlers::sign))
        .route("/internal/destroy", post(handlers::destroy))
        .route("/internal/backup/export", post(handlers::backup_export))
        .route("/internal/backup/import", post(handlers::backup_import))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use signing_core::config::EnclaveConfig;
    use signing_core::seal::AesSealBackend;
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn test_state() -> AppState {
        AppState {
            config: EnclaveConfig {
                enclave_port: 0,
                internal_api_key: "test-internal-key".into(),
                ticket_signing_secret: "ticket-secret".into(),
                ticket_signing_secret_previous: None,
                sealing_key: Some("dev-sealing-key".into()),
                kms_key_arn: None,
                aws_region: None,
            },
            seal_backend: Arc::new(AesSealBackend::new("dev-sealing-key").unwrap()),
        }
    }

    async fn body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn generate_requires_internal_key() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/internal/generate")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"identity_id": Uuid::new_v4(), "alg": "secp256k1"})
                            .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn generate_then_destroy_lifecycle() {
        let app = router(test_state());
        let identity_id = Uuid::new_v4();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/internal/generate")
                    .header("content-type", "application/json")
                    .header("x-internal-api-key", "test-internal-key")
                    .body(Body::from(
                        serde_json::json!({"identity_id": identity_id, "alg": "secp256k1"})
                            .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response.into_body()).await;
        assert_eq!(json["public_key"].as_str().unwrap().len(), 66);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/internal/destroy")
                    .header("content-type", "application/json")
                    .header("x-internal-api-key", "test-internal-key")
                    .body(Body::from(
                        serde_json::json!({"identity_id": identity_id}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    fn sign_ticket(identity_id: Uuid, digest_hash: &str, sig_alg: &str) -> String {
        let claims = serde_json::json!({
            "identity_id": identity_id,
            "digest_hash": digest_hash,
            "scope": "sign",
            "sig_alg": sig_alg,
            "nonce": Uuid::new_v4().to_string(),
            "exp": signing_core::models::now() + 60,
        });
        signing_core::jwt::sign(&claims, "ticket-secret").unwrap()
    }

    #[tokio::test]
    async fn sign_honors_ticket_sig_alg() {
        let app = router(test_state());
        let identity_id = Uuid::new_v4();

        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/internal/generate")
                    .header("content-type", "application/json")
                    .header("x-internal-api-key", "test-internal-key")
                    .body(Body::from(
                        serde_json::json!({"identity_id": identity_id, "alg": "secp256k1"})
                            .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        let digest = [0x11u8; 32];
        let digest_hex = hex::encode(digest);
        let digest_hash = signing_core::digest::digest_hash(&digest);

        let schnorr_ticket = sign_ticket(identity_id, &digest_hash, "schnorr");
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/internal/sign")
                    .header("content-type", "application/json")
                    .header("x-internal-api-key", "test-internal-key")
                    .body(Body::from(
                        serde_json::json!({
                            "identity_id": identity_id,
                            "digest": digest_hex,
                            "ticket": schnorr_ticket,
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response.into_body()).await;
        assert!(json["r"].is_null());
        assert_eq!(json["signature"].as_str().unwrap().len(), 128);

        let ecdsa_ticket = sign_ticket(identity_id, &digest_hash, "ecdsa");
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/internal/sign")
                    .header("content-type", "application/json")
                    .header("x-internal-api-key", "test-internal-key")
                    .body(Body::from(
                        serde_json::json!({
                            "identity_id": identity_id,
                            "digest": digest_hex,
                            "ticket": ecdsa_ticket,
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response.into_body()).await;
        assert!(json["r"].is_string());
        assert!(json["s"].is_string());
        assert!(json["v"].is_i64());
    }

    #[tokio::test]
    async fn health_is_unauthenticated() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
