use axum::http::{HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use signing_core::config::ApiConfig;

use crate::handlers;

/// Mirrors the teacher's `build_cors_layer()`: reads allowed origins from
/// config, falling back to a permissive layer only when none are configured.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    if config.cors_allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}

pub fn router(config: &ApiConfig) -> Router {
    Router::new()
        .route("/v1/auth/challenge", post(handlers::create_challenge))
        .route("/v1/auth/verify", post(handlers::verify_challenge))
        .route("/v1/auth/resolve", post(handlers::resolve_challenge))
        .route("/v1/identities", post(handlers::create_identity))
        .route("/v1/identities/{id}/sign-intent", post(handlers::sign_intent))
        .route("/v1/identities/{id}/sign", post(handlers::sign))
        .route("/v1/identities/{id}/sign-batch", post(handlers::sign_batch))
        .route("/v1/identities/{id}", delete(handlers::destroy_identity))
        .route("/v1/audit", get(handlers::list_audit))
        .route("/health", get(handlers::health))
        .layer(build_cors_layer(config))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn init_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = Box::leak(Box::new(dir)).path().to_path_buf();
        std::env::set_var("SIGNING_STATE_DIR", path);
    }

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

    async fn body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_unauthenticated() {
        init_state_dir();
        let app = router(&test_config());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_identity_without_session_is_unauthenticated() {
        init_state_dir();
        let app = router(&test_config());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/identities")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn challenge_then_verify_not_yet_resolved() {
        init_state_dir();
        let app = router(&test_config());
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/auth/challenge")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response.into_body()).await;
        let challenge_id = body["challenge_id"].as_str().unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/auth/verify")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"challenge_id": challenge_id}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn resolve_without_bot_key_configured_is_not_implemented() {
        init_state_dir();
        let app = router(&test_config());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/auth/resolve")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"challenge_id": Uuid::new_v4(), "external_id": "x"})
                            .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }
}
