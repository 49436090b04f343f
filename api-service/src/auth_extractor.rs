//! `SessionAuth` Axum extractor: pulls the Bearer session token out of the
//! request, validates it, and hands handlers the authenticated user id —
//! the same "extractor instead of manual header-parsing" idiom the teacher
//! uses for its own session auth.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use signing_core::config::api_config;
use signing_core::session;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: String,
}

pub struct SessionAuth {
    pub user_id: Uuid,
    pub external_id: String,
}

impl<S> FromRequestParts<S> for SessionAuth
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(unauthenticated)?;

        let token = session::extract_bearer_token(header).ok_or_else(unauthenticated)?;

        let claims = session::validate_session_token(api_config(), token)
            .map_err(|_| unauthenticated())?;

        Ok(SessionAuth {
            user_id: claims.sub,
            external_id: claims.external_id,
        })
    }
}

fn unauthenticated() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorBody {
            kind: "unauthenticated".to_string(),
            error: "missing or invalid session token".to_string(),
        }),
    )
        .into_response()
}
