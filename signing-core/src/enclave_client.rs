//! API-service HTTP client to the enclave process's `/internal/*` routes,
//! grounded in the teacher's `build_url`/`auth_headers`/`send_json` client
//! shape, re-keyed to the enclave's `x-internal-api-key` header gate.

use once_cell::sync::OnceCell;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method, Url};
use serde::Serialize;
use serde_json::Value;

use crate::error::{CoreError, Result};

static HTTP_CLIENT: OnceCell<Client> = OnceCell::new();

fn http_client() -> Result<&'static Client> {
    HTTP_CLIENT.get_or_try_init(|| {
        Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| CoreError::Internal(format!("failed to build HTTP client: {e}")))
    })
}

fn build_url(base: &str, path: &str) -> Result<Url> {
    let base_url =
        Url::parse(base).map_err(|e| CoreError::Internal(format!("invalid enclave base URL: {e}")))?;
    base_url
        .join(path)
        .map_err(|e| CoreError::Internal(format!("invalid enclave path '{path}': {e}")))
}

fn auth_headers(internal_api_key: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        reqwest::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    let value = HeaderValue::from_str(internal_api_key)
        .map_err(|_| CoreError::Internal("invalid internal API key header value".to_string()))?;
    headers.insert("x-internal-api-key", value);
    Ok(headers)
}

/// Map an enclave HTTP response's status into the same taxonomy the API
/// service itself uses, so enclave failures propagate as the right client
/// error rather than collapsing into a generic 502.
fn map_enclave_status(status: reqwest::StatusCode, body: &str) -> CoreError {
    match status.as_u16() {
        400 => CoreError::Validation(body.to_string()),
        401 | 403 => CoreError::Forbidden(body.to_string()),
        404 => CoreError::NotFound(body.to_string()),
        409 => CoreError::Conflict(body.to_string()),
        410 => CoreError::Gone(body.to_string()),
        429 => CoreError::RateLimited(body.to_string()),
        _ => CoreError::Upstream(format!("enclave returned {status}: {body}")),
    }
}

async fn send_json<B: Serialize>(
    base_url: &str,
    internal_api_key: &str,
    method: Method,
    path: &str,
    body: Option<&B>,
) -> Result<Value> {
    let client = http_client()?;
    let url = build_url(base_url, path)?;
    let headers = auth_headers(internal_api_key)?;

    let mut request = client.request(method, url).headers(headers);
    if let Some(body) = body {
        request = request.json(body);
    }

    let response = request
        .send()
        .await
        .map_err(|e| CoreError::Upstream(format!("enclave request failed: {e}")))?;
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| CoreError::Upstream(format!("failed to read enclave response: {e}")))?;

    if !status.is_success() {
        return Err(map_enclave_status(status, &text));
    }

    serde_json::from_str(&text)
        .map_err(|e| CoreError::Upstream(format!("invalid enclave response JSON: {e}")))
}

#[derive(Serialize)]
struct EmptyBody {}

pub async fn generate(base_url: &str, internal_api_key: &str, body: &Value) -> Result<Value> {
    send_json(base_url, internal_api_key, Method::POST, "/internal/generate", Some(body)).await
}

pub async fn sign(base_url: &str, internal_api_key: &str, body: &Value) -> Result<Value> {
    send_json(base_url, internal_api_key, Method::POST, "/internal/sign", Some(body)).await
}

pub async fn destroy(base_url: &str, internal_api_key: &str, identity_id: &str) -> Result<Value> {
    send_json(
        base_url,
        internal_api_key,
        Method::POST,
        "/internal/destroy",
        Some(&serde_json::json!({"identity_id": identity_id})),
    )
    .await
}

pub async fn backup_export(base_url: &str, internal_api_key: &str, identity_id: &str) -> Result<Value> {
    send_json(
        base_url,
        internal_api_key,
        Method::POST,
        "/internal/backup/export",
        Some(&serde_json::json!({"identity_id": identity_id})),
    )
    .await
}

pub async fn backup_import(base_url: &str, internal_api_key: &str, body: &Value) -> Result<Value> {
    send_json(
        base_url,
        internal_api_key,
        Method::POST,
        "/internal/backup/import",
        Some(body),
    )
    .await
}

pub async fn health(base_url: &str, internal_api_key: &str) -> Result<Value> {
    send_json::<EmptyBody>(base_url, internal_api_key, Method::GET, "/health", None).await
}
