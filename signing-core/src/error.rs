use std::fmt;

/// Errors shared by the API and enclave processes.
///
/// Each variant corresponds to exactly one entry in the error taxonomy and
/// carries its own HTTP status via `status_code()`.
#[derive(Debug)]
pub enum CoreError {
    /// Schema mismatch, malformed digest, out-of-range limit.
    Validation(String),
    /// Missing/invalid session token, missing/invalid internal key, invalid/expired ticket token.
    Unauthenticated(String),
    /// Verify against an unresolved challenge.
    NotYetResolved(String),
    /// Ticket claim mismatch (sub, identity, scope, digest).
    Forbidden(String),
    /// Unknown user, identity, challenge, ticket, or enclave key.
    NotFound(String),
    /// Duplicate generate, ticket already used, replay, inactive identity, key-not-present-and-no-backup.
    Conflict(String),
    /// Ticket past `expires_at`.
    Gone(String),
    /// Sliding-window limit exceeded.
    RateLimited(String),
    /// Enclave returned an error the API cannot recover locally.
    Upstream(String),
    /// Bot-session route when bot API key not configured.
    NotImplemented(String),
    /// Anything else.
    Internal(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Validation(msg) => write!(f, "validation error: {msg}"),
            CoreError::Unauthenticated(msg) => write!(f, "unauthenticated: {msg}"),
            CoreError::NotYetResolved(msg) => write!(f, "not yet resolved: {msg}"),
            CoreError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            CoreError::NotFound(msg) => write!(f, "not found: {msg}"),
            CoreError::Conflict(msg) => write!(f, "conflict: {msg}"),
            CoreError::Gone(msg) => write!(f, "gone: {msg}"),
            CoreError::RateLimited(msg) => write!(f, "rate limited: {msg}"),
            CoreError::Upstream(msg) => write!(f, "upstream error: {msg}"),
            CoreError::NotImplemented(msg) => write!(f, "not implemented: {msg}"),
            CoreError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<CoreError> for String {
    fn from(err: CoreError) -> Self {
        err.to_string()
    }
}

impl CoreError {
    /// The taxonomy kind string, used in error JSON bodies and audit metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation",
            CoreError::Unauthenticated(_) => "unauthenticated",
            CoreError::NotYetResolved(_) => "not-yet-resolved",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::NotFound(_) => "not-found",
            CoreError::Conflict(_) => "conflict",
            CoreError::Gone(_) => "gone",
            CoreError::RateLimited(_) => "rate-limited",
            CoreError::Upstream(_) => "upstream",
            CoreError::NotImplemented(_) => "not-implemented",
            CoreError::Internal(_) => "internal",
        }
    }

    /// The HTTP status code prescribed by the error taxonomy.
    pub fn http_status(&self) -> u16 {
        match self {
            CoreError::Validation(_) => 400,
            CoreError::Unauthenticated(_) => 401,
            CoreError::NotYetResolved(_) => 202,
            CoreError::Forbidden(_) => 403,
            CoreError::NotFound(_) => 404,
            CoreError::Conflict(_) => 409,
            CoreError::Gone(_) => 410,
            CoreError::RateLimited(_) => 429,
            CoreError::Upstream(_) => 502,
            CoreError::NotImplemented(_) => 501,
            CoreError::Internal(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
