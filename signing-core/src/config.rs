//! Environment-driven configuration, shared by both processes.
//!
//! Each field is read once via `Config::load()` with
//! `env::var("X").ok().and_then(|v| v.parse().ok()).unwrap_or(default)`,
//! then cached in a process-wide `OnceCell`.

use std::env;
use std::time::Duration;

use once_cell::sync::OnceCell;

const DEFAULT_TICKET_TTL_SECONDS: u64 = 90;
const DEFAULT_SESSION_TTL_SECONDS: u64 = 3600;
const DEFAULT_CHALLENGE_TTL_SECONDS: u64 = 300;
const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 60_000;
const DEFAULT_RATE_LIMIT_PER_USER: u32 = 30;
const DEFAULT_RATE_LIMIT_PER_IDENTITY_SIGN: u32 = 10;
const DEFAULT_API_PORT: u16 = 8080;
const DEFAULT_ENCLAVE_PORT: u16 = 8090;
const DEFAULT_ROTATION_GRACE_SECONDS: u64 = 86_400;

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Shared config used by the API service.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub api_port: u16,
    pub enclave_base_url: String,
    pub internal_api_key: String,
    pub ticket_signing_secret: String,
    pub ticket_signing_secret_previous: Option<String>,
    pub session_signing_secret: String,
    pub session_signing_secret_previous: Option<String>,
    pub session_rotation_grace: Duration,
    pub ticket_ttl: Duration,
    pub session_ttl: Duration,
    pub challenge_ttl: Duration,
    pub rate_limit_window_ms: u64,
    pub rate_limit_per_user: u32,
    pub rate_limit_per_identity_sign: u32,
    pub cors_allowed_origins: Vec<String>,
    pub bot_api_key: Option<String>,
}

impl ApiConfig {
    pub fn load() -> Self {
        Self {
            api_port: env_parsed("API_PORT", DEFAULT_API_PORT),
            enclave_base_url: env::var("ENCLAVE_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8090".to_string()),
            internal_api_key: env::var("INTERNAL_API_KEY").unwrap_or_default(),
            ticket_signing_secret: env::var("TICKET_SIGNING_SECRET").unwrap_or_default(),
            ticket_signing_secret_previous: env_string("TICKET_SIGNING_SECRET_PREVIOUS"),
            session_signing_secret: env::var("SESSION_SIGNING_SECRET").unwrap_or_default(),
            session_signing_secret_previous: env_string("SESSION_SIGNING_SECRET_PREVIOUS"),
            session_rotation_grace: Duration::from_secs(env_parsed(
                "SESSION_SIGNING_SECRET_PREVIOUS_GRACE_SECONDS",
                DEFAULT_ROTATION_GRACE_SECONDS,
            )),
            ticket_ttl: Duration::from_secs(env_parsed(
                "TICKET_TTL_SECONDS",
                DEFAULT_TICKET_TTL_SECONDS,
            )),
            session_ttl: Duration::from_secs(env_parsed(
                "SESSION_TTL_SECONDS",
                DEFAULT_SESSION_TTL_SECONDS,
            )),
            challenge_ttl: Duration::from_secs(env_parsed(
                "CHALLENGE_TTL_SECONDS",
                DEFAULT_CHALLENGE_TTL_SECONDS,
            )),
            rate_limit_window_ms: env_parsed(
                "RATE_LIMIT_WINDOW_MS",
                DEFAULT_RATE_LIMIT_WINDOW_MS,
            ),
            rate_limit_per_user: env_parsed(
                "RATE_LIMIT_PER_USER",
                DEFAULT_RATE_LIMIT_PER_USER,
            ),
            rate_limit_per_identity_sign: env_parsed(
                "RATE_LIMIT_PER_IDENTITY_SIGN",
                DEFAULT_RATE_LIMIT_PER_IDENTITY_SIGN,
            ),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default(),
            bot_api_key: env_string("BOT_API_KEY"),
        }
    }
}

/// Shared config used by the enclave service.
#[derive(Clone, Debug)]
pub struct EnclaveConfig {
    pub enclave_port: u16,
    pub internal_api_key: String,
    pub ticket_signing_secret: String,
    pub ticket_signing_secret_previous: Option<String>,
    pub sealing_key: Option<String>,
    pub kms_key_arn: Option<String>,
    pub aws_region: Option<String>,
}

impl EnclaveConfig {
    pub fn load() -> Self {
        Self {
            enclave_port: env_parsed("ENCLAVE_PORT", DEFAULT_ENCLAVE_PORT),
            internal_api_key: env::var("INTERNAL_API_KEY").unwrap_or_default(),
            ticket_signing_secret: env::var("TICKET_SIGNING_SECRET").unwrap_or_default(),
            ticket_signing_secret_previous: env_string("TICKET_SIGNING_SECRET_PREVIOUS"),
            sealing_key: env_string("SEALING_KEY"),
            kms_key_arn: env_string("KMS_KEY_ARN"),
            aws_region: env_string("AWS_REGION"),
        }
    }
}

static API_CONFIG: OnceCell<ApiConfig> = OnceCell::new();
static ENCLAVE_CONFIG: OnceCell<EnclaveConfig> = OnceCell::new();

pub fn api_config() -> &'static ApiConfig {
    API_CONFIG.get_or_init(ApiConfig::load)
}

pub fn enclave_config() -> &'static EnclaveConfig {
    ENCLAVE_CONFIG.get_or_init(EnclaveConfig::load)
}

/// Clamp a requested pagination `limit` into `[1, 200]`.
pub fn clamp_limit(limit: i64) -> u32 {
    limit.clamp(1, 200) as u32
}
