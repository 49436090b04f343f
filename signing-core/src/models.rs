//! Persisted and process-local data model (§3).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn now() -> u64 {
    now_unix()
}

pub fn new_id() -> Uuid {
    Uuid::new_v4()
}

static AUDIT_SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

/// Process-wide monotonic counter, used to break `created_at` ties between
/// audit events appended within the same second (`created_at` only has
/// one-second granularity).
pub fn next_seq() -> u64 {
    AUDIT_SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Pending,
    Active,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub external_id: String,
    pub status: UserStatus,
    pub created_at: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStatus {
    Active,
    Destroyed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub alg: String,
    /// 33-byte compressed public key, hex-encoded.
    pub public_key: String,
    pub status: IdentityStatus,
    pub created_at: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Challenge {
    pub id: Uuid,
    #[serde(default)]
    pub external_id: Option<String>,
    pub created_at: u64,
    pub expires_at: u64,
}

impl Challenge {
    pub fn is_expired(&self) -> bool {
        now_unix() >= self.expires_at
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub digest_hash: String,
    pub scope: String,
    /// Requested signature kind: `"schnorr"` or `"ecdsa"`.
    #[serde(default = "default_sig_alg")]
    pub sig_alg: String,
    pub nonce: String,
    pub expires_at: u64,
    #[serde(default)]
    pub used_at: Option<u64>,
}

pub fn default_sig_alg() -> String {
    "schnorr".to_string()
}

impl Ticket {
    pub fn is_expired(&self) -> bool {
        now_unix() >= self.expires_at
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyBackup {
    pub identity_id: Uuid,
    pub alg: String,
    /// Either `kms:<base64>` or `<iv-hex>:<ciphertext-hex>:<tag-hex>`.
    pub sealed_key: String,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    UserCreate,
    SessionCreate,
    IdentityCreate,
    IdentityCreateFailed,
    IdentitySign,
    IdentityDestroy,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::UserCreate => "user.create",
            AuditAction::SessionCreate => "session.create",
            AuditAction::IdentityCreate => "identity.create",
            AuditAction::IdentityCreateFailed => "identity.create_failed",
            AuditAction::IdentitySign => "identity.sign",
            AuditAction::IdentityDestroy => "identity.destroy",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub identity_id: Option<Uuid>,
    pub action: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: u64,
    /// Insertion-order tiebreaker for events sharing a `created_at` second.
    #[serde(default)]
    pub seq: u64,
}

/// Process-local only; never persisted.
#[derive(Clone)]
pub struct KeyRecord {
    pub identity_id: Uuid,
    pub alg: String,
    pub private_key: [u8; 32],
    pub public_key: String,
    pub created_at: u64,
}
