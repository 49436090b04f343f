//! Higher-level store contracts built on the raw containers (§4.6).

use uuid::Uuid;

use crate::containers;
use crate::error::{CoreError, Result};
use crate::models::{
    next_seq, now, new_id, AuditAction, AuditEvent, Challenge, Identity, IdentityStatus, KeyBackup,
    Ticket, User, UserStatus,
};

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// `create-or-get-by-external-id` — returns `(user, created)`.
pub fn create_or_get_user_by_external_id(external_id: &str) -> Result<(User, bool)> {
    let store = containers::users()?;
    let id = new_id();
    store.find_or_insert_with(
        |u| u.external_id == external_id,
        id.to_string(),
        || User {
            id,
            external_id: external_id.to_string(),
            status: UserStatus::Active,
            created_at: now(),
        },
    )
}

pub fn get_user_by_id(user_id: Uuid) -> Result<User> {
    containers::users()?
        .get(&user_id.to_string())?
        .ok_or_else(|| CoreError::NotFound(format!("user {user_id} not found")))
}

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

pub fn create_identity(
    identity_id: Uuid,
    user_id: Uuid,
    alg: &str,
    public_key: &str,
) -> Result<Identity> {
    let identity = Identity {
        id: identity_id,
        user_id,
        alg: alg.to_string(),
        public_key: public_key.to_string(),
        status: IdentityStatus::Active,
        created_at: now(),
    };
    let inserted = containers::identities()?
        .insert_if_absent(identity_id.to_string(), identity.clone())?;
    if !inserted {
        return Err(CoreError::Conflict(format!(
            "identity {identity_id} already exists"
        )));
    }
    Ok(identity)
}

pub fn get_identity(identity_id: Uuid) -> Result<Identity> {
    containers::identities()?
        .get(&identity_id.to_string())?
        .ok_or_else(|| CoreError::NotFound(format!("identity {identity_id} not found")))
}

pub fn list_identities_by_user(user_id: Uuid) -> Result<Vec<Identity>> {
    let all = containers::identities()?.values()?;
    Ok(all.into_iter().filter(|i| i.user_id == user_id).collect())
}

pub fn mark_identity_destroyed(identity_id: Uuid) -> Result<()> {
    let found = containers::identities()?.update(&identity_id.to_string(), |identity| {
        identity.status = IdentityStatus::Destroyed;
    })?;
    if !found {
        return Err(CoreError::NotFound(format!(
            "identity {identity_id} not found"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tickets
// ---------------------------------------------------------------------------

pub fn create_ticket(ticket: Ticket) -> Result<()> {
    containers::tickets()?.insert(ticket.id.to_string(), ticket)
}

pub fn get_ticket(ticket_id: Uuid) -> Result<Option<Ticket>> {
    containers::tickets()?.get(&ticket_id.to_string())
}

/// Idempotent: a second call on an already-used ticket is a no-op.
pub fn mark_ticket_used(ticket_id: Uuid) -> Result<bool> {
    containers::tickets()?.update(&ticket_id.to_string(), |ticket| {
        if ticket.used_at.is_none() {
            ticket.used_at = Some(now());
        }
    })
}

// ---------------------------------------------------------------------------
// Challenges
// ---------------------------------------------------------------------------

pub fn create_challenge(external_id: Option<String>, ttl_secs: u64) -> Result<Challenge> {
    let challenge = Challenge {
        id: new_id(),
        external_id,
        created_at: now(),
        expires_at: now() + ttl_secs,
    };
    containers::challenges()?.insert(challenge.id.to_string(), challenge.clone())?;
    Ok(challenge)
}

/// Returns `None` for a missing or expired challenge (§3 invariant 4).
pub fn get_live_challenge(challenge_id: Uuid) -> Result<Option<Challenge>> {
    let challenge = containers::challenges()?.get(&challenge_id.to_string())?;
    Ok(challenge.filter(|c| !c.is_expired()))
}

#[derive(Debug, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved,
    AlreadyConsumed,
    NotFound,
}

/// First-writer-wins resolution (§4.1, §3 invariant). A challenge already
/// deleted by `verify` (consumed) is reported distinctly from a challenge
/// that never existed, per the resolved open question in SPEC_FULL §9.
pub fn resolve_challenge(challenge_id: Uuid, external_id: &str) -> Result<ResolveOutcome> {
    let store = containers::challenges()?;
    let found = store.update(&challenge_id.to_string(), |challenge| {
        if challenge.external_id.is_none() && !challenge.is_expired() {
            challenge.external_id = Some(external_id.to_string());
        }
    })?;
    if !found {
        return Ok(ResolveOutcome::NotFound);
    }
    match store.get(&challenge_id.to_string())? {
        Some(c) if c.external_id.as_deref() == Some(external_id) => Ok(ResolveOutcome::Resolved),
        _ => Ok(ResolveOutcome::AlreadyConsumed),
    }
}

/// Consume (delete) a challenge after a successful `verify`.
pub fn delete_challenge(challenge_id: Uuid) -> Result<()> {
    containers::challenges()?.remove(&challenge_id.to_string())?;
    Ok(())
}

/// Background purge of expired challenge rows.
pub fn purge_expired_challenges() -> Result<()> {
    containers::challenges()?.retain(|c| !c.is_expired())
}

// ---------------------------------------------------------------------------
// Backups
// ---------------------------------------------------------------------------

pub fn put_backup(identity_id: Uuid, alg: &str, sealed_key: &str) -> Result<()> {
    let store = containers::backups()?;
    let existing = store.get(&identity_id.to_string())?;
    let created_at = existing.map(|b| b.created_at).unwrap_or_else(now);
    let backup = KeyBackup {
        identity_id,
        alg: alg.to_string(),
        sealed_key: sealed_key.to_string(),
        created_at,
        updated_at: now(),
    };
    store.insert(identity_id.to_string(), backup)
}

pub fn get_backup(identity_id: Uuid) -> Result<Option<KeyBackup>> {
    containers::backups()?.get(&identity_id.to_string())
}

pub fn delete_backup(identity_id: Uuid) -> Result<()> {
    containers::backups()?.remove(&identity_id.to_string())?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

pub fn append_audit(
    user_id: Uuid,
    identity_id: Option<Uuid>,
    action: AuditAction,
    metadata: serde_json::Map<String, serde_json::Value>,
) -> Result<()> {
    let event = AuditEvent {
        id: new_id(),
        user_id,
        identity_id,
        action: action.as_str().to_string(),
        metadata,
        created_at: now(),
        seq: next_seq(),
    };
    containers::audit()?.insert(event.id.to_string(), event)
}

/// Newest-first, per-user, with `limit`/`offset` already clamped by the caller.
/// Ties within the same `created_at` second are broken by insertion order
/// (`seq`), since `created_at` alone only has one-second granularity.
pub fn list_audit_by_user(user_id: Uuid, limit: u32, offset: u32) -> Result<(Vec<AuditEvent>, usize)> {
    let mut events: Vec<AuditEvent> = containers::audit()?
        .values()?
        .into_iter()
        .filter(|e| e.user_id == user_id)
        .collect();
    events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.seq.cmp(&a.seq)));
    let total = events.len();
    let page = events
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect();
    Ok((page, total))
}
