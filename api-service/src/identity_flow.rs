//! Sealed-backup orchestration (§4.4): identity creation sequences
//! generate → export → put_backup → create_identity as a single unit, and
//! sign/destroy transparently restore from backup on an enclave miss.

use serde_json::json;
use uuid::Uuid;

use signing_core::config::ApiConfig;
use signing_core::enclave_client;
use signing_core::error::{CoreError, Result};
use signing_core::models::{AuditAction, Identity, IdentityStatus};
use signing_core::repo;

pub async fn create_identity(config: &ApiConfig, user_id: Uuid, alg: &str) -> Result<Identity> {
    let identity_id = Uuid::new_v4();

    let generated = enclave_client::generate(
        &config.enclave_base_url,
        &config.internal_api_key,
        &json!({"identity_id": identity_id, "alg": alg}),
    )
    .await?;
    let public_key = generated["public_key"]
        .as_str()
        .ok_or_else(|| CoreError::Upstream("enclave generate response missing public_key".to_string()))?
        .to_string();

    let export_result = enclave_client::backup_export(
        &config.enclave_base_url,
        &config.internal_api_key,
        &identity_id.to_string(),
    )
    .await;

    let sealed_key = match export_result {
        Ok(body) => body["sealed_key"]
            .as_str()
            .ok_or_else(|| CoreError::Upstream("enclave export response missing sealed_key".to_string()))?
            .to_string(),
        Err(err) => {
            // Best-effort cleanup: the generated key must not be left
            // dangling in the enclave without a durable backup.
            let _ = enclave_client::destroy(
                &config.enclave_base_url,
                &config.internal_api_key,
                &identity_id.to_string(),
            )
            .await;
            repo::append_audit(
                user_id,
                None,
                AuditAction::IdentityCreateFailed,
                serde_json::Map::from_iter([(
                    "identity_id".to_string(),
                    serde_json::Value::String(identity_id.to_string()),
                )]),
            )?;
            return Err(err);
        }
    };

    repo::put_backup(identity_id, alg, &sealed_key)?;
    let identity = repo::create_identity(identity_id, user_id, alg, &public_key)?;
    repo::append_audit(user_id, Some(identity_id), AuditAction::IdentityCreate, Default::default())?;

    Ok(identity)
}

pub fn require_owned_active(identity: &Identity, user_id: Uuid) -> Result<()> {
    if identity.user_id != user_id {
        return Err(CoreError::NotFound(format!(
            "identity {} not found",
            identity.id
        )));
    }
    if identity.status != IdentityStatus::Active {
        return Err(CoreError::Conflict(format!(
            "identity {} is inactive",
            identity.id
        )));
    }
    Ok(())
}

/// Restore a backup into the enclave (§4.4 restore loop). Fails `conflict`
/// if no backup exists for `identity_id`.
async fn restore_from_backup(config: &ApiConfig, identity_id: Uuid) -> Result<()> {
    let backup = repo::get_backup(identity_id)?.ok_or_else(|| {
        CoreError::Conflict(format!(
            "key-not-present-and-no-backup for identity {identity_id}"
        ))
    })?;
    enclave_client::backup_import(
        &config.enclave_base_url,
        &config.internal_api_key,
        &json!({
            "identity_id": identity_id,
            "alg": backup.alg,
            "sealed_key": backup.sealed_key,
        }),
    )
    .await?;
    Ok(())
}

/// Sign over `digest_bytes` against `identity_id`, owned by `user_id`,
/// authorized by `ticket_token`. Transparently restores the enclave key
/// from backup on a 404 and retries exactly once (§4.4).
pub async fn sign(
    config: &ApiConfig,
    user_id: Uuid,
    identity_id: Uuid,
    digest_bytes: &[u8; 32],
    ticket_token: &str,
) -> Result<serde_json::Value> {
    let identity = repo::get_identity(identity_id)?;
    require_owned_active(&identity, user_id)?;

    let claims = signing_core::ticket::verify_ticket_claims(
        config,
        ticket_token,
        user_id,
        identity_id,
        digest_bytes,
    )?;
    let ticket = signing_core::ticket::load_consumable_ticket(claims.jti)?;

    let digest_hex = hex::encode(digest_bytes);
    let body = json!({
        "identity_id": identity_id,
        "digest": digest_hex,
        "ticket": ticket_token,
    });

    let result = match enclave_client::sign(&config.enclave_base_url, &config.internal_api_key, &body).await {
        Ok(v) => v,
        Err(CoreError::NotFound(_)) => {
            restore_from_backup(config, identity_id).await?;
            enclave_client::sign(&config.enclave_base_url, &config.internal_api_key, &body).await?
        }
        Err(e) => return Err(e),
    };

    repo::mark_ticket_used(ticket.id)?;
    repo::append_audit(
        user_id,
        Some(identity_id),
        AuditAction::IdentitySign,
        Default::default(),
    )?;

    Ok(result)
}

/// Destroy an identity: enclave key wipe (with restore-then-destroy
/// fallback), store-side deactivation, backup deletion, audit (§4.4, scenario 6).
pub async fn destroy(config: &ApiConfig, user_id: Uuid, identity_id: Uuid) -> Result<()> {
    let identity = repo::get_identity(identity_id)?;
    require_owned_active(&identity, user_id)?;

    let destroy_result = enclave_client::destroy(
        &config.enclave_base_url,
        &config.internal_api_key,
        &identity_id.to_string(),
    )
    .await;

    match destroy_result {
        Ok(_) => {}
        Err(CoreError::NotFound(_)) => {
            restore_from_backup(config, identity_id).await?;
            enclave_client::destroy(
                &config.enclave_base_url,
                &config.internal_api_key,
                &identity_id.to_string(),
            )
            .await?;
        }
        Err(e) => return Err(e),
    }

    repo::mark_identity_destroyed(identity_id)?;
    repo::delete_backup(identity_id)?;
    repo::append_audit(
        user_id,
        Some(identity_id),
        AuditAction::IdentityDestroy,
        serde_json::Map::from_iter([(
            "reason".to_string(),
            serde_json::Value::String("user-request".to_string()),
        )]),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use signing_core::models::now;

    fn sample_identity(user_id: Uuid, status: IdentityStatus) -> Identity {
        Identity {
            id: Uuid::new_v4(),
            user_id,
            alg: "secp256k1".into(),
            public_key: "02aa".into(),
            status,
            created_at: now(),
        }
    }

    #[test]
    fn rejects_other_users_identity_as_not_found() {
        let owner = Uuid::new_v4();
        let identity = sample_identity(owner, IdentityStatus::Active);
        let err = require_owned_active(&identity, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn rejects_destroyed_identity_as_conflict() {
        let owner = Uuid::new_v4();
        let identity = sample_identity(owner, IdentityStatus::Destroyed);
        let err = require_owned_active(&identity, owner).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[test]
    fn accepts_owned_active_identity() {
        let owner = Uuid::new_v4();
        let identity = sample_identity(owner, IdentityStatus::Active);
        assert!(require_owned_active(&identity, owner).is_ok());
    }
}
