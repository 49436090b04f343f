//! In-memory key store and nonce ledger (§4.3). Nothing here is persisted;
//! durability is the API's job via sealed backups.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use once_cell::sync::Lazy;
use uuid::Uuid;

use signing_core::models::KeyRecord;

struct KeyStoreInner {
    keys: HashMap<Uuid, KeyRecord>,
}

pub struct KeyStore {
    inner: RwLock<KeyStoreInner>,
}

impl KeyStore {
    fn new() -> Self {
        Self {
            inner: RwLock::new(KeyStoreInner {
                keys: HashMap::new(),
            }),
        }
    }

    pub fn insert(&self, record: KeyRecord) {
        let mut inner = self.inner.write().expect("key store lock poisoned");
        inner.keys.insert(record.identity_id, record);
    }

    pub fn get(&self, identity_id: Uuid) -> Option<KeyRecord> {
        let inner = self.inner.read().expect("key store lock poisoned");
        inner.keys.get(&identity_id).cloned()
    }

    pub fn remove(&self, identity_id: Uuid) -> Option<KeyRecord> {
        let mut inner = self.inner.write().expect("key store lock poisoned");
        inner.keys.remove(&identity_id)
    }
}

static KEY_STORE: Lazy<KeyStore> = Lazy::new(KeyStore::new);

pub fn key_store() -> &'static KeyStore {
    &KEY_STORE
}

/// Replay barrier for ticket nonces (§4.3 "Nonce ledger semantics").
/// Entries survive only for this process's lifetime; pruned lazily on each
/// `sign` call by comparing against the recorded ticket expiry.
struct NonceLedgerInner {
    seen: HashSet<String>,
    expirations: HashMap<String, u64>,
}

pub struct NonceLedger {
    inner: RwLock<NonceLedgerInner>,
}

impl NonceLedger {
    fn new() -> Self {
        Self {
            inner: RwLock::new(NonceLedgerInner {
                seen: HashSet::new(),
                expirations: HashMap::new(),
            }),
        }
    }

    /// Prune entries whose recorded `exp <= now`, then atomically test and
    /// insert `nonce`. Returns `true` if this is the first time `nonce` has
    /// been observed (and therefore sign should proceed).
    pub fn check_and_insert(&self, nonce: &str, exp: u64, now: u64) -> bool {
        let mut inner = self.inner.write().expect("nonce ledger lock poisoned");
        let expired: Vec<String> = inner
            .expirations
            .iter()
            .filter(|(_, exp)| **exp <= now)
            .map(|(n, _)| n.clone())
            .collect();
        for n in expired {
            inner.expirations.remove(&n);
            inner.seen.remove(&n);
        }

        if inner.seen.contains(nonce) {
            return false;
        }
        inner.seen.insert(nonce.to_string());
        inner.expirations.insert(nonce.to_string(), exp);
        true
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("nonce ledger lock poisoned").seen.len()
    }

    /// Periodic backstop sweep (§5.1): the per-`sign` prune in
    /// `check_and_insert` is the primary mechanism, but this bounds memory
    /// during a quiet period with no incoming signs.
    pub fn prune(&self, now: u64) {
        let mut inner = self.inner.write().expect("nonce ledger lock poisoned");
        let expired: Vec<String> = inner
            .expirations
            .iter()
            .filter(|(_, exp)| **exp <= now)
            .map(|(n, _)| n.clone())
            .collect();
        for n in expired {
            inner.expirations.remove(&n);
            inner.seen.remove(&n);
        }
    }
}

static NONCE_LEDGER: Lazy<NonceLedger> = Lazy::new(NonceLedger::new);

pub fn nonce_ledger() -> &'static NonceLedger {
    &NONCE_LEDGER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_ledger_rejects_replay() {
        let ledger = NonceLedger::new();
        assert!(ledger.check_and_insert("n1", 1_000, 0));
        assert!(!ledger.check_and_insert("n1", 1_000, 0));
    }

    #[test]
    fn nonce_ledger_prunes_expired() {
        let ledger = NonceLedger::new();
        assert!(ledger.check_and_insert("n1", 10, 0));
        // Advance past expiry; the entry should be pruned before the
        // membership check, so the same nonce may be reused for a new
        // ticket whose expiry we no longer track.
        assert!(ledger.check_and_insert("n1", 10, 20));
    }

    #[test]
    fn key_store_insert_get_remove() {
        let store = KeyStore::new();
        let id = Uuid::new_v4();
        store.insert(KeyRecord {
            identity_id: id,
            alg: "secp256k1".into(),
            private_key: [1u8; 32],
            public_key: "02aa".into(),
            created_at: 0,
        });
        assert!(store.get(id).is_some());
        assert!(store.remove(id).is_some());
        assert!(store.get(id).is_none());
    }
}
