//! Singleton accessors for each store container, mirroring the teacher's
//! `sandboxes()` pattern: one `OnceCell<PersistentStore<V>>` per file.

use once_cell::sync::OnceCell;

use crate::error::Result;
use crate::models::{AuditEvent, Challenge, Identity, KeyBackup, Ticket, User};
use crate::store::{state_dir, PersistentStore};

static USERS: OnceCell<PersistentStore<User>> = OnceCell::new();
static IDENTITIES: OnceCell<PersistentStore<Identity>> = OnceCell::new();
static TICKETS: OnceCell<PersistentStore<Ticket>> = OnceCell::new();
static CHALLENGES: OnceCell<PersistentStore<Challenge>> = OnceCell::new();
static BACKUPS: OnceCell<PersistentStore<KeyBackup>> = OnceCell::new();
static AUDIT: OnceCell<PersistentStore<AuditEvent>> = OnceCell::new();

pub fn users() -> Result<&'static PersistentStore<User>> {
    USERS.get_or_try_init(|| PersistentStore::open(state_dir().join("users.json")))
}

pub fn identities() -> Result<&'static PersistentStore<Identity>> {
    IDENTITIES.get_or_try_init(|| PersistentStore::open(state_dir().join("identities.json")))
}

pub fn tickets() -> Result<&'static PersistentStore<Ticket>> {
    TICKETS.get_or_try_init(|| PersistentStore::open(state_dir().join("tickets.json")))
}

pub fn challenges() -> Result<&'static PersistentStore<Challenge>> {
    CHALLENGES.get_or_try_init(|| PersistentStore::open(state_dir().join("challenges.json")))
}

pub fn backups() -> Result<&'static PersistentStore<KeyBackup>> {
    BACKUPS.get_or_try_init(|| PersistentStore::open(state_dir().join("backups.json")))
}

pub fn audit() -> Result<&'static PersistentStore<AuditEvent>> {
    AUDIT.get_or_try_init(|| PersistentStore::open(state_dir().join("audit.json")))
}
