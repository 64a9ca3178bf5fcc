//! Storage seams for accounts, credentials and in-flight jobs
//!
//! The settings store that owns accounts and the journal that lets a
//! restarted process find its in-flight containers are both traits, so the
//! library can run against SQLite ([`crate::db::Database`]) or fully in
//! memory ([`MemoryStore`]).

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Credential, PlatformAccount};
use crate::workflow::PublishJob;

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_account(&self, account_id: &str) -> Result<Option<PlatformAccount>>;

    async fn list_accounts(&self) -> Result<Vec<PlatformAccount>>;

    /// Insert or replace an account record
    async fn put_account(&self, account: &PlatformAccount) -> Result<()>;

    /// Remove an account and the credential it references.
    ///
    /// Returns false if the account did not exist.
    async fn remove_account(&self, account_id: &str) -> Result<bool>;

    async fn get_credential(&self, credential_ref: &str) -> Result<Option<Credential>>;

    /// Replace the stored credential as a whole
    async fn put_credential(&self, credential_ref: &str, credential: &Credential) -> Result<()>;
}

/// Durable record of publish jobs
#[async_trait]
pub trait JobJournal: Send + Sync {
    /// Insert or update the job's current state
    async fn record(&self, job: &PublishJob) -> Result<()>;

    async fn load(&self, job_id: &str) -> Result<Option<PublishJob>>;

    /// Jobs that had not reached a terminal state when last recorded
    async fn unfinished(&self) -> Result<Vec<PublishJob>>;

    /// Most recently updated jobs first
    async fn recent(&self, limit: usize) -> Result<Vec<PublishJob>>;
}

/// In-memory implementation of both storage traits
#[derive(Default)]
pub struct MemoryStore {
    accounts: RwLock<HashMap<String, PlatformAccount>>,
    credentials: RwLock<HashMap<String, Credential>>,
    jobs: RwLock<HashMap<String, PublishJob>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account together with its credential
    pub fn with_account(self, account: PlatformAccount, credential: Credential) -> Self {
        write(&self.credentials).insert(account.credential_ref.clone(), credential);
        write(&self.accounts).insert(account.id.clone(), account);
        self
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get_account(&self, account_id: &str) -> Result<Option<PlatformAccount>> {
        Ok(read(&self.accounts).get(account_id).cloned())
    }

    async fn list_accounts(&self) -> Result<Vec<PlatformAccount>> {
        let mut accounts: Vec<_> = read(&self.accounts).values().cloned().collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(accounts)
    }

    async fn put_account(&self, account: &PlatformAccount) -> Result<()> {
        write(&self.accounts).insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn remove_account(&self, account_id: &str) -> Result<bool> {
        let removed = write(&self.accounts).remove(account_id);
        match removed {
            Some(account) => {
                write(&self.credentials).remove(&account.credential_ref);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_credential(&self, credential_ref: &str) -> Result<Option<Credential>> {
        Ok(read(&self.credentials).get(credential_ref).cloned())
    }

    async fn put_credential(&self, credential_ref: &str, credential: &Credential) -> Result<()> {
        write(&self.credentials).insert(credential_ref.to_string(), credential.clone());
        Ok(())
    }
}

#[async_trait]
impl JobJournal for MemoryStore {
    async fn record(&self, job: &PublishJob) -> Result<()> {
        write(&self.jobs).insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn load(&self, job_id: &str) -> Result<Option<PublishJob>> {
        Ok(read(&self.jobs).get(job_id).cloned())
    }

    async fn unfinished(&self) -> Result<Vec<PublishJob>> {
        let mut jobs: Vec<_> = read(&self.jobs)
            .values()
            .filter(|job| !job.state.is_terminal())
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.started_at);
        Ok(jobs)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<PublishJob>> {
        let mut jobs: Vec<_> = read(&self.jobs).values().cloned().collect();
        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        jobs.truncate(limit);
        Ok(jobs)
    }
}
