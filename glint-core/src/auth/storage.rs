//! Credential vault backed by the OS secret store
//!
//! Windows Credential Manager, macOS Keychain or the Secret Service on Linux,
//! via the keyring crate. Credentials never touch plaintext files; the only
//! thing written to disk is the non-secret id of the active account.

use super::types::{AuthError, StoredCredential};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyring::Entry;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

const ACTIVE_ACCOUNT_FILE: &str = "active_account.json";

/// Secure key-value store keyed by service name + account key
#[async_trait]
pub trait CredentialVault: Send + Sync {
    /// Replace the credential for `account_key`
    async fn store(&self, account_key: &str, credential: &StoredCredential)
        -> Result<(), AuthError>;

    /// `Ok(None)` when nothing is stored
    async fn retrieve(&self, account_key: &str) -> Result<Option<StoredCredential>, AuthError>;

    /// Idempotent
    async fn clear(&self, account_key: &str) -> Result<(), AuthError>;
}

pub struct KeyringVault {
    service: String,
}

impl KeyringVault {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(service: &str, account_key: &str) -> Result<Entry, keyring::Error> {
        Entry::new(service, account_key)
    }
}

#[async_trait]
impl CredentialVault for KeyringVault {
    async fn store(
        &self,
        account_key: &str,
        credential: &StoredCredential,
    ) -> Result<(), AuthError> {
        let json = serde_json::to_string(credential).map_err(|e| {
            AuthError::VaultWriteFailed(format!("Failed to serialize credential: {}", e))
        })?;
        let service = self.service.clone();
        let account = account_key.to_string();

        // Keyring calls block on the OS; keep them off the async workers
        tokio::task::spawn_blocking(move || {
            Self::entry(&service, &account)?.set_password(&json)
        })
        .await
        .map_err(|e| AuthError::VaultWriteFailed(e.to_string()))?
        .map_err(|e| {
            error!("Failed to store credential in keyring: {}", e);
            AuthError::VaultWriteFailed(e.to_string())
        })?;

        info!("Credential stored in OS secret store");
        Ok(())
    }

    async fn retrieve(&self, account_key: &str) -> Result<Option<StoredCredential>, AuthError> {
        let service = self.service.clone();
        let account = account_key.to_string();

        let result = tokio::task::spawn_blocking(move || {
            Self::entry(&service, &account)?.get_password()
        })
        .await
        .map_err(|e| AuthError::VaultReadFailed(e.to_string()))?;

        let json = match result {
            Ok(json) => json,
            Err(keyring::Error::NoEntry) => {
                debug!("No credential in keyring");
                return Ok(None);
            }
            Err(e) => {
                error!("Keyring read error: {}", e);
                return Err(AuthError::VaultReadFailed(e.to_string()));
            }
        };

        match serde_json::from_str::<StoredCredential>(&json) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                // Unreadable entry from an older build; drop it
                warn!("Failed to deserialize stored credential: {}", e);
                if let Err(e) = self.clear(account_key).await {
                    warn!("Failed to remove unreadable credential: {}", e);
                }
                Ok(None)
            }
        }
    }

    async fn clear(&self, account_key: &str) -> Result<(), AuthError> {
        let service = self.service.clone();
        let account = account_key.to_string();

        let result = tokio::task::spawn_blocking(move || {
            Self::entry(&service, &account)?.delete_credential()
        })
        .await
        .map_err(|e| AuthError::VaultWriteFailed(e.to_string()))?;

        match result {
            Ok(()) => {
                info!("Cleared credential from keyring");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => {
                debug!("No keyring credential to clear");
                Ok(())
            }
            Err(e) => {
                error!("Failed to clear keyring credential: {}", e);
                Err(AuthError::VaultWriteFailed(e.to_string()))
            }
        }
    }
}

/// Process-local vault for tests and headless runs where no OS secret
/// store is available. Counts writes and can simulate a locked store.
#[derive(Default)]
pub struct MemoryVault {
    entries: Mutex<HashMap<String, StoredCredential>>,
    writes: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `store` calls
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn contains(&self, account_key: &str) -> bool {
        self.entries.lock().contains_key(account_key)
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Also fails `clear`, which mutates the store
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CredentialVault for MemoryVault {
    async fn store(
        &self,
        account_key: &str,
        credential: &StoredCredential,
    ) -> Result<(), AuthError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AuthError::VaultWriteFailed("store is locked".to_string()));
        }
        self.entries
            .lock()
            .insert(account_key.to_string(), credential.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn retrieve(&self, account_key: &str) -> Result<Option<StoredCredential>, AuthError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AuthError::VaultReadFailed("store is locked".to_string()));
        }
        Ok(self.entries.lock().get(account_key).cloned())
    }

    async fn clear(&self, account_key: &str) -> Result<(), AuthError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AuthError::VaultWriteFailed("store is locked".to_string()));
        }
        self.entries.lock().remove(account_key);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ActiveAccount {
    account_key: String,
    updated_at: DateTime<Utc>,
}

/// Remembers which account key to read from the vault at startup
pub struct ActiveAccountIndex {
    path: Option<PathBuf>,
}

impl ActiveAccountIndex {
    pub fn new(data_dir: Option<PathBuf>) -> Self {
        let path = data_dir.map(|dir| dir.join(ACTIVE_ACCOUNT_FILE));
        if path.is_none() {
            warn!("No data directory; sign-in will not survive a restart");
        }
        Self { path }
    }

    pub fn load(&self) -> Option<String> {
        let path = self.path.as_ref()?;
        if !path.exists() {
            debug!("No active account recorded");
            return None;
        }

        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to read active account file: {}", e);
                return None;
            }
        };

        match serde_json::from_str::<ActiveAccount>(&json) {
            Ok(active) => Some(active.account_key),
            Err(e) => {
                error!("Failed to parse active account file: {}", e);
                let _ = std::fs::remove_file(path);
                None
            }
        }
    }

    /// Record the active account. Written to a sibling temp file and
    /// renamed over the index, so a failed write never leaves a torn file.
    pub fn save(&self, account_key: &str) -> Result<(), AuthError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| {
                error!("Failed to create data directory: {}", e);
                AuthError::VaultWriteFailed(format!("Failed to create data directory: {}", e))
            })?;
        }

        let active = ActiveAccount {
            account_key: account_key.to_string(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&active).map_err(|e| {
            AuthError::VaultWriteFailed(format!("Failed to serialize active account: {}", e))
        })?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)
            .and_then(|()| std::fs::rename(&tmp_path, path))
            .map_err(|e| {
                error!("Failed to write active account file: {}", e);
                let _ = std::fs::remove_file(&tmp_path);
                AuthError::VaultWriteFailed(format!("Failed to write active account file: {}", e))
            })
    }

    pub fn clear(&self) {
        let Some(path) = &self.path else {
            return;
        };
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to remove active account file: {}", e);
            }
        }
    }
}
