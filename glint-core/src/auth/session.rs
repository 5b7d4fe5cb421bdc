//! Session manager - owns the in-memory session and its persistence
//!
//! The only writer of the session. UI collaborators read status through
//! `status()` or a `subscribe()` receiver and never touch the vault.

use super::storage::{ActiveAccountIndex, CredentialVault};
use super::types::{AuthError, AuthStatus, Session, StoredCredential, UserProfile};
use chrono::Utc;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

pub struct SessionManager {
    vault: Arc<dyn CredentialVault>,
    index: ActiveAccountIndex,
    session: Mutex<Session>,
    status: watch::Sender<AuthStatus>,
    restored: AtomicBool,
}

impl SessionManager {
    pub fn new(vault: Arc<dyn CredentialVault>, index: ActiveAccountIndex) -> Self {
        let (status, _) = watch::channel(AuthStatus::Unauthenticated);
        Self {
            vault,
            index,
            session: Mutex::new(Session::unauthenticated()),
            status,
            restored: AtomicBool::new(false),
        }
    }

    /// Restore a previously stored session. Called at startup, before any
    /// auth-dependent UI renders. Purely local: no network.
    ///
    /// A storage failure leaves the manager unrestored, so calling this
    /// again after the user unlocks their keychain retries the read.
    pub async fn restore(&self) -> Result<AuthStatus, AuthError> {
        if self.restored.load(Ordering::SeqCst) || self.is_authenticated() {
            debug!("Session already restored; keeping current session");
            return Ok(self.status());
        }

        info!("Checking for stored session...");
        let Some(account_key) = self.index.load() else {
            info!("No stored session found. User needs to sign in.");
            self.restored.store(true, Ordering::SeqCst);
            return Ok(self.publish(AuthStatus::Unauthenticated));
        };

        let credential = match self.vault.retrieve(&account_key).await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                info!("Active account has no stored credential");
                self.index.clear();
                self.restored.store(true, Ordering::SeqCst);
                return Ok(self.publish(AuthStatus::Unauthenticated));
            }
            Err(e) => {
                // Locked keychain: surface it instead of silently logging out
                error!("Failed to read stored session: {}", e);
                self.publish(AuthStatus::Error(e.clone()));
                return Err(e);
            }
        };
        self.restored.store(true, Ordering::SeqCst);

        if credential.is_expired() {
            info!(
                "Stored session expired at {}; clearing it",
                credential.expires_at
            );
            if let Err(e) = self.vault.clear(&account_key).await {
                warn!("Failed to clear expired credential: {}", e);
            }
            self.index.clear();
            return Ok(self.publish(AuthStatus::Unauthenticated));
        }

        info!("Restored session for {}", credential.profile.email);
        *self.session.lock() = Session::from_credential(&credential);
        Ok(self.publish(AuthStatus::Authenticated(credential.profile)))
    }

    /// Persist a verified credential and mark the session authenticated.
    /// The vault write happens first; on failure the session is untouched
    /// and the caller reports the error.
    pub async fn on_callback_success(
        &self,
        profile: UserProfile,
        credential: StoredCredential,
    ) -> Result<(), AuthError> {
        // Covers a previous account that was never loaded, e.g. after a
        // failed restore
        let indexed_key = self.index.load();

        self.vault
            .store(&credential.account_key, &credential)
            .await
            .inspect_err(|e| error!("Failed to persist credential: {}", e))?;

        if let Err(e) = self.index.save(&credential.account_key) {
            // Without the index the credential can't be found at startup
            if let Err(clear_err) = self.vault.clear(&credential.account_key).await {
                warn!("Failed to roll back stored credential: {}", clear_err);
            }
            return Err(e);
        }

        let mut session = Session::from_credential(&credential);
        session.profile = Some(profile.clone());
        let previous = std::mem::replace(&mut *self.session.lock(), session);
        self.restored.store(true, Ordering::SeqCst);

        if let Some(old_key) = previous.account_key.or(indexed_key) {
            if old_key != credential.account_key {
                info!("Switched accounts; removing previous credential");
                if let Err(e) = self.vault.clear(&old_key).await {
                    warn!("Failed to clear previous account credential: {}", e);
                }
            }
        }

        info!("Session authenticated for {}", profile.email);
        self.publish(AuthStatus::Authenticated(profile));
        Ok(())
    }

    /// Report a failed attempt to subscribers. An existing authenticated
    /// session is left alone.
    pub fn report_failure(&self, error: &AuthError) {
        if self.session.lock().authenticated {
            debug!("Ignoring failed attempt while signed in: {}", error);
            return;
        }
        self.publish(AuthStatus::Error(error.clone()));
    }

    /// Sign out. In-memory state clears first, so a vault failure can't leave
    /// the session authenticated; the failure is returned after logging.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        info!("Signing out");
        let previous = std::mem::take(&mut *self.session.lock());
        // The session may hold no key if restore never got past the vault
        let account_key = previous.account_key.or_else(|| self.index.load());
        self.index.clear();
        self.publish(AuthStatus::Unauthenticated);

        let Some(account_key) = account_key else {
            return Ok(());
        };
        match self.vault.clear(&account_key).await {
            Ok(()) => {
                info!("Signed out successfully");
                Ok(())
            }
            Err(e) => {
                error!("Signed out, but failed to clear stored credential: {}", e);
                Err(e)
            }
        }
    }

    /// End an authenticated session whose credential has expired.
    /// Returns true if the session was ended.
    pub async fn check_expiry(&self) -> bool {
        let expired_key = {
            let mut session = self.session.lock();
            if !session.authenticated || !session.is_expired() {
                return false;
            }
            std::mem::take(&mut *session).account_key
        };

        info!("Session expired; signing out");
        self.index.clear();
        if let Some(key) = expired_key {
            if let Err(e) = self.vault.clear(&key).await {
                warn!("Failed to clear expired credential: {}", e);
            }
        }
        self.publish(AuthStatus::Unauthenticated);
        true
    }

    /// Record user activity on the current session
    pub fn touch(&self) {
        let mut session = self.session.lock();
        if session.authenticated {
            session.last_activity = Utc::now();
        }
    }

    pub fn session(&self) -> Session {
        self.session.lock().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.lock().authenticated
    }

    pub fn status(&self) -> AuthStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.status.subscribe()
    }

    fn publish(&self, status: AuthStatus) -> AuthStatus {
        self.status.send_replace(status.clone());
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::MemoryVault;
    use chrono::{DateTime, Duration};
    use tempfile::TempDir;

    fn profile(id: &str) -> UserProfile {
        UserProfile {
            id: id.to_string(),
            email: format!("{}@example.com", id),
            display_name: None,
            avatar_url: None,
        }
    }

    fn credential(id: &str, expires_at: DateTime<Utc>) -> StoredCredential {
        StoredCredential {
            service_name: "Glint".to_string(),
            account_key: id.to_string(),
            token: "header.payload.signature".to_string(),
            refresh_token: None,
            profile: profile(id),
            expires_at,
            stored_at: Utc::now(),
        }
    }

    fn manager() -> (SessionManager, Arc<MemoryVault>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let vault = Arc::new(MemoryVault::new());
        let manager = SessionManager::new(
            vault.clone(),
            ActiveAccountIndex::new(Some(dir.path().to_path_buf())),
        );
        (manager, vault, dir)
    }

    fn restart(vault: Arc<MemoryVault>, dir: &TempDir) -> SessionManager {
        SessionManager::new(vault, ActiveAccountIndex::new(Some(dir.path().to_path_buf())))
    }

    #[tokio::test]
    async fn test_restore_with_nothing_stored() {
        let (manager, _, _dir) = manager();
        assert_eq!(manager.restore().await, Ok(AuthStatus::Unauthenticated));
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_callback_success_then_restore() {
        let (manager, vault, dir) = manager();
        manager
            .on_callback_success(
                profile("user-1"),
                credential("user-1", Utc::now() + Duration::hours(1)),
            )
            .await
            .unwrap();
        assert!(manager.is_authenticated());
        assert_eq!(vault.write_count(), 1);

        let restarted = restart(vault, &dir);
        assert_eq!(
            restarted.restore().await,
            Ok(AuthStatus::Authenticated(profile("user-1")))
        );
        assert!(restarted.session().session_valid);
    }

    #[tokio::test]
    async fn test_restore_expired_credential_is_cleared() {
        let (manager, vault, dir) = manager();
        manager
            .on_callback_success(
                profile("user-1"),
                credential("user-1", Utc::now() + Duration::hours(1)),
            )
            .await
            .unwrap();
        // Simulate the token aging out while the app was closed
        vault
            .store("user-1", &credential("user-1", Utc::now() - Duration::minutes(1)))
            .await
            .unwrap();

        let restarted = restart(vault.clone(), &dir);
        assert_eq!(restarted.restore().await, Ok(AuthStatus::Unauthenticated));
        assert!(!vault.contains("user-1"));
    }

    #[tokio::test]
    async fn test_restore_surfaces_locked_store() {
        let (manager, vault, dir) = manager();
        manager
            .on_callback_success(
                profile("user-1"),
                credential("user-1", Utc::now() + Duration::hours(1)),
            )
            .await
            .unwrap();
        vault.set_fail_reads(true);

        let restarted = restart(vault, &dir);
        let err = restarted.restore().await.unwrap_err();
        assert!(matches!(err, AuthError::VaultReadFailed(_)));
        assert_eq!(restarted.status(), AuthStatus::Error(err));
        // The entry must survive so unlocking the keychain restores the session
        assert!(!restarted.is_authenticated());
    }

    #[tokio::test]
    async fn test_restore_only_once() {
        let (manager, _, _dir) = manager();
        assert_eq!(manager.restore().await, Ok(AuthStatus::Unauthenticated));
        manager
            .on_callback_success(
                profile("user-1"),
                credential("user-1", Utc::now() + Duration::hours(1)),
            )
            .await
            .unwrap();
        // Second call keeps the live session rather than rereading storage
        assert!(manager.restore().await.unwrap().is_authenticated());
    }

    #[tokio::test]
    async fn test_vault_write_failure_leaves_session_unchanged() {
        let (manager, vault, _dir) = manager();
        vault.set_fail_writes(true);
        let result = manager
            .on_callback_success(
                profile("user-1"),
                credential("user-1", Utc::now() + Duration::hours(1)),
            )
            .await;
        assert!(matches!(result, Err(AuthError::VaultWriteFailed(_))));
        assert!(!manager.is_authenticated());
        // Reporting is left to the caller
        assert_eq!(manager.status(), AuthStatus::Unauthenticated);
    }

    #[tokio::test]
    async fn test_index_write_failure_rolls_back_credential() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("data");
        std::fs::write(&blocker, "not a directory").unwrap();
        let vault = Arc::new(MemoryVault::new());
        let manager = SessionManager::new(vault.clone(), ActiveAccountIndex::new(Some(blocker)));

        let result = manager
            .on_callback_success(
                profile("user-1"),
                credential("user-1", Utc::now() + Duration::hours(1)),
            )
            .await;
        assert!(matches!(result, Err(AuthError::VaultWriteFailed(_))));
        assert!(!vault.contains("user-1"));
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_restore_retries_after_store_unlocked() {
        let (manager, vault, dir) = manager();
        manager
            .on_callback_success(
                profile("user-1"),
                credential("user-1", Utc::now() + Duration::hours(1)),
            )
            .await
            .unwrap();
        vault.set_fail_reads(true);

        let restarted = restart(vault.clone(), &dir);
        assert!(restarted.restore().await.is_err());

        vault.set_fail_reads(false);
        assert_eq!(
            restarted.restore().await,
            Ok(AuthStatus::Authenticated(profile("user-1")))
        );
        assert!(restarted.is_authenticated());
    }

    #[tokio::test]
    async fn test_sign_out_after_failed_restore_clears_stored_credential() {
        let (manager, vault, dir) = manager();
        manager
            .on_callback_success(
                profile("user-1"),
                credential("user-1", Utc::now() + Duration::hours(1)),
            )
            .await
            .unwrap();
        vault.set_fail_reads(true);

        let restarted = restart(vault.clone(), &dir);
        assert!(restarted.restore().await.is_err());
        restarted.sign_out().await.unwrap();

        assert!(!vault.contains("user-1"));
        assert_eq!(ActiveAccountIndex::new(Some(dir.path().to_path_buf())).load(), None);
    }

    #[tokio::test]
    async fn test_login_after_failed_restore_replaces_unloaded_account() {
        let (manager, vault, dir) = manager();
        let later = Utc::now() + Duration::hours(1);
        manager
            .on_callback_success(profile("user-1"), credential("user-1", later))
            .await
            .unwrap();
        vault.set_fail_reads(true);

        let restarted = restart(vault.clone(), &dir);
        assert!(restarted.restore().await.is_err());
        restarted
            .on_callback_success(profile("user-2"), credential("user-2", later))
            .await
            .unwrap();

        assert!(!vault.contains("user-1"));
        assert!(vault.contains("user-2"));
    }

    #[tokio::test]
    async fn test_sign_out_clears_vault_and_notifies() {
        let (manager, vault, _dir) = manager();
        let mut rx = manager.subscribe();
        manager
            .on_callback_success(
                profile("user-1"),
                credential("user-1", Utc::now() + Duration::hours(1)),
            )
            .await
            .unwrap();
        assert!(rx.borrow_and_update().is_authenticated());

        manager.sign_out().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), AuthStatus::Unauthenticated);
        assert!(vault.is_empty());
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_sign_out_tolerates_vault_failure() {
        let (manager, vault, _dir) = manager();
        manager
            .on_callback_success(
                profile("user-1"),
                credential("user-1", Utc::now() + Duration::hours(1)),
            )
            .await
            .unwrap();
        vault.set_fail_writes(true);

        assert!(manager.sign_out().await.is_err());
        assert!(!manager.is_authenticated());
        assert_eq!(manager.status(), AuthStatus::Unauthenticated);
    }

    #[tokio::test]
    async fn test_account_switch_removes_old_credential() {
        let (manager, vault, _dir) = manager();
        let later = Utc::now() + Duration::hours(1);
        manager
            .on_callback_success(profile("user-1"), credential("user-1", later))
            .await
            .unwrap();
        manager
            .on_callback_success(profile("user-2"), credential("user-2", later))
            .await
            .unwrap();
        assert!(!vault.contains("user-1"));
        assert!(vault.contains("user-2"));
    }

    #[tokio::test]
    async fn test_check_expiry_ends_session() {
        let (manager, vault, _dir) = manager();
        manager
            .on_callback_success(
                profile("user-1"),
                credential("user-1", Utc::now() - Duration::seconds(1)),
            )
            .await
            .unwrap();
        assert!(manager.check_expiry().await);
        assert!(!manager.is_authenticated());
        assert!(vault.is_empty());
        assert!(!manager.check_expiry().await);
    }

    #[tokio::test]
    async fn test_report_failure_keeps_signed_in_status() {
        let (manager, _, _dir) = manager();
        manager.report_failure(&AuthError::CsrfMismatch);
        assert_eq!(manager.status(), AuthStatus::Error(AuthError::CsrfMismatch));

        manager
            .on_callback_success(
                profile("user-1"),
                credential("user-1", Utc::now() + Duration::hours(1)),
            )
            .await
            .unwrap();
        manager.report_failure(&AuthError::CsrfMismatch);
        assert!(manager.status().is_authenticated());
    }

    #[test]
    fn test_touch_updates_activity_only_when_signed_in() {
        let (manager, _, _dir) = manager();
        let before = manager.session().last_activity;
        manager.touch();
        assert_eq!(manager.session().last_activity, before);
    }
}
