#![allow(dead_code)]

use chrono::{Duration, Utc};
use glint_core::auth::{
    AuthManager, BrowserLauncher, IdentityClaims, KeySetFetcher, MemoryVault, StaticKeySetFetcher,
};
use glint_core::AuthConfig;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::TempDir;

pub const ISSUER: &str = "https://auth.glint.app";
pub const JWKS_JSON: &str = include_str!("../../testdata/jwks.json");

const SIGNING_KID: &str = "glint-2026-01";
const SIGNING_KEY_PEM: &[u8] = include_bytes!("../../testdata/signing_key.pem");

pub fn mint_token(sub: &str, ttl: Duration) -> String {
    let now = Utc::now();
    let claims = IdentityClaims {
        sub: sub.to_string(),
        email: Some(format!("{}@example.com", sub)),
        name: Some("Test User".to_string()),
        iat: Some(now.timestamp()),
        exp: (now + ttl).timestamp(),
        iss: ISSUER.to_string(),
    };
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(SIGNING_KID.to_string());
    encode(
        &header,
        &claims,
        &EncodingKey::from_rsa_pem(SIGNING_KEY_PEM).unwrap(),
    )
    .unwrap()
}

/// Records opened URLs instead of launching a browser
#[derive(Default)]
pub struct RecordingBrowser {
    pub opened: Mutex<Vec<String>>,
}

impl BrowserLauncher for RecordingBrowser {
    fn open(&self, url: &str) -> Result<(), String> {
        self.opened.lock().push(url.to_string());
        Ok(())
    }
}

/// One simulated installation: the vault and data directory outlive any
/// single `AuthManager`, the way they outlive an app process
pub struct Install {
    pub vault: Arc<MemoryVault>,
    pub fetcher: Arc<StaticKeySetFetcher>,
    pub browser: Arc<RecordingBrowser>,
    pub dir: TempDir,
}

impl Install {
    pub fn new() -> Self {
        Self {
            vault: Arc::new(MemoryVault::new()),
            fetcher: Arc::new(StaticKeySetFetcher::from_json(JWKS_JSON).unwrap()),
            browser: Arc::new(RecordingBrowser::default()),
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn config(&self) -> AuthConfig {
        AuthConfig {
            data_dir: Some(self.dir.path().to_path_buf()),
            ..AuthConfig::default()
        }
    }

    /// Start a fresh "process"
    pub fn launch(&self) -> AuthManager {
        self.launch_with_fetcher(self.fetcher.clone())
    }

    pub fn launch_with_fetcher(&self, fetcher: Arc<dyn KeySetFetcher>) -> AuthManager {
        AuthManager::with_components(
            self.config(),
            self.vault.clone(),
            fetcher,
            self.browser.clone(),
        )
    }
}
