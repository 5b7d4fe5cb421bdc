//! Auth configuration
//!
//! Loaded from `auth.json` in the app config directory, with environment
//! overrides for pointing a build at a staging identity provider.

use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_FILE: &str = "auth.json";
const APP_NAME: &str = "Glint";

const ENV_WEB_HOST: &str = "GLINT_WEB_HOST";
const ENV_ISSUER: &str = "GLINT_ISSUER";
const ENV_JWKS_URL: &str = "GLINT_JWKS_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Website that hosts the sign-in pages
    pub web_host: String,
    /// Expected `iss` claim of identity tokens
    pub issuer: String,
    /// Published key set; derived from `issuer` when unset
    pub jwks_url: Option<String>,
    /// Expected `aud` claim, if the issuer sets one
    pub audience: Option<String>,
    /// Custom-protocol schemes registered by the installer
    pub schemes: Vec<String>,
    /// Service name used for OS secret-store entries
    pub keyring_service: String,
    pub http_timeout_secs: u64,
    pub state_ttl_secs: u64,
    pub jwks_max_age_secs: u64,
    /// Where non-secret auth bookkeeping lives
    pub data_dir: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            web_host: "https://glint.app".to_string(),
            issuer: "https://auth.glint.app".to_string(),
            jwks_url: None,
            audience: None,
            // Current site generation first, then the one it replaced
            schemes: vec!["glint".to_string(), "glint-app".to_string()],
            keyring_service: APP_NAME.to_string(),
            http_timeout_secs: 10,
            state_ttl_secs: 300,
            jwks_max_age_secs: 3600,
            data_dir: None,
        }
    }
}

impl AuthConfig {
    pub fn jwks_url(&self) -> String {
        match &self.jwks_url {
            Some(url) => url.clone(),
            None => format!(
                "{}/.well-known/jwks.json",
                self.issuer.trim_end_matches('/')
            ),
        }
    }

    /// Outbound sign-in URL bound to a state token
    pub fn login_url(&self, state: &str) -> String {
        format!(
            "{}/auth/desktop?state={}",
            self.web_host.trim_end_matches('/'),
            urlencoding::encode(state)
        )
    }

    /// Generic sign-in page used when the state-bound flow can't start
    pub fn fallback_login_url(&self) -> String {
        format!("{}/login", self.web_host.trim_end_matches('/'))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.state_ttl_secs)
    }

    pub fn jwks_max_age(&self) -> Duration {
        Duration::from_secs(self.jwks_max_age_secs)
    }

    pub fn resolved_data_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .clone()
            .or_else(|| dirs::data_local_dir().map(|d| d.join(APP_NAME)))
    }

    pub fn supports_scheme(&self, scheme: &str) -> bool {
        self.schemes.iter().any(|s| s.eq_ignore_ascii_case(scheme))
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup(ENV_WEB_HOST) {
            info!("Using web host override from {}", ENV_WEB_HOST);
            self.web_host = host;
        }
        if let Some(issuer) = lookup(ENV_ISSUER) {
            info!("Using issuer override from {}", ENV_ISSUER);
            self.issuer = issuer;
        }
        if let Some(url) = lookup(ENV_JWKS_URL) {
            info!("Using key set URL override from {}", ENV_JWKS_URL);
            self.jwks_url = Some(url);
        }
    }
}

/// Get the full path to the config file
/// Windows: %APPDATA%\Glint\auth.json
fn get_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_NAME).join(CONFIG_FILE))
}

fn read_config_file(path: &PathBuf) -> AuthConfig {
    if !path.exists() {
        debug!("Auth config file does not exist, using defaults");
        return AuthConfig::default();
    }

    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(config) => {
                info!("Loaded auth config from {:?}", path);
                config
            }
            Err(e) => {
                error!("Failed to parse auth config file: {}", e);
                AuthConfig::default()
            }
        },
        Err(e) => {
            error!("Failed to read auth config file: {}", e);
            AuthConfig::default()
        }
    }
}

/// Load config from disk, then apply environment overrides
pub fn load_config() -> AuthConfig {
    let mut config = match get_config_path() {
        Some(path) => read_config_file(&path),
        None => {
            debug!("Could not determine config path, using defaults");
            AuthConfig::default()
        }
    };
    config.apply_env_overrides(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
    config
}
