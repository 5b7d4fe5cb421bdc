//! Browser-delegated login: issue a state token and open the sign-in page

use super::state_token::StateTokenManager;
use super::types::{redact, AttemptState, AuthError};
use crate::config::AuthConfig;
use log::{error, info};
use std::sync::Arc;

/// Hands a URL to the OS "open in default browser" facility
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> Result<(), String>;
}

pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> Result<(), String> {
        open::that(url).map_err(|e| e.to_string())
    }
}

pub struct LoginInitiator {
    config: Arc<AuthConfig>,
    states: Arc<StateTokenManager>,
    browser: Arc<dyn BrowserLauncher>,
}

impl LoginInitiator {
    pub fn new(
        config: Arc<AuthConfig>,
        states: Arc<StateTokenManager>,
        browser: Arc<dyn BrowserLauncher>,
    ) -> Self {
        Self {
            config,
            states,
            browser,
        }
    }

    /// Start a sign-in attempt. Returns the issued state for telemetry.
    ///
    /// On `BrowserLaunchFailed` the caller may offer `fallback_login_url()`,
    /// which carries no state and so can only complete via the direct-link
    /// callback.
    pub fn start_login(&self) -> Result<String, AuthError> {
        info!("Starting browser sign-in flow");
        let state = self.states.issue();
        let url = self.config.login_url(&state);

        info!(
            "Opening browser to {}/auth/desktop (state {})",
            self.config.web_host.trim_end_matches('/'),
            redact(&state)
        );
        if let Err(e) = self.browser.open(&url) {
            error!("Failed to open browser: {}", e);
            self.states.cancel();
            return Err(AuthError::BrowserLaunchFailed(e));
        }

        info!("Waiting for sign-in callback");
        Ok(state)
    }

    pub fn fallback_login_url(&self) -> String {
        self.config.fallback_login_url()
    }

    pub fn attempt_state(&self) -> AttemptState {
        if self.states.is_pending() {
            AttemptState::AwaitingCallback
        } else {
            AttemptState::Idle
        }
    }

    pub fn cancel_login(&self) {
        self.states.cancel();
    }
}
