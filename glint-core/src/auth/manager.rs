//! Auth manager - wires the auth components together
//!
//! The one object an application shell holds. Construct it early, hand
//! `source()` to the platform deep-link hooks, then call `bootstrap()` with
//! the process arguments once the async runtime is up.

use super::callback::CallbackProcessor;
use super::deep_link::{
    launch_event_from_args, DeepLinkDispatcher, DeepLinkReceiver, DeepLinkSource,
    DispatchOutcome,
};
use super::login::{BrowserLauncher, LoginInitiator, SystemBrowser};
use super::session::SessionManager;
use super::state_token::StateTokenManager;
use super::storage::{ActiveAccountIndex, CredentialVault, KeyringVault};
use super::types::{AttemptState, AuthError, AuthStatus, Session};
use super::verifier::{HttpKeySetFetcher, KeySetFetcher, TokenVerifier};
use crate::config::AuthConfig;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How often an authenticated session is checked against its expiry
const EXPIRY_CHECK_INTERVAL: Duration = Duration::from_secs(60);

pub struct AuthManager {
    config: Arc<AuthConfig>,
    sessions: Arc<SessionManager>,
    login: LoginInitiator,
    dispatcher: Arc<DeepLinkDispatcher>,
    source: DeepLinkSource,
    receiver: Mutex<Option<DeepLinkReceiver>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AuthManager {
    /// Production wiring: OS keyring, HTTPS key set, system browser
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        let vault = Arc::new(KeyringVault::new(config.keyring_service.clone()));
        let fetcher = Arc::new(HttpKeySetFetcher::new(
            config.jwks_url(),
            config.http_timeout(),
        )?);
        Ok(Self::with_components(
            config,
            vault,
            fetcher,
            Arc::new(SystemBrowser),
        ))
    }

    pub fn with_components(
        config: AuthConfig,
        vault: Arc<dyn CredentialVault>,
        fetcher: Arc<dyn KeySetFetcher>,
        browser: Arc<dyn BrowserLauncher>,
    ) -> Self {
        let config = Arc::new(config);
        let states = Arc::new(StateTokenManager::new(config.state_ttl()));
        let verifier = Arc::new(
            TokenVerifier::new(fetcher, config.issuer.clone())
                .with_audience(config.audience.clone())
                .with_max_age(config.jwks_max_age()),
        );
        let sessions = Arc::new(SessionManager::new(
            vault,
            ActiveAccountIndex::new(config.resolved_data_dir()),
        ));
        let processor = Arc::new(CallbackProcessor::new(
            config.keyring_service.clone(),
            states.clone(),
            verifier,
            sessions.clone(),
        ));
        let dispatcher = Arc::new(DeepLinkDispatcher::new(
            config.clone(),
            processor,
            sessions.clone(),
        ));
        let login = LoginInitiator::new(config.clone(), states, browser);
        let (source, receiver) = DeepLinkSource::channel(config.schemes.clone());

        Self {
            config,
            sessions,
            login,
            dispatcher,
            source,
            receiver: Mutex::new(Some(receiver)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Startup sequence: buffer a launch deep link, restore the stored
    /// session, process the buffered link, then start listening for links
    /// delivered to the running process.
    ///
    /// A restore failure has already been published as an error status and
    /// doesn't stop the sequence.
    pub async fn bootstrap<I, S>(&self, args: I) -> AuthStatus
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        info!("Auth bootstrap starting");
        if let Some(event) = launch_event_from_args(args, &self.config.schemes) {
            self.dispatcher.buffer_launch_event(event);
        }

        match self.sessions.restore().await {
            Ok(status) => debug!("Restore finished: authenticated={}", status.is_authenticated()),
            Err(e) => warn!("Session restore failed: {}", e),
        }

        match self.dispatcher.process_buffered().await {
            Some(Ok(DispatchOutcome::Authenticated(profile))) => {
                info!("Launch deep link signed in {}", profile.email)
            }
            Some(Ok(DispatchOutcome::Ignored)) | None => {}
            Some(Err(e)) => warn!("Launch deep link failed: {}", e),
        }

        self.start_background_tasks();
        self.status()
    }

    fn start_background_tasks(&self) {
        let Some(receiver) = self.receiver.lock().take() else {
            debug!("Deep-link listener already running");
            return;
        };
        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(self.dispatcher.clone().run(receiver)));

        let sessions = self.sessions.clone();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(EXPIRY_CHECK_INTERVAL);
            loop {
                ticker.tick().await;
                sessions.check_expiry().await;
            }
        }));
    }

    pub fn start_login(&self) -> Result<String, AuthError> {
        self.login.start_login().inspect_err(|e| {
            self.sessions.report_failure(e);
        })
    }

    pub fn cancel_login(&self) {
        self.login.cancel_login();
    }

    pub fn attempt_state(&self) -> AttemptState {
        self.login.attempt_state()
    }

    pub fn fallback_login_url(&self) -> String {
        self.login.fallback_login_url()
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.login.cancel_login();
        self.sessions.sign_out().await
    }

    /// Dispatch a deep link immediately, bypassing the listener queue
    pub async fn handle_url(&self, raw: &str) -> Result<DispatchOutcome, AuthError> {
        self.dispatcher.dispatch_url(raw).await
    }

    pub fn source(&self) -> DeepLinkSource {
        self.source.clone()
    }

    pub fn status(&self) -> AuthStatus {
        self.sessions.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.sessions.subscribe()
    }

    pub fn session(&self) -> Session {
        self.sessions.session()
    }

    pub fn is_logged_in(&self) -> bool {
        self.sessions.is_authenticated()
    }

    pub fn touch(&self) {
        self.sessions.touch();
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }
}

impl Drop for AuthManager {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}
