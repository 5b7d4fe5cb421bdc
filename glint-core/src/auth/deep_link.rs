//! Deep-link callbacks: parsing, classification and dispatch
//!
//! Every platform delivery path (launch arguments, a second-instance
//! notification, a native open-URL callback) is funneled through
//! `DeepLinkSource` into one channel of `DeepLinkEvent`s. The dispatcher
//! classifies each event into a typed `CallbackKind` and routes it to the
//! matching processor, one event at a time.

use super::callback::CallbackProcessor;
use super::session::SessionManager;
use super::types::{redact, AuthError, ErrorCategory, UserProfile};
use crate::config::AuthConfig;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// Query parameters that carry secrets and are masked in `Debug` output
const SENSITIVE_PARAMS: &[&str] = &["token", "access_token", "refresh_token", "state"];

/// Buffered events per process; the OS delivers them one click at a time
const CHANNEL_CAPACITY: usize = 16;

/// An incoming custom-protocol URL, decoded once at the boundary
#[derive(Clone, PartialEq, Eq)]
pub struct DeepLinkEvent {
    pub raw_url: String,
    pub scheme: String,
    pub host: String,
    pub path: String,
    pub query_params: HashMap<String, String>,
}

impl DeepLinkEvent {
    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        let raw = raw.trim().trim_matches('"');
        let url = Url::parse(raw)
            .map_err(|e| AuthError::UnrecognizedCallback(format!("not a URL: {}", e)))?;

        let mut query_params = HashMap::new();
        for (key, value) in url.query_pairs() {
            // First occurrence wins
            query_params
                .entry(key.into_owned())
                .or_insert_with(|| value.into_owned());
        }

        Ok(Self {
            raw_url: raw.to_string(),
            scheme: url.scheme().to_ascii_lowercase(),
            host: url.host_str().unwrap_or_default().to_ascii_lowercase(),
            path: url.path().to_string(),
            query_params,
        })
    }

    /// Host and path joined into one route, so `glint://auth/callback`,
    /// `glint:///auth/callback` and `glint:auth/callback` all read
    /// `/auth/callback`
    pub fn route(&self) -> String {
        let mut route = String::from("/");
        if !self.host.is_empty() {
            route.push_str(&self.host);
        }
        let path = self.path.trim_start_matches('/');
        if !path.is_empty() {
            if !self.host.is_empty() {
                route.push('/');
            }
            route.push_str(path);
        }
        while route.len() > 1 && route.ends_with('/') {
            route.pop();
        }
        route
    }

    /// Non-empty query value
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query_params
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn has_param(&self, key: &str) -> bool {
        self.query_params.contains_key(key)
    }
}

impl fmt::Debug for DeepLinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: HashMap<&str, String> = self
            .query_params
            .iter()
            .map(|(k, v)| {
                let shown = if SENSITIVE_PARAMS.contains(&k.as_str()) {
                    redact(v)
                } else {
                    v.clone()
                };
                (k.as_str(), shown)
            })
            .collect();
        f.debug_struct("DeepLinkEvent")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("path", &self.path)
            .field("query_params", &params)
            .finish()
    }
}

/// Strongly-typed callback shapes across both website generations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackKind {
    OAuthCallback {
        token: String,
        state: String,
    },
    DirectLink {
        token: String,
        user: Option<String>,
    },
    LegacyTokenRefresh {
        token: String,
        refresh_token: String,
        user: Option<String>,
    },
    Unrecognized {
        reason: String,
    },
}

impl CallbackKind {
    pub fn classify(event: &DeepLinkEvent, config: &AuthConfig) -> Self {
        if !config.supports_scheme(&event.scheme) {
            return Self::unrecognized(format!("unsupported scheme {}", event.scheme));
        }

        match event.route().as_str() {
            "/auth/callback" => {
                let Some(token) = event.param("token") else {
                    return Self::unrecognized("callback without token");
                };
                // A present-but-empty state still takes the state-checked
                // path; it must never downgrade to the no-state flow
                if event.has_param("state") {
                    CallbackKind::OAuthCallback {
                        token: token.to_string(),
                        state: event.param("state").unwrap_or_default().to_string(),
                    }
                } else {
                    CallbackKind::DirectLink {
                        token: token.to_string(),
                        user: event.param("user").map(str::to_string),
                    }
                }
            }
            "/auth" => {
                let token = event.param("token").or_else(|| event.param("access_token"));
                match (token, event.param("refresh_token")) {
                    (Some(token), Some(refresh_token)) => CallbackKind::LegacyTokenRefresh {
                        token: token.to_string(),
                        refresh_token: refresh_token.to_string(),
                        user: event.param("user").map(str::to_string),
                    },
                    _ => Self::unrecognized("legacy callback missing tokens"),
                }
            }
            other => Self::unrecognized(format!("unknown route {}", other)),
        }
    }

    fn unrecognized(reason: impl Into<String>) -> Self {
        CallbackKind::Unrecognized {
            reason: reason.into(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            CallbackKind::OAuthCallback { .. } => "oauth",
            CallbackKind::DirectLink { .. } => "direct-link",
            CallbackKind::LegacyTokenRefresh { .. } => "legacy",
            CallbackKind::Unrecognized { .. } => "unrecognized",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Authenticated(UserProfile),
    Ignored,
}

/// Sender side handed to platform adapters
#[derive(Clone)]
pub struct DeepLinkSource {
    schemes: Arc<Vec<String>>,
    tx: mpsc::Sender<DeepLinkEvent>,
}

pub struct DeepLinkReceiver {
    rx: mpsc::Receiver<DeepLinkEvent>,
}

impl DeepLinkReceiver {
    pub async fn recv(&mut self) -> Option<DeepLinkEvent> {
        self.rx.recv().await
    }
}

impl DeepLinkSource {
    pub fn channel(schemes: Vec<String>) -> (Self, DeepLinkReceiver) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Self {
                schemes: Arc::new(schemes),
                tx,
            },
            DeepLinkReceiver { rx },
        )
    }

    /// Native open-URL callback on a running process
    pub fn push_url(&self, raw: &str) -> bool {
        let Some(event) = event_for_schemes(raw, &self.schemes) else {
            debug!("Dropping non-deep-link input");
            return false;
        };
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                warn!("Deep-link queue rejected event: {}", e);
                false
            }
        }
    }

    /// Argument vector forwarded by a second instance. Returns how many
    /// deep links were queued.
    pub fn push_args<I, S>(&self, args: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        args.into_iter()
            .filter(|arg| self.push_url(arg.as_ref()))
            .count()
    }
}

/// First deep link among process launch arguments
pub fn launch_event_from_args<I, S>(args: I, schemes: &[String]) -> Option<DeepLinkEvent>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter()
        .find_map(|arg| event_for_schemes(arg.as_ref(), schemes))
}

fn event_for_schemes(raw: &str, schemes: &[String]) -> Option<DeepLinkEvent> {
    let candidate = raw.trim().trim_matches('"');
    let (scheme, _) = candidate.split_once(':')?;
    if !schemes.iter().any(|s| s.eq_ignore_ascii_case(scheme)) {
        return None;
    }
    DeepLinkEvent::parse(candidate).ok()
}

pub struct DeepLinkDispatcher {
    config: Arc<AuthConfig>,
    processor: Arc<CallbackProcessor>,
    sessions: Arc<SessionManager>,
    /// One event in flight at a time
    serial: tokio::sync::Mutex<()>,
    /// Deep link captured from launch arguments before services were up
    launch_event: Mutex<Option<DeepLinkEvent>>,
}

impl DeepLinkDispatcher {
    pub fn new(
        config: Arc<AuthConfig>,
        processor: Arc<CallbackProcessor>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            config,
            processor,
            sessions,
            serial: tokio::sync::Mutex::new(()),
            launch_event: Mutex::new(None),
        }
    }

    /// Hold a bootstrap event until `process_buffered`. At most one is kept;
    /// returns false if one was already buffered.
    pub fn buffer_launch_event(&self, event: DeepLinkEvent) -> bool {
        let mut slot = self.launch_event.lock();
        if slot.is_some() {
            warn!("A launch deep link is already buffered; dropping {:?}", event);
            return false;
        }
        info!("Buffered launch deep link until services are ready");
        *slot = Some(event);
        true
    }

    /// Process the buffered bootstrap event, if any. Takes it out of the
    /// buffer, so a second call finds nothing.
    pub async fn process_buffered(&self) -> Option<Result<DispatchOutcome, AuthError>> {
        let event = self.launch_event.lock().take()?;
        Some(self.dispatch(event).await)
    }

    pub async fn dispatch_url(&self, raw: &str) -> Result<DispatchOutcome, AuthError> {
        match DeepLinkEvent::parse(raw) {
            Ok(event) => self.dispatch(event).await,
            Err(e) => {
                debug!("{}", e);
                Ok(DispatchOutcome::Ignored)
            }
        }
    }

    pub async fn dispatch(&self, event: DeepLinkEvent) -> Result<DispatchOutcome, AuthError> {
        let _serial = self.serial.lock().await;

        let kind = CallbackKind::classify(&event, &self.config);
        debug!("Deep link classified as {}: {:?}", kind.name(), event);

        let result = match kind {
            CallbackKind::OAuthCallback { token, state } => {
                self.processor.complete_oauth(&token, &state).await
            }
            CallbackKind::DirectLink { token, user } => {
                self.processor
                    .complete_direct_link(&token, user.as_deref())
                    .await
            }
            CallbackKind::LegacyTokenRefresh {
                token,
                refresh_token,
                user,
            } => {
                self.processor
                    .complete_legacy(&token, &refresh_token, user.as_deref())
                    .await
            }
            CallbackKind::Unrecognized { reason } => {
                // Another app may share an overlapping scheme
                debug!("Ignoring unrecognized deep link ({})", reason);
                return Ok(DispatchOutcome::Ignored);
            }
        };

        match result {
            Ok(profile) => Ok(DispatchOutcome::Authenticated(profile)),
            Err(e) => {
                if e.category() != ErrorCategory::Ignored {
                    self.sessions.report_failure(&e);
                }
                Err(e)
            }
        }
    }

    /// Consume events until every `DeepLinkSource` is dropped
    pub async fn run(self: Arc<Self>, mut receiver: DeepLinkReceiver) {
        while let Some(event) = receiver.recv().await {
            match self.dispatch(event).await {
                Ok(DispatchOutcome::Authenticated(profile)) => {
                    info!("Signed in via deep link as {}", profile.email)
                }
                Ok(DispatchOutcome::Ignored) => {}
                Err(e) => warn!("Deep-link sign-in failed: {}", e),
            }
        }
        debug!("Deep-link source closed");
    }
}
