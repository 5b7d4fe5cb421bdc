//! Completes verified sign-in callbacks
//!
//! Three callback shapes arrive from the website:
//! - OAuth: `token` + `state`, bound to a login this process started
//! - Direct link: `token` + optional `user` profile, from an already
//!   signed-in first-party page (no state was ever issued)
//! - Legacy: `token` + `refresh_token` + `user`, from the previous site
//!
//! All three share one contract: the token signature is verified, and on
//! success exactly one vault write and one session transition happen. Any
//! failure leaves storage and session untouched.

use super::session::SessionManager;
use super::state_token::StateTokenManager;
use super::types::{AuthError, IdentityClaims, StoredCredential, UserProfile};
use super::verifier::TokenVerifier;
use chrono::Utc;
use log::{debug, info, warn};
use serde::Deserialize;
use std::sync::Arc;

/// Profile payload the website serializes into the `user` query parameter
#[derive(Debug, Deserialize)]
struct InlineProfile {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default, alias = "name", alias = "full_name")]
    display_name: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

pub struct CallbackProcessor {
    service_name: String,
    states: Arc<StateTokenManager>,
    verifier: Arc<TokenVerifier>,
    sessions: Arc<SessionManager>,
}

impl CallbackProcessor {
    pub fn new(
        service_name: impl Into<String>,
        states: Arc<StateTokenManager>,
        verifier: Arc<TokenVerifier>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            states,
            verifier,
            sessions,
        }
    }

    /// Complete the state-validated flow started by `LoginInitiator`
    pub async fn complete_oauth(&self, token: &str, state: &str) -> Result<UserProfile, AuthError> {
        info!("Completing OAuth callback");

        // Checked before verification so forged callbacks cost nothing
        if !self.states.validate(state) {
            warn!("OAuth callback rejected: state mismatch");
            return Err(AuthError::CsrfMismatch);
        }

        let claims = self.verifier.verify(token).await.inspect_err(|e| {
            warn!("OAuth callback rejected: {}", e);
        })?;
        let profile = claims.to_profile();
        self.persist(token, None, &claims, profile).await
    }

    /// Complete a no-state callback from a first-party page. The signature
    /// is the only trust anchor; the vault key always comes from the claims.
    pub async fn complete_direct_link(
        &self,
        token: &str,
        inline_profile: Option<&str>,
    ) -> Result<UserProfile, AuthError> {
        info!("Completing direct-link callback");
        let claims = self.verifier.verify(token).await.inspect_err(|e| {
            warn!("Direct-link callback rejected: {}", e);
        })?;
        let profile = merge_profile(&claims, inline_profile);
        self.persist(token, None, &claims, profile).await
    }

    /// Complete a callback from the previous website generation, which also
    /// hands over a refresh token
    pub async fn complete_legacy(
        &self,
        token: &str,
        refresh_token: &str,
        inline_profile: Option<&str>,
    ) -> Result<UserProfile, AuthError> {
        info!("Completing legacy token callback");
        let claims = self.verifier.verify(token).await.inspect_err(|e| {
            warn!("Legacy callback rejected: {}", e);
        })?;
        let profile = merge_profile(&claims, inline_profile);
        self.persist(token, Some(refresh_token), &claims, profile)
            .await
    }

    async fn persist(
        &self,
        token: &str,
        refresh_token: Option<&str>,
        claims: &IdentityClaims,
        profile: UserProfile,
    ) -> Result<UserProfile, AuthError> {
        let credential = StoredCredential {
            service_name: self.service_name.clone(),
            account_key: claims.sub.clone(),
            token: token.to_string(),
            refresh_token: refresh_token.map(str::to_string),
            profile: profile.clone(),
            expires_at: claims.expires_at(),
            stored_at: Utc::now(),
        };
        self.sessions
            .on_callback_success(profile.clone(), credential)
            .await?;
        Ok(profile)
    }
}

/// Display fields from the inline payload, identity from the claims.
/// A payload that names a different subject is ignored entirely.
fn merge_profile(claims: &IdentityClaims, inline_profile: Option<&str>) -> UserProfile {
    let mut profile = claims.to_profile();
    let Some(raw) = inline_profile else {
        return profile;
    };

    let inline = match serde_json::from_str::<InlineProfile>(raw) {
        Ok(inline) => inline,
        Err(e) => {
            debug!("Ignoring unparseable inline profile: {}", e);
            return profile;
        }
    };

    if inline.id.as_deref().is_some_and(|id| id != claims.sub) {
        warn!("Inline profile names a different user than the token; ignoring it");
        return profile;
    }

    if let Some(email) = inline.email.filter(|e| !e.is_empty()) {
        profile.email = email;
    }
    if inline.display_name.is_some() {
        profile.display_name = inline.display_name;
    }
    profile.avatar_url = inline.avatar_url;
    profile
}
