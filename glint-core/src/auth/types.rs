//! Authentication types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Profile fields shown in the UI for the signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Subject id of the identity token
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, alias = "name", alias = "full_name")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Claims carried by a signed identity token.
///
/// Only ever constructed by the verifier after the signature, issuer and
/// expiry checks have passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub iat: Option<i64>,
    pub exp: i64,
    pub iss: String,
}

impl IdentityClaims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.iat.and_then(|iat| DateTime::from_timestamp(iat, 0))
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at() <= Utc::now()
    }

    /// Profile derived purely from verified claims
    pub fn to_profile(&self) -> UserProfile {
        UserProfile {
            id: self.sub.clone(),
            email: self.email.clone().unwrap_or_default(),
            display_name: self.name.clone(),
            avatar_url: None,
        }
    }
}

/// Credential persisted in the OS secret store, one per account key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub service_name: String,
    /// Subject id from the verified token
    pub account_key: String,
    pub token: String,
    /// Only present for credentials delivered through the legacy callback
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub profile: UserProfile,
    pub expires_at: DateTime<Utc>,
    pub stored_at: DateTime<Utc>,
}

impl StoredCredential {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// In-memory record of the current user's session
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub authenticated: bool,
    pub profile: Option<UserProfile>,
    pub session_valid: bool,
    pub last_activity: DateTime<Utc>,
    pub account_key: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn unauthenticated() -> Self {
        Self {
            authenticated: false,
            profile: None,
            session_valid: false,
            last_activity: Utc::now(),
            account_key: None,
            expires_at: None,
        }
    }

    pub fn from_credential(credential: &StoredCredential) -> Self {
        Self {
            authenticated: true,
            profile: Some(credential.profile.clone()),
            session_valid: true,
            last_activity: Utc::now(),
            account_key: Some(credential.account_key.clone()),
            expires_at: Some(credential.expires_at),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }

    /// Check if the credential will expire within 5 minutes
    pub fn expires_soon(&self) -> bool {
        self.expires_at
            .is_some_and(|at| Utc::now() + Duration::minutes(5) >= at)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::unauthenticated()
    }
}

/// Status published to UI subscribers
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AuthStatus {
    #[default]
    Unauthenticated,
    Authenticated(UserProfile),
    Error(AuthError),
}

impl AuthStatus {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthStatus::Authenticated(_))
    }
}

/// Per-attempt login state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    AwaitingCallback,
}

/// How the UI should react to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Attempt is over; show "authentication failed, try again"
    Terminal,
    /// Token expired; prompt a fresh login
    ReLogin,
    /// Transient; offer a retry affordance
    Retryable,
    /// OS credential store is inaccessible
    StorageUnavailable,
    /// Not ours; log and move on
    Ignored,
}

/// Error types for authentication
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Callback state does not match a pending login")]
    CsrfMismatch,

    #[error("Malformed identity token: {0}")]
    TokenMalformed(String),

    #[error("Identity token signature is invalid")]
    TokenSignatureInvalid,

    #[error("Identity token has expired")]
    TokenExpired,

    #[error("Identity token was issued by an unexpected party")]
    IssuerMismatch,

    #[error("Failed to fetch signing keys: {0}")]
    KeySetFetchFailed(String),

    #[error("Failed to write to secure storage: {0}")]
    VaultWriteFailed(String),

    #[error("Failed to read from secure storage: {0}")]
    VaultReadFailed(String),

    #[error("Unrecognized callback: {0}")]
    UnrecognizedCallback(String),

    #[error("Failed to open browser: {0}")]
    BrowserLaunchFailed(String),
}

impl AuthError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AuthError::CsrfMismatch
            | AuthError::TokenMalformed(_)
            | AuthError::TokenSignatureInvalid
            | AuthError::IssuerMismatch => ErrorCategory::Terminal,
            AuthError::TokenExpired => ErrorCategory::ReLogin,
            AuthError::KeySetFetchFailed(_) | AuthError::BrowserLaunchFailed(_) => {
                ErrorCategory::Retryable
            }
            AuthError::VaultWriteFailed(_) | AuthError::VaultReadFailed(_) => {
                ErrorCategory::StorageUnavailable
            }
            AuthError::UnrecognizedCallback(_) => ErrorCategory::Ignored,
        }
    }

    /// Text safe to show the user. Never includes token material.
    pub fn user_message(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Terminal => "Authentication failed, please try again.",
            ErrorCategory::ReLogin => "Your sign-in has expired, please sign in again.",
            ErrorCategory::Retryable => match self {
                AuthError::BrowserLaunchFailed(_) => {
                    "Could not open your browser. Retry, or open the sign-in page manually."
                }
                _ => "Could not reach the sign-in service. Check your connection and retry.",
            },
            ErrorCategory::StorageUnavailable => {
                "Secure storage is unavailable. Unlock your system keychain and retry."
            }
            ErrorCategory::Ignored => "Ignored an unrecognized link.",
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Retryable | ErrorCategory::StorageUnavailable
        )
    }
}

/// Render a secret for logs without revealing it
pub fn redact(secret: &str) -> String {
    format!("<redacted len={}>", secret.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_credential(expires_at: DateTime<Utc>) -> StoredCredential {
        StoredCredential {
            service_name: "Glint".to_string(),
            account_key: "user-1".to_string(),
            token: "header.payload.sig".to_string(),
            refresh_token: None,
            profile: UserProfile {
                id: "user-1".to_string(),
                email: "test@example.com".to_string(),
                display_name: None,
                avatar_url: None,
            },
            expires_at,
            stored_at: Utc::now(),
        }
    }

    #[test]
    fn test_credential_is_expired_when_past() {
        assert!(make_credential(Utc::now() - Duration::hours(1)).is_expired());
        assert!(!make_credential(Utc::now() + Duration::hours(1)).is_expired());
    }

    #[test]
    fn test_session_from_credential() {
        let credential = make_credential(Utc::now() + Duration::hours(1));
        let session = Session::from_credential(&credential);
        assert!(session.authenticated);
        assert!(session.session_valid);
        assert_eq!(session.account_key.as_deref(), Some("user-1"));
        assert!(!session.is_expired());
        assert!(!session.expires_soon());
    }

    #[test]
    fn test_session_expires_soon_within_5_min() {
        let credential = make_credential(Utc::now() + Duration::minutes(3));
        assert!(Session::from_credential(&credential).expires_soon());
    }

    #[test]
    fn test_unauthenticated_session_never_expires() {
        let session = Session::default();
        assert!(!session.authenticated);
        assert!(!session.is_expired());
        assert!(!session.expires_soon());
    }

    #[test]
    fn test_claims_expiry() {
        let claims = IdentityClaims {
            sub: "u".to_string(),
            email: None,
            name: Some("Ada".to_string()),
            iat: Some(Utc::now().timestamp()),
            exp: (Utc::now() - Duration::seconds(1)).timestamp(),
            iss: "https://auth.glint.app".to_string(),
        };
        assert!(claims.is_expired());
        assert!(claims.issued_at().is_some());
        let profile = claims.to_profile();
        assert_eq!(profile.id, "u");
        assert_eq!(profile.email, "");
        assert_eq!(profile.display_name.as_deref(), Some("Ada"));
    }

    #[test]
    fn test_profile_accepts_website_field_names() {
        let json = r#"{"id":"abc","email":"a@b.c","full_name":"Ada L","avatar_url":"https://x/y.png"}"#;
        let profile: UserProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Ada L"));
        assert_eq!(profile.avatar_url.as_deref(), Some("https://x/y.png"));
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(AuthError::CsrfMismatch.category(), ErrorCategory::Terminal);
        assert_eq!(AuthError::TokenExpired.category(), ErrorCategory::ReLogin);
        assert_eq!(
            AuthError::KeySetFetchFailed("timeout".into()).category(),
            ErrorCategory::Retryable
        );
        assert_eq!(
            AuthError::VaultReadFailed("locked".into()).category(),
            ErrorCategory::StorageUnavailable
        );
        assert_eq!(
            AuthError::UnrecognizedCallback("x".into()).category(),
            ErrorCategory::Ignored
        );
        assert!(AuthError::BrowserLaunchFailed("no browser".into()).is_recoverable());
        assert!(!AuthError::TokenSignatureInvalid.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            AuthError::KeySetFetchFailed("timeout".to_string()).to_string(),
            "Failed to fetch signing keys: timeout"
        );
        assert_eq!(
            AuthError::TokenExpired.to_string(),
            "Identity token has expired"
        );
    }

    #[test]
    fn test_redact_hides_value() {
        let redacted = redact("super-secret-token");
        assert!(!redacted.contains("secret"));
        assert_eq!(redacted, "<redacted len=18>");
    }
}
