use super::types::AuthStatus;
use serde::Serialize;

// Event name constants
pub const AUTH_STATE_CHANGED: &str = "auth-state-changed";

/// Auth state change event payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthStateEvent {
    pub state: String,
    pub email: Option<String>,
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    pub error: Option<String>,
    pub recoverable: bool,
}

impl From<&AuthStatus> for AuthStateEvent {
    fn from(status: &AuthStatus) -> Self {
        match status {
            AuthStatus::Unauthenticated => Self {
                state: "unauthenticated".to_string(),
                email: None,
                user_id: None,
                display_name: None,
                error: None,
                recoverable: false,
            },
            AuthStatus::Authenticated(profile) => Self {
                state: "authenticated".to_string(),
                email: Some(profile.email.clone()),
                user_id: Some(profile.id.clone()),
                display_name: profile.display_name.clone(),
                error: None,
                recoverable: false,
            },
            AuthStatus::Error(e) => Self {
                state: "error".to_string(),
                email: None,
                user_id: None,
                display_name: None,
                error: Some(e.user_message().to_string()),
                recoverable: e.is_recoverable(),
            },
        }
    }
}
