//! Authentication module for Glint
//!
//! Sign-in happens in the system browser. The website returns the user to
//! the app through a custom-protocol deep link carrying a signed identity
//! token, which is verified against the issuer's published keys before the
//! credential is written to the OS secret store.

mod callback;
mod deep_link;
mod events;
mod login;
mod manager;
mod session;
mod state_token;
mod storage;
mod types;
mod verifier;

#[cfg(test)]
mod test_support;

pub use callback::CallbackProcessor;
pub use deep_link::{
    launch_event_from_args, CallbackKind, DeepLinkDispatcher, DeepLinkEvent, DeepLinkReceiver,
    DeepLinkSource, DispatchOutcome,
};
pub use events::{AuthStateEvent, AUTH_STATE_CHANGED};
pub use login::{BrowserLauncher, LoginInitiator, SystemBrowser};
pub use manager::AuthManager;
pub use session::SessionManager;
pub use state_token::{StateTokenManager, DEFAULT_STATE_TTL};
pub use storage::{ActiveAccountIndex, CredentialVault, KeyringVault, MemoryVault};
pub use types::*;
pub use verifier::{HttpKeySetFetcher, KeySetFetcher, StaticKeySetFetcher, TokenVerifier};
