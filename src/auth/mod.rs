//! Credential lifecycle: storage, single-flight refresh, proactive refresh
//! and interactive login

mod coordinator;
mod login;
mod scheduler;
mod store;
mod token_endpoint;

pub use coordinator::{AuthStatus, RefreshCoordinator};
pub use login::{SCOPES, perform_browser_login};
pub use scheduler::{BackgroundRefreshScheduler, REFRESH_INTERVAL};
pub use store::{Credential, CredentialStore, EXPIRY_THRESHOLD_MS};
pub use token_endpoint::{
    RefreshFailure, RefreshOutcome, SpotifyTokenEndpoint, TokenEndpoint,
};
