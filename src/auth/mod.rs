mod service;
mod session;
mod user;

pub use service::ServiceAccountAuth;
pub use session::SessionStore;
pub use user::UserConsentAuth;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};

// Read/write access to spreadsheets
pub(crate) const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

/// Tokens are refreshed this many seconds before they actually expire.
pub const REFRESH_BUFFER_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PrincipalKind {
    None,
    User,
    Service,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthState {
    #[default]
    Uninitialized,
    Initializing,
    Authenticated,
    TokenExpiring,
    AuthenticationFailed,
    SignedOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expiry_time: DateTime<Utc>,
}

impl CachedToken {
    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_time <= now + Duration::seconds(REFRESH_BUFFER_SECS)
    }

    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh_at(Utc::now())
    }
}

/// Bearer token plus lifecycle state, shared by both credential strategies.
#[derive(Default)]
pub(crate) struct TokenCell {
    inner: Mutex<(Option<CachedToken>, AuthState)>,
}

impl TokenCell {
    pub(crate) fn restored(token: Option<CachedToken>) -> Self {
        let state = match token {
            Some(_) => AuthState::Authenticated,
            None => AuthState::Uninitialized,
        };
        Self {
            inner: Mutex::new((token, state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, (Option<CachedToken>, AuthState)> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn token(&self) -> Option<CachedToken> {
        self.lock().0.clone()
    }

    /// Access token that is valid beyond the refresh buffer.
    pub(crate) fn usable(&self) -> Option<String> {
        self.lock()
            .0
            .as_ref()
            .filter(|t| !t.needs_refresh())
            .map(|t| t.access_token.clone())
    }

    pub(crate) fn store(&self, token: CachedToken) {
        *self.lock() = (Some(token), AuthState::Authenticated);
    }

    pub(crate) fn set_state(&self, state: AuthState) {
        self.lock().1 = state;
    }

    pub(crate) fn clear(&self, state: AuthState) {
        *self.lock() = (None, state);
    }

    /// Lifecycle state as of `now`. `silent_refresh` says whether an expired
    /// token can be replaced without user interaction.
    pub(crate) fn state_at(&self, now: DateTime<Utc>, silent_refresh: bool) -> AuthState {
        let guard = self.lock();
        match (&guard.0, guard.1) {
            (Some(token), AuthState::Authenticated) if token.needs_refresh_at(now) => {
                if silent_refresh || token.expiry_time > now {
                    AuthState::TokenExpiring
                } else {
                    AuthState::Uninitialized
                }
            }
            (_, state) => state,
        }
    }
}

/// Produces bearer tokens for the Sheets client.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    fn kind(&self) -> PrincipalKind;

    fn state(&self) -> AuthState;

    fn expiry_time(&self) -> Option<DateTime<Utc>>;

    /// Whether a token usable beyond the refresh buffer is cached. Never
    /// refreshes or prompts.
    fn is_authenticated(&self) -> bool;

    /// A valid access token, refreshed silently when close to expiry. Never
    /// prompts; fails with `NotAuthenticated` when only an interactive login
    /// could help.
    async fn access_token(&self) -> Result<String>;

    /// Like `access_token`, but may fall back to an interactive login.
    async fn ensure_authenticated(&self) -> Result<()>;

    /// Obtain a fresh token regardless of what is cached.
    async fn authenticate(&self) -> Result<()>;

    /// Forget cached credentials, in memory and on disk.
    async fn sign_out(&self) -> Result<()>;
}


#[cfg(test)]
mod tests {
    use super::*;

    fn token_expiring_in(minutes: i64, now: DateTime<Utc>) -> CachedToken {
        CachedToken {
            access_token: "ya29.token".to_string(),
            refresh_token: None,
            expiry_time: now + Duration::minutes(minutes),
        }
    }

    #[test]
    fn test_refresh_buffer_boundary() {
        let now = Utc::now();
        assert!(token_expiring_in(4, now).needs_refresh_at(now));
        assert!(!token_expiring_in(6, now).needs_refresh_at(now));
        assert!(token_expiring_in(5, now).needs_refresh_at(now));
    }

    #[test]
    fn test_usable_token() {
        let now = Utc::now();
        let cell = TokenCell::restored(Some(token_expiring_in(30, now)));
        assert_eq!(cell.usable().as_deref(), Some("ya29.token"));

        cell.store(token_expiring_in(4, now));
        assert_eq!(cell.usable(), None);
    }

    #[test]
    fn test_lifecycle_states() {
        let now = Utc::now();

        let cell = TokenCell::default();
        assert_eq!(cell.state_at(now, false), AuthState::Uninitialized);

        cell.store(token_expiring_in(30, now));
        assert_eq!(cell.state_at(now, false), AuthState::Authenticated);

        cell.store(token_expiring_in(2, now));
        assert_eq!(cell.state_at(now, false), AuthState::TokenExpiring);

        // Expired with no way to refresh silently
        cell.store(token_expiring_in(-1, now));
        assert_eq!(cell.state_at(now, false), AuthState::Uninitialized);
        assert_eq!(cell.state_at(now, true), AuthState::TokenExpiring);

        cell.clear(AuthState::SignedOut);
        assert_eq!(cell.state_at(now, true), AuthState::SignedOut);
    }
}
