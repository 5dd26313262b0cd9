use super::CachedToken;
use crate::error::AppError;
use crate::storage::KeyValueStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

const SESSION_KEY: &str = "session";

/// Authentication state and spreadsheet handle, persisted between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub expiry_time: Option<DateTime<Utc>>,
    pub spreadsheet_id: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub saved_at: Option<DateTime<Utc>>,
}

pub struct SessionStore {
    backend: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    pub fn load(&self) -> PersistedSession {
        let contents = match self.backend.get(SESSION_KEY) {
            Ok(Some(contents)) => contents,
            Ok(None) => return PersistedSession::default(),
            Err(e) => {
                warn!(error = %e, "Failed to read saved session");
                return PersistedSession::default();
            }
        };

        serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!(error = %e, "Discarding corrupt saved session");
            PersistedSession::default()
        })
    }

    fn save(&self, mut session: PersistedSession) {
        session.saved_at = Some(Utc::now());
        let result = serde_json::to_string(&session)
            .map_err(AppError::from)
            .and_then(|contents| self.backend.set(SESSION_KEY, &contents));

        if let Err(e) = result {
            warn!(error = %e, "Failed to save session");
        }
    }

    /// Token from a previous run, if it is still usable as of `now`.
    ///
    /// An access token inside the refresh buffer is dropped from storage. A
    /// refresh token survives so the user strategy can renew silently.
    pub fn restore_token(&self, now: DateTime<Utc>) -> Option<CachedToken> {
        let mut session = self.load();
        let (Some(access_token), Some(expiry_time)) =
            (session.access_token.clone(), session.expiry_time)
        else {
            return None;
        };

        let token = CachedToken {
            access_token,
            refresh_token: session.refresh_token.clone(),
            expiry_time,
        };

        if token.needs_refresh_at(now) {
            debug!("Saved access token is expired, discarding it");
            session.access_token = None;
            session.expiry_time = None;
            self.save(session);
            return None;
        }

        debug!("Restored saved session");
        Some(token)
    }

    /// Refresh token kept from an earlier login, if any.
    pub fn refresh_token(&self) -> Option<String> {
        self.load().refresh_token
    }

    pub fn store_token(&self, token: &CachedToken) {
        let mut session = self.load();
        session.access_token = Some(token.access_token.clone());
        session.expiry_time = Some(token.expiry_time);
        if token.refresh_token.is_some() {
            session.refresh_token = token.refresh_token.clone();
        }
        self.save(session);
    }

    /// Drop every credential. The spreadsheet handle is configuration and stays.
    pub fn clear_tokens(&self) {
        let session = PersistedSession {
            spreadsheet_id: self.load().spreadsheet_id,
            ..Default::default()
        };
        self.save(session);
    }

    pub fn spreadsheet_id(&self) -> Option<String> {
        self.load().spreadsheet_id
    }

    pub fn store_spreadsheet_id(&self, spreadsheet_id: &str) {
        let mut session = self.load();
        session.spreadsheet_id = Some(spreadsheet_id.to_string());
        self.save(session);
    }
}
