use super::{AuthProvider, AuthState, CachedToken, PrincipalKind, SPREADSHEETS_SCOPE};
use super::{SessionStore, TokenCell};
use crate::config::{Endpoints, ServiceAccountConfig};
use crate::error::{AppError, AuthFailure, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hyper_util::client::legacy::connect::HttpConnector;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, instrument};
use yup_oauth2::{
    ServiceAccountAuthenticator, ServiceAccountKey, authenticator::Authenticator,
    hyper_rustls::HttpsConnector,
};

type AuthType = Authenticator<HttpsConnector<HttpConnector>>;

/// Non-interactive credential: a service account signs its own JWT assertion
/// and exchanges it for an access token.
pub struct ServiceAccountAuth {
    authenticator: AuthType,
    session: Arc<SessionStore>,
    token: TokenCell,
}

impl ServiceAccountAuth {
    pub async fn new(
        config: &ServiceAccountConfig,
        endpoints: &Endpoints,
        session: Arc<SessionStore>,
    ) -> Result<Self> {
        let key = service_account_key(config, endpoints)?;

        let authenticator = ServiceAccountAuthenticator::builder(key)
            .build()
            .await
            .map_err(|e| AppError::Config(format!("Invalid service account key: {}", e)))?;

        let restored = session.restore_token(Utc::now());
        Ok(Self {
            authenticator,
            session,
            token: TokenCell::restored(restored),
        })
    }

    async fn fetch_token(&self) -> Result<CachedToken> {
        let token = self
            .authenticator
            .force_refreshed_token(&[SPREADSHEETS_SCOPE])
            .await
            .map_err(|e| AppError::auth(classify(&e), format!("Failed to get token: {}", e)))?;

        let access_token = token
            .token()
            .ok_or_else(|| AppError::auth(AuthFailure::Unknown, "Token response had no token"))?
            .to_string();
        let expiry_time = token
            .expiration_time()
            .and_then(|t| DateTime::from_timestamp(t.unix_timestamp(), 0))
            .unwrap_or_else(|| Utc::now() + Duration::hours(1));

        Ok(CachedToken {
            access_token,
            refresh_token: None,
            expiry_time,
        })
    }

    async fn sign_in(&self) -> Result<String> {
        match self.fetch_token().await {
            Ok(token) => {
                debug!(expiry_time = %token.expiry_time, "Service account authenticated");
                self.session.store_token(&token);
                let access_token = token.access_token.clone();
                self.token.store(token);
                Ok(access_token)
            }
            Err(e) => {
                self.token.clear(AuthState::AuthenticationFailed);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl AuthProvider for ServiceAccountAuth {
    fn kind(&self) -> PrincipalKind {
        PrincipalKind::Service
    }

    fn state(&self) -> AuthState {
        // A new assertion can always be signed without user interaction
        self.token.state_at(Utc::now(), true)
    }

    fn expiry_time(&self) -> Option<DateTime<Utc>> {
        self.token.token().map(|t| t.expiry_time)
    }

    fn is_authenticated(&self) -> bool {
        self.token.usable().is_some()
    }

    async fn access_token(&self) -> Result<String> {
        match self.token.usable() {
            Some(access_token) => Ok(access_token),
            None => self.sign_in().await,
        }
    }

    async fn ensure_authenticated(&self) -> Result<()> {
        self.access_token().await.map(|_| ())
    }

    #[instrument(name = "Authenticating service account", skip_all)]
    async fn authenticate(&self) -> Result<()> {
        self.token.set_state(AuthState::Initializing);
        self.sign_in().await.map(|_| ())
    }

    async fn sign_out(&self) -> Result<()> {
        self.token.clear(AuthState::SignedOut);
        self.session.clear_tokens();
        debug!("Cleared service account tokens");
        Ok(())
    }
}

fn service_account_key(
    config: &ServiceAccountConfig,
    endpoints: &Endpoints,
) -> Result<ServiceAccountKey> {
    if !config.is_configured() {
        return Err(AppError::Config(
            "Service account email and private key are required".to_string(),
        ));
    }

    let key = json!({
        "type": "service_account",
        "client_email": config.email.trim(),
        "private_key": config.private_key_pem(),
        "token_uri": endpoints.token_url,
    });
    serde_json::from_value(key)
        .map_err(|e| AppError::Config(format!("Invalid service account key: {}", e)))
}

// Transport failures surface as io errors somewhere in the source chain.
fn classify(e: &yup_oauth2::Error) -> AuthFailure {
    if let yup_oauth2::Error::LowLevelError(_) = e {
        return AuthFailure::Network;
    }

    let mut source = std::error::Error::source(e);
    while let Some(inner) = source {
        if inner.is::<std::io::Error>() {
            return AuthFailure::Network;
        }
        source = inner.source();
    }
    AuthFailure::Unknown
}
