use super::{AuthProvider, AuthState, CachedToken, PrincipalKind, SPREADSHEETS_SCOPE};
use super::{SessionStore, TokenCell};
use crate::config::{Endpoints, GoogleConfig};
use crate::error::{AppError, AuthFailure, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oauth2::{
    AccessToken, AuthUrl, AuthorizationCode, Client, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, ErrorResponse, PkceCodeChallenge, RedirectUrl, RefreshToken,
    RequestTokenError, RevocationUrl, Scope, StandardRevocableToken, TokenResponse, TokenUrl,
    basic::{
        BasicClient, BasicErrorResponse, BasicRevocationErrorResponse,
        BasicTokenIntrospectionResponse, BasicTokenResponse,
    },
};
use reqwest::redirect::Policy;
use std::sync::Arc;
use tiny_http::{Response, Server};
use tracing::{debug, info, instrument, warn};
use url::Url;

const CALLBACK_PORT: u16 = 8085;
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

// Type alias for the client when Auth, Revocation and Token URLs are set
type ConfiguredClient = Client<
    BasicErrorResponse,
    BasicTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointSet,    // HasAuthUrl
    EndpointNotSet, // HasDeviceAuthUrl
    EndpointNotSet, // HasIntrospectionUrl
    EndpointSet,    // HasRevocationUrl
    EndpointSet,    // HasTokenUrl
>;

/// Interactive OAuth consent for a single Google account.
///
/// The consent page is opened by the user; the authorization code comes back
/// through a loopback listener. Tokens are cached in memory and in the session
/// store, and a granted refresh token renews access without prompting again.
pub struct UserConsentAuth {
    client: ConfiguredClient,
    http_client: reqwest::Client,
    session: Arc<SessionStore>,
    token: TokenCell,
}

impl UserConsentAuth {
    pub fn new(
        config: &GoogleConfig,
        endpoints: &Endpoints,
        session: Arc<SessionStore>,
    ) -> Result<Self> {
        let auth_url = AuthUrl::new(endpoints.auth_url.clone())
            .map_err(|e| AppError::Config(format!("Invalid auth URL: {}", e)))?;
        let token_url = TokenUrl::new(endpoints.token_url.clone())
            .map_err(|e| AppError::Config(format!("Invalid token URL: {}", e)))?;
        let revocation_url = RevocationUrl::new(endpoints.revoke_url.clone())
            .map_err(|e| AppError::Config(format!("Invalid revocation URL: {}", e)))?;
        let redirect_url = RedirectUrl::new(format!("http://127.0.0.1:{}/callback", CALLBACK_PORT))
            .map_err(|e| AppError::Config(format!("Invalid redirect URL: {}", e)))?;

        let mut client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_revocation_url(revocation_url)
            .set_redirect_uri(redirect_url);
        if !config.client_secret.is_empty() {
            client = client.set_client_secret(ClientSecret::new(config.client_secret.clone()));
        }

        let http_client = reqwest::ClientBuilder::new()
            .redirect(Policy::none())
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build reqwest client: {}", e)))?;

        let restored = session.restore_token(Utc::now());
        Ok(Self {
            client,
            http_client,
            session,
            token: TokenCell::restored(restored),
        })
    }

    async fn consent_flow(&self) -> Result<CachedToken> {
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        // Start a local server to receive the callback
        let bind_addr = format!("127.0.0.1:{}", CALLBACK_PORT);
        let server = Server::http(&bind_addr).map_err(|e| {
            AppError::auth(
                AuthFailure::Blocked,
                format!("Failed to bind to {}: {}", bind_addr, e),
            )
        })?;

        let (auth_url, csrf_token) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scope(Scope::new(SPREADSHEETS_SCOPE.to_string()))
            .set_pkce_challenge(pkce_challenge)
            .add_extra_param("access_type", "offline")
            .url();

        println!("Open this URL in your browser to grant access to Google Sheets:\n{}", auth_url);
        println!();
        println!("Waiting for authorization...");

        let callback_url = tokio::task::spawn_blocking(move || receive_callback(&server))
            .await
            .map_err(|e| AppError::Other(e.into()))??;
        let code = parse_callback(&callback_url, csrf_token.secret())?;

        let token_result = self
            .client
            .exchange_code(code)
            .set_pkce_verifier(pkce_verifier)
            .request_async(&self.http_client)
            .await
            .map_err(token_request_error)?;

        Ok(cached_token(&token_result, None))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<CachedToken> {
        let token_result = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http_client)
            .await
            .map_err(token_request_error)?;

        Ok(cached_token(&token_result, Some(refresh_token)))
    }

    fn remember(&self, token: CachedToken) -> String {
        self.session.store_token(&token);
        let access_token = token.access_token.clone();
        self.token.store(token);
        access_token
    }

    fn refresh_token(&self) -> Option<String> {
        self.token
            .token()
            .and_then(|t| t.refresh_token)
            .or_else(|| self.session.refresh_token())
    }

    async fn revoke(&self, token: &CachedToken) {
        let revocable = match &token.refresh_token {
            Some(refresh) => StandardRevocableToken::RefreshToken(RefreshToken::new(refresh.clone())),
            None => StandardRevocableToken::AccessToken(AccessToken::new(
                token.access_token.clone(),
            )),
        };

        let request = match self.client.revoke_token(revocable) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Cannot revoke token");
                return;
            }
        };

        match request.request_async(&self.http_client).await {
            Ok(()) => debug!("Token revoked"),
            Err(e) => warn!(error = ?e, "Failed to revoke token, signing out locally"),
        }
    }
}

#[async_trait]
impl AuthProvider for UserConsentAuth {
    fn kind(&self) -> PrincipalKind {
        PrincipalKind::User
    }

    fn state(&self) -> AuthState {
        self.token
            .state_at(Utc::now(), self.refresh_token().is_some())
    }

    fn expiry_time(&self) -> Option<DateTime<Utc>> {
        self.token.token().map(|t| t.expiry_time)
    }

    fn is_authenticated(&self) -> bool {
        self.token.usable().is_some()
    }

    async fn access_token(&self) -> Result<String> {
        if let Some(access_token) = self.token.usable() {
            return Ok(access_token);
        }

        if let Some(refresh_token) = self.refresh_token() {
            debug!("Access token expiring, refreshing...");
            match self.refresh(&refresh_token).await {
                Ok(token) => return Ok(self.remember(token)),
                Err(e) => debug!("Token refresh failed ({})", e),
            }
        }

        Err(AppError::NotAuthenticated)
    }

    async fn ensure_authenticated(&self) -> Result<()> {
        match self.access_token().await {
            Ok(_) => Ok(()),
            Err(AppError::NotAuthenticated) => {
                info!("Authentication needed, requesting access...");
                self.authenticate().await
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(name = "Authenticating to Google Sheets", skip_all)]
    async fn authenticate(&self) -> Result<()> {
        self.token.set_state(AuthState::Initializing);

        match self.consent_flow().await {
            Ok(token) => {
                debug!(expiry_time = %token.expiry_time, "User authenticated");
                self.remember(token);
                Ok(())
            }
            Err(e) => {
                self.token.clear(AuthState::AuthenticationFailed);
                Err(e)
            }
        }
    }

    #[instrument(name = "Signing out of Google Sheets", skip_all)]
    async fn sign_out(&self) -> Result<()> {
        let token = self.token.token().or_else(|| {
            self.session.refresh_token().map(|refresh| CachedToken {
                access_token: String::new(),
                refresh_token: Some(refresh),
                expiry_time: Utc::now(),
            })
        });
        if let Some(token) = token {
            self.revoke(&token).await;
        }

        self.token.clear(AuthState::SignedOut);
        self.session.clear_tokens();
        debug!("Cleared Google Sheets cached tokens");

        Ok(())
    }
}

fn receive_callback(server: &Server) -> Result<Url> {
    let request = server.recv().map_err(|e| {
        AppError::auth(
            AuthFailure::Network,
            format!("Failed to receive request: {}", e),
        )
    })?;

    let callback_url = format!("http://127.0.0.1:{}{}", CALLBACK_PORT, request.url());
    let url = Url::parse(&callback_url).map_err(|e| {
        AppError::auth(
            AuthFailure::Unknown,
            format!("Failed to parse callback URL: {}", e),
        )
    })?;

    let response = Response::from_string("Authorization received. You can close this window.");
    if let Err(e) = request.respond(response) {
        warn!(error = %e, "Failed to answer the browser");
    }

    Ok(url)
}

/// Extract the authorization code from the loopback callback.
fn parse_callback(url: &Url, expected_state: &str) -> Result<AuthorizationCode> {
    let param = |name: &str| {
        url.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    };

    if let Some(error) = param("error") {
        let reason = match error.as_str() {
            "access_denied" => AuthFailure::Cancelled,
            _ => AuthFailure::Unknown,
        };
        return Err(AppError::auth(reason, format!("Consent rejected: {}", error)));
    }

    let state = param("state")
        .ok_or_else(|| AppError::auth(AuthFailure::Unknown, "No state in callback"))?;
    if state != expected_state {
        return Err(AppError::auth(AuthFailure::Unknown, "CSRF token mismatch"));
    }

    let code = param("code")
        .ok_or_else(|| AppError::auth(AuthFailure::Unknown, "No code in callback"))?;

    Ok(AuthorizationCode::new(code))
}

fn token_request_error<RE, T>(e: RequestTokenError<RE, T>) -> AppError
where
    RE: std::error::Error + 'static,
    T: ErrorResponse + 'static,
{
    let reason = match &e {
        RequestTokenError::Request(_) => AuthFailure::Network,
        _ => AuthFailure::Unknown,
    };
    AppError::auth(reason, format!("Token request failed: {:?}", e))
}

/// Build the cached token from a token response.
///
/// Refresh responses usually omit the refresh token, so `fallback_refresh_token`
/// is kept in that case.
fn cached_token(
    token_result: &BasicTokenResponse,
    fallback_refresh_token: Option<&str>,
) -> CachedToken {
    let expires_in = token_result
        .expires_in()
        .map(|d| d.as_secs() as i64)
        .unwrap_or(DEFAULT_EXPIRES_IN_SECS);

    CachedToken {
        access_token: token_result.access_token().secret().clone(),
        refresh_token: token_result
            .refresh_token()
            .map(|t| t.secret().clone())
            .or_else(|| fallback_refresh_token.map(str::to_string)),
        expiry_time: Utc::now() + Duration::seconds(expires_in),
    }
}
