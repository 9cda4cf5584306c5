use async_trait::async_trait;
use axum::{
    http::{HeaderMap, header},
    response::Response,
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, Validation, decode};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::{AppConfig, CookieConfig},
    cookies::{SetCookie, format_cookie_header, parse_cookie_header},
    models::{Identity, ProviderUser, Session},
};

/// Audience the provider stamps on access tokens for signed-in users.
const AUTHENTICATED_AUDIENCE: &str = "authenticated";

/// Claims
///
/// Payload of the provider-issued access token. Only the fields this service reads are declared.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the provider user id, also the primary key of `public.profiles`.
    pub sub: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    pub aud: String,
    pub exp: usize,
    pub iat: usize,
    #[serde(default)]
    pub email_confirmed_at: Option<DateTime<Utc>>,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Identity {
            id: claims.sub,
            email: claims.email.unwrap_or_default(),
            verified_at: claims.email_confirmed_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("auth provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("auth provider rejected the request with status {status}")]
    Rejected { status: StatusCode },
    #[error("invalid access token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("unexpected provider response: {0}")]
    Decode(String),
}

/// SessionContext
///
/// The per-request cookie snapshot (get-all) plus every cookie written while serving the request
/// (set-all). It is threaded through the gatekeeper and applied exactly once on the way out, so
/// the refreshed session reaches the client whichever response is returned.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    cookies: Vec<(String, String)>,
    pending: Vec<SetCookie>,
}

impl SessionContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            cookies: parse_cookie_header(headers),
            pending: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self) -> &[(String, String)] {
        &self.cookies
    }

    /// Records a cookie write and mirrors it into the snapshot, so later reads in the same
    /// request observe the new value.
    pub fn set(&mut self, cookie: SetCookie) {
        self.cookies.retain(|(n, _)| n != &cookie.name);
        if !cookie.is_removal() {
            self.cookies.push((cookie.name.clone(), cookie.value.clone()));
        }
        self.pending.retain(|c| c.name != cookie.name);
        self.pending.push(cookie);
    }

    pub fn set_all(&mut self, cookies: impl IntoIterator<Item = SetCookie>) {
        for cookie in cookies {
            self.set(cookie);
        }
    }

    pub fn pending(&self) -> &[SetCookie] {
        &self.pending
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Rewrites the inbound `Cookie` header so downstream handlers see refreshed tokens.
    pub fn sync_request_headers(&self, headers: &mut HeaderMap) {
        if !self.is_dirty() {
            return;
        }
        headers.remove(header::COOKIE);
        if let Some(value) = format_cookie_header(&self.cookies) {
            headers.insert(header::COOKIE, value);
        }
    }

    /// Appends every pending write to the outgoing response as `Set-Cookie` headers.
    /// Cookies the handler already set on the response take precedence.
    pub fn apply(self, mut response: Response) -> Response {
        let already_set: Vec<String> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|raw| raw.split_once('=').map(|(name, _)| name.trim().to_string()))
            .collect();

        for cookie in self.pending.iter().filter(|c| !already_set.contains(&c.name)) {
            match cookie.to_header_value() {
                Some(value) => {
                    response.headers_mut().append(header::SET_COOKIE, value);
                }
                None => tracing::warn!(cookie = %cookie.name, "dropping unencodable cookie"),
            }
        }
        response
    }
}

/// Writes the access and refresh cookies for a freshly granted session.
pub fn write_session_cookies(ctx: &mut SessionContext, session: &Session, config: &CookieConfig) {
    ctx.set_all([
        SetCookie::new(
            &config.access_token_name,
            &session.access_token,
            session.expires_in,
            config,
        ),
        SetCookie::new(
            &config.refresh_token_name,
            &session.refresh_token,
            config.max_age_secs,
            config,
        ),
    ]);
}

pub fn clear_session_cookies(ctx: &mut SessionContext, config: &CookieConfig) {
    ctx.set_all([
        SetCookie::removal(&config.access_token_name, config),
        SetCookie::removal(&config.refresh_token_name, config),
    ]);
}

/// SessionProvider
///
/// Contract for the hosted auth provider. `get_identity` may refresh the session and record
/// the new cookies on the context as a side effect.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn get_identity(&self, ctx: &mut SessionContext) -> Result<Option<Identity>, SessionError>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, SessionError>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: Option<&str>,
    ) -> Result<Identity, SessionError>;

    async fn exchange_code(&self, auth_code: &str, code_verifier: &str) -> Result<Session, SessionError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), SessionError>;

    /// Cookie names and attributes used by this provider.
    fn cookie_config(&self) -> &CookieConfig;
}

pub type SessionState = Arc<dyn SessionProvider>;

/// Sign-up answers with a full session when email confirmation is disabled, otherwise with
/// the bare user object.
#[derive(Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(Session),
    User(ProviderUser),
}

/// SupabaseSessionProvider
///
/// Talks to a GoTrue-compatible REST API (`{url}/auth/v1/...`). Access tokens are verified
/// locally with the shared JWT secret; the network is only hit to refresh or grant sessions.
#[derive(Clone)]
pub struct SupabaseSessionProvider {
    client: reqwest::Client,
    auth_url: String,
    anon_key: String,
    decoding_key: DecodingKey,
    cookies: CookieConfig,
}

impl SupabaseSessionProvider {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            auth_url: format!("{}/auth/v1", config.supabase_url.trim_end_matches('/')),
            anon_key: config.supabase_anon_key.clone(),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            cookies: config.cookies.clone(),
        }
    }

    fn verify(&self, token: &str) -> Result<Identity, SessionError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        validation.set_audience(&[AUTHENTICATED_AUDIENCE]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims.into())
    }

    async fn grant(&self, grant_type: &str, body: serde_json::Value) -> Result<Session, SessionError> {
        let response = self
            .client
            .post(format!("{}/token", self.auth_url))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Rejected { status });
        }
        response
            .json::<Session>()
            .await
            .map_err(|e| SessionError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SessionProvider for SupabaseSessionProvider {
    /// get_identity
    ///
    /// 1. A valid access cookie resolves the identity without a network call.
    /// 2. Otherwise a refresh cookie is exchanged for a new session, whose cookies are recorded.
    /// 3. A refresh rejected by the provider clears both cookies; the caller is signed out.
    async fn get_identity(&self, ctx: &mut SessionContext) -> Result<Option<Identity>, SessionError> {
        let access = ctx.get(&self.cookies.access_token_name).map(String::from);
        let refresh = ctx.get(&self.cookies.refresh_token_name).map(String::from);

        if let Some(token) = &access {
            match self.verify(token) {
                Ok(identity) => return Ok(Some(identity)),
                Err(e) => tracing::debug!("access token not usable, attempting refresh: {e}"),
            }
        }

        let Some(refresh_token) = refresh else {
            if access.is_some() {
                ctx.set(SetCookie::removal(&self.cookies.access_token_name, &self.cookies));
            }
            return Ok(None);
        };

        match self
            .grant(
                "refresh_token",
                serde_json::json!({ "refresh_token": refresh_token }),
            )
            .await
        {
            Ok(session) => {
                write_session_cookies(ctx, &session, &self.cookies);
                Ok(Some(session.user.into()))
            }
            Err(SessionError::Rejected { status }) if status.is_client_error() => {
                tracing::debug!(%status, "refresh token rejected, clearing session");
                clear_session_cookies(ctx, &self.cookies);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, SessionError> {
        self.grant(
            "password",
            serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: Option<&str>,
    ) -> Result<Identity, SessionError> {
        let response = self
            .client
            .post(format!("{}/signup", self.auth_url))
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({
                "email": email,
                "password": password,
                "data": { "full_name": full_name },
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Rejected { status });
        }
        let user = match response
            .json::<SignUpResponse>()
            .await
            .map_err(|e| SessionError::Decode(e.to_string()))?
        {
            SignUpResponse::Session(session) => session.user,
            SignUpResponse::User(user) => user,
        };
        Ok(user.into())
    }

    async fn exchange_code(&self, auth_code: &str, code_verifier: &str) -> Result<Session, SessionError> {
        self.grant(
            "pkce",
            serde_json::json!({ "auth_code": auth_code, "code_verifier": code_verifier }),
        )
        .await
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), SessionError> {
        let response = self
            .client
            .post(format!("{}/logout", self.auth_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SessionError::Rejected { status })
        }
    }

    fn cookie_config(&self) -> &CookieConfig {
        &self.cookies
    }
}

// --- Mock Implementation (For Tests) ---

/// MockSessionProvider
///
/// In-memory provider used by the integration tests. It ignores the inbound cookies and
/// answers with the configured identity, optionally simulating a token refresh by recording
/// cookie writes on the context.
#[derive(Clone, Default)]
pub struct MockSessionProvider {
    pub identity: Option<Identity>,
    /// Account returned by the grant methods (sign-in, code exchange) while the caller is
    /// still signed out. Falls back to `identity`.
    pub account: Option<Identity>,
    /// Cookies "refreshed" on every `get_identity` call.
    pub refreshed: Vec<(String, String)>,
    /// When true, `get_identity` and the grant methods fail with a transport-like error.
    pub should_fail: bool,
    pub cookies: CookieConfig,
}

impl MockSessionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
            ..Self::default()
        }
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn with_account(mut self, account: Identity) -> Self {
        self.account = Some(account);
        self
    }

    pub fn with_refresh(mut self, name: &str, value: &str) -> Self {
        self.refreshed.push((name.to_string(), value.to_string()));
        self
    }

    fn mock_session(&self) -> Result<Session, SessionError> {
        if self.should_fail {
            return Err(SessionError::Decode("Mock Session Error: Simulation requested".to_string()));
        }
        let identity = self
            .account
            .clone()
            .or_else(|| self.identity.clone())
            .ok_or(SessionError::Rejected {
                status: StatusCode::BAD_REQUEST,
            })?;
        Ok(Session {
            access_token: "mock-access-token".to_string(),
            refresh_token: "mock-refresh-token".to_string(),
            expires_in: 3600,
            user: ProviderUser {
                id: identity.id,
                email: Some(identity.email),
                email_confirmed_at: identity.verified_at,
            },
        })
    }
}

#[async_trait]
impl SessionProvider for MockSessionProvider {
    async fn get_identity(&self, ctx: &mut SessionContext) -> Result<Option<Identity>, SessionError> {
        for (name, value) in &self.refreshed {
            ctx.set(SetCookie::new(name, value, 3600, &self.cookies));
        }
        if self.should_fail {
            return Err(SessionError::Decode("Mock Session Error: Simulation requested".to_string()));
        }
        Ok(self.identity.clone())
    }

    async fn sign_in_with_password(&self, _email: &str, _password: &str) -> Result<Session, SessionError> {
        self.mock_session()
    }

    async fn sign_up(
        &self,
        email: &str,
        _password: &str,
        _full_name: Option<&str>,
    ) -> Result<Identity, SessionError> {
        if self.should_fail {
            return Err(SessionError::Rejected {
                status: StatusCode::UNPROCESSABLE_ENTITY,
            });
        }
        Ok(Identity {
            id: self.identity.as_ref().map(|i| i.id).unwrap_or_else(Uuid::new_v4),
            email: email.to_string(),
            verified_at: None,
        })
    }

    async fn exchange_code(&self, _auth_code: &str, _code_verifier: &str) -> Result<Session, SessionError> {
        self.mock_session()
    }

    async fn sign_out(&self, _access_token: &str) -> Result<(), SessionError> {
        Ok(())
    }

    fn cookie_config(&self) -> &CookieConfig {
        &self.cookies
    }
}
