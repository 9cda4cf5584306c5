use axum::{
    Json,
    extract::{FromRef, FromRequestParts},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::{AppConfig, Env},
    models::{Identity, Role},
    repository::RepositoryState,
    session::{SessionContext, SessionState},
};

/// Local development header naming a profile id to act as. Ignored outside `Env::Local`.
pub const DEV_USER_HEADER: &str = "x-user-id";

/// AuthError
///
/// The two failure kinds of action-level guards, kept distinct so callers can tell
/// "not signed in" (401) from "signed in, insufficient role" (403).
#[derive(Debug, Error, PartialEq)]
pub enum AuthError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("requires the `{required}` role")]
    Forbidden { required: Role },
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        // Store failures are logged here and never echoed to the client.
        let message = match &self {
            AuthError::Internal(detail) => {
                tracing::error!("authorization lookup failed: {detail}");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (self.status(), Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// AuthUser Extractor Result
///
/// The resolved identity of an authenticated request together with the role read from
/// `public.profiles` for this request.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    // Present unless the request came through the local development bypass.
    pub identity: Option<Identity>,
}

impl AuthUser {
    /// require_role
    ///
    /// Action-level guard: `Forbidden` unless this user's role is at least `required`.
    pub fn require_role(&self, required: Role) -> Result<(), AuthError> {
        if Role::has_role(required, self.role) {
            Ok(())
        } else {
            Err(AuthError::Forbidden { required })
        }
    }
}

/// AuthUser Extractor Implementation
///
/// Implements Axum's FromRequestParts trait, making AuthUser usable as a handler argument.
///
/// The process:
/// 1. Gatekeeper Identity: taken from the request extensions when the gatekeeper already
///    resolved it (including through its local bypass), so both guards see the same caller.
/// 2. Local Bypass: otherwise, in `Env::Local` the `x-user-id` header names a profile directly.
/// 3. Session: otherwise resolved from the session cookies.
/// 4. Profile Lookup: the role is read fresh from the profile store.
///
/// Rejection: `Unauthenticated` when there is no session or no profile, `Internal` on store errors.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    SessionState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        // 1. Identity resolved by the gatekeeper
        let resolved = parts.extensions.get::<Identity>().cloned();

        // 2. Local Development Bypass Check
        if resolved.is_none() && config.env == Env::Local {
            let bypass_id = parts
                .headers
                .get(DEV_USER_HEADER)
                .and_then(|value| value.to_str().ok())
                .and_then(|id_str| Uuid::parse_str(id_str).ok());
            if let Some(user_id) = bypass_id {
                if let Ok(Some(profile)) = repo.get_profile(user_id).await {
                    return Ok(AuthUser {
                        id: profile.id,
                        email: profile.email,
                        role: profile.role,
                        identity: None,
                    });
                }
            }
        }

        // 3. Session Resolution
        let identity = match resolved {
            Some(identity) => identity,
            None => {
                let sessions = SessionState::from_ref(state);
                let mut ctx = SessionContext::from_headers(&parts.headers);
                // Cookies refreshed here cannot reach the client; routes behind the gatekeeper
                // never take this path.
                match sessions.get_identity(&mut ctx).await {
                    Ok(Some(identity)) => identity,
                    Ok(None) => return Err(AuthError::Unauthenticated),
                    Err(e) => {
                        tracing::debug!("session resolution failed: {e}");
                        return Err(AuthError::Unauthenticated);
                    }
                }
            }
        };

        // 4. Profile Lookup
        let profile = repo
            .get_profile(identity.id)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?
            // A session without a profile row is treated as signed out.
            .ok_or(AuthError::Unauthenticated)?;

        Ok(AuthUser {
            id: profile.id,
            email: profile.email,
            role: profile.role,
            identity: Some(identity),
        })
    }
}

/// require_role
///
/// Resolves the current identity and profile from the request and checks the role hierarchy.
/// Used by the admin route layer and available to any custom guard.
pub async fn require_role<S>(parts: &mut Parts, state: &S, required: Role) -> Result<AuthUser, AuthError>
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    SessionState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    let user = AuthUser::from_request_parts(parts, state).await?;
    user.require_role(required)?;
    Ok(user)
}
