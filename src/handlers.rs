use crate::{
    AppState,
    auth::{AuthError, AuthUser},
    cookies::SetCookie,
    gatekeeper::{Outcome, safe_redirect_target},
    models::{
        Identity, LandingResponse, LoginForm, Profile, Role, SetRoleRequest, SignInRequest,
        SignUpRequest, UpdateProfileRequest, UserProfile,
    },
    session::{SessionContext, SessionError, clear_session_cookies, write_session_cookies},
};
use axum::{
    Extension, Form, Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use url::form_urlencoded;
use uuid::Uuid;

// --- Query Structs ---

/// RedirectParams
///
/// Query parameters carried by the sign-in pages.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct RedirectParams {
    /// Where to send the caller after a successful sign-in.
    pub redirect_to: Option<String>,
    /// Short error code shown by the sign-in form.
    pub error: Option<String>,
}

/// CallbackParams
///
/// Query parameters the provider appends when completing an OAuth / magic-link flow.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub next: Option<String>,
}

// --- Helpers ---

fn store_error(operation: &str, e: sqlx::Error) -> StatusCode {
    tracing::error!("{operation} error: {:?}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}

/// Redirects back to the sign-in form with an error code, keeping any `redirectTo`.
fn login_error(state: &AppState, error: &str, redirect_to: Option<&str>) -> Response {
    let mut query = form_urlencoded::Serializer::new(String::new());
    query.append_pair("error", error);
    if let Some(target) = redirect_to {
        query.append_pair("redirectTo", target);
    }
    Redirect::to(&format!("{}?{}", state.config.routes.login_path, query.finish())).into_response()
}

fn post_sign_in_destination(state: &AppState, requested: Option<&str>) -> Outcome {
    match safe_redirect_target(&state.config.routes, requested) {
        Some(target) => Outcome::RedirectTo(target),
        None => Outcome::RedirectToDashboard,
    }
}

fn redirect(state: &AppState, outcome: Outcome) -> Response {
    outcome
        .redirect_response(&state.config.routes)
        .unwrap_or_else(|| StatusCode::NO_CONTENT.into_response())
}

// --- Public ---

/// landing
///
/// [Public Route] Landing data for the home page.
#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Landing", body = LandingResponse))
)]
pub async fn landing(identity: Option<Extension<Identity>>) -> Json<LandingResponse> {
    Json(LandingResponse {
        signed_in: identity.is_some(),
    })
}

/// not_found
///
/// Fallback for unknown paths. Runs behind the gatekeeper like every other route.
pub async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

// --- Session Lifecycle ---

/// login_form
///
/// [Auth-Only Route] Describes the sign-in form. Signed-in callers never see it: the
/// gatekeeper redirects them first.
#[utoipa::path(
    get,
    path = "/login",
    params(RedirectParams),
    responses((status = 200, description = "Sign-in form", body = LoginForm))
)]
pub async fn login_form(Query(params): Query<RedirectParams>) -> Json<LoginForm> {
    Json(LoginForm {
        redirect_to: params.redirect_to,
        error: params.error,
    })
}

/// sign_in
///
/// [Auth-Only Route] Password grant against the provider. On success the session cookies are
/// written and the caller is sent to `redirectTo` (when safe) or the dashboard.
#[utoipa::path(
    post,
    path = "/login",
    params(RedirectParams),
    request_body(content = SignInRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Signed in, or back to the form with an error code"),
    )
)]
pub async fn sign_in(
    State(state): State<AppState>,
    Query(params): Query<RedirectParams>,
    Form(payload): Form<SignInRequest>,
) -> Response {
    let redirect_to = params.redirect_to.as_deref();
    match state
        .sessions
        .sign_in_with_password(&payload.email, &payload.password)
        .await
    {
        Ok(session) => {
            let mut ctx = SessionContext::default();
            write_session_cookies(&mut ctx, &session, state.sessions.cookie_config());
            tracing::info!(user_id = %session.user.id, "signed in");
            ctx.apply(redirect(&state, post_sign_in_destination(&state, redirect_to)))
        }
        Err(SessionError::Rejected { status }) => {
            tracing::debug!(%status, "sign-in rejected");
            login_error(&state, "invalid_credentials", redirect_to)
        }
        Err(e) => {
            tracing::error!("sign-in failed: {e}");
            login_error(&state, "provider_unavailable", redirect_to)
        }
    }
}

/// sign_up
///
/// [Auth-Only Route] Registers with the provider, then creates the mirrored row in
/// `public.profiles` with the `user` role so both stores share the same primary key.
#[utoipa::path(
    post,
    path = "/signup",
    request_body = SignUpRequest,
    responses(
        (status = 201, description = "Registered", body = Profile),
        (status = 400, description = "Rejected by the auth provider"),
        (status = 502, description = "Auth provider unavailable")
    )
)]
pub async fn sign_up(
    State(state): State<AppState>,
    Json(payload): Json<SignUpRequest>,
) -> Result<(StatusCode, Json<Profile>), StatusCode> {
    let identity = state
        .sessions
        .sign_up(&payload.email, &payload.password, payload.full_name.as_deref())
        .await
        .map_err(|e| match e {
            SessionError::Rejected { status } => {
                tracing::debug!(%status, "sign-up rejected");
                StatusCode::BAD_REQUEST
            }
            other => {
                tracing::error!("sign-up failed: {other}");
                StatusCode::BAD_GATEWAY
            }
        })?;

    let profile = state
        .repo
        .create_profile(identity.id, &identity.email, payload.full_name.as_deref())
        .await
        .map_err(|e| store_error("create_profile", e))?;

    Ok((StatusCode::CREATED, Json(profile)))
}

/// auth_callback
///
/// [Callback Route] Completes a PKCE flow: exchanges `code` plus the verifier cookie for a
/// session, writes the session cookies, makes sure a profile row exists and redirects to
/// `next` (when safe) or the dashboard. Any failure goes back to the sign-in form.
#[utoipa::path(
    get,
    path = "/auth/callback",
    params(CallbackParams),
    responses((status = 303, description = "Session established, or back to sign-in"))
)]
pub async fn auth_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
) -> Response {
    let cookies = state.sessions.cookie_config().clone();
    let mut ctx = SessionContext::from_headers(&headers);

    let verifier = ctx.get(&cookies.code_verifier_name).map(String::from);
    let (Some(code), Some(verifier)) = (params.code.as_deref(), verifier) else {
        return login_error(&state, "auth_callback", None);
    };

    let session = match state.sessions.exchange_code(code, &verifier).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!("code exchange failed: {e}");
            return login_error(&state, "auth_callback", None);
        }
    };

    let identity: Identity = session.user.clone().into();
    if let Err(e) = state
        .repo
        .create_profile(identity.id, &identity.email, None)
        .await
    {
        tracing::error!(user_id = %identity.id, "profile provisioning failed: {:?}", e);
        return login_error(&state, "auth_callback", None);
    }

    write_session_cookies(&mut ctx, &session, &cookies);
    ctx.set(SetCookie::removal(&cookies.code_verifier_name, &cookies));

    let destination = post_sign_in_destination(&state, params.next.as_deref());
    ctx.apply(redirect(&state, destination))
}

/// sign_out
///
/// [Public Route] Revokes the provider session (best effort), clears the session cookies and
/// redirects home. The cookies are cleared even when the provider call fails.
#[utoipa::path(
    post,
    path = "/logout",
    responses((status = 303, description = "Signed out"))
)]
pub async fn sign_out(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let cookies = state.sessions.cookie_config().clone();
    let mut ctx = SessionContext::from_headers(&headers);

    if let Some(token) = ctx.get(&cookies.access_token_name).map(String::from) {
        if let Err(e) = state.sessions.sign_out(&token).await {
            tracing::debug!("provider sign-out failed: {e}");
        }
    }

    clear_session_cookies(&mut ctx, &cookies);
    ctx.apply(redirect(&state, Outcome::RedirectHome))
}

// --- Authenticated ---

async fn load_user_profile(state: &AppState, user: &AuthUser) -> Result<UserProfile, StatusCode> {
    let profile = state
        .repo
        .get_profile(user.id)
        .await
        .map_err(|e| store_error("get_profile", e))?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(UserProfile::new(profile, user.identity.as_ref()))
}

/// get_dashboard
///
/// [Authenticated Route] The default post-sign-in destination.
#[utoipa::path(
    get,
    path = "/dashboard",
    responses((status = 200, description = "Dashboard", body = UserProfile))
)]
pub async fn get_dashboard(
    user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<UserProfile>, StatusCode> {
    load_user_profile(&state, &user).await.map(Json)
}

/// get_profile
///
/// [Authenticated Route] The caller's own profile.
#[utoipa::path(
    get,
    path = "/profile",
    responses((status = 200, description = "Profile", body = UserProfile))
)]
pub async fn get_profile(
    user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<UserProfile>, StatusCode> {
    load_user_profile(&state, &user).await.map(Json)
}

/// update_profile
///
/// [Authenticated Route] Partial update of the caller's own profile. The role is not editable here.
#[utoipa::path(
    patch,
    path = "/profile",
    request_body = UpdateProfileRequest,
    responses((status = 200, description = "Updated", body = UserProfile))
)]
pub async fn update_profile(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<UserProfile>, StatusCode> {
    let profile = state
        .repo
        .update_profile(user.id, payload)
        .await
        .map_err(|e| store_error("update_profile", e))?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(UserProfile::new(profile, user.identity.as_ref())))
}

/// get_moderation_queue
///
/// [Authenticated Route] Members a moderator can act on. Requires at least `moderator`;
/// signed-in users below that get 403.
#[utoipa::path(
    get,
    path = "/moderation",
    responses(
        (status = 200, description = "Members", body = [Profile]),
        (status = 403, description = "Insufficient role")
    )
)]
pub async fn get_moderation_queue(
    user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<Profile>>, Response> {
    user.require_role(Role::Moderator)
        .map_err(AuthError::into_response)?;

    let profiles = state
        .repo
        .list_profiles()
        .await
        .map_err(|e| store_error("list_profiles", e).into_response())?;
    Ok(Json(
        profiles
            .into_iter()
            .filter(|p| p.role < user.role)
            .collect(),
    ))
}

// --- Admin ---

/// list_users
///
/// [Admin Route] Every profile with its role.
#[utoipa::path(
    get,
    path = "/admin/users",
    responses((status = 200, description = "All profiles", body = [Profile]))
)]
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<Profile>>, StatusCode> {
    state
        .repo
        .list_profiles()
        .await
        .map(Json)
        .map_err(|e| store_error("list_profiles", e))
}

/// set_user_role
///
/// [Admin Route] Changes a user's role. The admin check has already run in the admin layer;
/// the extractor is taken again here for the audit line.
#[utoipa::path(
    put,
    path = "/admin/users/{id}/role",
    params(("id" = Uuid, Path, description = "Profile ID")),
    request_body = SetRoleRequest,
    responses(
        (status = 200, description = "Updated", body = Profile),
        (status = 404, description = "Not Found")
    )
)]
pub async fn set_user_role(
    admin: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetRoleRequest>,
) -> Result<Json<Profile>, Response> {
    admin
        .require_role(Role::Admin)
        .map_err(AuthError::into_response)?;

    let profile = state
        .repo
        .set_role(id, payload.role)
        .await
        .map_err(|e| store_error("set_role", e).into_response())?
        .ok_or_else(|| StatusCode::NOT_FOUND.into_response())?;

    tracing::info!(admin_id = %admin.id, user_id = %id, role = %payload.role, "role changed");
    Ok(Json(profile))
}
