//! Request Gatekeeper
//!
//! Runs in front of every non-static route. For each request it refreshes the caller's
//! session, classifies the path against the configured route tables and decides between
//! continuing and one of the redirects. The decision is made by [`Gatekeeper::evaluate`];
//! [`gatekeeper_middleware`] turns it into a response and attaches the session cookies.
//!
//! Precedence:
//! 1. auth-callback prefix: continue, no checks
//! 2. resolve identity: local `x-user-id` header, else the session (may refresh cookies)
//! 3. public and not protected: continue
//! 4. protected: login without identity, dashboard for non-admins on admin paths
//! 5. auth-only with identity: honoured `redirectTo` or dashboard
//! 6. anything else: continue

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use url::form_urlencoded;
use uuid::Uuid;

use crate::{
    AppState,
    auth::DEV_USER_HEADER,
    config::{Env, RouteConfig},
    models::{Identity, Role},
    repository::RepositoryState,
    session::{SessionContext, SessionError, SessionState},
};

/// RouteClass
///
/// Which of the four tables a path matched. A path may match several; `protected` already
/// includes admin matches since admin routes are a subset of protected routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouteClass {
    pub public: bool,
    pub auth_only: bool,
    pub protected: bool,
    pub admin: bool,
}

fn matches_public(route: &str, path: &str) -> bool {
    path == route
        || path
            .strip_prefix(route)
            .is_some_and(|rest| rest.starts_with('/') && !route.ends_with('/'))
}

fn matches_prefix(routes: &[String], path: &str) -> bool {
    routes.iter().any(|route| path.starts_with(route.as_str()))
}

/// Pure classification of a path against the route tables.
pub fn classify(routes: &RouteConfig, path: &str) -> RouteClass {
    let admin = matches_prefix(&routes.admin, path);
    RouteClass {
        public: routes.public.iter().any(|route| matches_public(route, path)),
        auth_only: matches_prefix(&routes.auth_only, path),
        protected: admin || matches_prefix(&routes.protected, path),
        admin,
    }
}

/// The callback prefix itself or anything below it; `/auth/callbackX` does not match.
pub fn is_auth_callback(routes: &RouteConfig, path: &str) -> bool {
    matches_public(&routes.auth_callback_prefix, path)
}

/// Static assets never reach the gatekeeper.
pub fn is_static_asset(routes: &RouteConfig, path: &str) -> bool {
    if matches_prefix(&routes.static_prefixes, path) {
        return true;
    }
    let last_segment = path.rsplit('/').next().unwrap_or_default();
    match last_segment.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => routes
            .static_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ext)),
        _ => false,
    }
}

/// Reads a single query parameter, percent-decoded.
pub fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// safe_redirect_target
///
/// Accepts a post-sign-in destination only if it is a same-origin relative path and not itself
/// an auth-only route (which would bounce straight back and loop).
pub fn safe_redirect_target(routes: &RouteConfig, candidate: Option<&str>) -> Option<String> {
    let target = candidate?.trim();
    // Browsers drop tabs and newlines from URLs, which would turn `/\t/host` into `//host`.
    if target.chars().any(char::is_control) {
        return None;
    }
    if !target.starts_with('/') || target.starts_with("//") || target.contains('\\') {
        return None;
    }
    let path = target.split(['?', '#']).next().unwrap_or(target);
    if classify(routes, path).auth_only {
        return None;
    }
    Some(target.to_string())
}

/// Outcome
///
/// The single decision produced for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    RedirectToLogin { return_to: String },
    RedirectToDashboard,
    /// A validated `redirectTo` destination.
    RedirectTo(String),
    RedirectHome,
}

impl Outcome {
    /// The `Location` for redirect outcomes, `None` for `Continue`.
    pub fn location(&self, routes: &RouteConfig) -> Option<String> {
        match self {
            Outcome::Continue => None,
            Outcome::RedirectToLogin { return_to } => Some(format!(
                "{}?redirectTo={}",
                routes.login_path,
                form_urlencoded::byte_serialize(return_to.as_bytes()).collect::<String>()
            )),
            Outcome::RedirectToDashboard => Some(routes.dashboard_path.clone()),
            Outcome::RedirectTo(target) => Some(target.clone()),
            Outcome::RedirectHome => Some(routes.home_path.clone()),
        }
    }

    /// Builds the redirect response. `Continue` has no response of its own.
    pub fn redirect_response(&self, routes: &RouteConfig) -> Option<Response> {
        self.location(routes)
            .map(|location| Redirect::to(&location).into_response())
    }
}

/// Gatekeeper
///
/// Holds the route tables and the two collaborators it consults. Built once at startup and
/// shared through `AppState`; evaluation keeps no state between requests.
pub struct Gatekeeper {
    routes: RouteConfig,
    sessions: SessionState,
    repo: RepositoryState,
    // Provider failures are surfaced at warn level only during local development.
    verbose_errors: bool,
    // Honour the `x-user-id` development header (Env::Local only).
    dev_bypass: bool,
}

impl Gatekeeper {
    pub fn new(routes: RouteConfig, sessions: SessionState, repo: RepositoryState, env: &Env) -> Self {
        Self {
            routes,
            sessions,
            repo,
            verbose_errors: *env == Env::Local,
            dev_bypass: *env == Env::Local,
        }
    }

    pub fn routes(&self) -> &RouteConfig {
        &self.routes
    }

    async fn dev_identity(&self, dev_user: Option<Uuid>) -> Option<Identity> {
        let id = dev_user.filter(|_| self.dev_bypass)?;
        match self.repo.get_profile(id).await {
            Ok(Some(profile)) => Some(Identity {
                id: profile.id,
                email: profile.email,
                verified_at: None,
            }),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(user_id = %id, "dev bypass lookup failed: {e}");
                None
            }
        }
    }

    fn log_session_error(&self, error: &SessionError) {
        if self.verbose_errors {
            tracing::warn!("session resolution failed, continuing unauthenticated: {error}");
        } else {
            tracing::debug!("session resolution failed, continuing unauthenticated: {error}");
        }
    }

    /// evaluate
    ///
    /// Decides the outcome for `path`. Any cookie writes made while resolving the session are
    /// left on `ctx` for the caller to apply. Also returns the resolved identity so a
    /// continuing request can hand it to downstream extractors.
    pub async fn evaluate(
        &self,
        path: &str,
        query: Option<&str>,
        ctx: &mut SessionContext,
    ) -> (Outcome, Option<Identity>) {
        self.evaluate_as(path, query, ctx, None).await
    }

    /// evaluate_as
    ///
    /// [`Gatekeeper::evaluate`] with the local development bypass: in `Env::Local` an existing
    /// profile named by `dev_user` stands in for the session, so the route checks and the
    /// downstream extractors agree on who the caller is. Ignored in production.
    pub async fn evaluate_as(
        &self,
        path: &str,
        query: Option<&str>,
        ctx: &mut SessionContext,
        dev_user: Option<Uuid>,
    ) -> (Outcome, Option<Identity>) {
        if is_auth_callback(&self.routes, path) {
            return (Outcome::Continue, None);
        }

        let identity = match self.dev_identity(dev_user).await {
            Some(identity) => Some(identity),
            None => match self.sessions.get_identity(ctx).await {
                Ok(identity) => identity,
                Err(e) => {
                    self.log_session_error(&e);
                    None
                }
            },
        };

        let class = classify(&self.routes, path);

        if class.public && !class.protected {
            return (Outcome::Continue, identity);
        }

        if class.protected {
            let Some(identity) = identity else {
                return (
                    Outcome::RedirectToLogin {
                        return_to: path.to_string(),
                    },
                    None,
                );
            };

            if class.admin {
                match self.repo.get_role(identity.id).await {
                    Ok(Some(role)) if Role::has_role(Role::Admin, role) => {}
                    Ok(role) => {
                        tracing::info!(
                            user_id = %identity.id,
                            role = ?role,
                            path,
                            "insufficient role for admin route"
                        );
                        return (Outcome::RedirectToDashboard, Some(identity));
                    }
                    Err(e) => {
                        tracing::error!(user_id = %identity.id, "role lookup failed: {e}");
                        return (
                            Outcome::RedirectToLogin {
                                return_to: path.to_string(),
                            },
                            None,
                        );
                    }
                }
            }
            return (Outcome::Continue, Some(identity));
        }

        if class.auth_only && identity.is_some() {
            let requested = query_param(query, "redirectTo");
            let outcome = match safe_redirect_target(&self.routes, requested.as_deref()) {
                Some(target) => Outcome::RedirectTo(target),
                None => Outcome::RedirectToDashboard,
            };
            return (outcome, identity);
        }

        (Outcome::Continue, identity)
    }
}

/// gatekeeper_middleware
///
/// Axum adapter around [`Gatekeeper::evaluate`]. The session context is applied at the single
/// exit point below, so pass-through responses and every redirect carry the same cookies.
pub async fn gatekeeper_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let gatekeeper = state.gatekeeper.clone();
    let path = request.uri().path().to_owned();

    if is_static_asset(gatekeeper.routes(), &path) {
        return next.run(request).await;
    }

    let mut ctx = SessionContext::from_headers(request.headers());
    let query = request.uri().query().map(str::to_owned);
    let dev_user = request
        .headers()
        .get(DEV_USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|id| Uuid::parse_str(id).ok());
    let (outcome, identity) = gatekeeper
        .evaluate_as(&path, query.as_deref(), &mut ctx, dev_user)
        .await;

    let response = match outcome.redirect_response(gatekeeper.routes()) {
        Some(redirect) => {
            tracing::debug!(path = %path, outcome = ?outcome, "gatekeeper redirect");
            redirect
        }
        None => {
            ctx.sync_request_headers(request.headers_mut());
            if let Some(identity) = identity {
                request.extensions_mut().insert(identity);
            }
            next.run(request).await
        }
    };

    ctx.apply(response)
}
