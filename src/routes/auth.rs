use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Auth Router Module
///
/// The session lifecycle: password sign-in, registration, OAuth completion and sign-out.
/// Every handler here writes the session cookies itself.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        // GET/POST /login
        // Auth-only. GET describes the form, POST performs the password grant.
        .route("/login", get(handlers::login_form).post(handlers::sign_in))
        // POST /signup
        // Auth-only. Registers with the provider and mirrors the user into `public.profiles`.
        .route("/signup", post(handlers::sign_up))
        // GET /auth/callback?code=...&next=...
        // Under the callback prefix: the gatekeeper lets it through untouched so the PKCE
        // exchange can complete.
        .route("/auth/callback", get(handlers::auth_callback))
        // POST /logout
        // Public. Revokes the provider session and clears the cookies.
        .route("/logout", post(handlers::sign_out))
}
