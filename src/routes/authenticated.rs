use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Authenticated Router Module
///
/// Routes for any signed-in user. Browsers without a session never get here: the gatekeeper
/// redirects them to login. The `AuthUser` layer above this module turns any remaining
/// unauthenticated call into a 401.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /dashboard
        // Default landing page after sign-in.
        .route("/dashboard", get(handlers::get_dashboard))
        // GET/PATCH /profile
        .route(
            "/profile",
            get(handlers::get_profile).patch(handlers::update_profile),
        )
        // GET /moderation
        // Requires at least the moderator role (checked in the handler).
        .route("/moderation", get(handlers::get_moderation_queue))
}
