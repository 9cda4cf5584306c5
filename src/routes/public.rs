use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Public Router Module
///
/// Endpoints reachable without a session. The gatekeeper still resolves the session on these
/// paths, so a signed-in caller's cookies are refreshed here too.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Monitoring and load balancer checks.
        .route("/health", get(|| async { "ok" }))
        // GET /
        // Landing data; reports whether the caller is signed in.
        .route("/", get(handlers::landing))
}
