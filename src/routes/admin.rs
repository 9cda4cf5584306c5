use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, put},
};

/// Admin Router Module
///
/// Nested under `/admin`. The gatekeeper soft-redirects non-admin browsers to the dashboard;
/// the `admin_middleware` layer applied in `create_router` answers any other non-admin
/// caller with 403.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin/users
        // Lists every profile with its role.
        .route("/users", get(handlers::list_users))
        // PUT /admin/users/{id}/role
        // Promotes or demotes a user.
        .route("/users/{id}/role", put(handlers::set_user_role))
}
