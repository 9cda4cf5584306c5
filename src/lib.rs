use axum::{
    Router,
    extract::{FromRef, Request, State},
    http::HeaderName,
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core application services and components.
pub mod auth;
pub mod config;
pub mod cookies;
pub mod gatekeeper;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod session;

// Module for routing segregation (Public, Auth, Authenticated, Admin).
pub mod routes;
use auth::{AuthUser, require_role};
use routes::{admin, auth as auth_routes, authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use gatekeeper::Gatekeeper;
pub use repository::{PostgresRepository, RepositoryState};
pub use session::{MockSessionProvider, SessionState, SupabaseSessionProvider};

/// ApiDoc
///
/// Auto-generated OpenAPI documentation, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::landing, handlers::login_form, handlers::sign_in, handlers::sign_up,
        handlers::auth_callback, handlers::sign_out, handlers::get_dashboard,
        handlers::get_profile, handlers::update_profile, handlers::get_moderation_queue,
        handlers::list_users, handlers::set_user_role
    ),
    components(
        schemas(
            models::Role, models::Profile, models::UserProfile, models::SignInRequest,
            models::SignUpRequest, models::UpdateProfileRequest, models::SetRoleRequest,
            models::LandingResponse, models::LoginForm,
        )
    ),
    tags(
        (name = "gatekeeper-portal", description = "Starter backend with route protection")
    )
)]
struct ApiDoc;

/// AppState
///
/// Implements the **Unified State Pattern**: the single, thread-safe, immutable container
/// holding all application services and configuration, shared across requests.
#[derive(Clone)]
pub struct AppState {
    /// Profile store: role lookups and profile CRUD.
    pub repo: RepositoryState,
    /// Hosted auth provider client.
    pub sessions: SessionState,
    /// The loaded, immutable environment configuration.
    pub config: AppConfig,
    /// Route-protection middleware, built from the three above.
    pub gatekeeper: Arc<Gatekeeper>,
}

impl AppState {
    pub fn new(repo: RepositoryState, sessions: SessionState, config: AppConfig) -> Self {
        let gatekeeper = Arc::new(Gatekeeper::new(
            config.routes.clone(),
            sessions.clone(),
            repo.clone(),
            &config.env,
        ));
        Self {
            repo,
            sessions,
            config,
            gatekeeper,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for SessionState {
    fn from_ref(app_state: &AppState) -> SessionState {
        app_state.sessions.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Enforces authentication for the `authenticated_routes`. If `AuthUser` cannot be extracted
/// the request is rejected with 401 before reaching the handler.
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// admin_middleware
///
/// Second line behind the gatekeeper's soft redirect: API callers that reach an admin
/// route without the admin role get a hard 403.
async fn admin_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();
    match require_role(&mut parts, &state, models::Role::Admin).await {
        Ok(_) => next.run(Request::from_parts(parts, body)).await,
        Err(e) => e.into_response(),
    }
}

/// create_router
///
/// Assembles the routing structure, applies the gatekeeper, the scoped guards and the
/// observability stack, and registers the application state.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    // Header name constant for Request Correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Base Router Assembly
    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(auth_routes::auth_routes())
        .merge(
            authenticated::authenticated_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        )
        .nest(
            "/admin",
            admin::admin_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), admin_middleware)),
        )
        .fallback(handlers::not_found)
        // 3. Gatekeeper: wraps every route and the fallback, so unknown protected paths
        // still redirect to login.
        .layer(middleware::from_fn_with_state(
            state.clone(),
            gatekeeper::gatekeeper_middleware,
        ))
        .with_state(state);

    // 4. Observability and Correlation Layers (Applied outermost/first)
    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span maker for `TraceLayer`: correlates every log line of a request by its `x-request-id`.
/// The query string is left out since it may carry OAuth codes.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        path = %request.uri().path(),
        req_id = %request_id,
    )
}
