use axum::{
    Json, Router,
    body::Body,
    extract::Query,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use gatekeeper_portal::{
    config::{AppConfig, CookieConfig},
    cookies::SetCookie,
    session::{Claims, SessionContext, SessionError, SessionProvider, SupabaseSessionProvider},
};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use uuid::Uuid;

const USER: Uuid = Uuid::from_u128(7);
const ANON_KEY: &str = "local-anon-key";

// --- Fake auth provider ---

#[derive(Deserialize)]
struct GrantQuery {
    grant_type: String,
}

fn session_body(access: &str, refresh: &str) -> Value {
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer",
        "expires_in": 3600,
        "user": {
            "id": USER,
            "email": "member@example.com",
            "email_confirmed_at": "2024-05-01T10:00:00Z"
        }
    })
}

fn invalid_grant() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "invalid_grant" })),
    )
        .into_response()
}

async fn token(Query(query): Query<GrantQuery>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if headers.get("apikey").and_then(|v| v.to_str().ok()) != Some(ANON_KEY) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match query.grant_type.as_str() {
        "refresh_token" if body["refresh_token"] == "good-refresh" => {
            Json(session_body("new-access", "rotated-refresh")).into_response()
        }
        "password" if body["password"] == "correct horse" => {
            Json(session_body("password-access", "password-refresh")).into_response()
        }
        "pkce" if body["auth_code"] == "code-1" && body["code_verifier"] == "verifier-1" => {
            Json(session_body("pkce-access", "pkce-refresh")).into_response()
        }
        _ => invalid_grant(),
    }
}

async fn signup(Json(body): Json<Value>) -> Response {
    // Email confirmation enabled: only the user object comes back.
    Json(json!({ "id": USER, "email": body["email"] })).into_response()
}

async fn spawn_provider() -> AppConfig {
    let app = Router::new()
        .route("/auth/v1/token", post(token))
        .route("/auth/v1/signup", post(signup))
        .route("/auth/v1/logout", post(|| async { StatusCode::NO_CONTENT }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    AppConfig {
        supabase_url: format!("http://{addr}"),
        ..AppConfig::default()
    }
}

// --- Helpers ---

fn now() -> usize {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as usize
}

fn access_token(config: &AppConfig, aud: &str, exp: usize) -> String {
    let claims = Claims {
        sub: USER,
        email: Some("member@example.com".to_string()),
        aud: aud.to_string(),
        exp,
        iat: now(),
        email_confirmed_at: None,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .unwrap()
}

fn context(cookies: &[(&str, &str)]) -> SessionContext {
    let raw = cookies
        .iter()
        .map(|(n, v)| format!("{n}={v}"))
        .collect::<Vec<_>>()
        .join("; ");
    let mut headers = HeaderMap::new();
    headers.insert(header::COOKIE, HeaderValue::from_str(&raw).unwrap());
    SessionContext::from_headers(&headers)
}

fn pending(ctx: &SessionContext) -> Vec<(String, String, i64)> {
    ctx.pending()
        .iter()
        .map(|c| (c.name.clone(), c.value.clone(), c.max_age))
        .collect()
}

// --- SessionContext ---

#[test]
fn test_context_writes_are_visible_to_later_reads() {
    let config = CookieConfig::default();
    let mut ctx = context(&[("sb-access-token", "old"), ("theme", "dark")]);

    ctx.set(SetCookie::new("sb-access-token", "new", 60, &config));
    ctx.set(SetCookie::new("sb-access-token", "newer", 60, &config));
    ctx.set(SetCookie::removal("theme", &config));

    assert_eq!(ctx.get("sb-access-token"), Some("newer"));
    assert_eq!(ctx.get("theme"), None);
    // Only the last write per name is emitted.
    assert_eq!(ctx.pending().len(), 2);
}

#[test]
fn test_context_rewrites_request_cookie_header() {
    let config = CookieConfig::default();
    let mut headers = HeaderMap::new();
    headers.insert(header::COOKIE, HeaderValue::from_static("a=1; sb-access-token=old"));
    let mut ctx = SessionContext::from_headers(&headers);

    ctx.set(SetCookie::new("sb-access-token", "fresh", 60, &config));
    ctx.sync_request_headers(&mut headers);

    assert_eq!(headers[header::COOKIE], "a=1; sb-access-token=fresh");
}

#[test]
fn test_apply_keeps_cookies_already_set_by_the_handler() {
    let config = CookieConfig::default();
    let mut ctx = SessionContext::default();
    ctx.set(SetCookie::new("sb-access-token", "refreshed", 60, &config));
    ctx.set(SetCookie::new("sb-refresh-token", "rotated", 60, &config));

    let mut response = Response::new(Body::empty());
    response.headers_mut().append(
        header::SET_COOKIE,
        SetCookie::removal("sb-access-token", &config)
            .to_header_value()
            .unwrap(),
    );

    let response = ctx.apply(response);
    let written: Vec<_> = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();

    assert_eq!(written.len(), 2);
    assert!(written[0].starts_with("sb-access-token=;"));
    assert!(written[1].starts_with("sb-refresh-token=rotated;"));
}

// --- SupabaseSessionProvider ---

#[tokio::test]
async fn test_valid_access_token_resolves_without_refresh() {
    let config = AppConfig::default();
    let provider = SupabaseSessionProvider::new(&config);
    let token = access_token(&config, "authenticated", now() + 3600);
    let mut ctx = context(&[("sb-access-token", &token)]);

    let identity = provider.get_identity(&mut ctx).await.unwrap().unwrap();

    assert_eq!(identity.id, USER);
    assert_eq!(identity.email, "member@example.com");
    assert!(!ctx.is_dirty());
}

#[tokio::test]
async fn test_stale_access_token_without_refresh_is_removed() {
    let config = AppConfig::default();
    let provider = SupabaseSessionProvider::new(&config);

    for token in [
        access_token(&config, "authenticated", now() - 3600),
        access_token(&config, "anon", now() + 3600),
        "not-a-jwt".to_string(),
    ] {
        let mut ctx = context(&[("sb-access-token", &token)]);

        assert_eq!(provider.get_identity(&mut ctx).await.unwrap(), None);
        assert_eq!(pending(&ctx), vec![("sb-access-token".to_string(), String::new(), 0)]);
    }
}

#[tokio::test]
async fn test_no_cookies_means_signed_out() {
    let provider = SupabaseSessionProvider::new(&AppConfig::default());
    let mut ctx = SessionContext::default();

    assert_eq!(provider.get_identity(&mut ctx).await.unwrap(), None);
    assert!(!ctx.is_dirty());
}

#[tokio::test]
async fn test_refresh_rotates_both_cookies() {
    let config = spawn_provider().await;
    let provider = SupabaseSessionProvider::new(&config);
    let expired = access_token(&config, "authenticated", now() - 3600);
    let mut ctx = context(&[("sb-access-token", &expired), ("sb-refresh-token", "good-refresh")]);

    let identity = provider.get_identity(&mut ctx).await.unwrap().unwrap();

    assert_eq!(identity.id, USER);
    assert!(identity.verified_at.is_some());
    assert_eq!(
        pending(&ctx),
        vec![
            ("sb-access-token".to_string(), "new-access".to_string(), 3600),
            (
                "sb-refresh-token".to_string(),
                "rotated-refresh".to_string(),
                config.cookies.max_age_secs
            ),
        ]
    );
    assert_eq!(ctx.get("sb-access-token"), Some("new-access"));
}

#[tokio::test]
async fn test_rejected_refresh_clears_session() {
    let config = spawn_provider().await;
    let provider = SupabaseSessionProvider::new(&config);
    let mut ctx = context(&[("sb-refresh-token", "revoked")]);

    assert_eq!(provider.get_identity(&mut ctx).await.unwrap(), None);
    assert_eq!(
        pending(&ctx),
        vec![
            ("sb-access-token".to_string(), String::new(), 0),
            ("sb-refresh-token".to_string(), String::new(), 0),
        ]
    );
}

#[tokio::test]
async fn test_unreachable_provider_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let config = AppConfig {
        supabase_url: format!("http://{addr}"),
        ..AppConfig::default()
    };
    let provider = SupabaseSessionProvider::new(&config);
    let mut ctx = context(&[("sb-refresh-token", "good-refresh")]);

    let result = provider.get_identity(&mut ctx).await;

    assert!(matches!(result, Err(SessionError::Transport(_))));
    assert!(!ctx.is_dirty());
}

#[tokio::test]
async fn test_password_and_code_grants() {
    let config = spawn_provider().await;
    let provider = SupabaseSessionProvider::new(&config);

    let session = provider
        .sign_in_with_password("member@example.com", "correct horse")
        .await
        .unwrap();
    assert_eq!(session.access_token, "password-access");
    assert_eq!(session.user.id, USER);

    let rejected = provider
        .sign_in_with_password("member@example.com", "wrong")
        .await;
    assert!(matches!(
        rejected,
        Err(SessionError::Rejected { status }) if status == StatusCode::BAD_REQUEST
    ));

    let session = provider.exchange_code("code-1", "verifier-1").await.unwrap();
    assert_eq!(session.refresh_token, "pkce-refresh");
    assert!(provider.exchange_code("code-1", "other").await.is_err());
}

#[tokio::test]
async fn test_sign_up_accepts_bare_user_response() {
    let config = spawn_provider().await;
    let provider = SupabaseSessionProvider::new(&config);

    let identity = provider
        .sign_up("new@example.com", "secret-password", Some("New Member"))
        .await
        .unwrap();

    assert_eq!(identity.id, USER);
    assert_eq!(identity.email, "new@example.com");
    assert_eq!(identity.verified_at, None);
    assert!(provider.sign_out("any-token").await.is_ok());
}
