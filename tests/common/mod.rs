#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, Response, header},
};
use chrono::Utc;
use gatekeeper_portal::{
    AppState, create_router,
    config::AppConfig,
    models::{Identity, Profile, Role, UpdateProfileRequest},
    repository::{Repository, RepositoryState},
    session::{MockSessionProvider, SessionState},
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tower::ServiceExt;
use url::form_urlencoded;
use uuid::Uuid;

// --- Mock Repository ---

/// In-memory profile store. `fail` simulates an unreachable database on every call.
#[derive(Default)]
pub struct MockProfileRepo {
    pub profiles: Mutex<HashMap<Uuid, Profile>>,
    pub fail: bool,
}

impl MockProfileRepo {
    pub fn with_profiles(profiles: impl IntoIterator<Item = Profile>) -> Self {
        Self {
            profiles: Mutex::new(profiles.into_iter().map(|p| (p.id, p)).collect()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn check(&self) -> Result<(), sqlx::Error> {
        if self.fail {
            Err(sqlx::Error::PoolTimedOut)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Repository for MockProfileRepo {
    async fn get_role(&self, id: Uuid) -> Result<Option<Role>, sqlx::Error> {
        self.check()?;
        Ok(self.profiles.lock().unwrap().get(&id).map(|p| p.role))
    }

    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, sqlx::Error> {
        self.check()?;
        Ok(self.profiles.lock().unwrap().get(&id).cloned())
    }

    async fn create_profile(
        &self,
        id: Uuid,
        email: &str,
        full_name: Option<&str>,
    ) -> Result<Profile, sqlx::Error> {
        self.check()?;
        let mut profiles = self.profiles.lock().unwrap();
        let profile = profiles.entry(id).or_insert_with(|| Profile {
            id,
            email: email.to_string(),
            role: Role::User,
            full_name: full_name.map(String::from),
            avatar_url: None,
            created_at: Utc::now(),
        });
        Ok(profile.clone())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        req: UpdateProfileRequest,
    ) -> Result<Option<Profile>, sqlx::Error> {
        self.check()?;
        let mut profiles = self.profiles.lock().unwrap();
        Ok(profiles.get_mut(&id).map(|p| {
            if let Some(name) = req.full_name {
                p.full_name = Some(name);
            }
            if let Some(url) = req.avatar_url {
                p.avatar_url = Some(url);
            }
            p.clone()
        }))
    }

    async fn list_profiles(&self) -> Result<Vec<Profile>, sqlx::Error> {
        self.check()?;
        Ok(self.profiles.lock().unwrap().values().cloned().collect())
    }

    async fn set_role(&self, id: Uuid, role: Role) -> Result<Option<Profile>, sqlx::Error> {
        self.check()?;
        let mut profiles = self.profiles.lock().unwrap();
        Ok(profiles.get_mut(&id).map(|p| {
            p.role = role;
            p.clone()
        }))
    }
}

// --- Fixtures ---

pub const USER_ID: Uuid = Uuid::from_u128(1);
pub const MODERATOR_ID: Uuid = Uuid::from_u128(2);
pub const ADMIN_ID: Uuid = Uuid::from_u128(3);

pub fn identity(id: Uuid) -> Identity {
    Identity {
        id,
        email: format!("{}@example.com", id.simple()),
        verified_at: Some(Utc::now()),
    }
}

pub fn profile(id: Uuid, role: Role) -> Profile {
    Profile {
        id,
        email: format!("{}@example.com", id.simple()),
        role,
        full_name: None,
        avatar_url: None,
        created_at: Utc::now(),
    }
}

/// One profile per role.
pub fn seeded_repo() -> MockProfileRepo {
    MockProfileRepo::with_profiles([
        profile(USER_ID, Role::User),
        profile(MODERATOR_ID, Role::Moderator),
        profile(ADMIN_ID, Role::Admin),
    ])
}

pub fn test_state(sessions: MockSessionProvider, repo: MockProfileRepo) -> (AppState, Arc<MockProfileRepo>) {
    let repo = Arc::new(repo);
    let state = AppState::new(
        repo.clone() as RepositoryState,
        Arc::new(sessions) as SessionState,
        AppConfig::default(),
    );
    (state, repo)
}

pub fn test_app(sessions: MockSessionProvider, repo: MockProfileRepo) -> (Router, Arc<MockProfileRepo>) {
    let (state, repo) = test_state(sessions, repo);
    (create_router(state), repo)
}

// --- Request / Response Helpers ---

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub fn location(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get(header::LOCATION)
        .map(|v| v.to_str().unwrap().to_string())
}

/// The decoded value of `name` in the `Location` header's query string.
pub fn location_param(response: &Response<Body>, name: &str) -> Option<String> {
    let location = location(response)?;
    let (_, query) = location.split_once('?')?;
    form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

pub fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
