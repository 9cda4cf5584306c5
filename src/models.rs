use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Identity & Authorization ---

/// Role
///
/// Authorization level attached to an identity, persisted as lowercase text in `profiles.role`.
/// Variant order is the privilege order: `User < Moderator < Admin`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS, ToSchema,
    Default,
)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    #[default]
    User,
    Moderator,
    Admin,
}

impl Role {
    /// has_role
    ///
    /// True when `actual` grants at least the privileges of `required`.
    pub fn has_role(required: Role, actual: Role) -> bool {
        actual >= required
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("unknown role `{0}`")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// Identity
///
/// The authenticated caller as resolved from a valid session. Ephemeral: recomputed on every
/// request and never persisted by this service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    // Set once the provider has confirmed the email address.
    pub verified_at: Option<DateTime<Utc>>,
}

/// Session
///
/// Token grant returned by the auth provider (sign-in, refresh, code exchange).
/// Owned by the provider: this service only forwards it into cookies.
#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    // Access token lifetime in seconds.
    pub expires_in: i64,
    pub user: ProviderUser,
}

/// ProviderUser
///
/// Minimal projection of the provider's user object.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_confirmed_at: Option<DateTime<Utc>>,
}

impl From<ProviderUser> for Identity {
    fn from(user: ProviderUser) -> Self {
        Identity {
            id: user.id,
            email: user.email.unwrap_or_default(),
            verified_at: user.email_confirmed_at,
        }
    }
}

// --- Persistence ---

/// Profile
///
/// A row of the `public.profiles` table. The primary key mirrors the provider's user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// ProfileRow
///
/// Raw database row. `role` is stored as text and parsed into `Role` on the way out.
#[derive(Debug, Clone, FromRow)]
pub struct ProfileRow {
    pub id: Uuid,
    pub email: String,
    pub role: String,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Parses a stored role, falling back to the least privileged role for unknown values.
pub fn parse_stored_role(id: Uuid, raw: &str) -> Role {
    raw.parse().unwrap_or_else(|e| {
        tracing::warn!(user_id = %id, "{e}, treating as user");
        Role::User
    })
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Profile {
            role: parse_stored_role(row.id, &row.role),
            id: row.id,
            email: row.email,
            full_name: row.full_name,
            avatar_url: row.avatar_url,
            created_at: row.created_at,
        }
    }
}

// --- Request Payloads ---

/// SignInRequest
///
/// Form body for the password sign-in endpoint (POST /login).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

/// SignUpRequest
///
/// Input payload for the public registration endpoint (POST /signup).
/// The password is only passed through to the auth provider and never persisted or logged here.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

/// UpdateProfileRequest
///
/// Partial update of the caller's own profile (PATCH /profile).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateProfileRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// SetRoleRequest
///
/// Admin payload for PUT /admin/users/{id}/role.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct SetRoleRequest {
    pub role: Role,
}

// --- Responses ---

/// UserProfile
///
/// Output schema for the signed-in user's view of themselves (GET /dashboard, GET /profile).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub email_verified: bool,
}

impl UserProfile {
    pub fn new(profile: Profile, identity: Option<&Identity>) -> Self {
        UserProfile {
            id: profile.id,
            email: profile.email,
            role: profile.role,
            full_name: profile.full_name,
            avatar_url: profile.avatar_url,
            email_verified: identity.is_some_and(|i| i.verified_at.is_some()),
        }
    }
}

/// LandingResponse
///
/// Body of the public landing route (GET /).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LandingResponse {
    pub signed_in: bool,
}

/// LoginForm
///
/// Describes the sign-in form the frontend renders at GET /login.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginForm {
    // Echoed back so the form can post it along with the credentials.
    pub redirect_to: Option<String>,
    pub error: Option<String>,
}
