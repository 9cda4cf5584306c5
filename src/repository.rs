use crate::models::{Profile, ProfileRow, Role, UpdateProfileRequest, parse_stored_role};
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Repository Trait
///
/// Defines the abstract contract for the profile store. Handlers and the gatekeeper interact
/// with the data layer through this trait without knowing the concrete implementation
/// (Postgres, Mock, etc.).
///
/// Errors are returned rather than swallowed: the gatekeeper must be able to tell "no profile"
/// apart from "store unavailable".
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Authorization ---
    // Point lookup of the role column. Never cached across requests.
    async fn get_role(&self, id: Uuid) -> Result<Option<Role>, sqlx::Error>;

    // --- Profiles ---
    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, sqlx::Error>;
    // Idempotent: an existing row for the id is returned unchanged.
    async fn create_profile(
        &self,
        id: Uuid,
        email: &str,
        full_name: Option<&str>,
    ) -> Result<Profile, sqlx::Error>;
    async fn update_profile(
        &self,
        id: Uuid,
        req: UpdateProfileRequest,
    ) -> Result<Option<Profile>, sqlx::Error>;

    // --- Admin ---
    async fn list_profiles(&self) -> Result<Vec<Profile>, sqlx::Error>;
    async fn set_role(&self, id: Uuid, role: Role) -> Result<Option<Profile>, sqlx::Error>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by the `public.profiles` table.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const PROFILE_COLUMNS: &str = "id, email, role, full_name, avatar_url, created_at";

#[async_trait]
impl Repository for PostgresRepository {
    async fn get_role(&self, id: Uuid) -> Result<Option<Role>, sqlx::Error> {
        let role: Option<String> = sqlx::query_scalar("SELECT role FROM profiles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(role.map(|raw| parse_stored_role(id, &raw)))
    }

    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, sqlx::Error> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Profile::from))
    }

    /// create_profile
    ///
    /// Creates the mirroring profile record after the provider accepted a sign-up.
    /// New profiles always start with the least privileged role.
    async fn create_profile(
        &self,
        id: Uuid,
        email: &str,
        full_name: Option<&str>,
    ) -> Result<Profile, sqlx::Error> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "INSERT INTO profiles (id, email, role, full_name, created_at) \
             VALUES ($1, $2, $3, $4, NOW()) \
             ON CONFLICT (id) DO UPDATE SET id = EXCLUDED.id \
             RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(id)
        .bind(email)
        .bind(Role::User.as_str())
        .bind(full_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    /// update_profile
    ///
    /// Partial update: COALESCE keeps columns the caller did not send.
    async fn update_profile(
        &self,
        id: Uuid,
        req: UpdateProfileRequest,
    ) -> Result<Option<Profile>, sqlx::Error> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "UPDATE profiles SET \
             full_name = COALESCE($2, full_name), \
             avatar_url = COALESCE($3, avatar_url) \
             WHERE id = $1 RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(id)
        .bind(req.full_name)
        .bind(req.avatar_url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Profile::from))
    }

    async fn list_profiles(&self) -> Result<Vec<Profile>, sqlx::Error> {
        let rows = sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Profile::from).collect())
    }

    async fn set_role(&self, id: Uuid, role: Role) -> Result<Option<Profile>, sqlx::Error> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "UPDATE profiles SET role = $2 WHERE id = $1 RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(id)
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Profile::from))
    }
}
