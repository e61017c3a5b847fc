// src/repositories/sessions.rs
use sqlx::PgPool;

use crate::models::session::AuthSession;

/// Session store: lookup-by-id, create, revoke. Injected into the identity
/// middleware and the auth handlers.
pub struct AuthSessionRepository {
    db_pool: PgPool,
}

impl AuthSessionRepository {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    pub async fn create(
        &self,
        id: &str,
        user_id: i64,
        expires_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<AuthSession, sqlx::Error> {
        sqlx::query_as::<_, AuthSession>(
            "INSERT INTO auth_sessions (id, user_id, created_at, expires_at)
             VALUES ($1, $2, NOW(), $3)
             RETURNING *",
        )
        .bind(id)
        .bind(user_id)
        .bind(expires_at)
        .fetch_one(&self.db_pool)
        .await
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<AuthSession>, sqlx::Error> {
        sqlx::query_as::<_, AuthSession>("SELECT * FROM auth_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await
    }

    pub async fn revoke(&self, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE auth_sessions SET revoked_at = NOW() WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(id)
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }
}
