// src/models/session.rs
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Server-side revocable proof of authentication. The row id is the JWT
/// `jti`, so a token is only as good as its session record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuthSession {
    pub id: String,
    pub user_id: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub revoked_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl AuthSession {
    pub fn is_active(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.revoked_at.is_none() && now < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn session(expires_in: Duration) -> AuthSession {
        let now = Utc::now();
        AuthSession {
            id: "abc".to_string(),
            user_id: 1,
            created_at: now,
            expires_at: now + expires_in,
            revoked_at: None,
        }
    }

    #[test]
    fn active_until_expiry() {
        let s = session(Duration::hours(1));
        assert!(s.is_active(Utc::now()));
        assert!(!s.is_active(Utc::now() + Duration::hours(2)));
    }

    #[test]
    fn revoked_is_inactive() {
        let mut s = session(Duration::hours(1));
        s.revoked_at = Some(Utc::now());
        assert!(!s.is_active(Utc::now()));
    }
}
