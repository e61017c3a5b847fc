// src/repositories/profiles.rs
use sqlx::PgPool;

use crate::models::trip_profile::TripProfile;

pub struct TripProfileRepository {
    db_pool: PgPool,
}

impl TripProfileRepository {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    pub async fn find_by_chat(&self, chat_id: i64) -> Result<Option<TripProfile>, sqlx::Error> {
        sqlx::query_as::<_, TripProfile>("SELECT * FROM trip_profiles WHERE chat_id = $1")
            .bind(chat_id)
            .fetch_optional(&self.db_pool)
            .await
    }

    /// One profile per chat; writes replace the whole row. Field values are
    /// expected pre-normalized (trimmed, blank -> None).
    pub async fn upsert(&self, profile: &TripProfile) -> Result<TripProfile, sqlx::Error> {
        sqlx::query_as::<_, TripProfile>(
            "INSERT INTO trip_profiles
               (chat_id, destination, start_date, end_date, budget, travelers, interests, constraints)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (chat_id) DO UPDATE SET
               destination = EXCLUDED.destination,
               start_date = EXCLUDED.start_date,
               end_date = EXCLUDED.end_date,
               budget = EXCLUDED.budget,
               travelers = EXCLUDED.travelers,
               interests = EXCLUDED.interests,
               constraints = EXCLUDED.constraints
             RETURNING *",
        )
        .bind(profile.chat_id)
        .bind(profile.destination.as_deref())
        .bind(profile.start_date.as_deref())
        .bind(profile.end_date.as_deref())
        .bind(profile.budget.as_deref())
        .bind(profile.travelers.as_deref())
        .bind(profile.interests.as_deref())
        .bind(profile.constraints.as_deref())
        .fetch_one(&self.db_pool)
        .await
    }
}
