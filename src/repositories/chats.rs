// src/repositories/chats.rs
use sqlx::PgPool;

use crate::models::chat::Chat;

pub struct ChatRepository {
    db_pool: PgPool,
}

impl ChatRepository {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    pub async fn create(&self, user_id: i64) -> Result<Chat, sqlx::Error> {
        sqlx::query_as::<_, Chat>(
            "INSERT INTO chats (user_id, created_at) VALUES ($1, NOW()) RETURNING *",
        )
        .bind(user_id)
        .fetch_one(&self.db_pool)
        .await
    }

    /// Ownership check and lookup in one step; a chat id belonging to another
    /// user behaves exactly like a missing chat.
    pub async fn find_by_id_and_user(
        &self,
        chat_id: i64,
        user_id: i64,
    ) -> Result<Option<Chat>, sqlx::Error> {
        sqlx::query_as::<_, Chat>("SELECT * FROM chats WHERE id = $1 AND user_id = $2")
            .bind(chat_id)
            .bind(user_id)
            .fetch_optional(&self.db_pool)
            .await
    }

    pub async fn find_by_user_desc(&self, user_id: i64) -> Result<Vec<Chat>, sqlx::Error> {
        sqlx::query_as::<_, Chat>("SELECT * FROM chats WHERE user_id = $1 ORDER BY id DESC")
            .bind(user_id)
            .fetch_all(&self.db_pool)
            .await
    }

    pub async fn set_title(&self, chat_id: i64, title: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE chats SET title = $1 WHERE id = $2")
            .bind(title)
            .bind(chat_id)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    /// Delete a chat with its trip profile and messages as one atomic unit,
    /// so a partial cascade can never leave orphans behind.
    pub async fn delete_cascade(&self, chat_id: i64) -> Result<(), sqlx::Error> {
        let mut tx = self.db_pool.begin().await?;

        sqlx::query("DELETE FROM trip_profiles WHERE chat_id = $1")
            .bind(chat_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chat_messages WHERE chat_id = $1")
            .bind(chat_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chats WHERE id = $1")
            .bind(chat_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await
    }
}
