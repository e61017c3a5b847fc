// src/repositories/messages.rs
use sqlx::PgPool;

use crate::models::chat::ChatMessage;

pub struct ChatMessageRepository {
    db_pool: PgPool,
}

impl ChatMessageRepository {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    pub async fn create(
        &self,
        chat_id: i64,
        role: &str,
        text: &str,
        itinerary_json: Option<&str>,
    ) -> Result<ChatMessage, sqlx::Error> {
        sqlx::query_as::<_, ChatMessage>(
            "INSERT INTO chat_messages (chat_id, role, text, itinerary_json, created_at)
             VALUES ($1, $2, $3, $4, NOW())
             RETURNING *",
        )
        .bind(chat_id)
        .bind(role)
        .bind(text)
        .bind(itinerary_json)
        .fetch_one(&self.db_pool)
        .await
    }

    /// Canonical conversation order: id ascending, equal to insertion order.
    pub async fn find_by_chat_asc(&self, chat_id: i64) -> Result<Vec<ChatMessage>, sqlx::Error> {
        sqlx::query_as::<_, ChatMessage>(
            "SELECT * FROM chat_messages WHERE chat_id = $1 ORDER BY id ASC",
        )
        .bind(chat_id)
        .fetch_all(&self.db_pool)
        .await
    }

    pub async fn update_text(&self, message_id: i64, text: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE chat_messages SET text = $1 WHERE id = $2")
            .bind(text)
            .bind(message_id)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    /// Drop everything that follows a message in the conversation.
    pub async fn delete_after(&self, chat_id: i64, message_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM chat_messages WHERE chat_id = $1 AND id > $2")
            .bind(chat_id)
            .bind(message_id)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }
}
