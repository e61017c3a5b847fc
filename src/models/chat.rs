// src/models/chat.rs
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use crate::utils::strip_code_fences;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Chat {
    pub id: i64,
    pub user_id: i64,
    pub title: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatMessage {
    pub id: i64,
    pub chat_id: i64,
    pub role: String,
    pub text: String,
    pub itinerary_json: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl ChatMessage {
    pub fn is_user(&self) -> bool {
        self.role == "user"
    }

    /// Wire shape: `{id, role, content, timestamp, itinerary?}`.
    /// Assistant content always has code fences stripped.
    pub fn to_dto(&self) -> Value {
        let content = if self.role == "assistant" {
            strip_code_fences(&self.text)
        } else {
            self.text.clone()
        };
        let mut dto = serde_json::json!({
            "id": self.id,
            "role": self.role,
            "content": content,
            "timestamp": self.created_at.to_rfc3339(),
        });
        if let Some(itinerary) = self.itinerary_json.as_deref() {
            if !itinerary.trim().is_empty() {
                dto["itinerary"] = Value::String(itinerary.to_string());
            }
        }
        dto
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(rename = "chatId")]
    pub chat_id: Option<i64>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    #[serde(rename = "chatId")]
    pub chat_id: Option<i64>,
    #[serde(rename = "messageId")]
    pub message_id: Option<i64>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegenerateRequest {
    #[serde(rename = "chatId")]
    pub chat_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(role: &str, text: &str) -> ChatMessage {
        ChatMessage {
            id: 1,
            chat_id: 1,
            role: role.to_string(),
            text: text.to_string(),
            itinerary_json: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn assistant_dto_strips_fences() {
        let msg = message("assistant", "```html\n<p>hi</p>\n```");
        assert_eq!(msg.to_dto()["content"], "<p>hi</p>");
    }

    #[test]
    fn user_dto_keeps_text_verbatim() {
        let msg = message("user", "```not a fence for users```");
        assert_eq!(msg.to_dto()["content"], "```not a fence for users```");
    }

    #[test]
    fn dto_omits_blank_itinerary() {
        let mut msg = message("assistant", "<p>ok</p>");
        msg.itinerary_json = Some("  ".to_string());
        assert!(msg.to_dto().get("itinerary").is_none());

        msg.itinerary_json = Some("{\"days\":[]}".to_string());
        assert_eq!(msg.to_dto()["itinerary"], "{\"days\":[]}");
    }
}
