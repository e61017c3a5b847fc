// src/handlers/chat.rs
use crate::error::ApiError;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::chat::{Chat, ChatMessage, ChatRequest, EditMessageRequest, RegenerateRequest};
use crate::openai_client::{AiError, DEFAULT_TITLE, EMPTY_REPLY_FALLBACK};
use crate::repositories::{ChatMessageRepository, ChatRepository, TripProfileRepository};
use crate::utils::{is_upload_message, strip_code_fences};
use crate::AppState;
use axum::{
    extract::{Extension, Path},
    response::sse::{Event, Sse},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

const UPSTREAM_CHAT_ERROR: &str = "Failed to contact the recommendation engine.";

pub fn chat_routes() -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/chat/stream", post(chat_stream))
        .route("/api/chat/edit-latest", post(edit_latest_message))
        .route("/api/chat/regenerate", post(regenerate_recommendation))
        .route("/api/chat/:id/messages", get(get_chat_messages))
        .route("/api/chat/:id", delete(delete_chat))
}

async fn chat(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<Value>, ApiError> {
    let user_text = required_message(payload.message.as_deref())?;
    let (chat, is_new_chat) = resolve_chat(&state, user.0, payload.chat_id).await?;

    let messages = ChatMessageRepository::new(state.db_pool.clone());
    let user_message = messages.create(chat.id, "user", &user_text, None).await?;

    let history = messages.find_by_chat_asc(chat.id).await?;
    let profile = TripProfileRepository::new(state.db_pool.clone())
        .find_by_chat(chat.id)
        .await?;

    let reply = state
        .openai_client
        .chat(&history, profile.as_ref())
        .await
        .map_err(|e| e.into_api(UPSTREAM_CHAT_ERROR))?;
    let reply = strip_code_fences(&reply);

    let itinerary = state.openai_client.extract_itinerary_json(&reply).await;
    let assistant_message = messages
        .create(chat.id, "assistant", &reply, itinerary.as_deref())
        .await?;

    let title = if is_new_chat {
        assign_first_title(&state, chat.id, &user_text, &reply).await
    } else {
        chat.title.clone().unwrap_or_else(|| DEFAULT_TITLE.to_string())
    };

    let user_dto = user_message.to_dto();
    let assistant_dto = assistant_message.to_dto();
    Ok(Json(json!({
        "chatId": chat.id,
        "chatTitle": title,
        "message": assistant_dto,
        "messages": [user_dto, assistant_dto],
    })))
}

async fn chat_stream(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let user_text = required_message(payload.message.as_deref())?;
    let (chat, is_new_chat) = resolve_chat(&state, user.0, payload.chat_id).await?;

    let messages = ChatMessageRepository::new(state.db_pool.clone());
    let user_message = messages.create(chat.id, "user", &user_text, None).await?;

    let (tx, rx) = mpsc::unbounded_channel::<Event>();

    // The user message is acknowledged before any model work starts; even if
    // the client disconnects right away it stays in the history.
    send_event(
        &tx,
        "meta",
        json!({
            "chatId": chat.id,
            "chatTitle": chat.title.clone(),
            "userMessage": user_message.to_dto(),
        }),
    );

    let task_state = state.clone();
    tokio::spawn(async move {
        stream_assistant_reply(task_state, chat, user_text, is_new_chat, tx).await;
    });

    let stream = UnboundedReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(Sse::new(stream))
}

/// Background half of the streaming path. Owns the channel sender; when it
/// returns, the sender drops and the event stream completes. Sends are
/// best-effort — a gone client never stops persistence.
async fn stream_assistant_reply(
    state: Arc<AppState>,
    chat: Chat,
    user_text: String,
    is_new_chat: bool,
    tx: mpsc::UnboundedSender<Event>,
) {
    let messages = ChatMessageRepository::new(state.db_pool.clone());
    let history = match messages.find_by_chat_asc(chat.id).await {
        Ok(history) => history,
        Err(e) => {
            tracing::error!("Failed to load history for chat {}: {}", chat.id, e);
            send_event(&tx, "error", json!({ "error": UPSTREAM_CHAT_ERROR }));
            return;
        }
    };
    let profile = TripProfileRepository::new(state.db_pool.clone())
        .find_by_chat(chat.id)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to load trip profile for chat {}: {}", chat.id, e);
            None
        });

    let mut used_streaming_fallback = false;
    let delta_tx = tx.clone();
    let streamed = state
        .openai_client
        .stream_chat(&history, profile.as_ref(), |chunk| {
            send_event(&delta_tx, "delta", json!({ "content": chunk }));
        })
        .await;

    let reply = match streamed {
        Ok(text) => strip_code_fences(&text),
        Err(AiError::NotConfigured) => {
            send_event(
                &tx,
                "error",
                json!({ "error": "OpenAI API key is not configured on the server." }),
            );
            return;
        }
        Err(AiError::Upstream(cause)) => {
            tracing::warn!("Streaming failed for chat {}: {}", chat.id, cause);
            send_event(
                &tx,
                "stream-warning",
                json!({
                    "warning": "Streaming unavailable, falling back to full response.",
                    "reason": cause,
                }),
            );
            used_streaming_fallback = true;
            match state.openai_client.chat(&history, profile.as_ref()).await {
                Ok(text) => strip_code_fences(&text),
                Err(AiError::NotConfigured) => {
                    send_event(
                        &tx,
                        "error",
                        json!({ "error": "OpenAI API key is not configured on the server." }),
                    );
                    return;
                }
                Err(AiError::Upstream(cause)) => {
                    tracing::warn!("Fallback completion failed for chat {}: {}", chat.id, cause);
                    send_event(&tx, "error", json!({ "error": UPSTREAM_CHAT_ERROR }));
                    return;
                }
            }
        }
    };

    let reply = if reply.trim().is_empty() {
        EMPTY_REPLY_FALLBACK.to_string()
    } else {
        reply
    };

    let itinerary = state.openai_client.extract_itinerary_json(&reply).await;
    let assistant_message = match messages
        .create(chat.id, "assistant", &reply, itinerary.as_deref())
        .await
    {
        Ok(message) => message,
        Err(e) => {
            tracing::error!("Failed to persist assistant reply for chat {}: {}", chat.id, e);
            send_event(&tx, "error", json!({ "error": UPSTREAM_CHAT_ERROR }));
            return;
        }
    };

    let title = if is_new_chat {
        assign_first_title(&state, chat.id, &user_text, &reply).await
    } else {
        chat.title.clone().unwrap_or_else(|| DEFAULT_TITLE.to_string())
    };

    let mut assistant_dto = assistant_message.to_dto();
    if used_streaming_fallback {
        assistant_dto["streamingFallback"] = Value::Bool(true);
    }
    send_event(
        &tx,
        "done",
        json!({
            "chatId": chat.id,
            "chatTitle": title,
            "message": assistant_dto,
        }),
    );
}

async fn edit_latest_message(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<EditMessageRequest>,
) -> Result<Json<Value>, ApiError> {
    let (Some(chat_id), Some(message_id)) = (payload.chat_id, payload.message_id) else {
        return Err(ApiError::Validation(
            "Chat and message IDs are required.".to_string(),
        ));
    };
    let new_text = payload.message.as_deref().unwrap_or("").trim().to_string();
    if new_text.is_empty() {
        return Err(ApiError::Validation(
            "Message content is required.".to_string(),
        ));
    }

    let chat = find_owned_chat(&state, chat_id, user.0).await?;

    let messages = ChatMessageRepository::new(state.db_pool.clone());
    let history = messages.find_by_chat_asc(chat.id).await?;
    let last_user = latest_user_message(&history).ok_or_else(|| {
        ApiError::Validation("No user message found to edit.".to_string())
    })?;
    if last_user.id != message_id {
        return Err(ApiError::Validation(
            "Only the latest user message can be edited.".to_string(),
        ));
    }
    if is_upload_message(&last_user.text) {
        return Err(ApiError::Validation(
            "Editing uploaded documents is not supported.".to_string(),
        ));
    }

    messages.update_text(last_user.id, &new_text).await?;
    messages.delete_after(chat.id, last_user.id).await?;

    regenerate_assistant_reply(&state, &chat).await?;

    let updated = messages.find_by_chat_asc(chat.id).await?;
    Ok(Json(json!({
        "chatId": chat.id,
        "messages": message_dtos(&updated),
    })))
}

async fn regenerate_recommendation(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<RegenerateRequest>,
) -> Result<Json<Value>, ApiError> {
    let chat_id = payload
        .chat_id
        .ok_or_else(|| ApiError::Validation("Chat ID is required.".to_string()))?;

    let chat = find_owned_chat(&state, chat_id, user.0).await?;

    let messages = ChatMessageRepository::new(state.db_pool.clone());
    let history = messages.find_by_chat_asc(chat.id).await?;
    let last_user = latest_user_message(&history).ok_or_else(|| {
        ApiError::Validation("No user message found to regenerate.".to_string())
    })?;
    if is_upload_message(&last_user.text) {
        return Err(ApiError::Validation(
            "Regeneration is not available for uploaded documents.".to_string(),
        ));
    }

    messages.delete_after(chat.id, last_user.id).await?;

    regenerate_assistant_reply(&state, &chat).await?;

    let updated = messages.find_by_chat_asc(chat.id).await?;
    Ok(Json(json!({
        "chatId": chat.id,
        "messages": message_dtos(&updated),
    })))
}

async fn get_chat_messages(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(chat_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let chat = find_owned_chat(&state, chat_id, user.0).await?;

    let messages = ChatMessageRepository::new(state.db_pool.clone())
        .find_by_chat_asc(chat.id)
        .await?;
    Ok(Json(json!({ "messages": message_dtos(&messages) })))
}

async fn delete_chat(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(chat_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let chat = find_owned_chat(&state, chat_id, user.0).await?;

    ChatRepository::new(state.db_pool.clone())
        .delete_cascade(chat.id)
        .await?;
    tracing::info!("Deleted chat {} for user {}", chat.id, user.0);
    Ok(Json(json!({ "success": true })))
}

/// Generate and append the assistant reply from the chat's current (already
/// truncated) history. Shared by edit and regenerate.
async fn regenerate_assistant_reply(state: &AppState, chat: &Chat) -> Result<(), ApiError> {
    let messages = ChatMessageRepository::new(state.db_pool.clone());
    let history = messages.find_by_chat_asc(chat.id).await?;
    let profile = TripProfileRepository::new(state.db_pool.clone())
        .find_by_chat(chat.id)
        .await?;

    let reply = state
        .openai_client
        .chat(&history, profile.as_ref())
        .await
        .map_err(|e| e.into_api("Failed to regenerate the recommendation."))?;
    let reply = strip_code_fences(&reply);

    let itinerary = state.openai_client.extract_itinerary_json(&reply).await;
    messages
        .create(chat.id, "assistant", &reply, itinerary.as_deref())
        .await?;
    Ok(())
}

/// Best-effort title for a chat's first exchange; never fails the caller.
pub(crate) async fn assign_first_title(
    state: &AppState,
    chat_id: i64,
    user_text: &str,
    reply: &str,
) -> String {
    let title = match state.openai_client.generate_title(user_text, reply).await {
        Ok(title) => title,
        Err(e) => {
            tracing::warn!("Title generation failed for chat {}: {}", chat_id, e);
            DEFAULT_TITLE.to_string()
        }
    };
    if let Err(e) = ChatRepository::new(state.db_pool.clone())
        .set_title(chat_id, &title)
        .await
    {
        tracing::warn!("Failed to store title for chat {}: {}", chat_id, e);
    }
    title
}

/// Missing `chatId` starts a fresh chat; a present one must belong to the
/// caller.
pub(crate) async fn resolve_chat(
    state: &AppState,
    user_id: i64,
    chat_id: Option<i64>,
) -> Result<(Chat, bool), ApiError> {
    let chats = ChatRepository::new(state.db_pool.clone());
    match chat_id {
        None => Ok((chats.create(user_id).await?, true)),
        Some(id) => {
            let chat = find_owned_chat(state, id, user_id).await?;
            Ok((chat, false))
        }
    }
}

async fn find_owned_chat(state: &AppState, chat_id: i64, user_id: i64) -> Result<Chat, ApiError> {
    ChatRepository::new(state.db_pool.clone())
        .find_by_id_and_user(chat_id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Chat not found.".to_string()))
}

fn required_message(message: Option<&str>) -> Result<String, ApiError> {
    let trimmed = message.unwrap_or("").trim();
    if trimmed.is_empty() {
        return Err(ApiError::Validation("Message is required.".to_string()));
    }
    Ok(trimmed.to_string())
}

fn latest_user_message(messages: &[ChatMessage]) -> Option<&ChatMessage> {
    messages.iter().rev().find(|m| m.is_user())
}

fn message_dtos(messages: &[ChatMessage]) -> Vec<Value> {
    messages.iter().map(ChatMessage::to_dto).collect()
}

fn send_event(tx: &mpsc::UnboundedSender<Event>, name: &str, payload: Value) {
    match Event::default().event(name).json_data(&payload) {
        // Send failures mean the client is gone; the task carries on.
        Ok(event) => {
            let _ = tx.send(event);
        }
        Err(e) => tracing::warn!("Failed to encode {} event: {}", name, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: i64, role: &str, text: &str) -> ChatMessage {
        ChatMessage {
            id,
            chat_id: 1,
            role: role.to_string(),
            text: text.to_string(),
            itinerary_json: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn required_message_trims_and_rejects_blank() {
        assert_eq!(required_message(Some("  hi  ")).expect("ok"), "hi");
        assert!(required_message(Some("   ")).is_err());
        assert!(required_message(None).is_err());
    }

    #[test]
    fn latest_user_message_skips_trailing_assistant() {
        let history = vec![
            message(1, "user", "u1"),
            message(2, "assistant", "a1"),
            message(3, "user", "u2"),
            message(4, "assistant", "a2"),
        ];
        assert_eq!(latest_user_message(&history).expect("found").id, 3);
    }

    #[test]
    fn latest_user_message_none_without_user_turns() {
        let history = vec![message(1, "assistant", "a1")];
        assert!(latest_user_message(&history).is_none());
        assert!(latest_user_message(&[]).is_none());
    }

    #[test]
    fn upload_marker_blocks_regenerate_target() {
        let history = vec![
            message(1, "user", "plan a trip"),
            message(2, "assistant", "a1"),
            message(3, "user", "Uploaded airplane ticket: ba.pdf"),
        ];
        let last = latest_user_message(&history).expect("found");
        assert!(is_upload_message(&last.text));
    }
}
