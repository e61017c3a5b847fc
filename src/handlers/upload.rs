// src/handlers/upload.rs
use crate::error::ApiError;
use crate::handlers::chat::{assign_first_title, resolve_chat};
use crate::middleware::auth::AuthenticatedUser;
use crate::openai_client::DEFAULT_TITLE;
use crate::repositories::ChatMessageRepository;
use crate::utils::strip_code_fences;
use crate::AppState;
use axum::{
    extract::{multipart::Multipart, DefaultBodyLimit, Extension},
    response::Json,
    routing::post,
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

const MAX_FILE_BYTES: usize = 10 * 1024 * 1024; // 10MB

pub fn upload_routes() -> Router {
    Router::new()
        .route("/api/chat/upload-ticket", post(upload_ticket))
        .route("/api/chat/upload-accommodation", post(upload_accommodation))
        .route("/api/chat/upload-document", post(upload_document))
        // Slack above the per-file cap for multipart framing.
        .layer(DefaultBodyLimit::max(MAX_FILE_BYTES + 1024 * 1024))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DocumentKind {
    Ticket,
    Accommodation,
    Other,
}

impl DocumentKind {
    fn missing_file_error(&self) -> &'static str {
        match self {
            DocumentKind::Ticket => "A ticket file is required.",
            DocumentKind::Accommodation => "An accommodation invoice or booking file is required.",
            DocumentKind::Other => "A document file is required.",
        }
    }

    fn default_file_name(&self) -> &'static str {
        match self {
            DocumentKind::Ticket => "ticket",
            DocumentKind::Accommodation => "accommodation",
            DocumentKind::Other => "document",
        }
    }

    /// The exact marker texts recognized by `utils::is_upload_message`.
    fn upload_marker(&self, file_name: &str) -> String {
        match self {
            DocumentKind::Ticket => format!("Uploaded airplane ticket: {}", file_name),
            DocumentKind::Accommodation => {
                format!("Uploaded accommodation invoice: {}", file_name)
            }
            DocumentKind::Other => format!("Uploaded document: {}", file_name),
        }
    }

    fn upstream_error(&self) -> &'static str {
        match self {
            DocumentKind::Ticket => "Failed to process the ticket. Please try again.",
            DocumentKind::Accommodation => {
                "Failed to process the accommodation document. Please try again."
            }
            DocumentKind::Other => "Failed to process the document. Please try again.",
        }
    }
}

async fn upload_ticket(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    handle_upload(DocumentKind::Ticket, state, user, multipart).await
}

async fn upload_accommodation(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    handle_upload(DocumentKind::Accommodation, state, user, multipart).await
}

async fn upload_document(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    handle_upload(DocumentKind::Other, state, user, multipart).await
}

struct UploadedFile {
    file_name: Option<String>,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

async fn handle_upload(
    kind: DocumentKind,
    state: Arc<AppState>,
    user: AuthenticatedUser,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let (chat_id, file) = read_multipart(multipart).await?;

    let file = file.filter(|f| !f.bytes.is_empty()).ok_or_else(|| {
        ApiError::Validation(kind.missing_file_error().to_string())
    })?;

    let content_type = file.content_type.clone().unwrap_or_default();
    if !is_supported_content_type(&content_type) {
        return Err(ApiError::Validation(
            "Only PDF or image files are supported.".to_string(),
        ));
    }
    if file.bytes.len() > MAX_FILE_BYTES {
        return Err(ApiError::Validation(
            "File too large. Please upload files up to 10MB.".to_string(),
        ));
    }

    let (chat, is_new_chat) = resolve_chat(&state, user.0, chat_id).await?;

    let file_name = file
        .file_name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| kind.default_file_name().to_string());
    let user_message_text = kind.upload_marker(&file_name);

    let messages = ChatMessageRepository::new(state.db_pool.clone());
    let user_message = messages
        .create(chat.id, "user", &user_message_text, None)
        .await?;

    let history = messages.find_by_chat_asc(chat.id).await?;

    let analysis = match kind {
        DocumentKind::Ticket => {
            state
                .openai_client
                .analyze_ticket(&history, &file_name, &file.bytes, &content_type)
                .await
        }
        DocumentKind::Accommodation => {
            state
                .openai_client
                .analyze_accommodation(&history, &file_name, &file.bytes, &content_type)
                .await
        }
        DocumentKind::Other => {
            state
                .openai_client
                .analyze_other_document(&history, &file_name, &file.bytes, &content_type)
                .await
        }
    };
    let reply = analysis.map_err(|e| e.into_api(kind.upstream_error()))?;
    let cleaned_reply = strip_code_fences(&reply);

    let assistant_message = messages
        .create(chat.id, "assistant", &cleaned_reply, None)
        .await?;

    let title = if is_new_chat {
        assign_first_title(&state, chat.id, &user_message_text, &reply).await
    } else {
        chat.title.clone().unwrap_or_else(|| DEFAULT_TITLE.to_string())
    };

    Ok(Json(json!({
        "chatId": chat.id,
        "chatTitle": title,
        "messages": [user_message.to_dto(), assistant_message.to_dto()],
    })))
}

async fn read_multipart(
    mut multipart: Multipart,
) -> Result<(Option<i64>, Option<UploadedFile>), ApiError> {
    let mut chat_id = None;
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::Validation("Invalid multipart payload.".to_string()))?
    {
        match field.name() {
            Some("chatId") => {
                let value = field
                    .text()
                    .await
                    .map_err(|_| ApiError::Validation("Invalid chatId field.".to_string()))?;
                let value = value.trim().to_string();
                if !value.is_empty() {
                    let parsed = value.parse::<i64>().map_err(|_| {
                        ApiError::Validation("Invalid chatId field.".to_string())
                    })?;
                    chat_id = Some(parsed);
                }
            }
            Some("file") => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| ApiError::Validation("Failed to read uploaded file.".to_string()))?;
                file = Some(UploadedFile {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    Ok((chat_id, file))
}

fn is_supported_content_type(content_type: &str) -> bool {
    content_type.starts_with("image/") || content_type.eq_ignore_ascii_case("application/pdf")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::is_upload_message;

    #[test]
    fn content_type_gate() {
        assert!(is_supported_content_type("image/png"));
        assert!(is_supported_content_type("image/jpeg"));
        assert!(is_supported_content_type("application/pdf"));
        assert!(is_supported_content_type("Application/PDF"));
        assert!(!is_supported_content_type("text/plain"));
        assert!(!is_supported_content_type(""));
    }

    #[test]
    fn markers_round_trip_through_detector() {
        for kind in [
            DocumentKind::Ticket,
            DocumentKind::Accommodation,
            DocumentKind::Other,
        ] {
            let marker = kind.upload_marker("file.pdf");
            assert!(is_upload_message(&marker), "marker not detected: {marker}");
        }
    }

    #[test]
    fn default_file_names() {
        assert_eq!(DocumentKind::Ticket.default_file_name(), "ticket");
        assert_eq!(
            DocumentKind::Accommodation.upload_marker("inv.pdf"),
            "Uploaded accommodation invoice: inv.pdf"
        );
    }
}
