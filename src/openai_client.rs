// src/openai_client.rs
use backoff::{future::retry, ExponentialBackoff};
use base64::Engine;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::error::ApiError;
use crate::models::chat::ChatMessage;
use crate::models::trip_profile::TripProfile;
use crate::utils::strip_code_fences;

pub const DEFAULT_TITLE: &str = "New travel chat";
pub const EMPTY_REPLY_FALLBACK: &str = "The recommendation engine did not return any content.";

const PDF_TEXT_BUDGET: usize = 8000;
const TITLE_MAX_CHARS: usize = 60;

const CHAT_SYSTEM_PROMPT: &str = "You are a helpful travel recommendation assistant. \
    Provide useful and accurate travel advice based on the user's inputs and preferences. \
    Take in consideration the ticket, the accommodation, and other documents the user added. \
    If no relevant information is available, ask the user for more details. \
    Provide a structured itinerary section with day-by-day bullet points when possible, \
    and summarize constraints or missing info explicitly (use 'not provided' if needed). \
    Include a section titled <h2>Recommended locations</h2> with a bullet list of specific places \
    (include hotel/accommodation if provided). Each bullet should include a place name \
    plus city/country or address. If no locations are available, include a single bullet \
    with 'not provided'. \
    If not mentioned otherwise, sort the recommended locations by time and create a visiting schedule. \
    Answer concisely and structure your reply using HTML only (no Markdown). \
    Use semantic HTML elements like <p>, <ul>, <ol>, <li>, <h2>, and <strong> where appropriate. \
    Return only an HTML snippet without enclosing <html> or <body> tags.";

#[derive(Error, Debug)]
pub enum AiError {
    #[error("OpenAI API key is not configured.")]
    NotConfigured,
    #[error("{0}")]
    Upstream(String),
}

impl AiError {
    /// Map onto the HTTP taxonomy; the upstream message is generic and
    /// endpoint-specific, the not-configured message is fixed.
    pub fn into_api(self, upstream_message: &str) -> ApiError {
        match self {
            AiError::NotConfigured => {
                ApiError::NotConfigured("OpenAI API key is not configured on the server.")
            }
            AiError::Upstream(cause) => {
                tracing::warn!("OpenAI call failed: {}", cause);
                ApiError::Upstream(upstream_message.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiMessage {
    pub role: String,
    pub content: ApiContent,
}

impl ApiMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: ApiContent::Text(content.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ApiContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
    pub detail: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: Option<String>, base_url: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url,
            model,
        }
    }

    pub fn from_env() -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").ok();
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Self::new(api_key, base_url, model)
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn require_api_key(&self) -> Result<&str, AiError> {
        self.api_key.as_deref().ok_or(AiError::NotConfigured)
    }

    /// Full completion over the ordered history, personalized by the trip
    /// profile when one exists.
    pub async fn chat(
        &self,
        history: &[ChatMessage],
        profile: Option<&TripProfile>,
    ) -> Result<String, AiError> {
        self.require_api_key()?;

        let mut messages = base_messages(profile);
        append_history(&mut messages, history);

        let content = self.execute_chat(messages).await?;
        Ok(content.unwrap_or_else(|| EMPTY_REPLY_FALLBACK.to_string()))
    }

    /// Streaming completion: `on_delta` is invoked once per upstream text
    /// chunk, and the assembled reply is returned at the end.
    pub async fn stream_chat(
        &self,
        history: &[ChatMessage],
        profile: Option<&TripProfile>,
        mut on_delta: impl FnMut(&str),
    ) -> Result<String, AiError> {
        let api_key = self.require_api_key()?;

        let mut messages = base_messages(profile);
        append_history(&mut messages, history);

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            stream: Some(true),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .timeout(Duration::from_secs(120))
            .json(&request)
            .send()
            .await
            .map_err(|e| AiError::Upstream(format!("request error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Upstream(format!(
                "OpenAI API returned status {}: {}",
                status, body
            )));
        }

        let mut body = response.bytes_stream();
        let mut buffer = String::new();
        let mut full_text = String::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| AiError::Upstream(format!("stream read error: {}", e)))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim_end_matches('\r').to_string();
                buffer.drain(..=pos);

                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data.is_empty() {
                    continue;
                }
                if data == "[DONE]" {
                    return Ok(full_text);
                }
                match serde_json::from_str::<StreamChunk>(data) {
                    Ok(parsed) => {
                        if let Some(content) = parsed
                            .choices
                            .first()
                            .and_then(|c| c.delta.content.as_deref())
                        {
                            if !content.is_empty() {
                                full_text.push_str(content);
                                on_delta(content);
                            }
                        }
                    }
                    Err(e) => tracing::debug!("Skipping unparsable stream chunk: {}", e),
                }
            }
        }

        Ok(full_text)
    }

    /// Short descriptive chat title from the opening exchange. Callers fall
    /// back to `DEFAULT_TITLE` on any error.
    pub async fn generate_title(
        &self,
        first_user_message: &str,
        assistant_reply: &str,
    ) -> Result<String, AiError> {
        self.require_api_key()?;

        let mut prompt = format!("First user message: {}", first_user_message);
        if !assistant_reply.trim().is_empty() {
            prompt.push_str(&format!("\nAssistant reply: {}", assistant_reply));
        }

        let messages = vec![
            ApiMessage::text(
                "system",
                "You generate very short, descriptive titles for travel planning chats. \
                 Respond with ONLY the title, no quotes, maximum 60 characters.",
            ),
            ApiMessage::text("user", prompt),
        ];

        let content = self.execute_chat(messages).await?;
        Ok(normalize_title(content.as_deref().unwrap_or("")))
    }

    /// Strict-JSON itinerary extraction from a completed reply. Every failure
    /// mode (missing key, upstream error, malformed JSON, empty itinerary)
    /// is silently `None`.
    pub async fn extract_itinerary_json(&self, assistant_response: &str) -> Option<String> {
        if assistant_response.trim().is_empty() || !self.is_configured() {
            return None;
        }

        let messages = vec![
            ApiMessage::text(
                "system",
                "Extract itinerary days from the assistant response. \
                 Return ONLY strict JSON in this shape: \
                 {\"days\":[{\"dayLabel\":\"Day 1 (25 November 2025)\",\"date\":\"25 November 2025\",\
                 \"items\":[\"Arrive in London\",\"Visit the Tower of London\"]}]} \
                 If no itinerary exists, return {\"days\":[]}.",
            ),
            ApiMessage::text(
                "user",
                format!("Assistant response:\n{}", assistant_response),
            ),
        ];

        match self.execute_chat(messages).await {
            Ok(Some(content)) => parse_itinerary_content(&content),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Itinerary extraction failed: {}", e);
                None
            }
        }
    }

    pub async fn analyze_ticket(
        &self,
        history: &[ChatMessage],
        _file_name: &str,
        file_bytes: &[u8],
        content_type: &str,
    ) -> Result<String, AiError> {
        self.analyze_document(
            "You are a travel assistant that reads airline tickets, boarding passes, and flight confirmations. \
             Extract structured details: passenger name, airline, booking reference, flight number(s), \
             departure and arrival airport names and IATA codes, terminals/gates, dates, times, seat, baggage, \
             layovers, and notable rules. \
             Respond concisely using HTML only. Use short headings and bullet lists. \
             If a field is missing, state 'not provided' rather than guessing.",
            history,
            "Please analyze this uploaded airplane ticket/boarding pass and summarize the travel details and constraints in HTML."
                .to_string(),
            "Ticket PDF text (truncated):\n",
            file_bytes,
            content_type,
        )
        .await
    }

    pub async fn analyze_accommodation(
        &self,
        history: &[ChatMessage],
        _file_name: &str,
        file_bytes: &[u8],
        content_type: &str,
    ) -> Result<String, AiError> {
        self.analyze_document(
            "You are a travel assistant that reads accommodation invoices and booking confirmations. \
             Extract structured details: guest name, property name, address, booking/confirmation number, \
             check-in and check-out dates/times, number of guests, room type, nightly rate and currency, \
             total cost with taxes/fees, included meals (e.g., breakfast), cancellation policy, payment status, \
             contact details, and special notes or restrictions. \
             Respond concisely using HTML only. Use short headings and bullet lists. \
             When listing the details, use explicit labels like 'Property name:' and 'Address:'. \
             If a field is missing, state 'not provided' rather than guessing.",
            history,
            "Please analyze this uploaded accommodation invoice/booking confirmation and summarize the stay details and constraints in HTML."
                .to_string(),
            "Accommodation PDF text (truncated):\n",
            file_bytes,
            content_type,
        )
        .await
    }

    pub async fn analyze_other_document(
        &self,
        history: &[ChatMessage],
        file_name: &str,
        file_bytes: &[u8],
        content_type: &str,
    ) -> Result<String, AiError> {
        let safe_name = if file_name.trim().is_empty() {
            "document"
        } else {
            file_name
        };
        self.analyze_document(
            "You are a travel assistant that reads miscellaneous travel documents (itineraries, \
             insurance policies, visa confirmations, car rentals, activity bookings, mails, and receipts). \
             Extract structured details: document type, traveler names, booking/reference numbers, \
             dates/times, locations, costs and currency, policies or restrictions, and important notes. \
             Respond concisely using HTML only. Use short headings and bullet lists. \
             If a field is missing, state 'not provided' rather than guessing.",
            history,
            format!(
                "Please analyze this uploaded travel document and summarize the details and constraints in HTML. File name: {}.",
                safe_name
            ),
            "Document PDF text (truncated):\n",
            file_bytes,
            content_type,
        )
        .await
    }

    async fn analyze_document(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        intro_text: String,
        pdf_prefix: &str,
        file_bytes: &[u8],
        content_type: &str,
    ) -> Result<String, AiError> {
        self.require_api_key()?;

        let mut messages = vec![ApiMessage::text("system", system_prompt)];
        append_history(&mut messages, history);

        let mut blocks = vec![ContentBlock::Text { text: intro_text }];
        if content_type.starts_with("image/") {
            let data_url = format!(
                "data:{};base64,{}",
                content_type,
                base64::engine::general_purpose::STANDARD.encode(file_bytes)
            );
            blocks.push(ContentBlock::ImageUrl {
                image_url: ImageUrl {
                    url: data_url,
                    detail: "high".to_string(),
                },
            });
        } else if content_type.eq_ignore_ascii_case("application/pdf") {
            blocks.push(ContentBlock::Text {
                text: extract_pdf_text(file_bytes, pdf_prefix),
            });
        } else {
            let fallback = base64::engine::general_purpose::STANDARD.encode(file_bytes);
            blocks.push(ContentBlock::Text {
                text: format!(
                    "Unknown file type ({}). Base64 payload:\n{}",
                    content_type, fallback
                ),
            });
        }
        messages.push(ApiMessage {
            role: "user".to_string(),
            content: ApiContent::Blocks(blocks),
        });

        let content = self.execute_chat(messages).await?;
        Ok(content.unwrap_or_else(|| "The document could not be interpreted.".to_string()))
    }

    /// One non-streaming completion call, retrying transient transport and
    /// 429/5xx errors with exponential backoff.
    async fn execute_chat(&self, messages: Vec<ApiMessage>) -> Result<Option<String>, AiError> {
        let api_key = self.require_api_key()?.to_string();

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            stream: None,
        };

        let backoff_config = ExponentialBackoff {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(15),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(120)),
            ..Default::default()
        };

        let operation = || async {
            let response = self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&api_key)
                .timeout(Duration::from_secs(120))
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    if e.is_connect() || e.is_timeout() {
                        tracing::warn!("OpenAI API connection error (retrying): {}", e);
                        backoff::Error::transient(format!("connection error: {}", e))
                    } else {
                        backoff::Error::permanent(format!("request error: {}", e))
                    }
                })?;

            let status = response.status();
            let response_text = response
                .text()
                .await
                .map_err(|e| backoff::Error::permanent(format!("failed to read response: {}", e)))?;

            if status.as_u16() == 429 || status.is_server_error() {
                tracing::warn!("OpenAI API returned {} (retrying)", status);
                return Err(backoff::Error::transient(format!(
                    "OpenAI API returned status {}: {}",
                    status, response_text
                )));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(format!(
                    "OpenAI API returned status {}: {}",
                    status, response_text
                )));
            }

            serde_json::from_str::<ChatCompletionResponse>(&response_text).map_err(|e| {
                backoff::Error::permanent(format!("failed to parse response: {}", e))
            })
        };

        let response = retry(backoff_config, operation)
            .await
            .map_err(AiError::Upstream)?;

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content))
    }
}

fn base_messages(profile: Option<&TripProfile>) -> Vec<ApiMessage> {
    let mut messages = vec![ApiMessage::text("system", CHAT_SYSTEM_PROMPT)];
    if let Some(context) = build_profile_context(profile) {
        messages.push(ApiMessage::text("system", context));
    }
    messages
}

fn append_history(messages: &mut Vec<ApiMessage>, history: &[ChatMessage]) {
    for message in history {
        messages.push(ApiMessage::text(&message.role, message.text.as_str()));
    }
}

/// One-paragraph summary of the profile's non-null fields, or `None` when
/// there is nothing to say.
pub(crate) fn build_profile_context(profile: Option<&TripProfile>) -> Option<String> {
    let profile = profile?;
    let fields = [
        ("Destination", profile.destination.as_deref()),
        ("Start date", profile.start_date.as_deref()),
        ("End date", profile.end_date.as_deref()),
        ("Budget", profile.budget.as_deref()),
        ("Travelers", profile.travelers.as_deref()),
        ("Interests", profile.interests.as_deref()),
        ("Constraints", profile.constraints.as_deref()),
    ];

    if fields.iter().all(|(_, value)| {
        value.map(str::trim).filter(|v| !v.is_empty()).is_none()
    }) {
        return None;
    }

    let mut context =
        String::from("Trip profile (user-provided). Use this to personalize recommendations.\n");
    for (label, value) in fields {
        if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
            context.push_str(&format!("{}: {}\n", label, value));
        }
    }
    context.push_str("If a field is missing, treat it as not provided and avoid guessing.");
    Some(context)
}

pub(crate) fn normalize_title(raw: &str) -> String {
    let title: String = raw.trim().chars().take(TITLE_MAX_CHARS).collect();
    let title = title.trim();
    if title.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        title.to_string()
    }
}

/// Validate the model's itinerary output: must parse as JSON with a
/// non-empty `days` array after unwrapping an optional ```json fence.
pub(crate) fn parse_itinerary_content(content: &str) -> Option<String> {
    let cleaned = strip_code_fences(content);
    if cleaned.trim().is_empty() {
        return None;
    }
    let parsed: serde_json::Value = serde_json::from_str(cleaned.trim()).ok()?;
    let days = parsed.get("days")?.as_array()?;
    if days.is_empty() {
        return None;
    }
    serde_json::to_string(&parsed).ok()
}

fn extract_pdf_text(bytes: &[u8], prefix: &str) -> String {
    if bytes.is_empty() {
        return "No PDF content provided.".to_string();
    }
    match pdf_extract::extract_text_from_mem(bytes) {
        Ok(text) => {
            let mut text = text.trim().to_string();
            if text.len() > PDF_TEXT_BUDGET {
                text = text
                    .char_indices()
                    .take_while(|(i, _)| *i < PDF_TEXT_BUDGET)
                    .map(|(_, c)| c)
                    .collect();
            }
            if text.is_empty() {
                "PDF text could not be extracted.".to_string()
            } else {
                format!("{}{}", prefix, text)
            }
        }
        Err(e) => {
            tracing::warn!("PDF text extraction failed: {}", e);
            "Unable to extract text from PDF. Please rely on the image or provide key details manually."
                .to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_with(destination: Option<&str>, budget: Option<&str>) -> TripProfile {
        TripProfile {
            id: 1,
            chat_id: 1,
            destination: destination.map(str::to_string),
            budget: budget.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn profile_context_lists_only_present_fields() {
        let profile = profile_with(Some("Rome"), None);
        let context = build_profile_context(Some(&profile)).expect("context");
        assert!(context.contains("Destination: Rome"));
        assert!(!context.contains("Budget:"));
    }

    #[test]
    fn empty_profile_yields_no_context() {
        let profile = profile_with(None, Some("   "));
        assert!(build_profile_context(Some(&profile)).is_none());
        assert!(build_profile_context(None).is_none());
    }

    #[test]
    fn title_is_trimmed_and_capped() {
        assert_eq!(normalize_title("  Rome in three days  "), "Rome in three days");
        let long = "x".repeat(100);
        assert_eq!(normalize_title(&long).chars().count(), 60);
        assert_eq!(normalize_title("   "), DEFAULT_TITLE);
    }

    #[test]
    fn itinerary_accepts_fenced_json() {
        let content = "```json\n{\"days\":[{\"dayLabel\":\"Day 1\",\"date\":\"x\",\"items\":[\"a\"]}]}\n```";
        let parsed = parse_itinerary_content(content).expect("itinerary");
        assert!(parsed.contains("Day 1"));
    }

    #[test]
    fn itinerary_rejects_empty_days_and_garbage() {
        assert!(parse_itinerary_content("{\"days\":[]}").is_none());
        assert!(parse_itinerary_content("not json at all").is_none());
        assert!(parse_itinerary_content("{\"other\":true}").is_none());
    }

    #[test]
    fn unconfigured_client_fails_closed() {
        let client = OpenAiClient::new(None, "http://unused".to_string(), "m".to_string());
        assert!(!client.is_configured());
        assert!(matches!(
            client.require_api_key(),
            Err(AiError::NotConfigured)
        ));

        let blank = OpenAiClient::new(
            Some("   ".to_string()),
            "http://unused".to_string(),
            "m".to_string(),
        );
        assert!(!blank.is_configured());
    }

    #[test]
    fn history_maps_roles_verbatim() {
        let history = vec![ChatMessage {
            id: 1,
            chat_id: 1,
            role: "assistant".to_string(),
            text: "<p>hello</p>".to_string(),
            itinerary_json: None,
            created_at: chrono::Utc::now(),
        }];
        let mut messages = Vec::new();
        append_history(&mut messages, &history);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "assistant");
    }
}
