//! Bot-API style HTTP transport.

use crate::{SendOutcome, Transport, TransportError, TransportResult};
use async_trait::async_trait;
use relay_core::{MediaKind, TransportConfig};
use relay_database::OutboundMessage;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// API method for a payload type.
pub fn method_for(media_kind: MediaKind) -> &'static str {
    match media_kind {
        MediaKind::Text => "sendMessage",
        MediaKind::Photo => "sendPhoto",
        MediaKind::Video => "sendVideo",
        MediaKind::Document => "sendDocument",
        MediaKind::Audio => "sendAudio",
        MediaKind::Voice => "sendVoice",
        MediaKind::Animation => "sendAnimation",
        MediaKind::Sticker => "sendSticker",
    }
}

/// Request field carrying the file reference.
fn media_field(media_kind: MediaKind) -> Option<&'static str> {
    match media_kind {
        MediaKind::Text => None,
        MediaKind::Photo => Some("photo"),
        MediaKind::Video => Some("video"),
        MediaKind::Document => Some("document"),
        MediaKind::Audio => Some("audio"),
        MediaKind::Voice => Some("voice"),
        MediaKind::Animation => Some("animation"),
        MediaKind::Sticker => Some("sticker"),
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Sends messages with `POST {base}/bot{token}/{method}`.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    token: String,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Build a transport from configuration. A bot token is required.
    pub fn new(config: &TransportConfig) -> TransportResult<Self> {
        let token = config
            .bot_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(TransportError::MissingToken)?
            .to_string();
        let base_url = Url::parse(&config.api_base_url)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            self.token,
            method
        )
    }

    /// Deliver one message, surfacing the failure cause.
    pub async fn deliver(&self, message: &OutboundMessage) -> TransportResult<()> {
        let payload = build_payload(message)?;
        let method = method_for(message.media_kind);

        let response = self
            .client
            .post(self.endpoint(method))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let parsed: Option<ApiResponse> = serde_json::from_str(&body).ok();

        match parsed {
            Some(api) if status.is_success() && api.ok => {
                debug!(message_id = %message.id, method, "API accepted message");
                Ok(())
            }
            Some(api) => Err(TransportError::Api {
                status: status.as_u16(),
                description: api
                    .description
                    .unwrap_or_else(|| "request rejected".to_string()),
            }),
            None => Err(TransportError::Api {
                status: status.as_u16(),
                description: format!("unparseable response ({} bytes)", body.len()),
            }),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, message: &OutboundMessage) -> SendOutcome {
        match self.deliver(message).await {
            Ok(()) => SendOutcome::Delivered,
            Err(e) => SendOutcome::failed(e.to_string()),
        }
    }
}

/// JSON body for a message. Numeric chat ids are sent as numbers.
fn build_payload(message: &OutboundMessage) -> TransportResult<Value> {
    let mut body = Map::new();
    let chat_id = match message.chat_id.parse::<i64>() {
        Ok(numeric) => json!(numeric),
        Err(_) => json!(message.chat_id),
    };
    body.insert("chat_id".to_string(), chat_id);

    match media_field(message.media_kind) {
        None => {
            body.insert("text".to_string(), json!(message.content));
        }
        Some(field) => {
            let file_ref = message.file_ref.as_deref().ok_or_else(|| {
                TransportError::InvalidPayload(format!(
                    "{} message without file_ref",
                    message.media_kind
                ))
            })?;
            body.insert(field.to_string(), json!(file_ref));
            if message.media_kind != MediaKind::Sticker && !message.content.is_empty() {
                body.insert("caption".to_string(), json!(message.content));
            }
        }
    }

    Ok(Value::Object(body))
}
