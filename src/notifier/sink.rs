//! Chat delivery sinks.

use crate::bus::TextFormat;
use crate::config::DeliveryRetryConfig;
use crate::error::{Error, Result};
use crate::retry::with_retry;
use crate::types::Recipient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeout of a single `sendMessage` request
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// One rendered message addressed to one chat
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Destination chat
    pub chat: Recipient,
    /// Rendered body
    pub text: String,
    /// Body format
    pub format: TextFormat,
}

/// Something that can put a message in front of a human
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Make one delivery attempt
    async fn send(&self, message: &OutgoingMessage) -> Result<()>;
}

/// Deliver `message`, retrying transient failures with the configured fixed backoff
///
/// Returns the last error once attempts are exhausted; callers log it and move on.
pub async fn deliver_with_retry(
    sink: &dyn DeliverySink,
    retry: &DeliveryRetryConfig,
    message: &OutgoingMessage,
) -> Result<()> {
    with_retry(&retry.as_retry_config(), || sink.send(message)).await
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram Bot API `sendMessage` sink
pub struct TelegramSink {
    http: reqwest::Client,
    endpoint: String,
}

impl TelegramSink {
    /// Sink for the bot identified by `token` on the API at `api_base`
    pub fn new(api_base: &str, token: &str) -> Result<Self> {
        let base = url::Url::parse(api_base)
            .map_err(|e| Error::config("telegram.api_base", format!("invalid URL {api_base:?}: {e}")))?;
        let http = reqwest::Client::builder().timeout(SEND_TIMEOUT).build()?;
        Ok(Self {
            http,
            endpoint: format!(
                "{}/bot{}/sendMessage",
                base.as_str().trim_end_matches('/'),
                token
            ),
        })
    }
}

#[async_trait]
impl DeliverySink for TelegramSink {
    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        let body = SendMessageRequest {
            chat_id: message.chat.0,
            text: &message.text,
            parse_mode: match message.format {
                TextFormat::Markdown => Some("Markdown"),
                TextFormat::Plain => None,
            },
            disable_web_page_preview: true,
        };

        let response = self.http.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        match serde_json::from_str::<ApiReply>(&text) {
            Ok(reply) if status.is_success() && reply.ok => {
                tracing::debug!(chat = %message.chat, "message delivered");
                Ok(())
            }
            Ok(reply) => Err(Error::Delivery {
                status: reply.error_code.unwrap_or(status.as_u16()),
                message: reply
                    .description
                    .unwrap_or_else(|| "request rejected".to_string()),
            }),
            Err(_) => Err(Error::Delivery {
                status: status.as_u16(),
                message: text,
            }),
        }
    }
}
