//! Chat notifier.
//!
//! Turns `notify`, `feeds` and `status` messages into chat messages. Every delivery
//! runs in its own task so a chat platform outage never holds up the bus worker.

pub mod render;
mod sink;


pub use sink::{DeliverySink, OutgoingMessage, TelegramSink, deliver_with_retry};

use crate::bus::{Message, MessageKind, Outbox, Service, TextFormat};
use crate::config::{DeliveryRetryConfig, TelegramConfig};
use crate::error::{Error, Result};
use crate::types::Recipient;
use async_trait::async_trait;
use std::sync::Arc;

/// Registry name of the notifier
pub const SERVICE_NAME: &str = "telegram";

const LISTENING: &[MessageKind] = &[MessageKind::Notify, MessageKind::Feeds, MessageKind::Status];

/// Notifier service backed by a [`DeliverySink`]
pub struct NotifierService {
    config: TelegramConfig,
    sink: Option<Arc<dyn DeliverySink>>,
}

impl NotifierService {
    /// A notifier that delivers through the Telegram Bot API
    pub fn new(config: TelegramConfig) -> Self {
        Self { config, sink: None }
    }

    /// A notifier that delivers through `sink` instead of Telegram
    pub fn with_sink(config: TelegramConfig, sink: Arc<dyn DeliverySink>) -> Self {
        Self {
            config,
            sink: Some(sink),
        }
    }

    /// Chats a message goes to: its own target, else every configured chat
    pub fn targets(&self, target: Option<Recipient>) -> Vec<Recipient> {
        match target {
            Some(chat) => vec![chat],
            None => self.config.chat_ids.clone(),
        }
    }

    /// Spawn one delivery task per target
    fn dispatch(&self, text: String, format: TextFormat, target: Option<Recipient>) {
        let Some(sink) = self.sink.clone() else {
            tracing::error!("notifier used before init, message dropped");
            return;
        };

        let targets = self.targets(target);
        if targets.is_empty() {
            tracing::debug!("no chat to deliver to, message dropped");
            return;
        }

        for chat in targets {
            let outgoing = OutgoingMessage {
                chat,
                text: text.clone(),
                format,
            };
            spawn_delivery(sink.clone(), self.config.retry.clone(), outgoing);
        }
    }
}

fn spawn_delivery(sink: Arc<dyn DeliverySink>, retry: DeliveryRetryConfig, outgoing: OutgoingMessage) {
    tokio::spawn(async move {
        if let Err(e) = deliver_with_retry(sink.as_ref(), &retry, &outgoing).await {
            tracing::error!(chat = %outgoing.chat, error = %e, "giving up on message delivery");
        }
    });
}

#[async_trait]
impl Service for NotifierService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    fn listening_types(&self) -> &[MessageKind] {
        LISTENING
    }

    // Nothing to publish: chat commands are parsed by the front-end, not here
    fn attach(&mut self, _outbox: Outbox) {}

    async fn init(&mut self) -> Result<()> {
        let token = self
            .config
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::config("telegram.token", "Telegram bot token not found"))?;

        if self.sink.is_none() {
            self.sink = Some(Arc::new(TelegramSink::new(&self.config.api_base, token)?));
        }
        if self.config.chat_ids.is_empty() {
            tracing::warn!("no default chat configured, only addressed messages will be delivered");
        }
        Ok(())
    }

    async fn handle(&self, message: Arc<Message>) {
        match message.as_ref() {
            Message::Notify(n) => self.dispatch(n.text.clone(), n.format, n.target),
            Message::Feeds(list) => {
                let (text, format) = render::feeds(&list.feeds);
                self.dispatch(text, format, list.target);
            }
            Message::Status(report) => {
                let (text, format) = render::status(&report.missions);
                self.dispatch(text, format, report.target);
            }
            other => {
                tracing::debug!(kind = %other.kind(), "ignoring message");
            }
        }
    }
}
