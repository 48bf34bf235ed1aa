//! Messages carried by the bus.
//!
//! Each payload shape is its own variant, so a receiver matches on the variant
//! instead of downcasting an opaque value.

use crate::types::{FeedInfo, MissionSnapshot, Recipient, SubscriptionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Semantic category of a message, used for routing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Human-readable notification
    Notify,
    /// Snapshot of tracked downloads
    Status,
    /// List of feed subscriptions
    Feeds,
    /// URL to download
    Enclosure,
    /// Command addressed to a service
    Api,
    /// Subscription change or query
    Subscription,
}

impl MessageKind {
    /// The type tag as it appears in logs and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Notify => "notify",
            MessageKind::Status => "status",
            MessageKind::Feeds => "feeds",
            MessageKind::Enclosure => "enclosure",
            MessageKind::Api => "api",
            MessageKind::Subscription => "subscription",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A routed message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Message {
    /// Text for a human
    Notify(Notification),
    /// Current mission snapshot
    Status(StatusReport),
    /// Current feed subscriptions
    Feeds(FeedList),
    /// A resource to download
    Enclosure(Enclosure),
    /// A service command
    Api(ApiRequest),
    /// A subscription operation
    Subscription(SubscriptionRequest),
}

impl Message {
    /// Routing category of this message
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Notify(_) => MessageKind::Notify,
            Message::Status(_) => MessageKind::Status,
            Message::Feeds(_) => MessageKind::Feeds,
            Message::Enclosure(_) => MessageKind::Enclosure,
            Message::Api(_) => MessageKind::Api,
            Message::Subscription(_) => MessageKind::Subscription,
        }
    }

    /// Plain-text notification for everyone subscribed to broadcasts
    pub fn notify(text: impl Into<String>) -> Self {
        Message::Notify(Notification {
            text: text.into(),
            target: None,
            format: TextFormat::Plain,
        })
    }

    /// Plain-text notification for a specific chat (or everyone when `target` is None)
    pub fn notify_to(text: impl Into<String>, target: Option<Recipient>) -> Self {
        Message::Notify(Notification {
            text: text.into(),
            target,
            format: TextFormat::Plain,
        })
    }

    /// Download request for `url`
    pub fn enclosure(url: impl Into<String>, requester: Option<Recipient>) -> Self {
        Message::Enclosure(Enclosure {
            url: url.into(),
            requester,
        })
    }
}

/// How a notification body should be interpreted by the chat platform
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextFormat {
    /// Literal text
    #[default]
    Plain,
    /// Markdown links and emphasis
    Markdown,
}

/// Payload of [`Message::Notify`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Body text
    pub text: String,
    /// Chat to deliver to; None means every configured chat
    pub target: Option<Recipient>,
    /// Body format
    #[serde(default)]
    pub format: TextFormat,
}

/// Payload of [`Message::Status`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Every tracked mission
    pub missions: MissionSnapshot,
    /// Chat that asked for the status
    pub target: Option<Recipient>,
}

/// Payload of [`Message::Feeds`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedList {
    /// Subscriptions by id
    pub feeds: BTreeMap<SubscriptionId, FeedInfo>,
    /// Chat that asked for the list
    pub target: Option<Recipient>,
}

/// Payload of [`Message::Enclosure`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enclosure {
    /// URL (http, ftp, magnet, ...) handed to the backend
    pub url: String,
    /// Chat that asked for the download
    pub requester: Option<Recipient>,
}

/// Payload of [`Message::Api`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRequest {
    /// The command
    pub command: ApiCommand,
    /// Chat that issued the command
    pub requester: Option<Recipient>,
}

/// Commands understood by services on the `api` channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiCommand {
    /// Report every tracked mission
    Status,
}

impl std::str::FromStr for ApiCommand {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status" => Ok(ApiCommand::Status),
            other => Err(crate::error::Error::Other(format!(
                "unknown api command {other:?}"
            ))),
        }
    }
}

/// Payload of [`Message::Subscription`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// What to do
    pub op: SubscriptionOp,
    /// Feed URL (empty for [`SubscriptionOp::List`])
    pub url: String,
    /// Chat that issued the request
    pub requester: Option<Recipient>,
}

/// Subscription operations
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionOp {
    /// Start following a feed
    Subscribe,
    /// Stop following a feed
    Unsubscribe,
    /// Report every followed feed
    List,
}
