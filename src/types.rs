//! Core types for relay-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Backend-assigned handle of a download (the aria2 GID)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MissionId(pub String);

impl MissionId {
    /// Create a new MissionId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw handle
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MissionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identity of a chat that asked for something and should hear back about it
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Recipient(pub i64);

impl std::fmt::Display for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mission status as reported by the backend
///
/// Values aria2 does not document are kept verbatim in [`MissionStatus::Other`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MissionStatus {
    /// Downloading or seeding
    #[default]
    Active,
    /// Queued behind other downloads
    Waiting,
    /// Paused by the user
    Paused,
    /// Finished successfully
    Complete,
    /// Stopped because of an error
    Error,
    /// Removed by the user
    Removed,
    /// Any other backend-native value
    Other(String),
}

impl MissionStatus {
    /// The status string as aria2 spells it
    pub fn as_str(&self) -> &str {
        match self {
            MissionStatus::Active => "active",
            MissionStatus::Waiting => "waiting",
            MissionStatus::Paused => "paused",
            MissionStatus::Complete => "complete",
            MissionStatus::Error => "error",
            MissionStatus::Removed => "removed",
            MissionStatus::Other(s) => s,
        }
    }

    /// Terminal states are no longer polled
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MissionStatus::Complete | MissionStatus::Error | MissionStatus::Removed
        )
    }
}

impl From<&str> for MissionStatus {
    fn from(s: &str) -> Self {
        match s {
            "active" => MissionStatus::Active,
            "waiting" => MissionStatus::Waiting,
            "paused" => MissionStatus::Paused,
            "complete" => MissionStatus::Complete,
            "error" => MissionStatus::Error,
            "removed" => MissionStatus::Removed,
            other => MissionStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for MissionStatus {
    fn from(s: String) -> Self {
        MissionStatus::from(s.as_str())
    }
}

impl From<MissionStatus> for String {
    fn from(status: MissionStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked backend download
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    /// Backend handle
    pub id: MissionId,
    /// Display name (torrent name or last URI path segment; empty until first poll)
    pub name: String,
    /// Last status reported by the backend
    pub status: MissionStatus,
    /// Completed fraction in `[0.0, 1.0]`
    pub progress: f64,
    /// Missions spawned by this one once its metadata stage completes
    pub followed_by: Vec<MissionId>,
    /// Chat that requested the download
    pub requester: Option<Recipient>,
    /// When the mission started being tracked
    pub added_at: DateTime<Utc>,
}

impl Mission {
    /// A freshly submitted mission whose details are filled in by the next poll
    pub fn placeholder(id: MissionId, requester: Option<Recipient>) -> Self {
        Self {
            id,
            name: String::new(),
            status: MissionStatus::Active,
            progress: 0.0,
            followed_by: vec![],
            requester,
            added_at: Utc::now(),
        }
    }

    /// Progress as a percentage (0.0 to 100.0)
    pub fn percent(&self) -> f64 {
        self.progress * 100.0
    }

    /// Name for user-facing messages, falling back to the handle before the first poll
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            self.id.as_str()
        } else {
            &self.name
        }
    }
}

/// Read-only view of every tracked mission, ordered by handle
pub type MissionSnapshot = BTreeMap<MissionId, Mission>;

/// Identifier of a feed subscription
pub type SubscriptionId = u64;

/// A subscribed feed as shown to the user
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedInfo {
    /// Feed title (the URL when the feed could not be fetched)
    pub title: String,
    /// Feed URL
    pub url: String,
}
