//! Download backend integration.
//!
//! - [`rpc`] - aria2 JSON-RPC client behind the [`DownloadBackend`] trait
//! - [`tracker`] - mission book and the polling task that owns it
//! - [`service`] - the bus service that submits enclosures and answers status requests

mod rpc;
mod service;
mod tracker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

pub use rpc::{Aria2Client, BackendStatus, BitTorrentMeta, DownloadBackend, TorrentInfo};
pub use service::{DownloadService, SERVICE_NAME};
pub use tracker::{
    MissionBook, Observation, Outcome, Tracker, TrackerHandle, name_from_uri, progress,
};
