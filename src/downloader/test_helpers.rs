//! Scriptable in-memory download backend for tests.

use crate::downloader::{BackendStatus, BitTorrentMeta, DownloadBackend, TorrentInfo};
use crate::error::{Error, Result, RpcError};
use crate::types::{MissionId, MissionStatus};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use std::sync::Mutex;

/// Backend whose replies are set up by the test
#[derive(Default)]
pub(crate) struct FakeBackend {
    added: Mutex<Vec<String>>,
    next_ids: Mutex<VecDeque<Result<MissionId>>>,
    statuses: Mutex<HashMap<MissionId, BackendStatus>>,
    uris: Mutex<HashMap<MissionId, Vec<String>>>,
    status_calls: Mutex<usize>,
    stalled: Mutex<HashSet<MissionId>>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue the reply of the next `add_uri`
    pub(crate) fn accept_as(&self, id: &str) {
        self.next_ids
            .lock()
            .unwrap()
            .push_back(Ok(MissionId::new(id)));
    }

    /// Make the next `add_uri` fail with an RPC error
    pub(crate) fn reject_next(&self, message: &str) {
        self.next_ids
            .lock()
            .unwrap()
            .push_back(Err(Error::Rpc(RpcError {
                code: 1,
                message: message.to_string(),
            })));
    }

    /// Set what `tell_status` returns for `id`
    pub(crate) fn set_status(&self, id: &str, status: &str, completed: u64, total: u64) {
        self.set_full_status(
            id,
            BackendStatus {
                status: MissionStatus::from(status),
                completed_length: completed,
                total_length: total,
                ..Default::default()
            },
        );
    }

    /// Set a torrent status with metadata name and followers
    pub(crate) fn set_torrent(&self, id: &str, status: &str, name: &str, followed_by: &[&str]) {
        self.set_full_status(
            id,
            BackendStatus {
                status: MissionStatus::from(status),
                followed_by: followed_by.iter().map(|f| MissionId::new(*f)).collect(),
                info_hash: Some("abcdef".to_string()),
                bittorrent: Some(BitTorrentMeta {
                    info: Some(TorrentInfo {
                        name: name.to_string(),
                    }),
                }),
                ..Default::default()
            },
        );
    }

    pub(crate) fn set_full_status(&self, id: &str, status: BackendStatus) {
        self.stalled.lock().unwrap().remove(&MissionId::new(id));
        self.statuses
            .lock()
            .unwrap()
            .insert(MissionId::new(id), status);
    }

    /// Forget a mission so `tell_status` errors for it
    pub(crate) fn forget(&self, id: &str) {
        self.statuses.lock().unwrap().remove(&MissionId::new(id));
    }

    /// Make `tell_status` for `id` time out until the status is set again
    pub(crate) fn stall(&self, id: &str) {
        self.stalled.lock().unwrap().insert(MissionId::new(id));
    }

    pub(crate) fn set_uris(&self, id: &str, uris: &[&str]) {
        self.uris.lock().unwrap().insert(
            MissionId::new(id),
            uris.iter().map(|u| u.to_string()).collect(),
        );
    }

    /// URIs passed to `add_uri`, in call order
    pub(crate) fn added(&self) -> Vec<String> {
        self.added.lock().unwrap().clone()
    }

    pub(crate) fn status_calls(&self) -> usize {
        *self.status_calls.lock().unwrap()
    }
}

#[async_trait]
impl DownloadBackend for FakeBackend {
    async fn add_uri(&self, uri: &str) -> Result<MissionId> {
        self.added.lock().unwrap().push(uri.to_string());
        self.next_ids
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Other("no reply queued for add_uri".to_string())))
    }

    async fn tell_status(&self, id: &MissionId) -> Result<BackendStatus> {
        *self.status_calls.lock().unwrap() += 1;
        if self.stalled.lock().unwrap().contains(id) {
            return Err(Error::Timeout {
                operation: "aria2.tellStatus".to_string(),
                after: Duration::from_secs(5),
            });
        }
        self.statuses
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| {
                Error::Rpc(RpcError {
                    code: 1,
                    message: format!("GID {id} is not found"),
                })
            })
    }

    async fn get_uris(&self, id: &MissionId) -> Result<Vec<String>> {
        Ok(self.uris.lock().unwrap().get(id).cloned().unwrap_or_default())
    }
}
