//! aria2 JSON-RPC client.
//!
//! Only the three calls the tracker needs are implemented: `aria2.addUri`,
//! `aria2.tellStatus` and `aria2.getUris`. Numeric fields arrive as decimal strings.

use crate::config::ResolvedAria2;
use crate::error::{Error, Result, RpcError};
use crate::types::{MissionId, MissionStatus};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use url::Url;

/// Operations the mission tracker needs from a download backend
#[async_trait]
pub trait DownloadBackend: Send + Sync {
    /// Ask the backend to start fetching `uri`; returns the new mission handle
    async fn add_uri(&self, uri: &str) -> Result<MissionId>;

    /// Current status of a mission
    async fn tell_status(&self, id: &MissionId) -> Result<BackendStatus>;

    /// Source URIs of a mission, in backend order
    async fn get_uris(&self, id: &MissionId) -> Result<Vec<String>>;
}

/// Reply of `aria2.tellStatus`
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStatus {
    /// Backend status string
    pub status: MissionStatus,
    /// Total size in bytes (0 while unknown)
    #[serde(default, deserialize_with = "u64_from_str")]
    pub total_length: u64,
    /// Downloaded bytes
    #[serde(default, deserialize_with = "u64_from_str")]
    pub completed_length: u64,
    /// Missions spawned from this one (torrent metadata → payload)
    #[serde(default)]
    pub followed_by: Vec<MissionId>,
    /// Torrent info hash, present for BitTorrent missions
    #[serde(default)]
    pub info_hash: Option<String>,
    /// Torrent metadata, present once known
    #[serde(default)]
    pub bittorrent: Option<BitTorrentMeta>,
}

impl BackendStatus {
    /// Name embedded in the torrent metadata, if the backend knows it
    pub fn torrent_name(&self) -> Option<&str> {
        self.info_hash.as_ref()?;
        self.bittorrent
            .as_ref()
            .and_then(|bt| bt.info.as_ref())
            .map(|info| info.name.as_str())
            .filter(|name| !name.is_empty())
    }
}

/// `bittorrent` object of a `tellStatus` reply
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct BitTorrentMeta {
    /// Info dictionary (absent while a magnet link is still resolving)
    #[serde(default)]
    pub info: Option<TorrentInfo>,
}

/// `bittorrent.info` object of a `tellStatus` reply
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct TorrentInfo {
    /// Torrent name
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct UriEntry {
    uri: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcError>,
}

fn u64_from_str<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if raw.is_empty() {
        return Ok(0);
    }
    raw.parse().map_err(serde::de::Error::custom)
}

/// HTTP JSON-RPC client for an aria2 daemon
///
/// One `reqwest::Client` (and so one connection pool) is shared by every call.
pub struct Aria2Client {
    http: reqwest::Client,
    endpoint: Url,
    secret: String,
    timeout: Duration,
    next_id: AtomicU64,
}

impl Aria2Client {
    /// Build a client for the resolved endpoint
    pub fn new(config: &ResolvedAria2) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.rpc_timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: config.rpc_url.clone(),
            secret: config.rpc_secret.clone(),
            timeout: config.rpc_timeout,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        let mut all_params = Vec::with_capacity(params.len() + 1);
        if !self.secret.is_empty() {
            all_params.push(Value::String(format!("token:{}", self.secret)));
        }
        all_params.extend(params);

        let body = json!({
            "jsonrpc": "2.0",
            "id": format!("relay-dl-{}", self.next_id.fetch_add(1, Ordering::Relaxed)),
            "method": method,
            "params": all_params,
        });

        let exchange = async {
            // aria2 reports RPC errors with a 4xx status and an error object, so the
            // body is decoded regardless of status
            let response = self.http.post(self.endpoint.clone()).json(&body).send().await?;
            response.json::<RpcResponse<T>>().await
        };

        let reply = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| Error::Timeout {
                operation: method.to_string(),
                after: self.timeout,
            })??;

        if let Some(error) = reply.error {
            return Err(Error::Rpc(error));
        }
        reply
            .result
            .ok_or_else(|| Error::Other(format!("{method}: reply carried neither result nor error")))
    }
}

#[async_trait]
impl DownloadBackend for Aria2Client {
    async fn add_uri(&self, uri: &str) -> Result<MissionId> {
        self.call("aria2.addUri", vec![json!([uri])]).await
    }

    async fn tell_status(&self, id: &MissionId) -> Result<BackendStatus> {
        self.call(
            "aria2.tellStatus",
            vec![
                json!(id.as_str()),
                json!([
                    "status",
                    "totalLength",
                    "completedLength",
                    "followedBy",
                    "infoHash",
                    "bittorrent"
                ]),
            ],
        )
        .await
    }

    async fn get_uris(&self, id: &MissionId) -> Result<Vec<String>> {
        let entries: Vec<UriEntry> = self.call("aria2.getUris", vec![json!(id.as_str())]).await?;
        Ok(entries.into_iter().map(|e| e.uri).collect())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, secret: &str) -> Aria2Client {
        Aria2Client::new(&ResolvedAria2 {
            rpc_url: Url::parse(&format!("{}/jsonrpc", server.uri())).unwrap(),
            rpc_secret: secret.to_string(),
            poll_interval: Duration::from_secs(2),
            rpc_timeout: Duration::from_secs(1),
            notify_submit_failures: false,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn add_uri_sends_token_and_returns_gid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "aria2.addUri",
                "params": ["token:s3cret", ["http://ex.com/a.iso"]],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "relay-dl-1",
                "jsonrpc": "2.0",
                "result": "2089b05ecca3d829",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gid = client_for(&server, "s3cret")
            .add_uri("http://ex.com/a.iso")
            .await
            .unwrap();

        assert_eq!(gid, MissionId::new("2089b05ecca3d829"));
    }

    #[tokio::test]
    async fn empty_secret_omits_token_param() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "aria2.addUri",
                "params": [["http://ex.com/b.iso"]],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "relay-dl-1", "jsonrpc": "2.0", "result": "g2",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gid = client_for(&server, "").add_uri("http://ex.com/b.iso").await.unwrap();
        assert_eq!(gid.as_str(), "g2");
    }

    #[tokio::test]
    async fn rpc_error_object_becomes_rpc_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "id": "relay-dl-1",
                "jsonrpc": "2.0",
                "error": { "code": 1, "message": "Unauthorized" },
            })))
            .mount(&server)
            .await;

        let err = client_for(&server, "wrong").add_uri("http://ex.com/a.iso").await.unwrap_err();

        match err {
            Error::Rpc(e) => {
                assert_eq!(e.code, 1);
                assert_eq!(e.message, "Unauthorized");
            }
            other => panic!("expected Rpc error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tell_status_parses_string_lengths_and_torrent_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "aria2.tellStatus" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "relay-dl-1",
                "jsonrpc": "2.0",
                "result": {
                    "status": "active",
                    "totalLength": "1000",
                    "completedLength": "250",
                    "infoHash": "c9e15763f722f23e98a29decdfae341b98d53056",
                    "bittorrent": { "info": { "name": "debian-12.iso" } }
                },
            })))
            .mount(&server)
            .await;

        let status = client_for(&server, "")
            .tell_status(&MissionId::new("g1"))
            .await
            .unwrap();

        assert_eq!(status.status, MissionStatus::Active);
        assert_eq!(status.total_length, 1000);
        assert_eq!(status.completed_length, 250);
        assert!(status.followed_by.is_empty());
        assert_eq!(status.torrent_name(), Some("debian-12.iso"));
    }

    #[tokio::test]
    async fn get_uris_returns_uri_strings() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "aria2.getUris", "params": ["g1"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "relay-dl-1",
                "jsonrpc": "2.0",
                "result": [
                    { "uri": "http://ex.com/a.iso", "status": "used" },
                    { "uri": "http://mirror.ex.com/a.iso", "status": "waiting" }
                ],
            })))
            .mount(&server)
            .await;

        let uris = client_for(&server, "").get_uris(&MissionId::new("g1")).await.unwrap();
        assert_eq!(uris, vec!["http://ex.com/a.iso", "http://mirror.ex.com/a.iso"]);
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "id": "x", "jsonrpc": "2.0", "result": "g1" }))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let err = client_for(&server, "").add_uri("http://ex.com/a.iso").await.unwrap_err();
        assert!(
            matches!(err, Error::Timeout { .. } | Error::Network(_)),
            "expected a timeout, got {err:?}"
        );
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_network_error() {
        let config = ResolvedAria2 {
            rpc_url: Url::parse("http://127.0.0.1:9/jsonrpc").unwrap(),
            rpc_secret: String::new(),
            poll_interval: Duration::from_secs(2),
            rpc_timeout: Duration::from_secs(1),
            notify_submit_failures: false,
        };
        let err = Aria2Client::new(&config)
            .unwrap()
            .add_uri("http://ex.com/a.iso")
            .await
            .unwrap_err();

        assert!(
            matches!(err, Error::Network(_) | Error::Timeout { .. }),
            "got {err:?}"
        );
    }

    #[test]
    fn metadata_stage_without_info_has_no_torrent_name() {
        let status: BackendStatus = serde_json::from_value(json!({
            "status": "complete",
            "totalLength": "0",
            "completedLength": "0",
            "followedBy": ["g2", "g3"],
            "infoHash": "c9e15763f722f23e98a29decdfae341b98d53056",
            "bittorrent": {}
        }))
        .unwrap();

        assert_eq!(status.torrent_name(), None);
        assert_eq!(
            status.followed_by,
            vec![MissionId::new("g2"), MissionId::new("g3")]
        );
    }
}
