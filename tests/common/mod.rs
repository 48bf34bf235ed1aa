//! Common test utilities for relay-dl end-to-end tests

#![allow(dead_code)]

use relay_dl::config::{Aria2Config, Config, TelegramConfig};
use relay_dl::types::Recipient;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Scriptable stand-in for an aria2 daemon's JSON-RPC endpoint
///
/// `addUri` hands out queued gids, `tellStatus`/`getUris` answer from the
/// current script, which tests may change at any time.
#[derive(Clone, Default)]
pub struct Aria2Mock {
    state: Arc<Mutex<Aria2State>>,
}

#[derive(Default)]
struct Aria2State {
    gids: Vec<String>,
    added: Vec<String>,
    statuses: HashMap<String, Value>,
    uris: HashMap<String, Vec<String>>,
}

impl Aria2Mock {
    pub async fn start() -> (Self, MockServer) {
        let server = MockServer::start().await;
        let mock = Self::default();
        Mock::given(method("POST"))
            .and(path("/jsonrpc"))
            .respond_with(mock.clone())
            .mount(&server)
            .await;
        (mock, server)
    }

    pub fn next_gid(&self, gid: &str) {
        self.state.lock().unwrap().gids.push(gid.to_string());
    }

    pub fn set_status(&self, gid: &str, status: Value) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(gid.to_string(), status);
    }

    pub fn set_uris(&self, gid: &str, uris: &[&str]) {
        self.state
            .lock()
            .unwrap()
            .uris
            .insert(gid.to_string(), uris.iter().map(|u| u.to_string()).collect());
    }

    /// URIs submitted through `aria2.addUri`
    pub fn added(&self) -> Vec<String> {
        self.state.lock().unwrap().added.clone()
    }
}

fn rpc_error(id: &Value, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(400).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": 1, "message": message},
    }))
}

impl Respond for Aria2Mock {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let id = body["id"].clone();
        // params[0] is the "token:..." secret when one is configured
        let params: Vec<Value> = body["params"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|p| !p.as_str().is_some_and(|s| s.starts_with("token:")))
            .collect();

        let mut state = self.state.lock().unwrap();
        let result = match body["method"].as_str() {
            Some("aria2.addUri") => {
                let uri = params[0][0].as_str().unwrap_or_default().to_string();
                if state.gids.is_empty() {
                    return rpc_error(&id, "No URI to download.");
                }
                let gid = state.gids.remove(0);
                state.added.push(uri);
                json!(gid)
            }
            Some("aria2.tellStatus") => {
                let gid = params[0].as_str().unwrap_or_default();
                match state.statuses.get(gid) {
                    Some(status) => status.clone(),
                    None => return rpc_error(&id, &format!("GID {gid} is not found")),
                }
            }
            Some("aria2.getUris") => {
                let gid = params[0].as_str().unwrap_or_default();
                let uris = state.uris.get(gid).cloned().unwrap_or_default();
                json!(uris
                    .iter()
                    .map(|u| json!({"uri": u, "status": "used"}))
                    .collect::<Vec<_>>())
            }
            _ => return rpc_error(&id, "Method not found"),
        };

        ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        }))
    }
}

/// `tellStatus` reply of a plain HTTP download
pub fn http_status(status: &str, completed: u64, total: u64) -> Value {
    json!({
        "gid": "ignored",
        "status": status,
        "totalLength": total.to_string(),
        "completedLength": completed.to_string(),
    })
}

/// `tellStatus` reply of a BitTorrent download
pub fn torrent_status(status: &str, name: &str, followed_by: &[&str]) -> Value {
    json!({
        "gid": "ignored",
        "status": status,
        "totalLength": "0",
        "completedLength": "0",
        "followedBy": followed_by,
        "infoHash": "0123456789abcdef",
        "bittorrent": {"info": {"name": name}},
    })
}

/// Telegram Bot API stand-in that accepts every `sendMessage`
pub async fn start_telegram() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/botTOKEN/sendMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {}})))
        .mount(&server)
        .await;
    server
}

/// Every message the notifier delivered, as (chat, text)
pub async fn sent_messages(telegram: &MockServer) -> Vec<(i64, String)> {
    telegram
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter_map(|r| serde_json::from_slice::<Value>(&r.body).ok())
        .map(|body| {
            (
                body["chat_id"].as_i64().unwrap_or_default(),
                body["text"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

/// Configuration pointing every service at the given mocks, polling every second
pub fn config(aria2: &MockServer, telegram: &MockServer, chat_ids: &[i64]) -> Config {
    Config {
        aria2: Aria2Config {
            rpc_url: Some(format!("{}/jsonrpc", aria2.uri())),
            rpc_secret: Some("s3cret".to_string()),
            poll_interval: Duration::from_secs(1),
            rpc_timeout: Duration::from_secs(1),
            ..Default::default()
        },
        telegram: TelegramConfig {
            token: Some("TOKEN".to_string()),
            api_base: telegram.uri(),
            chat_ids: chat_ids.iter().map(|id| Recipient(*id)).collect(),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Re-evaluate `check` until it holds or `timeout` passes
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    check().await
}
