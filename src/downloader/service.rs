//! The download service as seen by the bus.

use super::rpc::{Aria2Client, DownloadBackend};
use super::tracker::{Tracker, TrackerHandle};
use crate::bus::{ApiCommand, Message, MessageKind, Outbox, Service, StatusReport};
use crate::config::Aria2Config;
use crate::error::{Error, Result};
use crate::types::{Mission, MissionId, MissionSnapshot, Recipient};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Registry name of the download service
pub const SERVICE_NAME: &str = "aria2";

const LISTENING: &[MessageKind] = &[MessageKind::Enclosure, MessageKind::Api];

/// State that exists once [`Service::init`] succeeded
struct Ready {
    backend: Arc<dyn DownloadBackend>,
    tracker: TrackerHandle,
    outbox: Outbox,
    notify_submit_failures: bool,
}

/// Submits enclosures to aria2 and tracks the resulting missions
///
/// Listens for `enclosure` (submit the URL) and `api` (`status` replies with a
/// `status` message carrying the current snapshot).
pub struct DownloadService {
    config: Aria2Config,
    backend: Option<Arc<dyn DownloadBackend>>,
    outbox: Option<Outbox>,
    ready: Option<Ready>,
    tracker: Mutex<Option<Tracker>>,
}

impl DownloadService {
    /// A service that talks to the aria2 endpoint described by `config`
    pub fn new(config: Aria2Config) -> Self {
        Self {
            config,
            backend: None,
            outbox: None,
            ready: None,
            tracker: Mutex::new(None),
        }
    }

    /// A service that uses `backend` instead of building an aria2 client
    pub fn with_backend(config: Aria2Config, backend: Arc<dyn DownloadBackend>) -> Self {
        Self {
            backend: Some(backend),
            ..Self::new(config)
        }
    }

    fn ready(&self) -> Result<&Ready> {
        self.ready
            .as_ref()
            .ok_or_else(|| Error::Other(format!("{SERVICE_NAME} service used before init")))
    }

    /// Ask the backend to download `url` and start tracking the new mission
    ///
    /// On failure nothing is tracked. The requester is told only when
    /// `notify_submit_failures` is enabled; otherwise the failure is just logged.
    pub async fn submit(&self, url: &str, requester: Option<Recipient>) -> Result<MissionId> {
        let ready = self.ready()?;
        tracing::info!(url = %url, "submitting download");

        match ready.backend.add_uri(url).await {
            Ok(id) => {
                tracing::debug!(mission = %id, url = %url, "backend accepted download");
                ready
                    .tracker
                    .track(Mission::placeholder(id.clone(), requester))
                    .await?;
                Ok(id)
            }
            Err(e) => {
                tracing::error!(url = %url, error = %e, "failed to submit download");
                if ready.notify_submit_failures {
                    let text = format!("{url} could not be submitted: {e}");
                    if let Err(send_err) = ready.outbox.send(Message::notify_to(text, requester)).await {
                        tracing::error!(error = %send_err, "failed to publish submission failure");
                    }
                }
                Err(e)
            }
        }
    }

    /// Snapshot of every tracked mission
    pub async fn query(&self) -> Result<MissionSnapshot> {
        self.ready()?.tracker.snapshot().await
    }
}

#[async_trait]
impl Service for DownloadService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    fn listening_types(&self) -> &[MessageKind] {
        LISTENING
    }

    fn attach(&mut self, outbox: Outbox) {
        self.outbox = Some(outbox);
    }

    async fn init(&mut self) -> Result<()> {
        let resolved = self.config.resolve()?;
        let outbox = self
            .outbox
            .clone()
            .ok_or_else(|| Error::Other(format!("{SERVICE_NAME} service has no outbox")))?;

        let backend: Arc<dyn DownloadBackend> = match &self.backend {
            Some(backend) => backend.clone(),
            None => Arc::new(Aria2Client::new(&resolved)?),
        };

        let (tracker, handle) = Tracker::new(
            backend.clone(),
            outbox.clone(),
            resolved.poll_interval,
            resolved.rpc_timeout,
        );
        *self.tracker.get_mut() = Some(tracker);

        tracing::info!(endpoint = %resolved.rpc_url, "download service ready");
        self.ready = Some(Ready {
            backend,
            tracker: handle,
            outbox,
            notify_submit_failures: resolved.notify_submit_failures,
        });
        Ok(())
    }

    async fn serve(&self) {
        let Some(tracker) = self.tracker.lock().await.take() else {
            tracing::error!("mission tracker unavailable, was init skipped?");
            return;
        };
        tracker.run().await;
    }

    async fn handle(&self, message: Arc<Message>) {
        match message.as_ref() {
            Message::Enclosure(enclosure) => {
                if let Err(e) = self.submit(&enclosure.url, enclosure.requester).await {
                    tracing::debug!(url = %enclosure.url, error = %e, "enclosure dropped");
                }
            }
            Message::Api(request) => match request.command {
                ApiCommand::Status => {
                    let missions = match self.query().await {
                        Ok(missions) => missions,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to read mission snapshot");
                            return;
                        }
                    };
                    let reply = Message::Status(StatusReport {
                        missions,
                        target: request.requester,
                    });
                    if let Ok(ready) = self.ready()
                        && let Err(e) = ready.outbox.send(reply).await
                    {
                        tracing::error!(error = %e, "failed to publish status report");
                    }
                }
            },
            other => {
                tracing::debug!(kind = %other.kind(), "ignoring message");
            }
        }
    }
}
