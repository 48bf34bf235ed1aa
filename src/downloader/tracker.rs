//! Mission tracking and status polling.
//!
//! [`MissionBook`] holds the state machine; [`Tracker`] is the task that owns the
//! book and is the only code that ever touches it. Other tasks talk to the tracker
//! through a [`TrackerHandle`]: new missions and snapshot requests travel over a
//! channel, never by sharing the map.
//!
//! Per mission: `active → complete | error | removed`. A `complete` mission with
//! followers (torrent metadata stage) is replaced by one placeholder per follower
//! and never notifies the user itself.

use super::rpc::{BackendStatus, DownloadBackend};
use crate::bus::{Message, Outbox};
use crate::error::{Error, Result};
use crate::types::{Mission, MissionId, MissionSnapshot, MissionStatus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

/// Buffer size of the tracker command channel
const COMMAND_CHANNEL_BUFFER: usize = 64;

/// Fraction of `total` that `completed` represents; 0 when the total is unknown
pub fn progress(completed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (completed as f64 / total as f64).clamp(0.0, 1.0)
}

/// Last path segment of a source URI, used as the display name of plain downloads
pub fn name_from_uri(uri: &str) -> String {
    if let Ok(url) = url::Url::parse(uri)
        && let Some(segment) = url
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
    {
        return segment.to_string();
    }
    uri.rsplit('/').next().unwrap_or(uri).to_string()
}

/// What one poll learned about a mission
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Observation {
    /// Backend status
    pub status: MissionStatus,
    /// Downloaded bytes
    pub completed_length: u64,
    /// Total bytes (0 while unknown)
    pub total_length: u64,
    /// Follower missions
    pub followed_by: Vec<MissionId>,
    /// Name from torrent metadata
    pub torrent_name: Option<String>,
    /// First source URI
    pub first_uri: Option<String>,
}

impl Observation {
    /// Combine a `tellStatus` reply with the first source URI
    pub fn new(status: BackendStatus, first_uri: Option<String>) -> Self {
        Self {
            torrent_name: status.torrent_name().map(str::to_string),
            status: status.status,
            completed_length: status.completed_length,
            total_length: status.total_length,
            followed_by: status.followed_by,
            first_uri,
        }
    }
}

/// How a mission left the tracked set
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Finished; the user is told
    Completed(Mission),
    /// Failed; the user is told
    Failed(Mission),
    /// Removed by the user; nobody is told
    Removed(Mission),
    /// Metadata stage finished; its followers are now tracked instead
    Expanded {
        /// The finished metadata mission
        parent: Mission,
        /// Placeholders created for its followers
        followers: Vec<MissionId>,
    },
}

impl Outcome {
    /// The notification this outcome produces, if any
    pub fn notification(&self) -> Option<Message> {
        match self {
            Outcome::Completed(m) => Some(Message::notify_to(m.display_name(), m.requester)),
            Outcome::Failed(m) => Some(Message::notify_to(
                format!("{} download failed", m.display_name()),
                m.requester,
            )),
            Outcome::Removed(_) | Outcome::Expanded { .. } => None,
        }
    }
}

/// The set of tracked missions and its transition rules
#[derive(Debug, Default)]
pub struct MissionBook {
    missions: HashMap<MissionId, Mission>,
}

impl MissionBook {
    /// Create an empty book
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a mission (replacing any mission with the same handle)
    pub fn insert(&mut self, mission: Mission) {
        self.missions.insert(mission.id.clone(), mission);
    }

    /// Number of tracked missions
    pub fn len(&self) -> usize {
        self.missions.len()
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.missions.is_empty()
    }

    /// Look up a tracked mission
    pub fn get(&self, id: &MissionId) -> Option<&Mission> {
        self.missions.get(id)
    }

    /// Stop tracking a mission without a terminal transition
    pub fn forget(&mut self, id: &MissionId) -> Option<Mission> {
        self.missions.remove(id)
    }

    /// Handles of every tracked mission
    pub fn ids(&self) -> Vec<MissionId> {
        self.missions.keys().cloned().collect()
    }

    /// Copy of every tracked mission
    pub fn snapshot(&self) -> MissionSnapshot {
        self.missions
            .iter()
            .map(|(id, m)| (id.clone(), m.clone()))
            .collect()
    }

    /// Fold a poll result into the mission
    ///
    /// A zero total length only zeroes this mission's progress; the rest of the
    /// observation is still applied.
    pub fn apply(&mut self, id: &MissionId, observation: Observation) {
        let Some(mission) = self.missions.get_mut(id) else {
            return;
        };

        if let Some(name) = observation.torrent_name {
            mission.name = name;
        } else if let Some(uri) = observation.first_uri {
            let name = name_from_uri(&uri);
            if !name.is_empty() {
                mission.name = name;
            }
        }

        mission.status = observation.status;
        mission.followed_by = observation.followed_by;
        mission.progress = progress(observation.completed_length, observation.total_length);
    }

    /// Remove every mission in a terminal state and report what happened to it
    pub fn settle(&mut self) -> Vec<Outcome> {
        let finished: Vec<MissionId> = self
            .missions
            .iter()
            .filter(|(_, m)| m.status.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();

        let mut outcomes = Vec::with_capacity(finished.len());
        for id in finished {
            let Some(mission) = self.missions.remove(&id) else {
                continue;
            };

            let outcome = match mission.status {
                MissionStatus::Complete if !mission.followed_by.is_empty() => {
                    let followers = mission.followed_by.clone();
                    for follower in &followers {
                        self.insert(Mission::placeholder(follower.clone(), mission.requester));
                    }
                    Outcome::Expanded {
                        parent: mission,
                        followers,
                    }
                }
                MissionStatus::Complete => Outcome::Completed(mission),
                MissionStatus::Error => Outcome::Failed(mission),
                _ => Outcome::Removed(mission),
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}

/// Requests accepted by the tracker task
#[derive(Debug)]
enum Command {
    Track(Mission),
    Snapshot(oneshot::Sender<MissionSnapshot>),
}

/// Cloneable handle for talking to a running [`Tracker`]
#[derive(Clone, Debug)]
pub struct TrackerHandle {
    tx: mpsc::Sender<Command>,
}

impl TrackerHandle {
    /// Hand a newly submitted mission to the tracker
    pub async fn track(&self, mission: Mission) -> Result<()> {
        self.tx
            .send(Command::Track(mission))
            .await
            .map_err(|_| Error::Other("mission tracker stopped".to_string()))
    }

    /// Snapshot of every tracked mission
    pub async fn snapshot(&self) -> Result<MissionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot(reply))
            .await
            .map_err(|_| Error::Other("mission tracker stopped".to_string()))?;
        rx.await
            .map_err(|_| Error::Other("mission tracker dropped snapshot request".to_string()))
    }
}

/// Polling task that owns the [`MissionBook`]
pub struct Tracker {
    backend: Arc<dyn DownloadBackend>,
    outbox: Outbox,
    book: MissionBook,
    commands: mpsc::Receiver<Command>,
    poll_interval: Duration,
    observe_deadline: Duration,
}

impl Tracker {
    /// Create a tracker and the handle used to feed it
    ///
    /// `rpc_timeout` bounds each backend call; one observation makes up to two calls.
    pub fn new(
        backend: Arc<dyn DownloadBackend>,
        outbox: Outbox,
        poll_interval: Duration,
        rpc_timeout: Duration,
    ) -> (Self, TrackerHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        (
            Self {
                backend,
                outbox,
                book: MissionBook::new(),
                commands,
                poll_interval,
                observe_deadline: rpc_timeout * 2,
            },
            TrackerHandle { tx },
        )
    }

    /// Run until every [`TrackerHandle`] is dropped
    ///
    /// A tick that overruns the interval delays the next one instead of queueing
    /// extra ticks.
    pub async fn run(mut self) {
        let mut tick = tokio::time::interval(self.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval = ?self.poll_interval, "mission tracker started");

        loop {
            tokio::select! {
                _ = tick.tick() => self.poll_once().await,
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
            }
        }
        tracing::info!("mission tracker stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Track(mission) => {
                tracing::debug!(mission = %mission.id, "tracking new mission");
                self.book.insert(mission);
            }
            Command::Snapshot(reply) => {
                reply.send(self.book.snapshot()).ok();
            }
        }
    }

    /// Refresh every tracked mission, then apply the terminal-state policy
    pub async fn poll_once(&mut self) {
        if self.book.is_empty() {
            return;
        }

        let backend = self.backend.as_ref();
        let deadline = self.observe_deadline;
        let observations = futures::future::join_all(self.book.ids().into_iter().map(|id| async move {
            let result = match tokio::time::timeout(deadline, observe(backend, &id)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    operation: format!("status refresh of {id}"),
                    after: deadline,
                }),
            };
            (id, result)
        }))
        .await;

        let mut vanished = Vec::new();
        for (id, result) in observations {
            match result {
                Ok(observation) => self.book.apply(&id, observation),
                // the backend dropped the handle, so no end state will ever be seen
                Err(Error::Rpc(e)) if e.is_unknown_gid() => {
                    tracing::debug!(mission = %id, error = %e, "backend no longer knows mission");
                    vanished.extend(self.book.forget(&id));
                }
                Err(e) => {
                    tracing::warn!(mission = %id, error = %e, "failed to refresh mission status");
                }
            }
        }

        for mission in vanished {
            self.report(Outcome::Removed(mission)).await;
        }
        for outcome in self.book.settle() {
            self.report(outcome).await;
        }
    }

    async fn report(&self, outcome: Outcome) {
        match &outcome {
            Outcome::Completed(m) => {
                tracing::info!(mission = %m.id, name = %m.name, "download completed");
            }
            Outcome::Failed(m) => {
                tracing::warn!(mission = %m.id, name = %m.name, "download failed");
            }
            Outcome::Removed(m) => {
                tracing::info!(mission = %m.id, name = %m.name, "download removed");
            }
            Outcome::Expanded { parent, followers } => {
                tracing::info!(
                    mission = %parent.id,
                    name = %parent.name,
                    followers = followers.len(),
                    "metadata stage completed, tracking followers"
                );
            }
        }

        if let Some(message) = outcome.notification()
            && let Err(e) = self.outbox.send(message).await
        {
            tracing::error!(error = %e, "failed to publish mission notification");
        }
    }

    /// Read access to the book
    pub fn book(&self) -> &MissionBook {
        &self.book
    }

    /// Track a mission directly, bypassing the command channel
    pub fn track_now(&mut self, mission: Mission) {
        self.book.insert(mission);
    }
}

async fn observe(backend: &dyn DownloadBackend, id: &MissionId) -> Result<Observation> {
    let status = backend.tell_status(id).await?;

    let first_uri = if status.torrent_name().is_some() {
        None
    } else {
        match backend.get_uris(id).await {
            Ok(uris) => uris.into_iter().next(),
            Err(e) => {
                tracing::debug!(mission = %id, error = %e, "could not read source uris");
                None
            }
        }
    };

    Ok(Observation::new(status, first_uri))
}
