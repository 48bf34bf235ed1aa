//! # relay-dl
//!
//! Message-bus core of a personal download agent.
//!
//! Triggers (chat front-ends, feed updates) ask for downloads, an aria2 daemon
//! executes them, and completion, failure and status are relayed back to whoever
//! asked. Everything is a [`Service`](bus::Service) plugged into a
//! [`ServiceRegistry`](bus::ServiceRegistry); services never call each other, they
//! only exchange [`Message`](bus::Message)s.
//!
//! ## Quick Start
//!
//! ```no_run
//! use relay_dl::bus::{Bus, ServiceRegistry};
//! use relay_dl::{Config, DownloadService, FeedService, NotifierService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("relay-dl.json").await?;
//!
//!     let mut registry = ServiceRegistry::new(&config.bus);
//!     registry.register(DownloadService::new(config.aria2.clone())).await?;
//!     registry.register(NotifierService::new(config.telegram.clone())).await?;
//!     registry.register(FeedService::new(config.feeds.clone())).await?;
//!
//!     relay_dl::run_until_signal(Bus::start(registry)).await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Service registry and message routing
pub mod bus;
/// Configuration types
pub mod config;
/// aria2 integration and mission tracking
pub mod downloader;
/// Error types
pub mod error;
/// Feed subscriptions and polling
pub mod feeds;
/// Chat notifications
pub mod notifier;
/// Retry logic with backoff
pub mod retry;
/// Core data types
pub mod types;

// Re-export commonly used types
pub use bus::{Bus, Message, MessageKind, RunningBus, Service, ServiceRegistry};
pub use config::Config;
pub use downloader::{Aria2Client, DownloadBackend, DownloadService};
pub use error::{Error, Result};
pub use feeds::FeedService;
pub use notifier::{DeliverySink, NotifierService, TelegramSink};
pub use types::{Mission, MissionId, MissionSnapshot, MissionStatus, Recipient};

/// Run a started bus until the process is asked to stop, then shut it down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_until_signal(bus: RunningBus) {
    wait_for_signal().await;
    bus.shutdown().await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Ok(mut only), Err(e)) | (Err(e), Ok(mut only)) => {
            tracing::warn!(error = %e, "Could not register every signal handler, waiting on the other one");
            only.recv().await;
            tracing::info!("Received termination signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
