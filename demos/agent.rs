//! Download agent example
//!
//! This example wires the three bundled services onto one bus:
//! - the aria2 download service (submits enclosures, tracks missions)
//! - the Telegram notifier (relays completions, failures and status)
//! - the feed service (turns new feed items into downloads)
//!
//! Usage: `cargo run --example agent -- relay-dl.json`
//!
//! A service that fails to initialise (for example the notifier without a bot
//! token) is left out; the others keep running.

use relay_dl::bus::{Bus, ServiceRegistry};
use relay_dl::{Config, DownloadService, FeedService, Message, NotifierService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging (optional)
    // Uncomment if you add tracing-subscriber to your dependencies:
    // tracing_subscriber::fmt::init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path).await?,
        None => {
            println!("No config file given, using defaults");
            Config::default()
        }
    };

    let mut registry = ServiceRegistry::new(&config.bus);

    if let Err(e) = registry
        .register(DownloadService::new(config.aria2.clone()))
        .await
    {
        println!("✗ download service disabled: {e}");
    }
    if let Err(e) = registry
        .register(NotifierService::new(config.telegram.clone()))
        .await
    {
        println!("✗ notifier disabled: {e}");
    }
    if let Err(e) = registry.register(FeedService::new(config.feeds.clone())).await {
        println!("✗ feed service disabled: {e}");
    }
    println!("✓ running services: {}", registry.names().join(", "));

    let bus = Bus::start(registry);

    // Anything passed after the config path is downloaded right away
    let publisher = bus.publisher();
    for url in std::env::args().skip(2) {
        println!("→ queueing {url}");
        publisher.send(Message::enclosure(url, None)).await?;
    }

    println!("Press Ctrl+C to stop");
    relay_dl::run_until_signal(bus).await;
    println!("Stopped");
    Ok(())
}
