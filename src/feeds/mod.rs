//! Feed subscriptions.
//!
//! The [`FeedService`] keeps an in-memory [`SubscriptionStore`] that is managed
//! through `subscription` messages, and polls every subscribed feed on a fixed
//! interval. Items that appear after a feed was first fetched are published as
//! `enclosure` messages on behalf of the subscriber.

mod parse;
mod store;


pub use parse::{FeedItem, ParsedFeed, parse};
pub use store::{NewItem, Subscription, SubscriptionStore};

use crate::bus::{FeedList, Message, MessageKind, Outbox, Service, SubscriptionOp};
use crate::config::{FeedConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::retry::with_retry;
use crate::types::{FeedInfo, Recipient, SubscriptionId};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;

/// Registry name of the feed service
pub const SERVICE_NAME: &str = "feeds";

const LISTENING: &[MessageKind] = &[MessageKind::Subscription];

/// HTTP fetcher for RSS and Atom documents
pub struct FeedFetcher {
    http: reqwest::Client,
    retry: RetryConfig,
}

impl FeedFetcher {
    /// Create a fetcher using the timeout and retry policy from `config`
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("relay-dl/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            retry: config.retry.clone(),
        })
    }

    /// Fetch and parse `url`, retrying transient failures
    pub async fn fetch(&self, url: &str) -> Result<ParsedFeed> {
        with_retry(&self.retry, || self.fetch_once(url)).await
    }

    /// Fetch and parse `url` with a single attempt
    pub async fn fetch_once(&self, url: &str) -> Result<ParsedFeed> {
        tracing::debug!(url = %url, "fetching feed");
        let response = self.http.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("{url} returned HTTP {}", status.as_u16());
            // only server-side trouble is worth another attempt
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                Error::Feed(message)
            } else {
                Error::Other(message)
            });
        }

        let content = response.text().await?;
        parse(&content)
    }
}

/// Subscription store plus feed poller
pub struct FeedService {
    config: FeedConfig,
    fetcher: Option<FeedFetcher>,
    outbox: Option<Outbox>,
    store: Mutex<SubscriptionStore>,
}

impl FeedService {
    /// Create a feed service with an empty store
    pub fn new(config: FeedConfig) -> Self {
        Self {
            config,
            fetcher: None,
            outbox: None,
            store: Mutex::new(SubscriptionStore::new()),
        }
    }

    fn parts(&self) -> Result<(&FeedFetcher, &Outbox)> {
        match (&self.fetcher, &self.outbox) {
            (Some(fetcher), Some(outbox)) => Ok((fetcher, outbox)),
            _ => Err(Error::Other(format!("{SERVICE_NAME} service used before init"))),
        }
    }

    /// Current subscriptions of `subscriber` (all of them for `None`)
    pub async fn subscriptions(&self, subscriber: Option<Recipient>) -> BTreeMap<SubscriptionId, FeedInfo> {
        self.store.lock().await.list(subscriber)
    }

    /// Subscribe `subscriber` to `url` and confirm with a notification
    pub async fn subscribe(&self, url: &str, subscriber: Option<Recipient>) -> Result<()> {
        let (fetcher, outbox) = self.parts()?;
        if url.trim().is_empty() {
            return outbox
                .send(Message::notify_to("A feed URL is required", subscriber))
                .await;
        }

        // one attempt only; the poller keeps trying on its own schedule
        let fetched = match fetcher.fetch_once(url).await {
            Ok(feed) => Some(feed),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "could not fetch feed while subscribing");
                None
            }
        };

        let reply = {
            let mut store = self.store.lock().await;
            match store.subscribe(url, subscriber, fetched.as_ref()) {
                Some(id) => {
                    let title = store
                        .get(id)
                        .map(|s| s.info.title.clone())
                        .unwrap_or_else(|| url.to_string());
                    tracing::info!(url = %url, id, "subscribed to feed");
                    format!("Subscribed to {title}")
                }
                None => format!("Already subscribed to {url}"),
            }
        };
        outbox.send(Message::notify_to(reply, subscriber)).await
    }

    /// Remove `subscriber`'s subscription to `url` and confirm with a notification
    pub async fn unsubscribe(&self, url: &str, subscriber: Option<Recipient>) -> Result<()> {
        let (_, outbox) = self.parts()?;

        let reply = match self.store.lock().await.unsubscribe(url, subscriber) {
            Some(removed) => {
                tracing::info!(url = %url, "unsubscribed from feed");
                format!("Unsubscribed from {}", removed.info.title)
            }
            None => format!("Not subscribed to {url}"),
        };
        outbox.send(Message::notify_to(reply, subscriber)).await
    }

    /// Reply with the subscriber's subscription list
    pub async fn list(&self, subscriber: Option<Recipient>) -> Result<()> {
        let (_, outbox) = self.parts()?;
        let feeds = self.subscriptions(subscriber).await;
        outbox
            .send(Message::Feeds(FeedList {
                feeds,
                target: subscriber,
            }))
            .await
    }

    /// Fetch every subscription once and publish the new items
    pub async fn poll_once(&self) -> Result<usize> {
        let (fetcher, outbox) = self.parts()?;
        let targets = self.store.lock().await.targets();
        let mut published = 0;

        for (id, url) in targets {
            let feed = match fetcher.fetch(&url).await {
                Ok(feed) => feed,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "feed check failed");
                    continue;
                }
            };

            let new_items = self.store.lock().await.record(id, &feed);
            if !new_items.is_empty() {
                tracing::info!(url = %url, count = new_items.len(), "new feed items");
            }
            for item in new_items {
                outbox
                    .send(Message::enclosure(item.url, item.requester))
                    .await?;
                published += 1;
            }
        }
        Ok(published)
    }
}

#[async_trait]
impl Service for FeedService {
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
        if self.config.check_interval.is_zero() {
            return Err(Error::config(
                "feeds.check_interval",
                "check interval must be greater than zero",
            ));
        }
        self.fetcher = Some(FeedFetcher::new(&self.config)?);
        Ok(())
    }

    async fn serve(&self) {
        let mut tick = tokio::time::interval(self.config.check_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval = ?self.config.check_interval, "feed poller started");

        loop {
            tick.tick().await;
            match self.poll_once().await {
                Ok(0) => {}
                Ok(count) => tracing::debug!(count, "feed items queued for download"),
                Err(e) => {
                    tracing::error!(error = %e, "feed poller stopped");
                    return;
                }
            }
        }
    }

    async fn handle(&self, message: Arc<Message>) {
        let Message::Subscription(request) = message.as_ref() else {
            tracing::debug!(kind = %message.kind(), "ignoring message");
            return;
        };

        let result = match request.op {
            SubscriptionOp::Subscribe => self.subscribe(&request.url, request.requester).await,
            SubscriptionOp::Unsubscribe => self.unsubscribe(&request.url, request.requester).await,
            SubscriptionOp::List => self.list(request.requester).await,
        };
        if let Err(e) = result {
            tracing::error!(op = ?request.op, url = %request.url, error = %e, "subscription request failed");
        }
    }
}
