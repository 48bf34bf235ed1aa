//! In-memory subscription store.

use super::parse::ParsedFeed;
use crate::types::{FeedInfo, Recipient, SubscriptionId};
use std::collections::{BTreeMap, HashSet};

/// One subscriber's interest in one feed
#[derive(Clone, Debug)]
pub struct Subscription {
    /// Title and URL
    pub info: FeedInfo,
    /// Chat that subscribed; new items are downloaded on its behalf
    pub subscriber: Option<Recipient>,
    /// Item ids already handled; None until the first successful fetch
    seen: Option<HashSet<String>>,
}

/// A new feed item to hand to the downloader
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewItem {
    /// Download URL
    pub url: String,
    /// Subscriber to attribute the download to
    pub requester: Option<Recipient>,
}

/// Subscriptions keyed by id, ids assigned in increasing order
#[derive(Debug, Default)]
pub struct SubscriptionStore {
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    next_id: SubscriptionId,
}

impl SubscriptionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subscriptions
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether there are no subscriptions
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Look up a subscription
    pub fn get(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.subscriptions.get(&id)
    }

    fn find(&self, url: &str, subscriber: Option<Recipient>) -> Option<SubscriptionId> {
        self.subscriptions
            .iter()
            .find(|(_, s)| s.info.url == url && s.subscriber == subscriber)
            .map(|(id, _)| *id)
    }

    /// Add a subscription; returns `None` if this subscriber already has the URL
    ///
    /// When the feed was fetched at subscribe time its current items are marked seen,
    /// so only items published afterwards are downloaded.
    pub fn subscribe(
        &mut self,
        url: &str,
        subscriber: Option<Recipient>,
        fetched: Option<&ParsedFeed>,
    ) -> Option<SubscriptionId> {
        if self.find(url, subscriber).is_some() {
            return None;
        }

        self.next_id += 1;
        let id = self.next_id;
        let title = fetched
            .map(|feed| feed.title.trim())
            .filter(|title| !title.is_empty())
            .unwrap_or(url)
            .to_string();

        self.subscriptions.insert(
            id,
            Subscription {
                info: FeedInfo {
                    title,
                    url: url.to_string(),
                },
                subscriber,
                seen: fetched.map(seen_ids),
            },
        );
        Some(id)
    }

    /// Remove this subscriber's subscription to `url`
    pub fn unsubscribe(&mut self, url: &str, subscriber: Option<Recipient>) -> Option<Subscription> {
        let id = self.find(url, subscriber)?;
        self.subscriptions.remove(&id)
    }

    /// Subscriptions visible to `subscriber`; every subscription when `None`
    pub fn list(&self, subscriber: Option<Recipient>) -> BTreeMap<SubscriptionId, FeedInfo> {
        self.subscriptions
            .iter()
            .filter(|(_, s)| subscriber.is_none() || s.subscriber == subscriber)
            .map(|(id, s)| (*id, s.info.clone()))
            .collect()
    }

    /// Ids and URLs of every subscription, for the poller
    pub fn targets(&self) -> Vec<(SubscriptionId, String)> {
        self.subscriptions
            .iter()
            .map(|(id, s)| (*id, s.info.url.clone()))
            .collect()
    }

    /// Record a fetch and return the items not seen before
    ///
    /// The first successful fetch of a subscription only seeds the seen set.
    pub fn record(&mut self, id: SubscriptionId, feed: &ParsedFeed) -> Vec<NewItem> {
        let Some(subscription) = self.subscriptions.get_mut(&id) else {
            // unsubscribed while the fetch was in flight
            return vec![];
        };

        let requester = subscription.subscriber;
        if subscription.seen.is_none() {
            subscription.seen = Some(seen_ids(feed));
            return vec![];
        }
        let seen = subscription.seen.get_or_insert_with(HashSet::new);

        feed.items
            .iter()
            .filter(|item| seen.insert(item.guid.clone()))
            .map(|item| NewItem {
                url: item.url.clone(),
                requester,
            })
            .collect()
    }
}

fn seen_ids(feed: &ParsedFeed) -> HashSet<String> {
    feed.items.iter().map(|item| item.guid.clone()).collect()
}
