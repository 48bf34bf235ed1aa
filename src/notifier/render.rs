//! Plain-text renderings of bus payloads.

use crate::bus::TextFormat;
use crate::types::{FeedInfo, MissionSnapshot, SubscriptionId};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Reply when there are no subscriptions
pub const NO_SUBSCRIPTIONS: &str = "No subscriptions found";

/// Reply when nothing is being downloaded
pub const NO_DOWNLOADS: &str = "No active downloads";

/// Subscription list as Markdown links, one per line
pub fn feeds(feeds: &BTreeMap<SubscriptionId, FeedInfo>) -> (String, TextFormat) {
    if feeds.is_empty() {
        return (NO_SUBSCRIPTIONS.to_string(), TextFormat::Plain);
    }

    let mut out = String::from("Subscriptions:\n");
    for feed in feeds.values() {
        let _ = writeln!(out, "[{}]({})", escape_link_text(&feed.title), feed.url);
    }
    (out, TextFormat::Markdown)
}

/// One block per mission: name, status and progress with two decimals
pub fn status(missions: &MissionSnapshot) -> (String, TextFormat) {
    if missions.is_empty() {
        return (NO_DOWNLOADS.to_string(), TextFormat::Plain);
    }

    let mut out = String::from("Downloading:\n");
    for mission in missions.values() {
        let _ = writeln!(
            out,
            "Name: {}\n\tStatus: {}\n\tProgress: {:.2}%",
            mission.display_name(),
            mission.status,
            mission.percent()
        );
    }
    (out, TextFormat::Plain)
}

// Brackets in a title would end the link text early
fn escape_link_text(title: &str) -> String {
    title.replace('[', "(").replace(']', ")")
}
