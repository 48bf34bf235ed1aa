//! RSS 2.0 and Atom parsing, reduced to what the poller needs.

use crate::error::{Error, Result};

/// A parsed feed document
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    /// Channel (RSS) or feed (Atom) title
    pub title: String,
    /// Items carrying something downloadable
    pub items: Vec<FeedItem>,
}

/// One downloadable item of a feed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedItem {
    /// Stable identity (guid / entry id, else the download URL)
    pub guid: String,
    /// Item title
    pub title: String,
    /// URL handed to the download backend
    pub url: String,
}

/// Parse `content` as RSS, falling back to Atom
pub fn parse(content: &str) -> Result<ParsedFeed> {
    match parse_rss(content) {
        Ok(feed) => Ok(feed),
        Err(rss_err) => {
            tracing::trace!(error = %rss_err, "not an RSS document, trying Atom");
            parse_atom(content).map_err(|atom_err| {
                Error::Other(format!(
                    "Failed to parse feed as RSS or Atom. RSS error: {rss_err}. Atom error: {atom_err}"
                ))
            })
        }
    }
}

// Links that point straight at a torrent are downloadable even without an enclosure
fn is_torrent_link(link: &str) -> bool {
    link.starts_with("magnet:") || link.ends_with(".torrent")
}

fn parse_rss(content: &str) -> std::result::Result<ParsedFeed, rss::Error> {
    let channel = content.parse::<rss::Channel>()?;

    let items = channel
        .items()
        .iter()
        .filter_map(|item| {
            let url = item
                .enclosure()
                .map(|enc| enc.url().to_string())
                .or_else(|| {
                    item.link()
                        .filter(|link| is_torrent_link(link))
                        .map(str::to_string)
                })?;

            let guid = item
                .guid()
                .map(|g| g.value().to_string())
                .unwrap_or_else(|| url.clone());

            Some(FeedItem {
                guid,
                title: item.title().unwrap_or("").to_string(),
                url,
            })
        })
        .collect();

    Ok(ParsedFeed {
        title: channel.title().to_string(),
        items,
    })
}

fn parse_atom(content: &str) -> std::result::Result<ParsedFeed, atom_syndication::Error> {
    let feed = atom_syndication::Feed::read_from(content.as_bytes())?;

    let items = feed
        .entries()
        .iter()
        .filter_map(|entry| {
            let url = entry
                .links()
                .iter()
                .find(|link| link.rel() == "enclosure" || is_torrent_link(link.href()))
                .map(|link| link.href().to_string())?;

            let guid = if entry.id().is_empty() {
                url.clone()
            } else {
                entry.id().to_string()
            };

            Some(FeedItem {
                guid,
                title: entry.title().as_str().to_string(),
                url,
            })
        })
        .collect();

    Ok(ParsedFeed {
        title: feed.title().as_str().to_string(),
        items,
    })
}
