//! Anonymous source fetcher backed by an RSS mirror
//!
//! Mirrors such as Nitter publish `{base}/{account}/rss` without any login.
//! A feed is a single page, newest-first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::{PlatformError, Result};
use crate::platforms::{ItemStream, SourceFetcher, BROWSER_USER_AGENT};
use crate::types::{MediaRef, SourceItem};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    description: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

pub struct FeedSource {
    client: reqwest::Client,
    feed_url: String,
    limit: usize,
}

impl FeedSource {
    pub fn new(feed_url: &str, limit: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .map_err(|e| PlatformError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            feed_url: feed_url.trim_end_matches('/').to_string(),
            limit,
        })
    }

    pub fn feed_location(&self, account: &str) -> String {
        format!("{}/{}/rss", self.feed_url, account)
    }
}

#[async_trait]
impl SourceFetcher for FeedSource {
    fn name(&self) -> &str {
        "x-feed"
    }

    async fn fetch_newest(&self, account: &str) -> Result<ItemStream> {
        let url = self.feed_location(account);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PlatformError::Network(format!("feed request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PlatformError::from_status(status.as_u16(), "feed", PlatformError::Fetch).into());
        }

        let body = response
            .text()
            .await
            .map_err(|e| PlatformError::Network(format!("feed body unreadable: {}", e)))?;

        let mut items = parse_feed(&body)?;
        items.truncate(self.limit);
        tracing::debug!(url = %url, items = items.len(), "Fetched feed");

        Ok(stream::iter(items.into_iter().map(Ok)).boxed())
    }
}

/// Parse an RSS document into source items, newest-first
///
/// Entries without a recognizable `/status/<id>` link are dropped.
pub fn parse_feed(xml: &str) -> Result<Vec<SourceItem>> {
    let rss: Rss = from_str(&scrub_html_entities(xml))
        .map_err(|e| PlatformError::Parse(format!("feed is not valid RSS: {}", e)))?;

    Ok(rss
        .channel
        .item
        .into_iter()
        .filter_map(|item| {
            let id = item
                .link
                .as_deref()
                .and_then(status_id)
                .or_else(|| item.guid.as_deref().and_then(status_id))?;
            let title = item.title.unwrap_or_default();
            let body = item.description.as_deref().map(description_text);
            let text = match body {
                Some(body) if !body.is_empty() => body,
                _ => strip_repost_prefix(&title).to_string(),
            };
            let media = item
                .description
                .as_deref()
                .map(image_sources)
                .unwrap_or_default()
                .into_iter()
                .map(MediaRef::photo)
                .collect();

            Some(SourceItem {
                id,
                is_repost: title.starts_with("RT by "),
                text,
                media,
                created_at: item.pub_date.as_deref().and_then(parse_pub_date),
            })
        })
        .collect())
}

/// Numeric id from links like `https://nitter.net/user/status/123#m`
fn status_id(link: &str) -> Option<String> {
    let (_, rest) = link.split_once("/status/")?;
    let id: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

fn strip_repost_prefix(title: &str) -> &str {
    match title.strip_prefix("RT by ") {
        Some(rest) => rest.split_once(": ").map_or(rest, |(_, text)| text),
        None => title,
    }
}

fn image_sources(html: &str) -> Vec<String> {
    static IMG_SRC: OnceLock<Regex> = OnceLock::new();
    let re = IMG_SRC.get_or_init(|| {
        Regex::new(r#"<img[^>]*\ssrc="([^"]+)""#).expect("image source pattern is valid")
    });
    re.captures_iter(html)
        .map(|caps| caps[1].replace("&amp;", "&"))
        .collect()
}

/// Plain text of an item's HTML body
///
/// Paragraph and line breaks become newlines; every other tag is dropped.
fn description_text(html: &str) -> String {
    static BREAK: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();
    let breaks = BREAK.get_or_init(|| {
        Regex::new(r"(?i)<br\s*/?>|</p>").expect("line break pattern is valid")
    });
    let tags = TAG.get_or_init(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"));

    let text = breaks.replace_all(html, "\n");
    let text = tags.replace_all(&text, "");
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn scrub_html_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&hellip;", "…")
        .replace("&mdash;", "-")
        .replace("&ndash;", "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>someone / X</title>
    <link>https://nitter.example/someone</link>
    <item>
      <title>Sunset from the roof&nbsp;today</title>
      <dc:creator>@someone</dc:creator>
      <description><![CDATA[<p>Sunset from the roof</p><img src="https://nitter.example/pic/media%2FAbc.jpg" style="max-width:250px;" /><img src="https://nitter.example/pic/media%2FDef.png?name=orig&amp;x=1" />]]></description>
      <pubDate>Wed, 16 Oct 2024 08:30:00 GMT</pubDate>
      <guid>https://nitter.example/someone/status/1846500000000000005#m</guid>
      <link>https://nitter.example/someone/status/1846500000000000005#m</link>
    </item>
    <item>
      <title>RT by @someone: look at this</title>
      <dc:creator>@other</dc:creator>
      <description><![CDATA[<p>look at this</p>]]></description>
      <pubDate>Tue, 15 Oct 2024 08:30:00 GMT</pubDate>
      <guid>https://nitter.example/other/status/1846000000000000004#m</guid>
      <link>https://nitter.example/other/status/1846000000000000004#m</link>
    </item>
    <item>
      <title>no link here</title>
    </item>
    <item>
      <title>Older post</title>
      <link>https://nitter.example/someone/status/1845000000000000003</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_feed_items() {
        let items = parse_feed(FEED).unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["1846500000000000005", "1846000000000000004", "1845000000000000003"]
        );

        let newest = &items[0];
        assert!(!newest.is_repost);
        assert_eq!(newest.text, "Sunset from the roof");
        assert_eq!(
            newest.media,
            vec![
                MediaRef::photo("https://nitter.example/pic/media%2FAbc.jpg"),
                MediaRef::photo("https://nitter.example/pic/media%2FDef.png?name=orig&x=1"),
            ]
        );
        assert!(newest.created_at.is_some());

        let repost = &items[1];
        assert!(repost.is_repost);
        assert_eq!(repost.text, "look at this");

        assert!(items[2].media.is_empty());
        assert!(items[2].created_at.is_none());
    }

    #[test]
    fn test_reply_label_in_title_is_not_relayed() {
        let feed = r#"<rss><channel>
    <item>
      <title>R to @other: thanks for the long and detailed writeup</title>
      <description><![CDATA[<p>thanks for the long and detailed writeup<br>it helped &amp; saved me a day</p><img src="https://nitter.example/pic/a.jpg" />]]></description>
      <link>https://nitter.example/someone/status/77#m</link>
    </item>
  </channel></rss>"#;

        let items = parse_feed(feed).unwrap();
        assert_eq!(items.len(), 1);
        assert!(!items[0].is_repost);
        assert_eq!(
            items[0].text,
            "thanks for the long and detailed writeup\nit helped & saved me a day"
        );
        assert_eq!(items[0].media.len(), 1);
    }

    #[test]
    fn test_description_text_strips_markup() {
        assert_eq!(
            description_text(r#"<p>one <a href="https://x.example">link</a></p><p>two</p>"#),
            "one link\ntwo"
        );
        assert_eq!(description_text("<img src=\"a.jpg\" />"), "");
    }

    #[test]
    fn test_parse_empty_channel() {
        let items = parse_feed("<rss><channel><title>empty</title></channel></rss>").unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_parse_invalid_feed() {
        assert!(parse_feed("this is not xml <<<").is_err());
    }

    #[test]
    fn test_status_id() {
        assert_eq!(status_id("https://n.example/u/status/123#m").as_deref(), Some("123"));
        assert_eq!(status_id("https://n.example/u/status/456?s=20").as_deref(), Some("456"));
        assert_eq!(status_id("https://n.example/u"), None);
        assert_eq!(status_id("https://n.example/u/status/"), None);
    }

    #[test]
    fn test_feed_location() {
        let source = FeedSource::new("https://nitter.example/", 20).unwrap();
        assert_eq!(source.feed_location("someone"), "https://nitter.example/someone/rss");
    }
}
