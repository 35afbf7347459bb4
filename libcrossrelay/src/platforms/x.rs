//! Session-authenticated source fetcher
//!
//! Reads a user's timeline through the web client's GraphQL endpoints using
//! the cookies of an existing logged-in browser session (`auth_token` and
//! `ct0`). Obtaining those cookies is outside this crate.
//!
//! The first timeline page is requested eagerly by `fetch_newest` so that a
//! rejected session fails before any item is produced; further pages are
//! requested only while the returned stream is being polled.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, COOKIE};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{SourceAuth, SourceConfig};
use crate::error::{ConfigError, PlatformError, RelayError, Result};
use crate::platforms::{ItemStream, SourceFetcher, BROWSER_USER_AGENT};
use crate::types::{MediaKind, MediaRef, SourceItem};

const DEFAULT_BASE_URL: &str = "https://x.com";

/// Bearer token embedded in the public web client
const WEB_BEARER_TOKEN: &str = "AAAAAAAAAAAAAAAAAAAAANRILgAAAAAAnNwIzUejRCOuH5E6I8xnZz4puTs%3D1Zv7ttfk8LF81IUq16cHjhLTvJu4FA33AGWWjCpTnA";

const TIMELINE_FEATURES: &str = r#"{"rweb_tipjar_consumption_enabled":true,"responsive_web_graphql_exclude_directive_enabled":true,"verified_phone_label_enabled":false,"creator_subscriptions_tweet_preview_api_enabled":true,"responsive_web_graphql_timeline_navigation_enabled":true,"responsive_web_graphql_skip_user_profile_image_extensions_enabled":false,"communities_web_enable_tweet_community_results_fetch":true,"c9s_tweet_anatomy_moderator_badge_enabled":true,"articles_preview_enabled":true,"tweetypie_unmention_optimization_enabled":true,"responsive_web_edit_tweet_api_enabled":true,"graphql_is_translatable_rweb_tweet_is_translatable_enabled":true,"view_counts_everywhere_api_enabled":true,"longform_notetweets_consumption_enabled":true,"responsive_web_twitter_article_tweet_consumption_enabled":true,"tweet_awards_web_tipping_enabled":false,"creator_subscriptions_quote_tweet_preview_enabled":false,"freedom_of_speech_not_reach_fetch_enabled":true,"standardized_nudges_misinfo":true,"tweet_with_visibility_results_prefer_gql_limited_actions_policy_enabled":true,"rweb_video_timestamps_enabled":true,"longform_notetweets_rich_text_read_enabled":true,"longform_notetweets_inline_media_enabled":true,"responsive_web_enhance_cards_enabled":false}"#;

const USER_FEATURES: &str = r#"{"hidden_profile_likes_enabled":true,"hidden_profile_subscriptions_enabled":true,"rweb_tipjar_consumption_enabled":true,"responsive_web_graphql_exclude_directive_enabled":true,"verified_phone_label_enabled":false,"subscriptions_verification_info_is_identity_verified_enabled":true,"subscriptions_verification_info_verified_since_enabled":true,"highlights_tweets_tab_ui_enabled":true,"responsive_web_twitter_article_notes_tab_enabled":true,"creator_subscriptions_tweet_preview_api_enabled":true,"responsive_web_graphql_skip_user_profile_image_extensions_enabled":false,"responsive_web_graphql_timeline_navigation_enabled":true}"#;

/// Timeline reader backed by a logged-in web session
pub struct XSessionSource {
    client: reqwest::Client,
    headers: HeaderMap,
    base_url: String,
    page_size: usize,
    max_pages: usize,
    user_lookup_query_id: String,
    timeline_query_id: String,
}

/// One parsed timeline response
#[derive(Debug, Default)]
pub struct TimelinePage {
    pub items: Vec<SourceItem>,
    pub bottom_cursor: Option<String>,
}

/// Everything a page request needs, shared with the item stream
struct TimelineRequest {
    client: reqwest::Client,
    headers: HeaderMap,
    url: String,
    user_id: String,
    page_size: usize,
}

impl XSessionSource {
    pub fn new(auth_token: &SecretString, ct0: &SecretString, config: &SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .map_err(|e| PlatformError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            headers: session_headers(auth_token, ct0)?,
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: config.page_size,
            max_pages: config.max_pages,
            user_lookup_query_id: config.user_lookup_query_id.clone(),
            timeline_query_id: config.timeline_query_id.clone(),
        })
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        match &config.auth {
            SourceAuth::Session { auth_token, ct0 } => Self::new(auth_token, ct0, config),
            SourceAuth::Anonymous { .. } => Err(ConfigError::InvalidValue {
                field: "source.auth.mode".to_string(),
                reason: "session source requires session cookies".to_string(),
            }
            .into()),
        }
    }

    /// Override the API host (e.g. `https://twitter.com`)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn resolve_user_id(&self, account: &str) -> Result<String> {
        let url = format!(
            "{}/i/api/graphql/{}/UserByScreenName",
            self.base_url, self.user_lookup_query_id
        );
        let variables = json!({ "screen_name": account, "withSafetyModeUserFields": true });

        let body = get_json(
            &self.client,
            &self.headers,
            &url,
            &[
                ("variables", variables.to_string()),
                ("features", USER_FEATURES.to_string()),
            ],
            "user lookup",
        )
        .await?;

        parse_user_id(&body).ok_or_else(|| {
            PlatformError::Fetch(format!("Account '{}' not found or unavailable", account)).into()
        })
    }
}

impl TimelineRequest {
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<TimelinePage> {
        let mut variables = json!({
            "userId": self.user_id,
            "count": self.page_size,
            "includePromotedContent": false,
            "withQuickPromoteEligibilityTweetFields": false,
            "withVoice": true,
            "withV2Timeline": true,
        });
        if let Some(cursor) = cursor {
            variables["cursor"] = Value::String(cursor.to_string());
        }

        let body = get_json(
            &self.client,
            &self.headers,
            &self.url,
            &[
                ("variables", variables.to_string()),
                ("features", TIMELINE_FEATURES.to_string()),
            ],
            "user timeline",
        )
        .await?;

        let page = parse_timeline(&body);
        tracing::debug!(
            items = page.items.len(),
            has_more = page.bottom_cursor.is_some(),
            "Fetched timeline page"
        );
        Ok(page)
    }
}

#[async_trait]
impl SourceFetcher for XSessionSource {
    fn name(&self) -> &str {
        "x-session"
    }

    async fn fetch_newest(&self, account: &str) -> Result<ItemStream> {
        let user_id = self.resolve_user_id(account).await?;
        tracing::debug!(account, user_id = %user_id, "Resolved source account");

        let request = Arc::new(TimelineRequest {
            client: self.client.clone(),
            headers: self.headers.clone(),
            url: format!(
                "{}/i/api/graphql/{}/UserTweets",
                self.base_url, self.timeline_query_id
            ),
            user_id,
            page_size: self.page_size,
        });

        let first = request.fetch_page(None).await?;
        let first_cursor = next_cursor(&first);
        let pages_left = self.max_pages.saturating_sub(1);

        let later_pages = stream::try_unfold(
            (request, first_cursor, pages_left),
            |(request, cursor, pages_left)| async move {
                let cursor = match cursor {
                    Some(cursor) if pages_left > 0 => cursor,
                    _ => return Ok::<_, RelayError>(None),
                };
                let page = request.fetch_page(Some(&cursor)).await?;
                let next = next_cursor(&page);
                Ok(Some((page.items, (request, next, pages_left - 1))))
            },
        )
        .map_ok(|items| stream::iter(items.into_iter().map(Ok::<_, RelayError>)))
        .try_flatten();

        Ok(stream::iter(first.items.into_iter().map(Ok))
            .chain(later_pages)
            .boxed())
    }
}

/// Cursor for the following page, or `None` once the timeline is exhausted
fn next_cursor(page: &TimelinePage) -> Option<String> {
    if page.items.is_empty() {
        None
    } else {
        page.bottom_cursor.clone()
    }
}

fn session_headers(auth_token: &SecretString, ct0: &SecretString) -> Result<HeaderMap> {
    let invalid = |name: &str| {
        RelayError::from(PlatformError::Authentication(format!(
            "Session {} contains characters not allowed in a header",
            name
        )))
    };

    let mut cookie = HeaderValue::from_str(&format!(
        "auth_token={}; ct0={}",
        auth_token.expose_secret(),
        ct0.expose_secret()
    ))
    .map_err(|_| invalid("cookie"))?;
    cookie.set_sensitive(true);

    let mut csrf = HeaderValue::from_str(ct0.expose_secret()).map_err(|_| invalid("ct0"))?;
    csrf.set_sensitive(true);

    let mut bearer = HeaderValue::from_str(&format!("Bearer {}", WEB_BEARER_TOKEN))
        .map_err(|_| invalid("bearer"))?;
    bearer.set_sensitive(true);

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(COOKIE, cookie);
    headers.insert("x-csrf-token", csrf);
    headers.insert("x-twitter-auth-type", HeaderValue::from_static("OAuth2Session"));
    headers.insert("x-twitter-active-user", HeaderValue::from_static("yes"));
    Ok(headers)
}

async fn get_json(
    client: &reqwest::Client,
    headers: &HeaderMap,
    url: &str,
    query: &[(&str, String)],
    context: &str,
) -> Result<Value> {
    let response = client
        .get(url)
        .headers(headers.clone())
        .query(query)
        .send()
        .await
        .map_err(|e| PlatformError::Network(format!("{} request failed: {}", context, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(PlatformError::from_status(status.as_u16(), context, PlatformError::Fetch).into());
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| PlatformError::Parse(format!("{} response is not JSON: {}", context, e)))?;

    if body.get("data").map_or(true, Value::is_null) {
        let message = body
            .pointer("/errors/0/message")
            .and_then(Value::as_str)
            .unwrap_or("response has no data");
        return Err(PlatformError::Fetch(format!("{}: {}", context, message)).into());
    }

    Ok(body)
}

pub fn parse_user_id(body: &Value) -> Option<String> {
    body.pointer("/data/user/result/rest_id")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Extract items (newest-first) and the bottom cursor from a timeline response
///
/// Pinned entries live in a separate instruction and are ignored, since they
/// break the recency order.
pub fn parse_timeline(body: &Value) -> TimelinePage {
    let instructions = body
        .pointer("/data/user/result/timeline_v2/timeline/instructions")
        .or_else(|| body.pointer("/data/user/result/timeline/timeline/instructions"))
        .and_then(Value::as_array);

    let mut page = TimelinePage::default();
    let Some(instructions) = instructions else {
        return page;
    };

    let entries = instructions
        .iter()
        .filter(|i| i.get("type").and_then(Value::as_str) == Some("TimelineAddEntries"))
        .filter_map(|i| i.get("entries").and_then(Value::as_array))
        .flatten();

    for entry in entries {
        let entry_id = entry.get("entryId").and_then(Value::as_str).unwrap_or_default();
        let content = &entry["content"];

        if entry_id.starts_with("tweet-") {
            if let Some(item) = parse_tweet(&content["itemContent"]["tweet_results"]["result"]) {
                page.items.push(item);
            }
        } else if entry_id.starts_with("profile-conversation-") {
            // Conversation modules list the thread oldest-first
            if let Some(module_items) = content.get("items").and_then(Value::as_array) {
                page.items.extend(
                    module_items
                        .iter()
                        .rev()
                        .filter_map(|m| parse_tweet(&m["item"]["itemContent"]["tweet_results"]["result"])),
                );
            }
        } else if entry_id.starts_with("cursor-bottom-") {
            page.bottom_cursor = content
                .get("value")
                .and_then(Value::as_str)
                .map(str::to_string);
        }
    }

    page
}

fn parse_tweet(result: &Value) -> Option<SourceItem> {
    let result = if result.get("__typename").and_then(Value::as_str)
        == Some("TweetWithVisibilityResults")
    {
        result.get("tweet")?
    } else {
        result
    };

    let legacy = result.get("legacy")?;
    let id = legacy
        .get("id_str")
        .or_else(|| result.get("rest_id"))
        .and_then(Value::as_str)?
        .to_string();

    let text = result
        .pointer("/note_tweet/note_tweet_results/result/text")
        .or_else(|| legacy.get("full_text"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let media = legacy
        .pointer("/extended_entities/media")
        .and_then(Value::as_array)
        .map(|media| {
            media
                .iter()
                .filter_map(|m| {
                    let url = m.get("media_url_https").and_then(Value::as_str)?;
                    let kind = MediaKind::from_source_type(
                        m.get("type").and_then(Value::as_str).unwrap_or_default(),
                    );
                    Some(MediaRef {
                        url: url.to_string(),
                        kind,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(SourceItem {
        id,
        text,
        is_repost: legacy.get("retweeted_status_result").is_some(),
        media,
        created_at: legacy
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(parse_created_at),
    })
}

/// Parse timestamps like `Wed Oct 10 20:19:24 +0000 2018`
fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%a %b %d %H:%M:%S %z %Y")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
