//! Novelty filter
//!
//! Separates source items that appeared after the stored cursor from items
//! that were already relayed or are excluded (reposts). Items arrive
//! newest-first, so the scan stops at the first item whose id equals the
//! cursor.

use futures::{Stream, StreamExt};

use crate::error::Result;
use crate::types::SourceItem;

/// Maximum number of items considered novel when no cursor is stored yet
///
/// Keeps the first run from relaying the account's whole visible history.
pub const FIRST_RUN_CAP: usize = 1;

/// Verdict for a single item during the scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// This item and everything after it has already been relayed
    Stop,
    /// Excluded from relay, but keep scanning
    Skip,
    /// Novel original item
    Keep,
}

pub fn classify(item: &SourceItem, cursor: Option<&str>) -> Scan {
    if cursor.is_some_and(|c| c == item.id) {
        Scan::Stop
    } else if item.is_repost {
        Scan::Skip
    } else {
        Scan::Keep
    }
}

/// Novel, non-repost items in fetch order (newest-first)
///
/// With an empty cursor the result is capped at [`FIRST_RUN_CAP`].
pub fn filter_novel<I>(items: I, cursor: Option<&str>) -> Vec<SourceItem>
where
    I: IntoIterator<Item = SourceItem>,
{
    let cap = if cursor.is_none() {
        FIRST_RUN_CAP
    } else {
        usize::MAX
    };

    let mut novel = Vec::new();
    for item in items {
        if novel.len() >= cap {
            break;
        }
        match classify(&item, cursor) {
            Scan::Stop => break,
            Scan::Skip => continue,
            Scan::Keep => novel.push(item),
        }
    }
    novel
}

/// Pull from `items` until the newest novel item is found
///
/// Stops pulling as soon as a verdict is reached, so a paginated fetcher
/// never loads pages beyond the cursor. The result equals the first element
/// of [`filter_novel`] over the same items.
///
/// # Errors
///
/// Returns the first error yielded by the stream before a verdict.
pub async fn next_candidate<S>(items: S, cursor: Option<&str>) -> Result<Option<SourceItem>>
where
    S: Stream<Item = Result<SourceItem>>,
{
    futures::pin_mut!(items);

    while let Some(item) = items.next().await {
        let item = item?;
        match classify(&item, cursor) {
            Scan::Stop => return Ok(None),
            Scan::Skip => {
                tracing::debug!(id = %item.id, "Skipping repost");
            }
            Scan::Keep => return Ok(Some(item)),
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PlatformError, RelayError};
    use futures::stream;

    fn item(id: &str) -> SourceItem {
        SourceItem::new(id, format!("post {}", id))
    }

    fn ids(items: &[SourceItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    fn scenario() -> Vec<SourceItem> {
        vec![item("5"), item("4").repost(), item("3")]
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&item("3"), Some("3")), Scan::Stop);
        assert_eq!(classify(&item("3").repost(), Some("3")), Scan::Stop);
        assert_eq!(classify(&item("4").repost(), Some("3")), Scan::Skip);
        assert_eq!(classify(&item("5"), Some("3")), Scan::Keep);
        assert_eq!(classify(&item("5"), None), Scan::Keep);
    }

    #[test]
    fn test_first_run_is_capped_to_one() {
        let novel = filter_novel(scenario(), None);
        assert_eq!(ids(&novel), vec!["5"]);
    }

    #[test]
    fn test_first_run_skips_leading_reposts() {
        let items = vec![item("9").repost(), item("8").repost(), item("7"), item("6")];
        let novel = filter_novel(items, None);
        assert_eq!(ids(&novel), vec!["7"]);
    }

    #[test]
    fn test_stops_at_cursor_and_drops_reposts() {
        let novel = filter_novel(scenario(), Some("3"));
        assert_eq!(ids(&novel), vec!["5"]);
    }

    #[test]
    fn test_returns_all_novel_items_newest_first() {
        let items = vec![item("9"), item("8").repost(), item("7"), item("6"), item("5")];
        let novel = filter_novel(items, Some("6"));
        assert_eq!(ids(&novel), vec!["9", "7"]);
    }

    #[test]
    fn test_nothing_new_when_cursor_is_newest() {
        let novel = filter_novel(scenario(), Some("5"));
        assert!(novel.is_empty());
    }

    #[test]
    fn test_only_reposts_before_cursor() {
        let items = vec![item("6").repost(), item("5").repost(), item("4")];
        assert!(filter_novel(items, Some("4")).is_empty());
    }

    #[test]
    fn test_cursor_outside_window_keeps_everything_original() {
        let items = vec![item("12"), item("11").repost(), item("10")];
        let novel = filter_novel(items, Some("2"));
        assert_eq!(ids(&novel), vec!["12", "10"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(filter_novel(Vec::new(), None).is_empty());
        assert!(filter_novel(Vec::new(), Some("1")).is_empty());
    }

    #[tokio::test]
    async fn test_next_candidate_matches_filter_novel() {
        let cases: Vec<(Vec<SourceItem>, Option<&str>)> = vec![
            (scenario(), None),
            (scenario(), Some("3")),
            (scenario(), Some("5")),
            (vec![item("4").repost(), item("3")], Some("3")),
            (vec![item("2").repost(), item("1").repost()], None),
            (Vec::new(), Some("1")),
        ];

        for (items, cursor) in cases {
            let expected = filter_novel(items.clone(), cursor).into_iter().next();
            let stream = stream::iter(items.into_iter().map(Ok));
            let actual = next_candidate(stream, cursor).await.unwrap();
            assert_eq!(actual, expected, "cursor {:?}", cursor);
        }
    }

    #[tokio::test]
    async fn test_next_candidate_stops_pulling_at_verdict() {
        // The error sits after the cursor and must never be reached
        let items: Vec<Result<SourceItem>> = vec![
            Ok(item("4").repost()),
            Ok(item("3")),
            Err(PlatformError::Fetch("page 2 failed".to_string()).into()),
        ];
        let candidate = next_candidate(stream::iter(items), Some("3")).await.unwrap();
        assert_eq!(candidate, None);
    }

    #[tokio::test]
    async fn test_next_candidate_propagates_stream_error() {
        let items: Vec<Result<SourceItem>> = vec![
            Ok(item("4").repost()),
            Err(PlatformError::RateLimit("429".to_string()).into()),
            Ok(item("3")),
        ];
        let result = next_candidate(stream::iter(items), Some("3")).await;
        assert!(matches!(
            result,
            Err(RelayError::Platform(PlatformError::RateLimit(_)))
        ));
    }
}
