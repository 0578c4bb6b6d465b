use anyhow::Result;
use chrono::Utc;
use feed_rs::parser;

/// Cap on items taken from a single feed page, most recent first.
pub const MAX_ARTICLES_PER_FEED: usize = 50;

/// One item as it came off the wire, before novelty filtering and capture.
#[derive(Debug, Clone)]
pub struct RawItem {
    pub guid: String,
    pub title: String,
    pub description: String,
    pub content: String,
    pub link: String,
    pub published_ms: i64,
}

/// Parse the common RSS/Atom shape into raw items.
///
/// Missing fields fall back to the empty string; a missing publish date falls
/// back to `now`. Items are ordered newest first and capped at
/// [`MAX_ARTICLES_PER_FEED`].
pub fn parse_items(bytes: &[u8]) -> Result<Vec<RawItem>> {
    let feed = parser::parse(bytes)?;
    let now_ms = Utc::now().timestamp_millis();

    let mut items: Vec<RawItem> = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default();
            let published_ms = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.timestamp_millis())
                .unwrap_or(now_ms);
            let description = entry.summary.map(|s| s.content).unwrap_or_default();
            let content = entry
                .content
                .and_then(|c| c.body)
                .unwrap_or_default();
            let title = entry.title.map(|t| t.content).unwrap_or_default();

            RawItem {
                guid: entry.id,
                title,
                description,
                content,
                link,
                published_ms,
            }
        })
        .collect();

    items.sort_by(|a, b| b.published_ms.cmp(&a.published_ms));
    items.truncate(MAX_ARTICLES_PER_FEED);

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rss_with_items(items: &str) -> String {
        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Wire</title>{}</channel></rss>"#,
            items
        )
    }

    #[test]
    fn test_parse_basic_item() {
        let rss = rss_with_items(
            r#"<item>
                <guid>item-1</guid>
                <title>Fed holds rates steady</title>
                <description>The central bank left its target range unchanged.</description>
                <link>https://example.com/fed-rates</link>
                <pubDate>Tue, 05 Mar 2024 14:00:00 GMT</pubDate>
            </item>"#,
        );

        let items = parse_items(rss.as_bytes()).unwrap();
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.guid, "item-1");
        assert_eq!(item.title, "Fed holds rates steady");
        assert_eq!(item.link, "https://example.com/fed-rates");
        assert!(item.description.contains("target range"));
        assert_eq!(item.published_ms, 1_709_647_200_000);
    }

    #[test]
    fn test_missing_fields_fall_back_to_empty() {
        let rss = rss_with_items("<item><guid>bare</guid></item>");
        let items = parse_items(rss.as_bytes()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "");
        assert_eq!(items[0].link, "");
        assert_eq!(items[0].description, "");
    }

    #[test]
    fn test_missing_pub_date_falls_back_to_now() {
        let before = Utc::now().timestamp_millis();
        let rss = rss_with_items("<item><guid>undated</guid><title>T</title></item>");
        let items = parse_items(rss.as_bytes()).unwrap();
        let after = Utc::now().timestamp_millis();
        assert!(items[0].published_ms >= before && items[0].published_ms <= after);
    }

    #[test]
    fn test_caps_at_most_recent_fifty() {
        let mut body = String::new();
        for i in 0..60 {
            // Day-of-week omitted: RFC 2822 allows it, and it avoids
            // weekday/date consistency rejections in strict parsers
            body.push_str(&format!(
                "<item><guid>i{i}</guid><title>Item {i}</title>\
                 <pubDate>0{} Jan 2024 {:02}:00:00 GMT</pubDate></item>",
                1 + i % 7,
                i % 24,
            ));
        }
        let rss = rss_with_items(&body);
        let items = parse_items(rss.as_bytes()).unwrap();
        assert_eq!(items.len(), MAX_ARTICLES_PER_FEED);
        // Newest first
        assert!(items.windows(2).all(|w| w[0].published_ms >= w[1].published_ms));
    }

    #[test]
    fn test_invalid_xml_is_error() {
        assert!(parse_items(b"<not valid xml").is_err());
    }

    #[test]
    fn test_empty_feed_yields_no_items() {
        let rss = rss_with_items("");
        assert!(parse_items(rss.as_bytes()).unwrap().is_empty());
    }
}
