//! RSS 2.0 extraction, including the Dublin Core `creator` and Media RSS
//! enclosure extensions.

use super::parser::{
    attr_of, child_text, parse_length, parse_timestamp, text_of, Context, ParseError, ParsedFeed,
    UNTITLED_ENTRY, UNTITLED_FEED,
};
use super::tree::Element;
use crate::identity::resolve_guid;
use crate::storage::{Enclosure, EntryRecord, FeedMetadata};

/// MIME type assumed for Media RSS assets that do not declare one.
const MEDIA_DEFAULT_TYPE: &str = "image/jpeg";

pub(super) fn extract(root: &Element, ctx: &Context<'_>) -> Result<ParsedFeed, ParseError> {
    let channel = root
        .child("channel")
        .ok_or_else(|| ParseError::Malformed("RSS document has no <channel>".to_string()))?;

    let feed = FeedMetadata {
        url: ctx.feed_url.to_string(),
        title: child_text(channel, "title").unwrap_or(UNTITLED_FEED).to_string(),
        description: Some(child_text(channel, "description").unwrap_or_default().to_string()),
        site_url: Some(child_text(channel, "link").unwrap_or_default().to_string()),
        favicon: channel
            .child("image")
            .and_then(|image| child_text(image, "url"))
            .map(str::to_string),
        last_fetched: Some(ctx.now),
        unread_count: 0,
    };

    let entries = channel
        .children_named("item")
        .map(|item| extract_item(item, ctx))
        .collect();

    Ok(ParsedFeed { feed, entries })
}

fn extract_item(item: &Element, ctx: &Context<'_>) -> EntryRecord {
    let link = child_text(item, "link");
    let pub_date = child_text(item, "pubDate")
        .and_then(parse_timestamp)
        .unwrap_or(ctx.now);

    EntryRecord {
        id: None,
        feed_url: ctx.feed_url.to_string(),
        guid: resolve_guid(child_text(item, "guid"), link, ctx.feed_url, ctx.now),
        title: child_text(item, "title").unwrap_or(UNTITLED_ENTRY).to_string(),
        description: child_text(item, "description")
            .or_else(|| child_text(item, "content:encoded"))
            .unwrap_or_default()
            .to_string(),
        link: link.unwrap_or_default().to_string(),
        pub_date,
        author: author(item),
        categories: categories(item),
        enclosure: enclosure(item),
    }
}

/// `author` (text, or its `name` child), then `dc:creator`.
fn author(item: &Element) -> Option<String> {
    let from_author = item
        .child("author")
        .and_then(|a| text_of(Some(a)).or_else(|| child_text(a, "name")));

    from_author
        .or_else(|| child_text(item, "dc:creator"))
        .map(str::to_string)
}

fn categories(item: &Element) -> Option<Vec<String>> {
    let mut elements = item.children_named("category").peekable();
    elements.peek()?;
    Some(
        elements
            .filter_map(|c| text_of(Some(c)))
            .map(str::to_string)
            .collect(),
    )
}

/// Standard `enclosure`, then the first `media:content`, then the first
/// `media:thumbnail`.
fn enclosure(item: &Element) -> Option<Enclosure> {
    if let Some(standard) = item.child("enclosure") {
        if let Some(url) = attr_of(standard, "url") {
            return Some(Enclosure {
                url: url.to_string(),
                mime_type: attr_of(standard, "type").unwrap_or_default().to_string(),
                length: parse_length(standard.attr("length")),
            });
        }
    }

    if let Some(media) = item.child("media:content") {
        if let Some(url) = attr_of(media, "url") {
            return Some(Enclosure {
                url: url.to_string(),
                mime_type: attr_of(media, "type").unwrap_or(MEDIA_DEFAULT_TYPE).to_string(),
                length: parse_length(media.attr("fileSize")),
            });
        }
    }

    let thumbnail = item.child("media:thumbnail")?;
    attr_of(thumbnail, "url").map(|url| Enclosure {
        url: url.to_string(),
        mime_type: MEDIA_DEFAULT_TYPE.to_string(),
        length: 0,
    })
}

#[cfg(test)]
mod tests {
    use crate::feed::parser::{parse_feed, ParsedFeed};
    use crate::storage::Enclosure;
    use crate::util::FixedClock;
    use pretty_assertions::assert_eq;

    const NOW: i64 = 1_700_000_000_000;
    const FEED_URL: &str = "https://example.com/rss";

    fn rss(items: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"
     xmlns:dc="http://purl.org/dc/elements/1.1/"
     xmlns:content="http://purl.org/rss/1.0/modules/content/"
     xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>Example</title>
    <link>https://example.com/</link>
    <description>An example feed</description>
    <image><url>https://example.com/icon.png</url><title>Example</title></image>
    {items}
  </channel>
</rss>"#
        )
    }

    fn parse(raw: &str) -> ParsedFeed {
        parse_feed(raw, FEED_URL, &FixedClock::new(NOW)).unwrap()
    }

    #[test]
    fn test_channel_metadata() {
        let parsed = parse(&rss(""));
        assert_eq!(parsed.feed.url, FEED_URL);
        assert_eq!(parsed.feed.title, "Example");
        assert_eq!(parsed.feed.description.as_deref(), Some("An example feed"));
        assert_eq!(parsed.feed.site_url.as_deref(), Some("https://example.com/"));
        assert_eq!(parsed.feed.favicon.as_deref(), Some("https://example.com/icon.png"));
        assert_eq!(parsed.feed.last_fetched, Some(NOW));
        assert!(parsed.entries.is_empty());
    }

    #[test]
    fn test_channel_defaults() {
        let parsed = parse(r#"<rss version="2.0"><channel/></rss>"#);
        assert_eq!(parsed.feed.title, "Untitled Feed");
        assert_eq!(parsed.feed.description.as_deref(), Some(""));
        assert_eq!(parsed.feed.site_url.as_deref(), Some(""));
        assert_eq!(parsed.feed.favicon, None);
    }

    #[test]
    fn test_single_and_many_items() {
        let one = parse(&rss("<item><guid>a</guid></item>"));
        assert_eq!(one.entries.len(), 1);

        let many = parse(&rss(
            "<item><guid>a</guid></item><item><guid>b</guid></item><item><guid>c</guid></item>",
        ));
        let guids: Vec<_> = many.entries.iter().map(|e| e.guid.as_str()).collect();
        assert_eq!(guids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_item_fields() {
        let parsed = parse(&rss(
            r#"<item>
                <title>First</title>
                <link>https://example.com/1</link>
                <description><![CDATA[<p>Body</p>]]></description>
                <guid isPermaLink="false">guid-1</guid>
                <pubDate>Mon, 15 Jan 2024 10:00:00 GMT</pubDate>
                <author>alice@example.com</author>
                <category>rust</category>
                <category>feeds</category>
            </item>"#,
        ));
        let entry = &parsed.entries[0];
        assert_eq!(entry.id, None);
        assert_eq!(entry.feed_url, FEED_URL);
        assert_eq!(entry.guid, "guid-1");
        assert_eq!(entry.title, "First");
        assert_eq!(entry.description, "<p>Body</p>");
        assert_eq!(entry.link, "https://example.com/1");
        assert_eq!(entry.pub_date, 1_705_312_800_000);
        assert_eq!(entry.author.as_deref(), Some("alice@example.com"));
        assert_eq!(
            entry.categories,
            Some(vec!["rust".to_string(), "feeds".to_string()])
        );
        assert_eq!(entry.enclosure, None);
    }

    #[test]
    fn test_item_defaults() {
        let parsed = parse(&rss("<item><link>https://example.com/x</link></item>"));
        let entry = &parsed.entries[0];
        assert_eq!(entry.title, "Untitled");
        assert_eq!(entry.description, "");
        assert_eq!(entry.author, None);
        assert_eq!(entry.categories, None);
        assert_eq!(entry.pub_date, NOW);
    }

    #[test]
    fn test_unparseable_date_falls_back_to_now() {
        let parsed = parse(&rss("<item><guid>a</guid><pubDate>not a date</pubDate></item>"));
        assert_eq!(parsed.entries[0].pub_date, NOW);
    }

    #[test]
    fn test_single_category_is_singleton() {
        let parsed = parse(&rss("<item><guid>a</guid><category>only</category></item>"));
        assert_eq!(parsed.entries[0].categories, Some(vec!["only".to_string()]));
    }

    #[test]
    fn test_description_falls_back_to_content_encoded() {
        let parsed = parse(&rss(
            "<item><guid>a</guid><content:encoded><![CDATA[<b>full</b>]]></content:encoded></item>",
        ));
        assert_eq!(parsed.entries[0].description, "<b>full</b>");
    }

    #[test]
    fn test_guid_falls_back_to_link() {
        let parsed = parse(&rss("<item><link>https://example.com/post</link></item>"));
        assert_eq!(parsed.entries[0].guid, "https://example.com/post");
    }

    #[test]
    fn test_guid_synthesized_without_guid_or_link() {
        let parsed = parse(&rss("<item><title>a</title></item><item><title>b</title></item>"));
        let prefix = format!("{FEED_URL}-{NOW}-");
        assert!(parsed.entries[0].guid.starts_with(&prefix));
        assert!(parsed.entries[1].guid.starts_with(&prefix));
        assert_ne!(parsed.entries[0].guid, parsed.entries[1].guid);
    }

    #[test]
    fn test_author_name_child_and_dc_creator() {
        let parsed = parse(&rss(
            r#"<item><guid>a</guid><author><name>Bob</name></author></item>
               <item><guid>b</guid><dc:creator>Carol</dc:creator></item>
               <item><guid>c</guid><author>Dan</author><dc:creator>Erin</dc:creator></item>"#,
        ));
        let authors: Vec<_> = parsed.entries.iter().map(|e| e.author.as_deref()).collect();
        assert_eq!(authors, vec![Some("Bob"), Some("Carol"), Some("Dan")]);
    }

    #[test]
    fn test_standard_enclosure_wins_over_media() {
        let parsed = parse(&rss(
            r#"<item><guid>a</guid>
                <enclosure url="https://cdn.example.com/ep.mp3" type="audio/mpeg" length="1234"/>
                <media:content url="https://cdn.example.com/img.png" type="image/png"/>
            </item>"#,
        ));
        assert_eq!(
            parsed.entries[0].enclosure,
            Some(Enclosure {
                url: "https://cdn.example.com/ep.mp3".into(),
                mime_type: "audio/mpeg".into(),
                length: 1234,
            })
        );
    }

    #[test]
    fn test_media_content_defaults() {
        let parsed = parse(&rss(
            r#"<item><guid>a</guid>
                <media:content url="https://cdn.example.com/1.jpg" fileSize="99"/>
                <media:content url="https://cdn.example.com/2.jpg"/>
            </item>"#,
        ));
        assert_eq!(
            parsed.entries[0].enclosure,
            Some(Enclosure {
                url: "https://cdn.example.com/1.jpg".into(),
                mime_type: "image/jpeg".into(),
                length: 99,
            })
        );
    }

    #[test]
    fn test_media_thumbnail_only() {
        let parsed = parse(&rss(
            r#"<item><guid>a</guid><media:thumbnail url="https://cdn.example.com/t.png"/></item>"#,
        ));
        assert_eq!(
            parsed.entries[0].enclosure,
            Some(Enclosure {
                url: "https://cdn.example.com/t.png".into(),
                mime_type: "image/jpeg".into(),
                length: 0,
            })
        );
    }

    #[test]
    fn test_enclosure_missing_type_and_length() {
        let parsed = parse(&rss(
            r#"<item><guid>a</guid><enclosure url="https://cdn.example.com/x" length="n/a"/></item>"#,
        ));
        let enclosure = parsed.entries[0].enclosure.clone().unwrap();
        assert_eq!(enclosure.mime_type, "");
        assert_eq!(enclosure.length, 0);
    }
}
