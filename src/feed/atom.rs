//! Atom 1.0 extraction.

use super::parser::{
    attr_of, child_text, parse_length, parse_timestamp, Context, ParsedFeed, UNTITLED_ENTRY,
    UNTITLED_FEED,
};
use super::tree::Element;
use crate::identity::resolve_guid;
use crate::storage::{Enclosure, EntryRecord, FeedMetadata};

pub(super) fn extract(root: &Element, ctx: &Context<'_>) -> ParsedFeed {
    let feed = FeedMetadata {
        url: ctx.feed_url.to_string(),
        title: child_text(root, "title").unwrap_or(UNTITLED_FEED).to_string(),
        description: Some(child_text(root, "subtitle").unwrap_or_default().to_string()),
        site_url: Some(preferred_link(root).unwrap_or_default().to_string()),
        favicon: child_text(root, "icon").map(str::to_string),
        last_fetched: Some(ctx.now),
        unread_count: 0,
    };

    let entries = root
        .children_named("entry")
        .map(|entry| extract_entry(entry, ctx))
        .collect();

    ParsedFeed { feed, entries }
}

fn extract_entry(entry: &Element, ctx: &Context<'_>) -> EntryRecord {
    let link = preferred_link(entry);
    let pub_date = child_text(entry, "published")
        .and_then(parse_timestamp)
        .or_else(|| child_text(entry, "updated").and_then(parse_timestamp))
        .unwrap_or(ctx.now);

    EntryRecord {
        id: None,
        feed_url: ctx.feed_url.to_string(),
        guid: resolve_guid(child_text(entry, "id"), link, ctx.feed_url, ctx.now),
        title: child_text(entry, "title").unwrap_or(UNTITLED_ENTRY).to_string(),
        description: child_text(entry, "content")
            .or_else(|| child_text(entry, "summary"))
            .unwrap_or_default()
            .to_string(),
        link: link.unwrap_or_default().to_string(),
        pub_date,
        author: entry
            .child("author")
            .and_then(|author| child_text(author, "name"))
            .map(str::to_string),
        categories: categories(entry),
        enclosure: enclosure(entry),
    }
}

/// `href` of the `rel="alternate"` link, else of the first link.
fn preferred_link(parent: &Element) -> Option<&str> {
    parent
        .children_named("link")
        .find(|link| link.attr("rel") == Some("alternate"))
        .or_else(|| parent.child("link"))
        .and_then(|link| attr_of(link, "href"))
}

fn categories(entry: &Element) -> Option<Vec<String>> {
    let mut elements = entry.children_named("category").peekable();
    elements.peek()?;
    Some(
        elements
            .filter_map(|c| attr_of(c, "term"))
            .map(str::to_string)
            .collect(),
    )
}

fn enclosure(entry: &Element) -> Option<Enclosure> {
    let link = entry
        .children_named("link")
        .find(|link| link.attr("rel") == Some("enclosure"))?;

    attr_of(link, "href").map(|href| Enclosure {
        url: href.to_string(),
        mime_type: attr_of(link, "type").unwrap_or_default().to_string(),
        length: parse_length(link.attr("length")),
    })
}
