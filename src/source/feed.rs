//! Minimal Atom feed reader for the arXiv query API.
//!
//! Only the elements arXiv emits are extracted: entry id, title, summary,
//! dates, authors, links, categories, `arxiv:primary_category`,
//! `arxiv:comment` and the feed-level `opensearch:totalResults`. Namespace
//! prefixes are ignored; elements are matched by local name.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use thiserror::Error;

/// A feed that could not be parsed.
#[derive(Debug, Error)]
#[error("malformed Atom feed at byte {position}: {message}")]
pub struct FeedError {
    position: u64,
    message: String,
}

/// `<link>` element of an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedLink {
    pub href: String,
    pub rel: Option<String>,
    pub title: Option<String>,
    pub link_type: Option<String>,
}

/// One `<entry>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedEntry {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub published: Option<String>,
    pub updated: Option<String>,
    pub authors: Vec<String>,
    pub links: Vec<FeedLink>,
    pub categories: Vec<String>,
    pub primary_category: Option<String>,
    pub comment: Option<String>,
}

/// A parsed feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AtomFeed {
    pub entries: Vec<FeedEntry>,
    /// `opensearch:totalResults`, when present.
    pub total_results: Option<u64>,
}

/// Parses an Atom document.
///
/// # Errors
///
/// Returns [`FeedError`] when the XML is not well formed.
pub fn parse_atom_feed(xml: &str) -> Result<AtomFeed, FeedError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut feed = AtomFeed::default();
    let mut path: Vec<String> = Vec::new();
    let mut entry: Option<FeedEntry> = None;
    let mut author_name = String::new();
    let mut text = String::new();

    loop {
        let event = reader.read_event().map_err(|e| FeedError {
            position: u64::try_from(reader.buffer_position()).unwrap_or_default(),
            message: e.to_string(),
        })?;

        match event {
            Event::Start(start) => {
                let name = local_name(&start);
                if name == "entry" {
                    entry = Some(FeedEntry::default());
                } else if let Some(entry) = entry.as_mut() {
                    apply_attributes(entry, &name, &start);
                }
                if name == "author" {
                    author_name.clear();
                }
                path.push(name);
                text.clear();
            }
            Event::Empty(start) => {
                let name = local_name(&start);
                if let Some(entry) = entry.as_mut() {
                    apply_attributes(entry, &name, &start);
                }
            }
            Event::Text(t) => {
                let unescaped = t.unescape().map_err(|e| FeedError {
                    position: u64::try_from(reader.buffer_position()).unwrap_or_default(),
                    message: e.to_string(),
                })?;
                text.push_str(&unescaped);
            }
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c)),
            Event::End(_) => {
                let Some(name) = path.pop() else { continue };
                let parent = path.last().map(String::as_str);
                let value = std::mem::take(&mut text);

                if name == "entry" {
                    if let Some(done) = entry.take() {
                        feed.entries.push(done);
                    }
                    continue;
                }

                match (entry.as_mut(), name.as_str(), parent) {
                    (Some(entry), "id", Some("entry")) => entry.id = value.trim().to_string(),
                    (Some(entry), "title", Some("entry")) => entry.title = value,
                    (Some(entry), "summary", Some("entry")) => entry.summary = value,
                    (Some(entry), "published", Some("entry")) => entry.published = Some(value),
                    (Some(entry), "updated", Some("entry")) => entry.updated = Some(value),
                    (Some(entry), "comment", Some("entry")) => entry.comment = Some(value),
                    (Some(_), "name", Some("author")) => author_name = value,
                    (Some(entry), "author", _) => {
                        let name = std::mem::take(&mut author_name);
                        if !name.trim().is_empty() {
                            entry.authors.push(name.trim().to_string());
                        }
                    }
                    (None, "totalResults", _) => feed.total_results = value.trim().parse().ok(),
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(feed)
}

fn local_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

fn attribute(start: &BytesStart<'_>, key: &str) -> Option<String> {
    start
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == key.as_bytes())
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
}

fn apply_attributes(entry: &mut FeedEntry, name: &str, start: &BytesStart<'_>) {
    match name {
        "link" => {
            if let Some(href) = attribute(start, "href") {
                entry.links.push(FeedLink {
                    href,
                    rel: attribute(start, "rel"),
                    title: attribute(start, "title"),
                    link_type: attribute(start, "type"),
                });
            }
        }
        "category" => {
            if let Some(term) = attribute(start, "term") {
                entry.categories.push(term);
            }
        }
        "primary_category" => entry.primary_category = attribute(start, "term"),
        _ => {}
    }
}
