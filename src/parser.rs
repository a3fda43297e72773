//! Page parsing collaborator.
//!
//! Parsing is best effort: malformed input yields an empty page, never an
//! error. Site-specific extraction lives behind `PageParser`.

use serde::Deserialize;

use crate::schema::{Link, ResultRecord};

/// What one page yielded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPage {
    /// Extracted records (zero or more)
    pub records: Vec<ResultRecord>,

    /// Pagination continuation
    pub next_page: Option<Link>,

    /// Other links worth crawling, offered to the frontier
    pub links: Vec<Link>,
}

/// Turns a fetched body into records and follow-up links.
///
/// IMPORTANT:
/// - This function must NEVER panic
/// - Invalid bodies must produce `ParsedPage::default()`
pub trait PageParser: Send + Sync {
    fn parse(&self, body: &[u8]) -> ParsedPage;
}

// ------------------------------------------------------------
// Listing parser
// ------------------------------------------------------------
//
// Parses a JSON listing of the shape
//
//   { "data": { "after": "t1_x", "children": [ { "data": {
//       "author": "...", "body": "...", "permalink": "..." } } ] } }
//
// Each child becomes one record. `after` becomes the next page
// link: `<base>?after=<token>`.
//

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    after: Option<String>,
    #[serde(default)]
    children: Vec<ListingChild>,
}

#[derive(Deserialize)]
struct ListingChild {
    data: ChildData,
}

#[derive(Deserialize)]
struct ChildData {
    author: Option<String>,
    body: Option<String>,
    title: Option<String>,
    permalink: Option<String>,
}

/// Parser for paginated JSON listings.
#[derive(Debug, Clone)]
pub struct ListingParser {
    base: Link,
}

impl ListingParser {
    /// `base` is the listing URL without query; pagination tokens are
    /// appended to it.
    pub fn new(base: &str) -> Self {
        let base = base.split_once('?').map_or(base, |(head, _)| head);
        Self {
            base: base.to_string(),
        }
    }

    fn next_page_link(&self, after: &str) -> Link {
        format!("{}?after={}", self.base, after)
    }
}

impl PageParser for ListingParser {
    fn parse(&self, body: &[u8]) -> ParsedPage {
        let listing: Listing = match serde_json::from_slice(body) {
            Ok(listing) => listing,
            Err(e) => {
                log::debug!("listing not parseable: {}", e);
                return ParsedPage::default();
            }
        };

        let records = listing
            .data
            .children
            .into_iter()
            .filter_map(|child| {
                let d = child.data;
                let content = d.body.or(d.title)?;
                Some(ResultRecord::new(
                    d.author.unwrap_or_default(),
                    content,
                    d.permalink.unwrap_or_default(),
                ))
            })
            .collect();

        let next_page = listing
            .data
            .after
            .filter(|after| !after.is_empty())
            .map(|after| self.next_page_link(&after));

        ParsedPage {
            records,
            next_page,
            links: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "kind": "Listing",
        "data": {
            "after": "t1_def",
            "children": [
                {"kind": "t1", "data": {"author": "Chrikelnel", "body": "first", "permalink": "/r/x/1"}},
                {"kind": "t3", "data": {"author": "Chrikelnel", "title": "a post", "permalink": "/r/x/2"}},
                {"kind": "more", "data": {"count": 3}}
            ]
        }
    }"#;

    #[test]
    fn records_are_triplets() {
        let parser = ListingParser::new("https://www.reddit.com/user/Chrikelnel.json");
        let page = parser.parse(SAMPLE.as_bytes());

        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0], ResultRecord::new("Chrikelnel", "first", "/r/x/1"));
        assert_eq!(page.records[1].content, "a post");
    }

    #[test]
    fn after_token_becomes_next_page() {
        let parser = ListingParser::new("https://www.reddit.com/user/Chrikelnel.json?after=t1_abc");
        let page = parser.parse(SAMPLE.as_bytes());
        assert_eq!(
            page.next_page.as_deref(),
            Some("https://www.reddit.com/user/Chrikelnel.json?after=t1_def")
        );
    }

    #[test]
    fn malformed_body_is_empty_not_error() {
        let parser = ListingParser::new("https://a.test/");
        assert_eq!(parser.parse(b"<html>nope</html>"), ParsedPage::default());
        assert_eq!(parser.parse(br#"{"data": {"after": null}}"#), ParsedPage::default());
    }
}
