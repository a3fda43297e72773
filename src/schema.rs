use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use chrono::{DateTime, Utc};

/// A crawlable link (URL).
///
/// Links are compared after `util::canonical_link`; beyond that,
/// equality is exact string match.
pub type Link = String;

/// Central message enum exchanged between workers and the mothership.
///
/// The `type` field is added by serde and drives deserialization on
/// the mothership side (e.g. "hello", "page", "fetch_failed", "done").
///
/// DESIGN NOTES:
/// - Every message is self-contained; the collector never needs
///   earlier messages to decode a later one.
/// - `hello` is always the first message of a connection.
///
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Hello(HelloData),
    Page(PageData),
    FetchFailed(FetchFailedData),
    Done(DoneData),
}

impl WorkerMessage {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerMessage::Hello(_) => "hello",
            WorkerMessage::Page(_) => "page",
            WorkerMessage::FetchFailed(_) => "fetch_failed",
            WorkerMessage::Done(_) => "done",
        }
    }
}

// ------------------------------------------------------------
// Frame
// ------------------------------------------------------------
//
// What actually travels on the wire: one message plus the
// worker-side send timestamp. One frame per line.
//
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Frame {
    /// Send timestamp in milliseconds since Unix epoch
    pub sent_at: i64,

    #[serde(flatten)]
    pub message: WorkerMessage,
}

// ------------------------------------------------------------
// Hello (handshake)
// ------------------------------------------------------------
//
// Identifies the issuing worker so that every later record on the
// same connection can be attributed to it.
//
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HelloData {
    /// Worker identifier from configuration
    pub worker_id: String,

    /// The page this worker was launched to process
    pub seed: Link,

    /// Link budget of this worker
    pub max_links: usize,
}

/// One parsed unit of page content.
///
/// Always a triplet. Fields are kept as plain strings; no
/// validation happens on either side of the wire.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub author: String,
    pub content: String,
    pub permalink: String,
}

impl ResultRecord {
    pub fn new(
        author: impl Into<String>,
        content: impl Into<String>,
        permalink: impl Into<String>,
    ) -> Self {
        Self {
            author: author.into(),
            content: content.into(),
            permalink: permalink.into(),
        }
    }
}

/// Snapshot of a worker's frontier bookkeeping.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrontierProgress {
    /// Cumulative admissions (seed included)
    pub admitted: usize,

    /// Admission cap
    pub max_links: usize,

    /// Links still waiting in the frontier
    pub queued: usize,

    /// Links already processed
    pub visited: usize,
}

// ------------------------------------------------------------
// Page results
// ------------------------------------------------------------
//
// Sent once per successfully fetched page, even if the page
// yielded zero records: the progress snapshot is still useful.
//
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PageData {
    /// Link of the processed page
    pub link: Link,

    /// Extracted records (possibly empty)
    pub records: Vec<ResultRecord>,

    /// Pagination continuation, if the page had one
    pub next_page: Option<Link>,

    /// Frontier state after the page's links were admitted
    pub progress: FrontierProgress,
}

// ------------------------------------------------------------
// Fetch failure
// ------------------------------------------------------------
//
// Emitted once per link that exhausted its retries.
//
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FetchFailedData {
    pub link: Link,

    /// Total fetch attempts made (first try included)
    pub attempts: u32,

    /// Last error, rendered as text
    pub error: String,
}

// ------------------------------------------------------------
// Done
// ------------------------------------------------------------
//
// Final summary of a worker's crawl. The connection is closed
// right after it.
//
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DoneData {
    pub pages: usize,
    pub records: usize,
    pub fetch_failures: usize,
}

/// A decoded message as seen by the mothership, tagged with the
/// session it arrived on.
///
/// This is what record sinks receive.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Collector-assigned session id (unique per process)
    pub session_id: u64,

    /// Remote address of the worker connection
    pub remote_addr: SocketAddr,

    /// Worker id announced by `hello`, if any was received yet
    pub worker_id: Option<String>,

    /// When the collector decoded the frame
    pub received_at: DateTime<Utc>,

    /// Worker-side send timestamp
    pub sent_at: i64,

    pub message: WorkerMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_is_flat_and_tagged() {
        let frame = Frame {
            sent_at: 42,
            message: WorkerMessage::FetchFailed(FetchFailedData {
                link: "https://a.test/".into(),
                attempts: 3,
                error: "HTTP 503".into(),
            }),
        };

        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "fetch_failed");
        assert_eq!(value["sent_at"], 42);
        assert_eq!(value["attempts"], 3);
    }

    #[test]
    fn page_message_decodes_from_json() {
        let raw = r#"{
            "type": "page",
            "sent_at": 1,
            "link": "https://a.test/u",
            "records": [{"author": "a", "content": "b", "permalink": "/c"}],
            "next_page": null,
            "progress": {"admitted": 1, "max_links": 5, "queued": 0, "visited": 1}
        }"#;

        let frame: Frame = serde_json::from_str(raw).unwrap();
        match frame.message {
            WorkerMessage::Page(page) => {
                assert_eq!(page.records, vec![ResultRecord::new("a", "b", "/c")]);
                assert_eq!(page.progress.max_links, 5);
            }
            other => panic!("expected page, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let raw = r#"{"type": "bogus", "sent_at": 1}"#;
        assert!(serde_json::from_str::<Frame>(raw).is_err());
    }
}
