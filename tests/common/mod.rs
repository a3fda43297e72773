#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use mothership::collector::{SessionEnd, WorkerSession};
use mothership::error::FetchError;
use mothership::fetch::{FetchedPage, Fetcher};
use mothership::parser::{PageParser, ParsedPage};
use mothership::schema::Envelope;
use mothership::{Collector, CollectorHandle, MothershipConfig, RecordSink, ResultRecord, TransportError};

/// Everything a collector reports, in arrival order.
#[derive(Debug)]
pub enum Event {
    Record(Envelope),
    Closed(WorkerSession, SessionEnd),
}

pub struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
}

#[async_trait::async_trait]
impl RecordSink for EventSink {
    async fn accept(&self, envelope: Envelope) {
        let _ = self.tx.send(Event::Record(envelope));
    }

    async fn session_closed(&self, session: &WorkerSession, end: &SessionEnd) {
        let _ = self.tx.send(Event::Closed(session.clone(), end.clone()));
    }
}

pub struct Running {
    pub handle: CollectorHandle,
    pub idle_timeout_secs: u64,
    pub events: mpsc::UnboundedReceiver<Event>,
    pub task: JoinHandle<Result<(), TransportError>>,
}

impl Running {
    /// Mothership config pointing at this collector.
    pub fn client_config(&self) -> MothershipConfig {
        let mut config = MothershipConfig::default();
        config.host = "127.0.0.1".into();
        config.port = self.handle.local_addr().port();
        config.idle_timeout_secs = self.idle_timeout_secs;
        config
    }

    pub fn addr(&self) -> String {
        self.handle.local_addr().to_string()
    }

    /// Next event, failing the test after 5 seconds of silence.
    pub async fn next_event(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("collector event within 5s")
            .expect("event channel open")
    }

    /// Next record, skipping session-closed events.
    pub async fn next_record(&mut self) -> Envelope {
        loop {
            if let Event::Record(envelope) = self.next_event().await {
                return envelope;
            }
        }
    }

    /// Next session-closed event, skipping records.
    pub async fn next_closed(&mut self) -> (WorkerSession, SessionEnd) {
        loop {
            if let Event::Closed(session, end) = self.next_event().await {
                return (session, end);
            }
        }
    }

    pub async fn shutdown(self) {
        self.handle.stop();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("collector stops within 5s")
            .expect("collector task joined")
            .expect("collector run ok");
    }
}

/// Starts a collector on an ephemeral loopback port.
pub async fn start_collector(idle_timeout_secs: u64, buffer_size: usize) -> Running {
    let mut config = MothershipConfig::default();
    config.host = "127.0.0.1".into();
    config.port = 0;
    config.idle_timeout_secs = idle_timeout_secs;
    config.buffer_size = buffer_size;

    let (tx, events) = mpsc::unbounded_channel();
    let collector = Collector::bind(&config, Arc::new(EventSink { tx }), true)
        .await
        .expect("collector binds");
    let handle = collector.handle().expect("collector handle");
    let task = tokio::spawn(collector.run());

    Running {
        handle,
        idle_timeout_secs,
        events,
        task,
    }
}

/// Serves canned pages; unknown links fail like an unreachable host.
#[derive(Default)]
pub struct StubFetcher {
    pages: HashMap<String, FetchedPage>,
    calls: Mutex<Vec<String>>,
    delay: Duration,
}

impl StubFetcher {
    pub fn with(mut self, link: &str, status: u16, body: &str) -> Self {
        self.pages.insert(link.to_string(), FetchedPage::new(status, body));
        self
    }

    /// Every fetch takes this long.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, link: &str) -> Result<FetchedPage, FetchError> {
        self.calls.lock().unwrap().push(link.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.pages
            .get(link)
            .cloned()
            .ok_or_else(|| FetchError::Other(format!("no route to {link}")))
    }
}

/// Body format: one directive per line.
/// `rec a|b|c`, `next <link>`, `link <link>`
pub struct LineParser;

impl PageParser for LineParser {
    fn parse(&self, body: &[u8]) -> ParsedPage {
        let mut page = ParsedPage::default();
        for line in String::from_utf8_lossy(body).lines() {
            match line.split_once(' ') {
                Some(("rec", rest)) => {
                    let parts: Vec<&str> = rest.split('|').collect();
                    if let [a, c, p] = parts[..] {
                        page.records.push(ResultRecord::new(a, c, p));
                    }
                }
                Some(("next", link)) => page.next_page = Some(link.to_string()),
                Some(("link", link)) => page.links.push(link.to_string()),
                _ => {}
            }
        }
        page
    }
}

/// An address with nothing listening on it.
pub async fn dead_address() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}
