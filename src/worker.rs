use std::collections::HashMap;
use std::sync::Arc;

use rand::random_range;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval_at, sleep_until};

use crate::config::{MothershipConfig, RetriesExhausted, WorkerConfig};
use crate::error::{FetchError, TransportError, WorkerError};
use crate::fetch::{FetchedPage, Fetcher};
use crate::frontier::Frontier;
use crate::metrics::{METRICS, incr};
use crate::parser::PageParser;
use crate::reporter::ResultReporter;
use crate::schema::{
    DoneData, FetchFailedData, FrontierProgress, HelloData, Link, PageData, WorkerMessage,
};

/// Upper bound for a single retry delay, whatever the config says.
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(600);

/// Where a worker is in its fetch → parse → report cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Fetching,
    Parsing,
    Reporting,
    Done,
}

/// What a finished crawl did, independent of delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    /// Pages fetched and parsed successfully
    pub pages_crawled: usize,

    pub records_extracted: usize,

    /// Links given up on after exhausting retries
    pub fetch_failures: usize,

    /// Messages the reporter delivered (handshake included)
    pub messages_sent: usize,

    /// Messages the reporter could not deliver
    pub send_failures: usize,

    /// Frontier state at the end of the crawl
    pub progress: FrontierProgress,

    /// Every link marked visited, sorted
    pub visited: Vec<Link>,
}

/// ============================================================
/// Worker
/// ============================================================
///
/// Drives one crawl, from the seed until the frontier is empty.
///
/// Responsibilities:
/// - Process the seed, then the frontier in FIFO order
/// - Retry failed fetches a bounded number of times
/// - Feed pagination links back into the frontier
/// - Report every page to the mothership
///
/// GUARANTEES:
/// - Reporting failures never stop the crawl
/// - Fetch failures never stop the crawl
/// - The frontier is touched only from this struct
///
pub struct Worker {
    config: WorkerConfig,
    frontier: Frontier,
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<dyn PageParser>,
    reporter: ResultReporter,
    state: WorkerState,
    seed_taken: bool,
    failures: HashMap<Link, u32>,
    retry_at: HashMap<Link, Instant>,
    pages_crawled: usize,
    records_extracted: usize,
    fetch_failures: usize,
    first_undelivered: Option<TransportError>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        fetcher: Arc<dyn Fetcher>,
        parser: Arc<dyn PageParser>,
        reporter: ResultReporter,
    ) -> Self {
        let frontier = Frontier::new(&config.seed, config.max_links);
        Self {
            config,
            frontier,
            fetcher,
            parser,
            reporter,
            state: WorkerState::Idle,
            seed_taken: false,
            failures: HashMap::new(),
            retry_at: HashMap::new(),
            pages_crawled: 0,
            records_extracted: 0,
            fetch_failures: 0,
            first_undelivered: None,
        }
    }

    /// Builds a worker whose reporter is connected to the mothership
    /// (or runs in demo mode when the config asks for it).
    pub async fn connect(
        config: WorkerConfig,
        mothership: &MothershipConfig,
        fetcher: Arc<dyn Fetcher>,
        parser: Arc<dyn PageParser>,
        debug: bool,
    ) -> Self {
        let reporter = if config.is_demo() {
            ResultReporter::demo(debug)
        } else {
            let hello = HelloData {
                worker_id: config.worker_id.clone(),
                seed: config.seed.clone(),
                max_links: config.max_links,
            };
            ResultReporter::connect(&mothership.address(), hello, mothership.buffer_size, debug)
                .await
                .with_keepalive(mothership.idle_timeout() / 2)
        };
        Self::new(config, fetcher, parser, reporter)
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    /// Runs the crawl to completion.
    ///
    /// RETURNS:
    /// - `Ok(report)` when every message reached the mothership
    /// - `Err(WorkerError::Undelivered)` when the crawl finished but
    ///   at least one message was lost; the report is inside
    pub async fn run(&mut self) -> Result<CrawlReport, WorkerError> {
        log::info!(
            "worker {} starting at {} (max_links={})",
            self.config.worker_id,
            self.frontier.seed(),
            self.config.max_links
        );

        loop {
            self.set_state(WorkerState::Fetching);
            let Some(link) = self.next_link() else {
                break;
            };

            let page = match self.fetch(&link).await {
                Ok(page) => page,
                Err(e) => {
                    self.handle_fetch_failure(link, e).await;
                    self.set_state(WorkerState::Idle);
                    continue;
                }
            };

            self.set_state(WorkerState::Parsing);
            let parsed = self.parser.parse(&page.body);
            self.frontier.mark_visited(&link);
            self.failures.remove(&link);
            self.retry_at.remove(&link);

            if let Some(next) = &parsed.next_page {
                self.frontier.add_links([next]);
            }
            self.frontier.add_links(&parsed.links);

            self.pages_crawled += 1;
            self.records_extracted += parsed.records.len();
            incr(&METRICS.pages_fetched);
            METRICS
                .records_extracted
                .fetch_add(parsed.records.len(), std::sync::atomic::Ordering::Relaxed);
            log::info!(
                "crawled {} ({} records, {} queued, {}/{} admitted)",
                link,
                parsed.records.len(),
                self.frontier.queued_len(),
                self.frontier.current_count(),
                self.frontier.max_count()
            );

            self.set_state(WorkerState::Reporting);
            let message = WorkerMessage::Page(PageData {
                link,
                records: parsed.records,
                next_page: parsed.next_page,
                progress: self.frontier.progress(),
            });
            self.report(message).await;

            self.set_state(WorkerState::Idle);
        }

        self.set_state(WorkerState::Done);
        self.report(WorkerMessage::Done(DoneData {
            pages: self.pages_crawled,
            records: self.records_extracted,
            fetch_failures: self.fetch_failures,
        }))
        .await;
        self.reporter.close().await;

        let report = self.report_snapshot();
        log::info!(
            "worker {} done: {} pages, {} records, {} fetch failures, {} sent, {} unsent",
            self.config.worker_id,
            report.pages_crawled,
            report.records_extracted,
            report.fetch_failures,
            report.messages_sent,
            report.send_failures
        );

        match self.first_undelivered.take() {
            None => Ok(report),
            Some(source) => Err(WorkerError::Undelivered {
                report: Box::new(report),
                source,
            }),
        }
    }

    fn set_state(&mut self, state: WorkerState) {
        if self.state != state {
            log::trace!("worker state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// The seed first, then the frontier head.
    fn next_link(&mut self) -> Option<Link> {
        if !self.seed_taken {
            self.seed_taken = true;
            return Some(self.frontier.seed().to_string());
        }
        self.frontier.take_next()
    }

    /// Waits out any retry delay, then fetches. Heartbeats go to the
    /// mothership meanwhile so a slow fetch does not idle the
    /// connection out.
    async fn fetch(&mut self, link: &str) -> Result<FetchedPage, FetchError> {
        let fetcher = self.fetcher.clone();
        let retry_at = self.retry_at.get(link).copied();
        let fetch = async move {
            if let Some(at) = retry_at {
                sleep_until(at).await;
            }
            fetcher.fetch(link).await
        };
        tokio::pin!(fetch);

        let every = self.reporter.keepalive_interval();
        let first_tick = Instant::now()
            .checked_add(every)
            .filter(|_| !every.is_zero());
        let page = if let Some(first_tick) = first_tick {
            let mut ticks = interval_at(first_tick, every);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    page = &mut fetch => break page?,
                    _ = ticks.tick() => self.reporter.keepalive().await,
                }
            }
        } else {
            fetch.await?
        };

        if !page.is_success() {
            return Err(FetchError::Status(page.status));
        }
        Ok(page)
    }

    async fn handle_fetch_failure(&mut self, link: Link, err: FetchError) {
        let failures = {
            let entry = self.failures.entry(link.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        if failures <= self.config.fetch_retries && self.frontier.requeue(&link) {
            let delay = self.backoff(failures);
            log::warn!(
                "fetch {} failed ({}), retry {}/{} in {:?}",
                link,
                err,
                failures,
                self.config.fetch_retries,
                delay
            );
            self.retry_at.insert(link, Instant::now() + delay);
            return;
        }

        log::error!("giving up on {} after {} attempts: {}", link, failures, err);
        match self.config.on_retries_exhausted {
            RetriesExhausted::MarkVisited => self.frontier.mark_visited(&link),
            RetriesExhausted::Release => self.frontier.release(&link),
        }
        self.failures.remove(&link);
        self.retry_at.remove(&link);
        self.fetch_failures += 1;
        incr(&METRICS.fetch_failures);

        self.report(WorkerMessage::FetchFailed(FetchFailedData {
            link,
            attempts: failures,
            error: err.to_string(),
        }))
        .await;
    }

    /// Linear back-off with up to 50% random jitter, capped at
    /// `MAX_RETRY_BACKOFF`.
    fn backoff(&self, failures: u32) -> Duration {
        let base_ms = self
            .config
            .retry_backoff_ms
            .saturating_mul(u64::from(failures));
        let base = Duration::from_millis(base_ms).min(MAX_RETRY_BACKOFF);
        let jitter_ms = (base.as_millis() / 2) as u64;
        if jitter_ms == 0 {
            return base;
        }
        (base + Duration::from_millis(random_range(0..=jitter_ms))).min(MAX_RETRY_BACKOFF)
    }

    async fn report(&mut self, message: WorkerMessage) {
        let kind = message.kind();
        if let Err(e) = self.reporter.send(message).await {
            log::warn!("could not report {}: {}", kind, e);
            if self.first_undelivered.is_none() {
                self.first_undelivered = Some(e);
            }
        }
    }

    fn report_snapshot(&self) -> CrawlReport {
        let mut visited: Vec<Link> = self.frontier.visited().cloned().collect();
        visited.sort();
        CrawlReport {
            pages_crawled: self.pages_crawled,
            records_extracted: self.records_extracted,
            fetch_failures: self.fetch_failures,
            messages_sent: self.reporter.sent(),
            send_failures: self.reporter.failed(),
            progress: self.frontier.progress(),
            visited,
        }
    }
}
