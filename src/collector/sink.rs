use tokio::sync::mpsc;

use crate::collector::session::{SessionEnd, WorkerSession};
use crate::schema::{Envelope, WorkerMessage};

/// Where decoded worker messages go.
///
/// This is the persistence extension point of the mothership: the
/// collector only decodes and attributes; sinks decide what to keep.
///
/// CONTRACT:
/// - `accept` is called once per decoded frame, in the order frames
///   arrived on that connection
/// - Calls for different connections may run concurrently
/// - Must never panic
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - One sink instance is shared across all connection tasks
#[async_trait::async_trait]
pub trait RecordSink: Send + Sync {
    async fn accept(&self, envelope: Envelope);

    /// Called once when a connection's handling task ends.
    async fn session_closed(&self, _session: &WorkerSession, _end: &SessionEnd) {}
}

/// Default sink: logs every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait::async_trait]
impl RecordSink for LogSink {
    async fn accept(&self, envelope: Envelope) {
        let worker = envelope.worker_id.as_deref().unwrap_or("?");
        match &envelope.message {
            WorkerMessage::Hello(hello) => log::info!(
                "[{}] worker {} from {} seed={} max_links={}",
                envelope.session_id,
                hello.worker_id,
                envelope.remote_addr,
                hello.seed,
                hello.max_links
            ),
            WorkerMessage::Page(page) => {
                log::info!(
                    "[{}] {} page {} records={} admitted={}/{} queued={}",
                    envelope.session_id,
                    worker,
                    page.link,
                    page.records.len(),
                    page.progress.admitted,
                    page.progress.max_links,
                    page.progress.queued
                );
                for record in &page.records {
                    log::info!(
                        "[{}] {} {} | {} | {}",
                        envelope.session_id,
                        worker,
                        record.author,
                        record.permalink,
                        record.content
                    );
                }
            }
            WorkerMessage::FetchFailed(failed) => log::warn!(
                "[{}] {} could not fetch {} after {} attempts: {}",
                envelope.session_id,
                worker,
                failed.link,
                failed.attempts,
                failed.error
            ),
            WorkerMessage::Done(done) => log::info!(
                "[{}] {} done: pages={} records={} fetch_failures={}",
                envelope.session_id,
                worker,
                done.pages,
                done.records,
                done.fetch_failures
            ),
        }
    }

    async fn session_closed(&self, session: &WorkerSession, end: &SessionEnd) {
        log::info!(
            "[{}] connection from {} ended after {} messages: {}",
            session.id,
            session.remote_addr,
            session.messages,
            end
        );
    }
}

/// Forwards every envelope into an mpsc channel.
///
/// Backpressure: a full channel blocks the sending connection only.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Envelope>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl RecordSink for ChannelSink {
    async fn accept(&self, envelope: Envelope) {
        if self.tx.send(envelope).await.is_err() {
            log::debug!("channel sink receiver dropped; envelope discarded");
        }
    }
}
