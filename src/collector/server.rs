use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::Utc;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::{Duration, Instant, sleep, sleep_until};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use crate::codec::FrameCodec;
use crate::collector::session::{SessionEnd, SessionRegistry, WorkerSession};
use crate::collector::sink::RecordSink;
use crate::config::MothershipConfig;
use crate::error::{FrameError, TransportError};
use crate::metrics::{METRICS, incr};
use crate::schema::{Envelope, WorkerMessage};

/// Pause after a failed `accept()` (e.g. out of file descriptors).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Per-connection settings shared by all handling tasks.
struct ConnectionContext {
    max_frame: usize,
    idle_timeout: Duration,
    debug: bool,
    sink: Arc<dyn RecordSink>,
    sessions: SessionRegistry,
    shutdown: CancellationToken,
}

/// Cloneable control surface of a running collector.
#[derive(Clone)]
pub struct CollectorHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    sessions: SessionRegistry,
}

impl CollectorHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Request graceful shutdown. Idempotent.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Token cancelled by `stop()`; lets embedders tie other tasks to
    /// the collector's lifetime.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.len().await
    }
}

/// ============================================================
/// Collector
/// ============================================================
///
/// Accepts worker connections and decodes their messages.
///
/// DESIGN:
/// - One task per accepted connection
/// - One reader per connection: per-connection order is preserved
/// - No ordering across connections
/// - A slow or broken worker only affects its own task
///
/// SHUTDOWN:
/// - Cooperative, through a `CancellationToken`
/// - Checked before each accept and each read, and raced against both
///   and against the sink, so neither an idle peer nor a stalled sink
///   can hold shutdown hostage
///
/// IDLE TIMEOUT:
/// - Counts from the last byte received; heartbeat lines reset it
///
/// TODO:
/// - Bound the number of connection tasks (semaphore) if worker counts grow
///
pub struct Collector {
    listener: TcpListener,
    ctx: Arc<ConnectionContext>,
}

impl Collector {
    /// Binds the listening socket.
    pub async fn bind(
        config: &MothershipConfig,
        sink: Arc<dyn RecordSink>,
        debug: bool,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.address()).await?;
        Self::from_listener(listener, config, sink, debug)
    }

    /// Wraps an already bound listener.
    pub fn from_listener(
        listener: TcpListener,
        config: &MothershipConfig,
        sink: Arc<dyn RecordSink>,
        debug: bool,
    ) -> Result<Self, TransportError> {
        log::info!("mothership listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            ctx: Arc::new(ConnectionContext {
                max_frame: config.buffer_size,
                idle_timeout: config.idle_timeout(),
                debug,
                sink,
                sessions: SessionRegistry::default(),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for stopping the collector and inspecting sessions.
    pub fn handle(&self) -> Result<CollectorHandle, TransportError> {
        Ok(CollectorHandle {
            local_addr: self.local_addr()?,
            shutdown: self.ctx.shutdown.clone(),
            sessions: self.ctx.sessions.clone(),
        })
    }

    /// Accept loop. Returns once shutdown was requested and every
    /// connection task has finished.
    pub async fn run(self) -> Result<(), TransportError> {
        let mut tasks = JoinSet::new();
        let mut next_id: u64 = 0;

        loop {
            if self.ctx.shutdown.is_cancelled() {
                break;
            }

            let accepted = tokio::select! {
                _ = self.ctx.shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, remote_addr)) => {
                    next_id += 1;
                    incr(&METRICS.connections_accepted);
                    log::info!("[{}] connection received from {}", next_id, remote_addr);

                    let ctx = self.ctx.clone();
                    tasks.spawn(serve_connection(next_id, stream, remote_addr, ctx));
                }
                Err(e) => {
                    log::warn!("accept failed: {}", e);
                    sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }

            // Reap finished connection tasks
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    log::error!("connection task panicked: {}", e);
                }
            }
        }

        log::info!("mothership stopping; waiting for {} connections", tasks.len());
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                log::error!("connection task panicked: {}", e);
            }
        }
        log::info!("mothership stopped");
        Ok(())
    }
}

/// Read side of a connection that remembers when bytes last arrived.
///
/// The idle timer is measured against this, so a frame trickling in
/// slowly, or a heartbeat line, keeps the connection alive.
struct ActivityReader<R> {
    inner: R,
    last_read: Instant,
}

impl<R> ActivityReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            last_read: Instant::now(),
        }
    }

    fn last_read(&self) -> Instant {
        self.last_read
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ActivityReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if matches!(poll, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            self.last_read = Instant::now();
        }
        poll
    }
}

/// Runs one connection from accept to close.
async fn serve_connection(
    id: u64,
    stream: TcpStream,
    remote_addr: SocketAddr,
    ctx: Arc<ConnectionContext>,
) {
    ctx.sessions.insert(WorkerSession::new(id, remote_addr)).await;
    METRICS
        .connections_active
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    let end = read_frames(id, stream, remote_addr, &ctx).await;

    match &end {
        SessionEnd::Protocol(_) => incr(&METRICS.protocol_errors),
        SessionEnd::TimedOut => incr(&METRICS.idle_timeouts),
        _ => {}
    }
    METRICS
        .connections_active
        .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);

    if let Some(session) = ctx.sessions.remove(id).await {
        ctx.sink.session_closed(&session, &end).await;
    }
}

/// Listening loop: decode frames until the peer goes away, misbehaves,
/// idles out, or the mothership shuts down. Dropping the stream on
/// return closes the connection.
async fn read_frames(
    id: u64,
    stream: TcpStream,
    remote_addr: SocketAddr,
    ctx: &ConnectionContext,
) -> SessionEnd {
    let mut frames = FramedRead::new(ActivityReader::new(stream), FrameCodec::new(ctx.max_frame));

    loop {
        if ctx.shutdown.is_cancelled() {
            return SessionEnd::Cancelled;
        }

        // Idle means no bytes at all for `idle_timeout`, not "no complete
        // frame". `frames.next()` is cancel safe, so losing the race to the
        // timer only re-checks the deadline.
        let deadline = frames.get_ref().last_read() + ctx.idle_timeout;
        let next = tokio::select! {
            _ = ctx.shutdown.cancelled() => return SessionEnd::Cancelled,
            _ = sleep_until(deadline) => {
                if frames.get_ref().last_read() + ctx.idle_timeout <= Instant::now() {
                    return SessionEnd::TimedOut;
                }
                continue;
            }
            next = frames.next() => next,
        };

        let frame = match next {
            None => return SessionEnd::Closed,
            Some(Err(FrameError::Protocol(e))) => {
                log::warn!("[{}] dropping {}: {}", id, remote_addr, e);
                return SessionEnd::Protocol(e.to_string());
            }
            Some(Err(FrameError::Io(e))) => return SessionEnd::Transport(e.to_string()),
            Some(Ok(frame)) => frame,
        };

        incr(&METRICS.messages_decoded);
        if ctx.debug {
            log::debug!("[{}] [RECV] {}", id, frame.message.kind());
        }

        let announced = match &frame.message {
            WorkerMessage::Hello(hello) => Some(hello.worker_id.as_str()),
            _ => None,
        };
        let worker_id = ctx.sessions.touch(id, announced).await;

        let envelope = Envelope {
            session_id: id,
            remote_addr,
            worker_id,
            received_at: Utc::now(),
            sent_at: frame.sent_at,
            message: frame.message,
        };

        // A stalled sink must not hold shutdown hostage either.
        tokio::select! {
            _ = ctx.shutdown.cancelled() => return SessionEnd::Cancelled,
            _ = ctx.sink.accept(envelope) => {}
        }
    }
}
