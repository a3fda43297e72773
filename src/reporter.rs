use std::io;

use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::{Duration, timeout};
use tokio_util::codec::FramedWrite;

use crate::codec::{self, FrameCodec, Heartbeat};
use crate::error::TransportError;
use crate::metrics::{METRICS, incr};
use crate::schema::{Frame, HelloData, WorkerMessage};

/// Upper bound for establishing the mothership connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Heartbeat period when the caller does not set one; half the
/// mothership's default idle timeout.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

enum Channel {
    /// Live connection to the mothership. The read half is only watched
    /// for EOF: the mothership never writes.
    Connected {
        sink: FramedWrite<OwnedWriteHalf, FrameCodec>,
        reader: OwnedReadHalf,
    },

    /// Connection never came up or broke. `cause` is handed out once,
    /// on the first send after the failure.
    Disconnected { cause: Option<TransportError> },

    /// No network at all; messages are logged
    Demo,
}

/// ============================================================
/// ResultReporter
/// ============================================================
///
/// Represents the **single connection** a worker holds to the
/// mothership for its whole lifetime.
///
/// Responsibilities:
/// - Connect once and announce the worker (`hello`)
/// - Frame and send messages in order
/// - Count delivered / failed messages
/// - Keep the connection alive while the worker is busy elsewhere
///   (`keepalive`), and notice when the mothership hung up before
///   writing into a dead socket
///
/// Design constraints:
/// - Must never abort the crawl
/// - Fails fast: no retry, no reconnect
/// - Once broken, stays broken
pub struct ResultReporter {
    channel: Channel,
    keepalive: Duration,
    debug: bool,
    sent: usize,
    failed: usize,
}

impl ResultReporter {
    /// Connects to the mothership and sends the handshake.
    ///
    /// CONTRACT:
    /// - This function never fails
    /// - A connection failure leaves the reporter disconnected; the
    ///   error surfaces on the first `send`
    pub async fn connect(addr: &str, hello: HelloData, max_frame: usize, debug: bool) -> Self {
        let channel = match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    log::debug!("TCP_NODELAY on {}: {}", addr, e);
                }
                let (reader, writer) = stream.into_split();
                Channel::Connected {
                    sink: FramedWrite::new(writer, FrameCodec::new(max_frame)),
                    reader,
                }
            }
            Ok(Err(e)) => {
                log::warn!("mothership unreachable at {}: {}", addr, e);
                Channel::Disconnected {
                    cause: Some(TransportError::Connect {
                        addr: addr.to_string(),
                        source: e,
                    }),
                }
            }
            Err(_) => {
                log::warn!("mothership connect to {} timed out", addr);
                Channel::Disconnected {
                    cause: Some(TransportError::Connect {
                        addr: addr.to_string(),
                        source: std::io::ErrorKind::TimedOut.into(),
                    }),
                }
            }
        };

        let mut reporter = Self {
            channel,
            keepalive: DEFAULT_KEEPALIVE,
            debug,
            sent: 0,
            failed: 0,
        };

        if reporter.is_connected() {
            // A failed handshake is reported on the next send like any
            // other transport failure.
            if let Err(e) = reporter.send(WorkerMessage::Hello(hello)).await {
                log::warn!("handshake with {} failed: {}", addr, e);
                reporter.channel = Channel::Disconnected { cause: Some(e) };
            } else {
                log::info!("connected to mothership at {}", addr);
            }
        }

        reporter
    }

    /// A reporter that never touches the network.
    ///
    /// DEMO MODE:
    /// - Messages are logged
    /// - Every send succeeds
    pub fn demo(debug: bool) -> Self {
        log::warn!("reporter running in DEMO mode");
        Self {
            channel: Channel::Demo,
            keepalive: DEFAULT_KEEPALIVE,
            debug,
            sent: 0,
            failed: 0,
        }
    }

    /// Heartbeat period for callers driving `keepalive`. Keep it below
    /// the mothership's idle timeout; half of it works. Zero disables
    /// heartbeats.
    pub fn with_keepalive(mut self, every: Duration) -> Self {
        self.keepalive = every;
        self
    }

    pub fn keepalive_interval(&self) -> Duration {
        self.keepalive
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.channel, Channel::Connected { .. } | Channel::Demo)
    }

    /// Messages successfully handed to the transport.
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Messages that could not be sent.
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Sends one message.
    ///
    /// Behavior:
    /// - Blocks until the socket accepted the bytes (write + flush)
    /// - On error the connection is dropped; later sends fail fast
    ///   with `TransportError::NotConnected`
    pub async fn send(&mut self, message: WorkerMessage) -> Result<(), TransportError> {
        let result = self.try_send(message).await;
        match &result {
            Ok(()) => {
                self.sent += 1;
                incr(&METRICS.messages_sent);
            }
            Err(_) => {
                self.failed += 1;
                incr(&METRICS.send_errors);
            }
        }
        result
    }

    /// Writes a heartbeat line so the mothership does not idle the
    /// connection out. Not counted as a message.
    ///
    /// A failure here disconnects the reporter; the cause is returned by
    /// the next `send`.
    pub async fn keepalive(&mut self) {
        let Channel::Connected { sink, reader } = &mut self.channel else {
            return;
        };

        let result = match peer_gone(reader).await {
            Some(err) => Err(err),
            None => sink.send(Heartbeat).await.map_err(TransportError::from),
        };

        match result {
            Ok(()) => {
                if self.debug {
                    log::debug!("[SEND] heartbeat");
                }
            }
            Err(e) => {
                log::warn!("mothership heartbeat failed: {}", e);
                self.channel = Channel::Disconnected { cause: Some(e) };
            }
        }
    }

    async fn try_send(&mut self, message: WorkerMessage) -> Result<(), TransportError> {
        let frame = codec::frame(message);

        let result = match &mut self.channel {
            Channel::Demo => {
                let json = codec::encode_frame(&frame).map_err(TransportError::Encode)?;
                log::info!("DEMO -> {}", json);
                return Ok(());
            }
            Channel::Disconnected { cause } => {
                return Err(cause.take().unwrap_or(TransportError::NotConnected));
            }
            Channel::Connected { sink, reader } => {
                if self.debug {
                    log::debug!("[SEND] {}", frame.message.kind());
                }
                match peer_gone(reader).await {
                    Some(err) => Err(err),
                    None => sink.send(&frame).await.map_err(TransportError::from),
                }
            }
        };

        // Oversized frames do not poison the connection.
        if let Err(err) = &result {
            if !matches!(err, TransportError::Encode(_)) {
                self.channel = Channel::Disconnected { cause: None };
            }
        }
        result
    }

    /// Flushes and shuts down the write side. Further sends fail fast.
    pub async fn close(&mut self) {
        if let Channel::Connected { sink, .. } = &mut self.channel {
            if let Err(e) = SinkExt::<&Frame>::close(sink).await {
                log::debug!("closing mothership connection: {}", e);
            }
        }
        if !matches!(self.channel, Channel::Demo) {
            self.channel = Channel::Disconnected { cause: None };
        }
    }
}

/// Whether the mothership has already closed its end.
///
/// A write into a socket whose peer is gone still succeeds locally, so
/// EOF has to be looked for on the read half before writing. Yielding
/// first lets the runtime pick up a pending FIN.
async fn peer_gone(reader: &OwnedReadHalf) -> Option<TransportError> {
    tokio::task::yield_now().await;

    let mut buf = [0u8; 64];
    match reader.try_read(&mut buf) {
        Ok(0) => Some(TransportError::PeerClosed),
        // the mothership does not talk back; ignore stray bytes
        Ok(_) => None,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
        Err(e) => Some(TransportError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DoneData;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    fn hello() -> HelloData {
        HelloData {
            worker_id: "w".into(),
            seed: "https://a.test/".into(),
            max_links: 1,
        }
    }

    fn done() -> WorkerMessage {
        WorkerMessage::Done(DoneData {
            pages: 1,
            records: 0,
            fetch_failures: 0,
        })
    }

    #[tokio::test]
    async fn hello_then_messages_one_per_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            let mut got = Vec::new();
            while let Some(line) = lines.next_line().await.unwrap() {
                got.push(codec::decode_frame(&line).unwrap().message);
            }
            got
        });

        let mut reporter = ResultReporter::connect(&addr, hello(), 4096, false).await;
        assert!(reporter.is_connected());
        reporter.send(done()).await.unwrap();
        reporter.close().await;

        let got = server.await.unwrap();
        assert_eq!(got, vec![WorkerMessage::Hello(hello()), done()]);
        assert_eq!(reporter.sent(), 2);
        assert_eq!(reporter.failed(), 0);
    }

    #[tokio::test]
    async fn unreachable_mothership_fails_fast() {
        // Grab a free port, then release it so nothing listens there.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let mut reporter = ResultReporter::connect(&addr, hello(), 4096, false).await;
        assert!(!reporter.is_connected());

        assert!(matches!(
            reporter.send(done()).await,
            Err(TransportError::Connect { .. })
        ));
        assert!(matches!(
            reporter.send(done()).await,
            Err(TransportError::NotConnected)
        ));
        assert_eq!(reporter.failed(), 2);
        assert_eq!(reporter.sent(), 0);
    }

    #[tokio::test]
    async fn closed_mothership_is_detected_before_writing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        // Read the hello, then hang up the way an idle timeout does.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            lines.next_line().await.unwrap();
        });

        let mut reporter = ResultReporter::connect(&addr, hello(), 4096, false).await;
        server.await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(
            reporter.send(done()).await,
            Err(TransportError::PeerClosed)
        ));
        assert_eq!(reporter.sent(), 1);
        assert_eq!(reporter.failed(), 1);
        assert!(!reporter.is_connected());
    }

    #[tokio::test]
    async fn heartbeat_is_a_blank_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            let mut got = Vec::new();
            while let Some(line) = lines.next_line().await.unwrap() {
                got.push(line);
            }
            got
        });

        let mut reporter = ResultReporter::connect(&addr, hello(), 4096, false)
            .await
            .with_keepalive(Duration::from_millis(100));
        assert_eq!(reporter.keepalive_interval(), Duration::from_millis(100));
        reporter.keepalive().await;
        reporter.send(done()).await.unwrap();
        reporter.close().await;

        let got = server.await.unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(got[1], "");
        // heartbeats are not messages
        assert_eq!(reporter.sent(), 2);
    }

    #[tokio::test]
    async fn failed_heartbeat_surfaces_on_next_send() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            lines.next_line().await.unwrap();
        });

        let mut reporter = ResultReporter::connect(&addr, hello(), 4096, false).await;
        server.await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        reporter.keepalive().await;
        assert!(!reporter.is_connected());
        assert!(matches!(
            reporter.send(done()).await,
            Err(TransportError::PeerClosed)
        ));
    }

    #[tokio::test]
    async fn demo_mode_always_succeeds() {
        let mut reporter = ResultReporter::demo(true);
        reporter.send(done()).await.unwrap();
        assert_eq!(reporter.sent(), 1);
    }
}
