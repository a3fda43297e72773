/// Collector module (mothership side)
///
/// This module groups all logic responsible for:
/// - Accepting worker connections
/// - Decoding framed worker messages
/// - Attributing messages to their worker session
/// - Handing records to a sink
///
/// Design notes:
/// - Site-specific logic MUST NOT live here
/// - Persistence belongs to `RecordSink` implementations
pub mod server;
pub mod session;
pub mod sink;

pub use server::{Collector, CollectorHandle};
pub use session::{SessionEnd, SessionRegistry, WorkerSession};
pub use sink::{ChannelSink, LogSink, RecordSink};
