// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:    Configuration structs loaded from JSON
// - schema:    Wire messages and shared data types
// - codec:     Newline-delimited JSON framing
// - frontier:  Worker-side frontier, visited set and link budget
// - fetch:     HTTP fetch collaborator
// - parser:    Page parsing collaborator
// - reporter:  Worker → mothership connection
// - worker:    Fetch / parse / report cycle
// - collector: Mothership accept loop and sessions
//
pub mod codec;
pub mod collector;
pub mod config;
pub mod error;
pub mod fetch;
pub mod frontier;
pub mod metrics;
pub mod parser;
pub mod reporter;
pub mod schema;
pub mod util;
pub mod worker;

pub use collector::{ChannelSink, Collector, CollectorHandle, LogSink, RecordSink};
pub use config::{Config, MothershipConfig, RetriesExhausted, WorkerConfig};
pub use error::{FetchError, ProtocolError, TransportError, WorkerError};
pub use frontier::Frontier;
pub use reporter::ResultReporter;
pub use schema::{Envelope, Link, ResultRecord, WorkerMessage};
pub use worker::{CrawlReport, Worker, WorkerState};
