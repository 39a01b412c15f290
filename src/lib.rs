#![forbid(unsafe_code)]

//! Named-pipe log tap for control-point telemetry.
//!
//! Creates a pipe endpoint, optionally launches the monitored executable
//! with its logger pointed at the endpoint, and turns the executable's log
//! lines into [`ControlPointRecord`]s delivered to a [`RecordSink`].

pub mod config;
pub mod errors;
pub mod launch;
pub mod models;
pub mod output;
pub mod parser;
pub mod reader;
pub mod session;
pub mod transport;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use models::ControlPointRecord;
pub use parser::RecordParser;
pub use reader::sink::RecordSink;
pub use reader::{LogReader, LogReaderHandle, ReaderState, ReaderSummary, RetryPolicy};
pub use transport::{create_endpoint, PipeEndpoint, PipeTransport, ReadOutcome};
