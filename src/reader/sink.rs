//! Record sinks.
//!
//! A sink is the only path by which records leave the reader task. It is
//! invoked on the reader task itself, so implementations must hand records
//! off without blocking.

use tokio::sync::mpsc;
use tracing::debug;

use crate::models::ControlPointRecord;

/// Consumer of parsed control-point records.
pub trait RecordSink: Send {
    /// Accept one record. Must not block or panic.
    fn on_record(&mut self, record: ControlPointRecord);
}

impl<F> RecordSink for F
where
    F: FnMut(ControlPointRecord) + Send,
{
    fn on_record(&mut self, record: ControlPointRecord) {
        self(record);
    }
}

/// Forwards records into an unbounded channel.
///
/// Once the receiver is dropped further records are discarded; this is
/// logged once.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ControlPointRecord>,
    closed: bool,
}

impl ChannelSink {
    /// Wrap the sending half of a channel.
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<ControlPointRecord>) -> Self {
        Self { tx, closed: false }
    }

    /// Create a channel and return the sink with its receiver.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ControlPointRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl RecordSink for ChannelSink {
    fn on_record(&mut self, record: ControlPointRecord) {
        if self.tx.send(record).is_err() && !self.closed {
            self.closed = true;
            debug!("record receiver dropped, discarding further records");
        }
    }
}
