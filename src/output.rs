//! NDJSON record output.
//!
//! The reader hands records to a [`ChannelSink`](crate::reader::sink::ChannelSink);
//! [`write_records`] drains the receiving half on its own task so a slow
//! consumer of the output never stalls the pipe.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::models::ControlPointRecord;
use crate::{AppError, Result};

/// One output line: the record plus the time it was written out.
#[derive(Debug, Clone, Serialize)]
pub struct RecordLine {
    /// The parsed record, flattened into the line.
    #[serde(flatten)]
    pub record: ControlPointRecord,
    /// Time the record left the tap.
    pub received_at: DateTime<Utc>,
}

impl RecordLine {
    /// Stamp `record` with the current time.
    #[must_use]
    pub fn now(record: ControlPointRecord) -> Self {
        Self {
            record,
            received_at: Utc::now(),
        }
    }
}

/// Write every record from `records` to `writer` as one JSON line each.
///
/// Returns the number of lines written once the channel closes, which
/// happens when the reader task exits and drops its sink.
///
/// # Errors
///
/// Returns `AppError::Io` if a write fails (for example, the consumer
/// closed the output). Records still queued at that point are dropped.
pub async fn write_records<W>(
    mut writer: W,
    mut records: mpsc::UnboundedReceiver<ControlPointRecord>,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0_u64;

    while let Some(record) = records.recv().await {
        let mut bytes = serde_json::to_vec(&RecordLine::now(record))
            .map_err(|err| AppError::Io(format!("failed to serialise record: {err}")))?;
        bytes.push(b'\n');

        writer
            .write_all(&bytes)
            .await
            .map_err(|err| AppError::Io(format!("record output closed: {err}")))?;
        writer
            .flush()
            .await
            .map_err(|err| AppError::Io(format!("record output closed: {err}")))?;
        written += 1;
    }

    debug!(written, "record channel closed, output finished");
    Ok(written)
}
