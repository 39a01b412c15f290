//! Unit tests for NDJSON record output.

use std::time::Duration;

use ctrlpoint_tap::output::write_records;
use ctrlpoint_tap::reader::sink::{ChannelSink, RecordSink};
use ctrlpoint_tap::{AppError, ControlPointRecord};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::timeout;

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn writes_one_json_line_per_record() {
    let (mut sink, rx) = ChannelSink::channel();
    sink.on_record(ControlPointRecord::new(1.5, -2.0, 0.25, 0.8));
    sink.on_record(ControlPointRecord::new(3.0, 4.0, 5.0, 1.0));
    drop(sink);

    let mut out = Vec::new();
    let written = write_records(&mut out, rx).await.expect("output succeeds");
    assert_eq!(written, 2);

    let text = String::from_utf8(out).expect("utf-8 output");
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["x"], 1.5);
    assert_eq!(lines[0]["intensity"], 0.8);
    assert_eq!(lines[1]["z"], 5.0);
    assert!(lines[1]["received_at"].is_string());
}

#[tokio::test]
async fn closed_channel_without_records_writes_nothing() {
    let (sink, rx) = ChannelSink::channel();
    drop(sink);

    let mut out = Vec::new();
    assert_eq!(write_records(&mut out, rx).await.expect("output"), 0);
    assert!(out.is_empty());
}

#[tokio::test]
async fn stalled_output_does_not_block_sink() {
    let (consumer, output) = tokio::io::duplex(64);
    let (mut sink, rx) = ChannelSink::channel();
    let writer = tokio::spawn(write_records(output, rx));

    // Far more than the 64-byte pipe holds; the sink must still return at once.
    for i in 0..1_000 {
        sink.on_record(ControlPointRecord::new(f64::from(i), 0.0, 0.0, 1.0));
    }

    let mut lines = BufReader::new(consumer).lines();
    let first = timeout(TIMEOUT, lines.next_line())
        .await
        .expect("line in time")
        .expect("read")
        .expect("a line");
    let value: serde_json::Value = serde_json::from_str(&first).expect("json line");
    assert_eq!(value["x"], 0.0);

    drop(lines);
    let err = timeout(TIMEOUT, writer)
        .await
        .expect("writer exits")
        .expect("writer task")
        .expect_err("consumer went away");
    assert!(matches!(err, AppError::Io(_)));
}
