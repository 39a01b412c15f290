//! Integration tests for the background log reader loop.
//!
//! Drives [`LogReader`] over a scripted transport to cover:
//! - record ordering across chunk boundaries
//! - unterminated last lines flushed on disconnect, dropped on read errors
//! - recovery after read, connect and reset failures
//! - giving up once the retry policy is exhausted
//! - cancellation while blocked on a read

use std::sync::{Arc, Mutex};

use ctrlpoint_tap::reader::sink::ChannelSink;
use ctrlpoint_tap::{AppError, ControlPointRecord, LogReader, ReaderState, RecordParser};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{fast_policy, ScriptedTransport, Step, TEST_TIMEOUT};

async fn wait_for_state(
    rx: &mut tokio::sync::watch::Receiver<ReaderState>,
    wanted: ReaderState,
) {
    timeout(TEST_TIMEOUT, rx.wait_for(|s| *s == wanted))
        .await
        .expect("state reached in time")
        .expect("state channel open");
}

#[tokio::test]
async fn records_reach_sink_in_stream_order() {
    let (transport, _log) = ScriptedTransport::boxed([
        Step::Data("[INFO] boot\nctrlpoint x=1 y=2 z=3 i=0.5\nnoise\nctrlpoint x=4 y="),
        Step::Data("5 z=6 intensity=0.9\n[INFO] heartbeat\n"),
    ]);
    let (sink, mut rx) = ChannelSink::channel();
    let handle = LogReader::new(transport, RecordParser::new(), sink, fast_policy(0))
        .spawn(CancellationToken::new());

    let first = timeout(TEST_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    let second = timeout(TEST_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(first, ControlPointRecord::new(1.0, 2.0, 3.0, 0.5));
    assert_eq!(second, ControlPointRecord::new(4.0, 5.0, 6.0, 0.9));

    let summary = handle.shutdown().await.expect("clean stop");
    assert_eq!(summary.lines_read, 5);
    assert_eq!(summary.records_emitted, 2);
    assert_eq!(summary.read_errors, 0);
}

#[tokio::test]
async fn closure_sink_sees_every_matching_line() {
    let seen: Arc<Mutex<Vec<ControlPointRecord>>> = Arc::default();
    let sink = {
        let seen = Arc::clone(&seen);
        move |record: ControlPointRecord| seen.lock().unwrap().push(record)
    };
    let (transport, _log) = ScriptedTransport::boxed([
        Step::Data("x=1 y=1 z=1 i=1\nskip\nx=2 y=2 z=2 i=2\nx=3 y=3 z=3 i=3\n"),
    ]);

    let handle = LogReader::new(transport, RecordParser::new(), sink, fast_policy(0))
        .spawn(CancellationToken::new());
    timeout(TEST_TIMEOUT, async {
        while seen.lock().unwrap().len() < 3 {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("records delivered in time");

    let summary = handle.shutdown().await.expect("clean stop");
    assert_eq!(summary.records_emitted, 3);
    assert_eq!(summary.lines_read, 4);

    let xs: Vec<f64> = seen.lock().unwrap().iter().map(|r| r.x).collect();
    assert_eq!(xs, vec![1.0, 2.0, 3.0]);
}

#[tokio::test]
async fn unterminated_last_line_is_parsed_on_disconnect() {
    let (transport, log) = ScriptedTransport::boxed([
        Step::Data("x=1 y=2 z=3 i=4\nx=5 y=6 z=7 i=8"),
        Step::Disconnect,
    ]);
    let (sink, mut rx) = ChannelSink::channel();
    let handle = LogReader::new(transport, RecordParser::new(), sink, fast_policy(0))
        .spawn(CancellationToken::new());

    let first = timeout(TEST_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    let second = timeout(TEST_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(first, ControlPointRecord::new(1.0, 2.0, 3.0, 4.0));
    assert_eq!(second, ControlPointRecord::new(5.0, 6.0, 7.0, 8.0));

    let summary = handle.shutdown().await.expect("clean stop");
    assert_eq!(summary.lines_read, 2);
    assert_eq!(summary.records_emitted, 2);
    assert_eq!(log.lock().unwrap().resets, 1);
}

#[tokio::test]
async fn partial_line_is_dropped_after_read_error() {
    let (transport, log) = ScriptedTransport::boxed([
        Step::Data("ctrlpoint x=1 y=2 z=3 i=9"),
        Step::ReadError,
        Step::Data("\nctrlpoint x=7 y=8 z=9 i=1\n"),
    ]);
    let (sink, mut rx) = ChannelSink::channel();
    let handle = LogReader::new(transport, RecordParser::new(), sink, fast_policy(0))
        .spawn(CancellationToken::new());

    let record = timeout(TEST_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(record, ControlPointRecord::new(7.0, 8.0, 9.0, 1.0));

    let summary = handle.shutdown().await.expect("clean stop");
    assert_eq!(summary.records_emitted, 1);
    assert_eq!(summary.read_errors, 1);
    assert_eq!(log.lock().unwrap().resets, 1);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn reader_recovers_after_read_error() {
    let (transport, log) = ScriptedTransport::boxed([
        Step::Data("x=1 y=1 z=1 i=1\n"),
        Step::ReadError,
        Step::Data("x=2 y=2 z=2 i=2\n"),
    ]);
    let (sink, mut rx) = ChannelSink::channel();
    let handle = LogReader::new(transport, RecordParser::new(), sink, fast_policy(0))
        .spawn(CancellationToken::new());

    let first = timeout(TEST_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    let second = timeout(TEST_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.x, 1.0);
    assert_eq!(second.x, 2.0);

    let summary = handle.shutdown().await.expect("clean stop");
    assert_eq!(summary.read_errors, 1);
    assert_eq!(summary.reconnects, 1);
    assert_eq!(log.lock().unwrap().connects, 2);
}

#[tokio::test]
async fn idle_disconnect_reopens_endpoint() {
    let (transport, log) = ScriptedTransport::boxed([
        Step::Disconnect,
        Step::Disconnect,
        Step::Data("x=5 y=5 z=5 i=5\n"),
    ]);
    let (sink, mut rx) = ChannelSink::channel();
    let handle = LogReader::new(transport, RecordParser::new(), sink, fast_policy(1))
        .spawn(CancellationToken::new());

    let record = timeout(TEST_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(record.z, 5.0);

    // Disconnects are not failures, so the one-failure limit never trips.
    let summary = handle.shutdown().await.expect("clean stop");
    assert_eq!(summary.reconnects, 2);
    assert_eq!(summary.read_errors, 0);
    assert_eq!(log.lock().unwrap().resets, 2);
}

#[tokio::test]
async fn later_connect_failure_is_retried() {
    let (transport, _log) = ScriptedTransport::boxed([
        Step::Data("x=1 y=0 z=0 i=0\n"),
        Step::Disconnect,
        Step::ConnectError,
        Step::Data("x=2 y=0 z=0 i=0\n"),
    ]);
    let (sink, mut rx) = ChannelSink::channel();
    let handle = LogReader::new(transport, RecordParser::new(), sink, fast_policy(0))
        .spawn(CancellationToken::new());

    for expected in [1.0, 2.0] {
        let record = timeout(TEST_TIMEOUT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(record.x, expected);
    }

    let summary = handle.shutdown().await.expect("clean stop");
    assert_eq!(summary.read_errors, 1);
    assert_eq!(summary.reconnects, 2);
}

#[tokio::test]
async fn first_connect_failure_fails_reader() {
    let (transport, log) = ScriptedTransport::boxed([Step::ConnectError]);
    let (sink, _rx) = ChannelSink::channel();
    let handle = LogReader::new(transport, RecordParser::new(), sink, fast_policy(0))
        .spawn(CancellationToken::new());
    let mut state = handle.subscribe();

    let err = timeout(TEST_TIMEOUT, handle.join())
        .await
        .expect("reader exits")
        .expect_err("reader fails");
    assert!(matches!(err, AppError::TransportRead(_)));
    assert_eq!(*state.borrow_and_update(), ReaderState::Failed);

    let log = log.lock().unwrap();
    assert_eq!(log.resets, 0);
    assert_eq!(log.closes, 1);
}

#[tokio::test]
async fn reader_gives_up_after_consecutive_failures() {
    let (transport, log) = ScriptedTransport::boxed([
        Step::ReadError,
        Step::ReadError,
        Step::ReadError,
        Step::Data("x=1 y=1 z=1 i=1\n"),
    ]);
    let (sink, mut rx) = ChannelSink::channel();
    let handle = LogReader::new(transport, RecordParser::new(), sink, fast_policy(3))
        .spawn(CancellationToken::new());

    let err = timeout(TEST_TIMEOUT, handle.join())
        .await
        .expect("reader exits")
        .expect_err("retry limit reached");
    assert!(err.to_string().contains("3 consecutive failures"), "{err}");
    assert!(rx.try_recv().is_err());

    let log = log.lock().unwrap();
    assert_eq!(log.resets, 2);
    assert_eq!(log.closes, 1);
}

#[tokio::test]
async fn reset_failures_count_toward_limit() {
    let (transport, log) =
        ScriptedTransport::boxed([Step::ReadError, Step::ResetError, Step::ResetError]);
    let (sink, _rx) = ChannelSink::channel();
    let handle = LogReader::new(transport, RecordParser::new(), sink, fast_policy(2))
        .spawn(CancellationToken::new());

    let err = timeout(TEST_TIMEOUT, handle.join())
        .await
        .expect("reader exits")
        .expect_err("retry limit reached");
    assert!(matches!(err, AppError::TransportRead(_)));
    assert_eq!(log.lock().unwrap().resets, 1);
}

#[tokio::test]
async fn failed_reset_is_retried_until_endpoint_reopens() {
    let (transport, log) = ScriptedTransport::boxed([
        Step::ReadError,
        Step::ResetError,
        Step::Data("x=3 y=2 z=1 i=0.5\n"),
    ]);
    let (sink, mut rx) = ChannelSink::channel();
    let handle = LogReader::new(transport, RecordParser::new(), sink, fast_policy(0))
        .spawn(CancellationToken::new());

    let record = timeout(TEST_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(record, ControlPointRecord::new(3.0, 2.0, 1.0, 0.5));
    assert_eq!(handle.state(), ReaderState::Running);

    let summary = handle.shutdown().await.expect("clean stop");
    assert_eq!(summary.read_errors, 2);
    assert_eq!(summary.reconnects, 2);
    assert_eq!(log.lock().unwrap().resets, 2);
}

#[tokio::test]
async fn data_clears_failure_streak() {
    let (transport, _log) = ScriptedTransport::boxed([
        Step::ReadError,
        Step::Data("x=1 y=1 z=1 i=1\n"),
        Step::ReadError,
        Step::Data("x=2 y=2 z=2 i=2\n"),
        Step::ReadError,
        Step::Data("x=3 y=3 z=3 i=3\n"),
    ]);
    let (sink, mut rx) = ChannelSink::channel();
    let handle = LogReader::new(transport, RecordParser::new(), sink, fast_policy(2))
        .spawn(CancellationToken::new());

    for expected in [1.0, 2.0, 3.0] {
        let record = timeout(TEST_TIMEOUT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(record.intensity, expected);
    }

    let summary = handle.shutdown().await.expect("limit never reached");
    assert_eq!(summary.read_errors, 3);
}

#[tokio::test]
async fn cancellation_stops_blocked_reader() {
    let (transport, log) = ScriptedTransport::boxed([]);
    let (sink, _rx) = ChannelSink::channel();
    let cancel = CancellationToken::new();
    let handle =
        LogReader::new(transport, RecordParser::new(), sink, fast_policy(0)).spawn(cancel.clone());
    let mut state = handle.subscribe();
    wait_for_state(&mut state, ReaderState::Running).await;

    cancel.cancel();
    let summary = timeout(TEST_TIMEOUT, handle.join())
        .await
        .expect("reader exits promptly")
        .expect("clean stop");

    assert_eq!(summary.lines_read, 0);
    assert_eq!(*state.borrow_and_update(), ReaderState::Stopped);
    assert_eq!(log.lock().unwrap().closes, 1);
}

#[tokio::test]
async fn dropping_handle_cancels_reader() {
    let (transport, log) = ScriptedTransport::boxed([]);
    let (sink, _rx) = ChannelSink::channel();
    let handle = LogReader::new(transport, RecordParser::new(), sink, fast_policy(0))
        .spawn(CancellationToken::new());
    let mut state = handle.subscribe();
    wait_for_state(&mut state, ReaderState::Running).await;

    drop(handle);

    timeout(TEST_TIMEOUT, state.wait_for(|s| s.is_terminal()))
        .await
        .expect("reader exits")
        .expect("terminal state observed");
    assert_eq!(*state.borrow(), ReaderState::Stopped);
    assert_eq!(log.lock().unwrap().closes, 1);
}

#[tokio::test]
async fn handle_reports_endpoint_name() {
    let (transport, _log) = ScriptedTransport::boxed([]);
    let (sink, _rx) = ChannelSink::channel();
    let handle = LogReader::new(transport, RecordParser::new(), sink, fast_policy(0))
        .spawn(CancellationToken::new());

    assert_eq!(handle.endpoint_name(), "scripted-test-pipe");
    handle.shutdown().await.expect("clean stop");
}
