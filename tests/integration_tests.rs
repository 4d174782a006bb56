//! End-to-end tests for incoming transfers
//!
//! Every transfer is driven through scripted negotiators and instrumented
//! sinks, so each test can check both the observable status and how the
//! stream and sink were released.

use courier_core::{
    ErrorKind, IncomingTransfer, IncomingTransferManager, NegotiationError, TransferConfig,
    TransferError, TransferStatus,
};
use courier_files::SinkError;
use courier_integration_tests::{
    RecordingSinkOpener, ScriptedSelector, SourceSpec, test_data, test_request, wait_until,
};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

const FILE_SIZE: usize = 1024;

fn build(
    sid: &str,
    size: u64,
    selector: &Arc<ScriptedSelector>,
    opener: &Arc<RecordingSinkOpener>,
) -> IncomingTransfer {
    IncomingTransfer::new(Arc::new(test_request(sid, size)), selector.clone())
        .with_sink_opener(opener.clone())
        .with_config(TransferConfig {
            buffer_size: 128,
            poll_interval: Duration::from_millis(5),
        })
}

/// `error` must be present exactly when the status is `Error`
fn assert_consistent(transfer: &IncomingTransfer) {
    let (status, error) = transfer.state().snapshot();
    assert_eq!(
        error.is_some(),
        status == TransferStatus::Error,
        "status {status} with error {error:?}"
    );
}

fn assert_released_once(selector: &ScriptedSelector, opener: &RecordingSinkOpener) {
    let record = opener.record();
    assert_eq!(selector.sources_released(), 1);
    assert_eq!(record.shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(record.drops.load(Ordering::SeqCst), 1);
}

// ============================================================================
// One negotiation per transfer
// ============================================================================

#[tokio::test]
async fn test_second_receive_after_sink_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.pdf");
    let selector = Arc::new(ScriptedSelector::delivering(test_data(FILE_SIZE)));
    let opener = Arc::new(RecordingSinkOpener::new());
    let transfer = build("sid-twice", FILE_SIZE as u64, &selector, &opener);

    transfer.receive_to_sink(&path).await.unwrap();
    assert_eq!(transfer.wait().await, TransferStatus::Complete);

    assert!(matches!(
        transfer.receive_stream().await,
        Err(TransferError::AlreadyNegotiated)
    ));
    assert!(matches!(
        transfer.receive_to_sink(&path).await,
        Err(TransferError::AlreadyNegotiated)
    ));

    assert_eq!(transfer.status(), TransferStatus::Complete);
    assert_eq!(transfer.bytes_transferred(), FILE_SIZE as u64);
    assert_eq!(selector.selects(), 1);
    assert_eq!(opener.opens(), 1);
    assert_consistent(&transfer);
}

#[tokio::test]
async fn test_sink_after_stream_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let selector = Arc::new(ScriptedSelector::delivering(test_data(FILE_SIZE)));
    let opener = Arc::new(RecordingSinkOpener::new());
    let transfer = build("sid-mixed", FILE_SIZE as u64, &selector, &opener);

    let _stream = transfer.receive_stream().await.unwrap();
    assert_eq!(transfer.status(), TransferStatus::Negotiated);

    let err = transfer
        .receive_to_sink(dir.path().join("report.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::AlreadyNegotiated));
    assert!(err.is_precondition());

    assert_eq!(transfer.status(), TransferStatus::Negotiated);
    assert_eq!(selector.selects(), 1);
    assert_eq!(selector.negotiations(), 1);
    assert_eq!(opener.opens(), 0);
}

// ============================================================================
// Sink preconditions
// ============================================================================

#[tokio::test]
async fn test_invalid_sink_paths() {
    let dir = tempfile::tempdir().unwrap();
    let selector = Arc::new(ScriptedSelector::delivering(test_data(FILE_SIZE)));
    let opener = Arc::new(RecordingSinkOpener::new());
    let transfer = build("sid-bad-sink", FILE_SIZE as u64, &selector, &opener);

    assert!(matches!(
        transfer.receive_to_sink("").await,
        Err(TransferError::InvalidSink(SinkError::EmptyPath))
    ));
    assert!(matches!(
        transfer.receive_to_sink(dir.path()).await,
        Err(TransferError::InvalidSink(SinkError::IsDirectory(_)))
    ));
    assert!(matches!(
        transfer
            .receive_to_sink(dir.path().join("missing").join("report.pdf"))
            .await,
        Err(TransferError::InvalidSink(SinkError::Unwritable { .. }))
    ));

    // Nothing started
    assert_eq!(transfer.status(), TransferStatus::Initial);
    assert_eq!(transfer.last_failure(), None);
    assert_eq!(selector.selects(), 0);
    assert_eq!(opener.opens(), 0);
    assert_consistent(&transfer);

    // A rejected sink does not use up the transfer
    transfer
        .receive_to_sink(dir.path().join("report.pdf"))
        .await
        .unwrap();
    assert_eq!(transfer.wait().await, TransferStatus::Complete);
}

// ============================================================================
// Background failures
// ============================================================================

#[tokio::test]
async fn test_selection_failure_is_negotiation_error() {
    let dir = tempfile::tempdir().unwrap();
    let selector = Arc::new(ScriptedSelector::failing_select());
    let opener = Arc::new(RecordingSinkOpener::new());
    let transfer = build("sid-no-method", FILE_SIZE as u64, &selector, &opener);

    transfer
        .receive_to_sink(dir.path().join("report.pdf"))
        .await
        .unwrap();
    assert_eq!(transfer.wait().await, TransferStatus::Error);

    assert_eq!(transfer.error(), Some(ErrorKind::StreamNegotiation));
    assert_eq!(opener.opens(), 0);
    assert_eq!(selector.negotiations(), 0);
    let failure = transfer.last_failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::StreamNegotiation);
    assert!(failure.message.contains("no compatible stream method"));
    assert_consistent(&transfer);
}

#[tokio::test]
async fn test_rejected_stream_is_negotiation_error() {
    let dir = tempfile::tempdir().unwrap();
    let selector = Arc::new(ScriptedSelector::failing_negotiation());
    let opener = Arc::new(RecordingSinkOpener::new());
    let transfer = build("sid-rejected", FILE_SIZE as u64, &selector, &opener);

    transfer
        .receive_to_sink(dir.path().join("report.pdf"))
        .await
        .unwrap();
    assert_eq!(transfer.wait().await, TransferStatus::Error);

    assert_eq!(transfer.error(), Some(ErrorKind::StreamNegotiation));
    assert_eq!(selector.negotiations(), 1);
    assert_eq!(opener.opens(), 0);
    assert!(
        transfer
            .last_failure()
            .unwrap()
            .message
            .contains("declined by peer")
    );
    assert_eq!(transfer.bytes_transferred(), 0);
    assert_consistent(&transfer);
}

#[tokio::test]
async fn test_sink_open_failure_is_bad_sink() {
    let dir = tempfile::tempdir().unwrap();
    let selector = Arc::new(ScriptedSelector::delivering(test_data(FILE_SIZE)));
    let opener = Arc::new(RecordingSinkOpener::failing_open());
    let transfer = build("sid-read-only", FILE_SIZE as u64, &selector, &opener);

    transfer
        .receive_to_sink(dir.path().join("report.pdf"))
        .await
        .unwrap();
    assert_eq!(transfer.wait().await, TransferStatus::Error);

    assert_eq!(transfer.error(), Some(ErrorKind::BadSink));
    assert_eq!(opener.opens(), 1);
    assert_eq!(selector.sources_released(), 1);
    assert!(
        transfer
            .last_failure()
            .unwrap()
            .message
            .contains("read-only")
    );
    assert_consistent(&transfer);
}

#[tokio::test]
async fn test_read_failure_releases_both_ends() {
    let dir = tempfile::tempdir().unwrap();
    let selector = Arc::new(ScriptedSelector::with_source(SourceSpec {
        data: test_data(FILE_SIZE),
        chunk: 100,
        pace: None,
        fail_after: Some(300),
    }));
    let opener = Arc::new(RecordingSinkOpener::new());
    let transfer = build("sid-reset", FILE_SIZE as u64, &selector, &opener);

    transfer
        .receive_to_sink(dir.path().join("report.pdf"))
        .await
        .unwrap();
    assert_eq!(transfer.wait().await, TransferStatus::Error);

    assert_eq!(transfer.error(), Some(ErrorKind::StreamIo));
    assert_eq!(transfer.bytes_transferred(), 300);
    assert_eq!(opener.record().bytes(), test_data(300));
    assert!(
        transfer
            .last_failure()
            .unwrap()
            .message
            .contains("peer went away")
    );
    assert_released_once(&selector, &opener);
    assert_consistent(&transfer);
}

#[tokio::test]
async fn test_write_failure_releases_both_ends() {
    let dir = tempfile::tempdir().unwrap();
    let selector = Arc::new(ScriptedSelector::delivering(test_data(FILE_SIZE)));
    let opener = Arc::new(RecordingSinkOpener::filling_after(200));
    let transfer = build("sid-disk-full", FILE_SIZE as u64, &selector, &opener);

    transfer
        .receive_to_sink(dir.path().join("report.pdf"))
        .await
        .unwrap();
    assert_eq!(transfer.wait().await, TransferStatus::Error);

    assert_eq!(transfer.error(), Some(ErrorKind::StreamIo));
    assert!(transfer.bytes_transferred() < FILE_SIZE as u64);
    assert_released_once(&selector, &opener);
    assert_consistent(&transfer);
}

#[tokio::test]
async fn test_short_stream_is_stream_error() {
    let dir = tempfile::tempdir().unwrap();
    let selector = Arc::new(ScriptedSelector::delivering(test_data(500)));
    let opener = Arc::new(RecordingSinkOpener::new());
    let transfer = build("sid-short", FILE_SIZE as u64, &selector, &opener);

    transfer
        .receive_to_sink(dir.path().join("report.pdf"))
        .await
        .unwrap();
    assert_eq!(transfer.wait().await, TransferStatus::Error);

    assert_eq!(transfer.error(), Some(ErrorKind::StreamIo));
    assert_eq!(transfer.bytes_transferred(), 500);
    assert!(
        transfer
            .last_failure()
            .unwrap()
            .message
            .contains("500 of 1024")
    );
    assert_released_once(&selector, &opener);
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_polling_observer_sees_ordered_progress() {
    let dir = tempfile::tempdir().unwrap();
    let data = test_data(FILE_SIZE);
    let selector = Arc::new(
        ScriptedSelector::with_source(SourceSpec {
            data: data.clone(),
            chunk: 128,
            pace: Some(Duration::from_millis(2)),
            fail_after: None,
        })
        .with_handshake_delay(Duration::from_millis(10)),
    );
    let opener = Arc::new(RecordingSinkOpener::new());
    let transfer = build("sid-happy", FILE_SIZE as u64, &selector, &opener);

    transfer
        .receive_to_sink(dir.path().join("report.pdf"))
        .await
        .unwrap();

    let mut statuses = vec![TransferStatus::Initial];
    let mut progress = vec![0.0f64];
    while !transfer.is_done() {
        statuses.push(transfer.status());
        progress.push(transfer.progress());
        assert_consistent(&transfer);
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(transfer.wait().await, TransferStatus::Complete);
    statuses.push(transfer.status());
    progress.push(transfer.progress());

    // Observed statuses follow the declared order
    assert!(statuses.windows(2).all(|w| w[0] as u8 <= w[1] as u8));
    assert!(!statuses.contains(&TransferStatus::Error));
    assert!(!statuses.contains(&TransferStatus::Cancelled));
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));

    assert_eq!(transfer.bytes_transferred(), FILE_SIZE as u64);
    assert_eq!(transfer.progress(), 1.0);
    assert_eq!(transfer.error(), None);
    assert_eq!(opener.record().bytes(), data);
    assert_released_once(&selector, &opener);
}

#[tokio::test]
async fn test_file_sink_replaces_existing_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.pdf");
    std::fs::write(&path, vec![0xAA; 4 * FILE_SIZE]).unwrap();

    let data = test_data(FILE_SIZE);
    let selector = Arc::new(ScriptedSelector::delivering(data.clone()));
    let transfer = IncomingTransfer::new(
        Arc::new(test_request("sid-file", FILE_SIZE as u64)),
        selector.clone(),
    );

    transfer.receive_to_sink(&path).await.unwrap();
    assert_eq!(transfer.wait().await, TransferStatus::Complete);

    assert_eq!(std::fs::read(&path).unwrap(), data);
    assert_eq!(selector.sources_released(), 1);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_before_start() {
    let dir = tempfile::tempdir().unwrap();
    let selector = Arc::new(ScriptedSelector::delivering(test_data(FILE_SIZE)));
    let opener = Arc::new(RecordingSinkOpener::new());
    let transfer = build("sid-early-cancel", FILE_SIZE as u64, &selector, &opener);

    assert!(transfer.cancel());
    transfer
        .receive_to_sink(dir.path().join("report.pdf"))
        .await
        .unwrap();
    assert_eq!(transfer.wait().await, TransferStatus::Cancelled);

    // Nothing was negotiated and the status is never overwritten
    assert!(!transfer.cancel());
    assert_eq!(selector.selects(), 0);
    assert_eq!(opener.opens(), 0);
    assert_eq!(transfer.status(), TransferStatus::Cancelled);
    assert_eq!(transfer.error(), None);
    assert_consistent(&transfer);
}

#[tokio::test]
async fn test_cancel_during_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let selector = Arc::new(
        ScriptedSelector::delivering(test_data(FILE_SIZE))
            .with_handshake_delay(Duration::from_millis(200)),
    );
    let opener = Arc::new(RecordingSinkOpener::new());
    let transfer = build("sid-handshake-cancel", FILE_SIZE as u64, &selector, &opener);

    transfer
        .receive_to_sink(dir.path().join("report.pdf"))
        .await
        .unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            transfer.status() == TransferStatus::NegotiatingStream
        })
        .await
    );

    assert!(transfer.cancel());
    assert_eq!(transfer.wait().await, TransferStatus::Cancelled);

    // The late stream is discarded without opening the sink
    assert_eq!(opener.opens(), 0);
    assert_eq!(selector.sources_released(), 1);
    assert_eq!(transfer.last_failure(), None);
    assert_consistent(&transfer);
}

#[tokio::test]
async fn test_cancel_during_copy() {
    let dir = tempfile::tempdir().unwrap();
    let total = 1024 * 1024;
    let selector = Arc::new(ScriptedSelector::with_source(SourceSpec {
        data: test_data(total),
        chunk: 128,
        pace: Some(Duration::from_millis(2)),
        fail_after: None,
    }));
    let opener = Arc::new(RecordingSinkOpener::new());
    let transfer = build("sid-copy-cancel", total as u64, &selector, &opener);

    transfer
        .receive_to_sink(dir.path().join("report.pdf"))
        .await
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || transfer.bytes_transferred() > 0).await);
    assert_eq!(transfer.status(), TransferStatus::InProgress);

    assert!(transfer.cancel());
    assert_eq!(transfer.wait().await, TransferStatus::Cancelled);

    assert!(transfer.bytes_transferred() < total as u64);
    assert_eq!(transfer.error(), None);
    assert_eq!(transfer.last_failure(), None);
    assert_released_once(&selector, &opener);
}

// ============================================================================
// Synchronous mode
// ============================================================================

#[tokio::test]
async fn test_sync_failure_records_without_error_status() {
    let selector = Arc::new(ScriptedSelector::failing_negotiation());
    let opener = Arc::new(RecordingSinkOpener::new());
    let transfer = build("sid-sync-fail", FILE_SIZE as u64, &selector, &opener);

    let err = transfer.receive_stream().await.err().unwrap();
    assert!(matches!(
        err,
        TransferError::StreamNegotiationFailed(NegotiationError::Rejected(_))
    ));

    assert_eq!(transfer.status(), TransferStatus::NegotiatingStream);
    assert_eq!(transfer.error(), None);
    assert!(!transfer.is_done());
    assert_eq!(
        transfer.last_failure().map(|f| f.kind),
        Some(ErrorKind::StreamNegotiation)
    );
    assert_consistent(&transfer);
}

#[tokio::test]
async fn test_sync_stream_cancelled_mid_handshake() {
    let selector = Arc::new(
        ScriptedSelector::delivering(test_data(FILE_SIZE))
            .with_handshake_delay(Duration::from_millis(100)),
    );
    let opener = Arc::new(RecordingSinkOpener::new());
    let transfer = Arc::new(build("sid-sync-cancel", FILE_SIZE as u64, &selector, &opener));

    let receiver = {
        let transfer = Arc::clone(&transfer);
        tokio::spawn(async move { transfer.receive_stream().await.map(|_| ()) })
    };
    assert!(
        wait_until(Duration::from_secs(5), || {
            transfer.status() == TransferStatus::NegotiatingStream
        })
        .await
    );
    assert!(transfer.cancel());

    let result = receiver.await.unwrap();
    assert!(matches!(result, Err(TransferError::Cancelled)));
    assert_eq!(selector.sources_released(), 1);
    assert_eq!(transfer.wait().await, TransferStatus::Cancelled);
}

// ============================================================================
// Manager
// ============================================================================

#[tokio::test]
async fn test_manager_runs_concurrent_transfers() {
    let dir = tempfile::tempdir().unwrap();
    let selector = Arc::new(ScriptedSelector::delivering(test_data(FILE_SIZE)));
    let opener = Arc::new(RecordingSinkOpener::new());
    let manager = IncomingTransferManager::new(selector.clone(), TransferConfig::default())
        .unwrap()
        .with_sink_opener(opener.clone());

    let mut transfers = Vec::new();
    for i in 0..4 {
        let transfer = manager
            .create_incoming(test_request(&format!("sid-{i}"), FILE_SIZE as u64))
            .unwrap();
        transfer
            .receive_to_sink(dir.path().join(format!("file-{i}.bin")))
            .await
            .unwrap();
        transfers.push(transfer);
    }
    let idle = manager
        .create_incoming(test_request("sid-idle", FILE_SIZE as u64))
        .unwrap();

    for transfer in &transfers {
        assert_eq!(transfer.wait().await, TransferStatus::Complete);
    }

    assert_eq!(manager.transfer_count(), 5);
    assert_eq!(manager.prune_finished(), 4);
    assert_eq!(manager.active_transfers(), vec![idle.stream_id().to_string()]);
    assert_eq!(opener.opens(), 4);
    assert_eq!(selector.sources_released(), 4);
}
