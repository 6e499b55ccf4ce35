//! End-to-end transfers between a sender and a receiver over loopback.

use rand::Rng;
use slovo_core::error::{ErrorKind, TransferError};
use slovo_core::transfer::protocol::{TransferHeader, write_header};
use slovo_core::discovery::Peer;
use slovo_core::transfer::{Receiver, ReceiverState, send_path, send_to_peer};
use slovo_core::{AppEvent, Direction, TransferProgress};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const CHUNK: usize = 64 * 1024;

struct TestReceiver {
    addr: SocketAddr,
    events: mpsc::Receiver<AppEvent>,
    state: watch::Receiver<ReceiverState>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

async fn start_receiver(download_dir: &Path) -> TestReceiver {
    let (tx, events) = mpsc::channel(100_000);
    let receiver = Receiver::bind("127.0.0.1:0".parse().unwrap(), download_dir.to_path_buf(), tx)
        .await
        .expect("Failed to bind receiver");
    let addr = receiver.local_addr().unwrap();
    let state = receiver.state();
    let cancel = CancellationToken::new();
    let handle = receiver.spawn(cancel.clone());
    TestReceiver {
        addr,
        events,
        state,
        cancel,
        handle,
    }
}

/// Events of one handled connection, up to and including its ProgressReset
async fn next_connection_events(events: &mut mpsc::Receiver<AppEvent>) -> Vec<AppEvent> {
    let mut collected = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(20), events.recv())
            .await
            .expect("Receiver did not finish the connection in time")
            .expect("Event channel closed");
        let done = matches!(event, AppEvent::ProgressReset);
        collected.push(event);
        if done {
            return collected;
        }
    }
}

fn progress_of(events: &[AppEvent]) -> Vec<TransferProgress> {
    events
        .iter()
        .filter_map(|e| match e {
            AppEvent::TransferProgress(p) => Some(p.clone()),
            _ => None,
        })
        .collect()
}

fn errors_of(events: &[AppEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            AppEvent::Error(msg) => Some(msg.clone()),
            _ => None,
        })
        .collect()
}

fn assert_monotonic(progress: &[TransferProgress]) {
    for pair in progress.windows(2) {
        assert!(pair[0].percent <= pair[1].percent, "Progress went backwards");
    }
    assert!(progress.iter().all(|p| p.percent <= 100));
}

fn random_file(dir: &Path, name: &str, len: usize) -> PathBuf {
    let mut data = vec![0u8; len];
    rand::rng().fill(&mut data[..]);
    let path = dir.join(name);
    std::fs::write(&path, &data).unwrap();
    path
}

fn file_hash(path: &Path) -> blake3::Hash {
    blake3::hash(&std::fs::read(path).unwrap())
}

#[tokio::test]
async fn test_send_file_over_loopback() {
    let src = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();
    let mut rx = start_receiver(downloads.path()).await;
    let source = random_file(src.path(), "photo.jpg", 300_000);

    let (tx, mut sender_events) = mpsc::channel(1000);
    let report = send_path(rx.addr, &source, CHUNK, &tx).await.expect("Send failed");
    assert_eq!(report.file_name, "photo.jpg");
    assert_eq!(report.bytes_sent, 300_000);
    assert!(report.archive.is_none());

    let events = next_connection_events(&mut rx.events).await;
    assert!(errors_of(&events).is_empty(), "{:?}", errors_of(&events));
    assert!(events.iter().any(|e| matches!(
        e,
        AppEvent::TransferCompleted { file_name, direction: Direction::Receiving } if file_name == "photo.jpg"
    )));

    let progress = progress_of(&events);
    assert_monotonic(&progress);
    assert_eq!(progress.last().map(|p| p.percent), Some(100));
    assert!(progress.iter().all(|p| p.direction == Direction::Receiving));

    let dest = downloads.path().join("photo.jpg");
    assert_eq!(std::fs::read(&dest).unwrap(), std::fs::read(&source).unwrap());
    assert!(!downloads.path().join("photo.jpg.part").exists());

    drop(tx);
    let mut sent = Vec::new();
    while let Some(event) = sender_events.recv().await {
        sent.push(event);
    }
    assert!(sent.iter().any(|e| matches!(
        e,
        AppEvent::TransferCompleted { direction: Direction::Sending, .. }
    )));
    rx.cancel.cancel();
}

#[tokio::test]
async fn test_ten_megabytes_in_64k_chunks() {
    const SIZE: usize = 10 * 1024 * 1024;
    let src = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();
    let mut rx = start_receiver(downloads.path()).await;
    let source = random_file(src.path(), "big.bin", SIZE);

    let (tx, mut sender_events) = mpsc::channel(1000);
    send_path(rx.addr, &source, CHUNK, &tx).await.expect("Send failed");
    drop(tx);

    let mut sender_progress = Vec::new();
    while let Some(event) = sender_events.recv().await {
        if let AppEvent::TransferProgress(p) = event {
            sender_progress.push(p);
        }
    }
    assert_eq!(sender_progress.len(), SIZE.div_ceil(CHUNK));
    assert_monotonic(&sender_progress);
    assert_eq!(sender_progress.last().unwrap().percent, 100);
    assert!(sender_progress.iter().all(|p| p.throughput_bps.is_finite()));

    let events = next_connection_events(&mut rx.events).await;
    assert!(errors_of(&events).is_empty(), "{:?}", errors_of(&events));
    let receiver_progress = progress_of(&events);
    assert_monotonic(&receiver_progress);
    assert_eq!(receiver_progress.last().unwrap().percent, 100);

    let dest = downloads.path().join("big.bin");
    assert_eq!(std::fs::metadata(&dest).unwrap().len(), SIZE as u64);
    assert_eq!(file_hash(&source), file_hash(&dest));
    rx.cancel.cancel();
}

#[tokio::test]
async fn test_send_directory_unpacks_on_arrival() {
    let src = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();
    let mut rx = start_receiver(downloads.path()).await;

    let folder = src.path().join("holiday");
    std::fs::create_dir_all(folder.join("a")).unwrap();
    std::fs::write(folder.join("a/b.txt"), b"nested contents").unwrap();
    std::fs::write(folder.join("c.txt"), b"top level contents").unwrap();

    let (tx, _sender_events) = mpsc::channel(1000);
    let report = send_path(rx.addr, &folder, CHUNK, &tx).await.expect("Send failed");
    assert_eq!(report.file_name, "holiday.zip");
    // The sender's archive is left behind for the caller
    let archive = report.archive.expect("Directory send should pack an archive");
    assert_eq!(archive, std::fs::canonicalize(src.path()).unwrap().join("holiday.zip"));
    assert!(archive.exists());

    let events = next_connection_events(&mut rx.events).await;
    assert!(errors_of(&events).is_empty(), "{:?}", errors_of(&events));

    assert_eq!(
        std::fs::read(downloads.path().join("a/b.txt")).unwrap(),
        b"nested contents"
    );
    assert_eq!(
        std::fs::read(downloads.path().join("c.txt")).unwrap(),
        b"top level contents"
    );
    assert!(!downloads.path().join("holiday.zip").exists());
    assert!(!downloads.path().join("holiday.zip.part").exists());
    assert_eq!(*rx.state.borrow(), ReceiverState::Idle);
    rx.cancel.cancel();
}

#[tokio::test]
async fn test_empty_file() {
    let src = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();
    let mut rx = start_receiver(downloads.path()).await;
    let source = src.path().join("empty.txt");
    std::fs::write(&source, b"").unwrap();

    let (tx, mut sender_events) = mpsc::channel(100);
    send_path(rx.addr, &source, CHUNK, &tx).await.expect("Send failed");
    drop(tx);

    let mut sender_progress = Vec::new();
    while let Some(event) = sender_events.recv().await {
        if let AppEvent::TransferProgress(p) = event {
            sender_progress.push(p.percent);
        }
    }
    assert_eq!(sender_progress, vec![100]);

    let events = next_connection_events(&mut rx.events).await;
    assert!(errors_of(&events).is_empty(), "{:?}", errors_of(&events));
    assert_eq!(progress_of(&events).last().map(|p| p.percent), Some(100));
    assert_eq!(std::fs::read(downloads.path().join("empty.txt")).unwrap(), b"");
    rx.cancel.cancel();
}

#[tokio::test]
async fn test_short_stream_reports_error_and_loop_survives() {
    let src = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();
    let mut rx = start_receiver(downloads.path()).await;

    // Declare 100 bytes, deliver 10, hang up
    let mut stream = TcpStream::connect(rx.addr).await.unwrap();
    write_header(&mut stream, &TransferHeader::new("liar.bin", 100))
        .await
        .unwrap();
    stream.write_all(&[1u8; 10]).await.unwrap();
    stream.shutdown().await.unwrap();
    drop(stream);

    let events = next_connection_events(&mut rx.events).await;
    let errors = errors_of(&events);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("10/100"), "{}", errors[0]);
    assert!(!downloads.path().join("liar.bin").exists());
    assert!(!downloads.path().join("liar.bin.part").exists());

    // The next transfer still goes through
    let source = random_file(src.path(), "honest.bin", 4096);
    let (tx, _sender_events) = mpsc::channel(100);
    send_path(rx.addr, &source, CHUNK, &tx).await.expect("Send failed");
    let events = next_connection_events(&mut rx.events).await;
    assert!(errors_of(&events).is_empty());
    assert_eq!(
        file_hash(&source),
        file_hash(&downloads.path().join("honest.bin"))
    );
    rx.cancel.cancel();
}

#[tokio::test]
async fn test_corrupt_archive_is_kept_and_reported() {
    let src = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();
    let mut rx = start_receiver(downloads.path()).await;

    let bogus = src.path().join("bad.zip");
    std::fs::write(&bogus, b"definitely not a zip archive").unwrap();
    let (tx, _sender_events) = mpsc::channel(100);
    send_path(rx.addr, &bogus, CHUNK, &tx).await.expect("Send failed");

    let events = next_connection_events(&mut rx.events).await;
    let errors = errors_of(&events);
    assert_eq!(errors.len(), 1, "{:?}", errors);
    assert!(errors[0].contains("archive error"), "{}", errors[0]);
    assert!(!events.iter().any(|e| matches!(e, AppEvent::TransferCompleted { .. })));
    assert_eq!(
        std::fs::read(downloads.path().join("bad.zip")).unwrap(),
        b"definitely not a zip archive"
    );
    assert!(!downloads.path().join("bad.zip.part").exists());
    assert_eq!(*rx.state.borrow(), ReceiverState::Idle);

    // The loop keeps accepting after a failed unpack
    let source = random_file(src.path(), "after.bin", 2048);
    send_path(rx.addr, &source, CHUNK, &tx).await.expect("Send failed");
    let events = next_connection_events(&mut rx.events).await;
    assert!(errors_of(&events).is_empty(), "{:?}", errors_of(&events));
    assert_eq!(file_hash(&source), file_hash(&downloads.path().join("after.bin")));
    rx.cancel.cancel();
}

#[tokio::test]
async fn test_malformed_header_is_reported() {
    let downloads = tempfile::tempdir().unwrap();
    let mut rx = start_receiver(downloads.path()).await;

    let body = b"no-delimiter-here";
    let mut stream = TcpStream::connect(rx.addr).await.unwrap();
    stream
        .write_all(&(body.len() as u32).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(body).await.unwrap();
    stream.shutdown().await.unwrap();

    let events = next_connection_events(&mut rx.events).await;
    let errors = errors_of(&events);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("protocol error"), "{}", errors[0]);
    assert!(progress_of(&events).is_empty());
    rx.cancel.cancel();
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let src = tempfile::tempdir().unwrap();
    let source = random_file(src.path(), "nobody.bin", 16);

    let (tx, _rx) = mpsc::channel(100);
    let err = send_path(addr, &source, CHUNK, &tx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
}

#[tokio::test]
async fn test_delimiter_in_name_is_rejected_before_connecting() {
    let src = tempfile::tempdir().unwrap();
    let source = random_file(src.path(), "a|b.txt", 16);
    // Nothing listens here; a protocol error proves we never tried to connect
    let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();

    let (tx, _rx) = mpsc::channel(100);
    let err = send_path(addr, &source, CHUNK, &tx).await.unwrap_err();
    assert!(matches!(err, TransferError::Protocol(_)));
}

#[tokio::test]
async fn test_receiver_stops_on_cancel() {
    let downloads = tempfile::tempdir().unwrap();
    let rx = start_receiver(downloads.path()).await;

    rx.cancel.cancel();
    timeout(Duration::from_secs(2), rx.handle)
        .await
        .expect("Receiver should stop after cancel")
        .unwrap();
}

#[tokio::test]
async fn test_send_to_peer_uses_port_above_reply_port() {
    let src = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();
    let mut rx = start_receiver(downloads.path()).await;
    let source = random_file(src.path(), "shared.bin", 5000);

    // A peer that answered discovery from the port just below its receiver
    let peer = Peer {
        display_name: "neighbour".to_string(),
        address: SocketAddr::new(rx.addr.ip(), rx.addr.port() - 1),
    };
    let (tx, _sender_events) = mpsc::channel(100);
    let report = send_to_peer(&peer, &source, CHUNK, &tx).await.expect("Send failed");
    assert_eq!(report.bytes_sent, 5000);

    let events = next_connection_events(&mut rx.events).await;
    assert!(errors_of(&events).is_empty(), "{:?}", errors_of(&events));
    assert_eq!(file_hash(&source), file_hash(&downloads.path().join("shared.bin")));
    rx.cancel.cancel();
}

#[tokio::test]
async fn test_send_to_peer_without_transfer_port() {
    let src = tempfile::tempdir().unwrap();
    let source = random_file(src.path(), "edge.bin", 8);
    let peer = Peer {
        display_name: "edge".to_string(),
        address: "127.0.0.1:65535".parse().unwrap(),
    };

    let (tx, _rx) = mpsc::channel(100);
    let err = send_to_peer(&peer, &source, CHUNK, &tx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
}
