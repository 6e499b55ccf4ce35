use crate::archive;
use crate::error::{Result, TransferError};
use crate::discovery::Peer;
use crate::{AppEvent, Direction};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::constants::CONNECT_TIMEOUT;
use super::protocol::{TransferHeader, write_header};
use super::utils::{ProgressTracker, read_chunk};

/// Outcome of one successful send
#[derive(Debug, Clone)]
pub struct SendReport {
    pub file_name: String,
    pub bytes_sent: u64,
    /// Archive packed from a directory source. It is not removed after sending.
    pub archive: Option<PathBuf>,
}

/// Send `source` to the receiver of a discovered peer
pub async fn send_to_peer(
    peer: &Peer,
    source: &Path,
    chunk_size: usize,
    event_tx: &mpsc::Sender<AppEvent>,
) -> Result<SendReport> {
    let target = peer.transfer_addr().ok_or_else(|| {
        TransferError::protocol(format!(
            "peer {} answered from port {}, which has no transfer port above it",
            peer.display_name,
            peer.address.port()
        ))
    })?;
    send_path(target, source, chunk_size, event_tx).await
}

/// Send a file, or a directory packed into an archive, to `target`
pub async fn send_path(
    target: SocketAddr,
    source: &Path,
    chunk_size: usize,
    event_tx: &mpsc::Sender<AppEvent>,
) -> Result<SendReport> {
    let archive = if tokio::fs::metadata(source).await?.is_dir() {
        let _ = event_tx
            .send(AppEvent::Status(format!("Packing: {}", source.display())))
            .await;
        let dir = source.to_path_buf();
        let packed = tokio::task::spawn_blocking(move || archive::pack(&dir))
            .await
            .map_err(|e| TransferError::Io(std::io::Error::other(e)))??;
        Some(packed)
    } else {
        None
    };
    let file_path = archive.as_deref().unwrap_or(source);

    let file = File::open(file_path).await?;
    let file_size = file.metadata().await?.len();
    let file_name = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TransferError::protocol("invalid file name"))?
        .to_string();

    // Validate before touching the network
    let header = TransferHeader::new(file_name.clone(), file_size);
    header.encode()?;

    info!("Sending {} ({} bytes) to {}", file_name, file_size, target);
    let _ = event_tx
        .send(AppEvent::Status(format!("Connecting to: {}", target)))
        .await;

    let mut stream = match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(target)).await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(TransferError::Network(e)),
        Err(_) => return Err(TransferError::Timeout("connecting to the receiver")),
    };
    let _ = stream.set_nodelay(true);

    write_header(&mut stream, &header).await?;
    let _ = event_tx
        .send(AppEvent::Status(format!(
            "Sending: {} ({} bytes)",
            file_name, file_size
        )))
        .await;

    // Never send past the declared size, even if the file grows meanwhile
    let mut reader = file.take(file_size);
    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut tracker = ProgressTracker::new(event_tx, &file_name, Direction::Sending, file_size);

    if file_size == 0 {
        tracker.report().await;
    }

    loop {
        let n = read_chunk(&mut reader, &mut buffer).await?;
        if n == 0 {
            break;
        }
        stream
            .write_all(&buffer[..n])
            .await
            .map_err(TransferError::Network)?;
        tracker.advance(n).await;
    }

    if tracker.done() < file_size {
        return Err(TransferError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!(
                "{} shrank while sending: read {}/{} bytes",
                file_name,
                tracker.done(),
                file_size
            ),
        )));
    }

    stream.shutdown().await.map_err(TransferError::Network)?;
    debug!("Write half closed after {} bytes", tracker.done());

    let _ = event_tx
        .send(AppEvent::TransferCompleted {
            file_name: file_name.clone(),
            direction: Direction::Sending,
        })
        .await;

    Ok(SendReport {
        file_name,
        bytes_sent: tracker.done(),
        archive,
    })
}
