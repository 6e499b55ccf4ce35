use crate::archive::{self, is_archive_name};
use crate::error::{Result, TransferError};
use crate::{AppEvent, Direction};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::constants::{DEFAULT_CHUNK_SIZE, PARTIAL_SUFFIX, READ_IDLE_TIMEOUT};
use super::protocol::read_header;
use super::utils::{ProgressTracker, sanitize_file_name};

/// How long to wait for the sender to close after the last declared byte
const TRAILING_DATA_GRACE: Duration = Duration::from_secs(1);

/// Where the receiver is in handling the current connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    AwaitHeader,
    Streaming,
    Unpacking,
}

/// Outcome of one successful receive
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    /// Sanitized name the file was stored under
    pub file_name: String,
    /// The stored file, or the directory an archive was unpacked into
    pub path: PathBuf,
    pub bytes: u64,
    pub unpacked: bool,
}

/// Receive a single file from the stream
pub async fn receive_file<S>(
    stream: &mut S,
    download_dir: &Path,
    event_tx: &mpsc::Sender<AppEvent>,
    state: &watch::Sender<ReceiverState>,
) -> Result<ReceivedFile>
where
    S: AsyncRead + Unpin,
{
    state.send_replace(ReceiverState::AwaitHeader);
    let header = read_header(stream).await?;
    let file_name = sanitize_file_name(&header.file_name);
    if file_name != header.file_name {
        warn!("Sanitized incoming name {:?} to {:?}", header.file_name, file_name);
    }

    info!("Receiving file: {} ({} bytes)", file_name, header.total_size);
    let _ = event_tx
        .send(AppEvent::Status(format!(
            "Receiving: {} ({} bytes)",
            file_name, header.total_size
        )))
        .await;

    state.send_replace(ReceiverState::Streaming);
    tokio::fs::create_dir_all(download_dir).await?;
    let file_path = download_dir.join(&file_name);
    let part_path = download_dir.join(format!("{}{}", file_name, PARTIAL_SUFFIX));

    let mut tracker = ProgressTracker::new(
        event_tx,
        &file_name,
        Direction::Receiving,
        header.total_size,
    );
    let stored = match stream_to_file(stream, &part_path, header.total_size, &mut tracker).await {
        Ok(()) => tokio::fs::rename(&part_path, &file_path)
            .await
            .map_err(TransferError::Io),
        Err(e) => Err(e),
    };
    if let Err(e) = stored {
        if let Err(rm) = tokio::fs::remove_file(&part_path).await {
            debug!("Could not remove {}: {}", part_path.display(), rm);
        }
        return Err(e);
    }

    let mut received = ReceivedFile {
        file_name: file_name.clone(),
        path: file_path.clone(),
        bytes: tracker.done(),
        unpacked: false,
    };

    if is_archive_name(&file_name) {
        state.send_replace(ReceiverState::Unpacking);
        let _ = event_tx
            .send(AppEvent::Status(format!("Unpacking: {}", file_name)))
            .await;

        let archive_path = file_path.clone();
        let dest = download_dir.to_path_buf();
        tokio::task::spawn_blocking(move || archive::unpack(&archive_path, &dest))
            .await
            .map_err(|e| TransferError::Io(std::io::Error::other(e)))??;

        // Only the downloaded copy goes; an archive that fails to unpack stays
        tokio::fs::remove_file(&file_path).await?;
        received.path = download_dir.to_path_buf();
        received.unpacked = true;
    }

    let _ = event_tx
        .send(AppEvent::TransferCompleted {
            file_name,
            direction: Direction::Receiving,
        })
        .await;

    Ok(received)
}

/// Copy exactly `total` bytes from `stream` into a fresh file at `path`
async fn stream_to_file<S>(
    stream: &mut S,
    path: &Path,
    total: u64,
    tracker: &mut ProgressTracker<'_>,
) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let mut file = File::create(path).await?;
    let mut buffer = vec![0u8; DEFAULT_CHUNK_SIZE];

    if total == 0 {
        tracker.report().await;
    }

    while tracker.done() < total {
        let to_read = std::cmp::min(buffer.len() as u64, total - tracker.done()) as usize;
        let n = match tokio::time::timeout(READ_IDLE_TIMEOUT, stream.read(&mut buffer[..to_read]))
            .await
        {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(TransferError::Network(e)),
            Err(_) => return Err(TransferError::Timeout("receiving file data")),
        };
        if n == 0 {
            return Err(TransferError::ConnectionClosed {
                received: tracker.done(),
                expected: total,
            });
        }

        file.write_all(&buffer[..n]).await?;
        tracker.advance(n).await;
    }

    file.flush().await?;
    reject_trailing_data(stream).await
}

/// The sender must close right after the declared byte count
async fn reject_trailing_data<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let mut probe = [0u8; 1];
    match tokio::time::timeout(TRAILING_DATA_GRACE, stream.read(&mut probe)).await {
        Ok(Ok(0)) => Ok(()),
        Ok(Ok(_)) => Err(TransferError::protocol(
            "peer sent more bytes than the header declared",
        )),
        // A reset after the last byte does not affect what we stored
        Ok(Err(e)) => {
            debug!("Read after payload failed: {}", e);
            Ok(())
        }
        Err(_) => {
            debug!("Sender kept the connection open after the payload");
            Ok(())
        }
    }
}
