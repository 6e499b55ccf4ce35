use crate::AppEvent;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::receiver::{ReceiverState, receive_file};

/// Long-lived TCP listener that stores incoming transfers, one at a time
pub struct Receiver {
    listener: TcpListener,
    download_dir: PathBuf,
    event_tx: mpsc::Sender<AppEvent>,
    state_tx: watch::Sender<ReceiverState>,
}

impl Receiver {
    pub async fn bind(
        addr: SocketAddr,
        download_dir: PathBuf,
        event_tx: mpsc::Sender<AppEvent>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let (state_tx, _) = watch::channel(ReceiverState::Idle);
        Ok(Self {
            listener,
            download_dir,
            event_tx,
            state_tx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Subscribe to state changes of the connection being handled
    pub fn state(&self) -> watch::Receiver<ReceiverState> {
        self.state_tx.subscribe()
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Accept and handle connections until `cancel` fires.
    ///
    /// Each connection is handled to completion before the next accept, and
    /// no per-transfer failure ends the loop.
    pub async fn run(self, cancel: CancellationToken) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(
                "Receiver listening on {}, saving to {}",
                addr,
                self.download_dir.display()
            );
        }

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.listener.accept() => r,
            };

            let (mut stream, remote_addr) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            info!("Incoming connection from {}", remote_addr);
            let _ = self
                .event_tx
                .send(AppEvent::Status(format!("Connection from {}", remote_addr.ip())))
                .await;

            match receive_file(&mut stream, &self.download_dir, &self.event_tx, &self.state_tx)
                .await
            {
                Ok(received) => {
                    info!(
                        "Saved {} ({} bytes) from {}",
                        received.file_name, received.bytes, remote_addr
                    );
                    let _ = self
                        .event_tx
                        .send(AppEvent::Status(format!("Saved to {}", received.path.display())))
                        .await;
                }
                Err(e) => {
                    error!("Receive from {} failed: {}", remote_addr, e);
                    let _ = self
                        .event_tx
                        .send(AppEvent::Error(format!("Receive failed: {}", e)))
                        .await;
                }
            }

            let _ = stream.shutdown().await;
            drop(stream);
            self.state_tx.send_replace(ReceiverState::Idle);
            let _ = self.event_tx.send(AppEvent::ProgressReset).await;
        }

        info!("Receiver stopped");
    }
}
