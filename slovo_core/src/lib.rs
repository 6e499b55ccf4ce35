use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub mod archive;
pub mod config;
pub mod discovery;
pub mod error;
pub mod transfer;

use config::AppConfig;
use discovery::{DiscoveryResponder, Peer};
use transfer::Receiver;
use transfer::utils::format_transfer_speed;

pub use error::{ErrorKind, TransferError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Sending,
    Receiving,
}

/// Snapshot of an active transfer
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    pub file_name: String,
    pub direction: Direction,
    /// Floor of bytes done * 100 / total, never decreasing within a transfer
    pub percent: u8,
    /// Average bytes per second since the transfer started
    pub throughput_bps: f64,
}

impl TransferProgress {
    /// Human readable throughput, e.g. "1.23 MB/s"
    pub fn speed(&self) -> String {
        format_transfer_speed(self.throughput_bps)
    }
}

//Command from UI to Core
#[derive(Debug, Clone)]
pub enum AppCommand {
    /// Broadcast a probe and report who answers
    StartDiscovery,
    /// Send a file or directory to a receiver
    SendPath { target: SocketAddr, path: PathBuf },
}

//Report from Core to UI
#[derive(Debug, Clone)]
pub enum AppEvent {
    Status(String),

    PeerFound(Peer),

    ScanFinished {
        peers: Vec<Peer>,
    },

    TransferProgress(TransferProgress),

    /// A transfer ended; the progress bar goes back to 0
    ProgressReset,

    TransferCompleted {
        file_name: String,
        direction: Direction,
    },

    Error(String),
}

/// The long-running listeners of one host
pub struct Services {
    pub responder: DiscoveryResponder,
    pub receiver: Receiver,
}

impl Services {
    /// Bind the discovery and transfer ports from `config` on all interfaces
    pub async fn bind(config: &AppConfig, event_tx: mpsc::Sender<AppEvent>) -> anyhow::Result<Self> {
        let transfer_port = config.transfer_port()?;
        let responder = DiscoveryResponder::new(config.discovery_port, config.display_name.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Cant bind discovery port {}: {}", config.discovery_port, e))?;

        let transfer_addr = SocketAddr::from(([0, 0, 0, 0], transfer_port));
        let receiver = Receiver::bind(transfer_addr, config.download_path.clone(), event_tx)
            .await
            .map_err(|e| anyhow::anyhow!("Cant bind transfer port {}: {}", transfer_port, e))?;

        Ok(Self {
            responder,
            receiver,
        })
    }
}

/// Run the listeners and serve UI commands until `cancel` fires or the
/// command channel closes
pub async fn run_backend(
    config: AppConfig,
    services: Services,
    mut cmd_rx: mpsc::Receiver<AppCommand>,
    event_tx: mpsc::Sender<AppEvent>,
    cancel: CancellationToken,
) {
    let _ = event_tx
        .send(AppEvent::Status(format!(
            "Host: {}, saving to {}",
            config.display_name,
            config.download_path.display()
        )))
        .await;

    let listeners = cancel.child_token();
    let responder_handle = services.responder.spawn(listeners.clone());
    let receiver_handle = services.receiver.spawn(listeners.clone());

    loop {
        let cmd = tokio::select! {
            _ = cancel.cancelled() => break,
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => cmd,
                None => break,
            },
        };

        match cmd {
            AppCommand::StartDiscovery => {
                let evt = event_tx.clone();
                let port = config.discovery_port;
                let timeout = config.discovery_timeout();
                tokio::spawn(async move {
                    let _ = evt.send(AppEvent::Status("Scanning...".to_string())).await;
                    match discovery::discover(port, timeout).await {
                        Ok(peers) => {
                            for peer in &peers {
                                let _ = evt.send(AppEvent::PeerFound(peer.clone())).await;
                            }
                            if peers.is_empty() {
                                let _ = evt
                                    .send(AppEvent::Status("No devices found".to_string()))
                                    .await;
                            }
                            let _ = evt.send(AppEvent::ScanFinished { peers }).await;
                        }
                        Err(e) => {
                            error!("Discovery failed: {}", e);
                            let _ = evt
                                .send(AppEvent::Error(format!("Discovery failed: {}", e)))
                                .await;
                        }
                    }
                });
            }
            AppCommand::SendPath { target, path } => {
                info!("Initiating transfer of {} to {}", path.display(), target);
                let evt = event_tx.clone();
                let chunk_size = config.effective_chunk_size();
                tokio::spawn(async move {
                    match transfer::send_path(target, &path, chunk_size, &evt).await {
                        Ok(report) => {
                            info!("Sent {} ({} bytes)", report.file_name, report.bytes_sent);
                            if let Some(archive) = report.archive {
                                let _ = evt
                                    .send(AppEvent::Status(format!(
                                        "Archive left at {}",
                                        archive.display()
                                    )))
                                    .await;
                            }
                        }
                        Err(e) => {
                            error!("Send to {} failed: {}", target, e);
                            let _ = evt
                                .send(AppEvent::Error(format!("File transfer failed: {}", e)))
                                .await;
                        }
                    }
                    let _ = evt.send(AppEvent::ProgressReset).await;
                });
            }
        }
    }

    listeners.cancel();
    let _ = responder_handle.await;
    let _ = receiver_handle.await;
    info!("Backend stopped");
}
