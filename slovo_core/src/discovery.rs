use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transfer::constants::transfer_port_for;

/// Default UDP port for discovery
pub const DISCOVERY_PORT: u16 = 50505;

/// Probe payload; only an exact match gets an answer
pub const PROBE_MARKER: &[u8] = b"SLOVO_DISCOVER";

/// Largest display name sent or accepted in a reply
pub const MAX_NAME_LEN: usize = 1024;

/// Default time to wait for the next reply during a scan
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_millis(500);

/// A scan never runs longer than `timeout` times this factor
pub const DISCOVERY_HARD_CUTOFF_FACTOR: u32 = 4;

/// A host that answered a probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub display_name: String,
    /// Source address of the reply
    pub address: SocketAddr,
}

impl Peer {
    /// Where this peer's receiver listens: one port above the port it
    /// answered the probe from
    pub fn transfer_addr(&self) -> Option<SocketAddr> {
        transfer_port_for(self.address.port()).map(|port| SocketAddr::new(self.address.ip(), port))
    }
}

/// Answers discovery probes with this host's display name
pub struct DiscoveryResponder {
    socket: Arc<UdpSocket>,
    display_name: String,
}

impl DiscoveryResponder {
    pub async fn bind(addr: SocketAddr, display_name: impl Into<String>) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
            display_name: display_name.into(),
        })
    }

    /// Bind on all interfaces at `port`
    pub async fn new(port: u16, display_name: impl Into<String>) -> std::io::Result<Self> {
        Self::bind(SocketAddr::from(([0, 0, 0, 0], port)), display_name).await
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Start answering probes on a background task
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Answer probes until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let reply = truncate_name(&self.display_name);
        let mut buf = [0u8; 2048];

        if let Ok(addr) = self.socket.local_addr() {
            info!("Discovery responder listening on {} as {:?}", addr, self.display_name);
        }

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.socket.recv_from(&mut buf) => r,
            };

            match received {
                Ok((len, addr)) => {
                    if &buf[..len] != PROBE_MARKER {
                        // Not our packet, ignore silently
                        continue;
                    }
                    debug!("Probe from {}", addr);
                    if let Err(e) = self.socket.send_to(reply, addr).await {
                        warn!("Failed to answer probe from {}: {}", addr, e);
                    }
                }
                Err(e) => {
                    // ICMP unreachable can surface here on some platforms; keep serving
                    warn!("Discovery socket receive error: {}", e);
                }
            }
        }

        info!("Discovery responder stopped");
    }
}

/// Cut `name` to at most MAX_NAME_LEN bytes without splitting a char
fn truncate_name(name: &str) -> &[u8] {
    let mut cutoff = name.len().min(MAX_NAME_LEN);
    while !name.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    &name.as_bytes()[..cutoff]
}

/// Broadcast a probe on `port` and collect the peers that answer
pub async fn discover(port: u16, timeout: Duration) -> std::io::Result<Vec<Peer>> {
    discover_at(SocketAddr::from((Ipv4Addr::BROADCAST, port)), timeout).await
}

/// Probe `target` and collect replies.
///
/// Waits up to `timeout` for each next reply and stops for good once
/// `timeout * DISCOVERY_HARD_CUTOFF_FACTOR` has passed since the probe.
/// Replies from the same address collapse into one peer; the latest wins.
pub async fn discover_at(target: SocketAddr, timeout: Duration) -> std::io::Result<Vec<Peer>> {
    let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0))).await?;
    socket.set_broadcast(true)?;
    socket.send_to(PROBE_MARKER, target).await?;
    debug!("Sent discovery probe to {}", target);

    // No deadline when the cutoff lies beyond what an Instant can represent
    let deadline = Instant::now().checked_add(timeout.saturating_mul(DISCOVERY_HARD_CUTOFF_FACTOR));
    let mut peers: Vec<Peer> = Vec::new();
    let mut buf = [0u8; MAX_NAME_LEN];

    loop {
        let wait = match deadline {
            Some(deadline) => timeout.min(deadline.saturating_duration_since(Instant::now())),
            None => timeout,
        };
        if wait.is_zero() {
            break;
        }

        match tokio::time::timeout(wait, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, addr))) => {
                let display_name = String::from_utf8_lossy(&buf[..len]).into_owned();
                debug!("Discovery reply from {}: {:?}", addr, display_name);
                let peer = Peer {
                    display_name,
                    address: addr,
                };
                match peers.iter_mut().find(|p| p.address == addr) {
                    Some(existing) => *existing = peer,
                    None => peers.push(peer),
                }
            }
            Ok(Err(e)) => {
                // A refused probe (no listener) shows up as a receive error; keep waiting
                debug!("Discovery receive error: {}", e);
            }
            Err(_) => break,
        }
    }

    info!("Discovery finished: {} peer(s)", peers.len());
    Ok(peers)
}
