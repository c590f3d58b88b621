use crate::error::DiscoveryError;
use crate::{DISCOVER_MSG, PeerAddress, RESPONSE_MSG};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Default UDP port for probes and replies
pub const DISCOVERY_PORT: u16 = 5001;

/// Default time between two probes
pub const DISCOVERY_INTERVAL_SECS: u64 = 5;

// Both tokens are 13 bytes; anything longer is not ours
const RECV_BUFFER_SIZE: usize = 64;

const PEER_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Local UDP port used for sending probes and receiving replies
    pub port: u16,
    /// Where probes go, normally the broadcast address on the discovery port
    pub probe_target: SocketAddr,
    pub interval: Duration,
    /// Answer probes from other nodes
    pub respond_to_probes: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: DISCOVERY_PORT,
            probe_target: SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DISCOVERY_PORT),
            interval: Duration::from_secs(DISCOVERY_INTERVAL_SECS),
            respond_to_probes: true,
        }
    }
}

/// Peers seen during one discovery run, at most one entry per host
#[derive(Debug, Clone, Default)]
pub struct DiscoveredPeerSet {
    peers: Vec<PeerAddress>,
}

impl DiscoveredPeerSet {
    /// Add `peer` unless its host is already known. Returns true if it was added.
    pub fn insert(&mut self, peer: PeerAddress) -> bool {
        if self.contains_host(peer.host()) {
            return false;
        }
        self.peers.push(peer);
        true
    }

    pub fn contains_host(&self, host: IpAddr) -> bool {
        self.peers.iter().any(|p| p.host() == host)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Peers in the order they were discovered
    pub fn iter(&self) -> impl Iterator<Item = &PeerAddress> {
        self.peers.iter()
    }

    pub fn first(&self) -> Option<PeerAddress> {
        self.peers.first().copied()
    }
}

/// UDP beacon that probes for peers and answers other nodes' probes
pub struct DiscoveryService {
    socket: UdpSocket,
    config: DiscoveryConfig,
    local_port: u16,
    local_hosts: Vec<IpAddr>,
}

impl DiscoveryService {
    pub async fn bind(config: DiscoveryConfig) -> Result<Self, DiscoveryError> {
        // Bind to 0.0.0.0 to hear broadcasts on all interfaces
        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| DiscoveryError::Bind {
                port: config.port,
                source,
            })?;
        socket.set_broadcast(true)?;
        let local_port = socket.local_addr()?.port();

        let local_hosts = local_ip_address::list_afinet_netifas()
            .map(|ifas| ifas.into_iter().map(|(_name, ip)| ip).collect())
            .unwrap_or_else(|e| {
                debug!("Cannot list network interfaces: {}", e);
                Vec::new()
            });

        info!("Discovery socket bound on port {}", local_port);
        Ok(Self {
            socket,
            config,
            local_port,
            local_hosts,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// A probe we sent ourselves comes back from our own port on one of our addresses
    fn is_own_probe(&self, from: SocketAddr) -> bool {
        if from.port() != self.local_port {
            return false;
        }
        let ip = from.ip();
        ip.is_loopback() || ip.is_unspecified() || self.local_hosts.contains(&ip)
    }

    /// Start probing in a background task and stream newly discovered peers.
    ///
    /// The task runs until `cancel` fires or the returned stream is dropped.
    pub fn start(self, cancel: CancellationToken) -> PeerStream {
        let cancel = cancel.child_token();
        let (peer_tx, peer_rx) = mpsc::channel(PEER_CHANNEL_CAPACITY);
        let task = tokio::spawn(self.run(cancel.clone(), peer_tx));

        PeerStream {
            rx: peer_rx,
            cancel,
            task: Some(task),
        }
    }

    /// Probe for `window` and return every peer that answered
    pub async fn discover_for(self, window: Duration) -> DiscoveredPeerSet {
        let mut stream = self.start(CancellationToken::new());
        let deadline = Instant::now() + window;
        let mut found = DiscoveredPeerSet::default();

        while let Ok(Some(peer)) = tokio::time::timeout_at(deadline, stream.next_peer()).await {
            found.insert(peer);
        }
        stream.stop().await;
        found
    }

    async fn run(self, cancel: CancellationToken, peer_tx: mpsc::Sender<PeerAddress>) {
        let mut peers = DiscoveredPeerSet::default();
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        'probe: loop {
            match self
                .socket
                .send_to(DISCOVER_MSG, self.config.probe_target)
                .await
            {
                Ok(_) => trace!("Probe sent to {}", self.config.probe_target),
                Err(e) => warn!("Failed to send probe to {}: {}", self.config.probe_target, e),
            }

            let deadline = Instant::now() + self.config.interval;
            loop {
                let polled = tokio::select! {
                    _ = cancel.cancelled() => break 'probe,
                    _ = peer_tx.closed() => break 'probe,
                    res = poll_datagram(&self.socket, &mut buf, deadline) => res,
                };

                match polled {
                    // No reply yet and the interval is over: probe again
                    Ok(None) => break,
                    Ok(Some((len, from))) => {
                        let keep_going = self
                            .handle_datagram(&buf[..len], from, &mut peers, &peer_tx, &cancel)
                            .await;
                        if !keep_going {
                            break 'probe;
                        }
                    }
                    Err(e) => {
                        debug!("Discovery receive failed: {}", e);
                        tokio::select! {
                            _ = cancel.cancelled() => break 'probe,
                            _ = tokio::time::sleep_until(deadline) => break,
                        }
                    }
                }
            }
        }

        debug!("Discovery stopped after {} peers", peers.len());
    }

    /// Returns false once nobody is listening for peers anymore
    async fn handle_datagram(
        &self,
        payload: &[u8],
        from: SocketAddr,
        peers: &mut DiscoveredPeerSet,
        peer_tx: &mpsc::Sender<PeerAddress>,
        cancel: &CancellationToken,
    ) -> bool {
        if payload == DISCOVER_MSG {
            if !self.config.respond_to_probes || self.is_own_probe(from) {
                trace!("Ignoring probe from {}", from);
                return true;
            }
            debug!("Answering probe from {}", from);
            if let Err(e) = self.socket.send_to(RESPONSE_MSG, from).await {
                warn!("Failed to answer probe from {}: {}", from, e);
            }
            return true;
        }

        if payload == RESPONSE_MSG {
            let peer = PeerAddress::from(from);
            if peers.insert(peer) {
                info!("Discovered peer {}", peer);
                // Nobody may be reading; cancellation must still get through
                return tokio::select! {
                    _ = cancel.cancelled() => false,
                    res = peer_tx.send(peer) => res.is_ok(),
                };
            }
            return true;
        }

        trace!("Ignoring {} unknown bytes from {}", payload.len(), from);
        true
    }
}

async fn poll_datagram(
    socket: &UdpSocket,
    buf: &mut [u8],
    deadline: Instant,
) -> io::Result<Option<(usize, SocketAddr)>> {
    match tokio::time::timeout_at(deadline, socket.recv_from(buf)).await {
        Ok(res) => res.map(Some),
        Err(_) => Ok(None),
    }
}

/// Peers found by a running [`DiscoveryService`]; dropping it stops the beacon
pub struct PeerStream {
    rx: mpsc::Receiver<PeerAddress>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PeerStream {
    /// Next newly discovered peer, or `None` once discovery has stopped
    pub async fn next_peer(&mut self) -> Option<PeerAddress> {
        self.rx.recv().await
    }

    /// Wait up to `timeout` for a peer
    pub async fn first_peer(&mut self, timeout: Duration) -> Option<PeerAddress> {
        tokio::time::timeout(timeout, self.next_peer())
            .await
            .ok()
            .flatten()
    }

    /// Stop the beacon and wait for its socket to close
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PeerStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
