use crate::config::NodeConfig;
use crate::discovery::{DiscoveredPeerSet, DiscoveryService, PeerStream};
use crate::error::{DiscoveryError, Result, Stage, TransferError};
use crate::transfer::{ReceiveReport, SendReport, send_files, spawn_listener};
use crate::{PeerAddress, TransferEvent};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Both directions of one run
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub sent: SendReport,
    pub received: Vec<ReceiveReport>,
}

/// Drives one node: find a peer, listen for its files and send ours
pub struct Coordinator {
    config: NodeConfig,
}

impl Coordinator {
    pub fn new(config: NodeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// TCP address for a transfer session with `peer`
    pub fn transfer_target(&self, peer: PeerAddress) -> SocketAddr {
        peer.transfer_addr(self.config.transfer_port)
    }

    /// Wait for the first peer, bounded by the configured discovery timeout.
    ///
    /// The beacon keeps answering other nodes' probes until `cancel` fires,
    /// so the peer we found can find us too.
    pub async fn discover_peer(
        &self,
        cancel: &CancellationToken,
        event_tx: &mpsc::Sender<TransferEvent>,
    ) -> std::result::Result<Option<PeerAddress>, DiscoveryError> {
        let service = DiscoveryService::bind(self.config.discovery_config()).await?;
        let mut stream = service.start(cancel.clone());

        let timeout = self.config.discovery_timeout();
        info!("Looking for peers for up to {:?}", timeout);
        let found = stream.first_peer(timeout).await;

        match found {
            Some(peer) => {
                let _ = event_tx.send(TransferEvent::PeerFound { peer }).await;
                keep_responding(stream);
            }
            None => {
                warn!("No peer answered within {:?}", timeout);
                stream.stop().await;
            }
        }
        Ok(found)
    }

    /// Collect every peer that answers within `window`.
    ///
    /// Like [`discover_peer`](Self::discover_peer), the beacon stays up
    /// answering probes until `cancel` fires.
    pub async fn discover_peers(
        &self,
        window: Duration,
        cancel: &CancellationToken,
        event_tx: &mpsc::Sender<TransferEvent>,
    ) -> std::result::Result<DiscoveredPeerSet, DiscoveryError> {
        let service = DiscoveryService::bind(self.config.discovery_config()).await?;
        let mut stream = service.start(cancel.clone());
        let deadline = Instant::now() + window;
        let mut found = DiscoveredPeerSet::default();

        while let Ok(Some(peer)) = tokio::time::timeout_at(deadline, stream.next_peer()).await {
            if found.insert(peer) {
                let _ = event_tx.send(TransferEvent::PeerFound { peer }).await;
            }
        }

        info!("Discovered {} peers in {:?}", found.len(), window);
        keep_responding(stream);
        Ok(found)
    }

    /// Exchange files with `target`.
    ///
    /// Starts the listener, waits until it is accepting, then sends `files`.
    /// Once sending is done it waits for the inbound side to finish or for
    /// `cancel`. A failed send cancels the listener and is returned.
    pub async fn run(
        &self,
        target: SocketAddr,
        files: Vec<PathBuf>,
        cancel: CancellationToken,
        event_tx: mpsc::Sender<TransferEvent>,
    ) -> Result<SessionSummary> {
        let options = self.config.session_options();
        let bind_addr = SocketAddr::new(
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            self.config.transfer_port,
        );

        let mut listener = spawn_listener(
            bind_addr,
            self.config.download_dir.clone(),
            options,
            self.config.accept_mode,
            cancel.child_token(),
            event_tx.clone(),
        );
        let local = listener.ready().await?;
        info!("Ready to receive on {}, sending to {}", local, target);

        let sent = tokio::select! {
            _ = cancel.cancelled() => Err(TransferError::Cancelled { stage: Stage::Connect }),
            res = send_files(target, files, &options, event_tx.clone()) => res,
        };

        let sent = match sent {
            Ok(report) => report,
            Err(e) => {
                listener.cancel();
                if let Err(inbound) = listener.join().await {
                    debug!("Listener stopped with: {}", inbound);
                }
                return Err(e);
            }
        };

        info!("Send complete, waiting for inbound files");
        let received = listener.join().await?;

        Ok(SessionSummary { sent, received })
    }
}

/// Keep the beacon answering probes in the background until its token fires
fn keep_responding(mut stream: PeerStream) {
    tokio::spawn(async move {
        while let Some(peer) = stream.next_peer().await {
            debug!("Also discovered {}", peer);
        }
    });
}
