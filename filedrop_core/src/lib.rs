use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod transfer;

pub use config::NodeConfig;
pub use coordinator::{Coordinator, SessionSummary};
pub use discovery::{DiscoveredPeerSet, DiscoveryService, PeerStream};
pub use error::{DiscoveryError, FrameError, Stage, TransferError};

/// Probe broadcast by a node looking for peers
pub const DISCOVER_MSG: &[u8] = b"DISCOVER_PEER";

/// Reply sent by a node that answers a probe
pub const RESPONSE_MSG: &[u8] = b"PEER_RESPONSE";

/// Address of a discovered or user-supplied peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddress(SocketAddr);

impl PeerAddress {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self(SocketAddr::new(host, port))
    }

    pub fn host(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    /// TCP address used to open a transfer session with this host
    pub fn transfer_addr(&self, transfer_port: u16) -> SocketAddr {
        SocketAddr::new(self.host(), transfer_port)
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

//Struct File metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileManifestEntry {
    pub file_name: String,
    pub file_size: u64,
    /// Local path on the sending side
    pub file_path: PathBuf,
}

/// A file written by the receiving side of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub file_name: String,
    pub file_size: u64,
    pub saved_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Sender,
    Receiver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sender => f.write_str("sender"),
            Role::Receiver => f.write_str("receiver"),
        }
    }
}

//Struct report from Core to the front-end
#[derive(Debug, Clone)]
pub enum TransferEvent {
    PeerFound {
        peer: PeerAddress,
    },

    /// The inbound listener is bound and accepting
    ListenerReady {
        addr: SocketAddr,
    },

    SessionStarted {
        role: Role,
        peer: SocketAddr,
        /// Announced file count; known up front by the sender, after the count frame by the receiver
        file_count: u32,
    },

    FileStarted {
        role: Role,
        index: usize,
        file_name: String,
        file_size: u64,
    },

    Progress {
        role: Role,
        index: usize,
        file_name: String,
        bytes_done: u64,
        total_bytes: u64,
        speed_bps: f64,
    },

    FileCompleted {
        role: Role,
        index: usize,
        file_name: String,
        file_size: u64,
    },

    SessionCompleted {
        role: Role,
        peer: SocketAddr,
        file_count: usize,
        total_bytes: u64,
    },

    SessionFailed {
        role: Role,
        peer: Option<SocketAddr>,
        error: String,
    },
}
