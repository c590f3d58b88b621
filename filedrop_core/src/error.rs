//! Error types shared by the discovery and transfer layers.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransferError>;

/// Step of a transfer session at which a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Bind,
    Accept,
    Connect,
    /// Building the list of files to send
    Manifest,
    Count,
    Name,
    Body,
    /// Flushing and shutting down the connection
    Finish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Bind => "bind",
            Stage::Accept => "accept",
            Stage::Connect => "connect",
            Stage::Manifest => "manifest",
            Stage::Count => "count",
            Stage::Name => "name",
            Stage::Body => "body",
            Stage::Finish => "finish",
        };
        f.write_str(name)
    }
}

/// Renders " (file #n)" for errors tied to a file, nothing otherwise
struct FileIndex<'a>(&'a Option<usize>);

impl fmt::Display for FileIndex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(idx) => write!(f, " (file #{})", idx + 1),
            None => Ok(()),
        }
    }
}

/// Failure of a transfer session. Every variant aborts the whole session.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("network error at {stage}{}: {source}", FileIndex(.file_index))]
    Network {
        stage: Stage,
        file_index: Option<usize>,
        #[source]
        source: io::Error,
    },

    #[error("protocol error at {stage}{}: {reason}", FileIndex(.file_index))]
    Protocol {
        stage: Stage,
        file_index: Option<usize>,
        reason: String,
    },

    #[error("filesystem error at {stage}{} on {}: {source}", FileIndex(.file_index), .path.display())]
    Filesystem {
        stage: Stage,
        file_index: Option<usize>,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("session cancelled at {stage}")]
    Cancelled { stage: Stage },
}

impl TransferError {
    pub fn stage(&self) -> Stage {
        match self {
            TransferError::Network { stage, .. }
            | TransferError::Protocol { stage, .. }
            | TransferError::Filesystem { stage, .. }
            | TransferError::Cancelled { stage } => *stage,
        }
    }

    pub fn file_index(&self) -> Option<usize> {
        match self {
            TransferError::Network { file_index, .. }
            | TransferError::Protocol { file_index, .. }
            | TransferError::Filesystem { file_index, .. } => *file_index,
            TransferError::Cancelled { .. } => None,
        }
    }

    pub(crate) fn network(stage: Stage, file_index: Option<usize>, source: io::Error) -> Self {
        TransferError::Network {
            stage,
            file_index,
            source,
        }
    }

    pub(crate) fn filesystem(
        stage: Stage,
        file_index: Option<usize>,
        path: impl Into<PathBuf>,
        source: io::Error,
    ) -> Self {
        TransferError::Filesystem {
            stage,
            file_index,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn protocol(stage: Stage, file_index: Option<usize>, reason: impl Into<String>) -> Self {
        TransferError::Protocol {
            stage,
            file_index,
            reason: reason.into(),
        }
    }

    /// Classify a codec failure: I/O problems are network errors, the rest are protocol errors
    pub(crate) fn from_frame(stage: Stage, file_index: Option<usize>, err: FrameError) -> Self {
        match err {
            FrameError::Io(source) => TransferError::network(stage, file_index, source),
            other => TransferError::protocol(stage, file_index, other.to_string()),
        }
    }
}

/// Errors produced while reading or writing protocol frames
#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("stream ended early: expected {expected} bytes, got {received}")]
    UnexpectedEof { expected: u64, received: u64 },

    #[error("Message too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: usize },

    #[error("invalid file count: {0:?}")]
    InvalidCount(String),

    #[error("invalid file name: {0}")]
    InvalidName(String),

    #[error("file too large for the wire format: {0} bytes")]
    BodyTooLarge(u64),
}

/// Failure while streaming a file body from a source into a sink
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("reading body failed: {0}")]
    Source(#[source] FrameError),

    #[error("writing body failed: {0}")]
    Sink(#[source] io::Error),
}

/// Errors raised by the discovery beacon
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("cannot bind discovery port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("discovery socket error: {0}")]
    Socket(#[from] io::Error),
}
