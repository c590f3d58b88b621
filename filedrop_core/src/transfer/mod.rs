//! TCP file transfer sessions.
//!
//! This module provides:
//! - the length-prefixed wire framing (`protocol`)
//! - the sending side of a session (`sender`)
//! - the receiving side of a session (`receiver`)
//! - the inbound listener with readiness and cancellation (`server`)

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod constants;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod server;
pub mod utils;

// Re-export public API
pub use constants::TRANSFER_PORT;
pub use receiver::{ReceiveReport, receive_files};
pub use sender::{SendReport, build_manifest, send_files};
pub use server::{ListenerHandle, spawn_listener};

/// Timeouts applied to every blocking call of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: constants::DEFAULT_CONNECT_TIMEOUT,
            io_timeout: constants::DEFAULT_IO_TIMEOUT,
        }
    }
}

/// How many inbound sessions a listener serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptMode {
    /// Accept a single connection, then stop
    #[default]
    Once,
    /// Serve connections one after another until cancelled
    Repeat,
}
