use crate::error::{Result, Stage, TransferError};
use crate::{Role, TransferEvent};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::receiver::{ReceiveReport, receive_files};
use super::{AcceptMode, SessionOptions};

/// Handle to a listener task started with [`spawn_listener`]
pub struct ListenerHandle {
    ready_rx: Option<oneshot::Receiver<Result<SocketAddr>>>,
    local_addr: Option<SocketAddr>,
    cancel: CancellationToken,
    task: JoinHandle<Result<Vec<ReceiveReport>>>,
}

impl ListenerHandle {
    /// Wait until the listener is bound and accepting, returning its address
    pub async fn ready(&mut self) -> Result<SocketAddr> {
        if let Some(addr) = self.local_addr {
            return Ok(addr);
        }

        let rx = self
            .ready_rx
            .take()
            .ok_or(TransferError::Cancelled { stage: Stage::Bind })?;
        match rx.await {
            Ok(Ok(addr)) => {
                self.local_addr = Some(addr);
                Ok(addr)
            }
            Ok(Err(e)) => Err(e),
            // Task ended without reporting (panicked or aborted)
            Err(_) => Err(TransferError::Cancelled { stage: Stage::Bind }),
        }
    }

    /// Ask the listener to stop; an idle `accept` returns immediately
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the listener to finish and collect the sessions it received
    pub async fn join(self) -> Result<Vec<ReceiveReport>> {
        match self.task.await {
            Ok(res) => res,
            Err(e) => Err(TransferError::network(
                Stage::Accept,
                None,
                io::Error::other(format!("listener task failed: {}", e)),
            )),
        }
    }
}

/// Bind a TCP listener on `bind_addr` in a new task and serve inbound sessions.
///
/// The returned handle reports readiness once the socket is listening, so
/// callers never race the bind. With [`AcceptMode::Once`] the task ends
/// after the first session; with [`AcceptMode::Repeat`] it serves sessions
/// one after another until `cancel` fires.
pub fn spawn_listener(
    bind_addr: SocketAddr,
    download_dir: PathBuf,
    options: SessionOptions,
    mode: AcceptMode,
    cancel: CancellationToken,
    event_tx: mpsc::Sender<TransferEvent>,
) -> ListenerHandle {
    let (ready_tx, ready_rx) = oneshot::channel();
    let task_cancel = cancel.clone();

    let task = tokio::spawn(async move {
        let listener = match TcpListener::bind(bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!("Failed to bind transfer port {}: {}", bind_addr, e);
                let reported = io::Error::new(e.kind(), e.to_string());
                let _ = ready_tx.send(Err(TransferError::network(Stage::Bind, None, reported)));
                return Err(TransferError::network(Stage::Bind, None, e));
            }
        };
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransferError::network(Stage::Bind, None, e))?;

        info!("Listening for incoming files on {}", local_addr);
        let _ = event_tx
            .send(TransferEvent::ListenerReady { addr: local_addr })
            .await;
        let _ = ready_tx.send(Ok(local_addr));

        serve(listener, download_dir, options, mode, task_cancel, event_tx).await
    });

    ListenerHandle {
        ready_rx: Some(ready_rx),
        local_addr: None,
        cancel,
        task,
    }
}

async fn serve(
    listener: TcpListener,
    download_dir: PathBuf,
    options: SessionOptions,
    mode: AcceptMode,
    cancel: CancellationToken,
    event_tx: mpsc::Sender<TransferEvent>,
) -> Result<Vec<ReceiveReport>> {
    let mut reports = Vec::new();

    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Listener cancelled while waiting for a connection");
                break;
            }
            res = listener.accept() => res.map_err(|e| TransferError::network(Stage::Accept, None, e))?,
        };
        info!("Connection established with {}", peer);
        let _ = stream.set_nodelay(true);

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = event_tx
                    .send(TransferEvent::SessionFailed {
                        role: Role::Receiver,
                        peer: Some(peer),
                        error: "cancelled".to_string(),
                    })
                    .await;
                Err(TransferError::Cancelled { stage: Stage::Body })
            }
            res = receive_files(stream, peer, &download_dir, &options, event_tx.clone()) => res,
        };

        match mode {
            AcceptMode::Once => {
                reports.push(result?);
                break;
            }
            AcceptMode::Repeat => match result {
                Ok(report) => reports.push(report),
                Err(TransferError::Cancelled { .. }) => break,
                Err(e) => warn!("Inbound session from {} failed: {}", peer, e),
            },
        }
    }

    Ok(reports)
}
