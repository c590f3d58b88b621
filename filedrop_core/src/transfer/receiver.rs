use crate::error::{BodyError, FrameError, Result, Stage, TransferError};
use crate::{ReceivedFile, Role, TransferEvent};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::SessionOptions;
use super::constants::BUFFER_SIZE;
use super::protocol::{copy_body, read_body_len, read_count, read_name};
use super::utils::{ProgressTracker, open_secure_file, sanitize_file_name, with_timeout};

/// Outcome of a successful inbound session
#[derive(Debug, Clone)]
pub struct ReceiveReport {
    pub peer: SocketAddr,
    pub files: Vec<ReceivedFile>,
    pub total_bytes: u64,
}

async fn frame_timeout<T, F>(duration: Duration, fut: F) -> std::result::Result<T, FrameError>
where
    F: Future<Output = std::result::Result<T, FrameError>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(res) => res,
        Err(_) => Err(FrameError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("no data from peer for {:?}", duration),
        ))),
    }
}

/// Receive every file announced on an accepted connection into `download_dir`.
///
/// Existing files with the same name are overwritten. A body cut short is left
/// on disk as is and the session fails.
pub async fn receive_files<R>(
    stream: R,
    peer: SocketAddr,
    download_dir: &Path,
    options: &SessionOptions,
    event_tx: mpsc::Sender<TransferEvent>,
) -> Result<ReceiveReport>
where
    R: AsyncRead + Unpin,
{
    let result = read_session(stream, peer, download_dir, options, &event_tx).await;

    match &result {
        Ok(report) => {
            info!(
                "Received {} files ({} bytes) from {}",
                report.files.len(),
                report.total_bytes,
                peer
            );
            let _ = event_tx
                .send(TransferEvent::SessionCompleted {
                    role: Role::Receiver,
                    peer,
                    file_count: report.files.len(),
                    total_bytes: report.total_bytes,
                })
                .await;
        }
        Err(e) => {
            error!("Receiving from {} failed: {}", peer, e);
            let _ = event_tx
                .send(TransferEvent::SessionFailed {
                    role: Role::Receiver,
                    peer: Some(peer),
                    error: e.to_string(),
                })
                .await;
        }
    }

    result
}

async fn read_session<R>(
    stream: R,
    peer: SocketAddr,
    download_dir: &Path,
    options: &SessionOptions,
    event_tx: &mpsc::Sender<TransferEvent>,
) -> Result<ReceiveReport>
where
    R: AsyncRead + Unpin,
{
    let io_timeout = options.io_timeout;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, stream);

    let count = frame_timeout(io_timeout, read_count(&mut reader))
        .await
        .map_err(|e| TransferError::from_frame(Stage::Count, None, e))?;
    info!("Receiving {} files from {}", count, peer);
    let _ = event_tx
        .send(TransferEvent::SessionStarted {
            role: Role::Receiver,
            peer,
            file_count: count,
        })
        .await;

    let mut files = Vec::new();
    let mut total_bytes = 0u64;

    for idx in 0..count as usize {
        let raw_name = frame_timeout(io_timeout, read_name(&mut reader))
            .await
            .map_err(|e| TransferError::from_frame(Stage::Name, Some(idx), e))?;
        let file_name = sanitize_file_name(&raw_name);
        if file_name != raw_name {
            warn!("Peer sent unsafe file name {:?}, saving as {:?}", raw_name, file_name);
        }

        let file_size = frame_timeout(io_timeout, read_body_len(&mut reader))
            .await
            .map_err(|e| TransferError::from_frame(Stage::Body, Some(idx), e))?;

        info!("Receiving file: {} ({} bytes)", file_name, file_size);
        let _ = event_tx
            .send(TransferEvent::FileStarted {
                role: Role::Receiver,
                index: idx,
                file_name: file_name.clone(),
                file_size,
            })
            .await;

        // Wait for the first body byte so a dropped connection leaves no empty stub behind
        if file_size > 0 {
            let available = with_timeout(io_timeout, reader.fill_buf())
                .await
                .map_err(|e| TransferError::network(Stage::Body, Some(idx), e))?
                .len();
            if available == 0 {
                return Err(TransferError::from_frame(
                    Stage::Body,
                    Some(idx),
                    FrameError::UnexpectedEof {
                        expected: file_size,
                        received: 0,
                    },
                ));
            }
        }

        let file_path = download_dir.join(&file_name);
        tokio::fs::create_dir_all(download_dir)
            .await
            .map_err(|e| TransferError::filesystem(Stage::Body, Some(idx), download_dir, e))?;
        let mut file = open_secure_file(&file_path)
            .await
            .map_err(|e| TransferError::filesystem(Stage::Body, Some(idx), &file_path, e))?;

        let mut tracker =
            ProgressTracker::new(event_tx.clone(), Role::Receiver, idx, &file_name, file_size);
        copy_body(&mut reader, &mut file, file_size, io_timeout, |done| {
            tracker.update(done)
        })
        .await
        .map_err(|e| match e {
            BodyError::Source(source) => TransferError::from_frame(Stage::Body, Some(idx), source),
            BodyError::Sink(source) => {
                TransferError::filesystem(Stage::Body, Some(idx), &file_path, source)
            }
        })?;

        info!("File received successfully: {}", file_name);
        let _ = event_tx
            .send(TransferEvent::FileCompleted {
                role: Role::Receiver,
                index: idx,
                file_name: file_name.clone(),
                file_size,
            })
            .await;

        total_bytes += file_size;
        files.push(ReceivedFile {
            file_name,
            file_size,
            saved_path: file_path,
        });
    }

    Ok(ReceiveReport {
        peer,
        files,
        total_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::protocol::{encode_body_len, encode_count, encode_name};

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn file_frames(wire: &mut Vec<u8>, name: &str, body: &[u8]) {
        wire.extend_from_slice(&encode_name(name).unwrap());
        wire.extend_from_slice(&encode_body_len(body.len() as u64).unwrap());
        wire.extend_from_slice(body);
    }

    #[tokio::test]
    async fn test_receive_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut wire = encode_count(1).to_vec();
        file_frames(&mut wire, "a.txt", b"hello");

        let (tx, _rx) = mpsc::channel(64);
        let report = receive_files(&wire[..], peer(), dir.path(), &SessionOptions::default(), tx)
            .await
            .unwrap();

        assert_eq!(report.files.len(), 1);
        assert_eq!(report.total_bytes, 5);
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_receive_zero_files() {
        let dir = tempfile::tempdir().unwrap();
        let wire = encode_count(0).to_vec();

        let (tx, _rx) = mpsc::channel(64);
        let report = receive_files(&wire[..], peer(), dir.path(), &SessionOptions::default(), tx)
            .await
            .unwrap();
        assert!(report.files.is_empty());
    }

    #[tokio::test]
    async fn test_traversal_name_stays_in_download_dir() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        let mut wire = encode_count(1).to_vec();
        file_frames(&mut wire, "../escape.txt", b"data");

        let (tx, _rx) = mpsc::channel(64);
        let report = receive_files(&wire[..], peer(), &inbox, &SessionOptions::default(), tx)
            .await
            .unwrap();

        assert_eq!(report.files[0].file_name, "escape.txt");
        assert!(inbox.join("escape.txt").exists());
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_truncated_body_leaves_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut wire = encode_count(1).to_vec();
        wire.extend_from_slice(&encode_name("cut.bin").unwrap());
        wire.extend_from_slice(&encode_body_len(10).unwrap());
        wire.extend_from_slice(b"abc");

        let (tx, _rx) = mpsc::channel(64);
        let err = receive_files(&wire[..], peer(), dir.path(), &SessionOptions::default(), tx)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Protocol { .. }));
        assert_eq!(err.stage(), Stage::Body);
        assert_eq!(err.file_index(), Some(0));
        assert_eq!(std::fs::read(dir.path().join("cut.bin")).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_missing_body_creates_no_stub() {
        let dir = tempfile::tempdir().unwrap();
        let mut wire = encode_count(2).to_vec();
        file_frames(&mut wire, "a.txt", b"first");
        wire.extend_from_slice(&encode_name("b.txt").unwrap());
        wire.extend_from_slice(&encode_body_len(6).unwrap());

        let (tx, _rx) = mpsc::channel(64);
        let err = receive_files(&wire[..], peer(), dir.path(), &SessionOptions::default(), tx)
            .await
            .unwrap_err();

        assert_eq!(err.file_index(), Some(1));
        assert!(dir.path().join("a.txt").exists());
        assert!(!dir.path().join("b.txt").exists());
    }

    #[tokio::test]
    async fn test_malformed_count_reports_count_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut wire = 3u32.to_be_bytes().to_vec();
        wire.extend_from_slice(b"two");

        let (tx, _rx) = mpsc::channel(64);
        let err = receive_files(&wire[..], peer(), dir.path(), &SessionOptions::default(), tx)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Protocol { .. }));
        assert_eq!(err.stage(), Stage::Count);
        assert_eq!(err.file_index(), None);
    }

    #[tokio::test]
    async fn test_write_failure_aborts_session() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the download directory should be
        let not_a_dir = dir.path().join("inbox");
        std::fs::write(&not_a_dir, b"occupied").unwrap();

        let mut wire = encode_count(2).to_vec();
        file_frames(&mut wire, "a.txt", b"first");
        file_frames(&mut wire, "b.txt", b"other");

        let (tx, mut rx) = mpsc::channel(64);
        let err = receive_files(&wire[..], peer(), &not_a_dir, &SessionOptions::default(), tx)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Filesystem { .. }), "got {:?}", err);
        assert_eq!(err.stage(), Stage::Body);
        assert_eq!(err.file_index(), Some(0));

        let mut started = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let TransferEvent::FileStarted { index, .. } = event {
                started.push(index);
            }
        }
        assert_eq!(started, [0]);
        assert_eq!(std::fs::read(&not_a_dir).unwrap(), b"occupied");
    }

    #[tokio::test]
    async fn test_idle_peer_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let (_client, server) = tokio::io::duplex(64);
        let options = SessionOptions {
            io_timeout: Duration::from_millis(100),
            ..SessionOptions::default()
        };

        let (tx, _rx) = mpsc::channel(64);
        let err = receive_files(server, peer(), dir.path(), &options, tx)
            .await
            .unwrap_err();

        match err {
            TransferError::Network { stage, source, .. } => {
                assert_eq!(stage, Stage::Count);
                assert_eq!(source.kind(), io::ErrorKind::TimedOut);
            }
            other => panic!("Expected timeout, got {:?}", other),
        }
    }
}
