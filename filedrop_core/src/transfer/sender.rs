use crate::error::{BodyError, FrameError, Result, Stage, TransferError};
use crate::{FileManifestEntry, Role, TransferEvent};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::SessionOptions;
use super::constants::MAX_BODY_SIZE;
use super::protocol::{copy_body, encode_body_len, encode_count, encode_name, write_frame};
use super::utils::{ProgressTracker, with_timeout};

/// Outcome of a successful outbound session
#[derive(Debug, Clone)]
pub struct SendReport {
    pub peer: SocketAddr,
    pub files: Vec<FileManifestEntry>,
    pub total_bytes: u64,
}

/// Stat every path and build the ordered list of files to send
pub async fn build_manifest(files: &[PathBuf]) -> Result<Vec<FileManifestEntry>> {
    let mut manifest = Vec::with_capacity(files.len());

    for (idx, path) in files.iter().enumerate() {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| TransferError::filesystem(Stage::Manifest, Some(idx), path, e))?;
        if !metadata.is_file() {
            return Err(TransferError::filesystem(
                Stage::Manifest,
                Some(idx),
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }

        let file_size = metadata.len();
        if file_size > MAX_BODY_SIZE {
            return Err(TransferError::protocol(
                Stage::Manifest,
                Some(idx),
                FrameError::BodyTooLarge(file_size).to_string(),
            ));
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::protocol(Stage::Manifest, Some(idx), "Invalid file name"))?
            .to_string();

        manifest.push(FileManifestEntry {
            file_name,
            file_size,
            file_path: path.clone(),
        });
    }

    Ok(manifest)
}

/// Send files to a remote peer over a fresh TCP connection.
///
/// Files go out strictly in the given order. The connection is shut down
/// after the last body is flushed; any failure aborts the whole session.
pub async fn send_files(
    target: SocketAddr,
    files: Vec<PathBuf>,
    options: &SessionOptions,
    event_tx: mpsc::Sender<TransferEvent>,
) -> Result<SendReport> {
    let result = send_session(target, &files, options, &event_tx).await;

    match &result {
        Ok(report) => {
            info!(
                "Sent {} files ({} bytes) to {}",
                report.files.len(),
                report.total_bytes,
                target
            );
            let _ = event_tx
                .send(TransferEvent::SessionCompleted {
                    role: Role::Sender,
                    peer: target,
                    file_count: report.files.len(),
                    total_bytes: report.total_bytes,
                })
                .await;
        }
        Err(e) => {
            error!("Sending to {} failed: {}", target, e);
            let _ = event_tx
                .send(TransferEvent::SessionFailed {
                    role: Role::Sender,
                    peer: Some(target),
                    error: e.to_string(),
                })
                .await;
        }
    }

    result
}

async fn send_session(
    target: SocketAddr,
    files: &[PathBuf],
    options: &SessionOptions,
    event_tx: &mpsc::Sender<TransferEvent>,
) -> Result<SendReport> {
    let manifest = build_manifest(files).await?;

    info!("Connecting to {} to send {} files", target, manifest.len());
    let mut stream = with_timeout(options.connect_timeout, TcpStream::connect(target))
        .await
        .map_err(|e| TransferError::network(Stage::Connect, None, e))?;
    let _ = stream.set_nodelay(true);

    let total_bytes = write_session(&mut stream, &manifest, options, event_tx, target).await?;

    // Closing the write half tells the receiver nothing else follows
    with_timeout(options.io_timeout, stream.shutdown())
        .await
        .map_err(|e| TransferError::network(Stage::Finish, None, e))?;

    Ok(SendReport {
        peer: target,
        files: manifest,
        total_bytes,
    })
}

/// Write the count frame and every file of `manifest` to `writer`, in order
pub async fn write_session<W>(
    writer: &mut W,
    manifest: &[FileManifestEntry],
    options: &SessionOptions,
    event_tx: &mpsc::Sender<TransferEvent>,
    peer: SocketAddr,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let count = u32::try_from(manifest.len())
        .map_err(|_| TransferError::protocol(Stage::Count, None, "too many files"))?;
    write_frame(writer, &encode_count(count), options.io_timeout)
        .await
        .map_err(|e| TransferError::network(Stage::Count, None, e))?;

    let _ = event_tx
        .send(TransferEvent::SessionStarted {
            role: Role::Sender,
            peer,
            file_count: count,
        })
        .await;

    let mut total_bytes = 0u64;
    for (idx, entry) in manifest.iter().enumerate() {
        send_single_file(writer, idx, entry, options, event_tx).await?;
        total_bytes += entry.file_size;
    }

    with_timeout(options.io_timeout, writer.flush())
        .await
        .map_err(|e| TransferError::network(Stage::Finish, None, e))?;
    Ok(total_bytes)
}

async fn send_single_file<W>(
    writer: &mut W,
    idx: usize,
    entry: &FileManifestEntry,
    options: &SessionOptions,
    event_tx: &mpsc::Sender<TransferEvent>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    // Opened only now: a file removed after the manifest was built aborts here
    let mut file = File::open(&entry.file_path)
        .await
        .map_err(|e| TransferError::filesystem(Stage::Body, Some(idx), &entry.file_path, e))?;

    info!("Sending file: {} ({} bytes)", entry.file_name, entry.file_size);
    let _ = event_tx
        .send(TransferEvent::FileStarted {
            role: Role::Sender,
            index: idx,
            file_name: entry.file_name.clone(),
            file_size: entry.file_size,
        })
        .await;

    let name_frame = encode_name(&entry.file_name)
        .map_err(|e| TransferError::from_frame(Stage::Name, Some(idx), e))?;
    write_frame(writer, &name_frame, options.io_timeout)
        .await
        .map_err(|e| TransferError::network(Stage::Name, Some(idx), e))?;

    let len_prefix = encode_body_len(entry.file_size)
        .map_err(|e| TransferError::from_frame(Stage::Body, Some(idx), e))?;
    write_frame(writer, &len_prefix, options.io_timeout)
        .await
        .map_err(|e| TransferError::network(Stage::Body, Some(idx), e))?;

    let mut tracker = ProgressTracker::new(
        event_tx.clone(),
        Role::Sender,
        idx,
        &entry.file_name,
        entry.file_size,
    );
    copy_body(
        &mut file,
        writer,
        entry.file_size,
        options.io_timeout,
        |done| tracker.update(done),
    )
    .await
    .map_err(|e| match e {
        BodyError::Source(FrameError::UnexpectedEof { expected, received }) => {
            TransferError::filesystem(
                Stage::Body,
                Some(idx),
                &entry.file_path,
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "file shrank during transfer: read {}/{} bytes",
                        received, expected
                    ),
                ),
            )
        }
        BodyError::Source(FrameError::Io(source)) => {
            TransferError::filesystem(Stage::Body, Some(idx), &entry.file_path, source)
        }
        BodyError::Source(other) => TransferError::from_frame(Stage::Body, Some(idx), other),
        BodyError::Sink(source) => TransferError::network(Stage::Body, Some(idx), source),
    })?;

    debug!("File body flushed: {}", entry.file_name);
    let _ = event_tx
        .send(TransferEvent::FileCompleted {
            role: Role::Sender,
            index: idx,
            file_name: entry.file_name.clone(),
            file_size: entry.file_size,
        })
        .await;

    Ok(())
}
