use crate::{Role, TransferEvent};
use std::future::Future;
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::sync::mpsc;

use super::constants::{MAX_FILENAME_LENGTH, PROGRESS_STEP};

/// Run an I/O future with a deadline, turning expiry into `ErrorKind::TimedOut`
pub async fn with_timeout<T, F>(duration: Duration, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(res) => res,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("operation timed out after {:?}", duration),
        )),
    }
}

/// Create (or truncate) a file with owner-only permissions (0o600 on Unix)
pub async fn open_secure_file(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    options.open(path).await
}

/// Format transfer speed from bytes and elapsed time
pub fn format_transfer_speed(bytes_transferred: u64, elapsed_secs: f64) -> String {
    if elapsed_secs <= 0.0 {
        return "Starting...".to_string();
    }

    let speed_bps = bytes_transferred as f64 / elapsed_secs;
    if speed_bps > 1_000_000.0 {
        format!("{:.2} MB/s", speed_bps / 1_000_000.0)
    } else if speed_bps > 1_000.0 {
        format!("{:.1} KB/s", speed_bps / 1_000.0)
    } else {
        format!("{:.0} B/s", speed_bps)
    }
}

/// Sanitize file name to prevent path traversal attacks and ensure safety
pub fn sanitize_file_name(file_name: &str) -> String {
    // Split by both / and \ so either platform's separators are stripped
    let file_name = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("unknown_file");

    let mut clean_name: String = file_name.chars().filter(|c| !c.is_control()).collect();

    // See: https://learn.microsoft.com/en-us/windows/win32/fileio/naming-a-file
    let reserved_names = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
        "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    if reserved_names
        .iter()
        .any(|&r| clean_name.eq_ignore_ascii_case(r))
    {
        return "unknown_file".to_string();
    }

    if clean_name == ".." || clean_name == "." || clean_name.trim().is_empty() {
        return "unknown_file".to_string();
    }

    if clean_name.len() > MAX_FILENAME_LENGTH {
        let mut cutoff = MAX_FILENAME_LENGTH;
        while !clean_name.is_char_boundary(cutoff) {
            cutoff -= 1;
        }
        clean_name.truncate(cutoff);
    }

    clean_name
}

/// Turns byte counts from a body copy into throttled `Progress` events.
///
/// Called from a synchronous callback, so events go out with `try_send`:
/// a full channel drops the update instead of stalling the transfer.
pub struct ProgressTracker {
    event_tx: mpsc::Sender<TransferEvent>,
    role: Role,
    index: usize,
    file_name: String,
    total_bytes: u64,
    start_time: Instant,
    last_reported: u64,
}

impl ProgressTracker {
    pub fn new(
        event_tx: mpsc::Sender<TransferEvent>,
        role: Role,
        index: usize,
        file_name: &str,
        total_bytes: u64,
    ) -> Self {
        Self {
            event_tx,
            role,
            index,
            file_name: file_name.to_string(),
            total_bytes,
            start_time: Instant::now(),
            last_reported: 0,
        }
    }

    pub fn update(&mut self, bytes_done: u64) {
        if bytes_done != self.total_bytes && bytes_done - self.last_reported < PROGRESS_STEP {
            return;
        }
        self.last_reported = bytes_done;

        let elapsed = self.start_time.elapsed().as_secs_f64();
        let speed_bps = if elapsed > 0.0 {
            bytes_done as f64 / elapsed
        } else {
            0.0
        };

        let _ = self.event_tx.try_send(TransferEvent::Progress {
            role: self.role,
            index: self.index,
            file_name: self.file_name.clone(),
            bytes_done,
            total_bytes: self.total_bytes,
            speed_bps,
        });
    }
}
