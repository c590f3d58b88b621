//! Terminal rendering of transfer events with progress bars.

use filedrop_core::transfer::utils::format_transfer_speed;
use filedrop_core::{Role, TransferEvent};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const BAR_TEMPLATE: &str =
    "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})";

/// Draws one bar per file in flight and prints session milestones
pub struct EventRenderer {
    multi: MultiProgress,
    bars: HashMap<(Role, usize), ProgressBar>,
}

impl EventRenderer {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
        }
    }

    /// Consume events until every sender is gone
    pub fn spawn(mut self, mut event_rx: mpsc::Receiver<TransferEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                self.handle(event);
            }
        })
    }

    fn println(&self, line: String) {
        let _ = self.multi.println(line);
    }

    pub fn handle(&mut self, event: TransferEvent) {
        match event {
            TransferEvent::PeerFound { peer } => self.println(format!("Found peer {}", peer)),
            TransferEvent::ListenerReady { addr } => {
                self.println(format!("Waiting for incoming files on {}", addr))
            }
            TransferEvent::SessionStarted {
                role,
                peer,
                file_count,
            } => self.println(match role {
                Role::Sender => format!("Sending {} files to {}", file_count, peer),
                Role::Receiver => format!("Receiving {} files from {}", file_count, peer),
            }),
            TransferEvent::FileStarted {
                role,
                index,
                file_name,
                file_size,
            } => {
                let bar = self.multi.add(ProgressBar::new(file_size));
                bar.set_style(bar_style());
                bar.set_message(format!("{} {}", verb(role), file_name));
                if let Some(old) = self.bars.insert((role, index), bar) {
                    old.abandon();
                }
            }
            TransferEvent::Progress {
                role,
                index,
                file_name,
                bytes_done,
                ..
            } => {
                if let Some(bar) = self.bars.get(&(role, index)) {
                    bar.set_position(bytes_done);
                    let elapsed = bar.elapsed().as_secs_f64();
                    bar.set_message(format!(
                        "{} {} ({})",
                        verb(role),
                        file_name,
                        format_transfer_speed(bytes_done, elapsed)
                    ));
                }
            }
            TransferEvent::FileCompleted {
                role,
                index,
                file_name,
                file_size,
            } => {
                if let Some(bar) = self.bars.remove(&(role, index)) {
                    bar.set_position(file_size);
                    bar.finish_with_message(format!("{} {}: done", verb(role), file_name));
                }
            }
            TransferEvent::SessionCompleted {
                role,
                peer,
                file_count,
                total_bytes,
            } => self.println(format!(
                "{} session with {} complete: {} files, {}",
                role,
                peer,
                file_count,
                format_bytes(total_bytes)
            )),
            TransferEvent::SessionFailed { role, peer, error } => {
                self.abandon_role(role);
                match peer {
                    Some(peer) => self.println(format!("{} session with {} failed: {}", role, peer, error)),
                    None => self.println(format!("{} session failed: {}", role, error)),
                }
            }
        }
    }

    fn abandon_role(&mut self, role: Role) {
        let keys: Vec<_> = self.bars.keys().filter(|(r, _)| *r == role).copied().collect();
        for key in keys {
            if let Some(bar) = self.bars.remove(&key) {
                bar.abandon();
            }
        }
    }

    #[cfg(test)]
    fn active_bars(&self) -> usize {
        self.bars.len()
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(BAR_TEMPLATE)
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn verb(role: Role) -> &'static str {
    match role {
        Role::Sender => "Sending",
        Role::Receiver => "Receiving",
    }
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}
