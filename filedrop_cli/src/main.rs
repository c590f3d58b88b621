//! filedrop: find a peer on the local network and swap files with it

mod input;
mod progress;

use anyhow::{Context, Result};
use clap::Parser;
use filedrop_core::transfer::AcceptMode;
use filedrop_core::{Coordinator, DiscoveredPeerSet, NodeConfig, SessionSummary};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use input::{choose_peer, parse_file_list, prompt, validate_files};
use progress::{EventRenderer, format_bytes};

/// Send files to a peer on the local network while receiving theirs
#[derive(Parser)]
#[command(name = "filedrop")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Peer IP address; prompted for when missing
    #[arg(long)]
    peer: Option<IpAddr>,

    /// Files to send, comma-separated; prompted for when missing
    #[arg(long, value_delimiter = ',')]
    files: Vec<PathBuf>,

    /// How long to look for peers before asking for one
    #[arg(long, default_value_t = 3)]
    discover_secs: u64,

    /// Where received files are written
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Keep accepting inbound sessions until Ctrl+C
    #[arg(long)]
    repeat: bool,

    /// Connect to the first peer that answers instead of asking
    #[arg(long, conflicts_with = "peer")]
    first_peer: bool,

    /// Store the given settings as the new defaults
    #[arg(long)]
    save_config: bool,
}

impl Cli {
    fn apply_to(&self, config: &mut NodeConfig) {
        if let Some(dir) = &self.download_dir {
            config.download_dir = dir.clone();
        }
        if self.repeat {
            config.accept_mode = AcceptMode::Repeat;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose { "debug" } else { "info" })
        .init();

    let mut config = NodeConfig::load();
    cli.apply_to(&mut config);
    if cli.save_config {
        config.save().context("Failed to save settings")?;
        if let Some(path) = NodeConfig::config_path() {
            info!("Saved settings to {}", path.display());
        }
    }

    let files = if cli.files.is_empty() {
        parse_file_list(&prompt("Files to send (comma-separated): ".to_string()).await?)
    } else {
        cli.files.clone()
    };
    validate_files(&files)?;

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, shutting down");
            ctrl_c_cancel.cancel();
        }
    });

    let (event_tx, event_rx) = mpsc::channel(1000);
    let renderer = EventRenderer::new().spawn(event_rx);
    let coordinator = Coordinator::new(config);

    let peer_ip = match cli.peer {
        Some(ip) => ip,
        None if cli.first_peer => coordinator
            .discover_peer(&cancel, &event_tx)
            .await
            .context("Peer discovery failed")?
            .map(|peer| peer.host())
            .context("No peer answered within the discovery timeout")?,
        None => {
            let window = Duration::from_secs(cli.discover_secs);
            let discovered = coordinator
                .discover_peers(window, &cancel, &event_tx)
                .await
                .context("Peer discovery failed")?;
            ask_for_peer(&discovered).await?
        }
    };
    let target = SocketAddr::new(peer_ip, coordinator.config().transfer_port);

    let result = coordinator
        .run(target, files, cancel.clone(), event_tx)
        .await;

    // Stop the discovery responder
    cancel.cancel();
    let _ = renderer.await;

    let summary = result.with_context(|| format!("Transfer with {} failed", target))?;
    print_summary(&summary);
    Ok(())
}

async fn ask_for_peer(discovered: &DiscoveredPeerSet) -> Result<IpAddr> {
    let message = match discovered.first() {
        Some(first) => {
            for (idx, peer) in discovered.iter().enumerate() {
                println!("  [{}] {}", idx + 1, peer.host());
            }
            format!("Peer IP [{}]: ", first.host())
        }
        None => {
            println!("No peers answered");
            "Peer IP: ".to_string()
        }
    };

    let answer = prompt(message).await?;
    choose_peer(&answer, discovered)
}

fn print_summary(summary: &SessionSummary) {
    info!(
        "Sent {} files ({}) to {}",
        summary.sent.files.len(),
        format_bytes(summary.sent.total_bytes),
        summary.sent.peer
    );
    for report in &summary.received {
        info!(
            "Received {} files ({}) from {}",
            report.files.len(),
            format_bytes(report.total_bytes),
            report.peer
        );
        for file in &report.files {
            println!("  {}", file.saved_path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_parse() {
        let cli = Cli::try_parse_from([
            "filedrop",
            "--peer",
            "192.168.1.40",
            "--files",
            "a.txt,b.txt",
            "--download-dir",
            "inbox",
            "--repeat",
            "-v",
        ])
        .unwrap();

        assert_eq!(cli.peer, Some("192.168.1.40".parse().unwrap()));
        assert_eq!(cli.files, vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
        assert_eq!(cli.discover_secs, 3);
        assert!(cli.verbose);

        let mut config = NodeConfig::default();
        cli.apply_to(&mut config);
        assert_eq!(config.download_dir, PathBuf::from("inbox"));
        assert_eq!(config.accept_mode, AcceptMode::Repeat);
    }

    #[test]
    fn test_defaults_leave_config_untouched() {
        let cli = Cli::try_parse_from(["filedrop"]).unwrap();
        assert!(cli.peer.is_none());
        assert!(cli.files.is_empty());

        let mut config = NodeConfig::default();
        cli.apply_to(&mut config);
        assert_eq!(config, NodeConfig::default());
    }

    #[test]
    fn test_first_peer_and_save_flags() {
        let cli = Cli::try_parse_from(["filedrop", "--first-peer", "--save-config"]).unwrap();
        assert!(cli.first_peer);
        assert!(cli.save_config);
        assert!(cli.peer.is_none());

        let conflicting = Cli::try_parse_from(["filedrop", "--first-peer", "--peer", "10.0.0.2"]);
        assert!(conflicting.is_err());
    }

    #[test]
    fn test_invalid_peer_rejected() {
        assert!(Cli::try_parse_from(["filedrop", "--peer", "nope"]).is_err());
    }
}
