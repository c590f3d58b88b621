//! Interactive prompts and parsing of user-supplied inputs.

use anyhow::{Context, Result, bail};
use filedrop_core::{DiscoveredPeerSet, PeerAddress};
use std::io::{self, BufRead, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Print `message` and read one trimmed line from stdin
pub async fn prompt(message: String) -> Result<String> {
    tokio::task::spawn_blocking(move || -> Result<String> {
        let mut stdout = io::stdout();
        write!(stdout, "{}", message)?;
        stdout.flush()?;

        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read from stdin")?;
        Ok(line.trim().to_string())
    })
    .await
    .context("Prompt task failed")?
}

/// Split a comma-separated list of paths, ignoring blank entries
pub fn parse_file_list(input: &str) -> Vec<PathBuf> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Every path must be an existing regular file
pub fn validate_files(files: &[PathBuf]) -> Result<()> {
    if files.is_empty() {
        bail!("No files to send");
    }
    for path in files {
        check_file(path)?;
    }
    Ok(())
}

fn check_file(path: &Path) -> Result<()> {
    let metadata =
        std::fs::metadata(path).with_context(|| format!("File not found: {}", path.display()))?;
    if !metadata.is_file() {
        bail!("Not a regular file: {}", path.display());
    }
    Ok(())
}

/// Resolve the peer answer: an IP address, or empty to take the first discovered peer
pub fn choose_peer(answer: &str, discovered: &DiscoveredPeerSet) -> Result<IpAddr> {
    if answer.is_empty() {
        return discovered
            .first()
            .map(|peer: PeerAddress| peer.host())
            .context("No peer discovered and none entered");
    }
    answer
        .parse::<IpAddr>()
        .with_context(|| format!("Invalid peer address: {}", answer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    #[test]
    fn test_parse_file_list() {
        let files = parse_file_list(" a.txt, dir/b.bin ,,c ");
        assert_eq!(
            files,
            vec![
                PathBuf::from("a.txt"),
                PathBuf::from("dir/b.bin"),
                PathBuf::from("c")
            ]
        );
        assert!(parse_file_list("  ").is_empty());
    }

    #[test]
    fn test_validate_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"hello").unwrap();

        assert!(validate_files(std::slice::from_ref(&file)).is_ok());
        assert!(validate_files(&[]).is_err());

        let err = validate_files(&[file, dir.path().join("missing.txt")]).unwrap_err();
        assert!(err.to_string().contains("missing.txt"));

        let err = validate_files(&[dir.path().to_path_buf()]).unwrap_err();
        assert!(err.to_string().contains("Not a regular file"));
    }

    #[test]
    fn test_choose_peer() {
        let mut discovered = DiscoveredPeerSet::default();
        assert!(choose_peer("", &discovered).is_err());

        discovered.insert(PeerAddress::from(
            "192.168.1.30:5001".parse::<SocketAddr>().unwrap(),
        ));
        assert_eq!(
            choose_peer("", &discovered).unwrap().to_string(),
            "192.168.1.30"
        );
        assert_eq!(
            choose_peer("10.0.0.2", &discovered).unwrap().to_string(),
            "10.0.0.2"
        );
        assert!(choose_peer("not-an-ip", &discovered).is_err());
    }
}
