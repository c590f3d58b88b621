//! Discovery beacon and responder talking over loopback UDP.

use filedrop_core::discovery::DiscoveryConfig;
use filedrop_core::{DISCOVER_MSG, DiscoveryService, RESPONSE_MSG};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .try_init()
        .ok();
}

/// A UDP port that was free a moment ago
fn free_udp_port() -> u16 {
    std::net::UdpSocket::bind("0.0.0.0:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn config(port: u16, probe_target: SocketAddr) -> DiscoveryConfig {
    DiscoveryConfig {
        port,
        probe_target,
        interval: Duration::from_millis(100),
        respond_to_probes: true,
    }
}

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

#[tokio::test]
async fn test_beacon_finds_responder() {
    init_logging();

    // The responder probes itself, which it must neither answer nor report
    let responder_port = free_udp_port();
    let responder = DiscoveryService::bind(config(responder_port, loopback(responder_port)))
        .await
        .unwrap();
    let mut responder_peers = responder.start(CancellationToken::new());

    let seeker = DiscoveryService::bind(config(0, loopback(responder_port)))
        .await
        .unwrap();
    let found = seeker.discover_for(Duration::from_millis(600)).await;

    assert_eq!(found.len(), 1);
    let peer = found.first().unwrap();
    assert_eq!(peer.socket_addr(), loopback(responder_port));

    assert!(
        responder_peers
            .first_peer(Duration::from_millis(300))
            .await
            .is_none(),
        "responder reported a peer from its own probes or from a probe"
    );
}

#[tokio::test]
async fn test_repeated_replies_yield_one_peer() {
    init_logging();
    let chatty = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let chatty_addr = chatty.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = [0u8; 64];
        while let Ok((len, from)) = chatty.recv_from(&mut buf).await {
            if &buf[..len] != DISCOVER_MSG {
                continue;
            }
            let _ = chatty.send_to(b"NOT_OUR_PROTOCOL", from).await;
            for _ in 0..5 {
                let _ = chatty.send_to(RESPONSE_MSG, from).await;
            }
        }
    });

    let seeker = DiscoveryService::bind(config(0, chatty_addr)).await.unwrap();
    let found = seeker.discover_for(Duration::from_millis(500)).await;

    assert_eq!(found.len(), 1);
    assert_eq!(found.first().unwrap().socket_addr(), chatty_addr);
}

#[tokio::test]
async fn test_responder_answers_foreign_probe() {
    init_logging();
    let responder_port = free_udp_port();
    let responder = DiscoveryService::bind(config(responder_port, loopback(responder_port)))
        .await
        .unwrap();
    let _peers = responder.start(CancellationToken::new());

    let prober = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    prober
        .send_to(DISCOVER_MSG, loopback(responder_port))
        .await
        .unwrap();

    let mut buf = [0u8; 64];
    let (len, from) = timeout(Duration::from_secs(2), prober.recv_from(&mut buf))
        .await
        .expect("no answer to probe")
        .unwrap();
    assert_eq!(&buf[..len], RESPONSE_MSG);
    assert_eq!(from.port(), responder_port);
}

#[tokio::test]
async fn test_silent_responder_when_disabled() {
    init_logging();
    let responder_port = free_udp_port();
    let responder = DiscoveryService::bind(DiscoveryConfig {
        respond_to_probes: false,
        ..config(responder_port, loopback(responder_port))
    })
    .await
    .unwrap();
    let _peers = responder.start(CancellationToken::new());

    let seeker = DiscoveryService::bind(config(0, loopback(responder_port)))
        .await
        .unwrap();
    let found = seeker.discover_for(Duration::from_millis(400)).await;
    assert!(found.is_empty());
}

#[tokio::test]
async fn test_cancel_ends_peer_stream() {
    init_logging();
    let seeker = DiscoveryService::bind(config(0, loopback(9))).await.unwrap();
    let cancel = CancellationToken::new();
    let mut peers = seeker.start(cancel.clone());

    cancel.cancel();
    let next = timeout(Duration::from_secs(2), peers.next_peer())
        .await
        .expect("stream did not end after cancel");
    assert!(next.is_none());
}
