//! End-to-end network scenarios over loopback.
//!
//! Run with: cargo test --test p2p_test -- --nocapture

use sierra_net::messages::heading::{self, Heading};
use sierra_net::{Authority, Endpoint, Error, P2p, Settings};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

const DEADLINE: Duration = Duration::from_secs(15);

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn scratch(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("sierra_p2p_{}_{}.cache", tag, std::process::id()))
}

/// A node that listens on an ephemeral loopback port and dials nothing.
fn listener_settings(tag: &str) -> Settings {
    let mut settings = Settings::default();
    settings.binds = vec!["127.0.0.1:0".parse().unwrap()];
    settings.inbound_connections = 16;
    settings.outbound_connections = 0;
    settings.seeds = Vec::new();
    settings.peers = Vec::new();
    settings.host_pool_file = scratch(tag);
    settings.connect_timeout_seconds = 2;
    settings.channel_handshake_seconds = 5;
    settings.services_minimum = 0;
    settings
}

/// A node that only dials.
fn dialer_settings(tag: &str) -> Settings {
    let mut settings = listener_settings(tag);
    settings.binds = Vec::new();
    settings.inbound_connections = 0;
    settings
}

async fn start(p2p: &Arc<P2p>) -> Result<(), Error> {
    let (tx, rx) = oneshot::channel();
    p2p.start(move |code| {
        let _ = tx.send(code);
    });
    tokio::time::timeout(DEADLINE, rx).await.expect("start timed out").unwrap()
}

/// Watch for the first closed channel matching a stop code.
fn watch_close(p2p: &Arc<P2p>, expected: Error) -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    p2p.subscribe_close(move |event| {
        if let Ok(channel) = event
            && channel.stop_code() == Some(expected)
        {
            let _ = tx.send(());
            return false;
        }
        true
    });
    rx
}

fn cleanup(tags: &[&str]) {
    for tag in tags {
        let _ = std::fs::remove_file(scratch(tag));
        let _ = std::fs::remove_file(scratch(tag).with_extension("new"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handshake_success_outbound() {
    init_logging();
    let responder = P2p::new(listener_settings("hs_b"));
    start(&responder).await.unwrap();
    let listen = responder.listen_authority().unwrap();

    let (remote_tx, mut remote_rx) = mpsc::unbounded_channel();
    responder.subscribe_connect(move |event| {
        if let Ok(channel) = event {
            let _ = remote_tx.send(channel.clone());
            return false;
        }
        true
    });

    let mut settings = dialer_settings("hs_a");
    settings.peers = vec![Endpoint::from(listen)];
    let initiator = P2p::new(settings);
    let (local_tx, mut local_rx) = mpsc::unbounded_channel();
    initiator.subscribe_connect(move |event| {
        if let Ok(channel) = event {
            let _ = local_tx.send(channel.clone());
            return false;
        }
        true
    });
    start(&initiator).await.unwrap();

    let outbound = tokio::time::timeout(DEADLINE, local_rx.recv())
        .await
        .expect("outbound handshake timed out")
        .unwrap();
    let inbound = tokio::time::timeout(DEADLINE, remote_rx.recv())
        .await
        .expect("inbound handshake timed out")
        .unwrap();

    for channel in [&outbound, &inbound] {
        let peer = channel.peer_version().expect("peer version recorded");
        assert_eq!(peer.version, 70016);
        assert_eq!(peer.services, 9);
        assert!(peer.relay);
        assert_eq!(channel.negotiated_version(), 70016);
        assert!(channel.addr_v2(), "sendaddrv2 capability observed");
        assert!(channel.wtxid_relay(), "wtxidrelay capability observed");
    }
    assert!(!outbound.inbound());
    assert!(inbound.inbound());

    initiator.stop();
    responder.stop();
    cleanup(&["hs_a", "hs_b"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handshake_loopback_detected() {
    init_logging();
    let node = P2p::new(listener_settings("loop"));
    start(&node).await.unwrap();
    let listen = node.listen_authority().unwrap();

    let mut closed = watch_close(&node, Error::PeerLoopback);
    node.connect(&Endpoint::from(listen));

    tokio::time::timeout(DEADLINE, closed.recv())
        .await
        .expect("loopback not detected")
        .unwrap();

    node.stop();
    cleanup(&["loop"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handshake_insufficient_services() {
    init_logging();
    let mut weak = listener_settings("ins_b");
    weak.services_maximum = 1;
    let responder = P2p::new(weak);
    start(&responder).await.unwrap();
    let listen = responder.listen_authority().unwrap();

    let mut demanding = dialer_settings("ins_a");
    demanding.services_minimum = 9;
    demanding.enable_reject = true;
    let initiator = P2p::new(demanding);
    start(&initiator).await.unwrap();

    let mut closed = watch_close(&initiator, Error::PeerInsufficient);
    initiator.connect(&Endpoint::from(listen));

    tokio::time::timeout(DEADLINE, closed.recv())
        .await
        .expect("insufficient peer not rejected")
        .unwrap();

    initiator.stop();
    responder.stop();
    cleanup(&["ins_a", "ins_b"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_framing_bad_checksum_stops_channel() {
    init_logging();
    let node = P2p::new(listener_settings("cks"));
    start(&node).await.unwrap();
    let listen = node.listen_authority().unwrap();
    let mut closed = watch_close(&node, Error::InvalidChecksum);

    let mut raw = TcpStream::connect(("127.0.0.1", listen.port())).await.unwrap();
    // Heading built over one payload, the wire carries another.
    let magic = node.settings().magic;
    let heading = Heading::from_payload(magic, "ping", &[9u8; 8]);
    raw.write_all(&heading.serialize()).await.unwrap();
    raw.write_all(&[0u8; 8]).await.unwrap();

    tokio::time::timeout(DEADLINE, closed.recv())
        .await
        .expect("checksum corruption not detected")
        .unwrap();

    node.stop();
    cleanup(&["cks"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_framing_oversized_payload_stops_channel() {
    init_logging();
    let node = P2p::new(listener_settings("ovr"));
    start(&node).await.unwrap();
    let listen = node.listen_authority().unwrap();
    let mut closed = watch_close(&node, Error::OversizedPayload);

    let mut raw = TcpStream::connect(("127.0.0.1", listen.port())).await.unwrap();
    let heading = Heading {
        magic: node.settings().magic,
        command: "block".into(),
        payload_size: u32::MAX,
        checksum: 0,
    };
    raw.write_all(&heading.serialize()).await.unwrap();

    tokio::time::timeout(DEADLINE, closed.recv())
        .await
        .expect("oversized payload not detected")
        .unwrap();

    node.stop();
    cleanup(&["ovr"]);
}

/// Pre-seed a node's hosts file with `count` synthetic addresses in a
/// distinct `10.subnet` range.
fn write_hosts_file(path: &PathBuf, subnet: u8, count: usize) {
    let mut text = String::new();
    for index in 0..count {
        let host = index % 250 + 1;
        text.push_str(&format!("10.{}.0.{}:8333/1700000000/1\n", subnet, host));
    }
    std::fs::write(path, text).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_seed_session_reaches_quota() {
    init_logging();

    // Three live seeds holding 40, 35 and 30 addresses; one unreachable.
    let mut seeds = Vec::new();
    let mut nodes = Vec::new();
    for (index, count) in [(0u8, 40usize), (1, 35), (2, 30)] {
        let tag = format!("seed_{index}");
        let mut settings = listener_settings(&tag);
        settings.host_pool_capacity = 1000;
        write_hosts_file(&settings.host_pool_file, index, count);
        let node = P2p::new(settings);
        start(&node).await.unwrap();
        assert_eq!(node.address_count(), count);
        seeds.push(Endpoint::from(node.listen_authority().unwrap()));
        nodes.push(node);
    }
    seeds.push(Endpoint::new("127.0.0.1", 1));

    // 5 slots x batch 20 puts the seeding threshold at 100 addresses.
    let mut settings = dialer_settings("seed_client");
    settings.host_pool_capacity = 1000;
    settings.outbound_connections = 5;
    settings.connect_batch_size = 20;
    settings.connect_timeout_seconds = 1;
    settings.seeds = seeds;
    let client = P2p::new(settings);

    // Start succeeds only once cumulative learned addresses reach the
    // 100-address threshold; the unreachable fourth seed cannot block it.
    start(&client).await.unwrap();

    // 105 offered, minus anything an outbound slot already has in hand.
    let pooled = client.address_count();
    assert!(pooled <= 105, "expected unique entries only, pooled {pooled}");

    client.stop();
    for node in nodes {
        node.stop();
    }
    cleanup(&["seed_0", "seed_1", "seed_2", "seed_client"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_outbound_session_uses_pool() {
    init_logging();
    let responder = P2p::new(listener_settings("pool_b"));
    start(&responder).await.unwrap();
    let listen = responder.listen_authority().unwrap();

    // The dialer's pool holds exactly the responder's address.
    let mut settings = dialer_settings("pool_a");
    settings.outbound_connections = 1;
    settings.connect_batch_size = 1;
    settings.host_pool_capacity = 10;
    std::fs::write(
        &settings.host_pool_file,
        format!("{}/1700000000/0\n", Authority::from(listen.to_socket_addr())),
    )
    .unwrap();

    let dialer = P2p::new(settings);
    let (tx, mut rx) = mpsc::unbounded_channel();
    dialer.subscribe_connect(move |event| {
        if let Ok(channel) = event {
            let _ = tx.send(channel.authority());
            return false;
        }
        true
    });
    start(&dialer).await.unwrap();

    let connected = tokio::time::timeout(DEADLINE, rx.recv())
        .await
        .expect("outbound slot never connected")
        .unwrap();
    assert_eq!(connected.port(), listen.port());

    dialer.stop();
    responder.stop();
    cleanup(&["pool_a", "pool_b"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_heading_constants_agree_with_wire() {
    // Keep the public framing surface stable for embedders.
    assert_eq!(heading::HEADING_SIZE, 24);
    assert_eq!(heading::COMMAND_SIZE, 12);
    let framed = Heading::from_payload(0xd9b4bef9, "version", b"payload");
    assert_eq!(framed.serialize().len(), heading::HEADING_SIZE);
}
