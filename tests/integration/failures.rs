use crate::*;

use ferry_core::MAX_BLOCK_PAYLOAD;
use ferry_services::{Sender, TransportError};

/// A bound socket that never reads or answers.
async fn silent_peer() -> (Arc<UdpSocket>, SocketAddr) {
    let socket = ephemeral().await;
    let addr = socket.local_addr().unwrap();
    (socket, addr)
}

#[tokio::test]
async fn test_silent_peer_exhausts_retries() {
    let (_peer, addr) = silent_peer().await;
    let config = TransportConfig {
        initial_rto_ms: 20,
        max_rto_ms: 40,
        max_retries: 2,
        ..fast_transport()
    };
    let sender = Sender::start(ephemeral().await, addr, &config).unwrap();
    sender.send(Bytes::from_static(b"nobody home")).await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), sender.wait_idle())
        .await
        .expect("exhaustion within limit")
        .unwrap_err();
    match err {
        TransportError::RetransmitExhausted { sequence, attempts } => {
            assert_eq!(sequence, Seq::ZERO);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected RetransmitExhausted, got {other:?}"),
    }
    // Every later waiter sees the same fatal outcome.
    assert!(sender.wait_idle().await.is_err_and(|e| e.is_fatal()));

    // In-flight state is discarded and the sender refuses new work.
    assert!(sender.tracker().is_empty().await);
    assert!(matches!(
        sender.send(Bytes::from_static(b"late")).await,
        Err(TransportError::RetransmitExhausted { .. })
    ));
}

#[tokio::test]
async fn test_zero_retries_fails_on_first_timeout() {
    let (_peer, addr) = silent_peer().await;
    let config = TransportConfig {
        initial_rto_ms: 20,
        max_retries: 0,
        ..fast_transport()
    };
    let sender = Sender::start(ephemeral().await, addr, &config).unwrap();
    sender.send(Bytes::from_static(b"once")).await.unwrap();

    match sender.wait_idle().await {
        Err(TransportError::RetransmitExhausted { attempts, .. }) => assert_eq!(attempts, 1),
        other => panic!("expected RetransmitExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_wait_idle_timeout_while_retrying() {
    let (_peer, addr) = silent_peer().await;
    let config = TransportConfig {
        initial_rto_ms: 50,
        max_retries: 100,
        ..fast_transport()
    };
    let sender = Sender::start(ephemeral().await, addr, &config).unwrap();
    sender.send(Bytes::from_static(b"pending")).await.unwrap();

    let idle = sender
        .wait_idle_timeout(Duration::from_millis(150))
        .await
        .unwrap();
    assert!(!idle);
    assert_eq!(sender.tracker().len().await, 1);
}

#[tokio::test]
async fn test_cancel_drains_in_flight() {
    let (_peer, addr) = silent_peer().await;
    let sender = Sender::start(ephemeral().await, addr, &fast_transport()).unwrap();
    for p in numbered_blocks(4) {
        sender.send(p).await.unwrap();
    }
    assert_eq!(sender.tracker().len().await, 4);

    sender.cancel().await;
    assert!(sender.tracker().is_empty().await);
    assert!(matches!(sender.wait_idle().await, Err(TransportError::Cancelled)));
    assert!(matches!(
        sender.send(Bytes::from_static(b"after")).await,
        Err(TransportError::Cancelled)
    ));
}

#[tokio::test]
async fn test_oversized_payload_rejected() {
    let (_peer, addr) = silent_peer().await;
    let sender = Sender::start(ephemeral().await, addr, &fast_transport()).unwrap();

    let big = Bytes::from(vec![0u8; MAX_BLOCK_PAYLOAD + 1]);
    match sender.send(big).await {
        Err(TransportError::PayloadTooLarge(n)) => assert_eq!(n, MAX_BLOCK_PAYLOAD + 1),
        other => panic!("expected PayloadTooLarge, got {other:?}"),
    }
    // Nothing was registered and the sequence was not consumed.
    assert!(sender.tracker().is_empty().await);
    let s = sender.send(Bytes::from_static(b"fits")).await.unwrap();
    assert_eq!(s, Seq::ZERO);
}

#[tokio::test]
async fn test_initial_sequence_out_of_range() {
    let (_peer, addr) = silent_peer().await;
    let config = TransportConfig {
        initial_sequence: 10_000_000,
        ..fast_transport()
    };
    assert!(matches!(
        Sender::start(ephemeral().await, addr, &config),
        Err(TransportError::Sequence(_))
    ));
}

#[tokio::test]
async fn test_receiver_stops_on_shutdown() {
    let sink = Sink::default_start().await;
    sink.stop().await.unwrap();
}

#[tokio::test]
async fn test_receiver_stops_while_consumer_stalls() {
    let sink = Sink::start_with(SinkOptions {
        channel_capacity: 1,
        ..SinkOptions::default()
    })
    .await;
    let sender = Sender::start(ephemeral().await, sink.addr, &fast_transport()).unwrap();

    // Nobody reads deliveries: the first fills the channel and the receive
    // loop blocks handing over the second, after acking it.
    for p in numbered_blocks(2) {
        sender.send(p).await.unwrap();
    }
    assert!(sender.wait_idle_timeout(Duration::from_secs(5)).await.unwrap());

    tokio::time::timeout(Duration::from_secs(2), sink.stop())
        .await
        .expect("receive loop ignored shutdown")
        .unwrap();
}

#[tokio::test]
async fn test_idle_peers_are_pruned() {
    let mut sink = Sink::start_with(SinkOptions {
        idle_timeout: Duration::from_millis(100),
        ..SinkOptions::default()
    })
    .await;
    let sender = Sender::start(ephemeral().await, sink.addr, &fast_transport()).unwrap();
    sender.send(Bytes::from_static(b"hello")).await.unwrap();
    sink.collect(1, Duration::from_secs(5)).await.unwrap();
    sender.wait_idle().await.unwrap();
    assert_eq!(sink.connections.len(), 1);

    tokio::time::timeout(Duration::from_secs(2), async {
        while !sink.connections.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("idle peer never pruned");
}
