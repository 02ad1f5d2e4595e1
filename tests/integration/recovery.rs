use crate::*;

use ferry_core::AckNotice;
use ferry_services::Sender;

const LIMIT: Duration = Duration::from_secs(10);

/// Push `count` blocks through a relay with `fault` and check every one
/// arrives exactly once and in order.
async fn transfer_through(fault: Fault, count: usize) {
    let mut sink = Sink::default_start().await;
    let relay = Relay::start(sink.addr, fault).await;
    let sender = Sender::start(ephemeral().await, relay.addr, &fast_transport()).unwrap();

    let payloads = numbered_blocks(count);
    for p in &payloads {
        sender.send(p.clone()).await.unwrap();
    }

    let delivered = sink.collect(count, LIMIT).await.unwrap();
    for (i, d) in delivered.iter().enumerate() {
        assert_eq!(d.sequence, seq(i as u32), "{fault:?}: out of order at {i}");
        assert_eq!(d.payload, payloads[i]);
    }

    assert!(
        sender.wait_idle_timeout(LIMIT).await.unwrap(),
        "{fault:?}: sender never went idle"
    );
    assert!(
        sink.stays_quiet(Duration::from_millis(150)).await,
        "{fault:?}: duplicate delivery"
    );
}

#[tokio::test]
async fn test_clean_relay() {
    transfer_through(Fault::None, 10).await;
}

#[tokio::test]
async fn test_recovers_dropped_data() {
    transfer_through(Fault::DropData(3), 30).await;
}

#[tokio::test]
async fn test_recovers_corrupted_data() {
    transfer_through(Fault::CorruptData(4), 30).await;
}

#[tokio::test]
async fn test_survives_dropped_acks() {
    transfer_through(Fault::DropAcks(2), 30).await;
}

#[tokio::test]
async fn test_duplicates_delivered_once() {
    transfer_through(Fault::DuplicateData, 15).await;
}

#[tokio::test]
async fn test_first_block_lost_holds_back_later_blocks() {
    let mut sink = Sink::default_start().await;

    // Blocks 1..=3 reach the receiver before block 0.
    let checker = IntegrityChecker::default();
    let raw = ephemeral().await;
    for v in [1u32, 2, 3] {
        let block = checker.seal(seq(v), format!("block {v}"));
        raw.send_to(&wire::encode(&Frame::Data(block)).unwrap(), sink.addr)
            .await
            .unwrap();
    }
    assert!(sink.stays_quiet(Duration::from_millis(100)).await);

    // Acks so far carry no cumulative value.
    let mut buf = vec![0u8; MAX_DATAGRAM];
    for _ in 0..3 {
        let (len, _) = raw.recv_from(&mut buf).await.unwrap();
        match wire::decode(&buf[..len]).unwrap() {
            Frame::Ack(notice) => assert_eq!(notice.cumulative_ack, None),
            other => panic!("expected ack, got {other:?}"),
        }
    }

    let block = checker.seal(Seq::ZERO, "block 0");
    raw.send_to(&wire::encode(&Frame::Data(block)).unwrap(), sink.addr)
        .await
        .unwrap();

    let delivered = sink.collect(4, LIMIT).await.unwrap();
    let seqs: Vec<u32> = delivered.iter().map(|d| d.sequence.value()).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3]);

    let (len, _) = raw.recv_from(&mut buf).await.unwrap();
    match wire::decode(&buf[..len]).unwrap() {
        Frame::Ack(notice) => {
            assert_eq!(notice.sequence, Seq::ZERO);
            assert_eq!(notice.cumulative_ack, Some(seq(3)));
        }
        other => panic!("expected ack, got {other:?}"),
    }
}

async fn send_ack(from: &UdpSocket, to: SocketAddr, sequence: u32, cumulative: Option<u32>) {
    let notice = AckNotice {
        sequence: seq(sequence),
        cumulative_ack: cumulative.map(seq),
    };
    let bytes = wire::encode(&Frame::Ack(notice)).unwrap();
    from.send_to(&bytes, to).await.unwrap();
}

/// Poll the sender until `len` blocks are in flight.
async fn until_in_flight(sender: &Sender, len: usize) {
    tokio::time::timeout(LIMIT, async {
        while sender.tracker().len().await != len {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("in-flight count never reached {len}"));
}

#[tokio::test]
async fn test_sender_only_applies_valid_acks() {
    let peer = ephemeral().await;
    // Long timers: nothing is resent while the acks below are in play.
    let config = TransportConfig {
        initial_rto_ms: 10_000,
        max_rto_ms: 10_000,
        ..fast_transport()
    };
    let sender = Sender::start(ephemeral().await, peer.local_addr().unwrap(), &config).unwrap();
    for p in numbered_blocks(3) {
        sender.send(p).await.unwrap();
    }

    let mut buf = vec![0u8; MAX_DATAGRAM];
    let (_, sender_addr) = peer.recv_from(&mut buf).await.unwrap();

    // Ack for data that was never sent.
    send_ack(&peer, sender_addr, 9, Some(9)).await;
    // Valid-looking ack from the wrong address.
    let stranger = ephemeral().await;
    send_ack(&stranger, sender_addr, 2, Some(2)).await;
    // Notice with nothing acknowledged yet.
    send_ack(&peer, sender_addr, 1, None).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sender.tracker().len().await, 3);
    assert_eq!(sender.tracker().base().await, Seq::ZERO);

    send_ack(&peer, sender_addr, 1, Some(1)).await;
    until_in_flight(&sender, 1).await;
    assert_eq!(sender.tracker().base().await, seq(2));

    // A stale ack retires nothing and keeps the base.
    send_ack(&peer, sender_addr, 0, Some(0)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sender.tracker().len().await, 1);
    assert_eq!(sender.tracker().base().await, seq(2));

    // The loop is still applying acks after all of the above.
    send_ack(&peer, sender_addr, 2, Some(2)).await;
    until_in_flight(&sender, 0).await;
    assert_eq!(sender.tracker().base().await, seq(3));
    sender.wait_idle().await.unwrap();
}
