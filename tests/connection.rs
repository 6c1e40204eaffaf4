//! End-to-end tests driving two connections against each other.
//!
//! The "network" here is a perfect, instantaneous channel: segments are
//! moved from one endpoint's transmit queue into the other's
//! `segment_received`, except where a test drops or reorders them on
//! purpose.

use unitcp::endpoint::{receiver, sender, TcpConnection};
use unitcp::time::Duration;
use unitcp::wire::{Segment, SeqNumber};
use unitcp::TcpConfig;

const RT_TIMEOUT: u64 = 1000;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config(isn: u32) -> TcpConfig {
    TcpConfig {
        capacity: 4096,
        rt_timeout: Duration::from_millis(RT_TIMEOUT),
        fixed_isn: Some(SeqNumber(isn)),
        ..TcpConfig::default()
    }
}

fn pair() -> (TcpConnection<'static>, TcpConnection<'static>) {
    init_logger();
    (TcpConnection::new(config(10_000)), TcpConnection::new(config(50_000)))
}

/// Shuttle segments both ways until the channel goes quiet.
fn exchange(a: &mut TcpConnection, b: &mut TcpConnection) {
    loop {
        let mut progress = false;
        while let Some(segment) = a.segments_out().pop_front() {
            b.segment_received(&segment);
            progress = true;
        }
        while let Some(segment) = b.segments_out().pop_front() {
            a.segment_received(&segment);
            progress = true;
        }
        if !progress {
            break;
        }
    }
}

fn handshake() -> (TcpConnection<'static>, TcpConnection<'static>) {
    let (mut client, mut server) = pair();
    client.connect();
    exchange(&mut client, &mut server);
    (client, server)
}

fn established(conn: &TcpConnection) -> bool {
    conn.sender().state() == sender::State::SynAcked
        && conn.receiver().state() == receiver::State::SynRecv
}

#[test]
fn test_handshake() {
    let (client, server) = handshake();
    assert!(established(&client));
    assert!(established(&server));
    assert_eq!(client.bytes_in_flight(), 0);
    assert_eq!(server.bytes_in_flight(), 0);
}

#[test]
fn test_bidirectional_transfer() {
    let (mut client, mut server) = handshake();
    assert_eq!(client.write(b"ping"), 4);
    assert_eq!(server.write(b"pong"), 4);
    exchange(&mut client, &mut server);
    assert_eq!(server.inbound_stream_mut().read(16), b"ping");
    assert_eq!(client.inbound_stream_mut().read(16), b"pong");
    assert_eq!(client.bytes_in_flight(), 0);
    assert_eq!(server.bytes_in_flight(), 0);
}

#[test]
fn test_out_of_order_arrival() {
    let (mut client, mut server) = handshake();
    client.write(b"abcd");
    client.write(b"efgh");
    let first = client.segments_out().pop_front().unwrap();
    let second = client.segments_out().pop_front().unwrap();
    server.segment_received(&second);
    assert_eq!(server.unassembled_bytes(), 4);
    assert_eq!(server.inbound_stream().bytes_written(), 0);
    server.segment_received(&first);
    assert_eq!(server.unassembled_bytes(), 0);
    assert_eq!(server.inbound_stream_mut().read(16), b"abcdefgh");
    // The acknowledgments flow back and empty the client's flight.
    exchange(&mut client, &mut server);
    assert_eq!(client.bytes_in_flight(), 0);
}

#[test]
fn test_lost_segment_is_retransmitted() {
    let (mut client, mut server) = handshake();
    client.write(b"data");
    // The network eats the segment.
    client.segments_out().clear();
    client.tick(Duration::from_millis(RT_TIMEOUT - 1));
    assert!(client.segments_out().is_empty());
    client.tick(Duration::from_millis(1));
    exchange(&mut client, &mut server);
    assert_eq!(server.inbound_stream_mut().read(16), b"data");
    assert_eq!(client.bytes_in_flight(), 0);
}

#[test]
fn test_duplicate_delivery_is_harmless() {
    let (mut client, mut server) = handshake();
    client.write(b"once");
    let seg = client.segments_out().pop_front().unwrap();
    server.segment_received(&seg);
    server.segment_received(&seg);
    assert_eq!(server.inbound_stream_mut().read(16), b"once");
    assert_eq!(server.inbound_stream().bytes_written(), 4);
}

#[test]
fn test_clean_close() {
    let (mut client, mut server) = handshake();
    client.write(b"bye");
    client.end_input_stream();
    exchange(&mut client, &mut server);

    // The server saw the FIN; as passive closer it will not linger.
    assert_eq!(server.receiver().state(), receiver::State::FinRecv);
    assert_eq!(server.inbound_stream_mut().read(16), b"bye");
    assert!(server.inbound_stream().eof());
    assert!(server.active());

    server.end_input_stream();
    exchange(&mut client, &mut server);

    // Its FIN was acknowledged, so the server is done immediately.
    assert!(!server.active());
    assert!(client.inbound_stream().eof());
    assert_eq!(client.sender().state(), sender::State::FinAcked);
    assert_eq!(client.receiver().state(), receiver::State::FinRecv);

    // The client was first to close and lingers through a quiet
    // period before letting go.
    assert!(client.active());
    client.tick(Duration::from_millis(10 * RT_TIMEOUT - 1));
    assert!(client.active());
    client.tick(Duration::from_millis(1));
    assert!(!client.active());
    assert!(!client.inbound_stream().error());
    assert!(!client.sender().stream_in().error());
}

#[test]
fn test_inbound_traffic_restarts_linger() {
    let (mut client, mut server) = handshake();
    client.end_input_stream();
    exchange(&mut client, &mut server);
    server.end_input_stream();
    exchange(&mut client, &mut server);
    assert!(!server.active());

    client.tick(Duration::from_millis(10 * RT_TIMEOUT - 1));
    assert!(client.active());
    // A late retransmission of the peer's FIN resets the quiet period.
    let fin = Segment {
        seq_number: SeqNumber(50_001),
        fin: true,
        ack_number: Some(SeqNumber(10_002)),
        window_len: 4096,
        ..Segment::default()
    };
    client.segment_received(&fin);
    client.tick(Duration::from_millis(10 * RT_TIMEOUT - 1));
    assert!(client.active());
    client.tick(Duration::from_millis(1));
    assert!(!client.active());
}

#[test]
fn test_retransmission_exhaustion_resets_peer() {
    let (mut client, mut server) = handshake();
    client.write(b"doomed");
    // The network blackholes everything from here on; keep ticking
    // until the client gives up.
    let mut last = Segment::default();
    while client.active() {
        client.tick(Duration::from_millis(300_000));
        if let Some(seg) = client.segments_out().pop_back() {
            last = seg;
        }
        client.segments_out().clear();
    }
    assert!(last.rst);
    assert!(client.inbound_stream().error());
    assert!(client.sender().stream_in().error());

    server.segment_received(&last);
    assert!(!server.active());
    assert!(server.inbound_stream().error());
    assert!(server.sender().stream_in().error());
}

#[test]
fn test_window_respected_end_to_end() {
    init_logger();
    let mut client = TcpConnection::new(config(1));
    let mut server = TcpConnection::new(TcpConfig {
        capacity: 8,
        rt_timeout: Duration::from_millis(RT_TIMEOUT),
        fixed_isn: Some(SeqNumber(2)),
        ..TcpConfig::default()
    });
    client.connect();
    exchange(&mut client, &mut server);
    assert!(established(&client));

    // The server's tiny buffer throttles the transfer until the
    // application reads. Once the window closes, the client keeps a
    // one-byte probe in flight.
    assert_eq!(client.write(b"0123456789abcdef"), 16);
    exchange(&mut client, &mut server);
    assert_eq!(server.inbound_stream().buffer_size(), 8);
    assert_eq!(client.bytes_in_flight(), 1);
    assert_eq!(server.inbound_stream_mut().read(8), b"01234567");

    // Opening the window takes another acknowledgment exchange,
    // triggered here by the sender's zero-window probe.
    client.tick(Duration::from_millis(RT_TIMEOUT));
    exchange(&mut client, &mut server);
    assert_eq!(server.inbound_stream_mut().read(8), b"89abcdef");
}
