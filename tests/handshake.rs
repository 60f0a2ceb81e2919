//! Integration tests for the registry: demultiplexing, validation, and the
//! passive-open handshake.
//!
//! Each test drives a [`Listener`] through an in-memory [`StubNet`], acting
//! as the remote peer by injecting hand-built segments and inspecting what
//! the transport puts on the wire.  Everything runs inside a `LocalSet`
//! because the transport schedules its timers with `spawn_local`.

use std::cell::{Cell, RefCell};
use std::net::Ipv4Addr;
use std::rc::Rc;

use minitcp::{
    listener::{ConnKey, Listener},
    segment::{flags, Segment},
    sim::StubNet,
};

const SERVER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const CLIENT: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
const PORT: u16 = 7000;
const CLIENT_PORT: u16 = 40000;

/// Encode a client → server segment.
fn seg(seq: u32, ack: u32, flag_bits: u16, payload: &[u8]) -> Vec<u8> {
    Segment {
        src_port: CLIENT_PORT,
        dst_port: PORT,
        seq,
        ack,
        flags: flag_bits,
        window: 1024,
        urgent: 0,
        payload: payload.to_vec(),
    }
    .encode(CLIENT, SERVER)
}

fn syn(isn: u32) -> Vec<u8> {
    seg(isn, 0, flags::SYN, &[])
}

/// Decode a server → client datagram captured from the stub.
fn decode_out(bytes: &[u8]) -> Segment {
    Segment::decode(bytes, SERVER, CLIENT).expect("server emitted an undecodable segment")
}

fn key() -> ConnKey {
    ConnKey {
        local_addr: SERVER,
        local_port: PORT,
        remote_addr: CLIENT,
        remote_port: CLIENT_PORT,
    }
}

#[tokio::test]
async fn syn_is_answered_with_syn_ack() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let net = StubNet::new();
            let listener = Listener::bind(net.clone(), PORT);

            net.deliver(CLIENT, SERVER, &syn(1000));

            let sent = net.take_sent();
            assert_eq!(sent.len(), 1);
            let (bytes, dst) = &sent[0];
            assert_eq!(*dst, CLIENT);

            let reply = decode_out(bytes);
            assert_eq!(reply.src_port, PORT);
            assert_eq!(reply.dst_port, CLIENT_PORT);
            assert_eq!(reply.seq, 1000);
            assert_eq!(reply.ack, 1001);
            assert!(reply.has(flags::SYN | flags::ACK));
            assert!(reply.payload.is_empty());

            assert_eq!(listener.connection_count(), 1);
        })
        .await;
}

#[tokio::test]
async fn accept_callback_fires_once_per_connection() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let net = StubNet::new();
            let listener = Listener::bind(net.clone(), PORT);

            let accepted = Rc::new(Cell::new(0usize));
            let counter = accepted.clone();
            listener.register_accept_callback(move |conn| {
                counter.set(counter.get() + 1);
                assert_eq!(conn.key(), key());
            });

            net.deliver(CLIENT, SERVER, &syn(1000));
            assert_eq!(accepted.get(), 1);

            // The handshake's final ACK is not a new connection.
            net.deliver(CLIENT, SERVER, &seg(1001, 1001, flags::ACK, &[]));
            assert_eq!(accepted.get(), 1);
        })
        .await;
}

#[tokio::test]
async fn replacing_accept_callback_affects_later_connections_only() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let net = StubNet::new();
            let listener = Listener::bind(net.clone(), PORT);

            let first = Rc::new(Cell::new(0usize));
            let counter = first.clone();
            listener.register_accept_callback(move |_| counter.set(counter.get() + 1));

            net.deliver(CLIENT, SERVER, &syn(1000));
            assert_eq!(first.get(), 1);

            let second = Rc::new(Cell::new(0usize));
            let counter = second.clone();
            listener.register_accept_callback(move |_| counter.set(counter.get() + 1));

            // Another client port makes a second connection.
            let other_syn = Segment {
                src_port: CLIENT_PORT + 1,
                dst_port: PORT,
                seq: 5,
                ack: 0,
                flags: flags::SYN,
                window: 1024,
                urgent: 0,
                payload: vec![],
            }
            .encode(CLIENT, SERVER);
            net.deliver(CLIENT, SERVER, &other_syn);

            assert_eq!(first.get(), 1, "old callback must not fire again");
            assert_eq!(second.get(), 1);
            assert_eq!(listener.connection_count(), 2);
        })
        .await;
}

#[tokio::test]
async fn segments_for_other_ports_are_ignored() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let net = StubNet::new();
            let listener = Listener::bind(net.clone(), PORT);

            let mut other = Segment::decode(&syn(42), CLIENT, SERVER).unwrap();
            other.dst_port = PORT + 1;
            net.deliver(CLIENT, SERVER, &other.encode(CLIENT, SERVER));

            assert_eq!(net.sent_count(), 0);
            assert_eq!(listener.connection_count(), 0);
        })
        .await;
}

#[tokio::test]
async fn corrupt_segment_is_dropped_without_reply() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let net = StubNet::new();
            let listener = Listener::bind(net.clone(), PORT);

            let mut bytes = syn(1000);
            let last = bytes.len() - 1;
            bytes[last] ^= 0xff;
            net.deliver(CLIENT, SERVER, &bytes);

            assert_eq!(net.sent_count(), 0, "corruption must not produce a reply");
            assert_eq!(listener.connection_count(), 0);
        })
        .await;
}

#[tokio::test]
async fn non_syn_segment_for_unknown_connection_is_dropped() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let net = StubNet::new();
            let listener = Listener::bind(net.clone(), PORT);

            net.deliver(CLIENT, SERVER, &seg(500, 0, flags::ACK, b"stray"));

            assert_eq!(net.sent_count(), 0);
            assert_eq!(listener.connection_count(), 0);
        })
        .await;
}

#[tokio::test]
async fn duplicate_syn_replaces_the_existing_connection() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let net = StubNet::new();
            let listener = Listener::bind(net.clone(), PORT);

            net.deliver(CLIENT, SERVER, &syn(1000));
            let first = listener.connection(&key()).unwrap();
            net.take_sent();

            net.deliver(CLIENT, SERVER, &syn(9000));

            // Still exactly one registered connection, but a fresh one
            // seeded from the new SYN.
            assert_eq!(listener.connection_count(), 1);
            let second = listener.connection(&key()).unwrap();
            assert_eq!(second.rcv_nxt(), 9001);

            let sent = net.take_sent();
            assert_eq!(sent.len(), 1);
            let reply = decode_out(&sent[0].0);
            assert_eq!(reply.seq, 9000);
            assert_eq!(reply.ack, 9001);

            // The replaced connection is dead: no timer, nothing queued.
            assert_eq!(first.state(), minitcp::ConnectionState::Closed);
            assert_eq!(first.unacked_segments(), 0);
            assert!(!first.timer_armed());
        })
        .await;
}

#[tokio::test]
async fn final_ack_clears_the_handshake_from_the_retransmit_queue() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let net = StubNet::new();
            let listener = Listener::bind(net.clone(), PORT);

            net.deliver(CLIENT, SERVER, &syn(1000));
            let conn = listener.connection(&key()).unwrap();
            assert_eq!(conn.unacked_segments(), 1, "SYN+ACK awaits the peer's ACK");
            assert!(conn.timer_armed());

            net.deliver(CLIENT, SERVER, &seg(1001, 1001, flags::ACK, &[]));

            assert_eq!(conn.unacked_segments(), 0);
            assert!(!conn.timer_armed());
            assert_eq!(conn.state(), minitcp::ConnectionState::Established);
        })
        .await;
}

#[tokio::test]
async fn data_callback_sees_every_accepted_segment() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let net = StubNet::new();
            let listener = Listener::bind(net.clone(), PORT);

            let deliveries: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
            let sink = deliveries.clone();
            listener.register_accept_callback(move |conn| {
                let sink = sink.clone();
                conn.register_data_callback(move |_, data| sink.borrow_mut().push(data.to_vec()));
            });

            net.deliver(CLIENT, SERVER, &syn(1000));
            // The final ACK is an accepted (empty) segment and is observed.
            net.deliver(CLIENT, SERVER, &seg(1001, 1001, flags::ACK, &[]));
            net.deliver(CLIENT, SERVER, &seg(1001, 1001, flags::ACK, b"hi"));

            assert_eq!(&*deliveries.borrow(), &[b"".to_vec(), b"hi".to_vec()]);
        })
        .await;
}
