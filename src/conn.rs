//! Per-connection state machine and reliable delivery engine.
//!
//! A [`Connection`] owns the complete state for one accepted peer: the FSM
//! (see [`crate::state`]), the send/receive sequence counters, the
//! retransmission queue ([`crate::sendbuf`]) and its timer
//! ([`crate::timer`]).  Its responsibilities:
//! - Driving the passive-open handshake (SYN+ACK reply, via the same
//!   retransmission path as data).
//! - Converting inbound segments into application deliveries and control
//!   replies, dropping anything out of order (the peer retransmits).
//! - Segmenting application writes at [`MSS`] and guaranteeing their
//!   delivery through fixed-interval retransmission of the oldest
//!   unacknowledged segment.
//! - Graceful teardown: a FIN that rides the retransmission queue, with a
//!   bounded number of retries before the connection is force-removed.
//!
//! `Connection` is a cheap clonable handle (`Rc` inside); the registry, the
//! application callbacks, and the timer tasks all share the same state.
//! Everything runs on one thread — the only re-entrancy hazard is a user
//! callback calling back into the connection, so no `RefCell` borrow is ever
//! held across a callback invocation.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::listener::{ConnKey, ListenerInner};
use crate::net::Network;
use crate::segment::{flags, Segment, MSS};
use crate::sendbuf::SendBuffer;
use crate::state::ConnectionState;
use crate::timer::{TimerHandle, RETRANSMIT_INTERVAL};

/// Receive window advertised in every outbound segment.  Constant: flow
/// control beyond the MSS split is out of scope.
const ADVERTISED_WINDOW: u16 = 8192;

/// Retransmissions of an unanswered FIN before the connection is
/// force-removed from the registry.
const MAX_FIN_RETRIES: u32 = 6;

/// Application consumer of delivered bytes.  An empty slice signals
/// end-of-stream (the peer sent FIN) or an accepted segment with no payload.
pub type DataFn = dyn FnMut(Connection, &[u8]);

/// Handle to one reliable connection.  Clones share the same state.
#[derive(Clone)]
pub struct Connection {
    inner: Rc<RefCell<ConnInner>>,
}

struct ConnInner {
    key: ConnKey,
    state: ConnectionState,
    net: Rc<dyn Network>,
    registry: Weak<RefCell<ListenerInner>>,
    /// Sequence number of the next byte (or control slot) this side sends.
    snd_nxt: u32,
    /// Next sequence number expected from the peer (cumulative ACK value).
    rcv_nxt: u32,
    /// Transmitted-but-unacknowledged segments, oldest first.
    pending: SendBuffer,
    /// Live retransmit timer; `Some` iff `pending` is non-empty.
    timer: Option<TimerHandle>,
    data_cb: Option<Rc<RefCell<Box<DataFn>>>>,
}

impl ConnInner {
    /// Encode a segment addressed to this connection's peer, checksummed
    /// over the reversed (local → remote) address pair.
    fn segment_to_peer(&self, seq: u32, ack: u32, flag_bits: u16, payload: &[u8]) -> Vec<u8> {
        Segment {
            src_port: self.key.local_port,
            dst_port: self.key.remote_port,
            seq,
            ack,
            flags: flag_bits,
            window: ADVERTISED_WINDOW,
            urgent: 0,
            payload: payload.to_vec(),
        }
        .encode(self.key.local_addr, self.key.remote_addr)
    }
}

impl Connection {
    /// Build a connection for a freshly received SYN.
    ///
    /// The send sequence adopts the peer's declared starting point as the
    /// local base; the SYN consumes one slot, so the next expected inbound
    /// sequence number is `peer_seq + 1`.  Call [`establish`] afterwards to
    /// queue the handshake reply.
    ///
    /// [`establish`]: Connection::establish
    pub(crate) fn accept(
        net: Rc<dyn Network>,
        registry: Weak<RefCell<ListenerInner>>,
        key: ConnKey,
        peer_seq: u32,
    ) -> Connection {
        Connection {
            inner: Rc::new(RefCell::new(ConnInner {
                key,
                state: ConnectionState::SynReceived,
                net,
                registry,
                snd_nxt: peer_seq,
                rcv_nxt: peer_seq.wrapping_add(1),
                pending: SendBuffer::new(),
                timer: None,
                data_cb: None,
            })),
        }
    }

    /// Queue and transmit the SYN+ACK handshake reply.
    ///
    /// The reply goes through the retransmission queue like any data
    /// segment, so a lost SYN+ACK is re-sent by the timer.  The connection
    /// counts as established once the segment is queued; the peer's final
    /// ACK arrives later as an ordinary inbound segment.
    pub(crate) fn establish(&self) {
        let (datagram, net, dst) = {
            let mut inner = self.inner.borrow_mut();
            let seq = inner.snd_nxt;
            let ack = inner.rcv_nxt;
            let datagram = inner.segment_to_peer(seq, ack, flags::SYN | flags::ACK, &[]);
            inner.pending.push(seq, 1, datagram.clone());
            inner.snd_nxt = seq.wrapping_add(1);
            inner.state = ConnectionState::Established;
            log::debug!("[conn] {}: → SYN+ACK seq={seq} ack={ack}", inner.key);
            (datagram, inner.net.clone(), inner.key.remote_addr)
        };
        net.send(&datagram, dst);
        self.arm_timer();
    }

    /// Register the application's data consumer, replacing any previous one.
    ///
    /// Invoked once per accepted in-order segment; an empty slice signals
    /// end-of-stream when the peer closes.
    pub fn register_data_callback(&self, cb: impl FnMut(Connection, &[u8]) + 'static) {
        self.inner.borrow_mut().data_cb = Some(Rc::new(RefCell::new(Box::new(cb))));
    }

    /// Send application data to the peer.
    ///
    /// Writes longer than [`MSS`] are split into MSS-sized chunks in order;
    /// every chunk is transmitted immediately and queued for retransmission
    /// until acknowledged.  A zero-length write transmits a bare ACK refresh
    /// which is not queued (there is nothing to retransmit).
    ///
    /// Calls on a closing or closed connection are ignored with a warning.
    pub fn send(&self, data: &[u8]) {
        let (datagrams, net, dst, arm) = {
            let mut inner = self.inner.borrow_mut();
            if matches!(inner.state, ConnectionState::Closing | ConnectionState::Closed) {
                log::warn!(
                    "[conn] {}: discarding {}-byte write in state {}",
                    inner.key,
                    data.len(),
                    inner.state
                );
                return;
            }

            let mut datagrams = Vec::new();
            if data.is_empty() {
                let (seq, ack) = (inner.snd_nxt, inner.rcv_nxt);
                datagrams.push(inner.segment_to_peer(seq, ack, flags::ACK, &[]));
            } else {
                for chunk in data.chunks(MSS) {
                    let (seq, ack) = (inner.snd_nxt, inner.rcv_nxt);
                    let datagram = inner.segment_to_peer(seq, ack, flags::ACK, chunk);
                    inner.pending.push(seq, chunk.len() as u32, datagram.clone());
                    inner.snd_nxt = seq.wrapping_add(chunk.len() as u32);
                    datagrams.push(datagram);
                }
            }
            log::debug!(
                "[conn] {}: → {} segment(s), {} byte(s), {} unacked",
                inner.key,
                datagrams.len(),
                data.len(),
                inner.pending.len()
            );
            let arm = !inner.pending.is_empty() && inner.timer.is_none();
            (datagrams, inner.net.clone(), inner.key.remote_addr, arm)
        };

        for datagram in &datagrams {
            net.send(datagram, dst);
        }
        if arm {
            self.arm_timer();
        }
    }

    /// Begin a graceful close.
    ///
    /// Queues and transmits a FIN (consuming one sequence slot) and enters
    /// `Closing`; the connection stays in the registry until the peer
    /// acknowledges the FIN, sends its own FIN, or [`MAX_FIN_RETRIES`]
    /// retransmissions go unanswered.
    pub fn close(&self) {
        let (datagram, net, dst, arm) = {
            let mut inner = self.inner.borrow_mut();
            if matches!(inner.state, ConnectionState::Closing | ConnectionState::Closed) {
                return;
            }
            inner.state = ConnectionState::Closing;
            let (seq, ack) = (inner.snd_nxt, inner.rcv_nxt);
            let datagram = inner.segment_to_peer(seq, ack, flags::FIN | flags::ACK, &[]);
            inner.pending.push(seq, 1, datagram.clone());
            inner.snd_nxt = seq.wrapping_add(1);
            log::debug!("[conn] {}: → FIN seq={seq}", inner.key);
            let arm = inner.timer.is_none();
            (datagram, inner.net.clone(), inner.key.remote_addr, arm)
        };
        net.send(&datagram, dst);
        if arm {
            self.arm_timer();
        }
    }

    /// Process one inbound segment already demultiplexed by the registry.
    pub(crate) fn on_segment(&self, seq: u32, ack_no: u32, flag_bits: u16, payload: &[u8]) {
        let mut replies: Vec<Vec<u8>> = Vec::new();
        let mut deliver: Option<Vec<u8>> = None;
        let mut rearm = false;
        let mut teardown = false;

        let (net, dst) = {
            let mut inner = self.inner.borrow_mut();
            if inner.state == ConnectionState::Closed {
                return;
            }

            // In-order filter: anything else is dropped silently and the
            // peer's retransmission supplies it again in order.
            if seq != inner.rcv_nxt {
                log::debug!(
                    "[conn] {}: dropping segment seq={seq} (expected {})",
                    inner.key,
                    inner.rcv_nxt
                );
                return;
            }

            // Cumulative acknowledgment of our unacked segments.
            if flag_bits & flags::ACK != 0 {
                let acked = inner.pending.on_ack(ack_no);
                if acked > 0 {
                    log::debug!(
                        "[conn] {}: ← ACK {ack_no} cleared {acked} segment(s), {} left",
                        inner.key,
                        inner.pending.len()
                    );
                    if inner.pending.is_empty() {
                        inner.timer = None;
                        if inner.state == ConnectionState::Closing {
                            // FIN acknowledged; teardown complete.
                            inner.state = ConnectionState::Closed;
                            teardown = true;
                        }
                    } else {
                        rearm = true;
                    }
                }
            }

            if flag_bits & flags::FIN != 0 {
                // The FIN consumes one sequence slot.
                inner.rcv_nxt = inner.rcv_nxt.wrapping_add(1);
                let (seq, ack) = (inner.snd_nxt, inner.rcv_nxt);
                replies.push(inner.segment_to_peer(seq, ack, flags::ACK, &[]));
                if inner.state == ConnectionState::Closing {
                    // Both sides are done; no end-of-stream signal needed.
                    inner.state = ConnectionState::Closed;
                    inner.timer = None;
                    teardown = true;
                } else {
                    log::debug!("[conn] {}: ← FIN; end of stream", inner.key);
                    deliver = Some(Vec::new());
                }
            } else if inner.state == ConnectionState::Established {
                // Every accepted segment reaches the application exactly
                // once, empty payloads included.
                deliver = Some(payload.to_vec());

                if !payload.is_empty() {
                    inner.rcv_nxt = inner.rcv_nxt.wrapping_add(payload.len() as u32);
                    inner.snd_nxt = ack_no;
                    // Echo/ack coupling: the reply repeats the payload only
                    // when the inbound segment did not itself carry an ACK.
                    let echo: &[u8] = if flag_bits & flags::ACK == 0 { payload } else { &[] };
                    let (reply_seq, reply_ack) = (inner.snd_nxt, inner.rcv_nxt);
                    replies.push(inner.segment_to_peer(reply_seq, reply_ack, flags::ACK, echo));
                    log::debug!(
                        "[conn] {}: ← DATA seq={seq} len={}; → ACK {reply_ack}",
                        inner.key,
                        payload.len()
                    );
                }
            }

            (inner.net.clone(), inner.key.remote_addr)
        };

        if rearm && !teardown {
            self.arm_timer();
        }
        for datagram in &replies {
            net.send(datagram, dst);
        }
        if teardown {
            self.detach();
        }
        if let Some(bytes) = deliver {
            self.deliver(&bytes);
        }
    }

    /// Retransmit timer expiry: resend the oldest unacknowledged segment and
    /// re-arm, or disarm if the queue drained in the meantime.
    fn on_timeout(&self) {
        let (datagram, net, dst) = {
            let mut inner = self.inner.borrow_mut();
            let (datagram, seq, tx_count) = match inner.pending.oldest() {
                Some(pending) => (pending.datagram.clone(), pending.seq, pending.tx_count),
                None => {
                    inner.timer = None;
                    return;
                }
            };

            if inner.state == ConnectionState::Closing && tx_count > MAX_FIN_RETRIES {
                log::warn!(
                    "[conn] {}: FIN unanswered after {} transmissions; force-closing",
                    inner.key,
                    tx_count
                );
                inner.state = ConnectionState::Closed;
                inner.timer = None;
                inner.pending.clear();
                drop(inner);
                self.detach();
                return;
            }

            inner.pending.mark_retransmitted();
            log::debug!("[conn] {}: timeout — retransmitting seq={seq}", inner.key);
            (datagram, inner.net.clone(), inner.key.remote_addr)
        };
        net.send(&datagram, dst);
        self.arm_timer();
    }

    /// Tear down without any wire traffic.  Used by the registry when a new
    /// SYN replaces this connection.
    pub(crate) fn abort(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.state = ConnectionState::Closed;
        inner.pending.clear();
        inner.timer = None;
    }

    /// Arm (or replace) the single retransmit timer for this connection.
    ///
    /// The handle slot holds at most one timer; writing a new handle drops
    /// and thereby cancels the previous one, so timers never stack even when
    /// armed from within a timer callback.
    fn arm_timer(&self) {
        let weak = Rc::downgrade(&self.inner);
        let handle = TimerHandle::schedule(RETRANSMIT_INTERVAL, move || {
            if let Some(inner) = weak.upgrade() {
                Connection { inner }.on_timeout();
            }
        });
        self.inner.borrow_mut().timer = Some(handle);
    }

    /// Remove this connection from the registry's map.
    fn detach(&self) {
        let (registry, key) = {
            let inner = self.inner.borrow();
            (inner.registry.clone(), inner.key)
        };
        if let Some(registry) = registry.upgrade() {
            registry.borrow_mut().remove(&key);
            log::debug!("[conn] {key}: deregistered");
        }
    }

    /// Hand bytes to the application callback, if one is registered.
    fn deliver(&self, payload: &[u8]) {
        let cb = self.inner.borrow().data_cb.clone();
        match cb {
            Some(cb) => (cb.borrow_mut())(self.clone(), payload),
            None => log::debug!(
                "[conn] {}: no data callback; {} byte(s) not delivered",
                self.key(),
                payload.len()
            ),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The four-tuple identifying this connection.
    pub fn key(&self) -> ConnKey {
        self.inner.borrow().key
    }

    /// Current FSM state.
    pub fn state(&self) -> ConnectionState {
        self.inner.borrow().state
    }

    /// Next sequence number this side will send (`SND.NXT`).
    pub fn snd_nxt(&self) -> u32 {
        self.inner.borrow().snd_nxt
    }

    /// Next sequence number expected from the peer (`RCV.NXT`).
    pub fn rcv_nxt(&self) -> u32 {
        self.inner.borrow().rcv_nxt
    }

    /// Number of transmitted segments awaiting acknowledgment.
    pub fn unacked_segments(&self) -> usize {
        self.inner.borrow().pending.len()
    }

    /// `true` while a retransmit timer is live for this connection.
    pub fn timer_armed(&self) -> bool {
        self.inner.borrow().timer.is_some()
    }
}
