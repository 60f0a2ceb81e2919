//! Connection registry and inbound segment demultiplexer.
//!
//! A [`Listener`] owns every connection accepted on one port.  It registers
//! itself as the datagram layer's receiver and, for each inbound datagram:
//! decodes and validates the segment, ignores traffic for other ports,
//! performs the passive-open handshake on SYN, and routes everything else to
//! the matching [`Connection`] by its four-tuple key.
//!
//! Corruption and misdirection are non-fatal here: undecodable segments, bad
//! checksums, and segments for unknown connections are dropped with a log
//! line and never produce a reply.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::rc::Rc;

use crate::conn::Connection;
use crate::net::Network;
use crate::segment::{flags, Segment};

/// The four-tuple identifying one connection.
///
/// Equality and hashing are structural over all four fields — two keys match
/// only when every field matches, so distinct connections can never collide
/// the way a folded surrogate hash could.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnKey {
    /// Address the segment was delivered to (this host).
    pub local_addr: Ipv4Addr,
    /// The listener's port.
    pub local_port: u16,
    /// Peer address.
    pub remote_addr: Ipv4Addr,
    /// Peer port.
    pub remote_port: u16,
}

impl fmt::Display for ConnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}<-{}:{}",
            self.local_addr, self.local_port, self.remote_addr, self.remote_port
        )
    }
}

/// Registry state shared between the listener handle, the receive hook, and
/// the connections (which deregister themselves on teardown).
pub(crate) struct ListenerInner {
    port: u16,
    net: Rc<dyn Network>,
    connections: HashMap<ConnKey, Connection>,
    accept_cb: Option<Box<dyn FnMut(Connection)>>,
}

impl ListenerInner {
    pub(crate) fn remove(&mut self, key: &ConnKey) -> Option<Connection> {
        self.connections.remove(key)
    }
}

/// A passive-open transport endpoint bound to one port.
pub struct Listener {
    inner: Rc<RefCell<ListenerInner>>,
}

impl Listener {
    /// Bind a listener on `port` and hook it into the datagram layer as the
    /// single inbound receiver.
    pub fn bind(net: Rc<dyn Network>, port: u16) -> Listener {
        let inner = Rc::new(RefCell::new(ListenerInner {
            port,
            net: net.clone(),
            connections: HashMap::new(),
            accept_cb: None,
        }));

        let weak = Rc::downgrade(&inner);
        net.register_receiver(Box::new(move |src, dst, datagram| {
            if let Some(inner) = weak.upgrade() {
                dispatch(&inner, src, dst, datagram);
            }
        }));

        Listener { inner }
    }

    /// Register the accept callback, invoked once per newly accepted
    /// connection.  At most one is held; replacing it affects subsequently
    /// accepted connections only.
    pub fn register_accept_callback(&self, cb: impl FnMut(Connection) + 'static) {
        self.inner.borrow_mut().accept_cb = Some(Box::new(cb));
    }

    /// Port this listener accepts connections on.
    pub fn port(&self) -> u16 {
        self.inner.borrow().port
    }

    /// Number of connections currently registered.
    pub fn connection_count(&self) -> usize {
        self.inner.borrow().connections.len()
    }

    /// Look up a live connection by its four-tuple.
    pub fn connection(&self, key: &ConnKey) -> Option<Connection> {
        self.inner.borrow().connections.get(key).cloned()
    }
}

/// Handle one inbound datagram: decode, validate, demultiplex.
fn dispatch(inner: &Rc<RefCell<ListenerInner>>, src: Ipv4Addr, dst: Ipv4Addr, datagram: &[u8]) {
    let port = inner.borrow().port;

    // Another listener's traffic is not an error; ignore before validating.
    match Segment::peek_dst_port(datagram) {
        Some(dst_port) if dst_port == port => {}
        _ => return,
    }

    let seg = match Segment::decode(datagram, src, dst) {
        Ok(seg) => seg,
        Err(e) => {
            log::debug!("[listen] dropping segment from {src}: {e}");
            return;
        }
    };

    let key = ConnKey {
        local_addr: dst,
        local_port: port,
        remote_addr: src,
        remote_port: seg.src_port,
    };

    if seg.has(flags::SYN) {
        // Always a fresh passive open, even for a key already in the map:
        // the replace policy discards the previous connection's state.
        log::debug!("[listen] ← SYN from {}:{} isn={}", src, seg.src_port, seg.seq);
        let net = inner.borrow().net.clone();
        let conn = Connection::accept(net, Rc::downgrade(inner), key, seg.seq);
        if let Some(old) = inner.borrow_mut().connections.insert(key, conn.clone()) {
            log::warn!("[listen] duplicate SYN for {key}; replacing previous connection");
            old.abort();
        }

        // Take the callback out so it can use the listener (or replace the
        // callback) without tripping the RefCell.
        let taken = inner.borrow_mut().accept_cb.take();
        if let Some(mut cb) = taken {
            cb(conn.clone());
            let mut registry = inner.borrow_mut();
            if registry.accept_cb.is_none() {
                registry.accept_cb = Some(cb);
            }
        }

        conn.establish();
        return;
    }

    let existing = inner.borrow().connections.get(&key).cloned();
    match existing {
        Some(conn) => conn.on_segment(seg.seq, seg.ack, seg.flags, &seg.payload),
        None => log::debug!("[listen] segment for unknown connection {key}"),
    }
}
