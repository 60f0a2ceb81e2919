//! The unreliable datagram layer underneath the transport.
//!
//! [`Network`] is the seam between this crate's connection machinery and
//! whatever actually moves bytes between hosts.  It offers exactly two
//! operations — fire-and-forget [`Network::send`] and a single inbound
//! receiver registered with [`Network::register_receiver`] — and guarantees
//! nothing: datagrams may be lost, duplicated, or reordered.
//!
//! [`UdpNet`] adapts the interface onto a real `tokio` UDP socket so the
//! demo binary has a wire to talk over: each simulated host is one UDP
//! endpoint, and the "network address" of a host is its IPv4 address with a
//! shared well-known UDP port.  Test doubles live in [`crate::sim`].

use std::cell::RefCell;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::rc::Rc;

use thiserror::Error;
use tokio::net::UdpSocket;

/// Maximum datagram size accepted from the wire.
const MAX_DATAGRAM: usize = 65_535;

/// Inbound handler: `(source_addr, dest_addr, raw_datagram)`.
pub type RecvFn = Box<dyn FnMut(Ipv4Addr, Ipv4Addr, &[u8])>;

/// A best-effort, packet-oriented network layer.
pub trait Network {
    /// Send `datagram` towards `dst`.  No delivery guarantee, no reply.
    fn send(&self, datagram: &[u8], dst: Ipv4Addr);

    /// Register the single inbound receiver, replacing any previous one.
    fn register_receiver(&self, receiver: RecvFn);
}

/// Errors that can arise while setting up the UDP-backed network layer.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("the datagram layer supports IPv4 sockets only")]
    Ipv4Only,
}

/// [`Network`] implementation that carries datagrams over UDP.
///
/// Every participating host binds the same UDP port, so a transport-layer
/// address maps to `ip:PORT` on the wire.  The receive loop runs as a local
/// task; construct this inside a [`tokio::task::LocalSet`].
pub struct UdpNet {
    socket: Rc<UdpSocket>,
    local_ip: Ipv4Addr,
    port: u16,
    receiver: Rc<RefCell<Option<RecvFn>>>,
}

impl UdpNet {
    /// Bind the datagram layer to `addr` and start its receive loop.
    pub async fn bind(addr: SocketAddrV4) -> Result<Rc<Self>, NetError> {
        let socket = Rc::new(UdpSocket::bind(addr).await?);
        let local = match socket.local_addr()? {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(_) => return Err(NetError::Ipv4Only),
        };

        let net = Rc::new(UdpNet {
            socket: socket.clone(),
            local_ip: *local.ip(),
            port: local.port(),
            receiver: Rc::new(RefCell::new(None)),
        });

        let receiver = net.receiver.clone();
        let local_ip = net.local_ip;
        tokio::task::spawn_local(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((n, SocketAddr::V4(peer))) => {
                        // Take the receiver out so it can re-register itself
                        // without tripping the RefCell.
                        let taken = receiver.borrow_mut().take();
                        if let Some(mut cb) = taken {
                            cb(*peer.ip(), local_ip, &buf[..n]);
                            let mut slot = receiver.borrow_mut();
                            if slot.is_none() {
                                *slot = Some(cb);
                            }
                        }
                    }
                    Ok((_, SocketAddr::V6(peer))) => {
                        log::debug!("[net] ignoring datagram from IPv6 peer {peer}");
                    }
                    Err(e) => {
                        log::warn!("[net] receive loop terminated: {e}");
                        break;
                    }
                }
            }
        });

        Ok(net)
    }

    /// IPv4 address this host is reachable at.
    pub fn local_ip(&self) -> Ipv4Addr {
        self.local_ip
    }
}

impl Network for UdpNet {
    fn send(&self, datagram: &[u8], dst: Ipv4Addr) {
        let target = SocketAddr::V4(SocketAddrV4::new(dst, self.port));
        // Best effort by contract; a full socket buffer is just loss.
        if let Err(e) = self.socket.try_send_to(datagram, target) {
            log::debug!("[net] dropped {}-byte datagram to {dst}: {e}", datagram.len());
        }
    }

    fn register_receiver(&self, receiver: RecvFn) {
        *self.receiver.borrow_mut() = Some(receiver);
    }
}
