//! In-memory and fault-injecting network layers for deterministic testing.
//!
//! Real networks drop, duplicate, and reorder packets.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! this module provides two [`Network`] implementations:
//!
//! - [`StubNet`] — an in-memory endpoint that records everything the
//!   transport sends and lets a test inject inbound datagrams as if they
//!   had arrived from a peer.
//! - [`LossyNet`] — a wrapper applying a seeded fault model (loss and
//!   duplication) to the send path of another network, so failing runs are
//!   reproducible from the seed.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::net::{Network, RecvFn};

/// In-memory network endpoint for tests.
///
/// Outbound datagrams are queued instead of transmitted; inbound datagrams
/// are pushed in with [`StubNet::deliver`].
#[derive(Default)]
pub struct StubNet {
    sent: RefCell<VecDeque<(Vec<u8>, Ipv4Addr)>>,
    receiver: RefCell<Option<RecvFn>>,
}

impl StubNet {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Inject an inbound datagram, invoking the registered receiver as the
    /// real network layer would.
    pub fn deliver(&self, src: Ipv4Addr, dst: Ipv4Addr, datagram: &[u8]) {
        // Take the receiver out so handling code can re-register without
        // tripping the RefCell.
        let taken = self.receiver.borrow_mut().take();
        match taken {
            Some(mut cb) => {
                cb(src, dst, datagram);
                let mut slot = self.receiver.borrow_mut();
                if slot.is_none() {
                    *slot = Some(cb);
                }
            }
            None => log::debug!("[sim] no receiver registered; datagram dropped"),
        }
    }

    /// Drain and return every datagram sent since the last call, with its
    /// destination address.
    pub fn take_sent(&self) -> Vec<(Vec<u8>, Ipv4Addr)> {
        self.sent.borrow_mut().drain(..).collect()
    }

    /// Number of datagrams sent and not yet drained.
    pub fn sent_count(&self) -> usize {
        self.sent.borrow().len()
    }
}

impl Network for StubNet {
    fn send(&self, datagram: &[u8], dst: Ipv4Addr) {
        self.sent.borrow_mut().push_back((datagram.to_vec(), dst));
    }

    fn register_receiver(&self, receiver: RecvFn) {
        *self.receiver.borrow_mut() = Some(receiver);
    }
}

/// Configuration for the fault-injection model.
///
/// Probabilities are in `[0.0, 1.0]` and apply independently per datagram.
#[derive(Debug, Clone)]
pub struct LossyConfig {
    /// Probability that an outbound datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that an outbound datagram is delivered twice.
    pub duplicate_rate: f64,
    /// RNG seed; the same seed replays the same fault sequence.
    pub seed: u64,
}

impl Default for LossyConfig {
    fn default() -> Self {
        // Transparent pass-through unless faults are requested.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            seed: 0,
        }
    }
}

/// A fault-injecting wrapper around another [`Network`]'s send path.
pub struct LossyNet {
    inner: Rc<dyn Network>,
    config: LossyConfig,
    rng: RefCell<StdRng>,
}

impl LossyNet {
    pub fn new(inner: Rc<dyn Network>, config: LossyConfig) -> Rc<Self> {
        let rng = RefCell::new(StdRng::seed_from_u64(config.seed));
        Rc::new(Self { inner, config, rng })
    }
}

impl Network for LossyNet {
    fn send(&self, datagram: &[u8], dst: Ipv4Addr) {
        let (lost, duplicated) = {
            let mut rng = self.rng.borrow_mut();
            (
                rng.gen_bool(self.config.loss_rate),
                rng.gen_bool(self.config.duplicate_rate),
            )
        };

        if lost {
            log::debug!("[sim] dropping {}-byte datagram to {dst}", datagram.len());
            return;
        }
        self.inner.send(datagram, dst);
        if duplicated {
            log::debug!("[sim] duplicating {}-byte datagram to {dst}", datagram.len());
            self.inner.send(datagram, dst);
        }
    }

    fn register_receiver(&self, receiver: RecvFn) {
        self.inner.register_receiver(receiver);
    }
}
