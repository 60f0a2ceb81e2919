//! Connection finite-state machine (FSM) types.
//!
//! This module defines every state a [`crate::conn::Connection`] can occupy.
//! Only the passive-open (server) half of the TCP state diagram is modelled;
//! active open is not part of this transport.  Transitions are implemented in
//! [`crate::conn`]; the diagram below is the complete map.
//!
//! ```text
//!   SYN received           SYN+ACK queued          close() queues FIN
//!  ────────────▶ SYN_RCVD ───────────────▶ ESTABLISHED ──────────▶ CLOSING
//!                                               │                     │
//!                                               │ peer FIN            │ FIN acked, peer FIN,
//!                                               ▼ (EOF to app)        ▼ or retries exhausted
//!                                          ESTABLISHED             CLOSED (deregistered)
//! ```

/// All possible states of the connection FSM (passive-open side).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// SYN received; the SYN+ACK reply has not been queued yet.
    ///
    /// Transient: the connection moves to `Established` in the same dispatch
    /// that created it, as soon as the SYN+ACK enters the retransmission
    /// queue.  The peer's final ACK is handled as an ordinary segment.
    SynReceived,
    /// Handshake reply queued; data transfer in progress.
    Established,
    /// Local side queued a FIN and is awaiting the peer's acknowledgment.
    Closing,
    /// Teardown complete; the connection has left the registry and no
    /// further segments will reach it.
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
