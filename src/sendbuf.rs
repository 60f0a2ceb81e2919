//! Retransmission queue for unacknowledged outbound segments.
//!
//! [`SendBuffer`] holds every transmitted segment that the peer has not yet
//! acknowledged, ordered by sequence number (front = oldest).  The connection
//! layer retransmits the oldest entry when the retransmit timer fires and
//! pops entries as cumulative ACKs arrive.
//!
//! # Contract
//!
//! - ACKs are **cumulative**: `ack = K` means the peer has accepted all
//!   sequence numbers up to (but not including) `K`.
//! - Each entry spans `payload.len()` sequence numbers, or exactly one for a
//!   SYN or FIN control segment (they consume a slot without carrying data).
//! - Sequence numbers are `u32` and wrap; comparisons use the convention that
//!   two values are "close" when their difference is below `u32::MAX / 2`.
//!
//! This module only manages state; all network I/O is the caller's
//! responsibility.

use std::collections::VecDeque;
use std::time::Instant;

/// Returns `true` when sequence number `a` is ≤ `b` in wrap-around space.
///
/// Correct as long as the two values are less than `u32::MAX / 2` apart,
/// which always holds for the amount of data a connection keeps in flight.
#[inline]
fn seq_le(a: u32, b: u32) -> bool {
    b.wrapping_sub(a) <= u32::MAX / 2
}

/// A single outbound segment awaiting acknowledgment.
#[derive(Debug, Clone)]
pub struct PendingSegment {
    /// Sequence number this segment was sent with.
    pub seq: u32,
    /// Sequence numbers consumed: payload length, or 1 for SYN/FIN.
    pub span: u32,
    /// The encoded datagram, ready to hand back to the network layer.
    pub datagram: Vec<u8>,
    /// Total number of times this segment has been transmitted.
    pub tx_count: u32,
    /// Wall-clock time of the most recent transmission.
    pub sent_at: Instant,
}

impl PendingSegment {
    /// First sequence number after this segment's span.
    pub fn end(&self) -> u32 {
        self.seq.wrapping_add(self.span)
    }
}

/// Ordered queue of unacknowledged segments for one connection.
#[derive(Debug, Default)]
pub struct SendBuffer {
    queue: VecDeque<PendingSegment>,
}

impl SendBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` when no segment is awaiting acknowledgment.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of segments currently awaiting acknowledgment.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Append a just-transmitted segment.
    ///
    /// `span` must be non-zero: a zero-span entry could never be covered by
    /// any acknowledgment and would wedge the queue.
    pub fn push(&mut self, seq: u32, span: u32, datagram: Vec<u8>) {
        debug_assert!(span > 0, "zero-span segments must not be queued");
        self.queue.push_back(PendingSegment {
            seq,
            span,
            datagram,
            tx_count: 1,
            sent_at: Instant::now(),
        });
    }

    /// Process a cumulative acknowledgment.
    ///
    /// Pops every entry whose span ends at or before `ack` and returns how
    /// many were removed.  Duplicate ACKs (at or behind the oldest entry) and
    /// spurious ACKs beyond the newest entry's end remove nothing.
    pub fn on_ack(&mut self, ack: u32) -> usize {
        if let Some(back) = self.queue.back() {
            if !seq_le(ack, back.end()) {
                return 0;
            }
        }

        let mut acked = 0;
        while let Some(front) = self.queue.front() {
            if seq_le(front.end(), ack) {
                self.queue.pop_front();
                acked += 1;
            } else {
                break;
            }
        }
        acked
    }

    /// The oldest unacknowledged segment, if any.
    pub fn oldest(&self) -> Option<&PendingSegment> {
        self.queue.front()
    }

    /// Bump the transmission count and refresh `sent_at` for the oldest
    /// entry.  Call immediately after retransmitting it.
    pub fn mark_retransmitted(&mut self) {
        if let Some(front) = self.queue.front_mut() {
            front.tx_count += 1;
            front.sent_at = Instant::now();
        }
    }

    /// Drop every queued segment (connection aborted or replaced).
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
