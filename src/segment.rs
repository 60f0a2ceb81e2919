//! Wire-format definitions for transport segments.
//!
//! Every unit handed to (or received from) the datagram layer is a
//! [`Segment`].  This module is responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Segment`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Segment`], returning errors
//!   for malformed, truncated, or corrupted input.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Source Port          |       Destination Port        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Offset|          Flags        |          Window Size          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            Checksum           |        Urgent Pointer         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! `Offset` encodes the header length in 32-bit words (5 when no options are
//! present); the payload begins at `4 × offset`.  The checksum is the
//! Internet checksum (RFC 1071) over an IPv4 pseudo-header (source address,
//! destination address, zero byte, protocol 6, segment length) followed by
//! the header and payload — so a segment can only be validated against the
//! address pair it travelled between.

use std::net::Ipv4Addr;

use thiserror::Error;

/// Bit-flag constants for the 12-bit `flags` header field.
pub mod flags {
    /// Finish — sender has no more data to send.  Consumes one sequence slot.
    pub const FIN: u16 = 0b0000_0000_0001;
    /// Synchronise sequence numbers (handshake).  Consumes one sequence slot.
    pub const SYN: u16 = 0b0000_0000_0010;
    /// Acknowledgement field is valid.
    pub const ACK: u16 = 0b0000_0001_0000;
}

/// Byte length of the fixed-size header on the wire (no options).
pub const HEADER_LEN: usize = 20;

/// Header length in 32-bit words, as carried in the data-offset field.
const DATA_OFFSET_WORDS: u8 = (HEADER_LEN / 4) as u8;

/// Largest payload carried by one segment; larger writes are split.
pub const MSS: usize = 1460;

// Byte offsets of each field within the serialised header.
const OFF_SRC_PORT: usize = 0;
const OFF_DST_PORT: usize = 2;
const OFF_SEQ: usize = 4;
const OFF_ACK: usize = 8;
const OFF_FLAGS: usize = 12;
const OFF_WINDOW: usize = 14;
const OFF_CHECKSUM: usize = 16;
const OFF_URGENT: usize = 18;

/// A transport segment: fixed header fields plus payload bytes.
///
/// Fields are in host byte order; [`Segment::encode`] converts to big-endian
/// on the wire and [`Segment::decode`] converts back.  The data-offset nibble
/// and the checksum are computed during encoding and are not stored here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Sending side's port.
    pub src_port: u16,
    /// Receiving side's port.
    pub dst_port: u16,
    /// Sequence number of the first payload byte (or of the SYN/FIN itself).
    pub seq: u32,
    /// Acknowledgment number (next sequence number expected from the peer).
    pub ack: u32,
    /// Bitmask of [`flags`] constants.
    pub flags: u16,
    /// Advertised receive-window size in bytes.
    pub window: u16,
    /// Urgent pointer; carried verbatim, never interpreted.
    pub urgent: u16,
    /// Application payload.
    pub payload: Vec<u8>,
}

impl Segment {
    /// `true` when every bit of `mask` is set in this segment's flags.
    pub fn has(&self, mask: u16) -> bool {
        self.flags & mask == mask
    }

    /// Serialise this segment into a newly allocated byte vector, computing
    /// the checksum over the pseudo-header for the `src_ip → dst_ip` pair.
    pub fn encode(&self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];

        buf[OFF_SRC_PORT..OFF_SRC_PORT + 2].copy_from_slice(&self.src_port.to_be_bytes());
        buf[OFF_DST_PORT..OFF_DST_PORT + 2].copy_from_slice(&self.dst_port.to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.ack.to_be_bytes());
        let offset_flags = (u16::from(DATA_OFFSET_WORDS) << 12) | (self.flags & 0x0fff);
        buf[OFF_FLAGS..OFF_FLAGS + 2].copy_from_slice(&offset_flags.to_be_bytes());
        buf[OFF_WINDOW..OFF_WINDOW + 2].copy_from_slice(&self.window.to_be_bytes());
        // Checksum field is zero while computing the checksum.
        buf[OFF_URGENT..OFF_URGENT + 2].copy_from_slice(&self.urgent.to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        let csum = checksum(src_ip, dst_ip, &buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());

        buf
    }

    /// Parse a [`Segment`] from a raw datagram travelling `src_ip → dst_ip`.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`] or than the claimed data offset,
    /// - the data-offset field is below the minimum header size, or
    /// - the checksum does not verify against the pseudo-header.
    pub fn decode(buf: &[u8], src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> Result<Self, SegmentError> {
        if buf.len() < HEADER_LEN {
            return Err(SegmentError::Truncated);
        }

        let offset_flags = u16::from_be_bytes([buf[OFF_FLAGS], buf[OFF_FLAGS + 1]]);
        let data_offset = (offset_flags >> 12) as u8;
        let header_len = 4 * data_offset as usize;
        if data_offset < DATA_OFFSET_WORDS {
            return Err(SegmentError::BadDataOffset(data_offset));
        }
        if buf.len() < header_len {
            return Err(SegmentError::Truncated);
        }

        // Verify checksum: zero the stored field, recompute, compare.
        let stored = u16::from_be_bytes([buf[OFF_CHECKSUM], buf[OFF_CHECKSUM + 1]]);
        let mut scratch = buf.to_vec();
        scratch[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&0u16.to_be_bytes());
        if checksum(src_ip, dst_ip, &scratch) != stored {
            return Err(SegmentError::ChecksumMismatch);
        }

        Ok(Segment {
            src_port: u16::from_be_bytes([buf[OFF_SRC_PORT], buf[OFF_SRC_PORT + 1]]),
            dst_port: u16::from_be_bytes([buf[OFF_DST_PORT], buf[OFF_DST_PORT + 1]]),
            seq: u32::from_be_bytes([buf[OFF_SEQ], buf[OFF_SEQ + 1], buf[OFF_SEQ + 2], buf[OFF_SEQ + 3]]),
            ack: u32::from_be_bytes([buf[OFF_ACK], buf[OFF_ACK + 1], buf[OFF_ACK + 2], buf[OFF_ACK + 3]]),
            flags: offset_flags & 0x0fff,
            window: u16::from_be_bytes([buf[OFF_WINDOW], buf[OFF_WINDOW + 1]]),
            urgent: u16::from_be_bytes([buf[OFF_URGENT], buf[OFF_URGENT + 1]]),
            payload: buf[header_len..].to_vec(),
        })
    }

    /// Read the destination port of a raw datagram without decoding it.
    ///
    /// Used by the registry to ignore traffic for other listeners before
    /// paying for checksum validation.  Returns `None` when the buffer is too
    /// short to carry the field.
    pub fn peek_dst_port(buf: &[u8]) -> Option<u16> {
        if buf.len() < OFF_DST_PORT + 2 {
            return None;
        }
        Some(u16::from_be_bytes([buf[OFF_DST_PORT], buf[OFF_DST_PORT + 1]]))
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    /// Buffer shorter than the header (fixed part or claimed data offset).
    #[error("datagram too short to contain a segment header")]
    Truncated,
    /// Data-offset field below the minimum header size.
    #[error("data offset {0} is below the minimum header size")]
    BadDataOffset(u8),
    /// Checksum did not match the recomputed value.
    #[error("checksum verification failed")]
    ChecksumMismatch,
}

/// Compute the Internet checksum (RFC 1071) over the IPv4 pseudo-header for
/// `src_ip → dst_ip` followed by `segment` (header + payload).
///
/// The caller must zero the checksum field within `segment` before calling.
fn checksum(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, segment: &[u8]) -> u16 {
    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&src_ip.octets());
    pseudo[4..8].copy_from_slice(&dst_ip.octets());
    // pseudo[8] is the zero byte.
    pseudo[9] = 6; // protocol number for TCP
    pseudo[10..12].copy_from_slice(&(segment.len() as u16).to_be_bytes());

    let mut sum = sum_words(&pseudo, 0);
    sum = sum_words(segment, sum);

    // Fold 32-bit sum into 16 bits.
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

/// Sum consecutive 16-bit big-endian words, padding an odd trailing byte
/// with zero on the right.
fn sum_words(data: &[u8], mut sum: u32) -> u32 {
    let mut i = 0;
    while i + 1 < data.len() {
        sum += u32::from(u16::from_be_bytes([data[i], data[i + 1]]));
        i += 2;
    }
    if i < data.len() {
        sum += u32::from(data[i]) << 8;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
    const DST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

    fn make_segment(seq: u32, ack: u32, flags: u16, payload: &[u8]) -> Segment {
        Segment {
            src_port: 40000,
            dst_port: 7000,
            seq,
            ack,
            flags,
            window: 4096,
            urgent: 0,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let seg = make_segment(42, 7, flags::ACK, b"hello");
        let decoded = Segment::decode(&seg.encode(SRC, DST), SRC, DST).unwrap();
        assert_eq!(decoded, seg);
    }

    #[test]
    fn wire_layout_is_big_endian() {
        let bytes = make_segment(0x0102_0304, 0x0506_0708, 0, b"").encode(SRC, DST);
        assert_eq!(&bytes[0..2], &[0x9c, 0x40]); // src port 40000
        assert_eq!(&bytes[2..4], &[0x1b, 0x58]); // dst port 7000
        assert_eq!(&bytes[4..8], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[8..12], &[0x05, 0x06, 0x07, 0x08]);
    }

    #[test]
    fn data_offset_and_flags_share_one_field() {
        let seg = make_segment(0, 0, flags::SYN | flags::ACK, b"");
        let bytes = seg.encode(SRC, DST);
        let field = u16::from_be_bytes([bytes[12], bytes[13]]);
        assert_eq!(field >> 12, 5, "20-byte header is five 32-bit words");
        assert_eq!(field & 0x0fff, flags::SYN | flags::ACK);
    }

    #[test]
    fn payload_follows_data_offset() {
        let bytes = make_segment(1, 0, flags::ACK, b"xyz").encode(SRC, DST);
        assert_eq!(bytes.len(), HEADER_LEN + 3);
        assert_eq!(&bytes[HEADER_LEN..], b"xyz");
    }

    #[test]
    fn decode_short_buffer_returns_truncated() {
        assert_eq!(
            Segment::decode(&[0u8; HEADER_LEN - 1], SRC, DST),
            Err(SegmentError::Truncated)
        );
    }

    #[test]
    fn decode_corrupt_byte_returns_checksum_error() {
        let mut bytes = make_segment(99, 0, flags::SYN, b"test").encode(SRC, DST);
        bytes[HEADER_LEN] ^= 0xff;
        assert_eq!(
            Segment::decode(&bytes, SRC, DST),
            Err(SegmentError::ChecksumMismatch)
        );
    }

    #[test]
    fn checksum_binds_segment_to_address_pair() {
        // A segment rerouted between different hosts must fail validation
        // because the pseudo-header addresses change.
        let bytes = make_segment(1, 2, flags::ACK, b"data").encode(SRC, DST);
        let other = Ipv4Addr::new(192, 168, 0, 9);
        assert_eq!(
            Segment::decode(&bytes, other, DST),
            Err(SegmentError::ChecksumMismatch)
        );
    }

    #[test]
    fn decode_honours_larger_data_offset() {
        // Hand-build a header claiming 6 words (one 4-byte option) so the
        // payload starts at byte 24.
        let mut buf = vec![0u8; 24 + 2];
        buf[12] = 6 << 4;
        buf[24..26].copy_from_slice(b"ok");
        let csum = checksum(SRC, DST, &buf);
        buf[16..18].copy_from_slice(&csum.to_be_bytes());

        let seg = Segment::decode(&buf, SRC, DST).unwrap();
        assert_eq!(seg.payload, b"ok");
    }

    #[test]
    fn decode_rejects_undersized_data_offset() {
        let mut buf = make_segment(0, 0, 0, b"").encode(SRC, DST);
        buf[12] = (4 << 4) | (buf[12] & 0x0f); // claim a 16-byte header
        let csum = {
            let mut scratch = buf.clone();
            scratch[16..18].copy_from_slice(&[0, 0]);
            checksum(SRC, DST, &scratch)
        };
        buf[16..18].copy_from_slice(&csum.to_be_bytes());
        assert_eq!(Segment::decode(&buf, SRC, DST), Err(SegmentError::BadDataOffset(4)));
    }

    #[test]
    fn peek_dst_port_reads_without_validation() {
        let bytes = make_segment(0, 0, 0, b"").encode(SRC, DST);
        assert_eq!(Segment::peek_dst_port(&bytes), Some(7000));
        assert_eq!(Segment::peek_dst_port(&bytes[..3]), None);
    }

    #[test]
    fn empty_payload_roundtrip() {
        let seg = make_segment(0, 1000, flags::FIN | flags::ACK, b"");
        let decoded = Segment::decode(&seg.encode(SRC, DST), SRC, DST).unwrap();
        assert!(decoded.payload.is_empty());
        assert!(decoded.has(flags::FIN));
        assert!(decoded.has(flags::ACK));
    }
}
