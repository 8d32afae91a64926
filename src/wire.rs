//! The 16-byte fixed frame header shared by every message on the wire, and
//! the byte-level helpers used to pack/unpack it.
//!
//! Grounded on the reference's `PduHeader`: a fixed-size struct with a
//! validating `decode`/`encode` pair, kept separate from the higher-level
//! [`crate::csp`]/[`crate::sp`] dispatch logic the same way `PduHeader` is
//! kept separate from PDU bodies.

use bytes::{Buf, BufMut, BytesMut};
use std::io::{self, Cursor};

/// Size in bytes of a frame header (also the minimum frame size).
pub const INITFRAMESIZE: usize = 16;
/// Largest frame the wire protocol allows, header included.
pub const MAXFRAMESIZE: usize = 4096;
/// Largest payload a single data frame may carry.
pub const MAXDATASIZE: usize = MAXFRAMESIZE - INITFRAMESIZE;

/// The fixed 16-byte header that precedes every frame on the wire.
///
/// The trailing 8 bytes are either a single big-endian `u64` (an initial
/// handshake or transfer request, see [`FrameHeader::total_size`]) or two
/// big-endian `u32`s (a data/signal frame, see [`FrameHeader::seq_and_len`]).
/// Which interpretation applies is a property of the conversation, not of
/// the header itself — callers choose the accessor that matches context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub src: u32,
    pub dst: u32,
    field_a: u32,
    field_b: u32,
}

impl FrameHeader {
    /// Build a header carrying a single 64-bit value in the trailing field
    /// (the initial-handshake / transfer-request shape).
    pub fn with_total_size(src: u32, dst: u32, total_size: u64) -> Self {
        Self {
            src,
            dst,
            field_a: (total_size >> 32) as u32,
            field_b: total_size as u32,
        }
    }

    /// Build a header carrying an independent sequence number and payload
    /// length (the data/signal shape).
    pub fn with_seq_and_len(src: u32, dst: u32, seq: u32, len: u32) -> Self {
        Self {
            src,
            dst,
            field_a: seq,
            field_b: len,
        }
    }

    /// Build a zero/one-valued signal header: wait-wake, quit-ready, or
    /// quit-confirm all share this shape, distinguished by `src == dst` and
    /// the caller's own bookkeeping of which signal it is.
    pub fn signal(id: u32, value: u64) -> Self {
        Self::with_total_size(id, id, value)
    }

    /// Build an accept/reject reply: `value` is 1 for accept, 0 for reject.
    pub fn reply(src: u32, dst: u32, accepted: bool) -> Self {
        Self::with_total_size(src, dst, accepted as u64)
    }

    pub fn total_size(&self) -> u64 {
        ((self.field_a as u64) << 32) | self.field_b as u64
    }

    pub fn seq_and_len(&self) -> (u32, u32) {
        (self.field_a, self.field_b)
    }

    /// True for the all-zero-trailer shutdown/reject shape.
    pub fn trailer_is_zero(&self) -> bool {
        self.field_a == 0 && self.field_b == 0
    }

    pub fn is_self_addressed(&self) -> bool {
        self.src == self.dst
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u32(self.src);
        dst.put_u32(self.dst);
        dst.put_u32(self.field_a);
        dst.put_u32(self.field_b);
    }

    pub fn to_bytes(&self) -> [u8; INITFRAMESIZE] {
        let mut buf = BytesMut::with_capacity(INITFRAMESIZE);
        self.encode(&mut buf);
        let mut out = [0u8; INITFRAMESIZE];
        out.copy_from_slice(&buf);
        out
    }

    /// Decode a header from exactly [`INITFRAMESIZE`] bytes.
    pub fn decode(src: &mut Cursor<&[u8]>) -> io::Result<Self> {
        if src.remaining() < INITFRAMESIZE {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "not enough bytes for a frame header",
            ));
        }
        Ok(Self {
            src: src.get_u32(),
            dst: src.get_u32(),
            field_a: src.get_u32(),
            field_b: src.get_u32(),
        })
    }

    pub fn from_bytes(bytes: &[u8; INITFRAMESIZE]) -> Self {
        let mut cursor = Cursor::new(bytes.as_slice());
        Self::decode(&mut cursor).expect("fixed-size buffer always decodes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_size_round_trips() {
        let h = FrameHeader::with_total_size(3, 5, 10_048);
        assert_eq!(h.total_size(), 10_048);
        let bytes = h.to_bytes();
        let decoded = FrameHeader::from_bytes(&bytes);
        assert_eq!(decoded, h);
        assert_eq!(decoded.total_size(), 10_048);
    }

    #[test]
    fn seq_and_len_round_trips() {
        let h = FrameHeader::with_seq_and_len(1, 2, 7, MAXDATASIZE as u32);
        let (seq, len) = h.seq_and_len();
        assert_eq!(seq, 7);
        assert_eq!(len, MAXDATASIZE as u32);
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let bytes = [0u8; 8];
        let mut cursor = Cursor::new(bytes.as_slice());
        assert!(FrameHeader::decode(&mut cursor).is_err());
    }

    #[test]
    fn reply_and_signal_shapes() {
        let accept = FrameHeader::reply(2, 4, true);
        assert_eq!(accept.total_size(), 1);
        let reject = FrameHeader::reply(2, 4, false);
        assert!(reject.trailer_is_zero());
        let wake = FrameHeader::signal(1, 1);
        assert!(wake.is_self_addressed());
    }
}
