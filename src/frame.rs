//! Typed classification of a decoded [`FrameHeader`].
//!
//! The reference's PDUs carry a `command_id` field that self-describes the
//! frame's kind; this protocol's header carries no such tag (see
//! [`crate::wire::FrameHeader`]'s doc comment), so `Frame::parse` takes the
//! perspective (`Role`) the caller is reading it from rather than
//! discovering the kind purely from bytes. `Frame::check`/`Frame::parse`
//! otherwise play the same roles as the reference's pair: `check` asks
//! whether a complete frame sits at the front of the buffer, `parse`
//! decodes and classifies it.

use crate::wire::{FrameHeader, INITFRAMESIZE};
use std::io::{self, Cursor};

/// Error produced while checking or parsing a frame.
#[derive(Debug)]
pub enum Error {
    /// Not enough bytes have arrived yet to decode a header.
    Incomplete,
    Other(io::Error),
}

/// Which endpoint is interpreting a just-read header. The switch sees
/// requests and signals from stations; a station sees replies and signals
/// from the switch. The same wire shape means different things depending on
/// which side is reading it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Switch,
    Station,
}

/// A classified, non-data frame. Data frames are deliberately not a variant
/// here: the switch forwards their bytes opaquely (see `csp::forward_chunk`)
/// and never decodes a header out of them, and a station decodes its own
/// inbound data header directly since the payload length that follows it is
/// the one piece `Frame` has no use for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Frame {
    Request { dst: u32, total_size: u64 },
    Reply { accepted: bool },
    Wait { frames: u64 },
    Wake,
    QuitReady,
    QuitConfirm,
}

impl Frame {
    /// Does a complete frame header sit at the front of `src`?
    pub fn check(src: &Cursor<&[u8]>) -> Result<(), Error> {
        if (src.get_ref().len() as u64) < src.position() + INITFRAMESIZE as u64 {
            return Err(Error::Incomplete);
        }
        Ok(())
    }

    /// Decode the header at `src` and classify it from `role`'s point of
    /// view. Never trusts the header's own `src` field for identity — the
    /// caller already knows whose connection this came from.
    pub fn parse(src: &mut Cursor<&[u8]>, role: Role) -> Result<Frame, Error> {
        let header = FrameHeader::decode(src).map_err(Error::Other)?;
        Ok(Self::classify(&header, role))
    }

    /// Classify a header already decoded by the caller (e.g. via
    /// [`crate::connection::Connection::read_header`]).
    pub fn classify(header: &FrameHeader, role: Role) -> Frame {
        if header.is_self_addressed() {
            if header.trailer_is_zero() {
                match role {
                    Role::Switch => Frame::QuitReady,
                    Role::Station => Frame::QuitConfirm,
                }
            } else {
                match role {
                    Role::Switch => Frame::Wait { frames: header.total_size() },
                    Role::Station => Frame::Wake,
                }
            }
        } else {
            match role {
                Role::Switch => Frame::Request {
                    dst: header.dst,
                    total_size: header.total_size(),
                },
                Role::Station => Frame::Reply {
                    accepted: header.total_size() != 0,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_request_and_reply_from_the_same_header() {
        let header = FrameHeader::with_total_size(0, 1, 500);
        assert_eq!(
            Frame::classify(&header, Role::Switch),
            Frame::Request { dst: 1, total_size: 500 }
        );
        assert_eq!(
            Frame::classify(&header, Role::Station),
            Frame::Reply { accepted: true }
        );
    }

    #[test]
    fn classifies_self_addressed_headers_by_role_and_trailer() {
        let quit = FrameHeader::signal(2, 0);
        assert_eq!(Frame::classify(&quit, Role::Switch), Frame::QuitReady);
        assert_eq!(Frame::classify(&quit, Role::Station), Frame::QuitConfirm);

        let wait = FrameHeader::signal(2, 3);
        assert_eq!(Frame::classify(&wait, Role::Switch), Frame::Wait { frames: 3 });
        assert_eq!(Frame::classify(&wait, Role::Station), Frame::Wake);
    }

    #[test]
    fn check_reports_incomplete_for_a_short_buffer() {
        let bytes = [0u8; 8];
        let cursor = Cursor::new(bytes.as_slice());
        assert!(matches!(Frame::check(&cursor), Err(Error::Incomplete)));
    }

    #[test]
    fn parse_decodes_and_classifies_in_one_step() {
        let header = FrameHeader::with_total_size(0, 0, 0);
        let bytes = header.to_bytes();
        let mut cursor = Cursor::new(bytes.as_slice());
        assert!(Frame::check(&cursor).is_ok());
        let frame = Frame::parse(&mut cursor, Role::Switch).unwrap();
        assert_eq!(frame, Frame::QuitReady);
    }
}
