// ABOUTME: Error types for the switch (CspError) and station (SpError) endpoints
// ABOUTME: thiserror-derived enums splitting transport-fatal I/O errors from protocol violations

use std::io;
use thiserror::Error;

/// Errors the switch can encounter while arbitrating peers.
#[derive(Error, Debug)]
pub enum CspError {
    #[error("I/O error on peer socket: {0}")]
    PeerIo(#[from] io::Error),

    #[error("handshake announced size {announced} does not match configured cluster size {expected}")]
    HandshakeMismatch { announced: u64, expected: u32 },

    #[error("handshake frame did not announce src == dst (src={src}, dst={dst})")]
    HandshakeIdentityMismatch { src: u32, dst: u32 },

    #[error("peer id {0} is out of range for a cluster of size {1}")]
    PeerIdOutOfRange(u32, u32),

    #[error("connection closed before a complete frame header arrived")]
    ConnectionClosed,

    #[error("data queue entry for src {0} vanished mid-forward")]
    MissingDataEntry(u32),
}

pub type CspResult<T> = std::result::Result<T, CspError>;

/// Errors a station process can encounter.
#[derive(Error, Debug)]
pub enum SpError {
    #[error("I/O error talking to the switch: {0}")]
    PeerIo(#[from] io::Error),

    #[error("switch closed the connection unexpectedly")]
    ConnectionClosed,

    #[error("command file {0} could not be opened: {1}")]
    CommandFileUnavailable(String, io::Error),

    #[error("log file {0} could not be opened: {1}")]
    LogFileUnavailable(String, io::Error),

    #[error("received a reply that does not match any outstanding request (src={src}, dst={dst})")]
    UnexpectedReply { src: u32, dst: u32 },
}

pub type SpResult<T> = std::result::Result<T, SpError>;
