//! A star-topology TCP message switch: one Communication Switch Process (CSP)
//! arbitrating unicast transfers among N Station Processes (SPs).
//!
//! The wire protocol, queue admission rules, and retry policy are described in
//! [`wire`], [`queue`], [`csp`], and [`sp`]. Binaries in `src/bin/` wire the
//! library into a runnable CSP and SP.

pub mod command;
pub mod connection;
pub mod csp;
pub mod error;
pub mod frame;
pub mod queue;
pub mod sp;
pub mod wire;

pub use error::{CspError, CspResult, SpError, SpResult};
pub use frame::{Frame, Role};
pub use wire::{FrameHeader, INITFRAMESIZE, MAXDATASIZE, MAXFRAMESIZE};
