//! A Station Process: consumes a command file, sends text or chunked file
//! transfers through the switch, and retries rejected requests with
//! binary-exponential backoff.
//!
//! The retry bookkeeping in [`RetryState`] — a consecutive-failure counter
//! driving a backoff decision, reset on success — is the same shape as the
//! reference crate's `KeepAliveManager`; this is `KeepAliveManager`
//! generalized from "has the peer stopped answering pings" to "has the
//! switch stopped admitting my request". Like `KeepAliveManager` it is a
//! plain struct with no I/O, so its policy is unit-testable on its own.

use crate::command::{self, Directive, Payload};
use crate::connection::Connection;
use crate::error::{SpError, SpResult};
use crate::wire::{FrameHeader, MAXDATASIZE};
use rand::Rng;
use std::io::{BufRead, Read};
use std::time::Duration;
use tokio::net::{TcpStream, ToSocketAddrs};

/// A request sent to the switch that has not yet been accepted or dropped.
struct PendingRequest {
    dst: u32,
    total_size: u64,
}

/// An admitted transfer in progress: the whole payload, chunked out as the
/// switch accepts each frame.
struct OutgoingTransfer {
    dst: u32,
    seq: u32,
    data: Vec<u8>,
    offset: usize,
}

impl OutgoingTransfer {
    fn bytes_remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn next_chunk(&mut self, src: u32) -> (FrameHeader, Vec<u8>) {
        let len = self.bytes_remaining().min(MAXDATASIZE);
        let chunk = self.data[self.offset..self.offset + len].to_vec();
        let header = FrameHeader::with_seq_and_len(src, self.dst, self.seq, len as u32);
        self.offset += len;
        self.seq += 1;
        (header, chunk)
    }
}

/// What a station should do after a request reply arrives, decided purely
/// from the consecutive-failure count with no I/O involved.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReplyOutcome {
    /// The switch admitted the request; the pending retry is cleared.
    Accepted,
    /// Rejected, but under the drop threshold: resend after a delay chosen
    /// uniformly from `0..ceiling_secs`.
    Retry { ceiling_secs: u64 },
    /// Rejected four times in a row: give up on this request.
    Dropped,
}

/// Tracks consecutive request rejections for one station and decides
/// whether to back off or give up, mirroring the reference's 4-strikes
/// drop rule (binary-exponential backoff, ceiling doubling per failure).
pub(crate) struct RetryState {
    fail_count: u32,
}

impl RetryState {
    fn new() -> Self {
        Self { fail_count: 0 }
    }

    fn on_accept(&mut self) -> ReplyOutcome {
        self.fail_count = 0;
        ReplyOutcome::Accepted
    }

    fn on_reject(&mut self) -> ReplyOutcome {
        self.fail_count += 1;
        if self.fail_count >= 4 {
            self.fail_count = 0;
            ReplyOutcome::Dropped
        } else {
            ReplyOutcome::Retry {
                ceiling_secs: 1u64 << self.fail_count,
            }
        }
    }
}

/// One station's full session state.
pub struct Station {
    id: u32,
    conn: Connection,
    commands: Box<dyn BufRead + Send>,
    wait_packets: u64,
    finished_sent_quit: bool,
    quit_confirmed: bool,
    blocked: bool,
    retry: RetryState,
    pending: Option<PendingRequest>,
    resend_after: Option<Duration>,
    transfer: Option<OutgoingTransfer>,
}

impl Station {
    /// Connect to the switch and perform the initial handshake announcing
    /// this station's id and the cluster size.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        id: u32,
        cluster_size: u32,
        commands: Box<dyn BufRead + Send>,
    ) -> SpResult<Self> {
        let socket = TcpStream::connect(addr).await?;
        let mut conn = Connection::new(socket);
        let handshake = FrameHeader::with_total_size(id, id, cluster_size as u64);
        conn.write_header(&handshake).await?;
        tracing::info!(sp = id, cluster_size, "connected to switch");
        Ok(Self {
            id,
            conn,
            commands,
            wait_packets: 0,
            finished_sent_quit: false,
            quit_confirmed: false,
            blocked: false,
            retry: RetryState::new(),
            pending: None,
            resend_after: None,
            transfer: None,
        })
    }

    /// Drive this station's command file to completion and exit once the
    /// switch confirms shutdown.
    pub async fn run(mut self) -> SpResult<()> {
        loop {
            let blocking_wait = self.finished_sent_quit || self.wait_packets > 0;
            let header = if blocking_wait {
                self.conn.read_header().await?
            } else {
                self.conn.recv_try()?
            };
            if let Some(h) = header {
                self.dispatch_inbound(h).await?;
            }
            if self.quit_confirmed {
                tracing::info!(sp = self.id, "switch confirmed shutdown");
                return Ok(());
            }

            if blocking_wait {
                if rand::thread_rng().gen_bool(0.5) {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                continue;
            }

            if let Some(delay) = self.resend_after.take() {
                tokio::time::sleep(delay).await;
                self.resend_pending_request().await?;
                continue;
            }

            if !self.blocked {
                if let Some(transfer) = self.transfer.as_mut() {
                    if transfer.bytes_remaining() > 0 {
                        let (header, payload) = transfer.next_chunk(self.id);
                        self.conn.write_frame(&header, &payload).await?;
                        continue;
                    }
                    self.transfer = None;
                    continue;
                }
            }

            if !self.blocked && self.transfer.is_none() {
                self.advance_command_stream().await?;
                continue;
            }

            tokio::task::yield_now().await;
        }
    }

    async fn dispatch_inbound(&mut self, header: FrameHeader) -> SpResult<()> {
        if header.is_self_addressed() {
            if header.trailer_is_zero() {
                self.quit_confirmed = true;
            } else {
                tracing::debug!(sp = self.id, "deadlock wake received");
                self.wait_packets = 0;
            }
            return Ok(());
        }

        // The switch is this station's only peer, so header.src here is
        // content it wrote, not an untrusted claim: src == self.id marks a
        // reply to our own outstanding request, anything else is a data
        // frame forwarded from another station.
        if header.src == self.id {
            let accepted = header.total_size() != 0;
            let outcome = if accepted {
                self.retry.on_accept()
            } else {
                self.retry.on_reject()
            };
            match outcome {
                ReplyOutcome::Accepted => {
                    self.blocked = false;
                    self.pending = None;
                }
                ReplyOutcome::Retry { ceiling_secs } => {
                    let delay_secs = rand::thread_rng().gen_range(0..ceiling_secs);
                    self.resend_after = Some(Duration::from_secs(delay_secs));
                }
                ReplyOutcome::Dropped => {
                    tracing::warn!(sp = self.id, dst = header.dst, "request dropped after 4 rejects");
                    self.blocked = false;
                    self.pending = None;
                    self.transfer = None;
                }
            }
            return Ok(());
        }

        let (seq, len) = header.seq_and_len();
        let _payload = self.conn.read_payload(len as usize).await?;
        if self.wait_packets > 0 {
            self.wait_packets -= 1;
        }
        tracing::info!(sp = self.id, from = header.src, seq, len, "received frame");
        Ok(())
    }

    async fn resend_pending_request(&mut self) -> SpResult<()> {
        let Some(pending) = &self.pending else {
            return Ok(());
        };
        let header = FrameHeader::with_total_size(self.id, pending.dst, pending.total_size);
        self.conn.write_header(&header).await?;
        tracing::debug!(sp = self.id, dst = pending.dst, "resent request");
        Ok(())
    }

    async fn advance_command_stream(&mut self) -> SpResult<()> {
        match self.next_directive()? {
            Some(Directive::Wait { frames }) => {
                // Accumulate into the cumulative count and send it, not the
                // delta: a resumed wait that was previously partially
                // satisfied must still announce its full remaining total.
                // If the cumulative count is still zero, send nothing — a
                // zero-trailer self-addressed frame would be indistinguishable
                // from quit-ready on the switch's side.
                self.wait_packets += frames;
                if self.wait_packets > 0 {
                    let header = FrameHeader::with_total_size(self.id, self.id, self.wait_packets);
                    self.conn.write_header(&header).await?;
                }
            }
            Some(Directive::Send { seq, dst, payload }) => {
                self.begin_transfer(seq, dst, payload).await?;
            }
            None => {
                if !self.finished_sent_quit {
                    let header = FrameHeader::signal(self.id, 0);
                    self.conn.write_header(&header).await?;
                    self.finished_sent_quit = true;
                    tracing::info!(sp = self.id, "command stream exhausted; sent quit-ready");
                }
            }
        }
        Ok(())
    }

    fn next_directive(&mut self) -> SpResult<Option<Directive>> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.commands.read_line(&mut line)?;
            if n == 0 {
                return Ok(None);
            }
            if let Some(directive) = command::parse_line(&line) {
                return Ok(Some(directive));
            }
        }
    }

    async fn begin_transfer(&mut self, seq: u32, dst: u32, payload: Payload) -> SpResult<()> {
        let data = match payload {
            Payload::Text(text) => text.into_bytes(),
            Payload::File(path) => match std::fs::File::open(&path) {
                Ok(mut f) => {
                    let mut buf = Vec::new();
                    f.read_to_end(&mut buf)?;
                    buf
                }
                Err(_) => format!("Error opening: {}", path.display()).into_bytes(),
            },
        };
        if data.is_empty() {
            tracing::debug!(sp = self.id, seq, dst, "skipping empty-payload frame directive");
            return Ok(());
        }
        let total_size = data.len() as u64;
        let header = FrameHeader::with_total_size(self.id, dst, total_size);
        self.conn.write_header(&header).await?;
        self.blocked = true;
        self.pending = Some(PendingRequest { dst, total_size });
        self.transfer = Some(OutgoingTransfer {
            dst,
            seq,
            data,
            offset: 0,
        });
        tracing::debug!(sp = self.id, dst, total_size, "requested transfer");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outgoing_transfer_chunks_at_max_data_size() {
        let mut transfer = OutgoingTransfer {
            dst: 1,
            seq: 5,
            data: vec![b'x'; MAXDATASIZE + 1],
            offset: 0,
        };
        let (h1, c1) = transfer.next_chunk(0);
        assert_eq!(c1.len(), MAXDATASIZE);
        assert_eq!(h1.seq_and_len(), (5, MAXDATASIZE as u32));
        let (h2, c2) = transfer.next_chunk(0);
        assert_eq!(c2.len(), 1);
        assert_eq!(h2.seq_and_len().0, 6);
        assert_eq!(transfer.bytes_remaining(), 0);
    }

    #[test]
    fn exact_boundary_produces_one_chunk() {
        let mut transfer = OutgoingTransfer {
            dst: 1,
            seq: 0,
            data: vec![b'y'; MAXDATASIZE],
            offset: 0,
        };
        let (_h, c) = transfer.next_chunk(0);
        assert_eq!(c.len(), MAXDATASIZE);
        assert_eq!(transfer.bytes_remaining(), 0);
    }

    #[test]
    fn escalates_and_drops_after_four_rejects() {
        let mut retry = RetryState::new();
        assert_eq!(retry.on_reject(), ReplyOutcome::Retry { ceiling_secs: 2 });
        assert_eq!(retry.on_reject(), ReplyOutcome::Retry { ceiling_secs: 4 });
        assert_eq!(retry.on_reject(), ReplyOutcome::Retry { ceiling_secs: 8 });
        assert_eq!(retry.on_reject(), ReplyOutcome::Dropped);
        assert_eq!(retry.fail_count, 0);
    }

    #[test]
    fn accept_resets_fail_count() {
        let mut retry = RetryState::new();
        retry.on_reject();
        retry.on_reject();
        assert_eq!(retry.on_accept(), ReplyOutcome::Accepted);
        assert_eq!(retry.on_reject(), ReplyOutcome::Retry { ceiling_secs: 2 });
    }

    #[test]
    fn backoff_ceiling_doubles_per_failure() {
        let mut retry = RetryState::new();
        let ceilings: Vec<u64> = (0..3)
            .map(|_| match retry.on_reject() {
                ReplyOutcome::Retry { ceiling_secs } => ceiling_secs,
                other => panic!("expected Retry, got {other:?}"),
            })
            .collect();
        assert_eq!(ceilings, vec![2, 4, 8]);
    }
}
