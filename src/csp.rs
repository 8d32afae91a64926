//! The Communication Switch Process: accepts station connections, admits or
//! defers transfer requests against two bounded queues, forwards data
//! chunks, and breaks deadlocks with a wake broadcast.
//!
//! The reference CSP is a single-threaded `select()` loop over a listening
//! socket and up to N peer sockets with a two-second timeout. This struct
//! keeps that shape as a single Tokio task: `tokio::select!` replaces
//! `select()`, and `first_ready` — a hand-rolled `poll_fn` scan over peer
//! sockets in round-robin order — replaces iterating the `fd_set` the
//! reference fills in before each call. Within a single tick, a peer ready
//! to have its data forwarded always wins over a peer that merely has a
//! signal pending, matching the reference's scan order.

use crate::connection::Connection;
use crate::error::{CspError, CspResult};
use crate::frame::{Frame, Role};
use crate::queue::{DataQueue, RequestEntry, RequestQueue};
use crate::wire::{FrameHeader, INITFRAMESIZE, MAXDATASIZE, MAXFRAMESIZE};
use std::task::Poll;
use std::time::Duration;
use tokio::net::{TcpListener, ToSocketAddrs};

/// How long the switch waits for activity before checking for deadlock.
const TIMEOUT: Duration = Duration::from_secs(2);

struct PeerSlot {
    conn: Option<Connection>,
    waiting: bool,
}

/// The result of one round-robin scan over ready peers: a data-queue
/// forward always takes priority over dispatching a signal.
enum ReadyKind {
    Forward(usize),
    Signal(usize),
}

/// The switch's full arbitration state.
pub struct Switch {
    listener: TcpListener,
    request_queue_cap: usize,
    data_queue_cap: usize,
    cluster_size: u32,
    peers: Vec<PeerSlot>,
    request_queue: RequestQueue,
    data_queue: DataQueue,
    done_count: u32,
    round_robin_cursor: usize,
}

impl Switch {
    /// Bind the listening socket. The cluster size is not known until the
    /// first station connects and announces it.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        request_queue_cap: usize,
        data_queue_cap: usize,
    ) -> CspResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            request_queue_cap,
            data_queue_cap,
            cluster_size: 0,
            peers: Vec::new(),
            request_queue: RequestQueue::with_capacity(request_queue_cap),
            data_queue: DataQueue::with_capacity(data_queue_cap),
            done_count: 0,
            round_robin_cursor: 0,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the switch to completion: admits all N stations, arbitrates
    /// traffic between them, and exits once every station has quit.
    pub async fn run(mut self) -> CspResult<()> {
        self.accept_first().await?;
        loop {
            if self.done_count == self.cluster_size {
                break;
            }
            let needs_more = self.connections_needed() > 0;
            tokio::select! {
                biased;

                _ = tokio::time::sleep(TIMEOUT) => {
                    self.on_timeout().await?;
                }

                accepted = self.listener.accept(), if needs_more => {
                    if let Err(e) = self.on_accept(accepted).await {
                        tracing::warn!(error = %e, "dropping connection attempt during handshake");
                    }
                }

                ready = Self::first_ready(&self.peers, &self.data_queue, self.round_robin_cursor) => {
                    self.round_robin_cursor = match ready {
                        ReadyKind::Forward(idx) | ReadyKind::Signal(idx) => {
                            (idx + 1) % self.peers.len().max(1)
                        }
                    };
                    let result = match ready {
                        ReadyKind::Forward(idx) => self.forward_chunk(idx).await,
                        ReadyKind::Signal(idx) => self.dispatch_signal(idx).await,
                    };
                    if let Err(e) = result {
                        let idx = match ready {
                            ReadyKind::Forward(idx) | ReadyKind::Signal(idx) => idx,
                        };
                        tracing::warn!(sp = idx, error = %e, "peer error; dropping connection");
                        self.peers[idx].conn = None;
                    }
                }
            }
        }
        self.broadcast_quit_confirm().await
    }

    fn connections_needed(&self) -> usize {
        self.peers.iter().filter(|p| p.conn.is_none()).count()
    }

    /// Scan every peer socket once, starting at `cursor` in round-robin
    /// order. A peer whose id is currently installed in the data queue and
    /// which is readable wins over any readable peer that isn't — matching
    /// the priority the reference's main loop gives to draining an
    /// in-flight transfer before servicing a fresh signal. Implemented with
    /// `poll_fn` rather than a fixed set of `tokio::select!` arms because
    /// the peer count is only known at runtime.
    async fn first_ready(peers: &[PeerSlot], data_queue: &DataQueue, cursor: usize) -> ReadyKind {
        let n = peers.len();
        if n == 0 {
            return std::future::pending::<ReadyKind>().await;
        }
        std::future::poll_fn(move |cx| {
            let mut first_signal: Option<usize> = None;
            let mut first_forward: Option<usize> = None;
            for offset in 0..n {
                let i = (cursor + offset) % n;
                let Some(conn) = &peers[i].conn else { continue };
                if conn.poll_read_ready(cx).is_ready() {
                    if first_forward.is_none() && data_queue.find_by_src(i as u32).is_some() {
                        first_forward = Some(i);
                    }
                    if first_signal.is_none() {
                        first_signal = Some(i);
                    }
                }
            }
            match first_forward {
                Some(i) => Poll::Ready(ReadyKind::Forward(i)),
                None => match first_signal {
                    Some(i) => Poll::Ready(ReadyKind::Signal(i)),
                    None => Poll::Pending,
                },
            }
        })
        .await
    }

    async fn accept_first(&mut self) -> CspResult<()> {
        loop {
            let (socket, _) = self.listener.accept().await?;
            let mut conn = Connection::new(socket);
            let header = match conn.read_header().await? {
                Some(h) => h,
                None => continue,
            };
            if !header.is_self_addressed() {
                return Err(CspError::HandshakeIdentityMismatch {
                    src: header.src,
                    dst: header.dst,
                });
            }
            let announced = header.total_size();
            if announced == 0 || announced > u32::MAX as u64 {
                return Err(CspError::HandshakeMismatch {
                    announced,
                    expected: 0,
                });
            }
            self.cluster_size = announced as u32;
            self.peers = (0..self.cluster_size)
                .map(|_| PeerSlot {
                    conn: None,
                    waiting: false,
                })
                .collect();
            self.request_queue = RequestQueue::with_capacity(self.request_queue_cap);
            self.data_queue = DataQueue::with_capacity(self.data_queue_cap);

            let id = header.src;
            if id >= self.cluster_size {
                return Err(CspError::PeerIdOutOfRange(id, self.cluster_size));
            }
            tracing::info!(cluster_size = self.cluster_size, sp = id, "switch online");
            self.peers[id as usize].conn = Some(conn);
            return Ok(());
        }
    }

    async fn on_accept(
        &mut self,
        accepted: std::io::Result<(tokio::net::TcpStream, std::net::SocketAddr)>,
    ) -> CspResult<()> {
        let (socket, _addr) = accepted?;
        let mut conn = Connection::new(socket);
        let header = conn.read_header().await?.ok_or(CspError::ConnectionClosed)?;
        if !header.is_self_addressed() {
            return Err(CspError::HandshakeIdentityMismatch {
                src: header.src,
                dst: header.dst,
            });
        }
        let id = header.src;
        if id >= self.cluster_size {
            return Err(CspError::PeerIdOutOfRange(id, self.cluster_size));
        }
        if header.total_size() != self.cluster_size as u64 {
            return Err(CspError::HandshakeMismatch {
                announced: header.total_size(),
                expected: self.cluster_size,
            });
        }
        tracing::info!(sp = id, "station connected");
        self.peers[id as usize].conn = Some(conn);
        Ok(())
    }

    async fn on_timeout(&mut self) -> CspResult<()> {
        let waiting = self.peers.iter().filter(|p| p.waiting).count() as u32;
        if waiting == 0 || waiting + self.done_count != self.cluster_size {
            return Ok(());
        }
        tracing::info!(waiting, "deadlock detected; broadcasting wake");
        for i in 0..self.peers.len() {
            if !self.peers[i].waiting {
                continue;
            }
            let header = FrameHeader::signal(i as u32, 1);
            if let Some(conn) = self.peers[i].conn.as_mut() {
                conn.write_header(&header).await?;
            }
            self.peers[i].waiting = false;
        }
        Ok(())
    }

    /// Forward one chunk of an admitted transfer. The switch trusts only
    /// the data-queue entry's own bookkeeping for how many bytes remain; it
    /// never decodes a header out of the bytes it moves (§4.7: the CSP does
    /// not inspect the forwarded bytes; a sender-supplied length field
    /// inside the chunk plays no role in how much is read or written here).
    async fn forward_chunk(&mut self, slot: usize) -> CspResult<()> {
        let (src, dst, n) = {
            let entry = self
                .data_queue
                .get(slot)
                .ok_or(CspError::MissingDataEntry(slot as u32))?;
            let n = entry.bytes_remaining.min(MAXFRAMESIZE as u64) as usize;
            (entry.src, entry.dst, n)
        };
        let src_idx = src as usize;
        let dst_idx = dst as usize;

        {
            let conn = self.peers[src_idx]
                .conn
                .as_mut()
                .ok_or(CspError::ConnectionClosed)?;
            let entry = self
                .data_queue
                .get_mut(slot)
                .ok_or(CspError::MissingDataEntry(slot as u32))?;
            conn.read_exact(&mut entry.scratch[..n]).await?;
        }
        {
            let conn = self.peers[dst_idx]
                .conn
                .as_mut()
                .ok_or(CspError::ConnectionClosed)?;
            let entry = self
                .data_queue
                .get(slot)
                .ok_or(CspError::MissingDataEntry(slot as u32))?;
            conn.write_raw(&entry.scratch[..n]).await?;
        }
        self.peers[src_idx].waiting = false;

        let drained = {
            let entry = self.data_queue.get_mut(slot).unwrap();
            entry.bytes_remaining -= n as u64;
            entry.bytes_remaining == 0
        };
        tracing::info!(src, dst, n, "forwarded chunk");
        if drained {
            self.data_queue.free(slot);
            self.promote_all().await?;
        }
        Ok(())
    }

    /// Read and classify a signal/request header from the peer at `idx`.
    /// `idx` — the socket we actually read from — is the only trusted
    /// identity of the sender; the header's own `src` field is never used
    /// to decide who sent it (§5: the CSP identifies senders by socket).
    async fn dispatch_signal(&mut self, idx: usize) -> CspResult<()> {
        let header = {
            let conn = self.peers[idx]
                .conn
                .as_mut()
                .ok_or(CspError::ConnectionClosed)?;
            match conn.recv_try()? {
                Some(h) => h,
                None => return Ok(()),
            }
        };
        let src = idx as u32;

        match Frame::classify(&header, Role::Switch) {
            Frame::QuitReady => {
                self.done_count += 1;
                tracing::info!(sp = src, "quit-ready received");
                Ok(())
            }
            Frame::Wait { .. } => {
                self.peers[idx].waiting = true;
                tracing::debug!(sp = src, "wait notice received");
                Ok(())
            }
            Frame::Request { dst, total_size } => {
                if dst >= self.cluster_size {
                    self.reply(src, src + 1, false).await?;
                    tracing::warn!(sp = src, dst, "rejected malformed request: destination out of range");
                    return Ok(());
                }
                self.admit_or_queue(src, dst, total_size).await
            }
            // The switch never reads its own replies back off a station's
            // socket; `Reply`/`Wake`/`QuitConfirm` only occur from `Role::Station`.
            Frame::Reply { .. } | Frame::Wake | Frame::QuitConfirm => unreachable!(),
        }
    }

    async fn admit_or_queue(&mut self, src: u32, dst: u32, payload: u64) -> CspResult<()> {
        let admitted = admitted_size(payload);

        if self.peers[dst as usize].conn.is_some() {
            if let Some(slot) = self.data_queue.find_free() {
                self.data_queue.install(slot, src, dst, admitted);
                self.reply(src, dst, true).await?;
                tracing::info!(src, dst, payload, "admitted request");
                return Ok(());
            }
        }

        if self.request_queue.push(RequestEntry {
            src,
            dst,
            total_size: payload,
        }) {
            tracing::debug!(src, dst, payload, "queued request");
            return Ok(());
        }

        self.reply(src, dst, false).await?;
        tracing::info!(src, dst, payload, "rejected request: queues full");
        Ok(())
    }

    async fn promote_all(&mut self) -> CspResult<()> {
        loop {
            let Some(entry) = self.request_queue.front().copied() else {
                break;
            };
            if self.peers[entry.dst as usize].conn.is_none() {
                break;
            }
            let Some(slot) = self.data_queue.find_free() else {
                break;
            };
            self.request_queue.pop_front();
            let admitted = admitted_size(entry.total_size);
            self.data_queue.install(slot, entry.src, entry.dst, admitted);
            self.reply(entry.src, entry.dst, true).await?;
            tracing::info!(src = entry.src, dst = entry.dst, "promoted queued request");
        }
        Ok(())
    }

    async fn reply(&mut self, src: u32, dst: u32, accepted: bool) -> CspResult<()> {
        let header = FrameHeader::reply(src, dst, accepted);
        let conn = self.peers[src as usize]
            .conn
            .as_mut()
            .ok_or(CspError::ConnectionClosed)?;
        conn.write_header(&header).await?;
        Ok(())
    }

    async fn broadcast_quit_confirm(&mut self) -> CspResult<()> {
        for i in 0..self.peers.len() {
            if let Some(conn) = self.peers[i].conn.as_mut() {
                let header = FrameHeader::signal(i as u32, 0);
                conn.write_header(&header).await?;
            }
        }
        tracing::info!("all stations confirmed quit; switch shutting down");
        Ok(())
    }
}

/// Bytes a transfer of `payload` bytes occupies once chunked into
/// MAXFRAMESIZE-sized frames, each carrying its own header.
fn admitted_size(payload: u64) -> u64 {
    if payload == 0 {
        return 0;
    }
    let frame_count = payload.div_ceil(MAXDATASIZE as u64);
    payload + INITFRAMESIZE as u64 * frame_count
}
