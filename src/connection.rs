// ABOUTME: Buffered, framed I/O over a single peer TCP socket
// ABOUTME: Provides header-aware read/write plus a raw read_exact/write_raw pair for opaque chunk forwarding

use crate::wire::{FrameHeader, INITFRAMESIZE, MAXDATASIZE};
use bytes::{Buf, BytesMut};
use std::io::{self, Cursor};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

/// A buffered TCP connection carrying frame-header-delimited traffic.
pub struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
}

impl Connection {
    pub fn new(socket: TcpStream) -> Self {
        Self {
            stream: BufWriter::new(socket),
            buffer: BytesMut::with_capacity(INITFRAMESIZE * 4),
        }
    }

    /// Read exactly one header, blocking (awaiting) until it arrives.
    pub async fn read_header(&mut self) -> io::Result<Option<FrameHeader>> {
        loop {
            if self.buffer.len() >= INITFRAMESIZE {
                return Ok(Some(self.take_header()));
            }
            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection reset mid-header",
                ));
            }
        }
    }

    /// Non-blocking probe: returns `Ok(None)` immediately if a complete
    /// header is not yet buffered and the socket would otherwise block.
    /// Used only after a readiness check has already fired for this socket.
    pub fn recv_try(&mut self) -> io::Result<Option<FrameHeader>> {
        if self.buffer.len() >= INITFRAMESIZE {
            return Ok(Some(self.take_header()));
        }
        let mut scratch = [0u8; INITFRAMESIZE];
        match self.stream.get_ref().try_read(&mut scratch) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection reset",
            )),
            Ok(n) => {
                self.buffer.extend_from_slice(&scratch[..n]);
                if self.buffer.len() >= INITFRAMESIZE {
                    Ok(Some(self.take_header()))
                } else {
                    tracing::trace!(bytes = n, "recv_try: short read, header still incomplete");
                    Ok(None)
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn take_header(&mut self) -> FrameHeader {
        let mut cursor = Cursor::new(&self.buffer[..INITFRAMESIZE]);
        let header = FrameHeader::decode(&mut cursor).expect("length already checked");
        self.buffer.advance(INITFRAMESIZE);
        header
    }

    /// Read exactly `len` payload bytes following a data-frame header.
    pub async fn read_payload(&mut self, len: usize) -> io::Result<Vec<u8>> {
        debug_assert!(len <= MAXDATASIZE);
        while self.buffer.len() < len {
            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection reset mid-payload",
                ));
            }
        }
        let payload = self.buffer[..len].to_vec();
        self.buffer.advance(len);
        Ok(payload)
    }

    pub async fn write_header(&mut self, header: &FrameHeader) -> io::Result<()> {
        self.stream.write_all(&header.to_bytes()).await?;
        self.stream.flush().await
    }

    pub async fn write_frame(&mut self, header: &FrameHeader, payload: &[u8]) -> io::Result<()> {
        self.stream.write_all(&header.to_bytes()).await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await
    }

    /// Read exactly `buf.len()` raw bytes, draining any already-buffered
    /// bytes first. The switch uses this to forward one data-queue chunk
    /// without decoding a header out of it — the bytes are opaque to us.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let buffered = self.buffer.len().min(buf.len());
        if buffered > 0 {
            buf[..buffered].copy_from_slice(&self.buffer[..buffered]);
            self.buffer.advance(buffered);
        }
        if buffered < buf.len() {
            self.stream.read_exact(&mut buf[buffered..]).await?;
        }
        Ok(())
    }

    /// Write `buf` verbatim with no header, flushing afterward. Counterpart
    /// to [`Connection::read_exact`].
    pub async fn write_raw(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf).await?;
        self.stream.flush().await
    }

    pub fn peer_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.stream.get_ref().peer_addr()
    }

    /// Poll the underlying socket for read readiness without consuming any
    /// bytes. Used by the switch's round-robin readiness scan.
    pub fn poll_read_ready(&self, cx: &mut std::task::Context<'_>) -> std::task::Poll<io::Result<()>> {
        self.stream.get_ref().poll_read_ready(cx)
    }
}
