//! End-to-end exercises of the switch's admission and forwarding behavior
//! against raw TCP peers standing in for stations, matching the literal
//! scenarios enumerated for this protocol.

use std::io::Cursor;
use switchsim::csp::Switch;
use switchsim::wire::{FrameHeader, INITFRAMESIZE, MAXDATASIZE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

struct RawPeer {
    stream: TcpStream,
}

impl RawPeer {
    async fn connect(addr: std::net::SocketAddr, id: u32, cluster_size: u32) -> Self {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let handshake = FrameHeader::with_total_size(id, id, cluster_size as u64);
        stream.write_all(&handshake.to_bytes()).await.unwrap();
        Self { stream }
    }

    async fn send_header(&mut self, header: FrameHeader) {
        self.stream.write_all(&header.to_bytes()).await.unwrap();
    }

    async fn send_frame(&mut self, header: FrameHeader, payload: &[u8]) {
        self.stream.write_all(&header.to_bytes()).await.unwrap();
        self.stream.write_all(payload).await.unwrap();
    }

    async fn recv_header(&mut self) -> FrameHeader {
        let mut buf = [0u8; INITFRAMESIZE];
        self.stream.read_exact(&mut buf).await.unwrap();
        FrameHeader::from_bytes(&buf)
    }

    async fn recv_payload(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf).await.unwrap();
        buf
    }
}

async fn spawn_switch(request_cap: usize, data_cap: usize) -> std::net::SocketAddr {
    let switch = Switch::bind("127.0.0.1:0", request_cap, data_cap)
        .await
        .unwrap();
    let addr = switch.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = switch.run().await;
    });
    addr
}

#[tokio::test]
async fn accepts_and_forwards_a_single_frame() {
    let addr = spawn_switch(10, 2).await;
    let mut sender = RawPeer::connect(addr, 0, 2).await;
    let mut receiver = RawPeer::connect(addr, 1, 2).await;

    let text = b"hello";
    sender
        .send_header(FrameHeader::with_total_size(0, 1, text.len() as u64))
        .await;
    let reply = sender.recv_header().await;
    assert_eq!(reply.total_size(), 1, "expected accept reply");

    sender
        .send_frame(
            FrameHeader::with_seq_and_len(0, 1, 1, text.len() as u32),
            text,
        )
        .await;

    let data_header = receiver.recv_header().await;
    assert_eq!(data_header.src, 0);
    assert_eq!(data_header.seq_and_len(), (1, text.len() as u32));
    let payload = receiver.recv_payload(text.len()).await;
    assert_eq!(&payload, text);
}

#[tokio::test]
async fn second_request_is_queued_then_promoted() {
    // Single data slot: the second requester's first request must be
    // deferred (no reply) until the first transfer fully drains.
    let addr = spawn_switch(10, 1).await;
    let mut a = RawPeer::connect(addr, 0, 3).await;
    let mut b = RawPeer::connect(addr, 1, 3).await;
    let mut c = RawPeer::connect(addr, 2, 3).await;

    a.send_header(FrameHeader::with_total_size(0, 2, 4)).await;
    let reply_a = a.recv_header().await;
    assert_eq!(reply_a.total_size(), 1);

    b.send_header(FrameHeader::with_total_size(1, 2, 4)).await;

    a.send_frame(FrameHeader::with_seq_and_len(0, 2, 1, 4), b"abcd")
        .await;
    let first = c.recv_header().await;
    assert_eq!(first.src, 0);
    let _ = c.recv_payload(4).await;

    let reply_b = b.recv_header().await;
    assert_eq!(reply_b.total_size(), 1, "second request promoted after first drained");

    b.send_frame(FrameHeader::with_seq_and_len(1, 2, 1, 4), b"wxyz")
        .await;
    let second = c.recv_header().await;
    assert_eq!(second.src, 1);
    let payload = c.recv_payload(4).await;
    assert_eq!(&payload, b"wxyz");
}

#[tokio::test]
async fn out_of_range_destination_is_rejected() {
    let addr = spawn_switch(10, 2).await;
    let mut sender = RawPeer::connect(addr, 0, 2).await;

    sender
        .send_header(FrameHeader::with_total_size(0, 7, 16))
        .await;
    let reply = sender.recv_header().await;
    assert!(reply.trailer_is_zero(), "out-of-range destination must be rejected");
}

#[tokio::test(start_paused = true)]
async fn all_waiting_breaks_deadlock_with_a_wake() {
    let addr = spawn_switch(10, 2).await;
    let mut a = RawPeer::connect(addr, 0, 2).await;
    let mut b = RawPeer::connect(addr, 1, 2).await;

    a.send_header(FrameHeader::with_total_size(0, 0, 1)).await;
    b.send_header(FrameHeader::with_total_size(1, 1, 1)).await;

    let wake_a = a.recv_header().await;
    let wake_b = b.recv_header().await;
    assert!(wake_a.is_self_addressed() && !wake_a.trailer_is_zero());
    assert!(wake_b.is_self_addressed() && !wake_b.trailer_is_zero());
}

#[tokio::test]
async fn file_larger_than_max_data_size_splits_across_frames() {
    let addr = spawn_switch(10, 2).await;
    let mut sender = RawPeer::connect(addr, 0, 2).await;
    let mut receiver = RawPeer::connect(addr, 1, 2).await;

    let total = MAXDATASIZE + 1840;
    let payload = vec![7u8; total];
    sender
        .send_header(FrameHeader::with_total_size(0, 1, total as u64))
        .await;
    let reply = sender.recv_header().await;
    assert_eq!(reply.total_size(), 1);

    let mut cursor = Cursor::new(&payload);
    let mut seq = 1u32;
    let mut sent = 0usize;
    while sent < total {
        let len = (total - sent).min(MAXDATASIZE);
        let mut chunk = vec![0u8; len];
        std::io::Read::read_exact(&mut cursor, &mut chunk).unwrap();
        sender
            .send_frame(FrameHeader::with_seq_and_len(0, 1, seq, len as u32), &chunk)
            .await;
        sent += len;
        seq += 1;
    }

    let mut received = Vec::new();
    while received.len() < total {
        let header = receiver.recv_header().await;
        let (_, len) = header.seq_and_len();
        received.extend(receiver.recv_payload(len as usize).await);
    }
    assert_eq!(received, payload);
}
