//! Utilities for testing code built on the dispatcher. They are part of the crate's regular API
//!  so that applications embedding the protocol engine can use them in their own tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::pipe::Pipe;


/// An in-memory [Pipe]: frames are pushed in through the corresponding [ChannelPeer], and
///  responses are collected there.
pub struct ChannelPipe {
    max_packet_size: usize,
    requests: Mutex<mpsc::UnboundedReceiver<Bytes>>,
    responses: mpsc::UnboundedSender<Bytes>,
    closed: Arc<AtomicBool>,
}

/// The peer's end of a [ChannelPipe]
pub struct ChannelPeer {
    requests: Option<mpsc::UnboundedSender<Bytes>>,
    responses: mpsc::UnboundedReceiver<Bytes>,
    closed: Arc<AtomicBool>,
}

impl ChannelPipe {
    pub fn new(max_packet_size: usize) -> (ChannelPipe, ChannelPeer) {
        let (request_sender, request_receiver) = mpsc::unbounded_channel();
        let (response_sender, response_receiver) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let pipe = ChannelPipe {
            max_packet_size,
            requests: Mutex::new(request_receiver),
            responses: response_sender,
            closed: closed.clone(),
        };
        let peer = ChannelPeer {
            requests: Some(request_sender),
            responses: response_receiver,
            closed,
        };
        (pipe, peer)
    }
}

#[async_trait]
impl Pipe for ChannelPipe {
    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    async fn recv(&self) -> anyhow::Result<Option<Bytes>> {
        if self.closed.load(Ordering::Acquire) {
            anyhow::bail!("pipe is closed");
        }
        Ok(self.requests.lock().await.recv().await)
    }

    async fn send(&self, packet_buf: &[u8]) -> anyhow::Result<()> {
        if packet_buf.len() > self.max_packet_size {
            anyhow::bail!("frame of {} bytes exceeds max packet size {}", packet_buf.len(), self.max_packet_size);
        }
        self.responses.send(Bytes::copy_from_slice(packet_buf))?;
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl ChannelPeer {
    /// Queues a request frame. Frames sent after [ChannelPeer::close] are dropped.
    pub fn send(&self, frame: Bytes) {
        if let Some(requests) = &self.requests {
            let _ = requests.send(frame);
        }
    }

    /// Signals end of input: the pipe's `recv` returns `None` once all queued frames were
    ///  received
    pub fn close(&mut self) {
        self.requests = None;
    }

    /// All responses sent by the pipe since the previous call
    pub fn responses(&mut self) -> Vec<Bytes> {
        let mut result = Vec::new();
        while let Ok(frame) = self.responses.try_recv() {
            result.push(frame);
        }
        result
    }

    /// `true` if the pipe was closed from the dispatcher's side
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
