use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tracing::{debug, trace};

/// The request/response transport a [crate::dispatcher::Dispatcher] runs on. Each exchange is
///  one inbound frame followed by (at most) one outbound frame, neither exceeding
///  `max_packet_size`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Pipe: Send + Sync + 'static {
    /// fixed for the lifetime of the pipe
    fn max_packet_size(&self) -> usize;

    /// Blocks until the next inbound frame is available. Returns `Ok(None)` if the transport was
    ///  closed in an orderly fashion, and an error if it became unusable.
    async fn recv(&self) -> anyhow::Result<Option<Bytes>>;

    async fn send(&self, packet_buf: &[u8]) -> anyhow::Result<()>;

    /// idempotent
    async fn close(&self);
}


/// A [Pipe] on a UDP socket that is connected to a single peer: every datagram received from the
///  peer is a request, and the response goes back as a single datagram.
///
/// Closing the pipe releases the socket. A `recv` that is blocked at that point keeps the socket
///  alive until it returns.
pub struct UdpPipe {
    socket: RwLock<Option<Arc<UdpSocket>>>,
    local_addr: SocketAddr,
    max_packet_size: usize,
}

impl UdpPipe {
    pub async fn connect(local_addr: SocketAddr, peer_addr: SocketAddr, max_packet_size: usize) -> anyhow::Result<UdpPipe> {
        let socket = UdpSocket::bind(local_addr).await?;
        socket.connect(peer_addr).await?;
        let local_addr = socket.local_addr()?;
        debug!("UDP pipe bound to {:?}, connected to {:?}", local_addr, peer_addr);

        Ok(UdpPipe {
            socket: RwLock::new(Some(Arc::new(socket))),
            local_addr,
            max_packet_size,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn socket(&self) -> anyhow::Result<Arc<UdpSocket>> {
        match self.socket.read().await.as_ref() {
            Some(socket) => Ok(socket.clone()),
            None => anyhow::bail!("UDP pipe on {:?} is closed", self.local_addr),
        }
    }
}

#[async_trait]
impl Pipe for UdpPipe {
    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    async fn recv(&self) -> anyhow::Result<Option<Bytes>> {
        // one extra byte to detect oversized datagrams instead of silently truncating them
        let mut buf = vec![0u8; self.max_packet_size + 1];
        let len = self.socket().await?.recv(&mut buf).await?;
        if len > self.max_packet_size {
            anyhow::bail!("received datagram exceeds max packet size of {} bytes", self.max_packet_size);
        }

        trace!("UDP pipe: received {} bytes", len);
        buf.truncate(len);
        Ok(Some(buf.into()))
    }

    async fn send(&self, packet_buf: &[u8]) -> anyhow::Result<()> {
        trace!("UDP pipe: sending {} bytes", packet_buf.len());
        self.socket().await?.send(packet_buf).await?;
        Ok(())
    }

    async fn close(&self) {
        if self.socket.write().await.take().is_some() {
            debug!("closing UDP pipe on {:?}", self.local_addr);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_udp_pipe_exchange() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let pipe = UdpPipe::connect("127.0.0.1:0".parse().unwrap(), peer.local_addr().unwrap(), 32).await.unwrap();
        peer.connect(pipe.local_addr()).await.unwrap();

        peer.send(&[2, 0, 1]).await.unwrap();
        let frame = pipe.recv().await.unwrap();
        assert_eq!(frame.as_deref(), Some([2u8, 0, 1].as_slice()));

        pipe.send(&[2, 0, 1]).await.unwrap();
        let mut buf = [0u8; 64];
        let len = peer.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &[2, 0, 1]);

        pipe.close().await;
        pipe.close().await;
        assert!(pipe.send(&[2, 0, 1]).await.is_err());
        assert!(pipe.recv().await.is_err());

        // the port was released
        UdpSocket::bind(pipe.local_addr()).await.unwrap();
    }

    #[tokio::test]
    async fn test_udp_pipe_rejects_oversized_datagram() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let pipe = UdpPipe::connect("127.0.0.1:0".parse().unwrap(), peer.local_addr().unwrap(), 16).await.unwrap();
        peer.connect(pipe.local_addr()).await.unwrap();

        peer.send(&[0u8; 17]).await.unwrap();
        assert!(pipe.recv().await.is_err());
    }
}
