//! UDP transport for the Matter port. One socket, one reader: all datagrams
//! are consumed by the bridge supervisor's receive loop in arrival order.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

pub struct Transport {
    socket: UdpSocket,
}

impl Transport {
    /// Bind the Matter UDP socket. Failure here aborts bridge startup.
    pub async fn bind(local: &str) -> Result<Self> {
        let socket = UdpSocket::bind(local)
            .await
            .with_context(|| format!("binding matter udp socket on {}", local))?;
        log::info!("matter udp server listening on {}", local);
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Wait for the next datagram. `Ok(None)` means the token was cancelled
    /// and the receive loop should wind down.
    pub async fn recv(&self, cancel: &CancellationToken) -> Result<Option<(Vec<u8>, SocketAddr)>> {
        let mut buf = vec![0u8; 1024];
        let (n, addr) = tokio::select! {
            recv_resp = self.socket.recv_from(&mut buf) => recv_resp?,
            _ = cancel.cancelled() => return Ok(None),
        };
        buf.resize(n, 0);
        Ok(Some((buf, addr)))
    }

    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> Result<()> {
        self.socket.send_to(data, addr).await?;
        Ok(())
    }
}
