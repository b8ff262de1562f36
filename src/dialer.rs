use async_trait::async_trait;
use std::{io, net::SocketAddr};
use tokio::net::{TcpSocket, TcpStream};
use tracing::debug;

/// Dialer opens the outbound connection once the target has been resolved
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: SocketAddr) -> io::Result<TcpStream>;
}

/// DirectDialer connects straight to the target from a socket of the
/// target's address family
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectDialer;

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };

        debug!("dialing {addr}");
        let stream = socket.connect(addr).await?;
        stream.set_nodelay(true)?;

        Ok(stream)
    }
}
