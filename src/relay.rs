use crate::error::Socks5Error;
use std::io;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, split},
    net::TcpStream,
};
use tracing::debug;

/// Per-direction transfer buffer
pub const RELAY_BUFFER_SIZE: usize = 32 * 1024;

/// RelayStats counts the bytes moved in each direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub from_client: u64,
    pub from_upstream: u64,
}

/// RelaySession owns both ends of a proxied connection.
///
/// The session ends as soon as either direction reaches end-of-stream or
/// fails; the other direction is cancelled and both connections are shut
/// down. `close` is idempotent.
pub struct RelaySession<C, U = TcpStream> {
    client: Option<C>,
    upstream: Option<U>,
    stats: RelayStats,
}

impl<C, U> RelaySession<C, U>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(client: C, upstream: U) -> Self {
        Self {
            client: Some(client),
            upstream: Some(upstream),
            stats: RelayStats::default(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.client.is_none() && self.upstream.is_none()
    }

    /// stats returns the bytes relayed so far
    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// run copies bytes both ways until one side finishes, then closes the
    /// session. Running a closed session returns immediately.
    pub async fn run(&mut self) -> Result<RelayStats, Socks5Error> {
        let (Some(client), Some(upstream)) = (self.client.take(), self.upstream.take()) else {
            self.close().await;
            return Ok(self.stats);
        };

        let (mut client_rd, mut client_wr) = split(client);
        let (mut upstream_rd, mut upstream_wr) = split(upstream);

        let mut from_client = 0;
        let mut from_upstream = 0;

        // Whichever direction finishes first ends the session; the other
        // copy future is dropped, which cancels it
        let result = tokio::select! {
            res = pipe(&mut client_rd, &mut upstream_wr, &mut from_client) => {
                debug!("client side finished first");
                res
            }
            res = pipe(&mut upstream_rd, &mut client_wr, &mut from_upstream) => {
                debug!("upstream side finished first");
                res
            }
        };

        self.stats.from_client += from_client;
        self.stats.from_upstream += from_upstream;

        self.client = Some(client_rd.unsplit(client_wr));
        self.upstream = Some(upstream_rd.unsplit(upstream_wr));
        self.close().await;

        result?;
        Ok(self.stats)
    }

    /// close shuts down whichever connections are still held
    pub async fn close(&mut self) {
        if let Some(mut client) = self.client.take() {
            if let Err(e) = client.shutdown().await {
                debug!("client shutdown: {e}");
            }
        }

        if let Some(mut upstream) = self.upstream.take() {
            if let Err(e) = upstream.shutdown().await {
                debug!("upstream shutdown: {e}");
            }
        }
    }
}

/// pipe copies one direction through a fixed buffer until EOF or error.
///
/// The count is bumped after every write instead of being returned at the
/// end as `tokio::io::copy` does, so the direction that loses the race and
/// gets dropped still reports what it moved.
async fn pipe<R, W>(reader: &mut R, writer: &mut W, transferred: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *transferred += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn relays_both_directions_until_client_closes() {
        let (mut client, proxy_client) = duplex(1024);
        let (proxy_upstream, mut upstream) = duplex(1024);

        let relay = tokio::spawn(async move {
            let mut session = RelaySession::new(proxy_client, proxy_upstream);
            let stats = session.run().await;
            (stats, session.stats(), session.is_closed())
        });

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        upstream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        upstream.write_all(b"pong!").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong!");

        drop(client);

        let (stats, kept, closed) = relay.await.unwrap();
        let expected = RelayStats {
            from_client: 4,
            from_upstream: 5,
        };
        assert_eq!(stats.unwrap(), expected);
        // The losing direction's bytes are kept on the session too
        assert_eq!(kept, expected);
        assert!(closed);

        // The upstream side sees the session go away
        let mut rest = Vec::new();
        upstream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn upstream_eof_tears_down_client_side() {
        let (mut client, proxy_client) = duplex(1024);
        let (proxy_upstream, upstream) = duplex(1024);

        let relay = tokio::spawn(async move {
            RelaySession::new(proxy_client, proxy_upstream).run().await
        });

        drop(upstream);

        let stats = relay.await.unwrap().unwrap();
        assert_eq!(stats, RelayStats::default());

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn closing_twice_is_a_no_op() {
        let (_client, proxy_client) = duplex(64);
        let (proxy_upstream, _upstream) = duplex(64);

        let mut session = RelaySession::new(proxy_client, proxy_upstream);
        assert!(!session.is_closed());

        session.close().await;
        assert!(session.is_closed());

        session.close().await;
        assert!(session.is_closed());

        // Running a closed session does nothing
        assert_eq!(session.run().await.unwrap(), RelayStats::default());
    }
}
