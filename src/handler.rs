use crate::{
    auth,
    config::ServerConfig,
    error::Socks5Error,
    protocol::{Address, Command, Reply, ReplyCode, Request},
    relay::{RelaySession, RelayStats},
};
use std::{fmt, future::Future, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time,
};
use tracing::{debug, info};

/// State of a single client connection.
///
/// Transitions only move forward; any state can jump to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    AwaitingMethodNegotiation,
    Authenticating,
    AwaitingRequest,
    Resolving,
    Dialing,
    Relaying,
    Closed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            State::AwaitingMethodNegotiation => "awaiting method negotiation",
            State::Authenticating => "authenticating",
            State::AwaitingRequest => "awaiting request",
            State::Resolving => "resolving",
            State::Dialing => "dialing",
            State::Relaying => "relaying",
            State::Closed => "closed",
        };
        f.write_str(phase)
    }
}

/// ConnectionHandler drives one client connection from greeting to close
pub struct ConnectionHandler<S> {
    client: S,
    config: Arc<ServerConfig>,
    state: State,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(client: S, config: Arc<ServerConfig>) -> Self {
        Self {
            client,
            config,
            state: State::AwaitingMethodNegotiation,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// run handles the full client/server SOCKS5 protocol flow. The client
    /// connection, and the upstream one if it was opened, are closed before
    /// this returns.
    pub async fn run(mut self) -> Result<RelayStats, Socks5Error> {
        let upstream = match self.handshake().await {
            Ok(upstream) => upstream,
            Err(err) => {
                self.reject(&err).await;
                self.close().await;
                return Err(err);
            }
        };

        self.enter(State::Relaying);

        let mut session = RelaySession::new(self.client, upstream);
        let result = session.run().await;
        session.close().await;

        debug!("{} -> {}", State::Relaying, State::Closed);
        result
    }

    /// handshake walks the states up to a dialed upstream and a success
    /// reply on the wire
    async fn handshake(&mut self) -> Result<TcpStream, Socks5Error> {
        let config = Arc::clone(&self.config);
        let limit = config.handshake_timeout;

        let authenticator = deadline(
            limit,
            self.state,
            auth::negotiate_method(&mut self.client, &config.auth_methods),
        )
        .await?;
        debug!("selected {:?} authentication", authenticator.method());

        self.enter(State::Authenticating);
        deadline(limit, self.state, authenticator.authenticate(&mut self.client)).await?;

        self.enter(State::AwaitingRequest);
        let request = deadline(limit, self.state, Request::read_from(&mut self.client)).await?;
        info!("{} request for {}", request.command, request.address);

        config.rules.check(request.command)?;
        if request.command != Command::Connect {
            return Err(Socks5Error::CommandNotSupported(request.command));
        }

        self.enter(State::Resolving);
        let target = match request.address {
            Address::Ip(addr) => addr,
            Address::Domain(ref name, port) => {
                let resolve = async {
                    config
                        .resolver
                        .resolve(name)
                        .await
                        .map_err(Socks5Error::from)
                };
                let ip = deadline(config.dial_timeout, self.state, resolve).await?;
                SocketAddr::new(ip, port)
            }
        };

        self.enter(State::Dialing);
        let upstream = deadline(config.dial_timeout, self.state, async {
            config
                .dialer
                .dial(target)
                .await
                .map_err(|source| Socks5Error::Dial {
                    addr: target,
                    source,
                })
        })
        .await?;

        let bound = upstream.local_addr()?;
        info!("connected to {target} via {bound}");

        Reply::new(ReplyCode::Succeeded, bound)
            .write_to(&mut self.client)
            .await?;

        Ok(upstream)
    }

    /// reject tells the client why its request failed, when the protocol
    /// has a status for it
    async fn reject(&mut self, err: &Socks5Error) {
        if self.state < State::AwaitingRequest || self.state >= State::Relaying {
            return;
        }

        let Some(code) = err.reply_code() else {
            return;
        };

        if let Err(e) = Reply::failure(code).write_to(&mut self.client).await {
            debug!("failed to send {code:?} reply: {e}");
        }
    }

    /// close shuts the client connection down; closing twice is a no-op
    pub async fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }

        self.enter(State::Closed);
        if let Err(e) = self.client.shutdown().await {
            debug!("client shutdown: {e}");
        }
    }

    fn enter(&mut self, next: State) {
        debug!("{} -> {}", self.state, next);
        self.state = next;
    }
}

/// deadline bounds a phase of the handshake; running out of time is
/// reported as a timeout in that phase
async fn deadline<T, F>(limit: Duration, state: State, phase: F) -> Result<T, Socks5Error>
where
    F: Future<Output = Result<T, Socks5Error>>,
{
    time::timeout(limit, phase)
        .await
        .map_err(|_| Socks5Error::Timeout(state))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::methods_for_credentials,
        config::CommandRules,
        dialer::Dialer,
        error::{ProtocolError, ResolveError},
        resolver::Resolver,
    };
    use async_trait::async_trait;
    use std::{
        io,
        net::IpAddr,
        sync::atomic::{AtomicUsize, Ordering},
    };
    use tokio::io::{AsyncReadExt, duplex};

    /// Counts lookups and always fails them
    #[derive(Clone, Default)]
    struct CountingResolver(Arc<AtomicUsize>);

    #[async_trait]
    impl Resolver for CountingResolver {
        async fn resolve(&self, name: &str) -> Result<IpAddr, ResolveError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(ResolveError::NoIpv4Found(name.to_owned()))
        }
    }

    /// Lookups that never complete
    struct HungResolver;

    #[async_trait]
    impl Resolver for HungResolver {
        async fn resolve(&self, _name: &str) -> Result<IpAddr, ResolveError> {
            std::future::pending().await
        }
    }

    /// Connects that never complete
    struct HungDialer;

    #[async_trait]
    impl Dialer for HungDialer {
        async fn dial(&self, _addr: SocketAddr) -> io::Result<TcpStream> {
            std::future::pending().await
        }
    }

    fn config() -> ServerConfig {
        ServerConfig::new("127.0.0.1:0")
    }

    async fn read_reply<R: AsyncRead + Unpin>(client: &mut R) -> Reply {
        Reply::read_from(client).await.unwrap()
    }

    async fn assert_closed<R: AsyncRead + Unpin>(client: &mut R) {
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty(), "unexpected trailing bytes {rest:?}");
    }

    #[tokio::test]
    async fn unknown_address_type_never_resolves() {
        let resolver = CountingResolver::default();
        let lookups = Arc::clone(&resolver.0);
        let config = Arc::new(config().with_resolver(resolver));

        let (mut client, server) = duplex(256);
        let handler = tokio::spawn(ConnectionHandler::new(server, config).run());

        client.write_all(&[5, 1, 0]).await.unwrap();
        client
            .write_all(&[5, 1, 0, 0x09, 1, 2, 3, 4, 0, 80])
            .await
            .unwrap();

        let mut choice = [0u8; 2];
        client.read_exact(&mut choice).await.unwrap();
        assert_eq!(choice, [5, 0]);

        let err = handler.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            Socks5Error::Protocol(ProtocolError::UnsupportedAddressType(0x09))
        ));
        assert_eq!(lookups.load(Ordering::SeqCst), 0);

        let reply = read_reply(&mut client).await;
        assert_eq!(reply.status, ReplyCode::AddrTypeUnsupported);
    }

    #[tokio::test]
    async fn wrong_password_stops_before_request() {
        let config = Arc::new(config().with_auth_methods(methods_for_credentials("alice", "s3cret")));

        let (mut client, server) = duplex(256);
        let handler = tokio::spawn(ConnectionHandler::new(server, config).run());

        client.write_all(&[5, 1, 2]).await.unwrap();
        client
            .write_all(&[1, 5, b'a', b'l', b'i', b'c', b'e', 3, b'b', b'a', b'd'])
            .await
            .unwrap();
        // A request that must never be looked at
        client
            .write_all(&[5, 1, 0, 1, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();

        let mut replies = [0u8; 4];
        client.read_exact(&mut replies).await.unwrap();
        assert_eq!(replies, [5, 2, 1, 1]);

        let err = handler.await.unwrap().unwrap_err();
        assert!(matches!(err, Socks5Error::Authentication { .. }));

        assert_closed(&mut client).await;
    }

    #[tokio::test]
    async fn bind_is_not_supported() {
        let (mut client, server) = duplex(256);
        let handler = tokio::spawn(ConnectionHandler::new(server, Arc::new(config())).run());

        client.write_all(&[5, 1, 0]).await.unwrap();
        client
            .write_all(&[5, 2, 0, 1, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();

        let mut choice = [0u8; 2];
        client.read_exact(&mut choice).await.unwrap();

        let reply = read_reply(&mut client).await;
        assert_eq!(reply.status, ReplyCode::CommandNotSupported);
        assert_eq!(reply.bound, Address::unspecified());

        let err = handler.await.unwrap().unwrap_err();
        assert!(matches!(err, Socks5Error::CommandNotSupported(Command::Bind)));
        assert_closed(&mut client).await;
    }

    #[tokio::test]
    async fn forbidden_command_is_not_allowed() {
        let config = Arc::new(config().with_rules(CommandRules {
            connect: false,
            ..CommandRules::permit_all()
        }));

        let (mut client, server) = duplex(256);
        let handler = tokio::spawn(ConnectionHandler::new(server, config).run());

        client.write_all(&[5, 1, 0]).await.unwrap();
        client
            .write_all(&[5, 1, 0, 1, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();

        let mut choice = [0u8; 2];
        client.read_exact(&mut choice).await.unwrap();

        let reply = read_reply(&mut client).await;
        assert_eq!(reply.status, ReplyCode::ConnectionNotAllowed);

        let err = handler.await.unwrap().unwrap_err();
        assert!(matches!(err, Socks5Error::NotAllowed(Command::Connect)));
    }

    #[tokio::test]
    async fn resolution_failure_is_host_unreachable() {
        let resolver = CountingResolver::default();
        let lookups = Arc::clone(&resolver.0);
        let config = Arc::new(config().with_resolver(resolver));

        let (mut client, server) = duplex(256);
        let handler = tokio::spawn(ConnectionHandler::new(server, config).run());

        let mut request = vec![5, 1, 0, 3, 10];
        request.extend_from_slice(b"v6.example");
        request.extend_from_slice(&443u16.to_be_bytes());

        client.write_all(&[5, 1, 0]).await.unwrap();
        client.write_all(&request).await.unwrap();

        let mut choice = [0u8; 2];
        client.read_exact(&mut choice).await.unwrap();

        let reply = read_reply(&mut client).await;
        assert_eq!(reply.status, ReplyCode::HostUnreachable);

        let err = handler.await.unwrap().unwrap_err();
        assert!(matches!(err, Socks5Error::Resolution(ResolveError::NoIpv4Found(_))));
        assert_eq!(lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dial_that_never_finishes_times_out() {
        let config = Arc::new(
            config()
                .with_dialer(HungDialer)
                .with_dial_timeout(Duration::from_millis(300)),
        );

        let (mut client, server) = duplex(256);
        let handler = tokio::spawn(ConnectionHandler::new(server, config).run());

        client.write_all(&[5, 1, 0]).await.unwrap();
        client.write_all(&[5, 1, 0, 1, 127, 0, 0, 1, 0, 80]).await.unwrap();

        let mut choice = [0u8; 2];
        client.read_exact(&mut choice).await.unwrap();
        assert_eq!(choice, [5, 0]);

        let reply = read_reply(&mut client).await;
        assert_eq!(reply.status, ReplyCode::HostUnreachable);
        assert_eq!(reply.bound, Address::unspecified());

        let err = handler.await.unwrap().unwrap_err();
        assert!(matches!(err, Socks5Error::Timeout(State::Dialing)));
        assert_closed(&mut client).await;
    }

    #[tokio::test(start_paused = true)]
    async fn resolution_that_never_finishes_times_out() {
        let config = Arc::new(
            config()
                .with_resolver(HungResolver)
                .with_dial_timeout(Duration::from_millis(300)),
        );

        let (mut client, server) = duplex(256);
        let handler = tokio::spawn(ConnectionHandler::new(server, config).run());

        let mut request = vec![5, 1, 0, 3, 12];
        request.extend_from_slice(b"slow.example");
        request.extend_from_slice(&80u16.to_be_bytes());
        client.write_all(&[5, 1, 0]).await.unwrap();
        client.write_all(&request).await.unwrap();

        let mut choice = [0u8; 2];
        client.read_exact(&mut choice).await.unwrap();

        let reply = read_reply(&mut client).await;
        assert_eq!(reply.status, ReplyCode::HostUnreachable);

        let err = handler.await.unwrap().unwrap_err();
        assert!(matches!(err, Socks5Error::Timeout(State::Resolving)));
        assert_closed(&mut client).await;
    }

    #[tokio::test(start_paused = true)]
    async fn silent_client_times_out_in_negotiation() {
        let config = Arc::new(config().with_handshake_timeout(Duration::from_secs(5)));

        let (mut client, server) = duplex(256);
        let handler = tokio::spawn(ConnectionHandler::new(server, config).run());

        let err = handler.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            Socks5Error::Timeout(State::AwaitingMethodNegotiation)
        ));
        assert_closed(&mut client).await;
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_request_times_out() {
        let config = Arc::new(config().with_handshake_timeout(Duration::from_secs(5)));

        let (mut client, server) = duplex(256);
        let handler = tokio::spawn(ConnectionHandler::new(server, config).run());

        client.write_all(&[5, 1, 0]).await.unwrap();
        // Half a request, then nothing
        client.write_all(&[5, 1, 0, 1, 127]).await.unwrap();

        let err = handler.await.unwrap().unwrap_err();
        assert!(matches!(err, Socks5Error::Timeout(State::AwaitingRequest)));

        let mut choice = [0u8; 2];
        client.read_exact(&mut choice).await.unwrap();
        assert_eq!(choice, [5, 0]);
        assert_closed(&mut client).await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (_client, server) = duplex(64);
        let mut handler = ConnectionHandler::new(server, Arc::new(config()));

        handler.close().await;
        assert_eq!(handler.state(), State::Closed);
        handler.close().await;
        assert_eq!(handler.state(), State::Closed);
    }
}
