use crate::{config::ServerConfig, error::Socks5Error, handler::ConnectionHandler};
use anyhow::{Context, Result, bail};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::{TcpListener, TcpStream},
    time,
};
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

/// Back-off after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Socks5Server accepts clients and hands each one to its own
/// [`ConnectionHandler`] task
pub struct Socks5Server {
    config: Arc<ServerConfig>,
    span: Span,
    listener: Option<TcpListener>,
}

impl Socks5Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            span: Span::none(),
            listener: None,
        }
    }

    /// with_span sets the parent span of every connection's logs
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// config returns the configuration shared by every handler
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// bind validates the config and binds the listen address
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if self.listener.is_some() {
            bail!("server is already bound");
        }

        self.config.validate().context("invalid server configuration")?;

        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.config.listen_addr))?;
        let addr = listener.local_addr()?;

        info!(parent: &self.span, "SOCKS5 proxy listening on {addr}");

        self.listener = Some(listener);
        Ok(addr)
    }

    /// run accepts connections forever, binding first if needed. Only a
    /// failure to bind ends it.
    pub async fn run(&mut self) -> Result<()> {
        if self.listener.is_none() {
            self.bind().await?;
        }
        let Some(listener) = self.listener.take() else {
            bail!("listener missing after bind");
        };

        loop {
            let (inbound, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(parent: &self.span, "accept failed: {e}");
                    time::sleep(ACCEPT_RETRY_DELAY).await;
                    continue;
                }
            };

            let span = info_span!(parent: &self.span, "client", peer = %peer_addr);
            let config = Arc::clone(&self.config);

            tokio::spawn(handle_connection(inbound, config).instrument(span));
        }
    }
}

/// handle_connection runs one client to completion and logs how it ended
async fn handle_connection(inbound: TcpStream, config: Arc<ServerConfig>) {
    debug!("new client");

    if let Err(e) = inbound.set_nodelay(true) {
        debug!("failed to set TCP_NODELAY: {e}");
    }

    match ConnectionHandler::new(inbound, config).run().await {
        Ok(stats) => info!(
            "connection closed: {} bytes from client, {} bytes from server",
            stats.from_client, stats.from_upstream
        ),
        Err(e @ Socks5Error::Io(_)) => debug!("connection ended: {e}"),
        Err(e) => warn!("connection error: {e}"),
    }
}
