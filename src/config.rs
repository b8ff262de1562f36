use crate::{
    auth::Authenticator,
    dialer::{Dialer, DirectDialer},
    error::Socks5Error,
    protocol::Command,
    resolver::{Resolver, SystemResolver},
};
use anyhow::{Result, bail};
use std::{fmt, sync::Arc, time::Duration};

pub const DEFAULT_PORT: u16 = 1080;
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// CommandRules decides which request commands a client may issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRules {
    pub connect: bool,
    pub bind: bool,
    pub udp_associate: bool,
}

impl CommandRules {
    pub fn permit_all() -> Self {
        Self {
            connect: true,
            bind: true,
            udp_associate: true,
        }
    }

    pub fn connect_only() -> Self {
        Self {
            connect: true,
            bind: false,
            udp_associate: false,
        }
    }

    pub fn permits(&self, command: Command) -> bool {
        match command {
            Command::Connect => self.connect,
            Command::Bind => self.bind,
            Command::UdpAssociate => self.udp_associate,
        }
    }

    pub fn check(&self, command: Command) -> Result<(), Socks5Error> {
        if self.permits(command) {
            Ok(())
        } else {
            Err(Socks5Error::NotAllowed(command))
        }
    }
}

impl Default for CommandRules {
    fn default() -> Self {
        Self::permit_all()
    }
}

/// ServerConfig is shared read-only by every connection handler
#[derive(Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub auth_methods: Vec<Authenticator>,
    pub resolver: Arc<dyn Resolver>,
    pub dialer: Arc<dyn Dialer>,
    pub dial_timeout: Duration,
    pub handshake_timeout: Duration,
    pub rules: CommandRules,
}

impl ServerConfig {
    /// new builds a config with no authentication, the system resolver and
    /// direct dialing
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            auth_methods: vec![Authenticator::NoAuth],
            resolver: Arc::new(SystemResolver),
            dialer: Arc::new(DirectDialer),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            rules: CommandRules::default(),
        }
    }

    /// with_auth_methods replaces the accepted methods; order is preference
    pub fn with_auth_methods(mut self, methods: Vec<Authenticator>) -> Self {
        self.auth_methods = methods;
        self
    }

    pub fn with_resolver(mut self, resolver: impl Resolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn with_dialer(mut self, dialer: impl Dialer + 'static) -> Self {
        self.dialer = Arc::new(dialer);
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_rules(mut self, rules: CommandRules) -> Self {
        self.rules = rules;
        self
    }

    /// validate rejects configurations no client could ever use
    pub fn validate(&self) -> Result<()> {
        if self.auth_methods.is_empty() {
            bail!("at least one authentication method must be configured");
        }

        let empty_table = self.auth_methods.iter().any(|method| {
            matches!(method, Authenticator::UserPassword(credentials) if credentials.is_empty())
        });
        if empty_table {
            bail!("username/password authentication needs at least one user");
        }

        if self.dial_timeout.is_zero() {
            bail!("dial timeout must be greater than zero");
        }

        if self.handshake_timeout.is_zero() {
            bail!("handshake timeout must be greater than zero");
        }

        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(format!("0.0.0.0:{DEFAULT_PORT}"))
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen_addr", &self.listen_addr)
            .field("auth_methods", &self.auth_methods)
            .field("dial_timeout", &self.dial_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}
