//! A lightweight SOCKS5 proxy server
//!
//! ## SOCKS5 Implementation
//!
//! - Features:
//!     - CONNECT, relayed until either side closes
//!     - BIND / UDP ASSOCIATE answered with "command not supported"
//!     - Command rules to forbid commands outright
//!     - No Authentication
//!     - Username/Password Authentication, server-side method preference
//!     - Pluggable name resolution ([`Resolver`]) and outbound dialing ([`Dialer`])
//!     - Bounded handshake and dial timeouts
//!     - One tokio task per client, logs scoped to a per-client `tracing` span
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//! - [Username/Password Authentication (RFC 1929)](https://datatracker.ietf.org/doc/html/rfc1929)
//!
//! The default [`SystemResolver`] only hands out IPv4 addresses: a name that
//! resolves to IPv6 addresses alone is answered with "host unreachable".
//!
//! # Example
//! ```no_run
//! use socksd::{ServerConfig, Socks5Server, auth::methods_for_credentials};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::new("127.0.0.1:1080")
//!         .with_auth_methods(methods_for_credentials("user", "pass"));
//!
//!     Socks5Server::new(config).run().await
//! }
//! ```

pub mod auth;
pub mod config;
pub mod dialer;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod relay;
pub mod resolver;
pub mod server;

// Re-export main types at crate root for convenience
pub use auth::{Authenticator, StaticCredentials};
pub use config::{CommandRules, ServerConfig};
pub use dialer::{Dialer, DirectDialer};
pub use error::{ProtocolError, ResolveError, Socks5Error};
pub use handler::{ConnectionHandler, State};
pub use protocol::{Address, AuthMethod, Command, Reply, ReplyCode, Request, Version};
pub use relay::{RelaySession, RelayStats};
pub use resolver::{Resolver, SystemResolver};
pub use server::Socks5Server;
