use crate::{
    handler::State,
    protocol::{Command, ReplyCode},
};
use std::{io, net::SocketAddr};
use thiserror::Error;

/// ProtocolError covers malformed or unsupported wire data
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unsupported SOCKS version {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("no acceptable authentication method offered: {0:?}")]
    NoAcceptableMethods(Vec<u8>),

    #[error("unsupported username/password subnegotiation version {0:#04x}")]
    UnsupportedSubnegotiation(u8),

    #[error("unknown command {0:#04x}")]
    UnknownCommand(u8),

    #[error("unsupported address type {0:#04x}")]
    UnsupportedAddressType(u8),

    #[error("invalid domain name: {0}")]
    InvalidDomain(&'static str),

    #[error("unknown reply code {0:#04x}")]
    UnknownReplyCode(u8),
}

/// ResolveError is returned by a [`Resolver`](crate::resolver::Resolver)
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to resolve {name}: {source}")]
    Lookup {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("no IPv4 address found for {0}")]
    NoIpv4Found(String),
}

/// Socks5Error is everything that can end a single client connection
#[derive(Debug, Error)]
pub enum Socks5Error {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("authentication failed for user {username:?}")]
    Authentication { username: String },

    #[error("{0} rejected by command rules")]
    NotAllowed(Command),

    #[error("{0} is not supported")]
    CommandNotSupported(Command),

    #[error(transparent)]
    Resolution(#[from] ResolveError),

    #[error("failed to connect to {addr}: {source}")]
    Dial {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("timed out while {0}")]
    Timeout(State),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl Socks5Error {
    /// reply_code returns the status to send the client for errors that
    /// happen once a request is being processed. Errors with no reply
    /// just close the connection.
    pub fn reply_code(&self) -> Option<ReplyCode> {
        match self {
            Socks5Error::Protocol(ProtocolError::UnknownCommand(_)) => {
                Some(ReplyCode::CommandNotSupported)
            }
            Socks5Error::Protocol(ProtocolError::UnsupportedAddressType(_)) => {
                Some(ReplyCode::AddrTypeUnsupported)
            }
            Socks5Error::Protocol(_) => None,
            Socks5Error::Authentication { .. } => None,
            Socks5Error::NotAllowed(_) => Some(ReplyCode::ConnectionNotAllowed),
            Socks5Error::CommandNotSupported(_) => Some(ReplyCode::CommandNotSupported),
            Socks5Error::Resolution(_) => Some(ReplyCode::HostUnreachable),
            Socks5Error::Dial { source, .. } => Some(source.kind().into()),
            Socks5Error::Timeout(State::Resolving | State::Dialing) => {
                Some(ReplyCode::HostUnreachable)
            }
            Socks5Error::Timeout(_) => None,
            Socks5Error::Io(_) => None,
        }
    }
}
