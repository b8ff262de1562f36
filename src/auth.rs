use crate::{
    error::{ProtocolError, Socks5Error},
    protocol::{AuthMethod, USERPASS_VERSION, Version},
};
use std::{collections::HashMap, fmt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Subnegotiation status bytes (RFC 1929)
const AUTH_SUCCESS: u8 = 0x00;
const AUTH_FAILURE: u8 = 0x01;

/// StaticCredentials is a fixed username -> password table
#[derive(Clone, Default)]
pub struct StaticCredentials {
    table: HashMap<String, String>,
}

impl StaticCredentials {
    /// new creates an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// insert adds a user, replacing any previous password
    pub fn insert(&mut self, username: impl Into<String>, password: impl Into<String>) {
        self.table.insert(username.into(), password.into());
    }

    /// valid reports whether the pair matches the table exactly
    pub fn valid(&self, username: &str, password: &str) -> bool {
        self.table
            .get(username)
            .is_some_and(|expected| expected == password)
    }

    /// is_empty reports whether no user is configured
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl<U, P> FromIterator<(U, P)> for StaticCredentials
where
    U: Into<String>,
    P: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (U, P)>>(iter: I) -> Self {
        let mut credentials = Self::new();
        for (username, password) in iter {
            credentials.insert(username, password);
        }
        credentials
    }
}

// Passwords stay out of logs
impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("users", &self.table.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Authenticator is one server-side authentication method
#[derive(Debug, Clone)]
pub enum Authenticator {
    NoAuth,
    UserPassword(StaticCredentials),
}

impl Authenticator {
    /// method is the method byte advertised for this authenticator
    pub fn method(&self) -> AuthMethod {
        match self {
            Authenticator::NoAuth => AuthMethod::NoAuth,
            Authenticator::UserPassword(_) => AuthMethod::UserPass,
        }
    }

    /// authenticate runs the method's subnegotiation once the method
    /// has been selected
    pub async fn authenticate<S>(&self, stream: &mut S) -> Result<(), Socks5Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self {
            Authenticator::NoAuth => Ok(()),
            Authenticator::UserPassword(credentials) => {
                authenticate_userpass(stream, credentials).await
            }
        }
    }
}

/// methods_for_credentials turns the optional command line username and
/// password into the method list: username/password only when both are
/// non-empty, otherwise no authentication
pub fn methods_for_credentials(username: &str, password: &str) -> Vec<Authenticator> {
    if username.is_empty() || password.is_empty() {
        return vec![Authenticator::NoAuth];
    }

    let credentials = StaticCredentials::from_iter([(username, password)]);
    vec![Authenticator::UserPassword(credentials)]
}

/// negotiate_method reads the client greeting, picks a method and tells
/// the client which one was chosen
pub async fn negotiate_method<'a, S>(
    stream: &mut S,
    server_methods: &'a [Authenticator],
) -> Result<&'a Authenticator, Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // ClientHello format
    // +----+----------+----------+
    // |VER | NMETHODS | METHODS  |
    // +----+----------+----------+
    // | 1  |    1     | 1 to 255 |
    // +----+----------+----------+

    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await?;
    let [version, n_methods] = buf;

    // Ensure version is 0x05 -> SOCKS5
    if version != Version::SOCKS5 as u8 {
        return Err(ProtocolError::UnsupportedVersion(version).into());
    }

    let mut client_methods = vec![0u8; n_methods as usize];
    stream.read_exact(&mut client_methods).await?;

    // ServerChoice method selection reply format
    // +----+--------+
    // |VER | METHOD |
    // +----+--------+
    // | 1  |   1    |
    // +----+--------+

    match select_method(server_methods, &client_methods) {
        Some(authenticator) => {
            stream
                .write_all(&[Version::SOCKS5 as u8, authenticator.method() as u8])
                .await?;
            Ok(authenticator)
        }
        None => {
            stream
                .write_all(&[Version::SOCKS5 as u8, AuthMethod::NoAcceptable as u8])
                .await?;
            Err(ProtocolError::NoAcceptableMethods(client_methods).into())
        }
    }
}

/// select_method walks the server's methods in configured order and returns
/// the first one the client offered
pub fn select_method<'a>(
    server_methods: &'a [Authenticator],
    client_methods: &[u8],
) -> Option<&'a Authenticator> {
    server_methods
        .iter()
        .find(|authenticator| client_methods.contains(&(authenticator.method() as u8)))
}

/// authenticate_userpass handles username/password authentication according to RFC 1929
async fn authenticate_userpass<S>(
    stream: &mut S,
    credentials: &StaticCredentials,
) -> Result<(), Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Client Username/Password Request
    // +----+------+----------+------+----------+
    // |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
    // +----+------+----------+------+----------+
    // | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
    // +----+------+----------+------+----------+

    let version = stream.read_u8().await?;
    if version != USERPASS_VERSION {
        return Err(ProtocolError::UnsupportedSubnegotiation(version).into());
    }

    let username_len = stream.read_u8().await?;
    let mut username = vec![0u8; username_len as usize];
    stream.read_exact(&mut username).await?;

    let password_len = stream.read_u8().await?;
    let mut password = vec![0u8; password_len as usize];
    stream.read_exact(&mut password).await?;

    // Non UTF-8 input can never match a configured entry
    let accepted = match (std::str::from_utf8(&username), std::str::from_utf8(&password)) {
        (Ok(username), Ok(password)) => credentials.valid(username, password),
        _ => false,
    };

    // Username/Password Server response
    // +----+--------+
    // |VER | STATUS |
    // +----+--------+
    // | 1  |   1    |
    // +----+--------+

    let status = if accepted { AUTH_SUCCESS } else { AUTH_FAILURE };
    stream.write_all(&[USERPASS_VERSION, status]).await?;

    let username = String::from_utf8_lossy(&username).into_owned();
    if !accepted {
        return Err(Socks5Error::Authentication { username });
    }

    debug!("user {username:?} authenticated");
    Ok(())
}
