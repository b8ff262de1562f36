use crate::error::{ProtocolError, Socks5Error};
use std::{
    fmt, io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4},
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// RSV: Fields marked RESERVED (RSV) must be set to X'00'.
pub const RSV: u8 = 0x00;

/// Username/password subnegotiation version (RFC 1929)
pub const USERPASS_VERSION: u8 = 0x01;

/// AddressType represents the SOCKS5 address types:
/// IPv4, Domain Name, IPv6
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    IPv4 = 0x01,
    DomainName = 0x03,
    IPv6 = 0x04,
}

impl AddressType {
    /// from_byte converts a byte to its related network address type
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(AddressType::IPv4),
            0x03 => Some(AddressType::DomainName),
            0x04 => Some(AddressType::IPv6),
            _ => None,
        }
    }
}

/// Version represents available SOCKS proxy versions. Only SOCKS5 is served.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    SOCKS5 = 0x05,
}

/// AuthMethod represents available SOCKS5
/// authentication methods
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    NoAuth = 0x00,
    // Gssapi = 0x01, not implemented
    UserPass = 0x02,
    // 0x03 - 0x7f: IANA reserved
    // 0x80 - 0xFE: private methods
    NoAcceptable = 0xFF,
}

/// Command represents SOCKS5 protocol commands
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect = 0x01,
    Bind = 0x02,
    UdpAssociate = 0x03,
}

impl Command {
    /// from_byte converts a byte to its related SOCKS5 protocol command
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Command::Connect),
            0x02 => Some(Command::Bind),
            0x03 => Some(Command::UdpAssociate),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Connect => f.write_str("CONNECT"),
            Command::Bind => f.write_str("BIND"),
            Command::UdpAssociate => f.write_str("UDP ASSOCIATE"),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    Succeeded = 0x00,
    ServerFailure = 0x01,
    ConnectionNotAllowed = 0x02,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TtlExpired = 0x06,
    CommandNotSupported = 0x07,
    AddrTypeUnsupported = 0x08,
    // 0x09 - 0xFF: unassigned
}

impl ReplyCode {
    /// from_byte converts a byte to its related reply code
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(ReplyCode::Succeeded),
            0x01 => Some(ReplyCode::ServerFailure),
            0x02 => Some(ReplyCode::ConnectionNotAllowed),
            0x03 => Some(ReplyCode::NetworkUnreachable),
            0x04 => Some(ReplyCode::HostUnreachable),
            0x05 => Some(ReplyCode::ConnectionRefused),
            0x06 => Some(ReplyCode::TtlExpired),
            0x07 => Some(ReplyCode::CommandNotSupported),
            0x08 => Some(ReplyCode::AddrTypeUnsupported),
            _ => None,
        }
    }
}

/// Outbound connect failures are reported by cause. Anything that is not
/// clearly a refusal or a routing problem is reported as host unreachable.
impl From<io::ErrorKind> for ReplyCode {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::ConnectionRefused => ReplyCode::ConnectionRefused,
            io::ErrorKind::NetworkUnreachable => ReplyCode::NetworkUnreachable,
            io::ErrorKind::PermissionDenied => ReplyCode::ConnectionNotAllowed,
            _ => ReplyCode::HostUnreachable,
        }
    }
}

/// Address represents a network address or domain to be used as a
/// SOCKS5 target or bound address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl Address {
    /// unspecified is the `0.0.0.0:0` address sent along with failure replies
    pub fn unspecified() -> Self {
        Address::Ip(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)))
    }

    /// address_type is the ATYP byte this address is encoded with
    pub fn address_type(&self) -> AddressType {
        match self {
            Address::Ip(SocketAddr::V4(_)) => AddressType::IPv4,
            Address::Ip(SocketAddr::V6(_)) => AddressType::IPv6,
            Address::Domain(..) => AddressType::DomainName,
        }
    }

    /// port returns the destination port of either form
    pub fn port(&self) -> u16 {
        match self {
            Address::Ip(addr) => addr.port(),
            Address::Domain(_, port) => *port,
        }
    }

    /// read_from parses ATYP, DST.ADDR and DST.PORT from the stream
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, Socks5Error>
    where
        R: AsyncRead + Unpin,
    {
        let atyp = reader.read_u8().await?;

        let address = match AddressType::from_byte(atyp) {
            Some(AddressType::IPv4) => {
                let mut octets = [0u8; 4];
                reader.read_exact(&mut octets).await?;
                let port = reader.read_u16().await?;
                Address::Ip(SocketAddr::from((Ipv4Addr::from(octets), port)))
            }
            Some(AddressType::IPv6) => {
                let mut octets = [0u8; 16];
                reader.read_exact(&mut octets).await?;
                let port = reader.read_u16().await?;
                Address::Ip(SocketAddr::from((Ipv6Addr::from(octets), port)))
            }
            Some(AddressType::DomainName) => {
                // First octet in DomainName contains the number of
                // octets to follow
                let len = reader.read_u8().await? as usize;
                if len == 0 {
                    return Err(ProtocolError::InvalidDomain("empty domain name").into());
                }

                let mut domain = vec![0u8; len];
                reader.read_exact(&mut domain).await?;
                let domain = String::from_utf8(domain)
                    .map_err(|_| ProtocolError::InvalidDomain("domain name is not UTF-8"))?;

                let port = reader.read_u16().await?;
                Address::Domain(domain, port)
            }
            None => return Err(ProtocolError::UnsupportedAddressType(atyp).into()),
        };

        Ok(address)
    }

    /// write_to appends ATYP, ADDR and PORT to the buffer
    pub fn write_to(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        buf.push(self.address_type() as u8);

        match self {
            Address::Ip(SocketAddr::V4(addr)) => buf.extend_from_slice(&addr.ip().octets()),
            Address::Ip(SocketAddr::V6(addr)) => buf.extend_from_slice(&addr.ip().octets()),
            Address::Domain(domain, _) => {
                let len = u8::try_from(domain.len())
                    .ok()
                    .filter(|len| *len > 0)
                    .ok_or(ProtocolError::InvalidDomain("domain name must be 1 to 255 bytes"))?;
                buf.push(len);
                buf.extend_from_slice(domain.as_bytes());
            }
        }

        buf.extend_from_slice(&self.port().to_be_bytes());
        Ok(())
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::Ip(addr)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ip(addr) => write!(f, "{addr}"),
            Address::Domain(domain, port) => write!(f, "{domain}:{port}"),
        }
    }
}

/// Request is a parsed client request
// +----+-----+-------+------+----------+----------+
// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
// +----+-----+-------+------+----------+----------+
// | 1  |  1  | X'00' |  1   | Variable |    2     |
// +----+-----+-------+------+----------+----------+
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub address: Address,
}

impl Request {
    /// read_from reads a full request off the stream. The version is checked
    /// before anything else; the command before the address is read.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, Socks5Error>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; 3];
        reader.read_exact(&mut header).await?;

        // RSV is ignored
        let [version, command, _] = header;

        if version != Version::SOCKS5 as u8 {
            return Err(ProtocolError::UnsupportedVersion(version).into());
        }

        let command = Command::from_byte(command).ok_or(ProtocolError::UnknownCommand(command))?;
        let address = Address::read_from(reader).await?;

        Ok(Request { command, address })
    }

    /// address_type returns the ATYP of the requested destination
    pub fn address_type(&self) -> AddressType {
        self.address.address_type()
    }
}

/// Reply is the server's answer to a request
// +----+-----+-------+------+----------+----------+
// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
// +----+-----+-------+------+----------+----------+
// | 1  |  1  | X'00' |  1   | Variable |    2     |
// +----+-----+-------+------+----------+----------+
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: ReplyCode,
    pub bound: Address,
}

impl Reply {
    /// new builds a reply carrying the given bound address
    pub fn new(status: ReplyCode, bound: impl Into<Address>) -> Self {
        Self {
            status,
            bound: bound.into(),
        }
    }

    /// failure builds an error reply bound to `0.0.0.0:0`
    pub fn failure(status: ReplyCode) -> Self {
        Self::new(status, Address::unspecified())
    }

    /// encode serializes the reply into its wire form
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut reply = vec![Version::SOCKS5 as u8, self.status as u8, RSV];
        self.bound.write_to(&mut reply)?;
        Ok(reply)
    }

    /// write_to sends the encoded reply and flushes the writer
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<(), Socks5Error>
    where
        W: AsyncWrite + Unpin,
    {
        let reply = self.encode()?;
        writer.write_all(&reply).await?;
        writer.flush().await?;
        Ok(())
    }

    /// read_from parses a reply, as a SOCKS5 client would
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, Socks5Error>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; 3];
        reader.read_exact(&mut header).await?;
        let [version, status, _] = header;

        if version != Version::SOCKS5 as u8 {
            return Err(ProtocolError::UnsupportedVersion(version).into());
        }

        let status = ReplyCode::from_byte(status).ok_or(ProtocolError::UnknownReplyCode(status))?;
        let bound = Address::read_from(reader).await?;

        Ok(Reply { status, bound })
    }
}
