//! SOCKS5 codec: the RFC 1928 subset named in the component design —
//! no-auth only, `CONNECT` and `UDP ASSOCIATE`, `ATYP` IPv4/domain only.

use crate::error::{Error, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const VERSION: u8 = 0x05;

const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NO_ACCEPTABLE: u8 = 0xff;

const CMD_CONNECT: u8 = 0x01;
const CMD_UDP_ASSOCIATE: u8 = 0x03;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REP_SUCCESS: u8 = 0x00;
const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REP_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// A parsed `SOCKS5` request target — either a literal address or a
/// hostname to resolve later, per the component design's deferred-DNS note.
#[derive(Debug, Clone)]
pub enum Target {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl Target {
    pub fn host(&self) -> String {
        match self {
            Target::Ip(addr) => addr.ip().to_string(),
            Target::Domain(host, _) => host.clone(),
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Target::Ip(addr) => addr.port(),
            Target::Domain(_, port) => *port,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    UdpAssociate,
}

/// A fully negotiated request: the command plus its target.
#[derive(Debug, Clone)]
pub struct Request {
    pub command: Command,
    pub target: Target,
}

/// Perform the greeting/auth negotiation. Only "no auth" (`0x00`) is ever
/// offered; any client that doesn't list it is rejected with `0xff` and the
/// session ends.
pub async fn negotiate_auth<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S) -> Result<()> {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    let (version, nmethods) = (header[0], header[1]);

    if version != VERSION {
        return Err(Error::protocol(format!("unsupported SOCKS version {version}")));
    }

    let mut methods = vec![0u8; nmethods as usize];
    stream.read_exact(&mut methods).await?;

    if methods.contains(&METHOD_NO_AUTH) {
        stream.write_all(&[VERSION, METHOD_NO_AUTH]).await?;
        Ok(())
    } else {
        stream.write_all(&[VERSION, METHOD_NO_ACCEPTABLE]).await?;
        Err(Error::protocol("client offered no acceptable auth method"))
    }
}

/// Read and parse the request that follows a successful auth negotiation.
pub async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Request> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let (version, cmd, _rsv, atyp) = (header[0], header[1], header[2], header[3]);

    if version != VERSION {
        return Err(Error::protocol(format!("unsupported SOCKS version {version}")));
    }

    let command = match cmd {
        CMD_CONNECT => Command::Connect,
        CMD_UDP_ASSOCIATE => Command::UdpAssociate,
        other => return Err(Error::protocol(format!("unsupported command {other}"))),
    };

    let target = match atyp {
        ATYP_IPV4 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            let port = read_port(stream).await?;
            Target::Ip(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(addr)), port))
        }
        ATYP_DOMAIN => {
            let mut len_buf = [0u8; 1];
            stream.read_exact(&mut len_buf).await?;
            let mut domain = vec![0u8; len_buf[0] as usize];
            stream.read_exact(&mut domain).await?;
            let domain = String::from_utf8(domain)
                .map_err(|_| Error::protocol("domain name is not valid UTF-8"))?;
            let port = read_port(stream).await?;
            Target::Domain(domain, port)
        }
        ATYP_IPV6 => {
            return Err(Error::protocol("IPv6 addresses are not supported"));
        }
        other => return Err(Error::protocol(format!("unsupported address type {other}"))),
    };

    Ok(Request { command, target })
}

async fn read_port<S: AsyncRead + Unpin>(stream: &mut S) -> Result<u16> {
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;
    Ok(u16::from_be_bytes(port))
}

/// Write a reply. Per the component design this echoes the *requested*
/// destination back to the client rather than the proxy's actual bound
/// address — a deliberate simplification carried over from the original
/// implementation, not a bug.
pub async fn write_reply<S: AsyncWrite + Unpin>(
    stream: &mut S,
    rep: u8,
    target: &Target,
) -> Result<()> {
    let mut out = vec![VERSION, rep, 0x00];
    match target {
        Target::Ip(addr) => match addr.ip() {
            IpAddr::V4(v4) => {
                out.push(ATYP_IPV4);
                out.extend_from_slice(&v4.octets());
            }
            IpAddr::V6(_) => {
                return Err(Error::protocol("cannot reply with an IPv6 address"));
            }
        },
        Target::Domain(host, _) => {
            out.push(ATYP_DOMAIN);
            out.push(host.len() as u8);
            out.extend_from_slice(host.as_bytes());
        }
    }
    out.extend_from_slice(&target.port().to_be_bytes());
    stream.write_all(&out).await?;
    Ok(())
}

pub async fn write_success<S: AsyncWrite + Unpin>(stream: &mut S, target: &Target) -> Result<()> {
    write_reply(stream, REP_SUCCESS, target).await
}

pub async fn write_command_not_supported<S: AsyncWrite + Unpin>(
    stream: &mut S,
    target: &Target,
) -> Result<()> {
    write_reply(stream, REP_COMMAND_NOT_SUPPORTED, target).await
}

pub async fn write_address_type_not_supported<S: AsyncWrite + Unpin>(stream: &mut S) -> Result<()> {
    // No usable target to echo; zero-fill per convention for error replies.
    let placeholder = Target::Ip(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0));
    write_reply(stream, REP_ADDRESS_TYPE_NOT_SUPPORTED, &placeholder).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn negotiate_auth_accepts_no_auth_method() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();

        negotiate_auth(&mut server).await.unwrap();

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x00]);
    }

    #[tokio::test]
    async fn negotiate_auth_rejects_when_no_auth_not_offered() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();

        let result = negotiate_auth(&mut server).await;
        assert!(result.is_err());

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0xff]);
    }

    #[tokio::test]
    async fn negotiate_auth_rejects_zero_methods() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&[0x05, 0x00]).await.unwrap();

        let result = negotiate_auth(&mut server).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn read_request_parses_ipv4_connect() {
        let (mut client, mut server) = duplex(64);
        client
            .write_all(&[0x05, 0x01, 0x00, 0x01, 93, 184, 216, 34, 0x00, 0x50])
            .await
            .unwrap();

        let req = read_request(&mut server).await.unwrap();
        assert_eq!(req.command, Command::Connect);
        match req.target {
            Target::Ip(addr) => {
                assert_eq!(addr.to_string(), "93.184.216.34:80");
            }
            _ => panic!("expected IP target"),
        }
    }

    #[tokio::test]
    async fn read_request_parses_domain_udp_associate() {
        let (mut client, mut server) = duplex(64);
        let mut packet = vec![0x05, 0x03, 0x00, 0x03, 11];
        packet.extend_from_slice(b"example.com");
        packet.extend_from_slice(&0x01bbu16.to_be_bytes());
        client.write_all(&packet).await.unwrap();

        let req = read_request(&mut server).await.unwrap();
        assert_eq!(req.command, Command::UdpAssociate);
        assert_eq!(req.target.host(), "example.com");
        assert_eq!(req.target.port(), 443);
    }

    #[tokio::test]
    async fn read_request_rejects_ipv6() {
        let (mut client, mut server) = duplex(64);
        let mut packet = vec![0x05, 0x01, 0x00, 0x04];
        packet.extend_from_slice(&[0u8; 16]);
        packet.extend_from_slice(&[0, 0]);
        client.write_all(&packet).await.unwrap();

        let result = read_request(&mut server).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn write_success_echoes_requested_target_not_bound_address() {
        let (mut client, mut server) = duplex(64);
        let target = Target::Domain("example.com".to_string(), 443);

        write_success(&mut server, &target).await.unwrap();

        let mut expected = vec![0x05, 0x00, 0x00, 0x03, 11];
        expected.extend_from_slice(b"example.com");
        expected.extend_from_slice(&443u16.to_be_bytes());

        let mut buf = vec![0u8; expected.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, expected);
    }
}
