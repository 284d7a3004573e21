//! RFC 1928/1929 wire format, client side and upstream side (spec §4.2).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, Socks5Error};

pub const VERSION: u8 = 0x05;

pub const METHOD_NO_AUTH: u8 = 0x00;
pub const METHOD_USER_PASS: u8 = 0x02;
pub const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

pub const CMD_CONNECT: u8 = 0x01;

pub const ATYP_V4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_V6: u8 = 0x04;

pub const REP_SUCCESS: u8 = 0x00;
pub const REP_GENERAL_FAILURE: u8 = 0x01;

/// A CONNECT target as read off the wire, kept in its original ATYP form so
/// it can be re-encoded unchanged for the upstream request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    V4([u8; 4], u16),
    Domain(String, u16),
    V6([u8; 16], u16),
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::V4(o, port) => write!(f, "{}.{}.{}.{}:{port}", o[0], o[1], o[2], o[3]),
            Address::Domain(d, port) => write!(f, "{d}:{port}"),
            Address::V6(_, port) => write!(f, "[ipv6]:{port}"),
        }
    }
}

/// Reads and validates the client's opening method-selection message,
/// requiring method 0x00 among those offered. On mismatch, writes the
/// `0x05 0xFF` rejection before returning the error.
pub async fn accept_client_handshake<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ver = stream.read_u8().await?;
    if ver != VERSION {
        return Err(Socks5Error::Protocol(format!("bad client version {ver}")));
    }
    let nmethods = stream.read_u8().await?;
    let mut methods = vec![0u8; nmethods as usize];
    stream.read_exact(&mut methods).await?;

    if !methods.contains(&METHOD_NO_AUTH) {
        stream.write_all(&[VERSION, METHOD_NO_ACCEPTABLE]).await?;
        stream.flush().await?;
        return Err(Socks5Error::Protocol(
            "client did not offer no-auth".into(),
        ));
    }

    stream.write_all(&[VERSION, METHOD_NO_AUTH]).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads the client's request line, requiring CMD=CONNECT, and returns the
/// target address in its original ATYP.
pub async fn read_client_request<S>(stream: &mut S) -> Result<Address>
where
    S: AsyncRead + Unpin,
{
    let ver = stream.read_u8().await?;
    if ver != VERSION {
        return Err(Socks5Error::Protocol(format!("bad request version {ver}")));
    }
    let cmd = stream.read_u8().await?;
    if cmd != CMD_CONNECT {
        return Err(Socks5Error::Protocol(format!(
            "unsupported command 0x{cmd:02x}, only CONNECT is accepted"
        )));
    }
    let _rsv = stream.read_u8().await?;
    read_address(stream).await
}

async fn read_address<S>(stream: &mut S) -> Result<Address>
where
    S: AsyncRead + Unpin,
{
    let atyp = stream.read_u8().await?;
    match atyp {
        ATYP_V4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            let port = stream.read_u16().await?;
            Ok(Address::V4(octets, port))
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await?;
            let mut buf = vec![0u8; len as usize];
            stream.read_exact(&mut buf).await?;
            let domain = String::from_utf8(buf)
                .map_err(|e| Socks5Error::Protocol(format!("non-utf8 domain: {e}")))?;
            let port = stream.read_u16().await?;
            Ok(Address::Domain(domain, port))
        }
        ATYP_V6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            let port = stream.read_u16().await?;
            Ok(Address::V6(octets, port))
        }
        other => Err(Socks5Error::Protocol(format!(
            "unsupported ATYP 0x{other:02x}"
        ))),
    }
}

/// Writes the fixed `0.0.0.0:0` success reply to the client (spec §4.2:
/// "clients never need it").
pub async fn write_client_success_reply<S>(stream: &mut S) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    write_reply(stream, REP_SUCCESS).await
}

pub async fn write_client_failure_reply<S>(stream: &mut S, rep: u8) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    write_reply(stream, rep).await
}

async fn write_reply<S>(stream: &mut S, rep: u8) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut msg = vec![VERSION, rep, 0x00, ATYP_V4];
    msg.extend_from_slice(&[0, 0, 0, 0]);
    msg.extend_from_slice(&0u16.to_be_bytes());
    stream.write_all(&msg).await?;
    stream.flush().await?;
    Ok(())
}

/// Upstream handshake (spec §4.2): advertise no-auth and user/pass, honor
/// whichever the upstream selects.
pub async fn upstream_handshake<S>(
    stream: &mut S,
    credentials: Option<(&str, &str)>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(&[VERSION, 0x02, METHOD_NO_AUTH, METHOD_USER_PASS])
        .await?;
    stream.flush().await?;

    let ver = stream.read_u8().await?;
    if ver != VERSION {
        return Err(Socks5Error::Protocol(format!(
            "bad upstream handshake version {ver}"
        )));
    }
    let method = stream.read_u8().await?;
    match method {
        METHOD_NO_AUTH => Ok(()),
        METHOD_USER_PASS => {
            let (user, pass) = credentials.ok_or_else(|| {
                Socks5Error::Protocol(
                    "upstream requires username/password but none configured".into(),
                )
            })?;
            user_pass_auth(stream, user, pass).await
        }
        _ => Err(Socks5Error::UpstreamAuthUnsupported),
    }
}

async fn user_pass_auth<S>(stream: &mut S, user: &str, pass: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut msg = vec![0x01u8, user.len() as u8];
    msg.extend_from_slice(user.as_bytes());
    msg.push(pass.len() as u8);
    msg.extend_from_slice(pass.as_bytes());
    stream.write_all(&msg).await?;
    stream.flush().await?;

    let _ver = stream.read_u8().await?;
    let status = stream.read_u8().await?;
    if status != 0x00 {
        return Err(Socks5Error::UpstreamAuthFailed);
    }
    Ok(())
}

/// Sends the CONNECT request to the upstream for `target`, then consumes
/// the reply including the bound-address tail (whose length depends on
/// ATYP and is otherwise discarded).
pub async fn upstream_connect<S>(stream: &mut S, target: &Address) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut msg = vec![VERSION, CMD_CONNECT, 0x00];
    encode_address(&mut msg, target);
    stream.write_all(&msg).await?;
    stream.flush().await?;

    let ver = stream.read_u8().await?;
    if ver != VERSION {
        return Err(Socks5Error::Protocol(format!(
            "bad upstream connect-reply version {ver}"
        )));
    }
    let rep = stream.read_u8().await?;
    let _rsv = stream.read_u8().await?;
    let _bound = read_address(stream).await?;
    if rep != REP_SUCCESS {
        return Err(Socks5Error::UpstreamRefused(rep));
    }
    Ok(())
}

fn encode_address(buf: &mut Vec<u8>, addr: &Address) {
    match addr {
        Address::V4(octets, port) => {
            buf.push(ATYP_V4);
            buf.extend_from_slice(octets);
            buf.extend_from_slice(&port.to_be_bytes());
        }
        Address::Domain(domain, port) => {
            buf.push(ATYP_DOMAIN);
            buf.push(domain.len() as u8);
            buf.extend_from_slice(domain.as_bytes());
            buf.extend_from_slice(&port.to_be_bytes());
        }
        Address::V6(octets, port) => {
            buf.push(ATYP_V6);
            buf.extend_from_slice(octets);
            buf.extend_from_slice(&port.to_be_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn client_handshake_accepts_no_auth() {
        let (mut a, mut b) = duplex(64);
        let writer = tokio::spawn(async move {
            b.write_all(&[VERSION, 1, METHOD_NO_AUTH]).await.unwrap();
            let mut reply = [0u8; 2];
            b.read_exact(&mut reply).await.unwrap();
            reply
        });
        accept_client_handshake(&mut a).await.unwrap();
        let reply = writer.await.unwrap();
        assert_eq!(reply, [VERSION, METHOD_NO_AUTH]);
    }

    #[tokio::test]
    async fn client_handshake_rejects_when_no_auth_missing() {
        let (mut a, mut b) = duplex(64);
        let writer = tokio::spawn(async move {
            b.write_all(&[VERSION, 1, METHOD_USER_PASS]).await.unwrap();
            let mut reply = [0u8; 2];
            b.read_exact(&mut reply).await.unwrap();
            reply
        });
        let err = accept_client_handshake(&mut a).await.unwrap_err();
        assert!(matches!(err, Socks5Error::Protocol(_)));
        let reply = writer.await.unwrap();
        assert_eq!(reply, [VERSION, METHOD_NO_ACCEPTABLE]);
    }

    #[tokio::test]
    async fn request_round_trips_domain_address() {
        let (mut a, mut b) = duplex(256);
        let writer = tokio::spawn(async move {
            let mut msg = vec![VERSION, CMD_CONNECT, 0x00, ATYP_DOMAIN];
            msg.push(7);
            msg.extend_from_slice(b"example");
            msg.extend_from_slice(&443u16.to_be_bytes());
            b.write_all(&msg).await.unwrap();
        });
        let addr = read_client_request(&mut a).await.unwrap();
        writer.await.unwrap();
        assert_eq!(addr, Address::Domain("example".into(), 443));
    }

    #[tokio::test]
    async fn request_rejects_non_connect_command() {
        let (mut a, mut b) = duplex(64);
        let writer = tokio::spawn(async move {
            b.write_all(&[VERSION, 0x02, 0x00, ATYP_V4, 1, 2, 3, 4, 0, 80])
                .await
                .unwrap();
        });
        let err = read_client_request(&mut a).await.unwrap_err();
        writer.await.unwrap();
        assert!(matches!(err, Socks5Error::Protocol(_)));
    }
}
