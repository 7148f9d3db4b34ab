//! Transport façade: TCP listeners, outbound connects, and line-oriented
//! receive with timeout. Sessions and the transfer worker do their bulk
//! I/O straight on the sockets handed out here.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

#[derive(Debug, Error)]
pub enum NetError {
    #[error("receive timed out")]
    Timeout,
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("line exceeds maximum length")]
    Overflow,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Address family selected with the `-a` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddrFamily {
    Ipv4,
    Ipv6,
    #[default]
    Unspec,
}

impl AddrFamily {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "ipv4" => Some(AddrFamily::Ipv4),
            "ipv6" => Some(AddrFamily::Ipv6),
            "unspec" => Some(AddrFamily::Unspec),
            _ => None,
        }
    }
}

fn socket_for(family: AddrFamily, port: u16) -> io::Result<(TcpSocket, SocketAddr)> {
    match family {
        AddrFamily::Ipv6 => Ok((
            TcpSocket::new_v6()?,
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
        )),
        AddrFamily::Ipv4 | AddrFamily::Unspec => Ok((
            TcpSocket::new_v4()?,
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
        )),
    }
}

/// Binds a listener on the wildcard address of the chosen family with
/// SO_REUSEADDR set.
pub fn listen(family: AddrFamily, port: u16, backlog: u32) -> io::Result<TcpListener> {
    let (socket, addr) = socket_for(family, port)?;
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

/// Binds a listener on the first free port in `range`. Returns the
/// listener together with the port actually bound.
pub fn listen_range(
    family: AddrFamily,
    range: std::ops::RangeInclusive<u16>,
    backlog: u32,
) -> io::Result<(TcpListener, u16)> {
    for port in range {
        match listen(family, port, backlog) {
            Ok(listener) => return Ok((listener, port)),
            Err(err) if err.kind() == io::ErrorKind::AddrInUse => continue,
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => continue,
            Err(err) => return Err(err),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AddrInUse,
        "no free port in range",
    ))
}

/// Connects to `host:port`, trying every resolved address in order.
pub async fn connect(host: &str, port: u16) -> io::Result<TcpStream> {
    TcpStream::connect((host, port)).await
}

/// Reads one line, CRLF included, from a buffered reader.
///
/// Fails with `Timeout` when nothing arrives in time, `PeerClosed` on EOF
/// (even mid-line), and `Overflow` once the line exceeds `max_len`.
pub async fn recv_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_len: usize,
    timeout: Duration,
) -> Result<String, NetError> {
    let read_line = async {
        let mut line: Vec<u8> = Vec::new();
        loop {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Err(NetError::PeerClosed);
            }

            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    line.extend_from_slice(&available[..=pos]);
                    reader.consume(pos + 1);
                    if line.len() > max_len {
                        return Err(NetError::Overflow);
                    }
                    return Ok(String::from_utf8_lossy(&line).into_owned());
                }
                None => {
                    let len = available.len();
                    line.extend_from_slice(available);
                    reader.consume(len);
                    if line.len() > max_len {
                        return Err(NetError::Overflow);
                    }
                }
            }
        }
    };

    match tokio::time::timeout(timeout, read_line).await {
        Ok(result) => result,
        Err(_) => Err(NetError::Timeout),
    }
}

/// Writes the whole buffer and flushes.
pub async fn send_all<W: AsyncWrite + Unpin>(writer: &mut W, buf: &[u8]) -> io::Result<()> {
    writer.write_all(buf).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn recv_line_preserves_crlf() {
        let (mut tx, rx) = tokio::io::duplex(256);
        tx.write_all(b"USER anonymous\r\nPASV\r\n").await.unwrap();

        let mut reader = BufReader::new(rx);
        let line = recv_line(&mut reader, 1024, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(line, "USER anonymous\r\n");

        let line = recv_line(&mut reader, 1024, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(line, "PASV\r\n");
    }

    #[tokio::test]
    async fn recv_line_times_out() {
        let (_tx, rx) = tokio::io::duplex(256);
        let mut reader = BufReader::new(rx);
        let result = recv_line(&mut reader, 1024, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(NetError::Timeout)));
    }

    #[tokio::test]
    async fn recv_line_reports_peer_close() {
        let (tx, rx) = tokio::io::duplex(256);
        drop(tx);
        let mut reader = BufReader::new(rx);
        let result = recv_line(&mut reader, 1024, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(NetError::PeerClosed)));
    }

    #[tokio::test]
    async fn recv_line_rejects_overlong_lines() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        tx.write_all(&[b'A'; 64]).await.unwrap();
        tx.write_all(b"\r\n").await.unwrap();

        let mut reader = BufReader::new(rx);
        let result = recv_line(&mut reader, 32, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(NetError::Overflow)));
    }

    #[tokio::test]
    async fn listen_range_skips_taken_ports() {
        let (first, port) = listen_range(AddrFamily::Ipv4, 40000..=40100, 8).unwrap();
        let (_second, next_port) = listen_range(AddrFamily::Ipv4, port..=40100, 8).unwrap();
        assert!(next_port > port);
        drop(first);
    }
}
