use std::io::{BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::time::Duration;

#[cfg(feature = "sync-tls")]
use native_tls::TlsStream;

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::opts::TransportTarget;
use crate::protocol::codec::{HEADER_LEN, parse_frame_header};

pub enum Stream {
    Tcp(BufReader<TcpStream>),
    #[cfg(feature = "sync-tls")]
    Tls(BufReader<TlsStream<TcpStream>>),
    Unix(BufReader<UnixStream>),
}

impl Stream {
    pub fn tcp(stream: TcpStream) -> Self {
        Self::Tcp(BufReader::new(stream))
    }

    pub fn unix(stream: UnixStream) -> Self {
        Self::Unix(BufReader::new(stream))
    }

    /// Open a transport to `target`. `timeout` bounds the connect and every
    /// later read and write.
    pub fn connect(target: &TransportTarget, timeout: Option<Duration>) -> Result<Self> {
        let stream = match target {
            TransportTarget::UnixSocket(path) => {
                let unix = UnixStream::connect(path)?;
                unix.set_read_timeout(timeout)?;
                unix.set_write_timeout(timeout)?;
                return Ok(Self::unix(unix));
            }
            TransportTarget::Ipv4(addr, port) => connect_tcp(&SocketAddr::from((*addr, *port)), timeout)?,
            TransportTarget::Ipv6(addr, port) => connect_tcp(&SocketAddr::from((*addr, *port)), timeout)?,
            TransportTarget::Hostname(host, port) => {
                let mut last_error = None;
                let mut connected = None;
                for addr in (host.as_str(), *port).to_socket_addrs()? {
                    match connect_tcp(&addr, timeout) {
                        Ok(tcp) => {
                            connected = Some(tcp);
                            break;
                        }
                        Err(e) => last_error = Some(e),
                    }
                }
                match (connected, last_error) {
                    (Some(tcp), _) => tcp,
                    (None, Some(e)) => return Err(e),
                    (None, None) => {
                        return Err(Error::Config(format!("{host} resolved to no addresses")));
                    }
                }
            }
        };
        stream.set_nodelay(true)?;
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;
        Ok(Self::tcp(stream))
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.read_exact(buf),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(r) => r.read_exact(buf),
            Stream::Unix(r) => r.read_exact(buf),
        }
    }

    pub fn read_u8(&mut self) -> std::io::Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    /// Read one tagged frame into `buffer_set`.
    pub fn read_message(&mut self, buffer_set: &mut BufferSet) -> Result<()> {
        let mut header = [0u8; HEADER_LEN];
        self.read_exact(&mut header)?;
        let (type_byte, len) = parse_frame_header(&header)?;
        tracing::trace!(tag = %(type_byte as char), len, "frame received");
        buffer_set.type_byte = type_byte;
        buffer_set.read_buffer.clear();
        buffer_set.read_buffer.resize(len, 0);
        self.read_exact(&mut buffer_set.read_buffer)?;
        Ok(())
    }

    pub fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().write_all(buf),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(r) => r.get_mut().write_all(buf),
            Stream::Unix(r) => r.get_mut().write_all(buf),
        }
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().flush(),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(r) => r.get_mut().flush(),
            Stream::Unix(r) => r.get_mut().flush(),
        }
    }

    pub fn is_tcp_loopback(&self) -> bool {
        match self {
            Self::Tcp(r) => r
                .get_ref()
                .peer_addr()
                .map(|addr| addr.ip().is_loopback())
                .unwrap_or(false),
            #[cfg(feature = "sync-tls")]
            Self::Tls(r) => r
                .get_ref()
                .get_ref()
                .peer_addr()
                .map(|addr| addr.ip().is_loopback())
                .unwrap_or(false),
            Self::Unix(_) => false,
        }
    }

    /// Run the TLS handshake over a plain TCP stream.
    ///
    /// Certificates are not verified, matching libpq's `sslmode=require`.
    #[cfg(feature = "sync-tls")]
    pub fn upgrade_to_tls(self, host: &str) -> Result<Self> {
        let tcp = match self {
            Stream::Tcp(r) if !r.buffer().is_empty() => {
                return Err(Error::ProtocolSync("unencrypted data after SSL response".into()));
            }
            Stream::Tcp(r) => r.into_inner(),
            Stream::Tls(_) => return Err(Error::ProtocolSync("stream already uses TLS".into())),
            Stream::Unix(_) => return Err(Error::ProtocolSync("TLS over a Unix socket".into())),
        };
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?;
        let tls = connector.connect(host, tcp).map_err(|e| match e {
            native_tls::HandshakeError::Failure(e) => Error::Tls(e),
            native_tls::HandshakeError::WouldBlock(_) => Error::Io(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "TLS handshake would block",
            )),
        })?;
        Ok(Stream::Tls(BufReader::new(tls)))
    }
}

fn connect_tcp(addr: &SocketAddr, timeout: Option<Duration>) -> Result<TcpStream> {
    Ok(match timeout {
        Some(timeout) => TcpStream::connect_timeout(addr, timeout)?,
        None => TcpStream::connect(addr)?,
    })
}
