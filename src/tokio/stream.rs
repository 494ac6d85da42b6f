//! Async stream abstraction for tokio.

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::UnixStream;

#[cfg(feature = "tokio-tls")]
use tokio_native_tls::TlsStream;

use crate::buffer_set::BufferSet;
use crate::error::Result;
use crate::opts::TransportTarget;
use crate::protocol::codec::{HEADER_LEN, parse_frame_header};

pub enum Stream {
    Tcp(BufReader<TcpStream>),
    #[cfg(feature = "tokio-tls")]
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

    pub async fn connect(target: &TransportTarget) -> Result<Self> {
        let tcp = match target {
            TransportTarget::UnixSocket(path) => return Ok(Self::unix(UnixStream::connect(path).await?)),
            TransportTarget::Ipv4(addr, port) => TcpStream::connect((*addr, *port)).await?,
            TransportTarget::Ipv6(addr, port) => TcpStream::connect((*addr, *port)).await?,
            TransportTarget::Hostname(host, port) => TcpStream::connect((host.as_str(), *port)).await?,
        };
        tcp.set_nodelay(true)?;
        Ok(Self::tcp(tcp))
    }

    pub async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.read_exact(buf).await.map(|_| ()),
            #[cfg(feature = "tokio-tls")]
            Stream::Tls(r) => r.read_exact(buf).await.map(|_| ()),
            Stream::Unix(r) => r.read_exact(buf).await.map(|_| ()),
        }
    }

    pub async fn read_u8(&mut self) -> std::io::Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte).await?;
        Ok(byte[0])
    }

    /// Read one tagged frame into `buffer_set`.
    pub async fn read_message(&mut self, buffer_set: &mut BufferSet) -> Result<()> {
        let mut header = [0u8; HEADER_LEN];
        self.read_exact(&mut header).await?;
        let (type_byte, len) = parse_frame_header(&header)?;
        tracing::trace!(tag = %(type_byte as char), len, "frame received");
        buffer_set.type_byte = type_byte;
        buffer_set.read_buffer.clear();
        buffer_set.read_buffer.resize(len, 0);
        self.read_exact(&mut buffer_set.read_buffer).await?;
        Ok(())
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().write_all(buf).await,
            #[cfg(feature = "tokio-tls")]
            Stream::Tls(r) => r.get_mut().write_all(buf).await,
            Stream::Unix(r) => r.get_mut().write_all(buf).await,
        }
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().flush().await,
            #[cfg(feature = "tokio-tls")]
            Stream::Tls(r) => r.get_mut().flush().await,
            Stream::Unix(r) => r.get_mut().flush().await,
        }
    }

    pub fn is_tcp_loopback(&self) -> bool {
        match self {
            Self::Tcp(r) => r
                .get_ref()
                .peer_addr()
                .map(|addr| addr.ip().is_loopback())
                .unwrap_or(false),
            #[cfg(feature = "tokio-tls")]
            Self::Tls(r) => r
                .get_ref() // &TlsStream<TcpStream> (tokio_native_tls)
                .get_ref() // &native_tls::TlsStream<AllowStd<TcpStream>>
                .get_ref() // &AllowStd<TcpStream>
                .get_ref() // &TcpStream
                .peer_addr()
                .map(|addr| addr.ip().is_loopback())
                .unwrap_or(false),
            Self::Unix(_) => false,
        }
    }

    /// Run the TLS handshake over a plain TCP stream.
    ///
    /// Certificates are not verified, matching libpq's `sslmode=require`.
    #[cfg(feature = "tokio-tls")]
    pub async fn upgrade_to_tls(self, host: &str) -> Result<Self> {
        use crate::error::Error;

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
        let tls = tokio_native_tls::TlsConnector::from(connector)
            .connect(host, tcp)
            .await?;
        Ok(Stream::Tls(BufReader::new(tls)))
    }
}
