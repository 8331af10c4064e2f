use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::TransportError;

pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Capacité d'ouverture de connexions utilisée par la sonde.
///
/// Le moteur ne suppose rien du chemin réseau : connexion directe, proxy ou
/// double de test.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> Result<BoxedStream, TransportError>;

    /// Passe un flux établi en TLS (STARTTLS).
    async fn secure(&self, host: &str, stream: BoxedStream) -> Result<BoxedStream, TransportError>;
}

/// Poignée de main TLS partagée par les transports réels. Les certificats
/// ne sont pas vérifiés : la sonde ne transmet jamais de message.
#[derive(Clone)]
struct TlsUpgrader {
    connector: tokio_native_tls::TlsConnector,
    implicit_ports: Vec<u16>,
}

impl TlsUpgrader {
    fn new() -> Result<Self, TransportError> {
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|source| TransportError::TlsInit { source })?;
        Ok(Self {
            connector: connector.into(),
            implicit_ports: vec![465],
        })
    }

    async fn upgrade(&self, host: &str, stream: BoxedStream) -> Result<BoxedStream, TransportError> {
        let tls = self
            .connector
            .connect(host, stream)
            .await
            .map_err(|source| TransportError::Tls {
                host: host.to_string(),
                source,
            })?;
        Ok(Box::new(tls))
    }

    async fn wrap(&self, host: &str, port: u16, stream: BoxedStream) -> Result<BoxedStream, TransportError> {
        if self.implicit_ports.contains(&port) {
            self.upgrade(host, stream).await
        } else {
            Ok(stream)
        }
    }
}

/// Connexion TCP directe ; TLS implicite sur le port 465.
#[derive(Clone)]
pub struct DirectTransport {
    tls: TlsUpgrader,
}

impl DirectTransport {
    pub fn new() -> Result<Self, TransportError> {
        Ok(Self {
            tls: TlsUpgrader::new()?,
        })
    }
}

#[async_trait]
impl Transport for DirectTransport {
    async fn connect(&self, host: &str, port: u16) -> Result<BoxedStream, TransportError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| TransportError::Connect {
                host: host.to_string(),
                port,
                source,
            })?;
        stream.set_nodelay(true).ok();
        self.tls.wrap(host, port, Box::new(stream)).await
    }

    async fn secure(&self, host: &str, stream: BoxedStream) -> Result<BoxedStream, TransportError> {
        self.tls.upgrade(host, stream).await
    }
}

/// Sortie via un proxy SOCKS5 sans authentification (commande CONNECT).
#[derive(Clone)]
pub struct Socks5Transport {
    proxy: SocketAddr,
    tls: TlsUpgrader,
}

impl Socks5Transport {
    pub fn new(proxy: SocketAddr) -> Result<Self, TransportError> {
        Ok(Self {
            proxy,
            tls: TlsUpgrader::new()?,
        })
    }
}

#[async_trait]
impl Transport for Socks5Transport {
    async fn connect(&self, host: &str, port: u16) -> Result<BoxedStream, TransportError> {
        let mut stream = TcpStream::connect(self.proxy).await.map_err(|err| {
            TransportError::unavailable(format!("proxy {} unreachable: {err}", self.proxy))
        })?;
        socks5_connect(&mut stream, host, port).await?;
        self.tls.wrap(host, port, Box::new(stream)).await
    }

    async fn secure(&self, host: &str, stream: BoxedStream) -> Result<BoxedStream, TransportError> {
        self.tls.upgrade(host, stream).await
    }
}

pub(crate) async fn socks5_connect<S>(
    stream: &mut S,
    host: &str,
    port: u16,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let io_err = |what: &str, err: std::io::Error| TransportError::unavailable(format!("{what}: {err}"));

    stream
        .write_all(&[0x05, 0x01, 0x00])
        .await
        .map_err(|e| io_err("SOCKS5 greeting", e))?;
    let mut method = [0u8; 2];
    stream
        .read_exact(&mut method)
        .await
        .map_err(|e| io_err("SOCKS5 greeting reply", e))?;
    if method != [0x05, 0x00] {
        return Err(TransportError::unavailable("SOCKS5 proxy requires authentication"));
    }

    let mut request = vec![0x05, 0x01, 0x00];
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.push(0x01);
            request.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            request.push(0x04);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            let name = host.as_bytes();
            let len = u8::try_from(name.len())
                .map_err(|_| TransportError::unavailable("host name too long for SOCKS5"))?;
            request.push(0x03);
            request.push(len);
            request.extend_from_slice(name);
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    stream
        .write_all(&request)
        .await
        .map_err(|e| io_err("SOCKS5 request", e))?;

    let mut header = [0u8; 4];
    stream
        .read_exact(&mut header)
        .await
        .map_err(|e| io_err("SOCKS5 reply", e))?;
    if header[1] != 0x00 {
        return Err(TransportError::Connect {
            host: host.to_string(),
            port,
            source: std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("SOCKS5 reply code {:#04x}", header[1]),
            ),
        });
    }

    // adresse liée (ignorée) + port
    let bound_len = match header[3] {
        0x01 => 4 + 2,
        0x04 => 16 + 2,
        0x03 => {
            let mut len = [0u8; 1];
            stream
                .read_exact(&mut len)
                .await
                .map_err(|e| io_err("SOCKS5 bound address", e))?;
            usize::from(len[0]) + 2
        }
        other => {
            return Err(TransportError::unavailable(format!(
                "SOCKS5 unknown address type {other:#04x}"
            )));
        }
    };
    let mut bound = vec![0u8; bound_len];
    stream
        .read_exact(&mut bound)
        .await
        .map_err(|e| io_err("SOCKS5 bound address", e))?;
    Ok(())
}
