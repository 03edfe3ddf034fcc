//! Byte stream over TCP, a unix socket or TLS.

use std::io::{BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

#[cfg(feature = "sync-tls")]
use native_tls::{HandshakeError, TlsConnector, TlsStream};
use socket2::{SockRef, TcpKeepalive};
use tracing::debug;

use crate::error::{Error, Result};

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

    /// Connect over TCP, trying every resolved address in turn.
    pub fn connect_tcp(
        host: &str,
        port: u16,
        connect_timeout: Option<Duration>,
        keepalive: Option<Duration>,
    ) -> Result<Self> {
        let target = format!("{}:{}", host, port);
        let connect_error = |source| Error::Connect {
            target: target.clone(),
            source,
        };

        let addrs = (host, port).to_socket_addrs().map_err(connect_error)?;
        let mut last_error = None;
        let mut connected = None;
        for addr in addrs {
            let attempt = match connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(tcp) => {
                    connected = Some(tcp);
                    break;
                }
                Err(e) => {
                    debug!(%addr, error = %e, "connect attempt failed");
                    last_error = Some(e);
                }
            }
        }
        let tcp = match connected {
            Some(tcp) => tcp,
            None => {
                let source = last_error.unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::NotFound, "host resolved to no addresses")
                });
                return Err(connect_error(source));
            }
        };

        tcp.set_nodelay(true)?;
        if let Some(idle) = keepalive {
            SockRef::from(&tcp).set_tcp_keepalive(&TcpKeepalive::new().with_time(idle))?;
        }
        debug!(target = %target, "connected over TCP");
        Ok(Self::tcp(tcp))
    }

    pub fn connect_unix(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).map_err(|source| Error::Connect {
            target: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "connected over unix socket");
        Ok(Self::unix(stream))
    }

    pub fn is_unix(&self) -> bool {
        matches!(self, Stream::Unix(_))
    }

    /// Replace the plain TCP stream with a TLS session.
    #[cfg(feature = "sync-tls")]
    pub fn upgrade_to_tls(&mut self, connector: &TlsConnector, domain: &str) -> Result<()> {
        let tcp = match self {
            Stream::Tcp(reader) => {
                // Bytes read ahead of the handshake would be lost
                if !reader.buffer().is_empty() {
                    return Err(Error::Protocol(
                        "unencrypted data received before the TLS handshake".into(),
                    ));
                }
                reader.get_ref().try_clone()?
            }
            Stream::Tls(_) => return Err(Error::InvalidState("stream is already TLS".into())),
            Stream::Unix(_) => {
                return Err(Error::InvalidState("TLS over a unix socket".into()));
            }
        };
        let tls = connector.connect(domain, tcp).map_err(|e| match e {
            HandshakeError::Failure(e) => Error::Tls(e),
            HandshakeError::WouldBlock(_) => {
                Error::Io(std::io::Error::from(std::io::ErrorKind::WouldBlock))
            }
        })?;
        *self = Stream::Tls(BufReader::new(tls));
        Ok(())
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.read_exact(buf),
            #[cfg(feature = "sync-tls")]
            Stream::Tls(r) => r.read_exact(buf),
            Stream::Unix(r) => r.read_exact(buf),
        }
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_socket_names_the_path() {
        let path = Path::new("/nonexistent/pgwire-engine/.s.PGSQL.5432");
        match Stream::connect_unix(path) {
            Err(Error::Connect { target, .. }) => assert_eq!(target, path.display().to_string()),
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("connected to a missing socket"),
        }
    }

    #[test]
    fn unix_pair_round_trip() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let mut stream = Stream::unix(a);
        assert!(stream.is_unix());
        stream.write_all(b"ping").unwrap();
        stream.flush().unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        b.write_all(b"pong").unwrap();
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }
}
