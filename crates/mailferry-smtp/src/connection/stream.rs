//! Low-level SMTP stream handling.

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::{
    TlsConnector,
    client::TlsStream,
    rustls::{ClientConfig, RootCertStore},
};

use crate::error::{Error, Result};

/// SMTP byte stream, plain or TLS-wrapped.
///
/// Generic over the underlying transport so tests can drive the protocol
/// machinery with scripted in-memory streams; production code uses
/// [`TcpStream`].
#[derive(Debug)]
pub enum SmtpStream<S> {
    /// Plain connection.
    Plain(BufReader<S>),
    /// TLS-encrypted connection.
    Tls(Box<BufReader<TlsStream<S>>>),
}

impl<S> SmtpStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a raw transport in a plain SMTP stream.
    pub fn new(stream: S) -> Self {
        Self::Plain(BufReader::new(stream))
    }

    /// Reads one CRLF-terminated line, with the line ending stripped.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the peer closed the stream.
    pub async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = match self {
            Self::Plain(reader) => reader.read_line(&mut line).await?,
            Self::Tls(reader) => reader.read_line(&mut line).await?,
        };
        if n == 0 {
            return Err(Error::Closed("connection closed by peer".into()));
        }
        Ok(line.trim_end().to_string())
    }

    /// Writes and flushes data to the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(reader) => {
                reader.get_mut().write_all(data).await?;
                reader.get_mut().flush().await?;
            }
            Self::Tls(reader) => {
                reader.get_mut().write_all(data).await?;
                reader.get_mut().flush().await?;
            }
        }
        Ok(())
    }

    /// Installs a TLS layer over the existing transport (STARTTLS).
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is already encrypted or the
    /// handshake fails.
    pub async fn upgrade_tls(self, hostname: &str) -> Result<Self> {
        let plain = match self {
            Self::Plain(reader) => reader.into_inner(),
            Self::Tls(_) => return Err(Error::Protocol("already using TLS".into())),
        };

        let connector = tls_connector();
        let server_name = ServerName::try_from(hostname.to_string())
            .map_err(|_| Error::Protocol(format!("invalid hostname: {hostname}")))?;

        let tls = connector.connect(server_name, plain).await?;
        Ok(Self::Tls(Box::new(BufReader::new(tls))))
    }

    /// Returns true if a TLS layer is installed.
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

/// Connects to an SMTP server over plain TCP.
///
/// # Errors
///
/// Returns an error if the connection fails or the timeout elapses.
pub async fn connect(
    hostname: &str,
    port: u16,
    timeout: Duration,
) -> Result<SmtpStream<TcpStream>> {
    let addr = format!("{hostname}:{port}");
    let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| Error::ConnectTimeout)??;
    Ok(SmtpStream::new(stream))
}

/// Connects to an SMTP server with implicit TLS (TLS from the first byte).
///
/// # Errors
///
/// Returns an error if the connection or handshake fails or the timeout
/// elapses.
pub async fn connect_tls(
    hostname: &str,
    port: u16,
    timeout: Duration,
) -> Result<SmtpStream<TcpStream>> {
    let addr = format!("{hostname}:{port}");
    let server_name = ServerName::try_from(hostname.to_string())
        .map_err(|_| Error::Protocol(format!("invalid hostname: {hostname}")))?;

    let tls = tokio::time::timeout(timeout, async {
        let tcp = TcpStream::connect(&addr).await?;
        let stream = tls_connector().connect(server_name, tcp).await?;
        Ok::<_, Error>(stream)
    })
    .await
    .map_err(|_| Error::ConnectTimeout)??;

    Ok(SmtpStream::Tls(Box::new(BufReader::new(tls))))
}

/// Creates a TLS connector with the bundled web-PKI roots.
fn tls_connector() -> TlsConnector {
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}
