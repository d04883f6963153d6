//! Socket setup shared by the transports

use std::sync::{Arc, OnceLock};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::error::{Error, Result};

/// A plain or TLS byte stream
pub(crate) trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub(crate) type BoxedStream = Box<dyn AsyncStream>;

/// Open a TCP connection
pub(crate) async fn connect_tcp(host: &str, port: u16, nodelay: bool) -> Result<TcpStream> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| Error::refused(host, port, e))?;

    if nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
        }
    }

    Ok(stream)
}

/// Open a TCP connection, wrapped in TLS when `tls` is set
pub(crate) async fn connect(host: &str, port: u16, tls: bool, nodelay: bool) -> Result<BoxedStream> {
    let tcp = connect_tcp(host, port, nodelay).await?;
    if !tls {
        return Ok(Box::new(tcp));
    }

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| Error::Tls(format!("invalid server name: {}", host)))?;
    let stream = tls_connector()
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::refused(host, port, e))?;

    Ok(Box::new(stream))
}

fn tls_connector() -> TlsConnector {
    static CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();

    let config = CONFIG.get_or_init(|| {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Arc::new(
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        )
    });

    TlsConnector::from(Arc::clone(config))
}
