//! Gateway - TCP/TLS listener that accepts incoming client connections.

use std::io::{BufReader, Cursor};
use std::net::SocketAddr;
use std::sync::Arc;

use rustls_pemfile::{certs, pkcs8_private_keys};
use tokio::net::TcpListener;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

use crate::config::{Config, TlsConfig};
use crate::network::connection;
use crate::registry::SessionRegistry;

/// State every connection shares.
pub(crate) struct Shared {
    pub(crate) config: Arc<Config>,
    pub(crate) registry: Arc<SessionRegistry>,
}

/// The Gateway accepts incoming TCP/TLS connections and spawns a
/// connection task for each.
pub struct Gateway {
    plaintext_listener: TcpListener,
    tls_listener: Option<(TcpListener, TlsAcceptor)>,
    shared: Arc<Shared>,
}

impl Gateway {
    /// Bind the gateway to its configured addresses.
    pub async fn bind(config: Config, registry: Arc<SessionRegistry>) -> anyhow::Result<Self> {
        let addr = config.listen.address;
        let plaintext_listener = TcpListener::bind(addr).await?;
        info!(%addr, "plaintext listener bound");

        let tls_listener = if let Some(tls_cfg) = &config.tls {
            let tls_acceptor = Self::load_tls(tls_cfg)?;
            let listener = TcpListener::bind(tls_cfg.address).await?;
            info!(address = %tls_cfg.address, "TLS listener bound");
            Some((listener, tls_acceptor))
        } else {
            None
        };

        Ok(Self {
            plaintext_listener,
            tls_listener,
            shared: Arc::new(Shared {
                config: Arc::new(config),
                registry,
            }),
        })
    }

    /// The bound plaintext address, for callers that bound port zero.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.plaintext_listener.local_addr()
    }

    /// Load TLS certificates and create a TlsAcceptor.
    fn load_tls(config: &TlsConfig) -> anyhow::Result<TlsAcceptor> {
        let cert_file = std::fs::read(&config.cert_path)?;
        let cert_reader = &mut BufReader::new(Cursor::new(cert_file));
        let certs: Vec<CertificateDer> = certs(cert_reader).collect::<Result<Vec<_>, _>>()?;
        if certs.is_empty() {
            anyhow::bail!("no certificates found in {}", config.cert_path);
        }

        let key_file = std::fs::read(&config.key_path)?;
        let key_reader = &mut BufReader::new(Cursor::new(key_file));
        let mut keys: Vec<PrivateKeyDer> = pkcs8_private_keys(key_reader)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(PrivateKeyDer::from)
            .collect();
        if keys.is_empty() {
            anyhow::bail!("no private keys found in {}", config.key_path);
        }
        let key = keys.remove(0);

        let tls_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        Ok(TlsAcceptor::from(Arc::new(tls_config)))
    }

    /// Run the gateway, accepting connections forever.
    pub async fn run(self) -> anyhow::Result<()> {
        if let Some((tls_listener, tls_acceptor)) = self.tls_listener {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                loop {
                    match tls_listener.accept().await {
                        Ok((stream, addr)) => {
                            info!(%addr, "TLS connection accepted");
                            let shared = Arc::clone(&shared);
                            let acceptor = tls_acceptor.clone();
                            tokio::spawn(async move {
                                match acceptor.accept(stream).await {
                                    Ok(tls_stream) => {
                                        serve(tls_stream, addr, shared).await;
                                    }
                                    Err(e) => {
                                        warn!(%addr, error = %e, "TLS handshake failed");
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept TLS connection");
                        }
                    }
                }
            });
        }

        loop {
            match self.plaintext_listener.accept().await {
                Ok((stream, addr)) => {
                    info!(%addr, "connection accepted");
                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(serve(stream, addr, shared));
                }
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                }
            }
        }
    }
}

async fn serve<S>(stream: S, addr: SocketAddr, shared: Arc<Shared>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    if let Err(e) = connection::run(stream, addr, shared).await {
        error!(%addr, error = %e, "connection error");
    }
    info!(%addr, "connection closed");
}
