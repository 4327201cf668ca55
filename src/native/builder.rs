use std::{io, net::SocketAddr, sync::Arc};

use futures::{future::BoxFuture, FutureExt};
use tokio::net::TcpStream;
use tokio_rustls::{
    rustls::{self, pki_types::ServerName, pki_types::TrustAnchor},
    TlsConnector,
};
use url::Url;

use super::WebSocket;
use crate::{
    connection::Target, stream::MaybeTlsStream, Connection, EventSink, Options, Result,
};

/// Builder for establishing WebSocket connections with customizable options.
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use wsengine::{Event, Options, WebSocket};
///
/// # fn run() -> wsengine::Result<()> {
/// let (tx, _rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
/// let ws = WebSocket::connect("wss://example.com/socket".parse()?)
///     .with_options(
///         Options::default()
///             .with_protocols(["chat"])
///             .with_close_timeout(Duration::from_secs(2)),
///     )
///     .open(tx)?;
/// # Ok(())
/// # }
/// ```
pub struct WebSocketBuilder {
    url: Url,
    options: Options,
    connector: Option<TlsConnector>,
    tcp_address: Option<SocketAddr>,
}

impl WebSocketBuilder {
    pub(super) fn new(url: Url) -> Self {
        Self {
            url,
            options: Options::default(),
            connector: None,
            tcp_address: None,
        }
    }

    /// Sets a custom TLS connector for `wss://` URLs.
    ///
    /// Without one, the server certificate is checked against the webpki roots.
    pub fn with_connector(mut self, connector: TlsConnector) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Connects to `address` instead of resolving the URL's host.
    ///
    /// The URL still provides the `Host` header and the TLS server name.
    pub fn with_tcp_address(mut self, address: SocketAddr) -> Self {
        self.tcp_address = Some(address);
        self
    }

    /// Sets the connection options.
    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Spawns the connection and returns its handle right away.
    ///
    /// Connecting, the opening handshake and everything after are reported to `sink`; the
    /// handle stays in [`ReadyState::Connecting`](crate::ReadyState::Connecting) until
    /// `on_open`. Only a URL that cannot be connected to fails here.
    ///
    /// # Panics
    /// Panics when called outside of a Tokio runtime.
    pub fn open<K>(self, sink: K) -> Result<WebSocket>
    where
        K: EventSink + Send + 'static,
    {
        let target = Target::from_url(&self.url)?;

        let connect = connect(
            target.clone(),
            self.tcp_address,
            self.connector,
            self.options.no_delay,
        )
        .boxed();

        let conn = Connection::new(target, self.options);
        let (ws, channels) = WebSocket::pair();

        tokio::spawn(async move {
            let mut driver = channels.with(conn, sink);
            if let Some(stream) = driver.establish(connect).await {
                driver.run(stream).await;
            }
        });

        Ok(ws)
    }
}

fn connect(
    target: Target,
    tcp_address: Option<SocketAddr>,
    connector: Option<TlsConnector>,
    no_delay: bool,
) -> BoxFuture<'static, Result<MaybeTlsStream<TcpStream>>> {
    async move {
        let tcp_stream = match tcp_address {
            Some(address) => TcpStream::connect(address).await?,
            None => TcpStream::connect(target.authority()).await?,
        };
        tcp_stream.set_nodelay(no_delay)?;

        if !target.secure {
            return Ok(MaybeTlsStream::Plain(tcp_stream));
        }

        let connector = match connector {
            Some(connector) => connector,
            None => tls_connector()?,
        };
        let domain = ServerName::try_from(target.server_name().to_owned())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid dnsname"))?;

        #[cfg(feature = "logging")]
        log::debug!("starting TLS with {}", target.server_name());

        Ok(MaybeTlsStream::Tls(connector.connect(domain, tcp_stream).await?))
    }
    .boxed()
}

/// Creates a TLS connector trusting the webpki root certificates.
///
/// Uses the process-wide crypto provider if one was installed, `ring` otherwise, and
/// advertises HTTP/1.1 through ALPN.
pub fn tls_connector() -> Result<TlsConnector> {
    let mut root_cert_store = rustls::RootCertStore::empty();
    root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| TrustAnchor {
        subject: ta.subject.clone(),
        subject_public_key_info: ta.subject_public_key_info.clone(),
        name_constraints: ta.name_constraints.clone(),
    }));

    let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));

    let mut config = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(rustls::ALL_VERSIONS)
        .map_err(io::Error::other)?
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();
    config.alpn_protocols = vec!["http/1.1".into()];

    Ok(TlsConnector::from(Arc::new(config)))
}
