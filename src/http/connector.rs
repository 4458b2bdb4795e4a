use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use hyper::Uri;
use hyper_util::client::legacy::connect::dns::Name;
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tower_service::Service;

use crate::error::TraceError;
use crate::http::resolver::TracingResolver;
use crate::http::stream::TracedStream;
use crate::timing::Scheme;
use crate::trace::hooks::TraceHooks;

/// Where a connection goes: scheme, bare host (no IPv6 brackets) and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl Origin {
    pub fn from_uri(uri: &Uri) -> Result<Self, TraceError> {
        let scheme = Scheme::from_uri(uri);
        let default_port = scheme
            .default_port()
            .ok_or_else(|| TraceError::UnsupportedScheme(scheme.to_string()))?;
        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TraceError::InvalidUrl(format!("{} has no host", uri)))?;
        Ok(Self {
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port: uri.port_u16().unwrap_or(default_port),
            scheme,
        })
    }

    fn literal_ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }
}

/// Opens traced connections: resolve, dial, and for https run the TLS
/// handshake, firing the matching hooks around each step.
#[derive(Clone)]
pub struct TracingConnector {
    resolver: TracingResolver,
    tls: TlsConnector,
}

impl TracingConnector {
    pub fn new(tls_config: Arc<ClientConfig>) -> Self {
        Self {
            resolver: TracingResolver::new(),
            tls: TlsConnector::from(tls_config),
        }
    }

    pub async fn connect(
        &self,
        origin: &Origin,
        hooks: &TraceHooks,
    ) -> Result<TracedStream, TraceError> {
        let addrs = self.resolve(origin, hooks).await?;

        // One connect event pair for the whole dial: tokio tries each address
        // in turn and only an error from the last one is reported as fatal.
        hooks.connect_start();
        let result = TcpStream::connect(&addrs[..]).await;
        let addr = match &result {
            Ok(stream) => stream.peer_addr().unwrap_or(addrs[0]).to_string(),
            Err(_) => addrs[0].to_string(),
        };
        let tcp = hooks.connect_done(&addr, result)?;
        if let Err(e) = tcp.set_nodelay(true) {
            debug!("failed to set TCP_NODELAY: {}", e);
        }
        debug!(
            localAddr = ?tcp.local_addr().ok(),
            remoteAddr = %addr,
            "Connected"
        );

        if origin.scheme != Scheme::Https {
            return Ok(TracedStream::plain(tcp, hooks.clone()));
        }

        let domain = pki_types::ServerName::try_from(origin.host.as_str())
            .map_err(|e| TraceError::InvalidUrl(format!("{}: {}", origin.host, e)))?
            .to_owned();
        hooks.tls_handshake_start();
        let tls_stream = hooks.tls_handshake_done(&origin.host, self.tls.connect(domain, tcp).await)?;
        let (_, session) = tls_stream.get_ref();
        debug!(
            version = ?session.protocol_version(),
            cipher = ?session.negotiated_cipher_suite().map(|s| s.suite()),
            "TLS established"
        );
        Ok(TracedStream::tls(tls_stream, hooks.clone()))
    }

    /// Literal addresses skip the lookup, and with it the DNS hooks.
    async fn resolve(
        &self,
        origin: &Origin,
        hooks: &TraceHooks,
    ) -> Result<Vec<SocketAddr>, TraceError> {
        if let Some(ip) = origin.literal_ip() {
            return Ok(vec![SocketAddr::new(ip, origin.port)]);
        }
        let name = Name::from_str(&origin.host)
            .map_err(|e| TraceError::InvalidUrl(format!("{}: {}", origin.host, e)))?;
        let mut resolver = self.resolver.clone();

        hooks.dns_start();
        let resolved = match std::future::poll_fn(|cx| resolver.poll_ready(cx)).await {
            Ok(()) => resolver.call(name).await,
            Err(e) => Err(e),
        };
        hooks.dns_done();

        let addrs: Vec<SocketAddr> = resolved
            .map_err(|source| TraceError::Dns {
                host: origin.host.clone(),
                source,
            })?
            .map(|mut addr| {
                addr.set_port(origin.port);
                addr
            })
            .collect();
        if addrs.is_empty() {
            error!("DNS resolution for {} returned no addresses.", origin.host);
            return Err(TraceError::NoAddresses(origin.host.clone()));
        }
        Ok(addrs)
    }
}
