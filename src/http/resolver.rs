use hyper_util::client::legacy::connect::dns::Name;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::net::ToSocketAddrs;
use std::pin::Pin;
use std::task::{Context as OtherContext, Poll};
use std::vec;
use tower_service::Service;

/// System resolver (getaddrinfo) run on tokio's blocking pool, with logging.
///
/// Addresses come back with port 0; the connector fills in the real port.
#[derive(Clone, Debug, Default)]
pub struct TracingResolver;

impl TracingResolver {
    pub fn new() -> Self {
        Self
    }
}

impl Service<Name> for TracingResolver {
    type Response = vec::IntoIter<SocketAddr>;
    type Error = io::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;
    fn poll_ready(&mut self, _cx: &mut OtherContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
    fn call(&mut self, name: Name) -> Self::Future {
        Box::pin(async move {
            let host = name.as_str().to_string();
            debug!("Resolving DNS for: {}", name.as_str());

            let addresses: Vec<SocketAddr> = tokio::task::spawn_blocking(move || {
                (host.as_str(), 0)
                    .to_socket_addrs()
                    .map(|addrs| addrs.collect::<Vec<_>>())
            })
            .await
            .map_err(io::Error::other)??;

            for (i, addr) in addresses.iter().enumerate() {
                if i == 0 {
                    debug!("Resolved IP: {}", addr.ip());
                } else {
                    debug!("Resolved IP (alternative): {}", addr.ip());
                }
            }

            Ok(addresses.into_iter())
        })
    }
}
