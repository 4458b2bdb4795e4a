use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{
    HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HOST, LOCATION,
};
use http::{HeaderMap, Method, StatusCode, Version};
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Frame, Incoming, SizeHint};
use hyper::client::conn::http1;
use hyper::{Request, Response, Uri};
use hyper_util::rt::TokioIo;
use tokio::task::JoinHandle;
use tracing::Instrument;
use url::Url;

use crate::error::{BoxError, TraceError};
use crate::http::connector::{Origin, TracingConnector};
use crate::tls;
use crate::trace::hooks::TraceHooks;
use crate::trace::{drain, TraceBody, Transport};

const MAX_REDIRECTS: usize = 10;

/// Settings for the default transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Accept any server certificate.
    pub insecure: bool,
    /// PEM bundle used instead of the built-in webpki roots.
    pub ca_cert_path: Option<PathBuf>,
    pub follow_redirects: bool,
    pub max_redirects: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            insecure: false,
            ca_cert_path: None,
            follow_redirects: true,
            max_redirects: MAX_REDIRECTS,
        }
    }
}

/// HTTP/1.1 over tokio TCP and rustls, following redirects.
pub struct HyperTransport {
    config: TransportConfig,
    connector: TracingConnector,
}

struct PooledConnection {
    origin: Origin,
    sender: http1::SendRequest<Full<Bytes>>,
    task: ConnectionTask,
}

/// The spawned HTTP/1 connection driver, aborted when dropped.
struct ConnectionTask(JoinHandle<()>);

impl Drop for ConnectionTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Response body that keeps its connection task alive until the body is
/// dropped, so nothing keeps running once the trace has returned.
struct OwnedBody {
    inner: Incoming,
    _task: ConnectionTask,
}

impl Body for OwnedBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl HyperTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TraceError> {
        let tls_config = tls::config::client_config(&config)?;
        Ok(Self {
            connector: TracingConnector::new(Arc::new(tls_config)),
            config,
        })
    }

    async fn open(
        &self,
        origin: &Origin,
        hooks: &TraceHooks,
    ) -> Result<PooledConnection, TraceError> {
        let stream = self.connector.connect(origin, hooks).await?;
        let span = if stream.is_tls() {
            debug_span!("Https Handshake")
        } else {
            debug_span!("Http Handshake")
        };
        let (sender, conn) = http1::handshake(TokioIo::new(stream))
            .instrument(span)
            .await?;
        let task = tokio::task::spawn(
            async move {
                if let Err(err) = conn.await {
                    debug!("Connection failed: {:?}", err);
                }
            }
            .instrument(info_span!(
                "connection",
                host = %origin.host,
                port = origin.port
            )),
        );
        Ok(PooledConnection {
            origin: origin.clone(),
            sender,
            task: ConnectionTask(task),
        })
    }

    async fn send_with_redirects(
        &self,
        request: Request<Full<Bytes>>,
        hooks: TraceHooks,
    ) -> Result<Response<TraceBody>, TraceError> {
        let (parts, mut body) = request.into_parts();
        let mut method = parts.method;
        let mut headers = parts.headers;
        let mut current_url = Url::parse(&parts.uri.to_string())?;
        let mut pooled: Option<PooledConnection> = None;
        let mut redirects = 0;

        loop {
            let uri: Uri = current_url.as_str().parse()?;
            let origin = Origin::from_uri(&uri)?;

            let reusable = match pooled.take() {
                Some(mut conn) if conn.origin == origin => {
                    conn.sender.ready().await.ok().map(|_| conn)
                }
                _ => None,
            };
            let mut conn = match reusable {
                Some(conn) => {
                    hooks.got_conn(true);
                    conn
                }
                None => {
                    let conn = self.open(&origin, &hooks).await?;
                    hooks.got_conn(false);
                    conn
                }
            };

            let hop = build_hop_request(&method, &uri, &headers, body.clone())?;
            hooks.expect_response();
            let res = conn.sender.send_request(hop).await?;
            let status = res.status();
            debug!("< {:?} {}", res.version(), status);
            for (key, value) in res.headers().iter() {
                trace!("< {}: {:?}", key, value);
            }

            let location = if self.config.follow_redirects && is_redirect(status) {
                res.headers().get(LOCATION).cloned()
            } else {
                None
            };
            let Some(location) = location else {
                let task = conn.task;
                return Ok(res.map(|inner| {
                    OwnedBody { inner, _task: task }
                        .map_err(|e| Box::new(e) as BoxError)
                        .boxed()
                }));
            };
            if redirects == self.config.max_redirects {
                return Err(TraceError::TooManyRedirects(redirects));
            }
            redirects += 1;

            drain(res.into_body()).await.map_err(TraceError::Body)?;
            let location = location
                .to_str()
                .map_err(|e| TraceError::InvalidUrl(format!("bad location header: {}", e)))?;
            let next_url = current_url.join(location)?;
            debug!(
                "Redirecting to: {} ({}/{})",
                next_url, redirects, self.config.max_redirects
            );

            if matches!(
                status,
                StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER
            ) {
                method = redirect_method(status, method);
                body = Full::new(Bytes::new());
                headers.remove(CONTENT_TYPE);
                headers.remove(CONTENT_LENGTH);
            }
            if next_url.host_str() != current_url.host_str() {
                headers.remove(AUTHORIZATION);
                headers.remove(COOKIE);
            }

            current_url = next_url;
            pooled = Some(conn);
        }
    }
}

impl Transport for HyperTransport {
    fn execute(
        &self,
        request: Request<Full<Bytes>>,
        hooks: TraceHooks,
    ) -> BoxFuture<'_, Result<Response<TraceBody>, TraceError>> {
        Box::pin(self.send_with_redirects(request, hooks))
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// POST becomes GET on 301/302; everything but HEAD becomes GET on 303.
fn redirect_method(status: StatusCode, method: Method) -> Method {
    let to_get = match status {
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => method == Method::POST,
        StatusCode::SEE_OTHER => method != Method::HEAD,
        _ => false,
    };
    if to_get {
        Method::GET
    } else {
        method
    }
}

/// The request as written on the wire: origin-form target plus `Host`.
fn build_hop_request(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Full<Bytes>,
) -> Result<Request<Full<Bytes>>, TraceError> {
    let target = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .filter(|pq| !pq.is_empty())
        .unwrap_or("/");
    let mut request = Request::builder()
        .method(method.clone())
        .uri(target)
        .version(Version::HTTP_11)
        .body(body)?;
    *request.headers_mut() = headers.clone();

    let host = uri.host().unwrap_or_default();
    let host = match uri.port_u16() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let host = HeaderValue::from_str(&host)
        .map_err(|e| TraceError::InvalidUrl(format!("{}: {}", host, e)))?;
    request.headers_mut().insert(HOST, host);

    debug!(
        "> {} {} {:?}",
        request.method(),
        request.uri(),
        request.version()
    );
    for (key, value) in request.headers().iter() {
        trace!("> {}: {:?}", key, value);
    }
    Ok(request)
}
