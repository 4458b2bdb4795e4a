pub mod hooks;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes};
use futures::future::BoxFuture;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::{Request, Response};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tracing::Instrument;

use crate::clock::{Clock, SystemClock};
use crate::error::{BoxError, TraceError};
use crate::http::transport::{HyperTransport, TransportConfig};
use crate::timing::{Durations, Scheme, Timeline, PHASES};
use hooks::TraceHooks;

pub type TraceBody = BoxBody<Bytes, BoxError>;

/// Executes a request while reporting connection lifecycle events.
///
/// Implementations call the matching [`TraceHooks`] method as each event
/// happens and return once response headers are available; the tracer drains
/// the body itself.
pub trait Transport: Send + Sync {
    fn execute(
        &self,
        request: Request<Full<Bytes>>,
        hooks: TraceHooks,
    ) -> BoxFuture<'_, Result<Response<TraceBody>, TraceError>>;
}

/// Outcome of one traced request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceResult {
    pub durations: Durations,
    pub peer_address: Option<String>,
}

impl TraceResult {
    pub fn get(&self, phase: &str) -> Option<Duration> {
        self.durations.get(phase).copied()
    }

    /// Recorded phases in lifecycle order.
    pub fn phases(&self) -> impl Iterator<Item = (&'static str, Duration)> + '_ {
        PHASES
            .iter()
            .filter_map(move |phase| self.durations.get(phase).map(|d| (*phase, *d)))
    }
}

impl fmt::Display for TraceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.peer_address.as_deref().unwrap_or_default())?;
        let rendered: Vec<String> = self
            .phases()
            .map(|(phase, duration)| format!("{}: {:?}", phase, duration))
            .collect();
        write!(f, "{{{}}}", rendered.join(", "))
    }
}

/// Durations are emitted as fractional milliseconds.
impl Serialize for TraceResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Millis<'a>(&'a TraceResult);

        impl Serialize for Millis<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(self.0.durations.len()))?;
                for (phase, duration) in self.0.phases() {
                    map.serialize_entry(phase, &(duration.as_micros() as f64 / 1000.0))?;
                }
                map.end()
            }
        }

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("peer_address", &self.peer_address)?;
        map.serialize_entry("durations_ms", &Millis(self))?;
        map.end()
    }
}

/// The trace engine.
#[derive(Debug)]
pub struct Tracer<T> {
    transport: T,
    clock: Arc<dyn Clock>,
}

impl<T: Transport> Tracer<T> {
    pub fn new(transport: T) -> Self {
        Self::with_clock(transport, Arc::new(SystemClock))
    }

    pub fn with_clock(transport: T, clock: Arc<dyn Clock>) -> Self {
        Self { transport, clock }
    }

    /// Runs `request` once and returns its phase breakdown.
    ///
    /// The response body is read to the end and discarded. Any error from the
    /// transport, or a failed connect or TLS handshake reported through the
    /// hooks, fails the whole trace.
    pub async fn trace(&self, request: Request<Full<Bytes>>) -> Result<TraceResult, TraceError> {
        let scheme = Scheme::from_uri(request.uri());
        let span = info_span!("trace", url = %request.uri());
        let timeline = Arc::new(Timeline::new());
        let hooks = TraceHooks::new(timeline.clone(), self.clock.clone());

        let outcome = async {
            let response = self.transport.execute(request, hooks.clone()).await?;
            debug!("< {:?} {}", response.version(), response.status());
            let received = drain(response.into_body())
                .await
                .map_err(TraceError::Body)?;
            hooks.body_done();
            debug!("discarded {} body bytes", received);
            Ok::<_, TraceError>(())
        }
        .instrument(span)
        .await;

        if let Some(fatal) = timeline.take_fatal() {
            return Err(fatal);
        }
        outcome?;

        let durations = timeline.snapshot().durations(&scheme)?;
        Ok(TraceResult {
            durations,
            peer_address: timeline.peer_address(),
        })
    }
}

/// Traces `request` with the default transport configuration.
pub async fn trace(request: Request<Full<Bytes>>) -> Result<TraceResult, TraceError> {
    let transport = HyperTransport::new(TransportConfig::default())?;
    Tracer::new(transport).trace(request).await
}

/// Reads `body` to the end without keeping it; returns the byte count.
pub(crate) async fn drain<B>(mut body: B) -> Result<u64, BoxError>
where
    B: Body + Unpin,
    B::Error: Into<BoxError>,
{
    let mut received = 0u64;
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(Into::<BoxError>::into)?;
        if let Some(chunk) = frame.data_ref() {
            received += chunk.remaining() as u64;
        }
    }
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::timing::{CONNECT, DNS, SERVER, TLS, TOTAL, TRANSFER};
    use hyper::StatusCode;
    use std::collections::HashSet;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Failure {
        None,
        Connect,
        Tls,
        Transport,
    }

    /// Replays a fixed lifecycle against a manual clock.
    #[derive(Debug)]
    struct Scripted {
        clock: ManualClock,
        literal_ip: bool,
        tls: bool,
        failure: Failure,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(clock: &ManualClock) -> Self {
            Self {
                clock: clock.clone(),
                literal_ip: false,
                tls: false,
                failure: Failure::None,
                calls: AtomicUsize::new(0),
            }
        }

        async fn run(&self, hooks: TraceHooks) -> Result<Response<TraceBody>, TraceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.literal_ip {
                hooks.dns_start();
                self.clock.advance(ms(5));
                hooks.dns_done();
            }
            hooks.connect_start();
            if self.tls {
                self.clock.advance(ms(4));
            } else {
                self.clock.advance(ms(10));
            }
            let connected = if self.failure == Failure::Connect {
                Err(io::Error::from(io::ErrorKind::ConnectionRefused))
            } else {
                Ok(())
            };
            // The fatal error must win even if a transport carries on.
            let _ = hooks.connect_done("93.184.216.34:80", connected);
            if self.tls {
                hooks.tls_handshake_start();
                self.clock.advance(ms(6));
                let handshake = if self.failure == Failure::Tls {
                    Err(io::Error::other("invalid peer certificate"))
                } else {
                    Ok(())
                };
                let _ = hooks.tls_handshake_done("example.test", handshake);
            }
            hooks.got_conn(false);
            if self.failure == Failure::Transport {
                return Err(TraceError::NoAddresses("example.test".into()));
            }
            self.clock.advance(ms(25));
            hooks.first_response_byte();
            self.clock.advance(ms(2));
            let body = Full::new(Bytes::from_static(b"hello"))
                .map_err(|never| -> BoxError { match never {} })
                .boxed();
            Ok(Response::builder()
                .status(StatusCode::OK)
                .body(body)
                .unwrap())
        }
    }

    impl Transport for Scripted {
        fn execute(
            &self,
            _request: Request<Full<Bytes>>,
            hooks: TraceHooks,
        ) -> BoxFuture<'_, Result<Response<TraceBody>, TraceError>> {
            Box::pin(self.run(hooks))
        }
    }

    fn get(url: &str) -> Request<Full<Bytes>> {
        Request::get(url).body(Full::new(Bytes::new())).unwrap()
    }

    fn tracer(transport: Scripted, clock: &ManualClock) -> Tracer<Scripted> {
        Tracer::with_clock(transport, Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn http_trace_breakdown() {
        let clock = ManualClock::new();
        let tracer = tracer(Scripted::new(&clock), &clock);

        let result = tracer.trace(get("http://example.test")).await.unwrap();

        assert_eq!(result.get(DNS), Some(ms(5)));
        assert_eq!(result.get(CONNECT), Some(ms(10)));
        assert_eq!(result.get(SERVER), Some(ms(25)));
        assert_eq!(result.get(TRANSFER), Some(ms(2)));
        assert_eq!(result.get(TOTAL), Some(ms(42)));
        assert_eq!(result.durations.len(), 5);
        assert_eq!(result.peer_address.as_deref(), Some("93.184.216.34:80"));
    }

    #[tokio::test]
    async fn https_trace_reports_tls() {
        let clock = ManualClock::new();
        let mut transport = Scripted::new(&clock);
        transport.tls = true;

        let result = tracer(transport, &clock)
            .trace(get("https://example.test"))
            .await
            .unwrap();

        let keys: HashSet<_> = result.durations.keys().copied().collect();
        assert_eq!(keys, HashSet::from(PHASES));
        assert_eq!(result.get(TLS), Some(ms(6)));
        assert_eq!(result.get(CONNECT), Some(ms(10)));
    }

    #[tokio::test]
    async fn literal_ip_has_zero_dns() {
        let clock = ManualClock::new();
        let mut transport = Scripted::new(&clock);
        transport.literal_ip = true;

        let result = tracer(transport, &clock)
            .trace(get("http://93.184.216.34"))
            .await
            .unwrap();

        assert_eq!(result.get(DNS), Some(Duration::ZERO));
        assert_eq!(result.get(CONNECT), Some(ms(10)));
        assert_eq!(result.get(TOTAL), Some(ms(37)));
    }

    #[tokio::test]
    async fn tls_handshake_error_fails_trace() {
        let clock = ManualClock::new();
        let mut transport = Scripted::new(&clock);
        transport.tls = true;
        transport.failure = Failure::Tls;

        let err = tracer(transport, &clock)
            .trace(get("https://example.test"))
            .await
            .unwrap_err();
        assert!(matches!(err, TraceError::TlsHandshake { .. }), "{err}");
    }

    #[tokio::test]
    async fn connect_error_fails_trace() {
        let clock = ManualClock::new();
        let mut transport = Scripted::new(&clock);
        transport.failure = Failure::Connect;

        let err = tracer(transport, &clock)
            .trace(get("http://example.test"))
            .await
            .unwrap_err();
        match err {
            TraceError::Connect { addr, .. } => assert_eq!(addr, "93.184.216.34:80"),
            other => panic!("unexpected {other}"),
        }
    }

    #[tokio::test]
    async fn transport_error_is_returned_once() {
        let clock = ManualClock::new();
        let mut transport = Scripted::new(&clock);
        transport.failure = Failure::Transport;
        let tracer = tracer(transport, &clock);

        let err = tracer.trace(get("http://example.test")).await.unwrap_err();
        assert!(matches!(err, TraceError::NoAddresses(_)));
        assert_eq!(tracer.transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_scheme_yields_no_phases() {
        let clock = ManualClock::new();
        let result = tracer(Scripted::new(&clock), &clock)
            .trace(get("ftp://example.test/file"))
            .await
            .unwrap();
        assert!(result.durations.is_empty());
        assert_eq!(result.peer_address.as_deref(), Some("93.184.216.34:80"));
    }

    #[tokio::test]
    async fn each_trace_starts_fresh() {
        let clock = ManualClock::new();
        let mut transport = Scripted::new(&clock);
        transport.literal_ip = true;
        let tracer = tracer(transport, &clock);

        let first = tracer.trace(get("http://10.0.0.1")).await.unwrap();
        let second = tracer.trace(get("http://10.0.0.1")).await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn display_lists_phases_in_order() {
        let result = TraceResult {
            durations: Durations::from([(TOTAL, ms(3)), (DNS, ms(1)), (SERVER, ms(2))]),
            peer_address: Some("127.0.0.1:80".into()),
        };
        assert_eq!(
            result.to_string(),
            "127.0.0.1:80\n{dns: 1ms, server: 2ms, total: 3ms}"
        );
    }

    #[test]
    fn serializes_milliseconds() {
        let result = TraceResult {
            durations: Durations::from([(DNS, Duration::from_micros(1500))]),
            peer_address: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"peer_address": null, "durations_ms": {"dns": 1.5}})
        );
    }
}
