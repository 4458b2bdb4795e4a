use std::io;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while turning user input into a request.
#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("no host given")]
    EmptyTarget,
    #[error("invalid url {input:?}: {source}")]
    InvalidUrl {
        input: String,
        #[source]
        source: url::ParseError,
    },
    #[error("url {0} has no host")]
    MissingHost(String),
    #[error("failed to build request: {0}")]
    Request(#[from] http::Error),
}

/// Errors that end a trace. A trace is all-or-nothing: whenever one of these is
/// returned no durations were computed.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("unable to resolve host {host}: {source}")]
    Dns {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("no IP addresses found for host {0}")]
    NoAddresses(String),
    #[error("unable to connect to host {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to do tls handshake with {server}: {source}")]
    TlsHandshake {
        server: String,
        #[source]
        source: io::Error,
    },
    #[error("unsupported protocol scheme {0:?}")]
    UnsupportedScheme(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    Http(#[from] hyper::Error),
    #[error("invalid request: {0}")]
    Request(#[from] http::Error),
    #[error("failed to read response body: {0}")]
    Body(#[source] BoxError),
    #[error("stopped after {0} redirects")]
    TooManyRedirects(usize),
    #[error("tls configuration error: {0}")]
    Tls(#[from] rustls::Error),
    #[error("unable to load ca certificates from {path}: {source}")]
    CaCert {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("transport never reported the {0} event")]
    IncompleteTimeline(&'static str),
    #[error("trace aborted after a failed {0} event")]
    Aborted(&'static str),
}

impl From<url::ParseError> for TraceError {
    fn from(e: url::ParseError) -> Self {
        TraceError::InvalidUrl(e.to_string())
    }
}

impl From<http::uri::InvalidUri> for TraceError {
    fn from(e: http::uri::InvalidUri) -> Self {
        TraceError::InvalidUrl(e.to_string())
    }
}
