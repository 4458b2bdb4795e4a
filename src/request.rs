use bytes::Bytes;
use http::header::{HeaderValue, ACCEPT, USER_AGENT};
use http_body_util::Full;
use hyper::Request;
use url::Url;

use crate::error::PrepareError;

const DEFAULT_USER_AGENT: &str = concat!("httptracer/", env!("CARGO_PKG_VERSION"));

/// Turns `www.example.com`, `example.com:8080/path` or a full URL into a URL.
/// Input without a scheme is treated as plain http.
pub fn parse_target(input: &str) -> Result<Url, PrepareError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(PrepareError::EmptyTarget);
    }
    let candidate = if input.contains("://") {
        input.to_string()
    } else {
        format!("http://{}", input)
    };
    let url = Url::parse(&candidate).map_err(|source| PrepareError::InvalidUrl {
        input: input.to_string(),
        source,
    })?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(PrepareError::MissingHost(url.to_string()));
    }
    Ok(url)
}

/// Builds the GET request traced for `input`.
pub fn prepare(input: &str) -> Result<Request<Full<Bytes>>, PrepareError> {
    let url = parse_target(input)?;
    let request = Request::get(url.as_str())
        .header(ACCEPT, HeaderValue::from_static("*/*"))
        .header(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT))
        .body(Full::new(Bytes::new()))?;
    debug!("> {} {}", request.method(), request.uri());
    Ok(request)
}
