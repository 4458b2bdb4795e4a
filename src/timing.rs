use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use hyper::Uri;

use crate::error::TraceError;

pub const DNS: &str = "dns";
pub const CONNECT: &str = "connect";
pub const TLS: &str = "tls";
pub const SERVER: &str = "server";
pub const TRANSFER: &str = "transfer";
pub const TOTAL: &str = "total";

/// Every phase key in lifecycle order, for rendering.
pub const PHASES: [&str; 6] = [DNS, CONNECT, TLS, SERVER, TRANSFER, TOTAL];

pub type Durations = HashMap<&'static str, Duration>;

/// URL scheme of the traced request; decides which phases are reported.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
    Other(String),
}

impl Scheme {
    pub fn parse(scheme: &str) -> Self {
        if scheme.eq_ignore_ascii_case("http") {
            Scheme::Http
        } else if scheme.eq_ignore_ascii_case("https") {
            Scheme::Https
        } else {
            Scheme::Other(scheme.to_ascii_lowercase())
        }
    }

    pub fn from_uri(uri: &Uri) -> Self {
        Self::parse(uri.scheme_str().unwrap_or_default())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::Other(s) => s,
        }
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            Scheme::Http => Some(80),
            Scheme::Https => Some(443),
            Scheme::Other(_) => None,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One timestamp, written by exactly one lifecycle hook.
#[derive(Debug, Default)]
struct Slot(Mutex<Option<Instant>>);

impl Slot {
    fn set(&self, at: Instant) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = Some(at);
    }

    fn get(&self) -> Option<Instant> {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Timestamps captured while one request is in flight.
///
/// Lifecycle hooks may run on any task the transport uses, so every slot is
/// individually locked; slots are only read back through [`Timeline::snapshot`]
/// once the request has completed. A timeline belongs to exactly one trace.
#[derive(Debug, Default)]
pub struct Timeline {
    dns_start: Slot,
    dns_done: Slot,
    connect_start: Slot,
    connect_done: Slot,
    tls_start: Slot,
    tls_done: Slot,
    got_conn: Slot,
    first_byte: Slot,
    body_done: Slot,
    peer_address: Mutex<Option<String>>,
    awaiting_first_byte: AtomicBool,
    fatal: Mutex<Option<TraceError>>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_dns_start(&self, at: Instant) {
        self.dns_start.set(at);
    }

    pub(crate) fn record_dns_done(&self, at: Instant) {
        self.dns_done.set(at);
    }

    /// Returns false when DNS already started and the event was ignored.
    pub(crate) fn record_connect_start(&self, at: Instant) -> bool {
        if self.dns_start.get().is_some() {
            return false;
        }
        self.connect_start.set(at);
        true
    }

    pub(crate) fn record_connect_done(&self, at: Instant, addr: &str) {
        self.connect_done.set(at);
        *self.peer_address.lock().unwrap_or_else(|e| e.into_inner()) = Some(addr.to_string());
    }

    pub(crate) fn record_tls_start(&self, at: Instant) {
        self.tls_start.set(at);
    }

    pub(crate) fn record_tls_done(&self, at: Instant) {
        self.tls_done.set(at);
    }

    pub(crate) fn record_got_conn(&self, at: Instant) {
        self.got_conn.set(at);
    }

    pub(crate) fn record_first_byte(&self, at: Instant) {
        self.first_byte.set(at);
    }

    pub(crate) fn record_body_done(&self, at: Instant) {
        self.body_done.set(at);
    }

    pub(crate) fn arm_first_byte(&self) {
        self.awaiting_first_byte.store(true, Ordering::Release);
    }

    /// Consumes the armed flag; true for the first caller only.
    pub(crate) fn disarm_first_byte(&self) -> bool {
        self.awaiting_first_byte.swap(false, Ordering::AcqRel)
    }

    /// Keeps the first fatal error; later ones are logged and dropped.
    pub(crate) fn fail(&self, err: TraceError) {
        let mut fatal = self.fatal.lock().unwrap_or_else(|e| e.into_inner());
        if fatal.is_none() {
            *fatal = Some(err);
        } else {
            debug!("ignoring additional fatal event: {}", err);
        }
    }

    pub(crate) fn take_fatal(&self) -> Option<TraceError> {
        self.fatal.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn peer_address(&self) -> Option<String> {
        self.peer_address
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn snapshot(&self) -> Timestamps {
        Timestamps {
            dns_start: self.dns_start.get(),
            dns_done: self.dns_done.get(),
            connect_start: self.connect_start.get(),
            connect_done: self.connect_done.get(),
            tls_start: self.tls_start.get(),
            tls_done: self.tls_done.get(),
            got_conn: self.got_conn.get(),
            first_byte: self.first_byte.get(),
            body_done: self.body_done.get(),
        }
    }
}

/// A completed timeline, detached from the hooks that filled it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Timestamps {
    pub dns_start: Option<Instant>,
    pub dns_done: Option<Instant>,
    pub connect_start: Option<Instant>,
    pub connect_done: Option<Instant>,
    pub tls_start: Option<Instant>,
    pub tls_done: Option<Instant>,
    pub got_conn: Option<Instant>,
    pub first_byte: Option<Instant>,
    pub body_done: Option<Instant>,
}

impl Timestamps {
    /// Phase durations for `scheme`.
    ///
    /// With no DNS lookup the connect start stands in for DNS done, and DNS
    /// start is aliased to DNS done, so `dns` is zero and `connect` still has
    /// a start marker. Schemes other than http and https produce no phases.
    pub fn durations(&self, scheme: &Scheme) -> Result<Durations, TraceError> {
        let mut durations = Durations::new();
        if let Scheme::Other(s) = scheme {
            debug!("no phases are defined for scheme {}", s);
            return Ok(durations);
        }

        let dns_done = self
            .dns_done
            .or(self.connect_start)
            .ok_or(TraceError::IncompleteTimeline("dns done"))?;
        let dns_start = self.dns_start.unwrap_or(dns_done);
        let got_conn = required(self.got_conn, "got connection")?;
        let first_byte = required(self.first_byte, "first response byte")?;
        let body_done = required(self.body_done, "body done")?;

        durations.insert(DNS, elapsed(dns_start, dns_done));
        durations.insert(CONNECT, elapsed(dns_done, got_conn));
        if *scheme == Scheme::Https {
            let tls_start = required(self.tls_start, "tls handshake start")?;
            let tls_done = required(self.tls_done, "tls handshake done")?;
            durations.insert(TLS, elapsed(tls_start, tls_done));
        }
        durations.insert(SERVER, elapsed(got_conn, first_byte));
        durations.insert(TRANSFER, elapsed(first_byte, body_done));
        durations.insert(TOTAL, elapsed(dns_start, body_done));
        Ok(durations)
    }
}

fn required(slot: Option<Instant>, event: &'static str) -> Result<Instant, TraceError> {
    slot.ok_or(TraceError::IncompleteTimeline(event))
}

/// Never negative: an event reported out of order yields zero.
fn elapsed(from: Instant, to: Instant) -> Duration {
    to.saturating_duration_since(from)
}
