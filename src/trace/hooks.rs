use std::io;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::TraceError;
use crate::timing::Timeline;

/// Lifecycle callbacks handed to a [`Transport`](crate::Transport).
///
/// Each method stamps one slot of the trace's timeline with the current time.
/// Cloning shares the same timeline, so a transport may move copies into
/// spawned tasks or stream wrappers.
#[derive(Debug, Clone)]
pub struct TraceHooks {
    timeline: Arc<Timeline>,
    clock: Arc<dyn Clock>,
}

impl TraceHooks {
    pub fn new(timeline: Arc<Timeline>, clock: Arc<dyn Clock>) -> Self {
        Self { timeline, clock }
    }

    pub fn dns_start(&self) {
        trace!("dns lookup started");
        self.timeline.record_dns_start(self.clock.now());
    }

    pub fn dns_done(&self) {
        trace!("dns lookup done");
        self.timeline.record_dns_done(self.clock.now());
    }

    /// Only recorded when no DNS lookup started, i.e. the host was a literal
    /// address; it then marks the beginning of the trace.
    pub fn connect_start(&self) {
        if self.timeline.record_connect_start(self.clock.now()) {
            trace!("connect started without dns lookup");
        }
    }

    /// Records the established connection and its peer address.
    ///
    /// A failed connect is fatal for the whole trace: the error is kept on the
    /// timeline and the caller gets [`TraceError::Aborted`] back to unwind with.
    pub fn connect_done<T>(&self, addr: &str, result: io::Result<T>) -> Result<T, TraceError> {
        match result {
            Ok(value) => {
                trace!("connected to {}", addr);
                self.timeline.record_connect_done(self.clock.now(), addr);
                Ok(value)
            }
            Err(source) => {
                self.timeline.fail(TraceError::Connect {
                    addr: addr.to_string(),
                    source,
                });
                Err(TraceError::Aborted("connect"))
            }
        }
    }

    pub fn tls_handshake_start(&self) {
        trace!("tls handshake started");
        self.timeline.record_tls_start(self.clock.now());
    }

    /// Same contract as [`connect_done`](Self::connect_done): a handshake
    /// error aborts the trace.
    pub fn tls_handshake_done<T>(&self, server: &str, result: io::Result<T>) -> Result<T, TraceError> {
        match result {
            Ok(value) => {
                trace!("tls handshake with {} done", server);
                self.timeline.record_tls_done(self.clock.now());
                Ok(value)
            }
            Err(source) => {
                self.timeline.fail(TraceError::TlsHandshake {
                    server: server.to_string(),
                    source,
                });
                Err(TraceError::Aborted("tls handshake"))
            }
        }
    }

    pub fn got_conn(&self, reused: bool) {
        trace!(reused, "got connection");
        self.timeline.record_got_conn(self.clock.now());
    }

    pub fn first_response_byte(&self) {
        trace!("first response byte");
        self.timeline.record_first_byte(self.clock.now());
    }

    /// Arms first-byte detection before a request is written.
    pub(crate) fn expect_response(&self) {
        self.timeline.arm_first_byte();
    }

    /// Called by the stream on every read that produced data; only the first
    /// one after [`expect_response`](Self::expect_response) counts.
    pub(crate) fn response_bytes_read(&self) {
        if self.timeline.disarm_first_byte() {
            self.first_response_byte();
        }
    }

    pub(crate) fn body_done(&self) {
        trace!("response body drained");
        self.timeline.record_body_done(self.clock.now());
    }
}
