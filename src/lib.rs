//! Latency breakdown of a single HTTP(S) request.
//!
//! A [`Tracer`] executes one request through a [`Transport`], collecting a
//! timestamp for every connection lifecycle event the transport reports, and
//! turns them into named phase durations (`dns`, `connect`, `tls`, `server`,
//! `transfer`, `total`).
#[macro_use]
extern crate tracing;

pub mod clock;
pub mod error;
pub mod http;
pub mod request;
pub mod timing;
pub mod tls;
pub mod trace;

pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::error::{PrepareError, TraceError};
pub use crate::http::transport::{HyperTransport, TransportConfig};
pub use crate::request::{parse_target, prepare};
pub use crate::timing::Scheme;
pub use crate::trace::hooks::TraceHooks;
pub use crate::trace::{trace, TraceBody, TraceResult, Tracer, Transport};
