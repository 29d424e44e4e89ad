//! Latency breakdown for single HTTP requests.
//!
//! Attach a [`PhaseTracker`] to a request, send it through a
//! [`TracingClient`], drain the body, then call [`PhaseTracker::finalize`]
//! and read the named durations from [`PhaseTracker::snapshot`].
#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate tracing;

pub mod http;
pub mod timing;
pub mod tls;
pub mod trace;

pub use crate::http::{ClientOptions, TracedBody, TracingClient};
pub use crate::timing::{Durations, Phase, PhaseTracker};
pub use crate::trace::{attach, RequestTrace};
