//! Skein: composable HTTP requests.
//!
//! Leaf requests, chains and parallel groups share one lifecycle: build,
//! execute once, then succeed, fail or be cancelled. Compounds nest freely
//! and every executing request can be cancelled by tag or group through the
//! [`Manager`] that created it.
//!
//! The engine lives in [`skein_core`]; the `http` feature (on by default)
//! adds the reqwest-backed [`ReqwestTransport`].

pub use skein_core::*;

#[cfg(feature = "http")]
pub use skein_http::{ReqwestTransport, TransportConfig};

#[cfg(feature = "http")]
pub mod http {
    pub use skein_http::*;
}
