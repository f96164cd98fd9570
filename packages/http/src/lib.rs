//! # skein-http
//!
//! Network transport for skein requests.
//!
//! [`ReqwestTransport`] implements [`skein_core::Transport`] on top of an
//! async `reqwest` client. Each exchange runs as a tokio task; cancelling a
//! request aborts its task and suppresses its outcome.
//!
//! ```ignore
//! use skein_core::{Manager, Request};
//! use skein_http::{ReqwestTransport, TransportConfig};
//!
//! let transport = ReqwestTransport::new(TransportConfig::default())?;
//! let manager = Manager::new(transport)?;
//!
//! manager
//!     .request()
//!     .url("https://example.com/status")
//!     .on_success(|response, _| println!("{}", response.text()))
//!     .get();
//! ```
//!
//! The transport either owns a runtime ([`ReqwestTransport::new`]) or spawns
//! onto one the caller already runs ([`ReqwestTransport::with_handle`]).

pub mod config;
pub mod error;

mod transport;

pub use config::TransportConfig;
pub use error::Error;
pub use transport::ReqwestTransport;
