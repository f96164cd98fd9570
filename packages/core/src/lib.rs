//! Skein Core: Request Composition Engine
//!
//! This crate owns the lifecycle of HTTP requests independently of how bytes
//! move over the wire:
//! - `DataRequest`: a single HTTP exchange driven through a `Transport`
//! - `ChainedRequest`: children run strictly one after another
//! - `ParallelRequest`: children run concurrently, completing when all settle
//! - `Registry`: every executing request, addressable by tag and group
//! - `Dispatcher`: the one thread completion callbacks run on
//!
//! Compounds nest arbitrarily. A child's own callbacks still fire, before the
//! compound advances, and receive the compound as the reporting request.
//!
//! # Example
//!
//! ```ignore
//! use skein_core::{CompoundRequest, Manager, Request};
//!
//! let manager = Manager::new(transport)?;
//!
//! manager
//!     .parallel_request()
//!     .with_tag("sync")
//!     .add(manager.request().url("https://api.example.com/users"))
//!     .add(manager.request().url("https://api.example.com/teams"))
//!     .completion(
//!         |_, _| println!("synced"),
//!         |failure, _| eprintln!("sync failed: {}", failure),
//!     )
//!     .execute();
//!
//! // Later, from anywhere holding the manager:
//! manager.cancel_tag("sync");
//! ```

pub use bytes::Bytes;
pub use url::Url;

mod activity;
mod chained;
mod compound;
mod dispatch;
mod error;
mod globals;
mod leaf;
mod lifecycle;
mod manager;
mod parallel;
mod registry;
mod request;
pub mod transport;
mod types;

pub use activity::ActivityMonitor;
pub use chained::ChainedRequest;
pub use compound::CompoundRequest;
pub use dispatch::Dispatcher;
pub use error::{Error, Failure, Result};
pub use globals::{GlobalCredentials, GlobalHeaders};
pub use leaf::DataRequest;
pub use lifecycle::{RequestState, RequestStatus};
pub use manager::{Manager, ManagerConfig};
pub use parallel::ParallelRequest;
pub use registry::Registry;
pub use request::{
    Callbacks, Context, ErrorCallback, Request, RequestCore, RequestId, SuccessCallback,
    DEFAULT_GROUP,
};
pub use transport::{Outcome, ProgressSink, TerminalSink, Transport, TransportHandle};
pub use types::{Credentials, Direction, HttpRequest, Method, Progress, Response};
