//! Entry point owning the registry, dispatcher and transport.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::activity::ActivityMonitor;
use crate::chained::ChainedRequest;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::globals::{GlobalCredentials, GlobalHeaders};
use crate::leaf::DataRequest;
use crate::parallel::ParallelRequest;
use crate::registry::Registry;
use crate::request::{lock, Request, DEFAULT_GROUP};
use crate::transport::Transport;
use crate::types::Credentials;

/// Configuration for a [`Manager`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Group given to requests that are not assigned one.
    pub default_group: String,

    /// Name of the thread completion callbacks run on.
    pub dispatcher_thread_name: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_group: DEFAULT_GROUP.to_string(),
            dispatcher_thread_name: "skein-callbacks".to_string(),
        }
    }
}

impl ManagerConfig {
    pub fn with_default_group(mut self, group: impl Into<String>) -> Self {
        self.default_group = group.into();
        self
    }

    pub fn with_dispatcher_thread_name(mut self, name: impl Into<String>) -> Self {
        self.dispatcher_thread_name = name.into();
        self
    }
}

struct ManagerInner {
    config: ManagerConfig,
    transport: Arc<dyn Transport>,
    registry: Registry,
    dispatcher: Dispatcher,
    activity: ActivityMonitor,
    headers: Mutex<GlobalHeaders>,
    credentials: Mutex<GlobalCredentials>,
}

/// Factory and owner of everything requests share.
///
/// Cheap to clone; clones share one registry, so every request created from
/// any clone can be cancelled by tag or group through any other.
///
/// # Example
///
/// ```ignore
/// let manager = Manager::new(transport)?;
///
/// manager
///     .chained_request()
///     .then(manager.request().url("https://api.example.com/login"))
///     .then(manager.request().url("https://api.example.com/profile"))
///     .completion(
///         |_, _| println!("both done"),
///         |failure, _| eprintln!("chain failed: {}", failure),
///     )
///     .execute();
/// ```
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerInner>,
}

impl Manager {
    /// Create a manager with the default configuration.
    pub fn new<T: Transport + 'static>(transport: T) -> Result<Self> {
        Self::with_config(transport, ManagerConfig::default())
    }

    pub fn with_config<T: Transport + 'static>(
        transport: T,
        config: ManagerConfig,
    ) -> Result<Self> {
        Self::from_shared(Arc::new(transport), config)
    }

    /// Create a manager around an already shared transport.
    ///
    /// Fails with [`Error::Dispatcher`] if the dispatcher thread cannot be
    /// spawned.
    pub fn from_shared(transport: Arc<dyn Transport>, config: ManagerConfig) -> Result<Self> {
        let dispatcher =
            Dispatcher::new(&config.dispatcher_thread_name).map_err(|e| Error::Dispatcher {
                message: e.to_string(),
            })?;
        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                transport,
                registry: Registry::new(),
                dispatcher,
                activity: ActivityMonitor::new(),
                headers: Mutex::new(GlobalHeaders::default()),
                credentials: Mutex::new(GlobalCredentials::default()),
            }),
        })
    }

    /// A new HTTP leaf request.
    pub fn request(&self) -> DataRequest {
        DataRequest::new(self.clone())
    }

    pub fn chained_request(&self) -> ChainedRequest {
        ChainedRequest::new(self.clone())
    }

    pub fn parallel_request(&self) -> ParallelRequest {
        ParallelRequest::new(self.clone())
    }

    pub fn cancel_request(&self, request: &dyn Request) {
        request.cancel();
    }

    pub fn cancel_tag(&self, tag: &str) {
        self.inner.registry.cancel(tag);
    }

    pub fn cancel_group(&self, group: &str) {
        self.inner.registry.cancel_group(group);
    }

    pub fn cancel_all(&self) {
        self.inner.registry.cancel_all();
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub fn activity(&self) -> &ActivityMonitor {
        &self.inner.activity
    }

    /// Wait until every completion queued so far has been delivered.
    pub fn flush(&self) {
        self.inner.dispatcher.flush();
    }

    /// Set or remove a header sent to `host`, or to every host.
    pub fn set_global_header(&self, name: &str, value: Option<&str>, host: Option<&str>) {
        lock(&self.inner.headers).set_header(name, value, host);
    }

    pub fn set_global_headers(&self, headers: BTreeMap<String, String>, host: Option<&str>) {
        lock(&self.inner.headers).set_headers(headers, host);
    }

    pub fn set_global_credentials(&self, credentials: Option<Credentials>, host: Option<&str>) {
        lock(&self.inner.credentials).set_credentials(credentials, host);
    }

    pub(crate) fn headers_for_host(&self, host: Option<&str>) -> BTreeMap<String, String> {
        lock(&self.inner.headers).headers_for_host(host)
    }

    pub(crate) fn credentials_for_host(&self, host: Option<&str>) -> Option<Credentials> {
        lock(&self.inner.credentials).credentials_for_host(host)
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("config", &self.inner.config)
            .field("registered", &self.inner.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    #[test]
    fn default_config() {
        let config = ManagerConfig::default();
        assert_eq!(config.default_group, "Requests");
        assert_eq!(config.dispatcher_thread_name, "skein-callbacks");
    }

    #[test]
    fn construction_failures_are_reported_as_crate_errors() -> Result<()> {
        let manager = Manager::new(MockTransport::new())?;
        manager.flush();

        let error = Error::Dispatcher {
            message: "Resource temporarily unavailable".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "failed to start dispatcher thread: Resource temporarily unavailable"
        );
        Ok(())
    }

    #[test]
    fn requests_get_configured_default_group() {
        let config = ManagerConfig::default().with_default_group("sync");
        let manager = Manager::with_config(MockTransport::new(), config).unwrap();

        assert_eq!(manager.request().group(), "sync");
        assert_eq!(manager.chained_request().group(), "sync");
        assert_eq!(manager.parallel_request().group(), "sync");
    }

    #[test]
    fn clones_share_one_registry() {
        let transport = MockTransport::new();
        let manager = Manager::new(transport.clone()).unwrap();
        let other = manager.clone();

        let request = manager.request().url("http://test/a").with_tag("a");
        assert!(request.execute());
        assert!(other.registry().contains("a"));

        other.cancel_tag("a");
        assert!(manager.registry().is_empty());
        assert_eq!(transport.cancelled_urls(), vec!["http://test/a"]);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = ManagerConfig::default().with_dispatcher_thread_name("cb");
        let json = serde_json::to_string(&config).unwrap();
        let parsed: ManagerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.dispatcher_thread_name, "cb");
    }
}
