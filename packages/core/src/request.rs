//! The base request contract.
//!
//! Every request kind embeds a [`RequestCore`] holding its identity, context
//! and terminal callbacks, and implements [`Request`] for `execute`/`cancel`.
//! Builder methods live on the trait so leaves and compounds share one fluent
//! surface.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::error::Failure;
use crate::lifecycle::{RequestState, RequestStatus};
use crate::types::Response;

/// Group assigned to requests that were not given one.
pub const DEFAULT_GROUP: &str = "Requests";

/// Open key-value bag carried by a request and visible to its callbacks.
pub type Context = BTreeMap<String, serde_json::Value>;

/// Called once with the response and the request reporting it.
pub type SuccessCallback = Arc<dyn Fn(&Response, &dyn Request) + Send + Sync>;

/// Called once with the failure and the request reporting it.
pub type ErrorCallback = Arc<dyn Fn(&Failure, &dyn Request) + Send + Sync>;

/// Instance identity. Two requests are equal only if their ids are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The pair of terminal callbacks installed on a request.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub success: Option<SuccessCallback>,
    pub error: Option<ErrorCallback>,
}

impl Callbacks {
    pub fn notify_success(&self, response: &Response, reporter: &dyn Request) {
        if let Some(success) = &self.success {
            success(response, reporter);
        }
    }

    pub fn notify_error(&self, failure: &Failure, reporter: &dyn Request) {
        if let Some(error) = &self.error {
            error(failure, reporter);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("success", &self.success.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

struct Identity {
    tag: String,
    group: String,
}

/// State shared by every request kind.
pub struct RequestCore {
    id: RequestId,
    identity: Mutex<Identity>,
    context: Mutex<Context>,
    callbacks: Mutex<Callbacks>,
}

impl RequestCore {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            id: RequestId::next(),
            identity: Mutex::new(Identity {
                tag: Uuid::new_v4().to_string(),
                group: group.into(),
            }),
            context: Mutex::new(Context::new()),
            callbacks: Mutex::new(Callbacks::default()),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn tag(&self) -> String {
        lock(&self.identity).tag.clone()
    }

    pub fn group(&self) -> String {
        lock(&self.identity).group.clone()
    }

    pub fn set_tag(&self, tag: String) {
        lock(&self.identity).tag = tag;
    }

    pub fn set_group(&self, group: String) {
        lock(&self.identity).group = group;
    }

    pub fn context(&self) -> Context {
        lock(&self.context).clone()
    }

    pub fn set_context(&self, context: Context) {
        *lock(&self.context) = context;
    }

    pub fn insert_context(&self, key: String, value: serde_json::Value) {
        lock(&self.context).insert(key, value);
    }

    /// The callbacks as currently installed.
    pub fn callbacks(&self) -> Callbacks {
        lock(&self.callbacks).clone()
    }

    /// Replace both callbacks, returning the previous pair.
    pub fn replace_callbacks(&self, callbacks: Callbacks) -> Callbacks {
        std::mem::replace(&mut *lock(&self.callbacks), callbacks)
    }

    pub fn set_success(&self, success: SuccessCallback) {
        lock(&self.callbacks).success = Some(success);
    }

    pub fn set_error(&self, error: ErrorCallback) {
        lock(&self.callbacks).error = Some(error);
    }
}

impl std::fmt::Debug for RequestCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let identity = lock(&self.identity);
        f.debug_struct("RequestCore")
            .field("id", &self.id)
            .field("tag", &identity.tag)
            .field("group", &identity.group)
            .finish()
    }
}

/// Lock a mutex, recovering the data if a callback panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A unit of work with exactly-once terminal reporting.
pub trait Request: Send + Sync + 'static {
    /// Identity, context and callbacks.
    fn core(&self) -> &RequestCore;

    /// Start the work.
    ///
    /// Returns false, without touching callbacks or the registry, when the
    /// request cannot start.
    fn execute(&self) -> bool;

    /// Cancel the request. Idempotent, never fires a callback.
    fn cancel(&self);

    /// Current lifecycle state.
    fn state(&self) -> RequestState;

    /// A shared, type-erased handle to this same instance.
    fn to_shared(&self) -> Arc<dyn Request>;

    fn id(&self) -> RequestId {
        self.core().id()
    }

    fn tag(&self) -> String {
        self.core().tag()
    }

    fn group(&self) -> String {
        self.core().group()
    }

    fn context(&self) -> Context {
        self.core().context()
    }

    fn context_value(&self, key: &str) -> Option<serde_json::Value> {
        self.core().context().get(key).cloned()
    }

    fn status(&self) -> RequestStatus {
        RequestStatus {
            tag: self.tag(),
            group: self.group(),
            state: self.state(),
        }
    }

    /// Identity comparison.
    fn same_request(&self, other: &dyn Request) -> bool {
        self.id() == other.id()
    }

    fn with_tag(self, tag: impl Into<String>) -> Self
    where
        Self: Sized,
    {
        self.core().set_tag(tag.into());
        self
    }

    fn with_group(self, group: impl Into<String>) -> Self
    where
        Self: Sized,
    {
        self.core().set_group(group.into());
        self
    }

    fn with_context(self, context: Context) -> Self
    where
        Self: Sized,
    {
        self.core().set_context(context);
        self
    }

    fn insert_context(self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self
    where
        Self: Sized,
    {
        self.core().insert_context(key.into(), value.into());
        self
    }

    /// Install both terminal callbacks.
    ///
    /// Compounds capture whatever is installed when they wrap a child, so
    /// this must happen before the enclosing compound executes.
    fn completion<S, E>(self, success: S, error: E) -> Self
    where
        Self: Sized,
        S: Fn(&Response, &dyn Request) + Send + Sync + 'static,
        E: Fn(&Failure, &dyn Request) + Send + Sync + 'static,
    {
        self.core().replace_callbacks(Callbacks {
            success: Some(Arc::new(success)),
            error: Some(Arc::new(error)),
        });
        self
    }

    fn on_success<S>(self, success: S) -> Self
    where
        Self: Sized,
        S: Fn(&Response, &dyn Request) + Send + Sync + 'static,
    {
        self.core().set_success(Arc::new(success));
        self
    }

    fn on_error<E>(self, error: E) -> Self
    where
        Self: Sized,
        E: Fn(&Failure, &dyn Request) + Send + Sync + 'static,
    {
        self.core().set_error(Arc::new(error));
        self
    }
}

impl std::fmt::Debug for dyn Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id())
            .field("tag", &self.tag())
            .field("group", &self.group())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_core_has_uuid_tag_and_group() {
        let core = RequestCore::new(DEFAULT_GROUP);
        assert!(Uuid::parse_str(&core.tag()).is_ok());
        assert_eq!(core.group(), "Requests");
    }

    #[test]
    fn ids_are_unique_per_instance() {
        let a = RequestCore::new(DEFAULT_GROUP);
        let b = RequestCore::new(DEFAULT_GROUP);
        a.set_tag("same".to_string());
        b.set_tag("same".to_string());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn replace_callbacks_returns_previous_pair() {
        let core = RequestCore::new(DEFAULT_GROUP);
        core.set_success(Arc::new(|_, _| {}));

        let previous = core.replace_callbacks(Callbacks::default());
        assert!(previous.success.is_some());
        assert!(previous.error.is_none());
        assert!(core.callbacks().success.is_none());
    }

    #[test]
    fn context_insert_and_replace() {
        let core = RequestCore::new(DEFAULT_GROUP);
        core.insert_context("row".to_string(), serde_json::json!(3));
        assert_eq!(core.context().get("row"), Some(&serde_json::json!(3)));

        core.set_context(Context::new());
        assert!(core.context().is_empty());
    }
}
