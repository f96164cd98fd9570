//! HTTP leaf requests.
//!
//! A [`DataRequest`] performs a single exchange through the manager's
//! transport. Its outcome is classified on the dispatcher thread: 2xx
//! responses go to the success callback, anything else to the error callback.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, warn};
use url::form_urlencoded;
use url::Url;

use crate::error::{Error, Failure};
use crate::lifecycle::RequestState;
use crate::manager::Manager;
use crate::request::{lock, Request, RequestCore};
use crate::transport::{Outcome, ProgressSink, TerminalSink, TransportHandle};
use crate::types::{Credentials, Direction, HttpRequest, Method, Progress};

type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

struct Flight {
    phase: RequestState,
    handle: Option<TransportHandle>,
    /// Whether this request currently holds one unit of network activity.
    counted: bool,
}

struct LeafInner {
    core: RequestCore,
    manager: Manager,
    request: Mutex<HttpRequest>,
    progress: Mutex<Option<ProgressCallback>>,
    upload_progress: Mutex<Option<ProgressCallback>>,
    flight: Mutex<Flight>,
}

/// A single HTTP request.
///
/// Cheap to clone; clones are the same request.
#[derive(Clone)]
pub struct DataRequest {
    inner: Arc<LeafInner>,
}

impl DataRequest {
    pub(crate) fn new(manager: Manager) -> Self {
        let group = manager.config().default_group.clone();
        Self {
            inner: Arc::new(LeafInner {
                core: RequestCore::new(group),
                manager,
                request: Mutex::new(HttpRequest::default()),
                progress: Mutex::new(None),
                upload_progress: Mutex::new(None),
                flight: Mutex::new(Flight {
                    phase: RequestState::Built,
                    handle: None,
                    counted: false,
                }),
            }),
        }
    }

    /// Set the target URL and apply the manager's global headers and
    /// credentials for its host.
    ///
    /// An unparseable URL leaves the request unaddressed, so it will refuse
    /// to execute.
    pub fn url(self, url: &str) -> Self {
        match Url::parse(url) {
            Ok(parsed) => self.with_url(parsed),
            Err(e) => {
                warn!(%url, error = %e, "invalid request URL");
                lock(&self.inner.request).url = None;
                self
            }
        }
    }

    /// Like [`url`](Self::url), but reports an unparseable URL to the caller.
    pub fn try_url(self, url: &str) -> Result<Self, Error> {
        let parsed = Url::parse(url)?;
        Ok(self.with_url(parsed))
    }

    pub fn with_url(self, url: Url) -> Self {
        let host = {
            let mut request = lock(&self.inner.request);
            request.url = Some(url);
            request.host().map(str::to_string)
        };

        let manager = &self.inner.manager;
        let headers = manager.headers_for_host(host.as_deref());
        let credentials = manager.credentials_for_host(host.as_deref());
        self.headers(headers).credentials(credentials, true)
    }

    pub fn method(self, method: Method) -> Self {
        lock(&self.inner.request).method = method;
        self
    }

    pub fn header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        lock(&self.inner.request).set_header(name, value);
        self
    }

    pub fn headers<I, K, V>(self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        {
            let mut request = lock(&self.inner.request);
            for (name, value) in headers {
                request.set_header(name, value);
            }
        }
        self
    }

    pub fn content_type(self, content_type: impl Into<String>) -> Self {
        self.header("Content-Type", content_type)
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        lock(&self.inner.request).timeout = Some(timeout);
        self
    }

    pub fn body(self, body: impl Into<Bytes>) -> Self {
        lock(&self.inner.request).body = Some(body.into());
        self
    }

    pub fn body_text(self, body: &str) -> Self {
        self.body(body.to_string())
    }

    /// Encode `fields` as an `application/x-www-form-urlencoded` body.
    pub fn form_urlencoded<I, K, V>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        self.content_type("application/x-www-form-urlencoded")
            .body(encoded)
    }

    /// Serialize `value` as a JSON body.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, Error> {
        let body = serde_json::to_vec(value)?;
        Ok(self.content_type("application/json").body(body))
    }

    /// Attach credentials. With `send_precautionary`, an `Authorization`
    /// header is sent up front instead of waiting for a challenge.
    pub fn credentials(self, credentials: Option<Credentials>, send_precautionary: bool) -> Self {
        {
            let mut request = lock(&self.inner.request);
            if send_precautionary {
                if let Some(credentials) = &credentials {
                    request.set_header("Authorization", credentials.basic_authorization());
                }
            }
            request.credentials = credentials;
        }
        self
    }

    /// Receive download progress on the dispatcher thread.
    pub fn progress<F>(self, callback: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        *lock(&self.inner.progress) = Some(Arc::new(callback));
        self
    }

    /// Receive request body upload progress on the dispatcher thread.
    pub fn upload_progress<F>(self, callback: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        *lock(&self.inner.upload_progress) = Some(Arc::new(callback));
        self
    }

    /// The request as it will be handed to the transport.
    pub fn http_request(&self) -> HttpRequest {
        lock(&self.inner.request).clone()
    }

    pub fn get(self) -> bool {
        self.method(Method::GET).execute()
    }

    pub fn post(self) -> bool {
        self.method(Method::POST).execute()
    }

    pub fn put(self) -> bool {
        self.method(Method::PUT).execute()
    }

    pub fn delete(self) -> bool {
        self.method(Method::DELETE).execute()
    }

    pub fn patch(self) -> bool {
        self.method(Method::PATCH).execute()
    }

    pub fn head(self) -> bool {
        self.method(Method::HEAD).execute()
    }

    fn terminal_sink(&self) -> TerminalSink {
        let leaf = self.clone();
        Box::new(move |outcome| {
            let manager = leaf.inner.manager.clone();
            manager.dispatcher().post(move || leaf.finish(outcome));
        })
    }

    fn progress_sink(&self) -> ProgressSink {
        let leaf = self.clone();
        Arc::new(move |progress| {
            let reporting = leaf.clone();
            leaf.inner
                .manager
                .dispatcher()
                .post(move || reporting.report_progress(progress));
        })
    }

    fn report_progress(&self, progress: Progress) {
        if lock(&self.inner.flight).phase != RequestState::Executing {
            return;
        }
        let callback = match progress.direction {
            Direction::Download => lock(&self.inner.progress).clone(),
            Direction::Upload => lock(&self.inner.upload_progress).clone(),
        };
        if let Some(callback) = callback {
            callback(progress);
        }
    }

    /// Runs on the dispatcher thread.
    fn finish(&self, outcome: Outcome) {
        let succeeded = matches!(&outcome, Ok(response) if response.is_success());
        let counted = {
            let mut flight = lock(&self.inner.flight);
            if flight.phase != RequestState::Executing {
                // Cancelled while the outcome was queued.
                return;
            }
            flight.phase = if succeeded {
                RequestState::Succeeded
            } else {
                RequestState::Failed
            };
            flight.handle = None;
            std::mem::take(&mut flight.counted)
        };

        let manager = &self.inner.manager;
        manager.registry().unregister(self);
        if counted {
            manager.activity().decrease();
        }

        let callbacks = self.inner.core.callbacks();
        match outcome {
            Ok(response) if succeeded => {
                debug!(tag = %self.tag(), status = response.status, "request succeeded");
                callbacks.notify_success(&response, self);
            }
            Ok(response) => {
                let code = response.status;
                debug!(tag = %self.tag(), status = code, "request failed with status");
                callbacks.notify_error(
                    &Failure::with_response(Error::Status { code }, response),
                    self,
                );
            }
            Err(error) => {
                warn!(tag = %self.tag(), %error, "request failed");
                callbacks.notify_error(&Failure::new(error), self);
            }
        }
    }
}

impl Request for DataRequest {
    fn core(&self) -> &RequestCore {
        &self.inner.core
    }

    fn execute(&self) -> bool {
        let request = self.http_request();
        if request.url.is_none() {
            warn!(tag = %self.tag(), "unable to execute request - url is missing");
            return false;
        }

        let manager = &self.inner.manager;
        {
            let mut flight = lock(&self.inner.flight);
            if flight.phase != RequestState::Built {
                warn!(tag = %self.tag(), state = %flight.phase, "request cannot be executed again");
                return false;
            }
            flight.phase = RequestState::Executing;
            // Registered under the flight lock so a cancel always finds the entry.
            manager.registry().register(self.to_shared());
        }

        // The activity callback runs user code and may cancel this request.
        manager.activity().increase();

        let mut flight = lock(&self.inner.flight);
        if flight.phase != RequestState::Executing {
            drop(flight);
            debug!(tag = %self.tag(), "request cancelled before start");
            manager.activity().decrease();
            return false;
        }
        flight.counted = true;

        let started = manager
            .transport()
            .start(request, self.progress_sink(), self.terminal_sink());
        match started {
            Some(handle) => {
                debug!(tag = %self.tag(), %handle, "request started");
                flight.handle = Some(handle);
                true
            }
            None => {
                flight.phase = RequestState::Built;
                flight.counted = false;
                drop(flight);
                warn!(tag = %self.tag(), "transport refused to start request");
                manager.registry().unregister(self);
                manager.activity().decrease();
                false
            }
        }
    }

    fn cancel(&self) {
        let (handle, was_executing, counted) = {
            let mut flight = lock(&self.inner.flight);
            match flight.phase {
                RequestState::Built => {
                    flight.phase = RequestState::Cancelled;
                    (None, false, false)
                }
                RequestState::Executing => {
                    flight.phase = RequestState::Cancelled;
                    (flight.handle.take(), true, std::mem::take(&mut flight.counted))
                }
                _ => return,
            }
        };

        let manager = &self.inner.manager;
        if let Some(handle) = handle {
            manager.transport().cancel(handle);
        }
        manager.registry().unregister(self);
        if counted {
            manager.activity().decrease();
        }
        if was_executing {
            debug!(tag = %self.tag(), "request cancelled");
        }
    }

    fn state(&self) -> RequestState {
        lock(&self.inner.flight).phase
    }

    fn to_shared(&self) -> Arc<dyn Request> {
        Arc::new(self.clone())
    }
}

impl PartialEq for DataRequest {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for DataRequest {}

impl std::fmt::Debug for DataRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let request = lock(&self.inner.request);
        f.debug_struct("DataRequest")
            .field("tag", &self.tag())
            .field("group", &self.group())
            .field("method", &request.method)
            .field("url", &request.url.as_ref().map(Url::as_str))
            .field("state", &self.state())
            .finish()
    }
}
