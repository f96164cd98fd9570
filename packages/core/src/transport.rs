//! Transport abstraction.
//!
//! The orchestration layer never touches the network itself. Each leaf request
//! hands its [`HttpRequest`] to a [`Transport`], which runs the exchange
//! asynchronously and reports exactly one terminal [`Outcome`].

use std::sync::Arc;

use crate::error::Error;
use crate::types::{HttpRequest, Progress, Response};

/// Terminal result of one exchange.
pub type Outcome = Result<Response, Error>;

/// Receives the terminal outcome. Called at most once, from any thread.
pub type TerminalSink = Box<dyn FnOnce(Outcome) + Send>;

/// Receives progress events until the exchange is terminal.
pub type ProgressSink = Arc<dyn Fn(Progress) + Send + Sync>;

/// Opaque identifier of a started exchange, used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportHandle(pub u64);

impl std::fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Trait for executing HTTP exchanges.
///
/// Implementations can use real HTTP clients or scripted responses for testing.
pub trait Transport: Send + Sync {
    /// Start an exchange.
    ///
    /// Returns `None` if the exchange could not be started, in which case
    /// neither sink is ever invoked. `on_terminal` may be invoked before this
    /// method returns.
    fn start(
        &self,
        request: HttpRequest,
        on_progress: ProgressSink,
        on_terminal: TerminalSink,
    ) -> Option<TransportHandle>;

    /// Stop a started exchange. Idempotent; after it returns the terminal sink
    /// for `handle` is never invoked.
    fn cancel(&self, handle: TransportHandle);
}

/// Scripted transport for testing.
///
/// Started exchanges stay pending until the test completes or fails them by
/// URL, which makes completion order fully deterministic.
#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct PendingExchange {
        url: String,
        on_progress: ProgressSink,
        on_terminal: TerminalSink,
    }

    #[derive(Default)]
    struct MockState {
        next_handle: u64,
        pending: BTreeMap<u64, PendingExchange>,
        started: Vec<HttpRequest>,
        cancelled: Vec<String>,
        refused: Vec<String>,
        auto_response: Option<Response>,
    }

    /// A mock transport that holds exchanges until told how they end.
    #[derive(Clone, Default)]
    pub struct MockTransport {
        state: Arc<Mutex<MockState>>,
    }

    impl MockTransport {
        /// Create a new mock transport.
        pub fn new() -> Self {
            Self::default()
        }

        /// Refuse to start exchanges for this URL.
        pub fn refuse(self, url: &str) -> Self {
            self.state.lock().unwrap().refused.push(normalize(url));
            self
        }

        /// Complete every exchange immediately, from inside `start`.
        pub fn with_auto_response(self, response: Response) -> Self {
            self.state.lock().unwrap().auto_response = Some(response);
            self
        }

        /// Complete the oldest pending exchange for `url` with `response`.
        ///
        /// Returns false if no exchange for `url` is pending.
        pub fn complete(&self, url: &str, response: Response) -> bool {
            match self.take_pending(url) {
                Some(exchange) => {
                    (exchange.on_terminal)(Ok(response));
                    true
                }
                None => false,
            }
        }

        /// Complete the oldest pending exchange for `url` with a status and body.
        pub fn respond(&self, url: &str, status: u16, body: &str) -> bool {
            self.complete(
                url,
                Response::new(status, BTreeMap::new(), body.to_string()),
            )
        }

        /// Fail the oldest pending exchange for `url` with a transport error.
        pub fn fail(&self, url: &str, message: &str) -> bool {
            match self.take_pending(url) {
                Some(exchange) => {
                    (exchange.on_terminal)(Err(Error::transport(message)));
                    true
                }
                None => false,
            }
        }

        /// Report progress on the oldest pending exchange for `url`.
        pub fn progress(&self, url: &str, progress: Progress) -> bool {
            let url = normalize(url);
            let sink = {
                let state = self.state.lock().unwrap();
                state
                    .pending
                    .values()
                    .find(|exchange| exchange.url == url)
                    .map(|exchange| Arc::clone(&exchange.on_progress))
            };
            match sink {
                Some(sink) => {
                    sink(progress);
                    true
                }
                None => false,
            }
        }

        /// URLs of all started exchanges, in start order.
        pub fn started_urls(&self) -> Vec<String> {
            self.state
                .lock()
                .unwrap()
                .started
                .iter()
                .filter_map(|request| request.url.as_ref().map(|url| url.to_string()))
                .collect()
        }

        /// All started requests, in start order.
        pub fn started_requests(&self) -> Vec<HttpRequest> {
            self.state.lock().unwrap().started.clone()
        }

        /// URLs of exchanges cancelled while pending, in cancel order.
        pub fn cancelled_urls(&self) -> Vec<String> {
            self.state.lock().unwrap().cancelled.clone()
        }

        /// Whether an exchange for `url` is still pending.
        pub fn is_pending(&self, url: &str) -> bool {
            let url = normalize(url);
            self.state
                .lock()
                .unwrap()
                .pending
                .values()
                .any(|exchange| exchange.url == url)
        }

        pub fn pending_count(&self) -> usize {
            self.state.lock().unwrap().pending.len()
        }

        fn take_pending(&self, url: &str) -> Option<PendingExchange> {
            let url = normalize(url);
            let mut state = self.state.lock().unwrap();
            let handle = state
                .pending
                .iter()
                .find(|(_, exchange)| exchange.url == url)
                .map(|(handle, _)| *handle)?;
            state.pending.remove(&handle)
        }
    }

    fn normalize(url: &str) -> String {
        url::Url::parse(url)
            .map(|parsed| parsed.to_string())
            .unwrap_or_else(|_| url.to_string())
    }

    impl Transport for MockTransport {
        fn start(
            &self,
            request: HttpRequest,
            on_progress: ProgressSink,
            on_terminal: TerminalSink,
        ) -> Option<TransportHandle> {
            let url = request
                .url
                .as_ref()
                .map(|url| url.to_string())
                .unwrap_or_default();

            let mut state = self.state.lock().unwrap();
            if state.refused.contains(&url) {
                return None;
            }

            state.next_handle += 1;
            let handle = TransportHandle(state.next_handle);
            state.started.push(request);

            if let Some(response) = state.auto_response.clone() {
                drop(state);
                on_terminal(Ok(response));
                return Some(handle);
            }

            state.pending.insert(
                handle.0,
                PendingExchange {
                    url,
                    on_progress,
                    on_terminal,
                },
            );
            Some(handle)
        }

        fn cancel(&self, handle: TransportHandle) {
            let mut state = self.state.lock().unwrap();
            if let Some(exchange) = state.pending.remove(&handle.0) {
                state.cancelled.push(exchange.url);
            }
        }
    }
}
