//! Sequential composition.
//!
//! A [`ChainedRequest`] starts its children one at a time, in the order they
//! were added. Each child is wrapped right before it starts: the wrapper runs
//! the child's own callbacks (reporting the chain), then moves the cursor.
//!
//! ```text
//! built ──execute──> executing(cursor) ──cursor == len──> succeeded
//!                        │    │
//!                        │    └──child error, fail-fast──> failed
//!                        └──cancel──> cancelled
//! ```

use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use crate::compound::{intercept, CompoundRequest};
use crate::error::{Error, Failure};
use crate::lifecycle::RequestState;
use crate::manager::Manager;
use crate::request::{lock, Callbacks, Request, RequestCore};
use crate::types::Response;

struct ChainState {
    phase: RequestState,
    generation: u64,
    ignore_errors: bool,
    children: Vec<Arc<dyn Request>>,
    cursor: usize,
}

impl ChainState {
    fn is_running(&self, generation: u64) -> bool {
        self.phase == RequestState::Executing && self.generation == generation
    }
}

struct ChainInner {
    core: RequestCore,
    manager: Manager,
    state: Mutex<ChainState>,
}

enum Step {
    Start(Arc<dyn Request>),
    Finish,
}

/// Runs children strictly one after another.
#[derive(Clone)]
pub struct ChainedRequest {
    inner: Arc<ChainInner>,
}

impl ChainedRequest {
    pub(crate) fn new(manager: Manager) -> Self {
        let group = manager.config().default_group.clone();
        Self {
            inner: Arc::new(ChainInner {
                core: RequestCore::new(group),
                manager,
                state: Mutex::new(ChainState {
                    phase: RequestState::Built,
                    generation: 0,
                    ignore_errors: false,
                    children: Vec::new(),
                    cursor: 0,
                }),
            }),
        }
    }

    /// Append the next step of the chain.
    pub fn then<R: Request>(self, child: R) -> Self {
        self.add(child)
    }

    /// Index of the child currently running, or `len` once done.
    pub fn cursor(&self) -> usize {
        lock(&self.inner.state).cursor
    }

    fn from_weak(weak: &Weak<ChainInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Start children from the cursor until one is in flight or the chain
    /// reaches a terminal state.
    fn run_from_cursor(&self, generation: u64) {
        loop {
            let step = {
                let mut state = lock(&self.inner.state);
                if !state.is_running(generation) {
                    return;
                }
                match state.children.get(state.cursor) {
                    Some(child) => Step::Start(Arc::clone(child)),
                    None => {
                        state.phase = RequestState::Succeeded;
                        Step::Finish
                    }
                }
            };

            let child = match step {
                Step::Start(child) => child,
                Step::Finish => {
                    self.finish_success();
                    return;
                }
            };

            self.wrap(child.as_ref(), generation);
            if child.execute() {
                return;
            }

            warn!(chain = %self.tag(), child = %child.tag(), "chained request could not be started");
            let failure = Failure::new(Error::NotStarted { tag: child.tag() });
            if !self.apply_failure(generation, failure) {
                return;
            }
        }
    }

    fn wrap(&self, child: &dyn Request, generation: u64) {
        let weak = Arc::downgrade(&self.inner);
        intercept(child, |captured| {
            let success_weak = weak.clone();
            let captured_success = captured.success.clone();
            let captured_error = captured.error;
            Callbacks {
                success: Some(Arc::new(move |response: &Response, _: &dyn Request| {
                    let Some(chain) = Self::from_weak(&success_weak) else {
                        return;
                    };
                    if let Some(success) = &captured_success {
                        success(response, &chain);
                    }
                    chain.child_succeeded(generation);
                })),
                error: Some(Arc::new(move |failure: &Failure, _: &dyn Request| {
                    let Some(chain) = Self::from_weak(&weak) else {
                        return;
                    };
                    if let Some(error) = &captured_error {
                        error(failure, &chain);
                    }
                    if chain.apply_failure(generation, failure.clone()) {
                        chain.run_from_cursor(generation);
                    }
                })),
            }
        });
    }

    fn child_succeeded(&self, generation: u64) {
        {
            let mut state = lock(&self.inner.state);
            if !state.is_running(generation) {
                return;
            }
            state.cursor += 1;
        }
        self.run_from_cursor(generation);
    }

    /// Apply the error policy to a failed child. Returns true if the chain
    /// should carry on with the next child.
    fn apply_failure(&self, generation: u64, failure: Failure) -> bool {
        {
            let mut state = lock(&self.inner.state);
            if !state.is_running(generation) {
                return false;
            }
            if state.ignore_errors {
                state.cursor += 1;
                return true;
            }
            state.phase = RequestState::Failed;
            state.children.clear();
        }

        debug!(tag = %self.tag(), error = %failure, "chain aborted");
        self.inner.manager.registry().unregister(self);
        let callbacks = self.inner.core.callbacks();
        let chain = self.clone();
        self.inner
            .manager
            .dispatcher()
            .deliver(move || callbacks.notify_error(&failure, &chain));
        false
    }

    fn finish_success(&self) {
        debug!(tag = %self.tag(), "chain completed");
        self.inner.manager.registry().unregister(self);
        let callbacks = self.inner.core.callbacks();
        let chain = self.clone();
        self.inner
            .manager
            .dispatcher()
            .deliver(move || callbacks.notify_success(&Response::empty(), &chain));
    }
}

impl Request for ChainedRequest {
    fn core(&self) -> &RequestCore {
        &self.inner.core
    }

    fn execute(&self) -> bool {
        let generation = {
            let mut state = lock(&self.inner.state);
            if state.phase != RequestState::Built {
                warn!(tag = %self.tag(), state = %state.phase, "chain cannot be executed again");
                return false;
            }
            state.phase = RequestState::Executing;
            state.cursor = 0;
            debug!(tag = %self.tag(), children = state.children.len(), "starting chain");
            // A cancel needs the state lock, so it cannot slip in before registration.
            self.inner.manager.registry().register(self.to_shared());
            state.generation
        };

        self.run_from_cursor(generation);
        true
    }

    fn cancel(&self) {
        let children = {
            let mut state = lock(&self.inner.state);
            if state.phase.is_terminal() {
                return;
            }
            state.phase = RequestState::Cancelled;
            state.generation += 1;
            std::mem::take(&mut state.children)
        };

        for child in &children {
            child.cancel();
        }
        self.inner.manager.registry().unregister(self);
        debug!(tag = %self.tag(), children = children.len(), "chain cancelled");
    }

    fn state(&self) -> RequestState {
        lock(&self.inner.state).phase
    }

    fn to_shared(&self) -> Arc<dyn Request> {
        Arc::new(self.clone())
    }
}

impl CompoundRequest for ChainedRequest {
    fn push_child(&self, child: Arc<dyn Request>) -> bool {
        let mut state = lock(&self.inner.state);
        if state.phase.is_terminal() {
            warn!(tag = %self.inner.core.tag(), "chain is finished, child ignored");
            return false;
        }
        state.children.push(child);
        true
    }

    fn set_ignore_errors(&self) {
        lock(&self.inner.state).ignore_errors = true;
    }

    fn ignores_errors(&self) -> bool {
        lock(&self.inner.state).ignore_errors
    }

    fn children(&self) -> Vec<Arc<dyn Request>> {
        lock(&self.inner.state).children.clone()
    }
}

impl PartialEq for ChainedRequest {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ChainedRequest {}

impl std::fmt::Debug for ChainedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("ChainedRequest")
            .field("tag", &self.inner.core.tag())
            .field("state", &state.phase)
            .field("cursor", &state.cursor)
            .field("children", &state.children.len())
            .field("ignore_errors", &state.ignore_errors)
            .finish()
    }
}
