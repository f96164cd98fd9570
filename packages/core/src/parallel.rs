//! Concurrent composition.
//!
//! A [`ParallelRequest`] starts every child at once and completes when all of
//! them have settled. Settlement is tracked as a set of outstanding child
//! indices, updated under one lock, so completions arriving from any thread
//! are counted exactly once.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use crate::compound::{intercept, CompoundRequest};
use crate::error::{Error, Failure};
use crate::lifecycle::RequestState;
use crate::manager::Manager;
use crate::request::{lock, Callbacks, Request, RequestCore};
use crate::types::Response;

struct ParallelState {
    phase: RequestState,
    generation: u64,
    ignore_errors: bool,
    children: Vec<Arc<dyn Request>>,
    remaining: BTreeSet<usize>,
}

impl ParallelState {
    fn is_running(&self, generation: u64) -> bool {
        self.phase == RequestState::Executing && self.generation == generation
    }
}

struct ParallelInner {
    core: RequestCore,
    manager: Manager,
    state: Mutex<ParallelState>,
}

/// What a settling child leaves the group to do once the lock is released.
enum Settled {
    Pending,
    Succeeded,
    Failed(Vec<Arc<dyn Request>>),
}

/// Runs all children concurrently.
#[derive(Clone)]
pub struct ParallelRequest {
    inner: Arc<ParallelInner>,
}

impl ParallelRequest {
    pub(crate) fn new(manager: Manager) -> Self {
        let group = manager.config().default_group.clone();
        Self {
            inner: Arc::new(ParallelInner {
                core: RequestCore::new(group),
                manager,
                state: Mutex::new(ParallelState {
                    phase: RequestState::Built,
                    generation: 0,
                    ignore_errors: false,
                    children: Vec::new(),
                    remaining: BTreeSet::new(),
                }),
            }),
        }
    }

    /// Number of children that have not settled yet.
    pub fn remaining(&self) -> usize {
        lock(&self.inner.state).remaining.len()
    }

    fn from_weak(weak: &Weak<ParallelInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn wrap(&self, child: &dyn Request, index: usize, generation: u64) -> Callbacks {
        let weak = Arc::downgrade(&self.inner);
        intercept(child, |captured| {
            let success_weak = weak.clone();
            let captured_success = captured.success.clone();
            let captured_error = captured.error;
            Callbacks {
                success: Some(Arc::new(move |response: &Response, _: &dyn Request| {
                    let Some(group) = Self::from_weak(&success_weak) else {
                        return;
                    };
                    if let Some(success) = &captured_success {
                        success(response, &group);
                    }
                    group.settle(index, generation, None);
                })),
                error: Some(Arc::new(move |failure: &Failure, _: &dyn Request| {
                    let Some(group) = Self::from_weak(&weak) else {
                        return;
                    };
                    if let Some(error) = &captured_error {
                        error(failure, &group);
                    }
                    group.settle(index, generation, Some(failure.clone()));
                })),
            }
        })
    }

    /// Record that child `index` settled. The first unignored failure fails
    /// the group and cancels every other child.
    fn settle(&self, index: usize, generation: u64, failure: Option<Failure>) {
        let settled = {
            let mut state = lock(&self.inner.state);
            if !state.is_running(generation) || !state.remaining.remove(&index) {
                return;
            }
            match &failure {
                Some(_) if !state.ignore_errors => {
                    state.phase = RequestState::Failed;
                    state.remaining.clear();
                    let others = std::mem::take(&mut state.children)
                        .into_iter()
                        .enumerate()
                        .filter(|(i, _)| *i != index)
                        .map(|(_, child)| child)
                        .collect();
                    Settled::Failed(others)
                }
                _ if state.remaining.is_empty() => {
                    state.phase = RequestState::Succeeded;
                    Settled::Succeeded
                }
                _ => Settled::Pending,
            }
        };

        match settled {
            Settled::Pending => {}
            Settled::Succeeded => {
                debug!(tag = %self.tag(), "parallel request completed");
                self.inner.manager.registry().unregister(self);
                self.deliver_success();
            }
            Settled::Failed(others) => {
                let Some(failure) = failure else {
                    return;
                };
                debug!(tag = %self.tag(), error = %failure, "parallel request failed");
                for child in &others {
                    child.cancel();
                }
                self.inner.manager.registry().unregister(self);
                let callbacks = self.inner.core.callbacks();
                let group = self.clone();
                self.inner
                    .manager
                    .dispatcher()
                    .deliver(move || callbacks.notify_error(&failure, &group));
            }
        }
    }

    fn deliver_success(&self) {
        let callbacks = self.inner.core.callbacks();
        let group = self.clone();
        self.inner
            .manager
            .dispatcher()
            .deliver(move || callbacks.notify_success(&Response::empty(), &group));
    }
}

impl Request for ParallelRequest {
    fn core(&self) -> &RequestCore {
        &self.inner.core
    }

    fn execute(&self) -> bool {
        let (generation, children) = {
            let mut state = lock(&self.inner.state);
            if state.phase != RequestState::Built {
                warn!(tag = %self.tag(), state = %state.phase, "parallel request cannot be executed again");
                return false;
            }
            if state.children.is_empty() {
                state.phase = RequestState::Succeeded;
                drop(state);
                debug!(tag = %self.tag(), "empty parallel request completed");
                self.deliver_success();
                return true;
            }
            let count = state.children.len();
            state.phase = RequestState::Executing;
            state.remaining = (0..count).collect();
            self.inner.manager.registry().register(self.to_shared());
            (state.generation, state.children.clone())
        };

        debug!(tag = %self.tag(), children = children.len(), "starting parallel request");

        let mut captured = Vec::with_capacity(children.len());
        let mut refused = Vec::new();
        for (index, child) in children.iter().enumerate() {
            captured.push(self.wrap(child.as_ref(), index, generation));
            if !child.execute() {
                refused.push(index);
            }
        }

        if refused.len() == children.len() {
            let reverted = {
                let mut state = lock(&self.inner.state);
                if state.is_running(generation) {
                    state.phase = RequestState::Built;
                    state.generation += 1;
                    state.remaining.clear();
                    true
                } else {
                    false
                }
            };
            if reverted {
                warn!(tag = %self.tag(), "no child of parallel request could be started");
                for (child, callbacks) in children.iter().zip(captured) {
                    child.core().replace_callbacks(callbacks);
                }
                self.inner.manager.registry().unregister(self);
                return false;
            }
            return true;
        }

        for index in refused {
            let tag = children[index].tag();
            warn!(parallel = %self.tag(), child = %tag, "parallel child could not be started");
            self.settle(index, generation, Some(Failure::new(Error::NotStarted { tag })));
        }
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
            state.remaining.clear();
            std::mem::take(&mut state.children)
        };

        for child in &children {
            child.cancel();
        }
        self.inner.manager.registry().unregister(self);
        debug!(tag = %self.tag(), children = children.len(), "parallel request cancelled");
    }

    fn state(&self) -> RequestState {
        lock(&self.inner.state).phase
    }

    fn to_shared(&self) -> Arc<dyn Request> {
        Arc::new(self.clone())
    }
}

impl CompoundRequest for ParallelRequest {
    fn push_child(&self, child: Arc<dyn Request>) -> bool {
        let mut state = lock(&self.inner.state);
        if state.phase != RequestState::Built {
            warn!(tag = %self.inner.core.tag(), state = %state.phase, "parallel request already started, child ignored");
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

impl PartialEq for ParallelRequest {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ParallelRequest {}

impl std::fmt::Debug for ParallelRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("ParallelRequest")
            .field("tag", &self.inner.core.tag())
            .field("state", &state.phase)
            .field("children", &state.children.len())
            .field("remaining", &state.remaining.len())
            .field("ignore_errors", &state.ignore_errors)
            .finish()
    }
}
