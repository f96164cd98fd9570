//! Network activity tracking.

use std::sync::{Arc, Mutex};

use crate::request::lock;

type ActivityCallback = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct ActivityState {
    count: usize,
    callback: Option<ActivityCallback>,
}

/// Counts in-flight leaf requests and reports when the network becomes busy
/// or idle.
///
/// The callback is invoked after every change with `true` while at least one
/// request is in flight. It runs outside the internal lock.
#[derive(Default)]
pub struct ActivityMonitor {
    state: Mutex<ActivityState>,
}

impl ActivityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the callback receiving `is_active` after each change.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        lock(&self.state).callback = Some(Arc::new(callback));
    }

    pub fn increase(&self) {
        self.update(|count| count + 1);
    }

    /// Never goes below zero.
    pub fn decrease(&self) {
        self.update(|count| count.saturating_sub(1));
    }

    pub fn reset(&self) {
        self.update(|_| 0);
    }

    pub fn count(&self) -> usize {
        lock(&self.state).count
    }

    pub fn is_active(&self) -> bool {
        self.count() > 0
    }

    fn update(&self, change: impl FnOnce(usize) -> usize) {
        let (active, callback) = {
            let mut state = lock(&self.state);
            state.count = change(state.count);
            (state.count > 0, state.callback.clone())
        };
        if let Some(callback) = callback {
            callback(active);
        }
    }
}
