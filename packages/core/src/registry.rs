//! Table of in-flight requests.
//!
//! A request is present under its tag while it is executing. Bulk
//! cancellation snapshots the matching entries first and cancels them with
//! the lock released, since every cancel deregisters its request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::lifecycle::RequestStatus;
use crate::request::{lock, Request};

#[derive(Default)]
pub struct Registry {
    entries: Mutex<HashMap<String, Arc<dyn Request>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `request` under its tag. Last write wins on collision.
    pub fn register(&self, request: Arc<dyn Request>) {
        let tag = request.tag();
        debug!(%tag, group = %request.group(), "registering request");
        if let Some(previous) = lock(&self.entries).insert(tag, request) {
            debug!(tag = %previous.tag(), "replaced registry entry with same tag");
        }
    }

    /// Remove the entry for `request`'s tag if it holds this same instance.
    pub fn unregister(&self, request: &dyn Request) {
        let tag = request.tag();
        let mut entries = lock(&self.entries);
        if entries
            .get(&tag)
            .is_some_and(|entry| entry.same_request(request))
        {
            entries.remove(&tag);
            debug!(%tag, "unregistered request");
        }
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn Request>> {
        lock(&self.entries).get(tag).cloned()
    }

    pub fn contains(&self, tag: &str) -> bool {
        lock(&self.entries).contains_key(tag)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = lock(&self.entries).keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Status of every registered request, sorted by tag.
    pub fn statuses(&self) -> Vec<RequestStatus> {
        let mut statuses: Vec<RequestStatus> = self
            .snapshot(|_| true)
            .iter()
            .map(|request| request.status())
            .collect();
        statuses.sort_by(|a, b| a.tag.cmp(&b.tag));
        statuses
    }

    /// Cancel the request registered under `tag`, if any.
    pub fn cancel(&self, tag: &str) {
        if let Some(request) = self.get(tag) {
            request.cancel();
        }
    }

    /// Cancel every request registered in `group` at the time of the call.
    pub fn cancel_group(&self, group: &str) {
        let matching = self.snapshot(|request| request.group() == group);
        debug!(%group, count = matching.len(), "cancelling group");
        for request in matching {
            request.cancel();
        }
    }

    /// Cancel every request registered at the time of the call.
    pub fn cancel_all(&self) {
        let all = self.snapshot(|_| true);
        debug!(count = all.len(), "cancelling all requests");
        for request in all {
            request.cancel();
        }
    }

    fn snapshot(&self, filter: impl Fn(&dyn Request) -> bool) -> Vec<Arc<dyn Request>> {
        lock(&self.entries)
            .values()
            .filter(|request| filter(request.as_ref()))
            .cloned()
            .collect()
    }
}
