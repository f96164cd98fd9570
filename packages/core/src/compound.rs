//! Shared surface of compound requests.

use std::sync::Arc;

use crate::request::{Callbacks, Request};

/// A request owning child requests under a composition strategy.
///
/// Implementors only record children and the error policy; [`add`] and
/// [`allow_errors`] are the fluent entry points for both chains and
/// parallel groups.
///
/// [`add`]: CompoundRequest::add
/// [`allow_errors`]: CompoundRequest::allow_errors
pub trait CompoundRequest: Request {
    /// Record a child. Returns false if the compound no longer accepts children.
    fn push_child(&self, child: Arc<dyn Request>) -> bool;

    /// Switch to best-effort: child failures no longer abort the compound.
    fn set_ignore_errors(&self);

    fn ignores_errors(&self) -> bool;

    /// Children in the order they were added.
    fn children(&self) -> Vec<Arc<dyn Request>>;

    fn has_children(&self) -> bool {
        !self.children().is_empty()
    }

    /// Append a child. The caller may keep a clone of `child` to inspect it
    /// later; both handles refer to the same request.
    fn add<R: Request>(self, child: R) -> Self
    where
        Self: Sized,
    {
        self.push_child(child.to_shared());
        self
    }

    fn add_shared(self, child: Arc<dyn Request>) -> Self
    where
        Self: Sized,
    {
        self.push_child(child);
        self
    }

    fn allow_errors(self) -> Self
    where
        Self: Sized,
    {
        self.set_ignore_errors();
        self
    }
}

/// Install `wrappers` on `child`, returning the callbacks they replace.
///
/// The wrappers receive the captured pair so they can run the caller's
/// handlers before any bookkeeping.
pub(crate) fn intercept<F>(child: &dyn Request, wrap: F) -> Callbacks
where
    F: FnOnce(Callbacks) -> Callbacks,
{
    let captured = child.core().callbacks();
    let wrappers = wrap(captured.clone());
    child.core().replace_callbacks(wrappers);
    captured
}
