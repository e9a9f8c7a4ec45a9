//! Cooperative cancellation for one turn.
//!
//! A `CancelToken` is handed to every suspension point of a turn: the
//! request future and the decoded stream are both wrapped in
//! `futures::future::Abortable`, so cancelling wakes whichever is pending.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use futures::future::{AbortHandle, AbortRegistration, Abortable, Aborted};

#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Rc<Cell<bool>>,
    handles: Rc<RefCell<Vec<AbortHandle>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel every future and stream wrapped by this token. Idempotent.
    pub fn cancel(&self) {
        if self.cancelled.replace(true) {
            return;
        }
        for handle in self.handles.borrow_mut().drain(..) {
            handle.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }

    fn registration(&self) -> AbortRegistration {
        let (handle, registration) = AbortHandle::new_pair();
        if self.is_cancelled() {
            handle.abort();
        } else {
            self.handles.borrow_mut().push(handle);
        }
        registration
    }

    /// Run `fut` until it completes or the token is cancelled.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Aborted> {
        Abortable::new(fut, self.registration()).await
    }

    /// Wrap `stream` so that it ends as soon as the token is cancelled.
    pub fn guard<S>(&self, stream: S) -> Abortable<S> {
        Abortable::new(stream, self.registration())
    }
}
