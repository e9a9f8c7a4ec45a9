//! Event bus between the chat core and whatever renders it.
//!
//! Single-threaded (WASM constraint), interior mutability via RefCell.
//! Events queue until drained; an optional waker lets a callback-driven UI
//! (as opposed to a frame-polling one) schedule a re-render.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use chat_types::event::ChatEvent;

type Waker = Rc<dyn Fn()>;

/// Shared event bus, clone-cheap via Rc.
#[derive(Clone, Default)]
pub struct EventBus {
    queue: Rc<RefCell<VecDeque<ChatEvent>>>,
    waker: Rc<RefCell<Option<Waker>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an event and wake the listener, if any.
    pub fn emit(&self, event: ChatEvent) {
        log::trace!("event: {:?}", event);
        self.queue.borrow_mut().push_back(event);
        // Clone out so the callback may drain or re-register freely
        let waker = self.waker.borrow().clone();
        if let Some(wake) = waker {
            wake();
        }
    }

    /// Drain all pending events.
    pub fn drain(&self) -> Vec<ChatEvent> {
        self.queue.borrow_mut().drain(..).collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.borrow().is_empty()
    }

    /// Register the callback invoked after every emit, replacing any previous one.
    pub fn set_waker(&self, wake: impl Fn() + 'static) {
        *self.waker.borrow_mut() = Some(Rc::new(wake));
    }

    pub fn clear_waker(&self) {
        self.waker.borrow_mut().take();
    }
}
