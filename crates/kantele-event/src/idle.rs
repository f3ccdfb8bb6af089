use std::rc::Rc;

use crate::event_loop::{EventLoop, LoopCore};

/// A callback run once per loop iteration while marked pending.
///
/// Scheduling is one-shot: after the callback runs it must be scheduled
/// again to run in a later iteration. Dropping the handle unregisters the
/// callback.
pub struct IdleEvent {
    core: Rc<LoopCore>,
    id: u64,
}

impl IdleEvent {
    pub fn new(event_loop: &EventLoop, callback: impl Fn() + 'static) -> Self {
        let core = Rc::clone(event_loop.core());
        let id = core.register_idle(Rc::new(callback));
        Self { core, id }
    }

    pub fn schedule(&self) {
        self.core.idle_schedule(self.id);
    }

    pub fn cancel(&self) {
        self.core.idle_cancel(self.id);
    }

    pub fn is_pending(&self) -> bool {
        self.core.idle_is_pending(self.id)
    }
}

impl Drop for IdleEvent {
    fn drop(&mut self) {
        self.core.remove_idle(self.id);
    }
}
