use std::rc::Rc;
use std::time::Duration;

use crate::event_loop::{EventLoop, LoopCore};

/// A one-shot, re-armable timeout callback. Dropping the handle unregisters
/// it.
pub struct TimerEvent {
    core: Rc<LoopCore>,
    id: u64,
}

impl TimerEvent {
    pub fn new(event_loop: &EventLoop, callback: impl Fn() + 'static) -> Self {
        let core = Rc::clone(event_loop.core());
        let id = core.register_timer(Rc::new(callback));
        Self { core, id }
    }

    /// Arms the timer `delay` from now; re-arming replaces any earlier
    /// deadline.
    pub fn schedule(&self, delay: Duration) {
        self.core.timer_schedule(self.id, delay);
    }

    pub fn cancel(&self) {
        self.core.timer_cancel(self.id);
    }

    pub fn is_armed(&self) -> bool {
        self.core.timer_is_armed(self.id)
    }
}

impl Drop for TimerEvent {
    fn drop(&mut self) {
        self.core.remove_timer(self.id);
    }
}
