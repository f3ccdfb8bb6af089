use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::backend::Backend;
use crate::events::PollEvents;
use crate::socket::ScheduleError;

pub(crate) type IdleCallback = Rc<dyn Fn()>;
pub(crate) type TimerCallback = Rc<dyn Fn()>;
pub(crate) type SocketCallback = Rc<dyn Fn(PollEvents)>;

/// Single-threaded cooperative event loop.
///
/// One iteration fires due timers, runs pending idle callbacks, then waits
/// for descriptor readiness until the earliest armed timer (without blocking
/// while idle work is still pending). All scheduling APIs must be used from
/// the thread the loop was created on; cloning shares the same loop.
///
/// Callbacks may freely re-enter the loop API: schedule or cancel events,
/// create and drop handles, or request [`EventLoop::quit`].
#[derive(Clone)]
pub struct EventLoop {
    core: Rc<LoopCore>,
}

impl EventLoop {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            core: Rc::new(LoopCore {
                thread: thread::current().id(),
                backend: RefCell::new(Backend::new()?),
                idles: RefCell::new(HashMap::new()),
                timers: RefCell::new(HashMap::new()),
                sockets: RefCell::new(HashMap::new()),
                next_id: Cell::new(0),
                quit: Cell::new(false),
            }),
        })
    }

    /// True when the calling thread owns this loop.
    pub fn inside(&self) -> bool {
        thread::current().id() == self.core.thread
    }

    /// Iterates until [`EventLoop::quit`] is called from a callback.
    pub fn run(&self) -> io::Result<()> {
        self.core.assert_inside();
        self.core.quit.set(false);
        while !self.core.quit.get() {
            self.core.run_iteration()?;
        }
        Ok(())
    }

    /// Makes [`EventLoop::run`] return after the current iteration.
    pub fn quit(&self) {
        self.core.assert_inside();
        self.core.quit.set(true);
    }

    pub(crate) fn core(&self) -> &Rc<LoopCore> {
        &self.core
    }
}

struct IdleEntry {
    pending: bool,
    callback: IdleCallback,
}

struct TimerEntry {
    due: Option<Instant>,
    callback: TimerCallback,
}

struct SocketEntry {
    fd: RawFd,
    interest: PollEvents,
    ready: PollEvents,
    registered: bool,
    callback: SocketCallback,
}

pub(crate) struct LoopCore {
    thread: ThreadId,
    backend: RefCell<Backend>,
    idles: RefCell<HashMap<u64, IdleEntry>>,
    timers: RefCell<HashMap<u64, TimerEntry>>,
    sockets: RefCell<HashMap<u64, SocketEntry>>,
    next_id: Cell<u64>,
    quit: Cell<bool>,
}

impl LoopCore {
    pub(crate) fn assert_inside(&self) {
        assert!(
            thread::current().id() == self.thread,
            "event loop used off its owning thread"
        );
    }

    fn alloc_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn run_iteration(&self) -> io::Result<()> {
        self.fire_due_timers(Instant::now());
        let ran_idle = self.run_pending_idles();
        if self.quit.get() {
            return Ok(());
        }
        let timeout = if ran_idle || self.has_pending_idle() {
            // idle work was or became pending, don't block
            Some(Duration::ZERO)
        } else {
            self.next_deadline()
                .map(|due| due.saturating_duration_since(Instant::now()))
        };
        self.wait_io(timeout)
    }

    fn fire_due_timers(&self, now: Instant) {
        let mut due: Vec<(u64, TimerCallback)> = Vec::new();
        {
            let mut timers = self.timers.borrow_mut();
            for (&id, entry) in timers.iter_mut() {
                if entry.due.is_some_and(|at| at <= now) {
                    entry.due = None;
                    due.push((id, Rc::clone(&entry.callback)));
                }
            }
        }
        due.sort_by_key(|&(id, _)| id);
        for (id, callback) in due {
            let alive = self.timers.borrow().contains_key(&id);
            if alive {
                callback();
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.borrow().values().filter_map(|entry| entry.due).min()
    }

    fn has_pending_idle(&self) -> bool {
        self.idles.borrow().values().any(|entry| entry.pending)
    }

    /// Runs every currently-pending idle callback once, in registration
    /// order. Returns whether any ran.
    fn run_pending_idles(&self) -> bool {
        let mut pending: Vec<(u64, IdleCallback)> = Vec::new();
        {
            let mut idles = self.idles.borrow_mut();
            for (&id, entry) in idles.iter_mut() {
                if entry.pending {
                    entry.pending = false;
                    pending.push((id, Rc::clone(&entry.callback)));
                }
            }
        }
        pending.sort_by_key(|&(id, _)| id);
        let ran = !pending.is_empty();
        for (id, callback) in pending {
            let alive = self.idles.borrow().contains_key(&id);
            if alive {
                callback();
            }
        }
        ran
    }

    fn wait_io(&self, timeout: Option<Duration>) -> io::Result<()> {
        let mut ready: Vec<(u64, PollEvents)> = Vec::new();
        self.backend.borrow_mut().wait(timeout, &mut ready)?;

        let mut callbacks: Vec<(SocketCallback, PollEvents)> = Vec::new();
        {
            let mut sockets = self.sockets.borrow_mut();
            for entry in sockets.values_mut() {
                entry.ready = PollEvents::empty();
            }
            for &(id, events) in &ready {
                if let Some(entry) = sockets.get_mut(&id) {
                    entry.ready = events;
                    callbacks.push((Rc::clone(&entry.callback), events));
                }
            }
        }
        for (callback, events) in callbacks {
            callback(events);
        }
        Ok(())
    }

    pub(crate) fn register_idle(&self, callback: IdleCallback) -> u64 {
        let id = self.alloc_id();
        self.idles.borrow_mut().insert(
            id,
            IdleEntry {
                pending: false,
                callback,
            },
        );
        id
    }

    pub(crate) fn idle_schedule(&self, id: u64) {
        self.assert_inside();
        if let Some(entry) = self.idles.borrow_mut().get_mut(&id) {
            entry.pending = true;
        }
    }

    pub(crate) fn idle_cancel(&self, id: u64) {
        if let Some(entry) = self.idles.borrow_mut().get_mut(&id) {
            entry.pending = false;
        }
    }

    pub(crate) fn idle_is_pending(&self, id: u64) -> bool {
        self.idles.borrow().get(&id).is_some_and(|entry| entry.pending)
    }

    pub(crate) fn remove_idle(&self, id: u64) {
        self.idles.borrow_mut().remove(&id);
    }

    pub(crate) fn register_timer(&self, callback: TimerCallback) -> u64 {
        let id = self.alloc_id();
        self.timers
            .borrow_mut()
            .insert(id, TimerEntry { due: None, callback });
        id
    }

    pub(crate) fn timer_schedule(&self, id: u64, delay: Duration) {
        self.assert_inside();
        if let Some(entry) = self.timers.borrow_mut().get_mut(&id) {
            entry.due = Some(Instant::now() + delay);
        }
    }

    pub(crate) fn timer_cancel(&self, id: u64) {
        if let Some(entry) = self.timers.borrow_mut().get_mut(&id) {
            entry.due = None;
        }
    }

    pub(crate) fn timer_is_armed(&self, id: u64) -> bool {
        self.timers.borrow().get(&id).is_some_and(|entry| entry.due.is_some())
    }

    pub(crate) fn remove_timer(&self, id: u64) {
        self.timers.borrow_mut().remove(&id);
    }

    pub(crate) fn register_socket(&self, fd: RawFd, callback: SocketCallback) -> u64 {
        let id = self.alloc_id();
        self.sockets.borrow_mut().insert(
            id,
            SocketEntry {
                fd,
                interest: PollEvents::empty(),
                ready: PollEvents::empty(),
                registered: false,
                callback,
            },
        );
        id
    }

    pub(crate) fn socket_schedule(&self, id: u64, events: PollEvents) -> Result<(), ScheduleError> {
        self.assert_inside();
        if events.is_empty() {
            self.socket_cancel(id);
            return Ok(());
        }
        let mut sockets = self.sockets.borrow_mut();
        let Some(entry) = sockets.get_mut(&id) else {
            return Ok(());
        };
        if entry.registered && entry.interest == events {
            return Ok(());
        }
        let mut backend = self.backend.borrow_mut();
        if entry.registered {
            backend.update(id, entry.fd, events)?;
        } else {
            backend.register(id, entry.fd, events)?;
            entry.registered = true;
        }
        entry.interest = events;
        Ok(())
    }

    pub(crate) fn socket_cancel(&self, id: u64) {
        let mut sockets = self.sockets.borrow_mut();
        let Some(entry) = sockets.get_mut(&id) else {
            return;
        };
        if entry.registered {
            entry.registered = false;
            entry.interest = PollEvents::empty();
            if let Err(error) = self.backend.borrow_mut().deregister(id, entry.fd) {
                debug!(fd = entry.fd, %error, "failed to deregister descriptor");
            }
        }
    }

    pub(crate) fn socket_ready(&self, id: u64) -> PollEvents {
        self.sockets
            .borrow()
            .get(&id)
            .map(|entry| entry.ready)
            .unwrap_or_default()
    }

    pub(crate) fn socket_fd(&self, id: u64) -> RawFd {
        self.sockets.borrow().get(&id).map(|entry| entry.fd).unwrap_or(-1)
    }

    pub(crate) fn remove_socket(&self, id: u64) {
        self.socket_cancel(id);
        self.sockets.borrow_mut().remove(&id);
    }
}
