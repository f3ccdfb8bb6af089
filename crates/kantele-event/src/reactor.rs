use std::cell::{Cell, RefCell};
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::warn;

use crate::event_loop::EventLoop;
use crate::events::PollEvents;
use crate::idle::IdleEvent;
use crate::socket::{ScheduleError, SocketEvent};
use crate::timer::TimerEvent;

/// Fallback descriptors cannot signal readiness, so while any exist the
/// prepare timeout is clamped to re-check them at this interval.
#[cfg(feature = "epoll")]
const FALLBACK_RECHECK: Duration = Duration::from_millis(1);

/// One descriptor with the readiness observed for it, as handed to
/// [`SocketHandler::dispatch_sockets`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadySocket {
    pub fd: RawFd,
    pub events: PollEvents,
}

/// One entry of the target set for [`SocketReactor::replace_socket_list`].
#[cfg(not(feature = "epoll"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketRequest {
    pub fd: RawFd,
    pub events: PollEvents,
}

/// Hooks the owning component implements to drive a [`SocketReactor`].
///
/// Both hooks run inline inside the event loop's dispatch step and must not
/// block.
pub trait SocketHandler {
    /// Returns the timeout until the next dispatch, or `None` for no
    /// timeout. May register or replace sockets on the reactor as a side
    /// effect; changes take effect immediately.
    fn prepare_sockets(&self, reactor: &SocketReactor) -> Option<Duration>;

    /// Receives every registered descriptor with non-empty observed
    /// readiness, plus every fallback descriptor unconditionally. Called
    /// after the loop signaled readiness or the prepare timeout fired.
    fn dispatch_sockets(&self, reactor: &SocketReactor, ready: &[ReadySocket]);
}

struct SocketRecord {
    fd: RawFd,
    event: SocketEvent,
}

struct ReactorInner {
    event_loop: EventLoop,
    handler: Rc<dyn SocketHandler>,
    idle_event: IdleEvent,
    timeout_event: TimerEvent,
    records: RefCell<Vec<SocketRecord>>,
    /// Descriptors the registration backend refused; surfaced as ready on
    /// every dispatch. Disjoint from `records`.
    #[cfg(feature = "epoll")]
    always_ready: RefCell<Vec<(RawFd, PollEvents)>>,
    /// Readiness or timeout was signaled and dispatch has not run yet.
    ready: Cell<bool>,
    /// The descriptor set must be re-prepared after the next dispatch.
    refresh: Cell<bool>,
}

/// Watches a dynamically-changing set of descriptors for one owning
/// component and turns their readiness into [`SocketHandler`] calls on the
/// event loop's thread.
///
/// The dispatch cycle is driven by the loop's idle and timeout primitives:
/// readiness (or the armed timeout) marks the reactor ready and schedules
/// the idle callback; the idle callback dispatches first and re-prepares
/// second, so registration changes a handler makes during dispatch are
/// picked up by the very next prepare.
///
/// All mutating operations must run on the loop's owning thread.
pub struct SocketReactor {
    inner: Rc<ReactorInner>,
}

impl SocketReactor {
    pub fn new(event_loop: &EventLoop, handler: Rc<dyn SocketHandler>) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<ReactorInner>| {
            let on_idle = {
                let weak = Weak::clone(weak);
                move || {
                    if let Some(inner) = weak.upgrade() {
                        ReactorInner::on_idle(&inner);
                    }
                }
            };
            let on_timeout = {
                let weak = Weak::clone(weak);
                move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.set_ready();
                    }
                }
            };
            ReactorInner {
                event_loop: event_loop.clone(),
                handler,
                idle_event: IdleEvent::new(event_loop, on_idle),
                timeout_event: TimerEvent::new(event_loop, on_timeout),
                records: RefCell::new(Vec::new()),
                #[cfg(feature = "epoll")]
                always_ready: RefCell::new(Vec::new()),
                ready: Cell::new(false),
                refresh: Cell::new(false),
            }
        });
        Self { inner }
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.event_loop
    }

    /// Registers one descriptor for `events`.
    ///
    /// Returns whether the notification backend accepted it. On the epoll
    /// build a descriptor kind the kernel refuses still joins the
    /// always-ready fallback set — the caller is told registration failed
    /// (so it knows no real notifications will arrive), but the reactor
    /// keeps surfacing the descriptor as ready every cycle.
    pub fn add_socket(&self, fd: RawFd, events: PollEvents) -> bool {
        assert!(
            self.inner.event_loop.inside(),
            "reactor used off the loop's owning thread"
        );
        debug_assert!(!events.is_empty(), "adding a descriptor with an empty mask");
        debug_assert!(!self.inner.contains(fd), "descriptor {fd} added twice");

        let weak = Rc::downgrade(&self.inner);
        let event = SocketEvent::new(&self.inner.event_loop, fd, move |_events| {
            if let Some(inner) = weak.upgrade() {
                inner.set_ready();
            }
        });
        match event.schedule(events) {
            Ok(()) => {
                self.inner.records.borrow_mut().push(SocketRecord { fd, event });
                true
            }
            Err(ScheduleError::Unsupported) => {
                #[cfg(feature = "epoll")]
                {
                    tracing::debug!(fd, "descriptor kind not watchable, treating as always ready");
                    self.inner.always_ready.borrow_mut().push((fd, events));
                }
                false
            }
            Err(ScheduleError::Io(error)) => {
                warn!(fd, %error, "failed to watch descriptor");
                false
            }
        }
    }

    /// Removes every registration and every fallback entry.
    pub fn clear_socket_list(&self) {
        assert!(
            self.inner.event_loop.inside(),
            "reactor used off the loop's owning thread"
        );
        self.inner.records.borrow_mut().clear();
        #[cfg(feature = "epoll")]
        self.inner.always_ready.borrow_mut().clear();
    }

    /// Reconciles the registration set to exactly match `requests`.
    ///
    /// Destructive on the input: every target entry consumed by an existing
    /// registration has its mask zeroed. Registrations absent from the
    /// target (or whose new mask is empty) are removed; leftover non-empty
    /// target entries are added. Calling this twice with the same target
    /// set yields the same registrations with no duplicate additions.
    #[cfg(not(feature = "epoll"))]
    pub fn replace_socket_list(&self, requests: &mut [SocketRequest]) {
        assert!(
            self.inner.event_loop.inside(),
            "reactor used off the loop's owning thread"
        );
        {
            let mut records = self.inner.records.borrow_mut();
            records.retain(|record| {
                let events = requests
                    .iter_mut()
                    .find(|request| request.fd == record.fd)
                    .map(|request| std::mem::take(&mut request.events))
                    .unwrap_or_default();
                if events.is_empty() {
                    false
                } else {
                    record.event.schedule(events).is_ok()
                }
            });
        }
        for request in requests.iter().filter(|request| !request.events.is_empty()) {
            self.add_socket(request.fd, request.events);
        }
    }

    /// Marks the descriptor set stale: the idle callback will re-run
    /// prepare. Also how the owning component starts the first cycle.
    pub fn invalidate_sockets(&self) {
        self.inner.refresh.set(true);
        self.inner.idle_event.schedule();
    }

    /// Returns the reactor to its initial empty state: no registrations, no
    /// fallback entries, no armed timer, no pending dispatch.
    pub fn reset(&self) {
        assert!(
            self.inner.event_loop.inside(),
            "reactor used off the loop's owning thread"
        );
        self.clear_socket_list();
        self.inner.idle_event.cancel();
        self.inner.timeout_event.cancel();
        self.inner.ready.set(false);
        self.inner.refresh.set(false);
    }

    /// Descriptors currently registered with the notification backend.
    pub fn registered_descriptors(&self) -> Vec<RawFd> {
        self.inner.records.borrow().iter().map(|record| record.fd).collect()
    }

    /// Descriptors on the always-ready fallback list.
    #[cfg(feature = "epoll")]
    pub fn fallback_descriptors(&self) -> Vec<RawFd> {
        self.inner.always_ready.borrow().iter().map(|&(fd, _)| fd).collect()
    }
}

impl ReactorInner {
    fn as_reactor(self: &Rc<Self>) -> SocketReactor {
        SocketReactor {
            inner: Rc::clone(self),
        }
    }

    fn set_ready(&self) {
        self.ready.set(true);
        self.idle_event.schedule();
    }

    fn on_idle(self: &Rc<Self>) {
        if self.ready.replace(false) {
            self.dispatch();
            self.refresh.set(true);
        }
        if self.refresh.replace(false) {
            self.prepare();
        }
    }

    fn dispatch(self: &Rc<Self>) {
        let mut ready = Vec::new();
        for record in self.records.borrow().iter() {
            let events = record.event.ready_flags();
            if !events.is_empty() {
                ready.push(ReadySocket {
                    fd: record.fd,
                    events,
                });
            }
        }
        #[cfg(feature = "epoll")]
        for &(fd, events) in self.always_ready.borrow().iter() {
            ready.push(ReadySocket { fd, events });
        }
        // no reactor borrow is held here: the handler may mutate the
        // registration set mid-dispatch
        let handler = Rc::clone(&self.handler);
        handler.dispatch_sockets(&self.as_reactor(), &ready);
    }

    fn prepare(self: &Rc<Self>) {
        let handler = Rc::clone(&self.handler);
        let timeout = handler.prepare_sockets(&self.as_reactor());

        #[cfg(feature = "epoll")]
        let timeout = if self.always_ready.borrow().is_empty() {
            timeout
        } else {
            Some(match timeout {
                Some(timeout) if timeout < FALLBACK_RECHECK => timeout,
                _ => FALLBACK_RECHECK,
            })
        };

        match timeout {
            Some(timeout) => self.timeout_event.schedule(timeout),
            None => self.timeout_event.cancel(),
        }
    }

    fn contains(&self, fd: RawFd) -> bool {
        if self.records.borrow().iter().any(|record| record.fd == fd) {
            return true;
        }
        #[cfg(feature = "epoll")]
        if self.always_ready.borrow().iter().any(|&(afd, _)| afd == fd) {
            return true;
        }
        false
    }
}
