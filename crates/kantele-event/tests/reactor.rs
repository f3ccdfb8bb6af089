//! End-to-end reactor cycles over a real event loop.

use std::cell::{Cell, RefCell};
use std::io::Write;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::Duration;

use kantele_event::{
    EventLoop, PollEvents, ReadySocket, SocketHandler, SocketReactor, TimerEvent,
};

/// Registers a fixed watch list on the first prepare and records every
/// hook invocation.
struct RecordingHandler {
    event_loop: EventLoop,
    watch: Vec<(RawFd, PollEvents)>,
    timeout: Option<Duration>,
    quit_after: usize,
    registered: Cell<bool>,
    add_results: RefCell<Vec<bool>>,
    prepare_calls: Cell<usize>,
    dispatches: RefCell<Vec<Vec<ReadySocket>>>,
}

impl RecordingHandler {
    fn new(
        event_loop: &EventLoop,
        watch: Vec<(RawFd, PollEvents)>,
        timeout: Option<Duration>,
        quit_after: usize,
    ) -> Rc<Self> {
        Rc::new(Self {
            event_loop: event_loop.clone(),
            watch,
            timeout,
            quit_after,
            registered: Cell::new(false),
            add_results: RefCell::new(Vec::new()),
            prepare_calls: Cell::new(0),
            dispatches: RefCell::new(Vec::new()),
        })
    }
}

impl SocketHandler for RecordingHandler {
    fn prepare_sockets(&self, reactor: &SocketReactor) -> Option<Duration> {
        self.prepare_calls.set(self.prepare_calls.get() + 1);
        if !self.registered.replace(true) {
            for &(fd, events) in &self.watch {
                let accepted = reactor.add_socket(fd, events);
                self.add_results.borrow_mut().push(accepted);
            }
        }
        self.timeout
    }

    fn dispatch_sockets(&self, _reactor: &SocketReactor, ready: &[ReadySocket]) {
        self.dispatches.borrow_mut().push(ready.to_vec());
        if self.dispatches.borrow().len() >= self.quit_after {
            self.event_loop.quit();
        }
    }
}

/// Quits the loop if the scenario under test stalls.
fn hang_guard(event_loop: &EventLoop) -> TimerEvent {
    let quit_loop = event_loop.clone();
    let guard = TimerEvent::new(event_loop, move || quit_loop.quit());
    guard.schedule(Duration::from_secs(2));
    guard
}

#[test]
fn dispatch_reports_readable_peer() {
    let event_loop = EventLoop::new().expect("create event loop");
    let (mut tx, rx) = UnixStream::pair().expect("socketpair");
    tx.write_all(b"ping").expect("write");

    let handler = RecordingHandler::new(
        &event_loop,
        vec![(rx.as_raw_fd(), PollEvents::READ)],
        Some(Duration::from_millis(500)),
        1,
    );
    let reactor = SocketReactor::new(&event_loop, handler.clone());
    reactor.invalidate_sockets();
    let _guard = hang_guard(&event_loop);

    event_loop.run().expect("run loop");

    assert_eq!(handler.add_results.borrow().as_slice(), &[true]);
    let dispatches = handler.dispatches.borrow();
    assert_eq!(dispatches.len(), 1);
    let ready = &dispatches[0];
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].fd, rx.as_raw_fd());
    assert!(ready[0].events.contains(PollEvents::READ));
    // dispatch runs before the set is re-prepared, within the same idle pass
    assert_eq!(handler.prepare_calls.get(), 2);
}

#[test]
fn timeout_dispatches_with_no_ready_sockets() {
    let event_loop = EventLoop::new().expect("create event loop");
    let (_tx, rx) = UnixStream::pair().expect("socketpair");

    let handler = RecordingHandler::new(
        &event_loop,
        vec![(rx.as_raw_fd(), PollEvents::READ)],
        Some(Duration::from_millis(10)),
        1,
    );
    let reactor = SocketReactor::new(&event_loop, handler.clone());
    reactor.invalidate_sockets();
    let _guard = hang_guard(&event_loop);

    event_loop.run().expect("run loop");

    let dispatches = handler.dispatches.borrow();
    assert_eq!(dispatches.len(), 1);
    assert!(dispatches[0].is_empty());
}

#[test]
fn registration_changes_during_dispatch_take_effect() {
    struct SwappingHandler {
        event_loop: EventLoop,
        first: RawFd,
        second: RawFd,
        dispatched: Cell<usize>,
    }

    impl SocketHandler for SwappingHandler {
        fn prepare_sockets(&self, reactor: &SocketReactor) -> Option<Duration> {
            if reactor.registered_descriptors().is_empty() && self.dispatched.get() == 0 {
                reactor.add_socket(self.first, PollEvents::READ);
            }
            Some(Duration::from_millis(5))
        }

        fn dispatch_sockets(&self, reactor: &SocketReactor, _ready: &[ReadySocket]) {
            let count = self.dispatched.get() + 1;
            self.dispatched.set(count);
            if count == 1 {
                // swap the whole watch set mid-dispatch
                reactor.clear_socket_list();
                reactor.add_socket(self.second, PollEvents::READ);
            } else {
                self.event_loop.quit();
            }
        }
    }

    let event_loop = EventLoop::new().expect("create event loop");
    let (a, _a_peer) = UnixStream::pair().expect("socketpair a");
    let (b, _b_peer) = UnixStream::pair().expect("socketpair b");

    let handler = Rc::new(SwappingHandler {
        event_loop: event_loop.clone(),
        first: a.as_raw_fd(),
        second: b.as_raw_fd(),
        dispatched: Cell::new(0),
    });
    let reactor = SocketReactor::new(&event_loop, handler.clone());
    reactor.invalidate_sockets();
    let _guard = hang_guard(&event_loop);

    event_loop.run().expect("run loop");

    assert_eq!(handler.dispatched.get(), 2);
    assert_eq!(reactor.registered_descriptors(), vec![b.as_raw_fd()]);
}

#[cfg(feature = "epoll")]
#[test]
fn fallback_descriptor_is_dispatched_without_kernel_signal() {
    let event_loop = EventLoop::new().expect("create event loop");
    let file = tempfile::tempfile().expect("temp file");

    // no timeout requested: only the fallback clamp can arm the timer
    let handler = RecordingHandler::new(
        &event_loop,
        vec![(file.as_raw_fd(), PollEvents::READ)],
        None,
        2,
    );
    let reactor = SocketReactor::new(&event_loop, handler.clone());
    reactor.invalidate_sockets();
    let _guard = hang_guard(&event_loop);

    event_loop.run().expect("run loop");

    // registration was refused ...
    assert_eq!(handler.add_results.borrow().as_slice(), &[false]);
    assert_eq!(reactor.fallback_descriptors(), vec![file.as_raw_fd()]);
    // ... yet the descriptor is reported ready on every cycle
    let dispatches = handler.dispatches.borrow();
    assert_eq!(dispatches.len(), 2);
    for ready in dispatches.iter() {
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].fd, file.as_raw_fd());
        assert!(ready[0].events.contains(PollEvents::READ));
    }
}

#[test]
fn reset_returns_to_the_initial_state() {
    let event_loop = EventLoop::new().expect("create event loop");
    let (stream, _peer) = UnixStream::pair().expect("socketpair");

    let handler = RecordingHandler::new(
        &event_loop,
        vec![(stream.as_raw_fd(), PollEvents::READ)],
        Some(Duration::from_millis(10)),
        1,
    );
    let reactor = SocketReactor::new(&event_loop, handler.clone());
    reactor.invalidate_sockets();
    let _guard = hang_guard(&event_loop);
    event_loop.run().expect("run loop");
    assert!(!reactor.registered_descriptors().is_empty());

    reactor.reset();
    assert!(reactor.registered_descriptors().is_empty());
}
