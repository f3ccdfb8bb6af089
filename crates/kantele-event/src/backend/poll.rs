use std::collections::HashMap;
use std::io;
use std::os::fd::BorrowedFd;
use std::os::unix::io::RawFd;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{self, PollFd, PollFlags, PollTimeout};

use crate::events::PollEvents;
use crate::socket::ScheduleError;

/// Level-triggered backend: the interest set lives in user space and the
/// whole set is handed to `poll(2)` on every wait. Registration never
/// touches the kernel and cannot fail.
pub(crate) struct PollBackend {
    fds: HashMap<u64, (RawFd, PollEvents)>,
}

impl PollBackend {
    pub(crate) fn new() -> io::Result<Self> {
        Ok(Self { fds: HashMap::new() })
    }

    pub(crate) fn register(
        &mut self,
        id: u64,
        fd: RawFd,
        events: PollEvents,
    ) -> Result<(), ScheduleError> {
        self.fds.insert(id, (fd, events));
        Ok(())
    }

    pub(crate) fn update(
        &mut self,
        id: u64,
        fd: RawFd,
        events: PollEvents,
    ) -> Result<(), ScheduleError> {
        self.fds.insert(id, (fd, events));
        Ok(())
    }

    pub(crate) fn deregister(&mut self, id: u64, _fd: RawFd) -> io::Result<()> {
        self.fds.remove(&id);
        Ok(())
    }

    pub(crate) fn wait(
        &mut self,
        timeout: Option<Duration>,
        out: &mut Vec<(u64, PollEvents)>,
    ) -> io::Result<()> {
        let mut ids = Vec::with_capacity(self.fds.len());
        let mut pollfds = Vec::with_capacity(self.fds.len());
        for (&id, &(fd, events)) in &self.fds {
            ids.push(id);
            // Safety: the descriptor is owned by the caller that scheduled
            // it and must stay open while registered.
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            pollfds.push(PollFd::new(borrowed, request_flags(events)));
        }

        loop {
            match poll::poll(&mut pollfds, to_poll_timeout(timeout)) {
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(io::Error::from(errno)),
            }
        }

        for (id, pollfd) in ids.iter().zip(&pollfds) {
            let revents = pollfd.revents().unwrap_or(PollFlags::empty());
            let events = returned_events(revents);
            if !events.is_empty() {
                out.push((*id, events));
            }
        }
        Ok(())
    }
}

fn request_flags(events: PollEvents) -> PollFlags {
    let mut flags = PollFlags::empty();
    if events.contains(PollEvents::READ) {
        flags |= PollFlags::POLLIN;
    }
    if events.contains(PollEvents::WRITE) {
        flags |= PollFlags::POLLOUT;
    }
    flags
}

fn returned_events(flags: PollFlags) -> PollEvents {
    let mut events = PollEvents::empty();
    if flags.contains(PollFlags::POLLIN) {
        events |= PollEvents::READ;
    }
    if flags.contains(PollFlags::POLLOUT) {
        events |= PollEvents::WRITE;
    }
    if flags.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
        events |= PollEvents::ERROR;
    }
    if flags.contains(PollFlags::POLLHUP) {
        events |= PollEvents::HANGUP;
    }
    events
}

fn to_poll_timeout(timeout: Option<Duration>) -> PollTimeout {
    match timeout {
        None => PollTimeout::NONE,
        // round up so a timer never wakes early into a busy retry
        Some(duration) => {
            let millis = duration.as_nanos().div_ceil(1_000_000);
            u32::try_from(millis)
                .ok()
                .and_then(|millis| PollTimeout::try_from(millis).ok())
                .unwrap_or(PollTimeout::MAX)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    use super::PollBackend;
    use crate::events::PollEvents;

    #[test]
    fn reports_write_readiness_on_every_wait() {
        let (stream, _peer) = UnixStream::pair().expect("socketpair");
        let mut backend = PollBackend::new().expect("backend");
        backend
            .register(1, stream.as_raw_fd(), PollEvents::WRITE)
            .expect("register");

        // level-triggered: an idle socket stays writable wait after wait
        for _ in 0..2 {
            let mut ready = Vec::new();
            backend
                .wait(Some(Duration::ZERO), &mut ready)
                .expect("wait");
            assert_eq!(ready.len(), 1);
            assert_eq!(ready[0].0, 1);
            assert!(ready[0].1.contains(PollEvents::WRITE));
        }
    }

    #[test]
    fn read_readiness_appears_after_peer_write() {
        let (stream, mut peer) = UnixStream::pair().expect("socketpair");
        let mut backend = PollBackend::new().expect("backend");
        backend
            .register(7, stream.as_raw_fd(), PollEvents::READ)
            .expect("register");

        let mut ready = Vec::new();
        backend
            .wait(Some(Duration::ZERO), &mut ready)
            .expect("wait");
        assert!(ready.is_empty());

        peer.write_all(b"x").expect("write");
        backend
            .wait(Some(Duration::from_millis(100)), &mut ready)
            .expect("wait");
        assert_eq!(ready.len(), 1);
        assert!(ready[0].1.contains(PollEvents::READ));
    }

    #[test]
    fn deregistered_descriptor_is_not_polled() {
        let (stream, mut peer) = UnixStream::pair().expect("socketpair");
        let mut backend = PollBackend::new().expect("backend");
        backend
            .register(3, stream.as_raw_fd(), PollEvents::READ)
            .expect("register");
        backend.deregister(3, stream.as_raw_fd()).expect("deregister");

        peer.write_all(b"x").expect("write");
        let mut ready = Vec::new();
        backend
            .wait(Some(Duration::ZERO), &mut ready)
            .expect("wait");
        assert!(ready.is_empty());
    }
}
