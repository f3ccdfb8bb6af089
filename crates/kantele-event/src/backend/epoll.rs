use std::io;
use std::os::fd::BorrowedFd;
use std::os::unix::io::RawFd;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};

use crate::events::PollEvents;
use crate::socket::ScheduleError;

const WAIT_CAPACITY: usize = 64;

/// Registration-style backend: interest changes are pushed to the kernel as
/// they happen and `epoll_wait` reports only signaled descriptors.
pub(crate) struct EpollBackend {
    epoll: Epoll,
}

impl EpollBackend {
    pub(crate) fn new() -> io::Result<Self> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(io::Error::from)?;
        Ok(Self { epoll })
    }

    pub(crate) fn register(
        &mut self,
        id: u64,
        fd: RawFd,
        events: PollEvents,
    ) -> Result<(), ScheduleError> {
        // Safety: the descriptor is owned by the caller that scheduled it
        // and must stay open while registered.
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        match self.epoll.add(borrowed, EpollEvent::new(interest_flags(events), id)) {
            Ok(()) => Ok(()),
            Err(Errno::EPERM) => Err(ScheduleError::Unsupported),
            Err(errno) => Err(ScheduleError::Io(io::Error::from(errno))),
        }
    }

    pub(crate) fn update(
        &mut self,
        id: u64,
        fd: RawFd,
        events: PollEvents,
    ) -> Result<(), ScheduleError> {
        // Safety: see register.
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        let mut event = EpollEvent::new(interest_flags(events), id);
        self.epoll
            .modify(borrowed, &mut event)
            .map_err(|errno| ScheduleError::Io(io::Error::from(errno)))
    }

    pub(crate) fn deregister(&mut self, _id: u64, fd: RawFd) -> io::Result<()> {
        // Safety: see register.
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        self.epoll.delete(borrowed).map_err(io::Error::from)
    }

    pub(crate) fn wait(
        &mut self,
        timeout: Option<Duration>,
        out: &mut Vec<(u64, PollEvents)>,
    ) -> io::Result<()> {
        let mut events = [EpollEvent::empty(); WAIT_CAPACITY];
        let count = loop {
            match self.epoll.wait(&mut events, to_epoll_timeout(timeout)) {
                Ok(count) => break count,
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(io::Error::from(errno)),
            }
        };

        for event in &events[..count] {
            let ready = returned_events(event.events());
            if !ready.is_empty() {
                out.push((event.data(), ready));
            }
        }
        Ok(())
    }
}

fn interest_flags(events: PollEvents) -> EpollFlags {
    let mut flags = EpollFlags::empty();
    if events.contains(PollEvents::READ) {
        flags |= EpollFlags::EPOLLIN;
    }
    if events.contains(PollEvents::WRITE) {
        flags |= EpollFlags::EPOLLOUT;
    }
    flags
}

fn returned_events(flags: EpollFlags) -> PollEvents {
    let mut events = PollEvents::empty();
    if flags.contains(EpollFlags::EPOLLIN) {
        events |= PollEvents::READ;
    }
    if flags.contains(EpollFlags::EPOLLOUT) {
        events |= PollEvents::WRITE;
    }
    if flags.contains(EpollFlags::EPOLLERR) {
        events |= PollEvents::ERROR;
    }
    if flags.contains(EpollFlags::EPOLLHUP) {
        events |= PollEvents::HANGUP;
    }
    events
}

fn to_epoll_timeout(timeout: Option<Duration>) -> EpollTimeout {
    match timeout {
        None => EpollTimeout::NONE,
        // round up so a timer never wakes early into a busy retry
        Some(duration) => {
            let millis = duration.as_nanos().div_ceil(1_000_000);
            u32::try_from(millis)
                .ok()
                .and_then(|millis| EpollTimeout::try_from(millis).ok())
                .unwrap_or(EpollTimeout::MAX)
        }
    }
}
