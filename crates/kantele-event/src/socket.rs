use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use thiserror::Error;

use crate::event_loop::{EventLoop, LoopCore};
use crate::events::PollEvents;

/// Why a descriptor could not be scheduled with the readiness backend.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The active backend cannot watch this kind of descriptor (epoll
    /// rejects plain files and some character devices with `EPERM`).
    #[error("descriptor kind not supported by the readiness backend")]
    Unsupported,
    #[error("failed to schedule descriptor")]
    Io(#[from] io::Error),
}

/// Readiness callback for one externally-owned descriptor.
///
/// The caller keeps ownership of the descriptor and must keep it open while
/// it is scheduled. The callback receives the readiness observed by the most
/// recent wait; the same value stays available through
/// [`SocketEvent::ready_flags`] until the next wait. Dropping the handle
/// deregisters the descriptor.
pub struct SocketEvent {
    core: Rc<LoopCore>,
    id: u64,
}

impl SocketEvent {
    pub fn new(
        event_loop: &EventLoop,
        fd: RawFd,
        callback: impl Fn(PollEvents) + 'static,
    ) -> Self {
        let core = Rc::clone(event_loop.core());
        let id = core.register_socket(fd, Rc::new(callback));
        Self { core, id }
    }

    pub fn fd(&self) -> RawFd {
        self.core.socket_fd(self.id)
    }

    /// Registers or updates kernel interest. An empty mask cancels.
    pub fn schedule(&self, events: PollEvents) -> Result<(), ScheduleError> {
        self.core.socket_schedule(self.id, events)
    }

    pub fn cancel(&self) {
        self.core.socket_cancel(self.id);
    }

    /// Readiness observed for this descriptor by the most recent wait.
    pub fn ready_flags(&self) -> PollEvents {
        self.core.socket_ready(self.id)
    }
}

impl Drop for SocketEvent {
    fn drop(&mut self) {
        self.core.remove_socket(self.id);
    }
}
