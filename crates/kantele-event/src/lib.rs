//! Cooperative event loop and socket readiness reactor.
//!
//! [`EventLoop`] runs timers, idle callbacks, and descriptor readiness on a
//! single owning thread. [`SocketReactor`] sits on top of it and reconciles
//! a dynamically-changing descriptor set for one owning component, which
//! implements [`SocketHandler`] to be told when its sockets are ready and to
//! decide the next timeout.
//!
//! The kernel notification mechanism is chosen at build time: the `epoll`
//! feature (default) registers descriptors with `epoll(7)`; without it the
//! whole interest set is resubmitted to `poll(2)` on every wait.

mod backend;
mod event_loop;
mod events;
mod idle;
mod reactor;
mod socket;
mod timer;

pub use event_loop::EventLoop;
pub use events::PollEvents;
pub use idle::IdleEvent;
#[cfg(not(feature = "epoll"))]
pub use reactor::SocketRequest;
pub use reactor::{ReadySocket, SocketHandler, SocketReactor};
pub use socket::{ScheduleError, SocketEvent};
pub use timer::TimerEvent;
