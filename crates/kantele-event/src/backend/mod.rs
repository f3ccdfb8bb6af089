//! Kernel readiness backends, one selected at build time.

#[cfg(feature = "epoll")]
mod epoll;
#[cfg(not(feature = "epoll"))]
mod poll;

#[cfg(feature = "epoll")]
pub(crate) use epoll::EpollBackend as Backend;
#[cfg(not(feature = "epoll"))]
pub(crate) use poll::PollBackend as Backend;
