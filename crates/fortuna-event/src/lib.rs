//! # fortuna-event
//!
//! Readiness notification for the fortuna server: one [`ReadinessQueue`] per
//! event loop, multiplexing sockets, periodic timers, termination signals
//! and cross-thread [`Notifier`] wakeups into a single blocking wait.
//!
//! Sockets are edge-triggered by default. A consumer must drain a socket
//! until `WouldBlock` before waiting again, or the next edge never comes.
//!
//! ```ignore
//! use fortuna_event::{Event, EventKind, Interest, ReadinessQueue, TimeUnit, Trigger};
//!
//! let mut q = ReadinessQueue::new()?;
//! q.register_socket(listener.as_raw_fd(), Interest::READ, Trigger::Edge, 0)?;
//! q.register_timer(1, 1, TimeUnit::Seconds, 0)?;
//!
//! let mut events = [Event::default(); 64];
//! let n = q.get_events(&mut events)?;
//! ```

pub mod event;

pub use event::{Event, EventKind, Interest, TimeUnit, Trigger};
pub use nix::sys::signal::Signal;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod notifier;
        mod queue;
        pub use notifier::Notifier;
        pub use queue::ReadinessQueue;
    } else {
        compile_error!("fortuna-event requires Linux (epoll, timerfd, signalfd, eventfd)");
    }
}
