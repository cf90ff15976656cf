//! Event and registration vocabulary shared by every queue backend.

use std::ops::BitOr;

/// What became ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Socket is readable, or has hit end-of-file / an error.
    Read,
    /// Socket is writable.
    Write,
    /// Periodic timer fired at least once since the last wait.
    Timer,
    /// One or more registered signals were delivered.
    Signal,
    /// A [`Notifier`](crate::Notifier) was poked from another thread.
    Notify,
}

/// One readiness notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    /// Socket fd, last delivered signal number, or timer/notifier fd.
    pub ident: i32,
    /// Pending socket error (`SO_ERROR`), 0 when none.
    pub error: i32,
    /// Peer closed its side or the socket hung up.
    pub eof: bool,
    /// Kind-specific count: elapsed timer units, delivered signals, or
    /// accumulated notifications. 0 for sockets.
    pub data: u64,
    /// Value given at registration.
    pub user_data: u64,
}

impl Event {
    pub(crate) fn new(kind: EventKind, ident: i32, user_data: u64) -> Self {
        Self {
            kind,
            ident,
            error: 0,
            eof: false,
            data: 0,
            user_data,
        }
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new(EventKind::Read, -1, 0)
    }
}

/// Socket readiness of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u8);

impl Interest {
    pub const READ: Interest = Interest(0b01);
    pub const WRITE: Interest = Interest(0b10);

    #[inline]
    pub fn is_readable(self) -> bool {
        self.0 & Self::READ.0 != 0
    }

    #[inline]
    pub fn is_writable(self) -> bool {
        self.0 & Self::WRITE.0 != 0
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Self) -> Self {
        Interest(self.0 | rhs.0)
    }
}

/// Notification mode for socket registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Trigger {
    /// Report transitions only; the consumer must drain until `WouldBlock`.
    #[default]
    Edge,
    /// Report for as long as the condition holds.
    Level,
}

/// Unit for timer delays and periods. Timer events report elapsed time in
/// the unit the timer was registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
}

impl TimeUnit {
    pub(crate) fn to_nanos(self, n: u64) -> u64 {
        let scale = match self {
            TimeUnit::Nanoseconds => 1,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Milliseconds => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
        };
        n.saturating_mul(scale)
    }
}
