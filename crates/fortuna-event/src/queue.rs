//! epoll-backed readiness queue.
//!
//! Every registration is keyed by its file descriptor, which doubles as the
//! epoll token. Internal sources (timerfd, signalfd, eventfd) are drained by
//! the queue itself while translating events, so callers only ever see
//! counts, never raw descriptor reads.
//!
//! ```text
//!  epoll_wait ──► raw epoll_event[] ──► sources[fd] ──► Event { kind, ident, data, .. }
//!                                         │
//!                   Socket ───────────────┤ flags → Read / Write, eof, SO_ERROR
//!                   Timer { period } ─────┤ read expirations × period
//!                   Signal ───────────────┤ read signalfd_siginfo until EAGAIN
//!                   Notify ───────────────┘ read eventfd counter
//! ```

use std::collections::HashMap;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use nix::sys::signal::{SigSet, Signal};

use fortuna_core::Result;

use crate::event::{Event, EventKind, Interest, TimeUnit, Trigger};
use crate::notifier::{drain_counter, Notifier};

#[derive(Debug, Clone, Copy)]
enum SourceKind {
    Socket,
    Timer { period: u64 },
    Signal,
    Notify,
}

#[derive(Debug)]
struct Source {
    kind: SourceKind,
    user_data: u64,
    /// Created by the queue and closed with it.
    owned: bool,
}

/// Readiness queue over one epoll instance. Owned and polled by a single
/// thread; registrations may be added and removed between waits.
pub struct ReadinessQueue {
    epfd: RawFd,
    sources: HashMap<RawFd, Source>,
    raw: Vec<libc::epoll_event>,
}

impl ReadinessQueue {
    pub fn new() -> Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(Self {
            epfd,
            sources: HashMap::new(),
            raw: Vec::new(),
        })
    }

    /// Register a socket. The caller keeps ownership of `fd` and must
    /// [`deregister`](Self::deregister) it before closing.
    pub fn register_socket(
        &mut self,
        fd: RawFd,
        interest: Interest,
        trigger: Trigger,
        user_data: u64,
    ) -> Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, socket_flags(interest, trigger))?;
        self.sources.insert(
            fd,
            Source {
                kind: SourceKind::Socket,
                user_data,
                owned: false,
            },
        );
        Ok(())
    }

    /// Change the interest set or user data of a registered socket.
    pub fn modify_socket(
        &mut self,
        fd: RawFd,
        interest: Interest,
        trigger: Trigger,
        user_data: u64,
    ) -> Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, socket_flags(interest, trigger))?;
        if let Some(source) = self.sources.get_mut(&fd) {
            source.user_data = user_data;
        }
        Ok(())
    }

    /// Register a periodic timer firing first after `initial` and then every
    /// `period` units. Returns the timer's identifier.
    pub fn register_timer(
        &mut self,
        initial: u64,
        period: u64,
        unit: TimeUnit,
        user_data: u64,
    ) -> Result<RawFd> {
        let fd = unsafe {
            libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK | libc::TFD_CLOEXEC)
        };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // A zero it_value disarms the timer.
        let spec = libc::itimerspec {
            it_value: timespec(unit.to_nanos(initial).max(1)),
            it_interval: timespec(unit.to_nanos(period)),
        };
        let ret = unsafe { libc::timerfd_settime(fd, 0, &spec, std::ptr::null_mut()) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err.into());
        }
        self.add_internal(fd, SourceKind::Timer { period }, user_data, true)?;
        Ok(fd)
    }

    /// Route `signals` into this queue.
    ///
    /// The signals are blocked for the calling thread; threads spawned
    /// afterwards inherit the mask, so call this before starting workers.
    pub fn register_signals(&mut self, signals: &[Signal], user_data: u64) -> Result<RawFd> {
        let mut mask = SigSet::empty();
        for &sig in signals {
            mask.add(sig);
        }
        mask.thread_block()?;

        let fd = unsafe { libc::signalfd(-1, mask.as_ref(), libc::SFD_NONBLOCK | libc::SFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        self.add_internal(fd, SourceKind::Signal, user_data, true)?;
        Ok(fd)
    }

    /// Deliver `notifier` pokes as `Notify` events. The notifier must outlive
    /// the registration.
    pub fn register_notifier(&mut self, notifier: &Notifier, user_data: u64) -> Result<()> {
        self.add_internal(notifier.as_raw_fd(), SourceKind::Notify, user_data, false)
    }

    /// Remove a registration. Descriptors created by the queue are closed.
    pub fn deregister(&mut self, fd: RawFd) -> Result<()> {
        let source = self.sources.remove(&fd);
        let ret = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        let err = (ret < 0).then(io::Error::last_os_error);
        if let Some(Source { owned: true, .. }) = source {
            unsafe { libc::close(fd) };
        }
        match err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Block until at least one event is ready, then fill `out` with up to
    /// `out.len()` events. Interrupted waits are retried.
    ///
    /// A socket that is both readable and writable is reported once, as
    /// `Read`; readers are expected to flush pending output after reading.
    pub fn get_events(&mut self, out: &mut [Event]) -> Result<usize> {
        loop {
            let n = self.wait(out, None)?;
            if n > 0 {
                return Ok(n);
            }
        }
    }

    /// Like [`get_events`](Self::get_events) but gives up after `timeout`,
    /// returning 0.
    pub fn get_events_timeout(&mut self, out: &mut [Event], timeout: Duration) -> Result<usize> {
        self.wait(out, Some(timeout))
    }

    /// Release the queue and every descriptor it created.
    pub fn close(self) {
        drop(self)
    }

    fn wait(&mut self, out: &mut [Event], timeout: Option<Duration>) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.raw.len() < out.len() {
            self.raw.resize(out.len(), libc::epoll_event { events: 0, u64: 0 });
        }
        let timeout_ms = match timeout {
            None => -1,
            Some(d) if d.is_zero() => 0,
            Some(d) => d.as_millis().clamp(1, i32::MAX as u128) as i32,
        };

        let n = unsafe {
            libc::epoll_wait(self.epfd, self.raw.as_mut_ptr(), out.len() as i32, timeout_ms)
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err.into());
        }

        let mut filled = 0;
        for i in 0..n as usize {
            let raw = self.raw[i];
            let flags = raw.events;
            let fd = raw.u64 as RawFd;
            let Some(source) = self.sources.get(&fd) else {
                tracing::trace!(fd, "event for unregistered descriptor");
                continue;
            };
            if let Some(event) = translate(fd, source, flags)? {
                out[filled] = event;
                filled += 1;
            }
        }
        Ok(filled)
    }

    fn add_internal(&mut self, fd: RawFd, kind: SourceKind, user_data: u64, owned: bool) -> Result<()> {
        if let Err(e) = self.ctl(libc::EPOLL_CTL_ADD, fd, libc::EPOLLIN as u32) {
            if owned {
                unsafe { libc::close(fd) };
            }
            return Err(e);
        }
        self.sources.insert(fd, Source { kind, user_data, owned });
        Ok(())
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, flags: u32) -> Result<()> {
        let mut ev = libc::epoll_event {
            events: flags,
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if ret < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }
}

impl Drop for ReadinessQueue {
    fn drop(&mut self) {
        for (&fd, source) in &self.sources {
            if source.owned {
                unsafe { libc::close(fd) };
            }
        }
        if self.epfd >= 0 {
            unsafe { libc::close(self.epfd) };
            self.epfd = -1;
        }
    }
}

impl std::fmt::Debug for ReadinessQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessQueue")
            .field("epfd", &self.epfd)
            .field("sources", &self.sources.len())
            .finish()
    }
}

fn socket_flags(interest: Interest, trigger: Trigger) -> u32 {
    let mut flags = 0u32;
    if interest.is_readable() {
        flags |= (libc::EPOLLIN | libc::EPOLLRDHUP) as u32;
    }
    if interest.is_writable() {
        flags |= libc::EPOLLOUT as u32;
    }
    if trigger == Trigger::Edge {
        flags |= libc::EPOLLET as u32;
    }
    flags
}

fn translate(fd: RawFd, source: &Source, flags: u32) -> Result<Option<Event>> {
    let event = match source.kind {
        SourceKind::Socket => {
            let readable = (libc::EPOLLIN | libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR) as u32;
            let kind = if flags & readable != 0 {
                EventKind::Read
            } else {
                EventKind::Write
            };
            let mut ev = Event::new(kind, fd, source.user_data);
            ev.eof = flags & (libc::EPOLLRDHUP | libc::EPOLLHUP) as u32 != 0;
            if flags & libc::EPOLLERR as u32 != 0 {
                ev.error = socket_error(fd);
            }
            ev
        }
        SourceKind::Timer { period } => {
            let expirations = drain_counter(fd)?;
            if expirations == 0 {
                return Ok(None);
            }
            let mut ev = Event::new(EventKind::Timer, fd, source.user_data);
            ev.data = expirations.saturating_mul(period);
            ev
        }
        SourceKind::Signal => {
            let (count, last) = drain_signals(fd)?;
            if count == 0 {
                return Ok(None);
            }
            let mut ev = Event::new(EventKind::Signal, last, source.user_data);
            ev.data = count;
            ev
        }
        SourceKind::Notify => {
            let count = drain_counter(fd)?;
            if count == 0 {
                return Ok(None);
            }
            let mut ev = Event::new(EventKind::Notify, fd, source.user_data);
            ev.data = count;
            ev
        }
    };
    Ok(Some(event))
}

/// Read every pending `signalfd_siginfo`; returns (count, last signo).
fn drain_signals(fd: RawFd) -> Result<(u64, i32)> {
    let mut count = 0u64;
    let mut last = 0i32;
    loop {
        let mut info: libc::signalfd_siginfo = unsafe { std::mem::zeroed() };
        let size = std::mem::size_of::<libc::signalfd_siginfo>();
        let ret = unsafe { libc::read(fd, &mut info as *mut _ as *mut libc::c_void, size) };
        if ret == size as isize {
            count += 1;
            last = info.ssi_signo as i32;
            continue;
        }
        if ret >= 0 {
            return Ok((count, last));
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock => return Ok((count, last)),
            io::ErrorKind::Interrupted => continue,
            _ => return Err(err.into()),
        }
    }
}

fn socket_error(fd: RawFd) -> i32 {
    let mut err: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if ret < 0 {
        io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
    } else {
        err
    }
}

fn timespec(nanos: u64) -> libc::timespec {
    libc::timespec {
        tv_sec: (nanos / 1_000_000_000) as libc::time_t,
        tv_nsec: (nanos % 1_000_000_000) as libc::c_long,
    }
}
