//! Cross-thread wakeup over an eventfd.
//!
//! Any number of `notify()` calls before the owning queue waits again
//! coalesce into a single `Notify` event whose `data` is the number of
//! notifications (eventfd counter semantics).

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use fortuna_core::Result;

#[derive(Debug)]
pub struct Notifier {
    fd: RawFd,
}

impl Notifier {
    /// Create a non-blocking eventfd. The notifier owns it and closes it
    /// on drop.
    pub fn new() -> Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(Self { fd })
    }

    /// Wake the queue this notifier is registered with.
    pub fn notify(&self) -> Result<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // Counter saturated: a wakeup is already pending.
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Reset the counter, returning the accumulated count (0 if none).
    pub fn drain(&self) -> Result<u64> {
        drain_counter(self.fd)
    }
}

impl AsRawFd for Notifier {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
            self.fd = -1;
        }
    }
}

/// Read an 8-byte counter (eventfd or timerfd). `WouldBlock` reads as 0.
pub(crate) fn drain_counter(fd: RawFd) -> Result<u64> {
    let mut val: u64 = 0;
    loop {
        let ret = unsafe {
            libc::read(
                fd,
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret >= 0 {
            return Ok(val);
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock => return Ok(0),
            io::ErrorKind::Interrupted => continue,
            _ => return Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notifications_coalesce() {
        let n = Notifier::new().unwrap();
        assert_eq!(n.drain().unwrap(), 0);
        n.notify().unwrap();
        n.notify().unwrap();
        n.notify().unwrap();
        assert_eq!(n.drain().unwrap(), 3);
        assert_eq!(n.drain().unwrap(), 0);
    }

    #[test]
    fn test_notify_from_another_thread() {
        let n = std::sync::Arc::new(Notifier::new().unwrap());
        let remote = std::sync::Arc::clone(&n);
        std::thread::spawn(move || remote.notify().unwrap())
            .join()
            .unwrap();
        assert_eq!(n.drain().unwrap(), 1);
    }
}
