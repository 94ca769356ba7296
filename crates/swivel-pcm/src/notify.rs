//! Pollable readiness notifier.
//!
//! Every device instance owns exactly one notifier. The mover signals it once
//! per iteration; the host poll loop waits on [`poll_fd`] and the device
//! clears the pending state when it translates revents. Readiness is
//! edge-triggered: any number of signals before a consume collapse into one
//! observed readiness, and a consume with no prior signal observes nothing.
//!
//! Linux backs this with an `eventfd` counter; other Unix systems fall back to
//! a non-blocking pipe. The descriptor closes exactly once, when the notifier
//! drops.
//!
//! [`poll_fd`]: ReadyNotifier::poll_fd

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

#[cfg(not(unix))]
compile_error!("the readiness notifier requires a Unix host");

#[derive(Debug)]
pub struct ReadyNotifier {
    /// Descriptor handed to the host poll loop; on Linux also the signal
    /// target.
    fd: OwnedFd,
    /// Write end of the pipe on non-Linux hosts.
    #[cfg(not(target_os = "linux"))]
    signal_fd: OwnedFd,
}

impl ReadyNotifier {
    #[cfg(target_os = "linux")]
    pub fn new() -> io::Result<Self> {
        let raw = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // Safety: eventfd returned a fresh descriptor that nothing else owns.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        Ok(Self { fd })
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    pub fn new() -> io::Result<Self> {
        let mut raw = [0i32; 2];
        if unsafe { libc::pipe(raw.as_mut_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }
        // Safety: pipe returned two fresh descriptors that nothing else owns.
        let (fd, signal_fd) =
            unsafe { (OwnedFd::from_raw_fd(raw[0]), OwnedFd::from_raw_fd(raw[1])) };
        set_nonblocking_cloexec(fd.as_raw_fd())?;
        set_nonblocking_cloexec(signal_fd.as_raw_fd())?;
        Ok(Self { fd, signal_fd })
    }

    /// Mark the stream ready.
    ///
    /// Non-blocking and safe to call any number of times. A saturated counter
    /// or full pipe means readiness is already pending, so a failed write
    /// changes nothing.
    pub fn signal(&self) {
        let value: u64 = 1;
        let bytes = value.to_ne_bytes();
        let _ = unsafe {
            libc::write(
                self.signal_target().as_raw_fd(),
                bytes.as_ptr().cast(),
                bytes.len(),
            )
        };
    }

    /// Clear pending readiness. Returns whether a signal was pending.
    #[cfg(target_os = "linux")]
    pub fn consume(&self) -> bool {
        // One read returns the accumulated counter and resets it to zero.
        let mut buf = [0u8; 8];
        let n = unsafe { libc::read(self.fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
        n == buf.len() as isize
    }

    /// Clear pending readiness. Returns whether a signal was pending.
    #[cfg(all(unix, not(target_os = "linux")))]
    pub fn consume(&self) -> bool {
        // Each signal wrote 8 bytes; drain the pipe until it reports empty.
        let mut drained = false;
        let mut buf = [0u8; 64];
        loop {
            let n =
                unsafe { libc::read(self.fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
            if n > 0 {
                drained = true;
            } else {
                break;
            }
        }
        drained
    }

    /// Descriptor for the host poll loop. Readable while a signal is pending.
    pub fn poll_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    fn signal_target(&self) -> BorrowedFd<'_> {
        #[cfg(target_os = "linux")]
        {
            self.fd.as_fd()
        }
        #[cfg(not(target_os = "linux"))]
        {
            self.signal_fd.as_fd()
        }
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
fn set_nonblocking_cloexec(fd: std::os::fd::RawFd) -> io::Result<()> {
    unsafe {
        let fl = libc::fcntl(fd, libc::F_GETFL);
        if fl < 0 || libc::fcntl(fd, libc::F_SETFL, fl | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
        let fdfl = libc::fcntl(fd, libc::F_GETFD);
        if fdfl < 0 || libc::fcntl(fd, libc::F_SETFD, fdfl | libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poll_readable(fd: BorrowedFd<'_>, timeout_ms: i32) -> bool {
        let mut pfd = libc::pollfd {
            fd: fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let n = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        n == 1 && (pfd.revents & libc::POLLIN) != 0
    }

    #[test]
    fn test_signal_makes_descriptor_readable() {
        let notifier = ReadyNotifier::new().unwrap();
        assert!(!poll_readable(notifier.poll_fd(), 0));

        notifier.signal();
        assert!(poll_readable(notifier.poll_fd(), 0));
    }

    #[test]
    fn test_repeated_signals_collapse_into_one_readiness() {
        let notifier = ReadyNotifier::new().unwrap();
        for _ in 0..5 {
            notifier.signal();
        }

        assert!(notifier.consume());
        assert!(!notifier.consume());
        assert!(!poll_readable(notifier.poll_fd(), 0));
    }

    #[test]
    fn test_consume_without_signal_observes_nothing() {
        let notifier = ReadyNotifier::new().unwrap();
        assert!(!notifier.consume());
    }

    #[test]
    fn test_signal_after_consume_raises_readiness_again() {
        let notifier = ReadyNotifier::new().unwrap();
        notifier.signal();
        assert!(notifier.consume());

        notifier.signal();
        assert!(poll_readable(notifier.poll_fd(), 0));
        assert!(notifier.consume());
    }
}
