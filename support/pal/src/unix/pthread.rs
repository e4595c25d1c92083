// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A basic pthread (pthread_t) wrapper that can be sent between threads and
//! used to interrupt a thread blocked in a system call.

use super::SyscallResult;
use std::io;
use std::sync::Once;

#[derive(Debug, Copy, Clone)]
pub struct Pthread(libc::pthread_t);

// SAFETY: pthread_t is an opaque handle and is safe to share/send between
// threads. But it's a pointer type on musl so does not default to Send+Sync.
unsafe impl Send for Pthread {}
// SAFETY: see above comment.
unsafe impl Sync for Pthread {}

impl PartialEq for Pthread {
    fn eq(&self, other: &Self) -> bool {
        // SAFETY: comparing opaque handles has no requirements.
        unsafe { libc::pthread_equal(self.0, other.0) != 0 }
    }
}

impl Eq for Pthread {}

impl Pthread {
    /// Gets a Pthread object initialized with the caller thread.
    pub fn current() -> Self {
        // SAFETY: calling C API as documented, with no special requirements.
        Self(unsafe { libc::pthread_self() })
    }

    /// Sends a signal to Pthread's thread.
    pub fn signal(&self, signal: i32) -> io::Result<()> {
        // SAFETY: calling as documented, with no special requirements.
        let r = unsafe { libc::pthread_kill(self.0, signal) };
        if r != 0 {
            // pthread_kill returns the error rather than setting errno.
            return Err(io::Error::from_raw_os_error(r));
        }
        Ok(())
    }
}

/// The signal used by [`interrupt`] to break a thread out of a blocking call.
pub const INTERRUPT_SIGNAL: i32 = libc::SIGUSR2;

extern "C" fn ignore_signal(_: libc::c_int) {}

/// Installs a no-op handler for [`INTERRUPT_SIGNAL`] without `SA_RESTART`, so
/// that delivering the signal makes an in-progress blocking system call fail
/// with `EINTR` instead of terminating the process or being restarted.
///
/// The handler is process-wide and replaces whatever handler was installed
/// before; a replaced handler is logged.
pub fn install_interrupt_handler() -> io::Result<()> {
    static INSTALL: Once = Once::new();
    let mut result = Ok(());
    INSTALL.call_once(|| {
        // SAFETY: sigaction is initialized with a valid handler and an empty
        // mask before being passed to the kernel, and `previous` is a valid
        // out pointer.
        result = unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            let mut previous: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = ignore_signal as usize;
            action.sa_flags = 0;
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(INTERRUPT_SIGNAL, &action, &mut previous)
                .syscall_result()
                .map(|_| previous.sa_sigaction)
                .map_err(io::Error::from)
        }
        .map(|previous| {
            if previous != libc::SIG_DFL && previous != libc::SIG_IGN {
                tracing::warn!(
                    signal = INTERRUPT_SIGNAL,
                    "replaced an existing handler for the interrupt signal"
                );
            }
        });
    });
    result
}

/// Interrupts `thread` if it is blocked in an interruptible system call.
///
/// [`install_interrupt_handler`] must have been called first.
pub fn interrupt(thread: &Pthread) -> io::Result<()> {
    thread.signal(INTERRUPT_SIGNAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn current_is_stable() {
        assert_eq!(Pthread::current(), Pthread::current());
        let other = std::thread::spawn(Pthread::current).join().unwrap();
        assert_ne!(other, Pthread::current());
    }

    #[test]
    fn interrupt_handler_does_not_restart_calls() {
        install_interrupt_handler().unwrap();
        // SAFETY: querying the current action into a valid out pointer.
        let action = unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            libc::sigaction(INTERRUPT_SIGNAL, std::ptr::null(), &mut action)
                .syscall_result()
                .unwrap();
            action
        };
        assert_eq!(action.sa_sigaction, ignore_signal as usize);
        assert_eq!(action.sa_flags & libc::SA_RESTART, 0);
    }

    #[test]
    fn interrupt_breaks_blocking_read() {
        install_interrupt_handler().unwrap();
        let (read, _write) = crate::unix::pipe::pair().unwrap();
        let (send, recv) = mpsc::channel();
        let thread = std::thread::spawn(move || {
            send.send(Pthread::current()).unwrap();
            let mut buf = [0; 1];
            (&read).read(&mut buf)
        });
        let target = recv.recv().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        interrupt(&target).unwrap();
        let err = thread.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }
}
