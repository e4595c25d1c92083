// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cancellation of blocking synchronous calls from another thread.
//!
//! A [`CancelableIo`] runs synchronous calls on behalf of the thread that
//! owns it, one at a time. Any other thread may call
//! [`CancelableIo::signal`] to abort the call in flight: on Windows via
//! `CancelSynchronousIo` on the owner thread, on Unix by interrupting the
//! owner thread's blocking system call with a signal.
//!
//! Cancellation is best effort. A driver (or file type) that does not support
//! cancellation lets the call run to completion; either way, a call that was
//! in flight or started after cancellation reports
//! ["operation aborted"](is_aborted).
//!
//! Cancellation is sticky: once signaled, every later call on the object is
//! reported as aborted until [`CancelableIo::reset`] rearms it.
//!
//! On Unix the interruption is delivered as `SIGUSR2`. The first call on a
//! [`CancelableIo`] installs a process-wide handler for it, replacing any
//! handler the host process had installed, so hosts must not use `SIGUSR2`
//! for anything else.

#![warn(missing_docs)]

mod unix;
mod windows;

#[cfg(unix)]
use unix as sys;
#[cfg(windows)]
use windows as sys;

use parking_lot::Mutex;
use parking_lot::MutexGuard;
use std::io;
use std::time::Duration;
use std::time::Instant;

/// How long [`CancelableIo::signal`] keeps trying to reach a call that has
/// not returned.
const CANCEL_PERSISTENCE: Duration = Duration::from_millis(500);
/// The longest pause between two cancellation attempts.
const MAX_CANCEL_BACKOFF: Duration = Duration::from_millis(32);

/// A section in which one synchronous call at a time can be aborted from
/// another thread.
#[derive(Debug, Default)]
pub struct CancelableIo {
    /// Held for the duration of a call.
    call: Mutex<()>,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    /// Captured on the first call and reused for every later one.
    owner: Option<sys::OwnerThread>,
    pending: bool,
    canceled: bool,
}

/// The outcome of one cancellation attempt against the owner thread.
#[derive(Debug)]
enum CancelAttempt {
    /// The in-flight call was cancelled.
    #[cfg_attr(unix, allow(dead_code))]
    Delivered,
    /// The call may not have reached the kernel yet; try again.
    Retry,
    /// Cancellation is not possible for this call.
    Failed(io::Error),
}

/// Returns the error reported for calls aborted by [`CancelableIo::signal`].
pub fn aborted_error() -> io::Error {
    io::Error::from_raw_os_error(sys::OPERATION_ABORTED)
}

/// Returns true if `err` reports a call aborted by [`CancelableIo::signal`].
pub fn is_aborted(err: &io::Error) -> bool {
    err.raw_os_error() == Some(sys::OPERATION_ABORTED)
}

impl CancelableIo {
    /// Creates a new, uncanceled section. The owner thread is captured by
    /// the first call to [`Self::enter`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `call` as the cancelable call for this object.
    ///
    /// Calls are serialized. All calls must come from the thread that made
    /// the first one; calls from another thread fail with
    /// [`io::ErrorKind::InvalidInput`] without running `call`.
    ///
    /// If the object was canceled before or during the call, the call's
    /// result is replaced by the [aborted](is_aborted) error. The call itself
    /// is not skipped.
    ///
    /// On Unix cancellation makes the blocking system call fail with
    /// [`io::ErrorKind::Interrupted`], so `call` must return that error
    /// instead of retrying it. This rules out std helpers such as
    /// `read_exact` and `write_all`; loops that need to retry should go
    /// through [`Self::retry_unless_canceled`].
    pub fn enter<T>(&self, call: impl FnOnce() -> io::Result<T>) -> io::Result<T> {
        let _call = self.call.lock();
        {
            let mut state = self.state.lock();
            match &state.owner {
                Some(owner) if !owner.is_current() => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "cancelable section entered from a thread other than its owner",
                    ));
                }
                Some(_) => {}
                None => state.owner = Some(sys::OwnerThread::current()?),
            }
            state.pending = true;
        }

        let result = call();

        let mut state = self.state.lock();
        state.pending = false;
        if state.canceled {
            if let Err(err) = &result {
                tracing::debug!(
                    error = err as &dyn std::error::Error,
                    "canceled call failed"
                );
            }
            return Err(aborted_error());
        }
        result
    }

    /// Cancels the object, aborting the call in flight if there is one.
    ///
    /// With no call in flight this only records the cancellation, which
    /// causes later calls to be reported as aborted.
    pub fn signal(&self) {
        let mut state = self.state.lock();
        state.canceled = true;
        if !state.pending {
            tracing::debug!("cancel recorded with no call in flight");
            return;
        }
        let deadline = Instant::now() + CANCEL_PERSISTENCE;
        let mut backoff = Duration::from_millis(1);
        for attempt in 1.. {
            let Some(owner) = &state.owner else {
                break;
            };
            // The call is on this thread and will see the flag on return.
            if owner.is_current() {
                break;
            }
            match owner.cancel() {
                CancelAttempt::Delivered => {
                    tracing::debug!(attempt, "cancelled in-flight call");
                    break;
                }
                CancelAttempt::Retry => {
                    MutexGuard::unlocked(&mut state, || std::thread::sleep(backoff));
                    if !state.pending {
                        tracing::debug!(attempt, "cancelled in-flight call");
                        break;
                    }
                    if Instant::now() >= deadline {
                        tracing::warn!(
                            attempt,
                            "in-flight call did not return after cancellation"
                        );
                        break;
                    }
                    backoff = (backoff * 2).min(MAX_CANCEL_BACKOFF);
                }
                CancelAttempt::Failed(err) => {
                    tracing::debug!(
                        error = &err as &dyn std::error::Error,
                        "synchronous io cancellation failed"
                    );
                    break;
                }
            }
        }
    }

    /// Runs `op` again each time it fails with
    /// [`io::ErrorKind::Interrupted`], until the object is canceled.
    ///
    /// Use this inside [`Self::enter`] for calls that would otherwise retry
    /// interrupted system calls unconditionally.
    pub fn retry_unless_canceled<T>(
        &self,
        mut op: impl FnMut() -> io::Result<T>,
    ) -> io::Result<T> {
        loop {
            match op() {
                Err(err) if err.kind() == io::ErrorKind::Interrupted && !self.is_canceled() => {}
                result => return result,
            }
        }
    }

    /// Returns true once [`Self::signal`] has been called (and not reset).
    pub fn is_canceled(&self) -> bool {
        self.state.lock().canceled
    }

    /// Returns true while a call is in flight.
    pub fn is_pending(&self) -> bool {
        self.state.lock().pending
    }

    /// Clears the canceled state so that later calls run normally.
    ///
    /// Fails (returning `false`) while a call is in flight, since that call
    /// has already been targeted.
    pub fn reset(&self) -> bool {
        let mut state = self.state.lock();
        if state.pending {
            return false;
        }
        state.canceled = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;
    use test_with_tracing::test;

    fn wait_for_pending(io: &CancelableIo) {
        while !io.is_pending() {
            std::thread::sleep(Duration::from_millis(5));
        }
        // Give the owner time to block inside the kernel.
        std::thread::sleep(Duration::from_millis(50));
    }

    #[test]
    fn signal_aborts_blocked_call() {
        let io = Arc::new(CancelableIo::new());
        let (read, _write) = pal::pipe_pair().unwrap();
        let thread = std::thread::spawn({
            let io = io.clone();
            move || {
                let mut buf = [0; 16];
                io.enter(|| (&read).read(&mut buf))
            }
        });
        wait_for_pending(&io);
        io.signal();
        let err = thread.join().unwrap().unwrap_err();
        assert!(is_aborted(&err), "{err:?}");
        assert!(!io.is_pending());
    }

    #[test]
    fn signal_without_call_is_sticky() {
        let io = CancelableIo::new();
        io.signal();
        assert!(io.is_canceled());
        let mut ran = false;
        let err = io
            .enter(|| {
                ran = true;
                Ok(5)
            })
            .unwrap_err();
        assert!(ran);
        assert!(is_aborted(&err));
        assert!(is_aborted(&io.enter(|| Ok(6)).unwrap_err()));
    }

    #[test]
    fn signal_without_call_leaves_next_call_uninterrupted() {
        let io = CancelableIo::new();
        io.signal();
        let (read, mut write) = pal::pipe_pair().unwrap();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            write.write_all(b"data").unwrap();
        });
        let mut buf = [0; 4];
        let mut n = 0;
        let err = io
            .enter(|| {
                n = (&read).read(&mut buf)?;
                Ok(())
            })
            .unwrap_err();
        writer.join().unwrap();
        assert_eq!(&buf[..n], b"data");
        assert!(is_aborted(&err), "{err:?}");
    }

    #[test]
    fn signal_aborts_retrying_call() {
        let io = Arc::new(CancelableIo::new());
        let (read, _write) = pal::pipe_pair().unwrap();
        let thread = std::thread::spawn({
            let io = io.clone();
            move || {
                let mut buf = [0; 4];
                io.enter(|| {
                    let mut filled = 0;
                    while filled < buf.len() {
                        let n = io.retry_unless_canceled(|| (&read).read(&mut buf[filled..]))?;
                        if n == 0 {
                            return Err(io::ErrorKind::UnexpectedEof.into());
                        }
                        filled += n;
                    }
                    Ok(())
                })
            }
        });
        wait_for_pending(&io);
        io.signal();
        let err = thread.join().unwrap().unwrap_err();
        assert!(is_aborted(&err), "{err:?}");
    }

    #[cfg(unix)]
    #[test]
    fn signal_gives_up_on_call_that_swallows_interrupts() {
        let io = Arc::new(CancelableIo::new());
        let (read, mut write) = pal::pipe_pair().unwrap();
        let thread = std::thread::spawn({
            let io = io.clone();
            move || {
                let mut buf = [0; 4];
                io.enter(|| (&read).read_exact(&mut buf))
            }
        });
        wait_for_pending(&io);
        io.signal();
        assert!(io.is_pending());
        write.write_all(b"data").unwrap();
        let err = thread.join().unwrap().unwrap_err();
        assert!(is_aborted(&err), "{err:?}");
    }

    #[test]
    fn reset_rearms() {
        let io = CancelableIo::new();
        io.signal();
        assert!(io.reset());
        assert!(!io.is_canceled());
        assert_eq!(io.enter(|| Ok(5)).unwrap(), 5);
    }

    #[test]
    fn reset_fails_while_pending() {
        let io = CancelableIo::new();
        assert!(!io.enter(|| Ok(io.reset())).unwrap());
    }

    #[test]
    fn signal_during_call_overrides_result() {
        let io = CancelableIo::new();
        let err = io
            .enter(|| {
                io.signal();
                Ok(1)
            })
            .unwrap_err();
        assert!(is_aborted(&err));
    }

    #[test]
    fn call_errors_pass_through() {
        let io = CancelableIo::new();
        let err = io
            .enter(|| Err::<(), _>(io::Error::from(io::ErrorKind::NotFound)))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!is_aborted(&err));
    }

    #[test]
    fn owner_thread_is_fixed() {
        let io = Arc::new(CancelableIo::new());
        assert_eq!(io.enter(|| Ok(1)).unwrap(), 1);
        assert_eq!(io.enter(|| Ok(2)).unwrap(), 2);
        let err = std::thread::spawn({
            let io = io.clone();
            move || io.enter(|| Ok(3))
        })
        .join()
        .unwrap()
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
