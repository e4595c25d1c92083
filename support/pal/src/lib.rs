// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! This crate provides a set of types that abstract over OS-specific platform
//! primitives. It is focused on handle lifetime and wait-related
//! functionality: duplicating handles, waiting for them on the platform
//! thread pool, and identifying threads.
//!
//! As a convenience, it also exports some OS-specific functionality.

pub mod unix;
pub mod windows;

pub use sys::pipe::pair as pipe_pair;

#[cfg(unix)]
use unix as sys;
#[cfg(windows)]
use windows as sys;

use std::io;
use std::time::Duration;

/// An owned OS handle: a file descriptor on Unix, a `HANDLE` on Windows.
#[cfg(unix)]
pub type OsHandle = std::os::fd::OwnedFd;
/// An owned OS handle: a file descriptor on Unix, a `HANDLE` on Windows.
#[cfg(windows)]
pub type OsHandle = std::os::windows::io::OwnedHandle;

/// A borrowed OS handle.
#[cfg(unix)]
pub type BorrowedOsHandle<'a> = std::os::fd::BorrowedFd<'a>;
/// A borrowed OS handle.
#[cfg(windows)]
pub type BorrowedOsHandle<'a> = std::os::windows::io::BorrowedHandle<'a>;

/// Objects that expose a borrowed OS handle.
pub trait AsOsHandle {
    /// Borrows the underlying handle.
    fn as_os_handle(&self) -> BorrowedOsHandle<'_>;
}

#[cfg(unix)]
impl<T: std::os::fd::AsFd> AsOsHandle for T {
    fn as_os_handle(&self) -> BorrowedOsHandle<'_> {
        self.as_fd()
    }
}

#[cfg(windows)]
impl<T: std::os::windows::io::AsHandle> AsOsHandle for T {
    fn as_os_handle(&self) -> BorrowedOsHandle<'_> {
        self.as_handle()
    }
}

/// Duplicates `handle` into the current process with the same access rights.
///
/// The new handle references the same kernel object but is closed
/// independently of the original.
pub fn duplicate(handle: BorrowedOsHandle<'_>) -> io::Result<OsHandle> {
    sys::duplicate_same_access(handle)
}

/// Returns the number of handles (or file descriptors) currently open in this
/// process.
pub fn open_handle_count() -> io::Result<usize> {
    sys::open_handle_count()
}

/// The outcome of a thread pool wait.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WaitResult {
    /// The object was signaled.
    Signaled,
    /// The timeout passed to [`wait_once`] expired first.
    TimedOut,
    /// The object was a mutex whose owner exited without releasing it.
    Abandoned,
    /// The wait failed with the given OS error code.
    Failed(i32),
}

/// Waits on the platform thread pool for `object` to become signaled, then
/// calls `callback` with the object and the wait result.
///
/// This does not block. The callback runs exactly once, on a thread owned by
/// the pool and never on the calling thread. `object` is kept alive (and its
/// handle valid) until it is handed back to the callback.
///
/// On Unix the wait observes readiness without consuming it; callers waiting
/// on an [`pal_event::Event`] must consume the signal themselves. Unix
/// callbacks also share a single pool thread, so they should return
/// promptly.
///
/// If registration fails, `object` is dropped and the callback is never
/// called.
pub fn wait_once<T, F>(object: T, timeout: Option<Duration>, callback: F) -> io::Result<()>
where
    T: AsOsHandle + Send + 'static,
    F: FnOnce(T, WaitResult) + Send + 'static,
{
    sys::tp::wait_once(object, timeout, callback)
}

/// Runs a closure when the instance goes out of scope.
pub struct ScopeExit<F: FnOnce()> {
    func: Option<F>,
}

impl<F: FnOnce()> ScopeExit<F> {
    /// Creates a new `ScopeExit`.
    pub fn new(func: F) -> Self {
        Self { func: Some(func) }
    }

    /// Prevents the closure from running when the instance goes out of scope.
    ///
    /// This function takes ownership so that any variables borrowed by the closure will be
    /// usable again after calling cancel.
    pub fn dismiss(mut self) {
        self.func = None;
    }
}

impl<F: FnOnce()> Drop for ScopeExit<F> {
    fn drop(&mut self) {
        if let Some(func) = self.func.take() {
            func();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pal_event::Event;
    use std::sync::mpsc;
    use test_with_tracing::test;

    #[test]
    fn duplicate_is_independent() {
        let event = Event::new().unwrap();
        let dup = Event::from(duplicate(event.as_os_handle()).unwrap());
        drop(event);
        dup.signal();
        assert!(dup.try_wait());
    }

    #[test]
    fn duplicate_shares_file_position() {
        use std::io::Read;
        use std::io::Seek;
        use std::io::Write;

        let mut file = tempfile::tempfile().unwrap();
        let mut dup = std::fs::File::from(duplicate(file.as_os_handle()).unwrap());
        file.write_all(b"first ").unwrap();
        dup.write_all(b"second").unwrap();
        drop(dup);

        let mut contents = String::new();
        file.rewind().unwrap();
        file.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "first second");
    }

    #[test]
    fn scope_exit_runs_unless_dismissed() {
        let mut ran = false;
        ScopeExit::new(|| ran = true);
        assert!(ran);

        let mut ran = false;
        ScopeExit::new(|| ran = true).dismiss();
        assert!(!ran);
    }

    #[test]
    fn wait_once_fires_on_signal() {
        let event = Event::new().unwrap();
        let trigger = event.duplicate().unwrap();
        let caller = std::thread::current().id();
        let (send, recv) = mpsc::channel();
        wait_once(event, None, move |event, result| {
            let _ = event.try_wait();
            send.send((result, std::thread::current().id())).unwrap();
        })
        .unwrap();

        assert!(recv.recv_timeout(Duration::from_millis(50)).is_err());
        trigger.signal();
        let (result, thread) = recv.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(result, WaitResult::Signaled);
        assert_ne!(thread, caller);
    }

    #[test]
    fn wait_once_times_out() {
        let event = Event::new().unwrap();
        let (send, recv) = mpsc::channel();
        wait_once(event, Some(Duration::from_millis(20)), move |_, result| {
            send.send(result).unwrap();
        })
        .unwrap();
        let result = recv.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(result, WaitResult::TimedOut);
    }

    #[test]
    fn wait_once_already_signaled() {
        let event = Event::new().unwrap();
        event.signal();
        let (send, recv) = mpsc::channel();
        wait_once(event, None, move |_, result| send.send(result).unwrap()).unwrap();
        assert_eq!(
            recv.recv_timeout(Duration::from_secs(10)).unwrap(),
            WaitResult::Signaled
        );
    }

    #[test]
    fn many_waits_complete_independently() {
        let (send, recv) = mpsc::channel();
        let mut triggers = Vec::new();
        for i in 0..16 {
            let event = Event::new().unwrap();
            triggers.push(event.duplicate().unwrap());
            let send = send.clone();
            wait_once(event, None, move |_, result| send.send((i, result)).unwrap()).unwrap();
        }
        for trigger in triggers.iter().rev() {
            trigger.signal();
        }
        let mut seen: Vec<_> = (0..16)
            .map(|_| recv.recv_timeout(Duration::from_secs(10)).unwrap())
            .collect();
        seen.sort_by_key(|(i, _)| *i);
        assert!(seen
            .iter()
            .enumerate()
            .all(|(i, (j, result))| i == *j && *result == WaitResult::Signaled));
    }
}
