// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(target_os = "linux")]

use crate::Event;
use std::os::unix::prelude::*;
use std::time::Duration;
use std::time::Instant;

pub type Inner = OwnedFd;

/// Runs f() until it stop failing with EINTR (as indicated by errno).
fn while_eintr<F, R>(mut f: F) -> std::io::Result<R>
where
    F: FnMut() -> std::io::Result<R>,
{
    loop {
        match f() {
            Err(err) if err.raw_os_error() == Some(libc::EINTR) => {}
            r => break r,
        }
    }
}

fn syscall_result<T: PartialOrd + Default>(result: T) -> std::io::Result<T> {
    if result >= T::default() {
        Ok(result)
    } else {
        Err(std::io::Error::last_os_error())
    }
}

impl Event {
    pub(crate) fn new_inner() -> std::io::Result<Self> {
        // SAFETY: calling C APIs as documented, with no special requirements, and validating its
        // return value before passing it to from_raw_fd.
        let fd = unsafe {
            let fd = syscall_result(libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC))?;
            OwnedFd::from_raw_fd(fd)
        };
        Ok(Self(fd))
    }

    pub(crate) fn signal_inner(&self) {
        let c: u64 = 1;
        // SAFETY: fd holds a valid and open file descriptor.
        let r = unsafe {
            syscall_result(libc::write(
                self.0.as_raw_fd(),
                std::ptr::from_ref::<u64>(&c).cast::<libc::c_void>(),
                size_of_val(&c),
            ))
        };
        match r {
            Ok(n) if n == size_of_val(&c) as isize => {}
            // The counter is saturated, so the event is already signaled.
            Err(err) if err.raw_os_error() == Some(libc::EAGAIN) => {}
            r => {
                panic!("unexpected event write result: {:?}", r);
            }
        }
    }

    /// Consumes the whole counter, so multiple signals collapse into one.
    pub(crate) fn try_wait_inner(&self) -> bool {
        let mut c: u64 = 0;
        // SAFETY: fd holds a valid and open file descriptor.
        let n = while_eintr(|| unsafe {
            syscall_result(libc::read(
                self.0.as_raw_fd(),
                std::ptr::from_mut(&mut c).cast::<libc::c_void>(),
                size_of_val(&c),
            ))
        });
        match n {
            Ok(n) => {
                assert!(n == size_of_val(&c) as isize);
                true
            }
            Err(err) => {
                assert_eq!(err.raw_os_error(), Some(libc::EAGAIN));
                false
            }
        }
    }

    /// Polls for readability. Returns `false` on timeout.
    fn poll(&self, timeout: Option<Duration>) -> bool {
        let mut pollfds = [libc::pollfd {
            fd: self.0.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        }];
        let timeout_ms = timeout.map_or(-1, |t| {
            // Round up so that short waits do not degrade into spinning.
            t.as_nanos()
                .div_ceil(1_000_000)
                .try_into()
                .unwrap_or(i32::MAX)
        });
        // SAFETY: fd holds a valid and open file descriptor.
        let n = while_eintr(|| unsafe {
            syscall_result(libc::poll(pollfds.as_mut_ptr(), 1, timeout_ms))
        });
        match n {
            Ok(n) => n != 0,
            Err(err) => panic!("event poll failed: {}", err),
        }
    }

    pub(crate) fn wait_timeout_inner(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.try_wait_inner() {
                return true;
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            if !self.poll(remaining) {
                return self.try_wait_inner();
            }
        }
    }
}

impl From<OwnedFd> for Event {
    fn from(fd: OwnedFd) -> Self {
        Self(fd)
    }
}

impl From<Event> for OwnedFd {
    fn from(event: Event) -> Self {
        event.0
    }
}

impl AsFd for Event {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}
