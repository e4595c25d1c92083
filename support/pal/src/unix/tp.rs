// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A process-wide wait pool, the Unix counterpart of Windows thread pool
//! waits.
//!
//! A single pool thread polls every registered descriptor plus a wake event.
//! When a descriptor becomes ready (or its timeout expires) the registration
//! is removed and its callback runs on the pool thread.
//!
//! Callbacks run inline and in order, so a slow callback delays every other
//! completion, timeouts included. Callers with long-running work should hand
//! it to a thread of their own.
//!
//! If polling fails the pool thread completes every registration with
//! [`WaitResult::Failed`] and exits; the next registration starts a new one.

use super::while_eintr;
use super::SyscallResult;
use crate::AsOsHandle;
use crate::WaitResult;
use pal_event::Event;
use parking_lot::Mutex;
use std::io;
use std::os::unix::prelude::*;
use std::panic::AssertUnwindSafe;
use std::sync::OnceLock;
use std::time::Duration;
use std::time::Instant;

type Completion = Box<dyn FnOnce(WaitResult) + Send>;

struct PendingWait {
    fd: RawFd,
    deadline: Option<Instant>,
    complete: Completion,
}

impl PendingWait {
    fn complete(self, result: WaitResult) {
        let complete = self.complete;
        if std::panic::catch_unwind(AssertUnwindSafe(|| complete(result))).is_err() {
            tracing::error!(fd = self.fd, "wait callback panicked");
        }
    }
}

struct WaitPool {
    waits: Mutex<PoolState>,
    wake: Event,
}

#[derive(Default)]
struct PoolState {
    pending: Vec<PendingWait>,
    running: bool,
}

static POOL: OnceLock<WaitPool> = OnceLock::new();

fn pool() -> io::Result<&'static WaitPool> {
    if let Some(pool) = POOL.get() {
        return Ok(pool);
    }
    let pool = WaitPool::new()?;
    Ok(POOL.get_or_init(|| pool))
}

pub(crate) fn wait_once<T, F>(object: T, timeout: Option<Duration>, callback: F) -> io::Result<()>
where
    T: AsOsHandle + Send + 'static,
    F: FnOnce(T, WaitResult) + Send + 'static,
{
    pool()?.register(object, timeout, callback)
}

impl WaitPool {
    fn new() -> io::Result<Self> {
        Ok(Self {
            waits: Mutex::new(PoolState::default()),
            wake: Event::new()?,
        })
    }

    fn register<T, F>(
        &'static self,
        object: T,
        timeout: Option<Duration>,
        callback: F,
    ) -> io::Result<()>
    where
        T: AsOsHandle + Send + 'static,
        F: FnOnce(T, WaitResult) + Send + 'static,
    {
        let fd = object.as_os_handle().as_raw_fd();
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        // `object` moves into the closure, so `fd` stays open until the
        // callback has run.
        let complete: Completion = Box::new(move |result| callback(object, result));
        {
            let mut state = self.waits.lock();
            if !state.running {
                std::thread::Builder::new()
                    .name("pal-wait-pool".into())
                    .spawn(move || self.run())?;
                state.running = true;
            }
            state.pending.push(PendingWait {
                fd,
                deadline,
                complete,
            });
        }
        self.wake.signal();
        Ok(())
    }

    fn run(&self) {
        loop {
            let (mut pollfds, timeout) = self.snapshot();
            let timeout_ms = timeout.map_or(-1, |t| {
                t.as_nanos()
                    .div_ceil(1_000_000)
                    .try_into()
                    .unwrap_or(i32::MAX)
            });
            // SAFETY: every descriptor in `pollfds` is owned by an object held
            // in a pending registration, and registrations are only removed
            // by this thread.
            let r = while_eintr(|| unsafe {
                libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms)
                    .syscall_result()
            });
            if let Err(err) = r {
                tracing::error!(
                    error = &io::Error::from(err) as &dyn std::error::Error,
                    "wait pool poll failed"
                );
                self.abandon(err.0);
                return;
            }

            // Consume the wake signal; the snapshot below picks up any new
            // registrations.
            let _ = self.wake.try_wait();

            for (pending, result) in self.take_ready(&pollfds[1..]) {
                pending.complete(result);
            }
        }
    }

    /// Fails every registration and marks the pool thread as gone, so that
    /// the next registration starts a new one.
    fn abandon(&self, errno: i32) {
        let pending = {
            let mut state = self.waits.lock();
            state.running = false;
            std::mem::take(&mut state.pending)
        };
        for wait in pending {
            wait.complete(WaitResult::Failed(errno));
        }
    }

    /// Builds the poll set, with the wake event first, and the time until the
    /// nearest deadline.
    fn snapshot(&self) -> (Vec<libc::pollfd>, Option<Duration>) {
        let state = self.waits.lock();
        let mut pollfds = Vec::with_capacity(state.pending.len() + 1);
        pollfds.push(libc::pollfd {
            fd: self.wake.as_fd().as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        });
        pollfds.extend(state.pending.iter().map(|wait| libc::pollfd {
            fd: wait.fd,
            events: libc::POLLIN,
            revents: 0,
        }));
        let now = Instant::now();
        let timeout = state
            .pending
            .iter()
            .filter_map(|wait| wait.deadline)
            .min()
            .map(|deadline| deadline.saturating_duration_since(now));
        (pollfds, timeout)
    }

    /// Removes and returns the registrations that completed. `polled[i]`
    /// corresponds to `pending[i]`; registrations appended since the
    /// snapshot are at the end and are left alone.
    fn take_ready(&self, polled: &[libc::pollfd]) -> Vec<(PendingWait, WaitResult)> {
        let now = Instant::now();
        let mut state = self.waits.lock();
        let mut ready = Vec::new();
        for (i, pollfd) in polled.iter().enumerate().rev() {
            let wait = &state.pending[i];
            let result = if pollfd.revents & libc::POLLNVAL != 0 {
                WaitResult::Failed(libc::EBADF)
            } else if pollfd.revents & libc::POLLERR != 0 {
                WaitResult::Failed(libc::EIO)
            } else if pollfd.revents & (libc::POLLIN | libc::POLLHUP) != 0 {
                WaitResult::Signaled
            } else if wait.deadline.is_some_and(|deadline| deadline <= now) {
                WaitResult::TimedOut
            } else {
                continue;
            };
            ready.push((state.pending.remove(i), result));
        }
        // Complete in registration order.
        ready.reverse();
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use test_with_tracing::test;

    fn leaked_pool() -> &'static WaitPool {
        Box::leak(Box::new(WaitPool::new().unwrap()))
    }

    #[test]
    fn callbacks_run_on_the_pool_thread() {
        let pool = leaked_pool();
        let event = Event::new().unwrap();
        event.signal();
        let (send, recv) = mpsc::channel();
        pool.register(event, None, move |_, result| {
            let name = std::thread::current().name().map(str::to_owned);
            send.send((name, result)).unwrap();
        })
        .unwrap();
        let (name, result) = recv.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(name.as_deref(), Some("pal-wait-pool"));
        assert_eq!(result, WaitResult::Signaled);
    }

    #[test]
    fn abandoned_waits_fail_and_pool_restarts() {
        let pool = leaked_pool();
        let (send, recv) = mpsc::channel();
        // Stand in for a pool thread that is about to fail.
        {
            let mut state = pool.waits.lock();
            state.running = true;
            let event = Event::new().unwrap();
            let fd = event.as_fd().as_raw_fd();
            let send = send.clone();
            state.pending.push(PendingWait {
                fd,
                deadline: None,
                complete: Box::new(move |result| {
                    drop(event);
                    send.send(result).unwrap();
                }),
            });
        }
        pool.abandon(libc::ENOMEM);
        assert_eq!(recv.try_recv().unwrap(), WaitResult::Failed(libc::ENOMEM));
        assert!(!pool.waits.lock().running);
        assert!(pool.waits.lock().pending.is_empty());

        let event = Event::new().unwrap();
        event.signal();
        pool.register(event, None, move |_, result| send.send(result).unwrap())
            .unwrap();
        assert_eq!(
            recv.recv_timeout(Duration::from_secs(10)).unwrap(),
            WaitResult::Signaled
        );
    }
}
