// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An auto-reset event that can be duplicated and handed to other processes:
//!
//! Windows: [event objects](https://learn.microsoft.com/en-us/windows/win32/sync/event-objects)
//! Linux: [eventfd](https://man7.org/linux/man-pages/man2/eventfd.2.html)
//!
//! Consuming a signal (via [`Event::wait`], [`Event::wait_timeout`], or
//! [`Event::try_wait`]) returns the event to the unsignaled state, so each
//! signal releases exactly one waiter.

#![warn(missing_docs)]
// UNSAFETY: FFI into platform-specific APIs.
#![expect(unsafe_code)]

mod unix;
mod windows;

#[cfg(not(any(windows, target_os = "linux")))]
compile_error!("pal_event supports Windows and Linux only");

#[cfg(unix)]
use unix as sys;
#[cfg(windows)]
use windows as sys;

use std::time::Duration;

/// A platform-specific auto-reset synchronization event.
#[derive(Debug)]
pub struct Event(sys::Inner);

impl Event {
    /// Creates a new, unsignaled event.
    pub fn new() -> std::io::Result<Self> {
        Self::new_inner()
    }

    /// Signals the event.
    ///
    /// Signaling an already signaled event has no additional effect.
    pub fn signal(&self) {
        self.signal_inner();
    }

    /// Waits for the event to be signaled and consumes the signal.
    pub fn wait(&self) {
        while !self.wait_timeout_inner(None) {}
    }

    /// Waits up to `timeout` for the event to be signaled, consuming the
    /// signal if it arrives.
    ///
    /// Returns `false` if the timeout expired first.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.wait_timeout_inner(Some(timeout))
    }

    /// Tries to consume the event signal.
    ///
    /// Returns `false` if the event is not currently signaled.
    pub fn try_wait(&self) -> bool {
        self.try_wait_inner()
    }

    /// Creates a second, independently closable reference to the same event.
    pub fn duplicate(&self) -> std::io::Result<Self> {
        self.0.try_clone().map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::Event;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_event() {
        let event = Event::new().unwrap();
        event.signal();
        event.wait();
    }

    #[test]
    fn signal_is_consumed_once() {
        let event = Event::new().unwrap();
        assert!(!event.try_wait());
        event.signal();
        event.signal();
        assert!(event.try_wait());
        assert!(!event.try_wait());
    }

    #[test]
    fn wait_timeout_expires() {
        let event = Event::new().unwrap();
        assert!(!event.wait_timeout(Duration::from_millis(20)));
        event.signal();
        assert!(event.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn duplicate_shares_state() {
        let event = Event::new().unwrap();
        let dup = event.duplicate().unwrap();
        drop(event);
        dup.signal();
        assert!(dup.try_wait());
    }

    #[test]
    fn wakes_other_thread() {
        let event = Arc::new(Event::new().unwrap());
        let thread = std::thread::spawn({
            let event = event.clone();
            move || event.wait()
        });
        std::thread::sleep(Duration::from_millis(10));
        event.signal();
        thread.join().unwrap();
    }
}
