// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The worker's record of one registration.

use crate::worker::Outstanding;
use pal_event::Event;
use std::fs::File;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

/// Work registered by a requester and waiting for its start event.
///
/// Dropping the request is the only way its completion is signaled. Fields
/// drop in declaration order, so the resource and start handles are closed
/// before the requester is told the work finished.
pub(crate) struct WorkRequest {
    pub id: u64,
    pub resource: File,
    pub start: Event,
    pub completion: Completion,
    pub _outstanding: Outstanding,
}

#[cfg(unix)]
impl std::os::fd::AsFd for WorkRequest {
    fn as_fd(&self) -> std::os::fd::BorrowedFd<'_> {
        self.start.as_fd()
    }
}

#[cfg(windows)]
impl std::os::windows::io::AsHandle for WorkRequest {
    fn as_handle(&self) -> std::os::windows::io::BorrowedHandle<'_> {
        self.start.as_handle()
    }
}

/// The worker's side of a completion event. Signals the event at most once,
/// no matter how many times or from how many threads it is asked to.
pub(crate) struct Completion {
    event: Event,
    signaled: AtomicBool,
}

impl Completion {
    pub fn new(event: Event) -> Self {
        Self {
            event,
            signaled: AtomicBool::new(false),
        }
    }

    /// Signals the event if it has not been signaled yet. Returns whether
    /// this call signaled it.
    pub fn signal(&self) -> bool {
        if self.signaled.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.event.signal();
        true
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.signal();
    }
}
