// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The in-process worker service.

use crate::request::Completion;
use crate::request::WorkRequest;
use crate::scheduler;
use crate::scheduler::Outcome;
use crate::RegisterError;
use crate::WorkService;
use pal::AsOsHandle;
use pal::BorrowedOsHandle;
use pal_event::Event;
use parking_lot::Condvar;
use parking_lot::Mutex;
use std::fs::File;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Bytes appended to the resource when the work runs.
    pub payload: Vec<u8>,
    /// How long to wait for the start event before giving up on the work.
    /// `None` waits forever.
    pub start_timeout: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            payload: b"Hello from the worker!\n".to_vec(),
            start_timeout: None,
        }
    }
}

impl WorkerConfig {
    /// Sets the bytes the work writes.
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Bounds the wait for the start event.
    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = Some(timeout);
        self
    }
}

/// Counters describing what a worker has done so far.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    /// Registrations that were scheduled.
    pub registered: u64,
    /// Registrations that failed.
    pub rejected: u64,
    /// Scheduled requests whose work ran successfully.
    pub work_done: u64,
    /// Scheduled requests whose work ran and failed.
    pub work_failed: u64,
    /// Scheduled requests whose start wait ended without a signal.
    pub aborted: u64,
}

/// Hosts deferred work for requesters.
///
/// Registration duplicates the caller's handles, hands back a completion
/// event, and returns without blocking. The work itself runs on the platform
/// thread pool once the requester signals start.
#[derive(Debug, Clone)]
pub struct Worker {
    shared: Arc<WorkerShared>,
}

#[derive(Debug)]
pub(crate) struct WorkerShared {
    pub config: WorkerConfig,
    next_id: AtomicU64,
    registered: AtomicU64,
    rejected: AtomicU64,
    work_done: AtomicU64,
    work_failed: AtomicU64,
    aborted: AtomicU64,
    outstanding: Mutex<usize>,
    idle: Condvar,
}

impl WorkerShared {
    pub fn record(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Done => &self.work_done,
            Outcome::Failed => &self.work_failed,
            Outcome::Aborted => &self.aborted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Counts a request as outstanding until dropped.
pub(crate) struct Outstanding(Arc<WorkerShared>);

impl Outstanding {
    fn new(shared: &Arc<WorkerShared>) -> Self {
        *shared.outstanding.lock() += 1;
        Self(shared.clone())
    }
}

impl Drop for Outstanding {
    fn drop(&mut self) {
        let mut outstanding = self.0.outstanding.lock();
        *outstanding -= 1;
        if *outstanding == 0 {
            self.0.idle.notify_all();
        }
    }
}

impl Worker {
    /// Creates a worker with `config`.
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            shared: Arc::new(WorkerShared {
                config,
                next_id: AtomicU64::new(1),
                registered: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                work_done: AtomicU64::new(0),
                work_failed: AtomicU64::new(0),
                aborted: AtomicU64::new(0),
                outstanding: Mutex::new(0),
                idle: Condvar::new(),
            }),
        }
    }

    /// The worker's configuration.
    pub fn config(&self) -> &WorkerConfig {
        &self.shared.config
    }

    /// A snapshot of the worker's counters.
    pub fn stats(&self) -> WorkerStats {
        let s = &self.shared;
        WorkerStats {
            registered: s.registered.load(Ordering::Relaxed),
            rejected: s.rejected.load(Ordering::Relaxed),
            work_done: s.work_done.load(Ordering::Relaxed),
            work_failed: s.work_failed.load(Ordering::Relaxed),
            aborted: s.aborted.load(Ordering::Relaxed),
        }
    }

    /// The number of scheduled requests that have not completed.
    pub fn outstanding(&self) -> usize {
        *self.shared.outstanding.lock()
    }

    /// Blocks until every scheduled request has completed.
    pub fn wait_idle(&self) {
        let mut outstanding = self.shared.outstanding.lock();
        while *outstanding != 0 {
            self.shared.idle.wait(&mut outstanding);
        }
    }

    /// Like [`Self::wait_idle`], giving up after `timeout`. Returns whether
    /// the worker became idle.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut outstanding = self.shared.outstanding.lock();
        while *outstanding != 0 {
            if self
                .shared
                .idle
                .wait_until(&mut outstanding, deadline)
                .timed_out()
            {
                return *outstanding == 0;
            }
        }
        true
    }

    /// Registers work for handles borrowed from the caller, duplicating them
    /// first.
    pub(crate) fn register_handles(
        &self,
        file: BorrowedOsHandle<'_>,
        start: BorrowedOsHandle<'_>,
    ) -> Result<Event, RegisterError> {
        let duplicated = pal::duplicate(file)
            .map_err(RegisterError::DuplicateResource)
            .and_then(|file| {
                let start = pal::duplicate(start).map_err(RegisterError::DuplicateStart)?;
                Ok((File::from(file), Event::from(start)))
            });
        match duplicated {
            Ok((resource, start)) => self.register_duplicates(resource, start),
            Err(err) => Err(self.reject(err)),
        }
    }

    /// Registers work for handles the worker already owns. Returns the
    /// requester's duplicate of the completion event.
    pub(crate) fn register_duplicates(
        &self,
        resource: File,
        start: Event,
    ) -> Result<Event, RegisterError> {
        let (completion, returned) = match Event::new().and_then(|completion| {
            let returned = completion.duplicate()?;
            Ok((completion, returned))
        }) {
            Ok(events) => events,
            Err(err) => return Err(self.reject(RegisterError::CreateCompletion(err))),
        };

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let request = WorkRequest {
            id,
            resource,
            start,
            completion: Completion::new(completion),
            _outstanding: Outstanding::new(&self.shared),
        };
        // On failure the request has already been dropped, which signals the
        // completion that nobody will observe.
        if let Err(err) = scheduler::schedule(request, self.shared.clone()) {
            return Err(self.reject(RegisterError::Schedule(err)));
        }
        self.shared.registered.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(request_id = id, "registered work");
        Ok(returned)
    }

    /// Counts and logs a failed registration.
    pub(crate) fn reject(&self, err: RegisterError) -> RegisterError {
        self.shared.rejected.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            error = &err as &dyn std::error::Error,
            "rejected work registration"
        );
        err
    }
}

impl WorkService for Worker {
    fn register_work(&self, file: &File, start: &Event) -> Result<Event, RegisterError> {
        self.register_handles(file.as_os_handle(), start.as_os_handle())
    }
}
